//! Namespace rewriting and blocklist scanning.

use serde::{Deserialize, Deserializer};

/// Ordered namespace replacement table.
///
/// Replacements apply longest key first, so `/workflows:plan` wins over
/// `/workflows:`. Keys of equal length keep their document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacements {
    pairs: Vec<(String, String)>,
}

impl Replacements {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { pairs }
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (old, new) in &self.pairs {
            out = out.replace(old.as_str(), new);
        }
        out
    }

    /// Raw (pre-rewrite) keys, longest first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

impl<'de> Deserialize<'de> for Replacements {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::sync::config::string_pairs(deserializer).map(Self::new)
    }
}

/// First blocklist term contained in `text` (case-sensitive).
pub fn has_blocklist_term<'a>(text: &str, blocklist: &'a [String]) -> Option<&'a str> {
    blocklist
        .iter()
        .find(|term| !term.is_empty() && text.contains(term.as_str()))
        .map(String::as_str)
}

/// Every blocklist term contained in `text`, ignoring case.
pub fn blocklist_terms_ignore_case(text: &str, blocklist: &[String]) -> Vec<String> {
    let haystack = text.to_lowercase();
    blocklist
        .iter()
        .filter(|term| !term.is_empty() && haystack.contains(&term.to_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Replacements {
        Replacements::new([("/workflows:", "/clavain:"), ("/workflows:plan", "/clavain:write-plan")])
    }

    #[test]
    fn test_longest_match_first() {
        assert_eq!(table().apply("/workflows:plan"), "/clavain:write-plan");
        assert_eq!(table().apply("run /workflows:work now"), "run /clavain:work now");
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let reversed = Replacements::new([("/workflows:plan", "/clavain:write-plan"), ("/workflows:", "/clavain:")]);
        let text = "/workflows:plan and /workflows:review";
        assert_eq!(reversed.apply(text), table().apply(text));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let once = table().apply("/workflows:plan then /workflows:review");
        assert_eq!(table().apply(&once), once);
    }

    #[test]
    fn test_empty_table_is_identity() {
        assert_eq!(Replacements::default().apply("unchanged"), "unchanged");
        assert!(Replacements::new([("", "x")]).is_empty());
    }

    #[test]
    fn test_blocklist_case_sensitive() {
        let blocklist = vec!["rails_model".to_string(), "Every.to".to_string()];
        assert_eq!(has_blocklist_term("uses rails_model here", &blocklist), Some("rails_model"));
        assert_eq!(has_blocklist_term("uses RAILS_MODEL here", &blocklist), None);
        assert_eq!(has_blocklist_term("clean", &[]), None);
    }

    #[test]
    fn test_blocklist_ignore_case() {
        let blocklist = vec!["rails_model".to_string(), "Every.to".to_string()];
        assert_eq!(
            blocklist_terms_ignore_case("RAILS_MODEL and every.to", &blocklist),
            blocklist
        );
        assert!(blocklist_terms_ignore_case("clean", &blocklist).is_empty());
    }
}
