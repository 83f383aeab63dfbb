use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use clavain::config::{Config, Paths};
use clavain::core::{ExecutionMode, Manifest, TaskId};
use clavain::orchestration::{
    find_dispatch_script, format_wave, validation_report, Orchestrator, RunEvent, RunOptions,
    ScriptExecutor, TaskExecutor,
};
use clavain::sync::{
    find_upstreams_dir, ClaudeAnalyzer, FileAction, SemanticAnalyzer, SyncEngine, SyncMode,
    UpstreamConfig, UpstreamOutcome, UpstreamStatus,
};
use clavain::{clog, clog_error, clog_warn, Error, Result};

/// Clavain - plan orchestration and upstream sync
#[derive(Parser, Debug)]
#[command(name = "clavain")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CLAVAIN_DEBUG=1     Enable debug logging (alternative to --debug)\n    CLAVAIN_HOME        Base directory (default ~/.clavain)")]
pub struct Cli {
    /// Enable debug logging (writes to <base-dir>/clavain.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Base directory for config and log
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the tasks of a plan manifest through the dispatch script
    Orchestrate {
        /// Manifest file (YAML or JSON)
        manifest: PathBuf,

        /// Full plan document referenced from every task prompt
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Project directory the executor works in
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Validate the manifest and exit
        #[arg(long)]
        validate: bool,

        /// Print the waves without dispatching anything
        #[arg(long)]
        dry_run: bool,

        /// Override the manifest's execution mode
        #[arg(long)]
        mode: Option<String>,
    },

    /// Sync upstream repositories into the local tree
    Sync {
        /// Sync a single upstream
        #[arg(long)]
        upstream: Option<String>,

        /// Preview only
        #[arg(long)]
        dry_run: bool,

        /// Non-interactive: resolve conflicts automatically where safe
        #[arg(long)]
        auto: bool,

        /// Disable semantic conflict analysis
        #[arg(long)]
        no_ai: bool,

        /// Print the markdown report, or write it to FILE
        #[arg(long, num_args = 0..=1, value_name = "FILE")]
        report: Option<Option<PathBuf>>,

        /// Project root (default: current directory)
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Upstream config (default: <project>/upstreams.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = match Paths::resolve(cli.base_dir.clone()) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };
    clavain::log::init(&paths.log_file, cli.debug);
    clog!("Clavain starting: {:?}", cli.command);

    let result = match cli.command {
        Command::Orchestrate {
            manifest,
            plan,
            project_dir,
            validate,
            dry_run,
            mode,
        } => run_orchestrate(
            &paths,
            &manifest,
            plan,
            project_dir,
            validate,
            dry_run,
            mode.as_deref(),
        ),
        Command::Sync {
            upstream,
            dry_run,
            auto,
            no_ai,
            report,
            project_dir,
            config,
        } => run_sync(
            &paths,
            upstream.as_deref(),
            SyncMode::from_flags(dry_run, auto),
            !no_ai,
            report,
            project_dir,
            config,
        ),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            clog_error!("{}", e);
            eprintln!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_orchestrate(
    paths: &Paths,
    manifest_path: &Path,
    plan: Option<PathBuf>,
    project_dir: Option<PathBuf>,
    validate: bool,
    dry_run: bool,
    mode: Option<&str>,
) -> Result<ExitCode> {
    let mode_override = match mode.map(str::parse::<ExecutionMode>).transpose() {
        Ok(mode) => mode,
        Err(e) => {
            let names: Vec<&str> = ExecutionMode::ALL.iter().map(|m| m.as_str()).collect();
            eprintln!("ERROR: {} (expected one of: {})", e, names.join(", "));
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut manifest = Manifest::load(manifest_path)?;
    if let Some(mode) = mode_override {
        manifest.mode = mode;
    }

    if validate {
        return Ok(match validation_report(&manifest) {
            Ok(line) => {
                println!("{}", line);
                ExitCode::SUCCESS
            }
            Err(errors) => {
                print_invalid(&errors);
                ExitCode::FAILURE
            }
        });
    }

    let orchestrator = match Orchestrator::new(manifest, None) {
        Ok(o) => o,
        Err(Error::InvalidGraph(errors)) => {
            print_invalid(&errors);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e),
    };

    let executor: Option<Arc<dyn TaskExecutor>> = if dry_run {
        None
    } else {
        let config = Config::load(paths)?;
        let script = find_dispatch_script(&config, paths).ok_or(Error::ExecutorNotFound)?;
        clog!("Using dispatch script {}", script.display());
        Some(Arc::new(ScriptExecutor::new(script)))
    };

    let options = RunOptions {
        project_dir: match project_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        },
        plan_path: plan,
        dry_run,
    };

    let manifest = orchestrator.manifest();
    let runtime = tokio::runtime::Runtime::new()?;
    let summary = runtime.block_on(orchestrator.run(&options, executor, &mut |event| {
        print_event(event, manifest)
    }))?;

    println!("{}", summary.format(manifest));
    if !dry_run && !summary.all_succeeded() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_invalid(errors: &[String]) {
    println!("Manifest INVALID: {} error(s)", errors.len());
    for error in errors {
        println!("  - {}", error);
    }
}

fn print_event(event: &RunEvent, manifest: &Manifest) {
    match event {
        RunEvent::Started {
            total,
            mode,
            max_parallel,
        } => {
            println!(
                "Orchestrating {} task(s) (mode: {}, max parallel: {})\n",
                total, mode, max_parallel
            );
        }
        RunEvent::Wave {
            number,
            task_ids,
            dry_run,
        } => {
            println!("{}", format_wave(*number, task_ids, manifest, *dry_run));
        }
        RunEvent::Skipped { failed, skipped } => {
            println!("  {} failed; skipping {}", failed, join_ids(skipped));
        }
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

fn run_sync(
    paths: &Paths,
    only: Option<&str>,
    mode: SyncMode,
    use_ai: bool,
    report: Option<Option<PathBuf>>,
    project_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let project_root = match project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config_path = config_path.unwrap_or_else(|| project_root.join("upstreams.json"));
    let config = Config::load(paths)?;
    let upstream_config = UpstreamConfig::load(&config_path)?;
    let upstreams_dir = find_upstreams_dir(&config, &project_root)?;

    let analyzer: Option<Arc<dyn SemanticAnalyzer>> = if use_ai && mode == SyncMode::Auto {
        match ClaudeAnalyzer::from_config(&config) {
            Ok(analyzer) => Some(Arc::new(analyzer)),
            Err(e) => {
                clog_warn!("Semantic analysis unavailable: {}", e);
                eprintln!("WARNING: {}; conflicts will only be pre-filtered", e);
                None
            }
        }
    } else {
        None
    };

    println!("\n═══ Clavain Upstream Sync ═══");
    println!("Mode: {}  AI: {}  Report: {}", mode, use_ai, report.is_some());
    println!("Upstreams dir: {}\n", upstreams_dir.display());

    let engine = SyncEngine::new(project_root, config_path, mode, analyzer);
    let runtime = tokio::runtime::Runtime::new()?;
    let run = runtime.block_on(engine.run(&upstream_config, &upstreams_dir, only, &mut print_outcome))?;

    if !run.modified().is_empty() {
        println!("\n─── Contamination Check ───");
        if run.contamination.is_empty() {
            println!("  No contamination detected");
        } else {
            for warning in &run.contamination {
                println!("  WARN {}", warning);
            }
            println!("  {} contamination warning(s)", run.contamination.len());
        }
    }

    println!("\n═══ Summary ═══");
    println!("  {} file(s) modified", run.modified().len());
    if mode == SyncMode::DryRun {
        println!("  (dry-run: no files were modified)");
    }

    match report {
        Some(Some(file)) => {
            std::fs::write(&file, run.report.generate())?;
            println!("\n  Report written to: {}", file.display());
        }
        Some(None) => println!("{}", run.report.generate()),
        None => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn print_outcome(outcome: &UpstreamOutcome) {
    println!("─── {} ───", outcome.name);
    match &outcome.status {
        UpstreamStatus::CloneMissing(dir) => println!("  Clone not found at {}", dir.display()),
        UpstreamStatus::UpToDate { head } => println!("  No new commits (HEAD: {})", short(head)),
        UpstreamStatus::BaseUnreachable { base } => {
            println!("  Last synced commit {} not reachable; skipping", base)
        }
        UpstreamStatus::NoChanges { head, new_commits } => {
            println!("  {} new commit(s), HEAD {}", new_commits, short(head));
            println!("  No mapped files changed");
        }
        UpstreamStatus::Synced { head, new_commits } => {
            println!("  {} new commit(s), HEAD {}", new_commits, short(head));
        }
    }

    for file in &outcome.files {
        let detail = match (&file.decision, file.action) {
            (Some(d), FileAction::Applied) => format!("{} (risk: {}), applied", d.decision, d.risk),
            (Some(d), FileAction::Preserved) => format!("{} (risk: {}), preserved", d.decision, d.risk),
            (Some(d), _) => format!("{} (risk: {}), left for review", d.decision, d.risk),
            (None, FileAction::LeftForReview) => "left for review".to_string(),
            (None, _) => file.classification.reason().unwrap_or_default().to_string(),
        };
        println!(
            "  {:<10} {:<50} {}",
            file.classification.family(),
            file.local_path,
            detail
        );
    }
    if outcome.checkpoint_advanced {
        println!("  Checkpoint advanced");
    }
    println!();
}

fn short(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}
