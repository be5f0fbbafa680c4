use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coordination::quality::{QualityGateEngine, StageKind};
use coordination::versioning::VersionStore;
use coordination::ChangeTracker;
use qa_pipeline::config::PipelineConfig;
use qa_pipeline::report::PipelineReport;
use qa_pipeline::stages::{
    CommandCollaborator, CommandRenderCheck, ContentReviewStage, FormatOptimizationStage,
    VisualInspectionStage,
};
use qa_pipeline::telemetry::{append_telemetry, RunTelemetry};
use qa_pipeline::{Orchestrator, OrchestratorError, PipelineStages};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pipeline config (TOML). Without it, defaults plus QA_* environment variables
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Version store root (overrides config and QA_ARTIFACTS_DIR)
    #[arg(long, global = true)]
    artifacts_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the quality pipeline on one document
    Run {
        /// Document identifier passed to every stage
        #[arg(long)]
        content_source: Option<String>,

        /// Version to start from
        #[arg(long)]
        starting_version: Option<String>,

        /// Run identifier (default: random)
        #[arg(long)]
        workflow_id: Option<String>,

        /// Iteration ceiling (overrides thresholds.max_iterations)
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Inspect and manage stored versions
    Versions {
        #[command(subcommand)]
        action: VersionsCommand,
    },

    /// Compare two stored versions
    Diff {
        old: String,
        new: String,

        /// Persist the comparison and per-file diffs under version_history/
        #[arg(long, default_value_t = false)]
        save: bool,
    },
}

#[derive(Subcommand, Debug)]
enum VersionsCommand {
    /// List versions in creation order
    List,
    /// Show one version record
    Show { name: String },
    /// Print a version's ancestry, root first
    Lineage { name: String },
    /// Point latest and current at an existing version
    Rollback { name: String },
    /// Remove a version and its content
    Delete { name: String },
    /// Aggregate statistics
    Stats,
    /// Write the full history as JSON
    Export { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env()?,
    };
    if let Some(dir) = args.artifacts_dir {
        config.artifacts_dir = dir;
    }

    match args.command {
        Command::Run {
            content_source,
            starting_version,
            workflow_id,
            max_iterations,
        } => {
            if let Some(source) = content_source {
                config.content_source = source;
            }
            if let Some(version) = starting_version {
                config.starting_version = version;
            }
            if let Some(max) = max_iterations {
                config.thresholds.max_iterations = max;
            }
            let workflow_id = workflow_id.unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("qa-{}", &id[..8])
            });
            run_pipeline(&config, &workflow_id).await
        }
        Command::Versions { action } => {
            manage_versions(&config, action)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Diff { old, new, save } => {
            let store = open_store(&config)?;
            let tracker = ChangeTracker::new(&config.artifacts_dir)?;
            let report = tracker.compare_versions(&store, &old, &new)?;
            if save {
                let saved = tracker.save_comparison(&report, true)?;
                info!(summary = %saved.summary_path.display(), "Saved comparison");
            }
            println!("{}", report.to_markdown());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(config: &PipelineConfig) -> Result<VersionStore> {
    VersionStore::open(&config.artifacts_dir).with_context(|| {
        format!(
            "Failed to open version store at {}",
            config.artifacts_dir.display()
        )
    })
}

async fn run_pipeline(config: &PipelineConfig, workflow_id: &str) -> Result<ExitCode> {
    if config.content_source.is_empty() {
        bail!("No content source: pass --content-source or set QA_CONTENT_SOURCE");
    }

    let store = open_store(config)?.shared();
    if !store.exists(&config.starting_version)? {
        warn!(
            version = %config.starting_version,
            store = %config.artifacts_dir.display(),
            "Starting version is not registered, the content stage resolves it"
        );
    }

    let mut collaborator = CommandCollaborator::new(&config.artifacts_dir);
    for stage in StageKind::ALL {
        let spec = config
            .stages
            .for_stage(stage)
            .with_context(|| format!("No command configured for {stage}"))?;
        collaborator = collaborator.with_stage(stage, spec.clone());
    }
    let collaborator = Arc::new(collaborator);

    let mut format = FormatOptimizationStage::new(collaborator.clone());
    if let Some(render) = &config.stages.render {
        format = format.with_render_check(Arc::new(CommandRenderCheck::new(
            render.clone(),
            store.clone(),
        )));
    }
    let stages = PipelineStages {
        content: Arc::new(ContentReviewStage::new(collaborator.clone())),
        format: Arc::new(format),
        visual: Arc::new(VisualInspectionStage::new(collaborator)),
    };

    let engine = QualityGateEngine::with_thresholds(config.thresholds.clone());
    let mut orchestrator = Orchestrator::new(store.clone(), engine, stages);
    if let Some(ns) = &config.namespace {
        orchestrator = orchestrator.with_namespace(ns.clone());
    }

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current stage");
            token.cancel();
        }
    });

    let (state, cancelled) = match orchestrator
        .run(
            workflow_id,
            &config.content_source,
            &config.starting_version,
            &cancel,
        )
        .await
    {
        Ok(state) => (state, false),
        Err(OrchestratorError::Cancelled { node, state, .. }) => {
            warn!(
                next = %node,
                version = %state.current_version,
                "Run cancelled, stored versions are kept for the next run"
            );
            (*state, true)
        }
        Err(e) => return Err(e.into()),
    };

    let mut report = PipelineReport::build(&state, &store, orchestrator.engine());
    match ChangeTracker::new(&config.artifacts_dir) {
        Ok(tracker) => {
            if let Err(e) = report.attach_comparison(&store, &tracker) {
                warn!("Failed to create change report: {e:#}");
            }
        }
        Err(e) => warn!("Change tracker unavailable: {e}"),
    }
    let report_path = report.write(&config.output_dir())?;
    append_telemetry(&RunTelemetry::from_state(&state), &config.telemetry_path());

    println!("{}", report.to_markdown());
    println!("Report: {}", report_path.display());

    Ok(if cancelled {
        ExitCode::from(130)
    } else if state.human_handoff {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn manage_versions(config: &PipelineConfig, action: VersionsCommand) -> Result<()> {
    let store = open_store(config)?;
    match action {
        VersionsCommand::List => {
            let current = store.current()?.map(|r| r.name);
            for record in store.list()? {
                let marker = if current.as_deref() == Some(record.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {:<40} {:<20} {} files  {}",
                    marker,
                    record.name,
                    record.agent,
                    record.files.len(),
                    record.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        VersionsCommand::Show { name } => {
            let record = store
                .get(&name)?
                .with_context(|| format!("Version not found: {name}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        VersionsCommand::Lineage { name } => {
            println!("{}", store.lineage(&name)?.join(" → "));
        }
        VersionsCommand::Rollback { name } => {
            let record = store.rollback(&name)?;
            println!("Current version is now {}", record.name);
        }
        VersionsCommand::Delete { name } => {
            if store.delete(&name)? {
                println!("Deleted {name}");
            } else {
                bail!("Version not found: {name}");
            }
        }
        VersionsCommand::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        VersionsCommand::Export { path } => {
            let export = store.export_history(&path)?;
            println!(
                "Exported {} versions to {}",
                export.stats.total_versions,
                path.display()
            );
        }
    }
    Ok(())
}
