use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use docintake::maintenance::{CapacityManager, CapacityPolicy, MaintenanceScheduler, Reconciler};
use docintake::model::Upload;
use docintake::pipeline::{Pipeline, PipelineDeps, PipelineSettings};
use docintake::store::DocumentStore;
use docintake::telemetry::{self, LogFormat};
use docintake::{load_config, Config, EvictionTrigger};

#[derive(Parser, Debug)]
#[command(
    name = "docintake",
    version,
    about = "Ingest PDFs, recover their text and classify them with an LLM",
    long_about = "Ingest PDFs, recover their text and classify them with an LLM.\n\n\
                  Settings come from an optional JSON config file and DOCINTAKE_* \
                  environment variables."
)]
struct Cli {
    /// JSON config file (defaults apply when omitted)
    #[arg(short, long, env = "DOCINTAKE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty or json
    #[arg(long, env = "DOCINTAKE_LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store, extract and classify one or more PDFs
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Category context selecting the prompt (e.g. financial, legal)
        #[arg(long)]
        context: Option<String>,

        /// Sub-context within the context (e.g. school_records)
        #[arg(long)]
        sub_context: Option<String>,

        /// Free-text instruction passed to the model
        #[arg(long)]
        instruction: Option<String>,

        #[arg(long, default_value = "cli")]
        uploader: String,
    },
    /// Evict oldest documents if storage is above the ceiling
    Sweep,
    /// Fail documents stuck in PROCESSING, then sweep
    Reconcile,
    /// Print a stored document as JSON
    Show { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init_tracing(cli.log_format) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let deps = PipelineDeps::from_config(&config).context("failed to initialise services")?;

    match cli.command {
        Command::Ingest {
            files,
            context,
            sub_context,
            instruction,
            uploader,
        } => {
            let request = IngestRequest {
                context,
                sub_context,
                instruction,
                uploader,
            };
            ingest(&config, deps, &files, &request).await
        }
        Command::Sweep => {
            let report = maintenance(&config, &deps)
                .0
                .sweep()
                .await
                .context("capacity sweep failed")?;
            println!(
                "{}",
                serde_json::json!({
                    "totalBefore": report.total_before,
                    "overCeiling": report.over_ceiling,
                    "bytesFreed": report.bytes_freed,
                    "evicted": report.evicted,
                    "skipped": report.skipped,
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Reconcile => {
            let (capacity, reconciler) = maintenance(&config, &deps);
            let scheduler = MaintenanceScheduler::new(
                capacity,
                reconciler,
                config.capacity.sweep_interval(),
                config.capacity.stale_processing(),
            );
            let report = scheduler.run_once().await;
            println!(
                "{}",
                serde_json::json!({
                    "reconciled": report.reconcile.map(|r| r.failed),
                    "evicted": report.sweep.map(|s| s.evicted),
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { id } => {
            match deps
                .document_store
                .find_by_id(&id)
                .await
                .context("document lookup failed")?
            {
                Some(document) => {
                    println!("{}", serde_json::to_string_pretty(&document)?);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("document {} not found", id);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

struct IngestRequest {
    context: Option<String>,
    sub_context: Option<String>,
    instruction: Option<String>,
    uploader: String,
}

async fn ingest(
    config: &Config,
    deps: PipelineDeps,
    files: &[PathBuf],
    request: &IngestRequest,
) -> Result<ExitCode> {
    let (capacity, reconciler) = maintenance(config, &deps);
    let (trigger, requests) = EvictionTrigger::channel();
    let scheduler = MaintenanceScheduler::new(
        Arc::clone(&capacity),
        reconciler,
        config.capacity.sweep_interval(),
        config.capacity.stale_processing(),
    )
    .start(requests);

    let pipeline = Pipeline::new(deps, PipelineSettings::from_config(config), Some(trigger))
        .context("failed to build pipeline")?;

    let mut failures = 0usize;
    let mut ingested = 0usize;
    for path in files {
        let upload = match read_upload(path, request).await {
            Ok(upload) => upload,
            Err(e) => {
                warn!("{:#}", e);
                failures += 1;
                continue;
            }
        };

        match pipeline.ingest(upload).await {
            Ok(outcome) => {
                info!(
                    document_id = %outcome.document.id,
                    chars = outcome.analysis_chars,
                    ocr = outcome.ocr_invocations,
                    "Ingested"
                );
                println!("{}", serde_json::to_string(&outcome.document)?);
                ingested += 1;
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", path.display(), e);
            }
        }
    }

    scheduler.shutdown().await;
    // A request still queued at shutdown would be lost
    if ingested > 0 {
        if let Err(e) = capacity.sweep().await {
            warn!("Capacity sweep failed: {}", e);
        }
    }

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn read_upload(path: &Path, request: &IngestRequest) -> Result<Upload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid file name: {}", path.display()))?;

    let mut upload = Upload::pdf(file_name, request.uploader.as_str(), bytes);
    upload.content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    if let Some(context) = &request.context {
        upload = upload.with_context(context.as_str(), request.sub_context.clone());
    }
    if let Some(instruction) = &request.instruction {
        upload = upload.with_instruction(instruction.as_str());
    }
    Ok(upload)
}

fn maintenance(config: &Config, deps: &PipelineDeps) -> (Arc<CapacityManager>, Arc<Reconciler>) {
    let capacity = CapacityManager::new(
        deps.object_store.clone(),
        deps.document_store.clone(),
        CapacityPolicy::from_config(&config.capacity),
    );
    let reconciler = Reconciler::new(deps.object_store.clone(), deps.document_store.clone());
    (Arc::new(capacity), Arc::new(reconciler))
}
