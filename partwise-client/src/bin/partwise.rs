//! partwise command line client

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use partwise_client::{HttpObjectStorage, HyperTransport, Orchestrator, Upload, UploadFile, UploadPhase};
use partwise_core::{format_duration, format_file_size, SessionId, SessionStatus, UploadConfig, UploadSession};
use partwise_engine::StorageEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "partwise", version, about = "Resumable multipart uploads for large files")]
struct Cli {
    /// Storage backend endpoint
    #[arg(long, global = true, default_value = "http://127.0.0.1:9000")]
    endpoint: String,

    /// Directory holding upload session records
    #[arg(long, global = true, value_name = "PATH", default_value = ".partwise")]
    data_dir: PathBuf,

    /// JSON file with upload settings
    ///
    /// Without one, any non-empty file up to 5 GiB is accepted. Set
    /// `min_file_size` and `max_file_size` (bytes) to narrow that, for
    /// example to the 100 MB to 1 GB window of the browser uploader:
    /// {"min_file_size": 104857600, "max_file_size": 1073741824}
    #[arg(long, global = true, value_name = "FILE", verbatim_doc_comment)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file
    Upload { path: PathBuf },
    /// Continue an interrupted upload with the same file
    Resume { id: SessionId, path: PathBuf },
    /// List upload sessions, newest first
    List {
        #[arg(long)]
        status: Option<SessionStatus>,
    },
    /// Show one session as JSON
    Show { id: SessionId },
    /// Abort a session and its backend upload
    Abort { id: SessionId },
    /// Delete a session record (and its object, if completed)
    Delete { id: SessionId },
    /// Print a time-limited download URL for a completed upload
    Url { id: SessionId },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<UploadConfig> {
    let config = match path {
        Some(path) => UploadConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => UploadConfig::default(),
    };
    config.validate().context("invalid upload configuration")?;
    Ok(config)
}

fn build_orchestrator(cli: &Cli) -> anyhow::Result<Arc<Orchestrator>> {
    let config = load_config(cli.config.as_ref())?;

    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("failed to create {}", cli.data_dir.display()))?;
    let engine = StorageEngine::new(&cli.data_dir).context("failed to open session store")?;
    let store = engine.session_store().context("failed to open session store")?;
    let storage = HttpObjectStorage::new(&cli.endpoint)?;

    Ok(Arc::new(Orchestrator::new(
        Arc::new(store),
        Arc::new(storage),
        Arc::new(HyperTransport::new()),
        config,
    )))
}

/// Run an upload to completion, printing progress and cancelling on ctrl-c
async fn drive(upload: Arc<Upload>, resume: Option<SessionId>, file: UploadFile) -> anyhow::Result<()> {
    let mut updates = upload.subscribe();
    let reporter = tokio::spawn(async move {
        let mut last_parts = u32::MAX;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            let progress = &snapshot.progress;
            if progress.uploaded_parts != last_parts && snapshot.phase == UploadPhase::Uploading {
                last_parts = progress.uploaded_parts;
                eprintln!(
                    "{:>6.1}%  {}/{} parts  {} / {}  {}/s  eta {}",
                    progress.percentage,
                    progress.uploaded_parts,
                    progress.total_parts,
                    format_file_size(progress.uploaded_bytes),
                    format_file_size(progress.total_bytes),
                    format_file_size(progress.speed as u64),
                    format_duration(progress.estimated_time_remaining),
                );
            }
        }
    });

    let canceller = upload.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling upload");
            canceller.cancel();
        }
    });

    let outcome = match resume {
        Some(id) => upload.resume(id, file).await?,
        None => upload.start(file).await?,
    };
    interrupt.abort();
    let _ = interrupt.await;
    drop(upload);
    let _ = reporter.await;

    let session = outcome
        .session_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    match outcome.phase {
        UploadPhase::Completed => {
            println!("completed {}", session);
            Ok(())
        }
        UploadPhase::Cancelled => {
            println!("cancelled {}", session);
            Ok(())
        }
        _ => bail!(
            "upload {} failed: {}",
            session,
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

fn print_session_row(session: &UploadSession) {
    println!(
        "{}  {:<11}  {:>6.1}%  {:>10}  {}",
        session.id,
        session.status.as_str(),
        session.percentage(),
        format_file_size(session.total_size),
        session.filename
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let orchestrator = build_orchestrator(&cli)?;

    match &cli.command {
        Command::Upload { path } => {
            let file = UploadFile::open(path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?;
            let upload = Arc::new(Upload::new(orchestrator));
            drive(upload, None, file).await?;
        }
        Command::Resume { id, path } => {
            let file = UploadFile::open(path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?;
            let upload = Arc::new(Upload::new(orchestrator));
            drive(upload, Some(*id), file).await?;
        }
        Command::List { status } => {
            for session in orchestrator.list_sessions(*status)? {
                print_session_row(&session);
            }
        }
        Command::Show { id } => {
            let session = orchestrator.get_session(*id)?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        Command::Abort { id } => {
            let session = orchestrator.abort(*id).await?;
            println!("{} {}", session.id, session.status);
        }
        Command::Delete { id } => {
            if orchestrator.delete_session(*id).await? {
                println!("deleted {}", id);
            } else {
                bail!("no session {}", id);
            }
        }
        Command::Url { id } => {
            println!("{}", orchestrator.completed_download_url(*id).await?);
        }
    }

    Ok(())
}
