//! partwise development storage backend

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use partwise_engine::StorageEngine;
use partwise_server::DevServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "partwise-server", version, about = "Local multipart storage backend for partwise")]
struct Args {
    /// Data directory path
    #[arg(long, value_name = "PATH", default_value = "./data")]
    data_dir: PathBuf,

    /// Bind address
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:9000")]
    bind: SocketAddr,

    /// Base URL embedded in presigned URLs (defaults to http://{bind})
    #[arg(long, value_name = "URL")]
    public_url: Option<String>,

    /// Secret used to sign presigned URLs
    #[arg(long, value_name = "SECRET", default_value = "partwise-dev-secret")]
    signing_secret: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let public_url = args
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://{}", args.bind));

    info!(data_dir = %args.data_dir.display(), bind = %args.bind, "starting partwise dev server");

    if !args.data_dir.exists() {
        std::fs::create_dir_all(&args.data_dir).with_context(|| {
            format!("failed to create data directory {}", args.data_dir.display())
        })?;
        info!(data_dir = %args.data_dir.display(), "created data directory");
    }

    let storage = StorageEngine::new(&args.data_dir).context("failed to open storage engine")?;
    let server = DevServer::new(storage, args.signing_secret.as_bytes(), public_url)
        .context("failed to open part staging area")?;

    server.serve(args.bind).await.context("server error")?;
    Ok(())
}
