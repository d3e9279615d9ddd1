use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use overseer::job::{JobRequest, ZipArchiveValidator};
use overseer::sandbox::{DockerEngine, connect_docker};
use overseer::transport::{ImmediateReceipt, LogPublisher, ResultPublisher, WebhookPublisher};
use overseer::{Fault, OverseerConfig, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "overseer", version)]
#[command(about = "Run grading jobs in throwaway containers")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "OVERSEER_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a single job record and print its outcome
    Run {
        /// JSON job file, or `-` for stdin
        #[arg(long, short)]
        job: PathBuf,
    },

    /// Accept jobs over HTTP
    Serve {
        /// Listen address (defaults to OVERSEER_LISTEN_ADDR)
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = OverseerConfig::from_env().context("invalid configuration")?;
    let pipeline = build_pipeline(&config).await?;

    match cli.command {
        Command::Run { job } => {
            let raw = read_job(&job).await?;
            let request: JobRequest =
                serde_json::from_str(&raw).context("job record is not a JSON object")?;

            let report = pipeline.handle(request, &ImmediateReceipt).await;
            println!("{}", serde_json::to_string_pretty(&report.outcome.to_json())?);

            let code = match report.outcome.fault() {
                None => 0,
                Some(Fault::Client) => 2,
                Some(Fault::Server) => 1,
            };
            std::process::exit(code);
        }
        Command::Serve { addr } => {
            let addr = addr.unwrap_or(config.listen_addr);
            overseer::transport::http::serve(Arc::new(pipeline), addr).await?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("overseer=info"));

    // stdout carries the `run` outcome; logs go to stderr.
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

async fn build_pipeline(config: &OverseerConfig) -> anyhow::Result<Pipeline> {
    let docker = connect_docker()
        .await
        .context("Docker is required to run phase containers")?;
    let engine = Arc::new(DockerEngine::new(docker, config.auto_pull_image));

    let publisher: Arc<dyn ResultPublisher> = match &config.results_url {
        Some(url) => Arc::new(WebhookPublisher::new(url.clone())),
        None => Arc::new(LogPublisher),
    };

    tracing::info!(
        isolation = %config.isolation,
        work_root = %config.work_root.display(),
        "Pipeline ready"
    );

    let pipeline = Pipeline::new(config.clone(), engine, Arc::new(ZipArchiveValidator));
    Ok(pipeline.with_publisher(publisher))
}

async fn read_job(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        return Ok(raw);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read job file {}", path.display()))
}
