use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use mocha_http::config::{PassthroughConfig, RecordConfig, ServerConfig};
use mocha_http::{FileLoader, Loader, MockServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mocha-http",
    about = "HTTP mock server with weighted request matching and scenarios",
    version
)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "MOCHA_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port (overrides the configuration file)
    #[arg(short, long, env = "MOCHA_PORT")]
    port: Option<u16>,

    /// Listen host (overrides the configuration file)
    #[arg(long, env = "MOCHA_HOST")]
    host: Option<String>,

    /// Forward unmatched requests to this base URL
    #[arg(long, env = "MOCHA_PROXY_TARGET")]
    proxy_target: Option<String>,

    /// Record traffic to this JSON lines file
    #[arg(long, env = "MOCHA_RECORD_PATH")]
    record_path: Option<PathBuf>,

    /// Additional mock definition files
    #[arg(short, long = "mocks")]
    mocks: Vec<PathBuf>,

    /// Log filter, e.g. "info" or "mocha_http=debug" (default: RUST_LOG or info)
    #[arg(short = 'L', long)]
    log_level: Option<String>,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };

    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(host) = &args.host {
        config.listen.host = host.clone();
    }
    if let Some(target) = &args.proxy_target {
        config.proxy = Some(PassthroughConfig::new(target.clone()));
    }
    if let Some(path) = &args.record_path {
        let record = config.record.get_or_insert_with(RecordConfig::default);
        record.path = Some(path.clone());
    }
    config.mock_files.extend(args.mocks.iter().cloned());

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let config = build_config(&args)?;
    let loader = FileLoader::from_config(&config)?;

    let server = MockServer::new(config)?;
    if !loader.is_empty() {
        loader.load(&server)?;
    }
    let addr = server.start().await?;
    info!(mocks = server.mocks().len(), "Mocha listening on http://{}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.shutdown().await;
    Ok(())
}
