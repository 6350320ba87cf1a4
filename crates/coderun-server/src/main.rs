//! coderun server binary
//!
//! Connects to the Docker daemon and serves interactive execution sessions
//! over WebSocket until interrupted.

use anyhow::Result;
use clap::Parser;
use coderun_core::{ConfigLoader, DockerRuntime, EngineConfig, SessionEngine};
use coderun_server::{shutdown_signal, CodeRunServer, ServerConfig};
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "coderun server - run untrusted programs interactively in containers")]
struct Cli {
    #[clap(long, short, help = "Engine configuration file (YAML)")]
    config: Option<PathBuf>,

    #[clap(long, default_value = "0.0.0.0:8080")]
    bind_addr: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(long, help = "Container image used for every language")]
    image: Option<String>,

    #[clap(long, help = "Docker endpoint, e.g. unix:///var/run/docker.sock or tcp://host:2375")]
    docker_host: Option<String>,

    #[clap(long, value_delimiter = ',', help = "Allowed CORS origins (any origin when omitted)")]
    cors_origins: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .parse_default_env()
        .init();

    let mut engine_config = match &cli.config {
        Some(path) => {
            log::info!("Loading configuration from file: {}", path.display());
            ConfigLoader::from_file(path).await?
        }
        None => EngineConfig::default(),
    };
    if let Some(image) = cli.image {
        engine_config = engine_config.with_image(image);
    }
    if let Some(host) = cli.docker_host {
        engine_config = engine_config.with_docker_host(host);
    }
    engine_config.validate()?;

    let runtime = DockerRuntime::connect(engine_config.docker_host.as_deref())?;
    match runtime.ping().await {
        Ok(()) => log::info!("Connected to Docker"),
        Err(e) => log::warn!("Docker is not reachable yet, sessions will fail until it is: {}", e),
    }

    let engine = SessionEngine::from_config(Arc::new(runtime), engine_config);
    log::info!("Supported languages: {}", engine.recipes().languages().join(", "));

    let mut server_config = ServerConfig::new().with_bind_addr_str(&cli.bind_addr)?;
    if let Some(origins) = cli.cors_origins {
        server_config = server_config.with_cors_origins(origins);
    }

    CodeRunServer::with_config(engine, server_config)
        .serve_with_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
