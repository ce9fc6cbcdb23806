//! coedit-hub binary: load config, bind, and serve.

use std::path::PathBuf;

use clap::Parser;
use coedit_config::{config_to_json, load_default, load_from_path, validation, CoeditConfig};
use tokio::net::TcpListener;

use coedit_hub::{serve, HubState};

#[derive(Parser)]
#[command(name = "coedit-hub", about = "Signaling hub for coedit rooms")]
struct Args {
    /// Port to listen on. Overrides `hub.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind. Overrides `hub.bind_addr`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Config file. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective config as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> coedit_common::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_from_path(path)?,
        None => load_default().unwrap_or_else(|e| {
            eprintln!("coedit-hub: using built-in defaults ({e})");
            CoeditConfig::default()
        }),
    };
    if let Some(port) = args.port {
        config.hub.port = port;
    }
    if let Some(bind) = args.bind {
        config.hub.bind_addr = bind;
    }
    validation::validate(&config)?;

    if args.print_config {
        println!("{}", config_to_json(&config));
        return Ok(());
    }

    let level = config.logging.level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("coedit_hub={level}").into()),
        )
        .init();

    let addr = config.hub.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("coedit-hub listening on {}", addr);

    serve(listener, HubState::new(config.hub)).await;
    Ok(())
}
