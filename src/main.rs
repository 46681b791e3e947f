use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use weblogview_server::{ServerConfig, SettingsStore, WebLogViewServer};

/// weblogview - Tail local files and Kubernetes pod logs in the browser
#[derive(Parser, Debug)]
#[command(name = "weblogview")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long, short)]
    port: Option<u16>,

    /// Don't open the viewer in a browser on startup
    #[arg(long)]
    no_browser: bool,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory with the UI assets to serve
    #[arg(long, value_name = "DIR")]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = build_config(&args)?;

    let settings = match SettingsStore::default_path() {
        Some(path) => SettingsStore::load(path),
        None => {
            warn!("No configuration directory found; preferences will not be saved");
            SettingsStore::ephemeral()
        }
    };

    let url = format!("http://{}", config.bind_addr());
    let server = WebLogViewServer::new(config, Arc::new(settings));
    let listener = server.bind().await?;
    info!(url = %url, "weblogview ready");

    if !args.no_browser {
        tokio::task::spawn_blocking(move || open_browser(&url));
    }

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}

/// Defaults, then the config file, then command line flags
fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(host) = &args.host {
        config = config.with_host(host.clone());
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(dir) = &args.static_dir {
        config = config.with_static_dir(dir.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_browser(url: &str) {
    if let Err(e) = webbrowser::open(url) {
        warn!(url = %url, error = %e, "Failed to open browser");
    }
}
