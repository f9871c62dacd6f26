use clap::{Parser, Subcommand};
use onebot_relay::config::Settings;
use onebot_relay::relay::Relay;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "onebot-relay")]
#[command(about = "Answer OneBot group messages with an LLM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the event server. Point the OneBot implementation's HTTP POST reporting at it.
    Serve {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.onebot-relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Handle a single event and exit. Reads the event JSON from FILE, or stdin when omitted.
    Handle {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.onebot-relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Event JSON file
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("onebot-relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Handle { config, file }) => {
            if let Err(e) = run_handle(config, file).await {
                log::error!("handle failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn load_settings(config_path: Option<PathBuf>) -> anyhow::Result<Settings> {
    let (config, path) = onebot_relay::config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    Ok(Settings::from_env(&config))
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let mut settings = load_settings(config_path)?;
    if let Some(p) = port {
        settings.server.port = p;
    }
    log::info!(
        "starting event server on {}:{} (models {} → {}, {} attempt(s), {}s apart)",
        settings.server.bind,
        settings.server.port,
        settings.completion.primary_model,
        settings.completion.secondary_model,
        settings.retry.max_attempts(),
        settings.retry.delay().as_secs()
    );
    onebot_relay::gateway::run_server(Relay::from_settings(settings)).await
}

async fn run_handle(config_path: Option<PathBuf>, file: Option<PathBuf>) -> anyhow::Result<()> {
    use anyhow::Context;

    let settings = load_settings(config_path)?;
    let body = match file {
        Some(path) => tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading event from {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("reading event from stdin")?;
            buf
        }
    };
    let report = Relay::from_settings(settings).handle(&body).await?;
    println!(
        "outcome={} delivered={}",
        report.outcome.kind(),
        report.delivery.is_delivered()
    );
    Ok(())
}
