//! rassist agent: entry point.
//!
//! ```text
//! rassist-agent                  Listen with rassist-agent.toml (or defaults)
//! rassist-agent --port <port>    Override the listening port
//! rassist-agent --config <path>  Load a custom config TOML
//! rassist-agent --gen-config     Write default config to stdout
//! rassist-agent --init-config    Write default config to the --config path
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rassist_agent::config::AgentConfig;
use rassist_core::{Agent, Primitives};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rassist-agent", about = "rassist remote assistance agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rassist-agent.toml")]
    config: PathBuf,

    /// Listening port (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    init_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.init_config {
        AgentConfig::write_default(&cli.config)?;
        println!("Default config written to {}.", cli.config.display());
        return Ok(());
    }

    let mut config = AgentConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rassist-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("port: {}", config.network.port);
    info!("target FPS: {}", config.screen.fps);
    info!("quality: {}", config.screen.quality);
    info!(
        "output: {}x{}",
        config.screen.output_width, config.screen.output_height
    );
    info!("monitor: {}", config.screen.monitor_index);

    let session_config = config.to_session_config()?;
    let primitives = Primitives::native(config.screen.monitor_index, config.capture_timeout())?;
    let agent = Arc::new(Agent::new(session_config, primitives));

    // Ctrl-C handler.
    tokio::spawn({
        let agent = Arc::clone(&agent);
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, shutting down");
            agent.stop();
        }
    });

    agent.start().await?;

    Ok(())
}
