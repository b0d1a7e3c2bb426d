//! rassist viewer: entry point.
//!
//! ```text
//! rassist-viewer                    Connect with defaults
//! rassist-viewer --agent <addr>     Agent address (overrides config)
//! rassist-viewer --config <path>    Use custom config TOML
//! rassist-viewer --gen-config       Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rassist_core::protocol::clamp_quality;
use rassist_core::{Command, JpegCodec, ViewerSession};

use rassist_viewer::config::ViewerConfig;
use rassist_viewer::shell::{ConsoleListener, Geometry, HELP, ShellAction, parse_line};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rassist-viewer", about = "rassist remote assistance viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rassist-viewer.toml")]
    config: PathBuf,

    /// Agent address (overrides config). Example: 192.168.1.100:5555
    #[arg(short, long)]
    agent: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(addr) = cli.agent {
        config.network.agent_address = addr;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rassist-viewer v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Connect to the agent ─────────────────────────────────

    let (host, port) = config.agent_endpoint()?;
    let listener = Arc::new(ConsoleListener::default());
    let session = ViewerSession::new(
        config.to_session_config(),
        listener.clone(),
        Arc::new(JpegCodec::new()),
    );
    session.connect_async(&host, port).await?;
    session.send(Command::SetQuality {
        percent: clamp_quality(config.viewer.initial_quality),
    })?;
    println!("{HELP}");

    // ── 2. Shell loop ───────────────────────────────────────────

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(config.stats_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, disconnecting");
                break;
            }
            _ = listener.closed() => break,
            _ = ticker.tick() => {
                let stats = session.stats();
                if stats.frames_received > 0 {
                    info!(
                        "{} frames, {:.1} fps, {} KiB, {}x{}, {} queued",
                        stats.frames_received,
                        stats.fps,
                        stats.bytes_received / 1024,
                        stats.width,
                        stats.height,
                        stats.queued_commands,
                    );
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin: {e}");
                        break;
                    }
                };

                let stats = session.stats();
                let geometry = Geometry {
                    view: (config.viewer.view_width, config.viewer.view_height),
                    frame: (stats.width, stats.height),
                };
                let result = match parse_line(&line, geometry) {
                    Ok(None) => Ok(()),
                    Ok(Some(ShellAction::Quit)) => break,
                    Ok(Some(ShellAction::Help)) => {
                        println!("{HELP}");
                        Ok(())
                    }
                    Ok(Some(ShellAction::Stats)) => {
                        println!("{stats:#?}");
                        Ok(())
                    }
                    Ok(Some(ShellAction::Send(command))) => session.send(command),
                    Ok(Some(ShellAction::SendNow(command))) => session.send_immediate(command).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!("{e}");
                }
            }
        }
    }

    session.disconnect().await;
    info!("{} frames received", listener.frames());
    if let Some(e) = listener.last_error() {
        return Err(e.into());
    }
    Ok(())
}
