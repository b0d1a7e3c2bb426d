//! Configuration for the agent.

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use rassist_core::AgentSessionConfig;
use rassist_core::protocol::{clamp_fps, clamp_quality};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Screen capture and encoding settings.
    pub screen: ScreenConfig,
    /// Per-session timeouts and limits.
    pub session: SessionConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind.
    pub listen_address: String,
    /// TCP port viewers connect to.
    pub port: u16,
}

/// Screen capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Initial frames per second (1-60). Viewers may change it with `SET_FPS`.
    pub fps: u8,
    /// Initial JPEG quality (1-100). Viewers may change it with `SET_QUALITY`.
    pub quality: u8,
    /// Every frame is resampled to this size before encoding.
    pub output_width: u32,
    pub output_height: u32,
    /// Monitor index to capture (0 = primary).
    pub monitor_index: u32,
    /// DXGI acquire timeout in milliseconds.
    pub capture_timeout_ms: u32,
}

/// Session timeouts. A value of 0 disables the timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for writing one frame.
    pub write_timeout_ms: u64,
    /// Drop the viewer when no command or keep-alive arrives for this long.
    pub command_idle_timeout_ms: u64,
    /// Consecutive malformed commands tolerated.
    pub max_violations: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".into(),
            port: rassist_core::DEFAULT_PORT,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            fps: rassist_core::protocol::DEFAULT_FPS,
            quality: rassist_core::protocol::DEFAULT_QUALITY,
            output_width: rassist_core::protocol::DEFAULT_OUTPUT_WIDTH,
            output_height: rassist_core::protocol::DEFAULT_OUTPUT_HEIGHT,
            monitor_index: 0,
            capture_timeout_ms: 50,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 5_000,
            command_idle_timeout_ms: 15_000,
            max_violations: rassist_core::codec::DEFAULT_MAX_VIOLATIONS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.screen.capture_timeout_ms.max(1)))
    }

    /// Convert into the core's session configuration.
    pub fn to_session_config(&self) -> Result<AgentSessionConfig, AddrParseError> {
        let ip: IpAddr = self.network.listen_address.parse()?;
        Ok(AgentSessionConfig {
            listen_addr: SocketAddr::new(ip, self.network.port),
            quality: clamp_quality(self.screen.quality),
            fps: clamp_fps(self.screen.fps),
            output_width: self.screen.output_width.max(1),
            output_height: self.screen.output_height.max(1),
            write_timeout: millis(self.session.write_timeout_ms),
            command_idle_timeout: millis(self.session.command_idle_timeout_ms),
            max_violations: self.session.max_violations.max(1),
        })
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&AgentConfig::default()).unwrap();
        assert!(text.contains("listen_address"));
        assert!(text.contains("output_width"));
        assert!(text.contains("command_idle_timeout_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&AgentConfig::default()).unwrap();
        let parsed: AgentConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, 5555);
        assert_eq!(parsed.screen.quality, 70);
        assert_eq!(parsed.screen.fps, 10);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: AgentConfig = toml::from_str("[screen]\nquality = 40\n").unwrap();
        assert_eq!(parsed.screen.quality, 40);
        assert_eq!(parsed.screen.output_width, 1920);
        assert_eq!(parsed.network.port, 5555);
    }

    #[test]
    fn to_session_config_clamps_and_disables_zero_timeouts() {
        let mut cfg = AgentConfig::default();
        cfg.screen.fps = 120;
        cfg.screen.quality = 0;
        cfg.session.command_idle_timeout_ms = 0;
        let session = cfg.to_session_config().unwrap();
        assert_eq!(session.fps, 60);
        assert_eq!(session.quality, 1);
        assert_eq!(session.command_idle_timeout, None);
        assert_eq!(session.write_timeout, Some(Duration::from_secs(5)));
        assert_eq!(session.listen_addr, "0.0.0.0:5555".parse().unwrap());
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.network.listen_address = "not-an-ip".into();
        assert!(cfg.to_session_config().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = AgentConfig::load(Path::new("/nonexistent/rassist-agent.toml"));
        assert_eq!(cfg.network.port, 5555);
    }
}
