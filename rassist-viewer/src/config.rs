//! Viewer configuration.

use std::num::ParseIntError;
use std::path::Path;
use std::time::Duration;

use rassist_core::ViewerSessionConfig;
use rassist_core::codec::{DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_VIOLATIONS};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Session timeouts and limits.
    pub session: SessionConfig,
    /// Console behaviour.
    pub viewer: ConsoleConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Agent address, `host:port` or just `host` for the default port.
    pub agent_address: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

/// Session timeouts. A value of 0 disables the timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub write_timeout_ms: u64,
    /// Drop the session when no frame arrives for this long.
    pub frame_timeout_ms: u64,
    /// Send a keep-alive when no command was sent for this long.
    pub heartbeat_interval_ms: u64,
    /// Largest frame accepted, in bytes.
    pub max_frame_len: usize,
    /// Consecutive malformed frames tolerated.
    pub max_violations: u32,
}

/// Console settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Quality requested right after connecting (1-100).
    pub initial_quality: u8,
    /// How often frame statistics are logged, in milliseconds.
    pub stats_interval_ms: u64,
    /// Size of the area `point` coordinates refer to.
    pub view_width: u32,
    pub view_height: u32,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            agent_address: format!("127.0.0.1:{}", rassist_core::DEFAULT_PORT),
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 5_000,
            frame_timeout_ms: 10_000,
            heartbeat_interval_ms: 5_000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            initial_quality: rassist_core::protocol::DEFAULT_QUALITY,
            stats_interval_ms: 2_000,
            view_width: 1280,
            view_height: 720,
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

impl ViewerConfig {
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

    /// Split `agent_address` into host and port.
    pub fn agent_endpoint(&self) -> Result<(String, u16), ParseIntError> {
        let address = self.network.agent_address.trim();
        match address.rsplit_once(':') {
            Some((host, port)) => Ok((host.to_string(), port.parse()?)),
            None => Ok((address.to_string(), rassist_core::DEFAULT_PORT)),
        }
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.viewer.stats_interval_ms.max(100))
    }

    /// Convert into the core's session configuration.
    pub fn to_session_config(&self) -> ViewerSessionConfig {
        ViewerSessionConfig {
            connect_timeout: millis(self.network.connect_timeout_ms),
            write_timeout: millis(self.session.write_timeout_ms),
            frame_timeout: millis(self.session.frame_timeout_ms),
            heartbeat_interval: millis(self.session.heartbeat_interval_ms),
            max_frame_len: self.session.max_frame_len,
            max_violations: self.session.max_violations.max(1),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ── Tests ────────────────────────────────────────────────────────
