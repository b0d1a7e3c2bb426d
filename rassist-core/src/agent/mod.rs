//! Agent side: the accept loop and per-connection sessions.
//!
//! ```text
//! Agent::start ──► bind ──► accept ──► AgentSession::run ──┐
//!                              ▲        (frame producer +   │
//!                              │         command consumer)  │
//!                              └────── session closed ◄─────┘
//! ```
//!
//! Only one session is served at a time. Further connection attempts wait
//! in the kernel accept backlog until the current session has closed.

pub mod session;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::DEFAULT_MAX_VIOLATIONS;
use crate::error::RassistError;
use crate::protocol::{
    DEFAULT_FPS, DEFAULT_OUTPUT_HEIGHT, DEFAULT_OUTPUT_WIDTH, DEFAULT_PORT, DEFAULT_QUALITY,
};
use crate::screen::{
    Bitmap, DxgiCapturer, ImageCodec, InputInjector, JpegCodec, ScreenCapturer,
    SendInputInjector,
};

pub use session::{AgentSession, EndReason, SessionSummary};

// ── AgentSessionConfig ───────────────────────────────────────────

/// Configuration for [`Agent`] and the sessions it runs.
#[derive(Debug, Clone)]
pub struct AgentSessionConfig {
    /// Address the listener binds.
    pub listen_addr: SocketAddr,
    /// Initial encoder quality (1..=100).
    pub quality: u8,
    /// Initial capture cadence in frames per second (1..=60).
    pub fps: u8,
    /// Resolution every frame is resampled to before encoding.
    pub output_width: u32,
    pub output_height: u32,
    /// Deadline for writing one frame to the socket. `None` waits forever.
    pub write_timeout: Option<Duration>,
    /// Session ends when no command (including keep-alive pings) arrives
    /// within this window. `None` waits forever.
    pub command_idle_timeout: Option<Duration>,
    /// Consecutive malformed commands tolerated before teardown.
    pub max_violations: u32,
}

impl Default for AgentSessionConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            quality: DEFAULT_QUALITY,
            fps: DEFAULT_FPS,
            output_width: DEFAULT_OUTPUT_WIDTH,
            output_height: DEFAULT_OUTPUT_HEIGHT,
            write_timeout: Some(Duration::from_secs(5)),
            command_idle_timeout: Some(Duration::from_secs(15)),
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }
}

// ── Primitives ───────────────────────────────────────────────────

/// The capture, injection and image primitives a session drives.
#[derive(Clone)]
pub struct Primitives {
    capturer: Arc<Mutex<dyn ScreenCapturer>>,
    injector: Arc<dyn InputInjector>,
    codec: Arc<dyn ImageCodec>,
}

impl Primitives {
    pub fn new(
        capturer: impl ScreenCapturer,
        injector: impl InputInjector,
        codec: impl ImageCodec,
    ) -> Self {
        Self {
            capturer: Arc::new(Mutex::new(capturer)),
            injector: Arc::new(injector),
            codec: Arc::new(codec),
        }
    }

    /// DXGI capture, `SendInput` injection and JPEG encoding.
    ///
    /// Fails on platforms without these primitives; callers treat that as
    /// startup-fatal.
    pub fn native(monitor_index: u32, acquire_timeout: Duration) -> Result<Self, RassistError> {
        let capturer = DxgiCapturer::new(monitor_index)?.with_acquire_timeout(acquire_timeout);
        let injector = SendInputInjector::new()?;
        Ok(Self::new(capturer, injector, JpegCodec::new()))
    }

    pub fn injector(&self) -> &dyn InputInjector {
        self.injector.as_ref()
    }

    /// Capture, resample to `output` and encode at `quality`.
    ///
    /// Blocking; run it on the blocking pool.
    pub fn capture_frame(&self, output: (u32, u32), quality: u8) -> Result<Vec<u8>, RassistError> {
        let raw: Bitmap = {
            let mut capturer = self
                .capturer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            capturer.capture()?
        };
        let scaled = raw.resample(output.0, output.1);
        self.codec.encode(&scaled, quality)
    }
}

// ── Agent ────────────────────────────────────────────────────────

/// The agent listener.
///
/// # Lifetime
///
/// [`start`](Self::start) binds and serves until [`stop`](Self::stop) is
/// called. Stopping also cancels the active session, if any.
pub struct Agent {
    config: AgentSessionConfig,
    primitives: Primitives,
    shutdown: CancellationToken,
    /// Single permit: held for the lifetime of the active session.
    session_slot: Arc<Semaphore>,
    sessions_served: AtomicU64,
}

impl Agent {
    pub fn new(config: AgentSessionConfig, primitives: Primitives) -> Self {
        Self {
            config,
            primitives,
            shutdown: CancellationToken::new(),
            session_slot: Arc::new(Semaphore::new(1)),
            sessions_served: AtomicU64::new(0),
        }
    }

    /// Bind the configured address and serve until stopped.
    ///
    /// A bind failure is returned to the caller (startup-fatal).
    pub async fn start(&self) -> Result<(), RassistError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("agent listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RassistError> {
        loop {
            let accept = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = listener.accept() => result,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            info!("viewer connected from {peer}");
            match self.handle(stream).await {
                Ok(summary) => info!(
                    "session with {peer} ended ({}): {} frames, {} bytes, {} commands",
                    summary.end_reason,
                    summary.frames_sent,
                    summary.bytes_sent,
                    summary.commands_handled,
                ),
                Err(e) => warn!("session with {peer} failed: {e}"),
            }
            if !self.shutdown.is_cancelled() {
                info!("waiting for the next viewer");
            }
        }

        info!("agent stopped");
        Ok(())
    }

    /// Drive one connection to completion.
    ///
    /// Waits for the session slot first, so concurrent callers are served
    /// one after another.
    pub async fn handle(&self, stream: TcpStream) -> Result<SessionSummary, RassistError> {
        let _permit = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(RassistError::NotConnected),
            permit = Arc::clone(&self.session_slot).acquire_owned() => {
                permit.map_err(|_| RassistError::Other("session slot closed".into()))?
            }
        };

        let session = AgentSession::new(
            self.config.clone(),
            self.primitives.clone(),
            self.shutdown.child_token(),
        );
        let summary = session.run(stream).await?;
        self.sessions_served.fetch_add(1, Ordering::Relaxed);
        Ok(summary)
    }

    /// Request shutdown: unblocks the accept loop and closes the active
    /// session's socket.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Whether a session currently holds the single session slot.
    pub fn is_session_active(&self) -> bool {
        self.session_slot.available_permits() == 0
    }

    /// Sessions run to completion since construction.
    pub fn sessions_served(&self) -> u64 {
        self.sessions_served.load(Ordering::Relaxed)
    }
}

// ── Tests ────────────────────────────────────────────────────────
