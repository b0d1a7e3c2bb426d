//! One agent session: a frame producer and a command consumer sharing a
//! single socket.
//!
//! ```text
//!                ┌──────────── frame producer ────────────┐
//! capture ──► resample ──► encode(quality) ──► FrameCodec ──► write half
//!                                   ▲
//!                             quality / fps (atomics)
//!                                   │
//! read half ──► CommandCodec ──► parse ──► dispatch ──► InputInjector
//!                └─────────── command consumer ───────────┘
//! ```
//!
//! Whichever task ends first records the [`EndReason`] and cancels the
//! session token; the other task observes the cancellation and ends too.

use std::fmt;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AgentSessionConfig, Primitives};
use crate::codec::{CommandCodec, FrameCodec};
use crate::deadline::within;
use crate::error::RassistError;
use crate::protocol::{Command, clamp_fps, clamp_quality};
use crate::screen::InputInjector;
use crate::state::{SessionState, SessionStateCell};

// ── EndReason / SessionSummary ───────────────────────────────────

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The viewer sent `DISCONNECT`.
    PeerDisconnected,
    /// The viewer closed its socket.
    PeerClosed,
    /// The agent was stopped.
    Stopped,
    /// I/O failure, timeout or repeated protocol violations.
    Error(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::PeerDisconnected => write!(f, "viewer disconnected"),
            EndReason::PeerClosed => write!(f, "viewer closed the connection"),
            EndReason::Stopped => write!(f, "agent stopped"),
            EndReason::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// What a finished session did.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub peer: SocketAddr,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub commands_handled: u64,
    pub final_quality: u8,
    pub end_reason: EndReason,
    pub duration: Duration,
}

// ── Shared session state ─────────────────────────────────────────

struct Shared {
    quality: AtomicU8,
    fps: AtomicU8,
    state: SessionStateCell,
    cancel: CancellationToken,
    end_reason: Mutex<Option<EndReason>>,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    commands_handled: AtomicU64,
}

impl Shared {
    /// Record why the session is ending (first caller wins) and stop the
    /// other task.
    fn finish(&self, reason: EndReason) {
        {
            let mut slot = self
                .end_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                debug!("session ending: {reason}");
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    fn take_end_reason(&self) -> EndReason {
        self.end_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(EndReason::Stopped)
    }

    fn frame_interval(&self) -> Duration {
        let fps = clamp_fps(self.fps.load(Ordering::Relaxed));
        Duration::from_millis(1000 / u64::from(fps))
    }
}

// ── AgentSession ─────────────────────────────────────────────────

/// Drives one accepted connection to completion.
pub struct AgentSession {
    config: AgentSessionConfig,
    primitives: Primitives,
    cancel: CancellationToken,
}

impl AgentSession {
    /// `cancel` is usually a child of the agent's shutdown token.
    pub fn new(
        config: AgentSessionConfig,
        primitives: Primitives,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            primitives,
            cancel,
        }
    }

    /// Run both session tasks until one of them ends, then release the
    /// socket.
    pub async fn run(self, stream: TcpStream) -> Result<SessionSummary, RassistError> {
        let started = Instant::now();
        let peer = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {e}");
        }
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            quality: AtomicU8::new(clamp_quality(self.config.quality)),
            fps: AtomicU8::new(clamp_fps(self.config.fps)),
            state: SessionStateCell::new(SessionState::Connecting),
            cancel: self.cancel,
            end_reason: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            commands_handled: AtomicU64::new(0),
        });
        shared.state.activate()?;
        info!("session with {peer} active");

        let output = (self.config.output_width, self.config.output_height);

        let producer = tokio::spawn(produce_frames(
            Arc::clone(&shared),
            self.primitives.clone(),
            output,
            self.config.write_timeout,
            FramedWrite::new(write_half, FrameCodec::default()),
        ));
        let consumer = tokio::spawn(consume_commands(
            Arc::clone(&shared),
            self.primitives,
            output,
            self.config.command_idle_timeout,
            self.config.max_violations,
            FramedRead::new(read_half, CommandCodec::new(self.config.max_violations)),
        ));

        let (produced, consumed) = tokio::join!(producer, consumer);
        if let Err(e) = produced {
            shared.finish(EndReason::Error(format!("frame producer failed: {e}")));
        }
        if let Err(e) = consumed {
            shared.finish(EndReason::Error(format!("command consumer failed: {e}")));
        }

        shared.state.begin_close();
        shared.state.close();

        Ok(SessionSummary {
            peer,
            frames_sent: shared.frames_sent.load(Ordering::Relaxed),
            bytes_sent: shared.bytes_sent.load(Ordering::Relaxed),
            commands_handled: shared.commands_handled.load(Ordering::Relaxed),
            final_quality: shared.quality.load(Ordering::Relaxed),
            end_reason: shared.take_end_reason(),
            duration: started.elapsed(),
        })
    }
}

// ── Frame producer ───────────────────────────────────────────────

async fn produce_frames(
    shared: Arc<Shared>,
    primitives: Primitives,
    output: (u32, u32),
    write_timeout: Option<Duration>,
    mut sink: FramedWrite<OwnedWriteHalf, FrameCodec>,
) {
    let reason = loop {
        let iteration = Instant::now();
        let quality = shared.quality.load(Ordering::Relaxed);

        let job = {
            let primitives = primitives.clone();
            tokio::task::spawn_blocking(move || primitives.capture_frame(output, quality))
        };
        let encoded = tokio::select! {
            _ = shared.cancel.cancelled() => break EndReason::Stopped,
            joined = job => joined,
        };

        match encoded {
            Ok(Ok(payload)) if payload.is_empty() => warn!("encoder produced an empty frame"),
            Ok(Ok(payload)) => {
                let len = payload.len() as u64;
                let sent = tokio::select! {
                    _ = shared.cancel.cancelled() => break EndReason::Stopped,
                    sent = within(write_timeout, sink.send(Bytes::from(payload))) => {
                        sent.and_then(|sent| sent)
                    }
                };
                match sent {
                    Ok(()) => {
                        shared.frames_sent.fetch_add(1, Ordering::Relaxed);
                        shared.bytes_sent.fetch_add(len, Ordering::Relaxed);
                        debug!("sent frame: {len} bytes at quality {quality}");
                    }
                    Err(e) if e.is_fatal() => {
                        break EndReason::Error(format!("frame write failed: {e}"));
                    }
                    Err(e) => warn!("dropping frame: {e}"),
                }
            }
            Ok(Err(e)) if e.is_fatal() => break EndReason::Error(format!("capture failed: {e}")),
            Ok(Err(e)) => warn!("skipping frame: {e}"),
            Err(e) => warn!("capture task failed: {e}"),
        }

        if let Some(rest) = shared.frame_interval().checked_sub(iteration.elapsed()) {
            tokio::select! {
                _ = shared.cancel.cancelled() => break EndReason::Stopped,
                _ = tokio::time::sleep(rest) => {}
            }
        }
    };

    shared.finish(reason);

    // Flushes and shuts down the write half.
    match within(write_timeout, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("closing frame channel: {e}"),
        Err(e) => debug!("closing frame channel: {e}"),
    }
}

// ── Command consumer ─────────────────────────────────────────────

async fn consume_commands(
    shared: Arc<Shared>,
    primitives: Primitives,
    output: (u32, u32),
    idle_timeout: Option<Duration>,
    max_violations: u32,
    mut commands: FramedRead<OwnedReadHalf, CommandCodec>,
) {
    let mut violations = 0u32;

    let reason = loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => break EndReason::Stopped,
            next = within(idle_timeout, commands.next()) => next,
        };

        let text = match next.and_then(|next| next.transpose()) {
            Ok(Some(text)) => text,
            Ok(None) => break EndReason::PeerClosed,
            Err(e) if e.is_fatal() => break EndReason::Error(format!("command channel: {e}")),
            Err(e) => {
                warn!("command read: {e}");
                continue;
            }
        };

        let command = match text.parse::<Command>() {
            Ok(command) => {
                violations = 0;
                command
            }
            Err(RassistError::UnknownCommand(name)) => {
                debug!("ignoring unknown command {name}");
                continue;
            }
            Err(e) => {
                warn!("discarding command {text:?}: {e}");
                violations += 1;
                if violations >= max_violations.max(1) {
                    break EndReason::Error(format!(
                        "{violations} consecutive malformed commands"
                    ));
                }
                continue;
            }
        };

        debug!("command: {command}");
        shared.commands_handled.fetch_add(1, Ordering::Relaxed);

        if dispatch(&shared, primitives.injector(), output, command).is_break() {
            shared.state.begin_close();
            break EndReason::PeerDisconnected;
        }
    };

    let discarded = commands.decoder().discarded();
    if discarded > 0 {
        debug!("discarded {discarded} malformed command messages");
    }
    shared.finish(reason);
}

/// Apply one command. Breaks on `DISCONNECT`.
fn dispatch(
    shared: &Shared,
    injector: &dyn InputInjector,
    output: (u32, u32),
    command: Command,
) -> ControlFlow<()> {
    let injected = match command {
        Command::MouseMove { x, y } => injector.mouse_move(x, y, output),
        Command::MouseClick { button } => injector
            .mouse_press(button)
            .and_then(|()| injector.mouse_release(button)),
        Command::MousePress { button } => injector.mouse_press(button),
        Command::MouseRelease { button } => injector.mouse_release(button),
        Command::MouseWheel { delta } => injector.mouse_wheel(delta),
        Command::KeyPress { key_code } => injector
            .key_press(key_code)
            .and_then(|()| injector.key_release(key_code)),
        Command::KeyRelease { key_code } => injector.key_release(key_code),
        Command::SetQuality { percent } => {
            shared
                .quality
                .store(clamp_quality(percent), Ordering::Relaxed);
            info!("quality set to {percent}%");
            Ok(())
        }
        Command::SetFps { fps } => {
            shared.fps.store(clamp_fps(fps), Ordering::Relaxed);
            info!("frame rate set to {fps} fps");
            Ok(())
        }
        Command::Ping => Ok(()),
        Command::Disconnect => return ControlFlow::Break(()),
    };

    if let Err(e) = injected {
        warn!("input injection failed: {e}");
    }
    ControlFlow::Continue(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::{Bitmap, ImageCodec, ScreenCapturer};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, call: String) -> Result<(), RassistError> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    impl InputInjector for Arc<Recorder> {
        fn mouse_move(&self, x: u32, y: u32, _: (u32, u32)) -> Result<(), RassistError> {
            self.push(format!("move {x},{y}"))
        }
        fn mouse_press(&self, button: u32) -> Result<(), RassistError> {
            self.push(format!("press {button}"))
        }
        fn mouse_release(&self, button: u32) -> Result<(), RassistError> {
            self.push(format!("release {button}"))
        }
        fn mouse_wheel(&self, delta: i32) -> Result<(), RassistError> {
            self.push(format!("wheel {delta}"))
        }
        fn key_press(&self, key_code: u32) -> Result<(), RassistError> {
            self.push(format!("key down {key_code}"))
        }
        fn key_release(&self, key_code: u32) -> Result<(), RassistError> {
            self.push(format!("key up {key_code}"))
        }
    }

    struct NoScreen;

    impl ScreenCapturer for NoScreen {
        fn capture(&mut self) -> Result<Bitmap, RassistError> {
            Err(RassistError::Capture("no screen".into()))
        }
    }

    struct NoCodec;

    impl ImageCodec for NoCodec {
        fn encode(&self, _: &Bitmap, _: u8) -> Result<Vec<u8>, RassistError> {
            Ok(Vec::new())
        }
        fn decode(&self, _: &[u8]) -> Result<Bitmap, RassistError> {
            Err(RassistError::Image("unused".into()))
        }
    }

    fn shared() -> Shared {
        Shared {
            quality: AtomicU8::new(70),
            fps: AtomicU8::new(10),
            state: SessionStateCell::new(SessionState::Active),
            cancel: CancellationToken::new(),
            end_reason: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            commands_handled: AtomicU64::new(0),
        }
    }

    #[test]
    fn click_and_key_press_are_press_then_release() {
        let recorder = Arc::new(Recorder::default());
        let shared = shared();
        for command in [
            Command::MouseMove { x: 100, y: 250 },
            Command::MouseClick { button: 16 },
            Command::KeyPress { key_code: 0x41 },
        ] {
            assert!(dispatch(&shared, &recorder, (1920, 1080), command).is_continue());
        }
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![
                "move 100,250",
                "press 16",
                "release 16",
                "key down 65",
                "key up 65"
            ]
        );
    }

    #[test]
    fn quality_and_fps_update_shared_cells() {
        let recorder = Arc::new(Recorder::default());
        let shared = shared();
        let _ = dispatch(&shared, &recorder, (1, 1), Command::SetQuality { percent: 45 });
        let _ = dispatch(&shared, &recorder, (1, 1), Command::SetFps { fps: 25 });
        assert_eq!(shared.quality.load(Ordering::Relaxed), 45);
        assert_eq!(shared.frame_interval(), Duration::from_millis(40));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn disconnect_breaks() {
        let recorder = Arc::new(Recorder::default());
        assert!(dispatch(&shared(), &recorder, (1, 1), Command::Disconnect).is_break());
    }

    #[test]
    fn first_end_reason_wins() {
        let shared = shared();
        shared.finish(EndReason::PeerDisconnected);
        shared.finish(EndReason::Stopped);
        assert!(shared.cancel.is_cancelled());
        assert_eq!(shared.take_end_reason(), EndReason::PeerDisconnected);
    }

    #[tokio::test]
    async fn session_ends_on_peer_close_without_frames() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(stream);
        });

        let (stream, _) = listener.accept().await.unwrap();
        let session = AgentSession::new(
            AgentSessionConfig::default(),
            Primitives::new(NoScreen, Arc::new(Recorder::default()), NoCodec),
            CancellationToken::new(),
        );
        let summary = tokio::time::timeout(Duration::from_secs(5), session.run(stream))
            .await
            .unwrap()
            .unwrap();
        client.await.unwrap();

        assert_eq!(summary.end_reason, EndReason::PeerClosed);
        assert_eq!(summary.frames_sent, 0);
        assert_eq!(summary.final_quality, 70);
    }
}
