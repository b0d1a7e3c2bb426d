//! Viewer side: connects to an agent, receives frames and sends commands.
//!
//! ```text
//!                     ┌──── frame receiver ────┐
//! read half ──► FrameCodec ──► decode ──► SessionListener::on_frame
//!
//! send() ──► mpsc queue ──► command sender ──┐
//!                                            ├──► CommandCodec ──► write half
//! send_immediate() ──────────────────────────┘   (async mutex)
//! ```
//!
//! Both tasks end on the first error, on EOF or on [`ViewerSession::disconnect`].
//! Teardown runs once per connection: the caller that flips the connected
//! flag closes the socket and notifies the listener; everyone else returns
//! without side effects.

pub mod mapping;
pub mod stats;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{CommandCodec, DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_VIOLATIONS, FrameCodec};
use crate::deadline::within;
use crate::error::RassistError;
use crate::protocol::Command;
use crate::screen::{Bitmap, ImageCodec};
use crate::state::{SessionState, SessionStateCell};

pub use mapping::scale_to_frame;
pub use stats::ViewerStats;

use stats::FrameMeter;

// ── SessionListener ──────────────────────────────────────────────

/// Receives session events.
///
/// Called directly from whichever task observed the event, so
/// implementations must be quick and must not block. UI front ends
/// typically forward into their own event loop.
pub trait SessionListener: Send + Sync + 'static {
    fn on_connected(&self) {}
    fn on_disconnected(&self) {}
    fn on_frame(&self, frame: Bitmap);
    fn on_error(&self, _message: &str) {}
}

// ── ViewerSessionConfig ──────────────────────────────────────────

/// Timeouts and limits for a [`ViewerSession`]. `None` disables a deadline.
#[derive(Debug, Clone)]
pub struct ViewerSessionConfig {
    pub connect_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Longest gap between two frames before the session is dropped.
    pub frame_timeout: Option<Duration>,
    /// Idle time on the command queue after which a `PING` is written.
    pub heartbeat_interval: Option<Duration>,
    pub max_frame_len: usize,
    pub max_violations: u32,
}

impl Default for ViewerSessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
            frame_timeout: Some(Duration::from_secs(10)),
            heartbeat_interval: Some(Duration::from_secs(5)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }
}

// ── Internals ────────────────────────────────────────────────────

type CommandSink = FramedWrite<OwnedWriteHalf, CommandCodec>;

/// Handles of the live connection.
struct Link {
    generation: u64,
    writer: Arc<AsyncMutex<Option<CommandSink>>>,
    queue: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    state: Arc<SessionStateCell>,
}

/// How a connection ended.
enum Ending {
    /// `disconnect()` was called; the agent is told with `DISCONNECT`.
    Local,
    /// The agent closed the socket.
    PeerClosed,
    Failed(String),
}

struct Inner {
    config: ViewerSessionConfig,
    listener: Arc<dyn SessionListener>,
    codec: Arc<dyn ImageCodec>,
    connected: AtomicBool,
    generation: AtomicU64,
    link: Mutex<Option<Link>>,
    queued: AtomicUsize,
    meter: Mutex<FrameMeter>,
}

impl Inner {
    fn link(&self) -> std::sync::MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn meter(&self) -> std::sync::MutexGuard<'_, FrameMeter> {
        self.meter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dequeued(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

// ── ViewerSession ────────────────────────────────────────────────

/// A viewer's connection to one agent.
///
/// Cheap to clone; clones share the same connection. A session can be
/// connected again after it has been torn down.
#[derive(Clone)]
pub struct ViewerSession {
    inner: Arc<Inner>,
}

impl ViewerSession {
    pub fn new(
        config: ViewerSessionConfig,
        listener: Arc<dyn SessionListener>,
        codec: Arc<dyn ImageCodec>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                listener,
                codec,
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                link: Mutex::new(None),
                queued: AtomicUsize::new(0),
                meter: Mutex::new(FrameMeter::default()),
            }),
        }
    }

    /// Start connecting in the background and return immediately.
    ///
    /// A failed attempt is reported through
    /// [`SessionListener::on_error`] as well as the join handle.
    pub fn connect(&self, host: impl Into<String>, port: u16) -> JoinHandle<Result<(), RassistError>> {
        let session = self.clone();
        let host = host.into();
        tokio::spawn(async move {
            let result = session.connect_async(&host, port).await;
            if let Err(e) = &result {
                session
                    .inner
                    .listener
                    .on_error(&format!("cannot connect to {host}:{port}: {e}"));
            }
            result
        })
    }

    /// Connect, start both session tasks and notify `on_connected`.
    pub async fn connect_async(&self, host: &str, port: u16) -> Result<(), RassistError> {
        if self.is_connected() {
            return Err(RassistError::Other("already connected".into()));
        }

        let addr = format!("{host}:{port}");
        info!("connecting to {addr}");
        let stream = within(self.inner.config.connect_timeout, TcpStream::connect(&addr)).await??;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (queue, commands) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let state = Arc::new(SessionStateCell::new(SessionState::Connecting));
        let writer = Arc::new(AsyncMutex::new(Some(FramedWrite::new(
            write_half,
            CommandCodec::new(self.inner.config.max_violations),
        ))));

        {
            let mut link = self.inner.link();
            if link.is_some() {
                return Err(RassistError::Other("already connected".into()));
            }
            state.activate()?;
            *link = Some(Link {
                generation,
                writer: Arc::clone(&writer),
                queue,
                cancel: cancel.clone(),
                state,
            });
            self.inner.queued.store(0, Ordering::Release);
            self.inner.meter().reset();
            self.inner.connected.store(true, Ordering::Release);
        }

        info!("connected to {addr}");
        self.inner.listener.on_connected();

        let frames = FramedRead::new(
            read_half,
            FrameCodec::new(self.inner.config.max_frame_len, self.inner.config.max_violations),
        );
        tokio::spawn(receive_frames(self.clone(), generation, frames, cancel.clone()));
        tokio::spawn(send_commands(self.clone(), generation, writer, commands, cancel));
        Ok(())
    }

    /// Queue a command for the sender task. Never blocks.
    pub fn send(&self, command: Command) -> Result<(), RassistError> {
        let link = self.inner.link();
        let link = match link.as_ref() {
            Some(link) if self.is_connected() => link,
            _ => return Err(RassistError::NotConnected),
        };
        self.inner.queued.fetch_add(1, Ordering::AcqRel);
        if link.queue.send(command).is_err() {
            self.inner.dequeued();
            return Err(RassistError::ChannelClosed);
        }
        Ok(())
    }

    /// Write a command now, ahead of anything still queued.
    ///
    /// A fatal write failure tears the session down. Returns
    /// `NotConnected` if the session is torn down while writing.
    pub async fn send_immediate(&self, command: Command) -> Result<(), RassistError> {
        let (generation, writer, cancel) = {
            let link = self.inner.link();
            match link.as_ref() {
                Some(link) if self.is_connected() => (
                    link.generation,
                    Arc::clone(&link.writer),
                    link.cancel.clone(),
                ),
                _ => return Err(RassistError::NotConnected),
            }
        };

        let result =
            write_command(&writer, self.inner.config.write_timeout, &cancel, command).await;
        if let Some(e) = result.as_ref().err().filter(|e| e.is_fatal()) {
            self.teardown(Some(generation), Ending::Failed(format!("command write failed: {e}")))
                .await;
        }
        result
    }

    /// Close the connection.
    ///
    /// Idempotent: returns `true` only for the call that actually tore the
    /// session down.
    pub async fn disconnect(&self) -> bool {
        self.teardown(None, Ending::Local).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ViewerStats {
        let state = self
            .inner
            .link()
            .as_ref()
            .map_or(SessionState::Closed, |link| link.state.get());
        let meter = self.inner.meter();
        ViewerStats {
            connected: self.is_connected(),
            state,
            queued_commands: self.inner.queued.load(Ordering::Acquire),
            frames_received: meter.frames,
            bytes_received: meter.bytes,
            fps: meter.fps(),
            width: meter.width,
            height: meter.height,
        }
    }

    /// Tear down the connection `generation` (or whichever is live for
    /// `None`).
    async fn teardown(&self, generation: Option<u64>, ending: Ending) -> bool {
        let link = {
            let mut slot = self.inner.link();
            match slot.as_ref() {
                Some(link) if generation.is_none_or(|g| g == link.generation) => {}
                _ => return false,
            }
            if self
                .inner
                .connected
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            slot.take()
        };
        let Some(link) = link else {
            return false;
        };

        link.state.begin_close();
        link.cancel.cancel();

        let sink = link.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let limit = self.inner.config.write_timeout;
            if matches!(ending, Ending::Local) {
                match within(limit, sink.send(Command::Disconnect)).await {
                    Ok(Ok(())) => debug!("sent DISCONNECT"),
                    Ok(Err(e)) => debug!("could not send DISCONNECT: {e}"),
                    Err(e) => debug!("could not send DISCONNECT: {e}"),
                }
            }
            // Flushes and shuts down the write half; the read half goes
            // with the receiver task.
            if let Err(e) = within(limit, sink.close()).await.and_then(|closed| closed) {
                debug!("closing command channel: {e}");
            }
        }
        self.inner.queued.store(0, Ordering::Release);

        match &ending {
            Ending::Local => info!("disconnected"),
            Ending::PeerClosed => info!("agent closed the connection"),
            Ending::Failed(message) => {
                warn!("session failed: {message}");
                self.inner.listener.on_error(message);
            }
        }
        self.inner.listener.on_disconnected();
        link.state.close();
        true
    }
}

/// Write one command under the writer lock. Gives up with `NotConnected`
/// as soon as `cancel` fires, so teardown never waits on a stalled peer.
async fn write_command<S>(
    writer: &AsyncMutex<Option<S>>,
    limit: Option<Duration>,
    cancel: &CancellationToken,
    command: Command,
) -> Result<(), RassistError>
where
    S: Sink<Command, Error = RassistError> + Unpin,
{
    let mut guard = tokio::select! {
        _ = cancel.cancelled() => return Err(RassistError::NotConnected),
        guard = writer.lock() => guard,
    };
    let sink = guard.as_mut().ok_or(RassistError::NotConnected)?;
    tokio::select! {
        _ = cancel.cancelled() => Err(RassistError::NotConnected),
        written = within(limit, sink.send(command)) => written?,
    }
}

// ── Frame receiver ───────────────────────────────────────────────

async fn receive_frames(
    session: ViewerSession,
    generation: u64,
    mut frames: FramedRead<OwnedReadHalf, FrameCodec>,
    cancel: CancellationToken,
) {
    let inner = &session.inner;
    let ending = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = within(inner.config.frame_timeout, frames.next()) => next,
        };

        let payload = match next.and_then(|next| next.transpose()) {
            Ok(Some(payload)) => payload,
            Ok(None) => break Ending::PeerClosed,
            Err(e @ RassistError::Timeout(_)) => {
                break Ending::Failed(format!("no frame from agent: {e}"));
            }
            Err(e) if e.is_fatal() => break Ending::Failed(format!("frame read failed: {e}")),
            Err(e) => {
                warn!("frame read: {e}");
                continue;
            }
        };

        let len = payload.len();
        let codec = Arc::clone(&inner.codec);
        let decoded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            decoded = tokio::task::spawn_blocking(move || codec.decode(&payload)) => decoded,
        };

        match decoded {
            Ok(Ok(_)) if cancel.is_cancelled() => return,
            Ok(Ok(bitmap)) => {
                inner.meter().record(len, bitmap.width, bitmap.height);
                debug!("frame: {len} bytes, {}x{}", bitmap.width, bitmap.height);
                inner.listener.on_frame(bitmap);
            }
            Ok(Err(e)) => break Ending::Failed(format!("frame decode failed: {e}")),
            Err(e) => break Ending::Failed(format!("decode task failed: {e}")),
        }
    };

    let discarded = frames.decoder().discarded();
    if discarded > 0 {
        debug!("discarded {discarded} malformed frames");
    }
    session.teardown(Some(generation), ending).await;
}

// ── Command sender ───────────────────────────────────────────────

async fn send_commands(
    session: ViewerSession,
    generation: u64,
    writer: Arc<AsyncMutex<Option<CommandSink>>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let inner = &session.inner;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = within(inner.config.heartbeat_interval, commands.recv()) => next,
        };

        let command = match next {
            Ok(Some(command)) => {
                inner.dequeued();
                command
            }
            Ok(None) => break,
            Err(_) => Command::Ping,
        };

        match write_command(&writer, inner.config.write_timeout, &cancel, command).await {
            Ok(()) => {}
            Err(_) if cancel.is_cancelled() => break,
            Err(e) if e.is_fatal() => {
                session
                    .teardown(Some(generation), Ending::Failed(format!("command write failed: {e}")))
                    .await;
                break;
            }
            Err(e) => warn!("dropping command: {e}"),
        }
    }

    commands.close();
    let mut dropped = 0usize;
    while commands.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("dropped {dropped} queued commands");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::JpegCodec;
    use tokio::io::DuplexStream;

    struct Quiet;

    impl SessionListener for Quiet {
        fn on_frame(&self, _frame: Bitmap) {}
    }

    fn session() -> ViewerSession {
        ViewerSession::new(
            ViewerSessionConfig::default(),
            Arc::new(Quiet),
            Arc::new(JpegCodec::new()),
        )
    }

    #[tokio::test]
    async fn commands_need_a_connection() {
        let viewer = session();
        assert!(matches!(
            viewer.send(Command::Ping),
            Err(RassistError::NotConnected)
        ));
        assert!(matches!(
            viewer.send_immediate(Command::Ping).await,
            Err(RassistError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_no_op() {
        let viewer = session();
        assert!(!viewer.disconnect().await);
        let stats = viewer.stats();
        assert!(!stats.connected);
        assert_eq!(stats.state, SessionState::Closed);
        assert_eq!(stats.frames_received, 0);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let viewer = session();
        let result = viewer.connect("127.0.0.1", port).await.unwrap();
        assert!(result.is_err());
        assert!(!viewer.is_connected());
    }

    type PipeSink = FramedWrite<DuplexStream, CommandCodec>;

    /// Writer over a pipe whose far end never reads; a few bytes fill it.
    fn stalled_writer() -> (AsyncMutex<Option<PipeSink>>, DuplexStream) {
        let (near, far) = tokio::io::duplex(4);
        (AsyncMutex::new(Some(FramedWrite::new(near, CommandCodec::default()))), far)
    }

    #[tokio::test]
    async fn stalled_write_gives_up_on_cancel() {
        let (writer, _far) = stalled_writer();
        let cancel = CancellationToken::new();

        let write = write_command(&writer, None, &cancel, Command::MouseMove { x: 100, y: 250 });
        tokio::pin!(write);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut write)
                .await
                .is_err()
        );

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), write).await.unwrap();
        assert!(matches!(result, Err(RassistError::NotConnected)));
        assert!(writer.try_lock().is_ok());
    }

    #[tokio::test]
    async fn stalled_write_times_out() {
        let (writer, _far) = stalled_writer();
        let cancel = CancellationToken::new();

        let result = write_command(
            &writer,
            Some(Duration::from_millis(50)),
            &cancel,
            Command::MouseMove { x: 100, y: 250 },
        )
        .await;
        assert!(matches!(result, Err(RassistError::Timeout(_))));
    }
}
