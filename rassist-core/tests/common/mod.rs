//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rassist_core::{
    Agent, AgentSessionConfig, Bitmap, ImageCodec, InputInjector, PixelFormat, Primitives,
    RassistError, ScreenCapturer, SessionListener,
};
use tokio::net::TcpListener;

/// Output size used by the tests; small enough to resample quickly.
pub const OUTPUT: (u32, u32) = (32, 18);

/// Bind on an OS-assigned port.
pub async fn ephemeral_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

pub fn agent_config() -> AgentSessionConfig {
    AgentSessionConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        fps: 50,
        output_width: OUTPUT.0,
        output_height: OUTPUT.1,
        ..AgentSessionConfig::default()
    }
}

// ── Capturer ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct CaptureLog {
    pub captures: AtomicUsize,
    /// Number of upcoming captures that fail.
    pub fail_next: AtomicUsize,
}

pub struct MockCapturer(pub Arc<CaptureLog>);

impl ScreenCapturer for MockCapturer {
    fn capture(&mut self) -> Result<Bitmap, RassistError> {
        self.0.captures.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .0
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RassistError::Capture("simulated capture failure".into()));
        }
        Bitmap::new(64, 36, PixelFormat::Bgra8, vec![0x80; 64 * 36 * 4])
    }
}

// ── Injector ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Move(u32, u32),
    Press(u32),
    Release(u32),
    Wheel(i32),
    KeyDown(u32),
    KeyUp(u32),
}

#[derive(Default)]
pub struct MockInjector {
    pub events: Mutex<Vec<InputEvent>>,
}

impl MockInjector {
    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: InputEvent) -> Result<(), RassistError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub struct SharedInjector(pub Arc<MockInjector>);

impl InputInjector for SharedInjector {
    fn mouse_move(&self, x: u32, y: u32, _frame: (u32, u32)) -> Result<(), RassistError> {
        self.0.push(InputEvent::Move(x, y))
    }
    fn mouse_press(&self, button: u32) -> Result<(), RassistError> {
        self.0.push(InputEvent::Press(button))
    }
    fn mouse_release(&self, button: u32) -> Result<(), RassistError> {
        self.0.push(InputEvent::Release(button))
    }
    fn mouse_wheel(&self, delta: i32) -> Result<(), RassistError> {
        self.0.push(InputEvent::Wheel(delta))
    }
    fn key_press(&self, key_code: u32) -> Result<(), RassistError> {
        self.0.push(InputEvent::KeyDown(key_code))
    }
    fn key_release(&self, key_code: u32) -> Result<(), RassistError> {
        self.0.push(InputEvent::KeyUp(key_code))
    }
}

// ── Image codec ──────────────────────────────────────────────────

/// Encodes a frame as `[quality, width_hi, width_lo, height_hi, height_lo]`
/// and records every quality it was asked for.
#[derive(Default)]
pub struct MockCodec {
    pub qualities: Mutex<Vec<u8>>,
    /// Zero bytes appended to every encoded frame.
    pub padding: AtomicUsize,
}

impl MockCodec {
    pub fn qualities(&self) -> Vec<u8> {
        self.qualities.lock().unwrap().clone()
    }
}

pub struct SharedCodec(pub Arc<MockCodec>);

impl ImageCodec for SharedCodec {
    fn encode(&self, bitmap: &Bitmap, quality: u8) -> Result<Vec<u8>, RassistError> {
        self.0.qualities.lock().unwrap().push(quality);
        let mut out = vec![quality];
        out.extend_from_slice(&(bitmap.width as u16).to_be_bytes());
        out.extend_from_slice(&(bitmap.height as u16).to_be_bytes());
        out.resize(out.len() + self.0.padding.load(Ordering::SeqCst), 0);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bitmap, RassistError> {
        if bytes.len() != 5 {
            return Err(RassistError::Image(format!("unexpected {} byte frame", bytes.len())));
        }
        let width = u16::from_be_bytes([bytes[1], bytes[2]]) as u32;
        let height = u16::from_be_bytes([bytes[3], bytes[4]]) as u32;
        Bitmap::new(
            width,
            height,
            PixelFormat::Rgb8,
            vec![bytes[0]; (width * height * 3) as usize],
        )
    }
}

// ── Agent fixture ────────────────────────────────────────────────

pub struct Fixture {
    pub agent: Arc<Agent>,
    pub port: u16,
    pub capture: Arc<CaptureLog>,
    pub injector: Arc<MockInjector>,
    pub codec: Arc<MockCodec>,
}

/// Start an agent with mock primitives on an ephemeral port.
pub async fn start_agent(config: AgentSessionConfig) -> Fixture {
    let capture = Arc::new(CaptureLog::default());
    let injector = Arc::new(MockInjector::default());
    let codec = Arc::new(MockCodec::default());
    let primitives = Primitives::new(
        MockCapturer(Arc::clone(&capture)),
        SharedInjector(Arc::clone(&injector)),
        SharedCodec(Arc::clone(&codec)),
    );

    let (listener, port) = ephemeral_listener().await;
    let agent = Arc::new(Agent::new(config, primitives));
    tokio::spawn({
        let agent = Arc::clone(&agent);
        async move { agent.serve(listener).await }
    });

    Fixture {
        agent,
        port,
        capture,
        injector,
        codec,
    }
}

// ── Listener ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    Connected,
    Disconnected,
    Frame(u32, u32),
    Error(String),
}

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<ViewerEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ViewerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &ViewerEvent) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == wanted).count()
    }

    pub fn frames(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ViewerEvent::Frame(..)))
            .count()
    }

    pub fn errors(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ViewerEvent::Error(_)))
            .count()
    }
}

impl SessionListener for RecordingListener {
    fn on_connected(&self) {
        self.events.lock().unwrap().push(ViewerEvent::Connected);
    }

    fn on_disconnected(&self) {
        self.events.lock().unwrap().push(ViewerEvent::Disconnected);
    }

    fn on_frame(&self, frame: Bitmap) {
        self.events
            .lock()
            .unwrap()
            .push(ViewerEvent::Frame(frame.width, frame.height));
    }

    fn on_error(&self, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(ViewerEvent::Error(message.to_string()));
    }
}
