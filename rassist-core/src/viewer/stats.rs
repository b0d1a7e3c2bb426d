use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::state::SessionState;

/// Inter-frame gaps kept for the fps average.
const FPS_WINDOW: usize = 60;

// ── ViewerStats ──────────────────────────────────────────────────

/// Snapshot of a viewer session, as returned by
/// [`ViewerSession::stats`](super::ViewerSession::stats).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewerStats {
    pub connected: bool,
    pub state: SessionState,
    /// Commands enqueued with `send` and not yet written.
    pub queued_commands: usize,
    /// Frames received and decoded since the session connected.
    pub frames_received: u64,
    /// Compressed bytes received since the session connected.
    pub bytes_received: u64,
    /// Smoothed frames per second.
    pub fps: f64,
    /// Last frame width.
    pub width: u32,
    /// Last frame height.
    pub height: u32,
}

// ── FrameMeter ───────────────────────────────────────────────────

/// Accumulates per-frame counters and a moving fps average.
#[derive(Debug, Default)]
pub(crate) struct FrameMeter {
    gaps: VecDeque<Duration>,
    last_frame: Option<Instant>,
    pub(crate) frames: u64,
    pub(crate) bytes: u64,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl FrameMeter {
    pub(crate) fn record(&mut self, bytes: usize, width: u32, height: u32) {
        self.record_at(Instant::now(), bytes, width, height);
    }

    fn record_at(&mut self, now: Instant, bytes: usize, width: u32, height: u32) {
        if let Some(last) = self.last_frame {
            self.gaps.push_back(now.duration_since(last));
            if self.gaps.len() > FPS_WINDOW {
                self.gaps.pop_front();
            }
        }
        self.last_frame = Some(now);
        self.frames += 1;
        self.bytes += bytes as u64;
        self.width = width;
        self.height = height;
    }

    pub(crate) fn fps(&self) -> f64 {
        if self.gaps.is_empty() {
            return 0.0;
        }
        let avg = self.gaps.iter().map(Duration::as_secs_f64).sum::<f64>() / self.gaps.len() as f64;
        if avg > 0.0 { 1.0 / avg } else { 0.0 }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_is_the_inverse_of_the_mean_gap() {
        let mut meter = FrameMeter::default();
        let start = Instant::now();
        for i in 0..11u64 {
            meter.record_at(start + Duration::from_millis(100 * i), 1_000, 1920, 1080);
        }
        assert_eq!(meter.frames, 11);
        assert_eq!(meter.bytes, 11_000);
        assert!((meter.fps() - 10.0).abs() < 0.01);
    }

    #[test]
    fn window_is_bounded() {
        let mut meter = FrameMeter::default();
        let start = Instant::now();
        for i in 0..200u64 {
            meter.record_at(start + Duration::from_millis(20 * i), 1, 2, 2);
        }
        assert_eq!(meter.gaps.len(), FPS_WINDOW);
    }

    #[test]
    fn a_single_frame_has_no_rate() {
        let mut meter = FrameMeter::default();
        meter.record(10, 4, 4);
        assert_eq!(meter.fps(), 0.0);
        meter.reset();
        assert_eq!(meter.frames, 0);
    }
}
