use std::time::{Duration, Instant};

/// How often [`FrameStats::tick`] hands back a summary.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Frame-time accumulator for the periodic debug summary.
pub struct FrameStats {
    window_start: Instant,
    last_frame: Instant,
    frames: u32,
    worst: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSummary {
    pub frames: u32,
    pub ms_per_frame: f64,
    pub fps: f64,
    pub worst_ms: f64,
}

impl FrameStats {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            last_frame: now,
            frames: 0,
            worst: Duration::ZERO,
        }
    }

    /// Record a frame that finished at `now`. Returns a summary once per
    /// [`REPORT_INTERVAL`] and starts a new window.
    pub fn tick(&mut self, now: Instant) -> Option<FrameSummary> {
        let frame = now.saturating_duration_since(self.last_frame);
        self.last_frame = now;
        self.frames += 1;
        self.worst = self.worst.max(frame);

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < REPORT_INTERVAL {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        let summary = FrameSummary {
            frames: self.frames,
            ms_per_frame: secs * 1000.0 / f64::from(self.frames),
            fps: f64::from(self.frames) / secs,
            worst_ms: self.worst.as_secs_f64() * 1000.0,
        };
        self.window_start = now;
        self.frames = 0;
        self.worst = Duration::ZERO;
        Some(summary)
    }
}
