use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use atomic_float::AtomicF32;

/// Counters shared between the audio callback (writer) and the main loop
/// (reader). Relaxed atomics: a read may be a callback stale, which is fine
/// for a once-a-second summary.
pub struct AudioStats {
    /// Callbacks served since the stream started.
    pub callbacks: AtomicU64,
    /// Frames handed to the device.
    pub frames_played: AtomicU64,
    /// Callbacks that reached into the locked range and played silence there.
    pub contended: AtomicU32,
    /// Wall time of the most recent callback, in milliseconds.
    pub last_callback_ms: AtomicF32,
}

impl AudioStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: AtomicU64::new(0),
            frames_played: AtomicU64::new(0),
            contended: AtomicU32::new(0),
            last_callback_ms: AtomicF32::new(0.0),
        })
    }

    pub fn record_callback(&self, frames: usize, served: bool, elapsed_ms: f32) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        self.frames_played
            .fetch_add(frames as u64, Ordering::Relaxed);
        if !served {
            self.contended.fetch_add(1, Ordering::Relaxed);
        }
        self.last_callback_ms.store(elapsed_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AudioSnapshot {
        AudioSnapshot {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            last_callback_ms: self.last_callback_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AudioSnapshot {
    pub callbacks: u64,
    pub frames_played: u64,
    pub contended: u32,
    pub last_callback_ms: f32,
}
