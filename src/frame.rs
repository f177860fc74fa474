use std::sync::Arc;
use std::time::{Duration, Instant};

use handmade_core::{AudioDevice, Extent, GameState, PixelSurface, PresentTarget, Presenter};

use crate::audio::{CpalDevice, SoundOutput};
use crate::audio_stats::AudioStats;
use crate::frame_stats::FrameStats;
use crate::input::InputState;

/// Everything one pass of the loop touches, owned by the app.
pub struct FrameState<D: AudioDevice = CpalDevice> {
    pub back_buffer: PixelSurface,
    pub game: GameState,
    pub presenter: Presenter,
    pub input: InputState,
    pub sound: Option<SoundOutput<D>>,
    pub audio_stats: Arc<AudioStats>,
    pub stats: FrameStats,
}

impl<D: AudioDevice> FrameState<D> {
    /// Input, game update, render, audio. Runs on every paced loop pass,
    /// whether or not the window is visible.
    pub fn update(&mut self) {
        let input = self.input.poll();
        self.game.apply_input(&input);
        self.game.render(&mut self.back_buffer);

        if let Some(sound) = &mut self.sound {
            sound.update(&mut self.game);
        }

        if let Some(summary) = self.stats.tick(Instant::now()) {
            let audio = self.audio_stats.snapshot();
            tracing::debug!(
                frames = summary.frames,
                ms_per_frame = format_args!("{:.2}", summary.ms_per_frame),
                fps = format_args!("{:.1}", summary.fps),
                worst_ms = format_args!("{:.2}", summary.worst_ms),
                audio_written = self.sound.as_ref().map_or(0, |s| s.frames_written()),
                audio_played = audio.frames_played,
                callbacks = audio.callbacks,
                contended = audio.contended,
                callback_ms = format_args!("{:.3}", audio.last_callback_ms),
                "frame summary"
            );
        }
    }

    /// Show the last rendered back buffer. Called on redraw.
    pub fn present<T: PresentTarget>(&mut self, target: &mut T, window: Extent) {
        self.presenter.present(target, window, &self.back_buffer);
    }

    /// Reallocate the back buffer at a new size. Failure leaves it invalid
    /// until the next successful resize; zero sizes are ignored.
    pub fn resize_back_buffer(&mut self, width: u32, height: u32) {
        if let Err(e) = self.back_buffer.resize(width, height) {
            tracing::warn!("back buffer lost: {e}");
        }
    }
}

/// Decides when the next loop pass is due. A pass that runs late resets the
/// schedule rather than bursting to catch up.
pub struct FramePacer {
    interval: Duration,
    next: Instant,
}

impl FramePacer {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next: now,
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// When the next pass is due.
    pub fn deadline(&self) -> Instant {
        self.next
    }

    /// Whether a pass is due at `now`. Schedules the following one if so.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.interval;
        if self.next < now {
            self.next = now + self.interval;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use handmade_core::{AudioRing, ManualDevice, ScaleMode, ToneGenerator, Waveform};
    use winit::keyboard::KeyCode;

    use super::*;

    const INTERVAL: Duration = Duration::from_millis(16);

    fn frame_state(sound: Option<SoundOutput<ManualDevice>>) -> FrameState<ManualDevice> {
        let now = Instant::now();
        FrameState {
            back_buffer: PixelSurface::new(8, 8).unwrap(),
            game: GameState::new(ToneGenerator::new(48000, 256, 3000, Waveform::Square)),
            presenter: Presenter::new(ScaleMode::Stretch),
            input: InputState::keyboard_only(),
            sound,
            audio_stats: AudioStats::new(),
            stats: FrameStats::new(now),
        }
    }

    #[test]
    fn update_runs_without_a_present() {
        let mut frame = frame_state(None);
        frame.input.handle_key(KeyCode::KeyD, true);
        frame.update();

        assert_ne!(frame.game.x_offset, 0);
        let red = u32::from(frame.game.x_offset as u8) << 16;
        assert_eq!(frame.back_buffer.pixel(0, 0), Some(red));
    }

    #[test]
    fn update_keeps_audio_queued_while_hidden() {
        let device = ManualDevice::new(192000).unwrap();
        let ring = AudioRing::new(48000, 192000, 3200).unwrap();
        let mut frame = frame_state(Some(SoundOutput::new(device, ring).unwrap()));

        for _ in 0..5 {
            frame.update();
            if let Some(sound) = &mut frame.sound {
                sound.device_mut().advance(800);
            }
        }

        let sound = frame.sound.as_ref().unwrap();
        assert!(sound.device().is_playing());
        // The initial latency plus every frame played since.
        assert_eq!(sound.frames_written(), 3200 + 4 * 800);
    }

    #[test]
    fn pacer_is_due_immediately() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(INTERVAL, start);
        assert!(pacer.poll(start));
        assert_eq!(pacer.deadline(), start + INTERVAL);
    }

    #[test]
    fn pacer_waits_for_the_deadline() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(INTERVAL, start);
        pacer.poll(start);

        assert!(!pacer.poll(start + INTERVAL / 2));
        assert!(pacer.poll(start + INTERVAL));
        assert_eq!(pacer.deadline(), start + 2 * INTERVAL);
    }

    #[test]
    fn late_pass_resets_the_schedule() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(INTERVAL, start);
        pacer.poll(start);

        let stalled = start + 10 * INTERVAL;
        assert!(pacer.poll(stalled));
        assert_eq!(pacer.deadline(), stalled + INTERVAL);
        assert!(!pacer.poll(stalled + INTERVAL / 2));
    }
}
