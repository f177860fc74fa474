//! The game side of the platform split: it owns the animation state and is
//! handed a back buffer to paint and a staging slice to fill with sound.

use crate::gradient::render_gradient;
use crate::ring::{AudioError, SampleSource, StereoFrame};
use crate::surface::PixelSurface;
use crate::tone::ToneGenerator;

/// Gradient scroll per frame at full stick deflection.
pub const STICK_SCROLL_SPEED: f32 = 8.0;

/// Tone at rest when a controller is driving the pitch.
pub const BASE_TONE_HZ: f32 = 512.0;

/// Pitch swing at full vertical deflection.
pub const TONE_SWING_HZ: f32 = 256.0;

/// Normalized controller state for one frame. Sticks are in `[-1, 1]`,
/// positive right and up.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControllerInput {
    pub connected: bool,
    pub stick_x: f32,
    pub stick_y: f32,
}

pub struct GameState {
    pub x_offset: i32,
    pub y_offset: i32,
    pub tone: ToneGenerator,
}

impl GameState {
    pub fn new(tone: ToneGenerator) -> Self {
        Self {
            x_offset: 0,
            y_offset: 0,
            tone,
        }
    }

    /// Scroll the gradient and bend the tone. A disconnected controller means
    /// no input this frame.
    pub fn apply_input(&mut self, input: &ControllerInput) {
        if !input.connected {
            return;
        }
        let stick_x = input.stick_x.clamp(-1.0, 1.0);
        let stick_y = input.stick_y.clamp(-1.0, 1.0);

        self.x_offset = self
            .x_offset
            .wrapping_add((stick_x * STICK_SCROLL_SPEED) as i32);
        self.y_offset = self
            .y_offset
            .wrapping_add((stick_y * STICK_SCROLL_SPEED) as i32);
        self.tone
            .set_tone_hz((BASE_TONE_HZ + TONE_SWING_HZ * stick_y) as u32);
    }

    pub fn render(&self, surface: &mut PixelSurface) {
        render_gradient(surface, self.x_offset, self.y_offset);
    }

    pub fn output_sound(&mut self, out: &mut [StereoFrame]) {
        for frame in out {
            *frame = self.tone.next_frame();
        }
    }
}

/// Staging area the game writes a frame's worth of sound into before it is
/// copied into the locked ring. Allocated once, never grown.
pub struct SoundBuffer {
    frames: Vec<StereoFrame>,
    len: usize,
}

impl SoundBuffer {
    pub fn with_capacity(capacity: usize) -> Result<Self, AudioError> {
        let mut frames = Vec::new();
        frames
            .try_reserve_exact(capacity)
            .map_err(|source| AudioError::Allocation {
                frames: capacity,
                source,
            })?;
        frames.resize(capacity, StereoFrame::SILENCE);
        Ok(Self { frames, len: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Stage `count` frames (clamped to capacity) and hand them out to fill.
    pub fn prepare(&mut self, count: usize) -> &mut [StereoFrame] {
        self.len = count.min(self.frames.len());
        &mut self.frames[..self.len]
    }

    pub fn staged(&self) -> &[StereoFrame] {
        &self.frames[..self.len]
    }

    /// The staged frames as a [`SampleSource`]; silence once exhausted.
    pub fn source(&self) -> StagedFrames<'_> {
        StagedFrames {
            frames: self.staged().iter(),
        }
    }
}

pub struct StagedFrames<'a> {
    frames: std::slice::Iter<'a, StereoFrame>,
}

impl SampleSource for StagedFrames<'_> {
    fn next_frame(&mut self) -> StereoFrame {
        self.frames.next().copied().unwrap_or(StereoFrame::SILENCE)
    }
}
