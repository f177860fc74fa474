use std::f32::consts::TAU;

use serde::Deserialize;

use crate::ring::{SampleSource, StereoFrame};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
}

impl Waveform {
    pub fn toggled(self) -> Self {
        match self {
            Waveform::Sine => Waveform::Square,
            Waveform::Square => Waveform::Sine,
        }
    }
}

/// Test-tone oscillator producing the same value on both channels.
///
/// The sine phase wraps once per period so it stays small over long runs.
/// Changing the frequency keeps the phase, so the pitch glides instead of
/// clicking.
#[derive(Clone, Debug)]
pub struct ToneGenerator {
    sample_rate: u32,
    tone_hz: u32,
    volume: i16,
    waveform: Waveform,
    phase: f32,
    sample_index: u32,
}

impl ToneGenerator {
    pub fn new(sample_rate: u32, tone_hz: u32, volume: i16, waveform: Waveform) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            tone_hz: tone_hz.max(1),
            volume,
            waveform,
            phase: 0.0,
            sample_index: 0,
        }
    }

    pub fn tone_hz(&self) -> u32 {
        self.tone_hz
    }

    pub fn set_tone_hz(&mut self, tone_hz: u32) {
        self.tone_hz = tone_hz.max(1);
    }

    pub fn volume(&self) -> i16 {
        self.volume
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Samples per cycle at the current frequency; at least 2 so a square
    /// wave always has both halves.
    pub fn wave_period(&self) -> u32 {
        (self.sample_rate / self.tone_hz).max(2)
    }

    pub fn next_value(&mut self) -> i16 {
        let period = self.wave_period();
        let value = match self.waveform {
            Waveform::Sine => (self.phase.sin() * f32::from(self.volume)).round() as i16,
            Waveform::Square => {
                if (self.sample_index / (period / 2)) % 2 == 0 {
                    self.volume
                } else {
                    self.volume.saturating_neg()
                }
            }
        };

        self.phase += TAU / period as f32;
        if self.phase >= TAU {
            self.phase -= TAU;
        }
        self.sample_index = self.sample_index.wrapping_add(1);
        value
    }
}

impl SampleSource for ToneGenerator {
    fn next_frame(&mut self) -> StereoFrame {
        StereoFrame::mono(self.next_value())
    }
}
