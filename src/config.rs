use std::path::{Path, PathBuf};

use anyhow::{Context, ensure};
use handmade_core::{BYTES_PER_FRAME, ScaleMode, Waveform};
use serde::Deserialize;

/// Environment variable naming a config file when none is given on the
/// command line.
pub const CONFIG_ENV: &str = "HANDMADE_CONFIG";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub surface: SurfaceConfig,
    pub audio: AudioConfig,
    pub frame: FrameConfig,
    /// Log to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub scale_mode: ScaleMode,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Handmade".into(),
            width: 1280,
            height: 720,
            scale_mode: ScaleMode::Letterbox,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    /// Reallocate the back buffer to the window size on every resize.
    pub follow_window: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            follow_window: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub tone_hz: u32,
    pub volume: i16,
    pub waveform: Waveform,
    /// Latency is `sample_rate / latency_divisor` frames.
    pub latency_divisor: u32,
    pub ring_seconds: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            tone_hz: 256,
            volume: 3000,
            waveform: Waveform::Sine,
            latency_divisor: 15,
            ring_seconds: 1,
        }
    }
}

impl AudioConfig {
    pub fn latency_frames(&self) -> u32 {
        self.sample_rate / self.latency_divisor.max(1)
    }

    pub fn ring_frames(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.ring_seconds)
    }

    pub fn ring_bytes(&self) -> u64 {
        self.ring_frames() * u64::from(BYTES_PER_FRAME)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Pace to this rate instead of the monitor refresh rate.
    pub target_fps: Option<f64>,
}

impl Config {
    /// Read the file named by the first argument or `HANDMADE_CONFIG`.
    /// With neither, the built-in defaults are used.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::args_os()
            .nth(1)
            .or_else(|| std::env::var_os(CONFIG_ENV))
            .map(PathBuf::from);

        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.window.width > 0 && self.window.height > 0,
            "window size must be non-zero"
        );
        ensure!(
            self.surface.width > 0 && self.surface.height > 0,
            "surface size must be non-zero"
        );

        let audio = &self.audio;
        ensure!(audio.sample_rate > 0, "sample rate must be non-zero");
        ensure!(audio.tone_hz > 0, "tone frequency must be non-zero");
        ensure!(audio.latency_divisor > 0, "latency divisor must be non-zero");
        ensure!(audio.ring_seconds > 0, "ring length must be non-zero");
        ensure!(audio.latency_frames() > 0, "latency rounds down to zero frames");
        ensure!(
            u64::from(audio.latency_frames()) < audio.ring_frames(),
            "ring of {} frames cannot hold {} frames of latency",
            audio.ring_frames(),
            audio.latency_frames()
        );
        ensure!(
            audio.ring_bytes() <= u64::from(u32::MAX),
            "ring of {} bytes is too large",
            audio.ring_bytes()
        );

        if let Some(fps) = self.frame.target_fps {
            ensure!(fps.is_finite() && fps > 0.0, "target fps must be positive");
        }
        Ok(())
    }
}
