//! Audio output: a cpal stream that plays the shared ring from its play
//! cursor, and the per-frame pump that keeps the ring ahead of it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use handmade_core::{
    AudioDevice, AudioError, AudioRing, BYTES_PER_FRAME, Cursors, FillOutcome, GameState,
    RingLock, RingStorage, SoundBuffer, StereoFrame,
};

use crate::audio_stats::AudioStats;
use crate::config::AudioConfig;

/// Frames the callback converts per pass; longer device buffers take
/// several passes.
const SCRATCH_FRAMES: usize = 4096;

struct Shared {
    storage: RingStorage,
    playing: AtomicBool,
    stats: Arc<AudioStats>,
}

/// The default output device, looping over a [`RingStorage`].
///
/// The stream may start running as soon as it is built; until
/// [`AudioDevice::play`] is called the callback outputs silence and the
/// cursors stay at zero.
pub struct CpalDevice {
    shared: Arc<Shared>,
    stream: Stream,
    sample_rate: u32,
}

impl CpalDevice {
    pub fn open(config: &AudioConfig, stats: Arc<AudioStats>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no output device".into()))?;

        let supported = pick_config(&device, config.sample_rate)?;
        let sample_format = supported.sample_format();
        let stream_config: StreamConfig = supported.config();
        let sample_rate = stream_config.sample_rate.0;
        if sample_rate != config.sample_rate {
            tracing::warn!(
                requested = config.sample_rate,
                actual = sample_rate,
                "output device does not support the requested rate"
            );
        }

        let ring_bytes = u64::from(sample_rate)
            * u64::from(config.ring_seconds)
            * u64::from(BYTES_PER_FRAME);
        let ring_bytes = u32::try_from(ring_bytes).map_err(|_| {
            AudioError::InvalidFormat(format!("ring of {ring_bytes} bytes is too large"))
        })?;

        let shared = Arc::new(Shared {
            storage: RingStorage::new(ring_bytes)?,
            playing: AtomicBool::new(false),
            stats,
        });

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, shared.clone()),
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, shared.clone()),
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, shared.clone()),
            other => {
                return Err(AudioError::InvalidFormat(format!(
                    "unsupported sample format {other}"
                )));
            }
        }
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate,
            channels = stream_config.channels,
            format = %sample_format,
            ring_bytes,
            "audio output opened"
        );

        Ok(Self {
            shared,
            stream,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_bytes(&self) -> u32 {
        self.shared.storage.buffer_bytes()
    }
}

impl AudioDevice for CpalDevice {
    fn cursors(&self) -> Result<Cursors, AudioError> {
        Ok(self.shared.storage.cursors())
    }

    fn lock(&mut self, offset: u32, length: u32) -> Result<RingLock<'_>, AudioError> {
        self.shared.storage.lock(offset, length)
    }

    fn play(&mut self) -> Result<(), AudioError> {
        self.stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))?;
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }
}

/// Stereo at the requested rate if the device offers it, otherwise whatever
/// the device prefers.
fn pick_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let unavailable = |e: &dyn std::fmt::Display| AudioError::DeviceUnavailable(e.to_string());

    let exact = device
        .supported_output_configs()
        .map_err(|e| unavailable(&e))?
        .find(|range| {
            range.channels() == 2
                && range.min_sample_rate().0 <= sample_rate
                && range.max_sample_rate().0 >= sample_rate
        });
    if let Some(range) = exact {
        return Ok(range.with_sample_rate(cpal::SampleRate(sample_rate)));
    }

    device.default_output_config().map_err(|e| unavailable(&e))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<Shared>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = usize::from(config.channels);
    let mut scratch = [StereoFrame::SILENCE; SCRATCH_FRAMES];

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if !shared.playing.load(Ordering::Acquire) {
                data.fill(T::EQUILIBRIUM);
                return;
            }

            let started = Instant::now();
            let (frames, served) = play_chunked(&shared.storage, &mut scratch, data, channels);
            shared.stats.record_callback(
                frames,
                served,
                started.elapsed().as_secs_f32() * 1000.0,
            );
        },
        |err| {
            tracing::error!("audio stream error: {err}");
        },
        None,
    )
}

/// Play the ring into a device buffer `scratch.len()` frames at a time.
/// Returns the frames played and whether none of them hit a locked range.
fn play_chunked<T>(
    storage: &RingStorage,
    scratch: &mut [StereoFrame],
    data: &mut [T],
    channels: usize,
) -> (usize, bool)
where
    T: Sample + FromSample<i16>,
{
    if channels == 0 || scratch.is_empty() {
        return (0, true);
    }
    let mut frames = 0;
    let mut served = true;
    for chunk in data.chunks_mut(scratch.len() * channels) {
        let played = &mut scratch[..chunk.len() / channels];
        served &= storage.play_into(played);
        write_interleaved(chunk, channels, played);
        frames += played.len();
    }
    (frames, served)
}

/// Spread stereo frames over a device buffer with `channels` interleaved
/// channels. Mono devices get the average; extra channels are silent.
fn write_interleaved<T>(data: &mut [T], channels: usize, frames: &[StereoFrame])
where
    T: Sample + FromSample<i16>,
{
    if channels == 0 {
        return;
    }
    for (out, frame) in data.chunks_mut(channels).zip(frames) {
        match out {
            [mono] => {
                let mixed = (i32::from(frame.left) + i32::from(frame.right)) / 2;
                *mono = T::from_sample(mixed as i16);
            }
            [left, right, rest @ ..] => {
                *left = T::from_sample(frame.left);
                *right = T::from_sample(frame.right);
                rest.fill(T::EQUILIBRIUM);
            }
            [] => {}
        }
    }
}

/// Per-frame sound pump: asks the game for exactly the frames the write
/// window needs, copies them into the ring, and starts playback after the
/// first successful fill.
pub struct SoundOutput<D: AudioDevice = CpalDevice> {
    device: D,
    ring: AudioRing,
    staging: SoundBuffer,
    frames_written: u64,
}

impl SoundOutput<CpalDevice> {
    /// Open the default output device and size the ring from the rate it
    /// actually runs at.
    pub fn open(config: &AudioConfig, stats: Arc<AudioStats>) -> Result<Self, AudioError> {
        let device = CpalDevice::open(config, stats)?;
        let latency_frames = device.sample_rate() / config.latency_divisor.max(1);
        let ring = AudioRing::new(device.sample_rate(), device.buffer_bytes(), latency_frames)?;
        Self::new(device, ring)
    }
}

impl<D: AudioDevice> SoundOutput<D> {
    /// Silences the whole ring before anything can be heard.
    pub fn new(mut device: D, ring: AudioRing) -> Result<Self, AudioError> {
        let staging =
            SoundBuffer::with_capacity((ring.buffer_bytes() / ring.bytes_per_frame()) as usize)?;
        ring.clear(&mut device)?;
        Ok(Self {
            device,
            ring,
            staging,
            frames_written: 0,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    #[cfg(test)]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[cfg(test)]
    pub fn ring(&self) -> &AudioRing {
        &self.ring
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn update(&mut self, game: &mut GameState) -> FillOutcome {
        let staging = &mut self.staging;
        let outcome = self.ring.service_with(&mut self.device, move |frames| {
            // Take the borrow itself so the staged frames can outlive the call.
            let buffer = staging;
            game.output_sound(buffer.prepare(frames));
            buffer.source()
        });

        let FillOutcome::Written { frames } = outcome else {
            return outcome;
        };
        self.frames_written += frames as u64;

        if !self.device.is_playing()
            && let Err(e) = self.device.play()
        {
            tracing::warn!("could not start playback, retrying next frame: {e}");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use handmade_core::{ManualDevice, SampleSource, ToneGenerator, Waveform};

    use super::*;

    fn tone() -> ToneGenerator {
        ToneGenerator::new(48000, 256, 3000, Waveform::Square)
    }

    fn output() -> SoundOutput<ManualDevice> {
        let device = ManualDevice::new(192000).unwrap();
        let ring = AudioRing::new(48000, 192000, 3200).unwrap();
        SoundOutput::new(device, ring).unwrap()
    }

    #[test]
    fn stereo_to_f32() {
        let mut data = [0.0f32; 4];
        let frames = [
            StereoFrame {
                left: i16::MAX,
                right: 0,
            },
            StereoFrame {
                left: i16::MIN,
                right: 0,
            },
        ];
        write_interleaved(&mut data, 2, &frames);
        assert!((data[0] - 1.0).abs() < 1e-4);
        assert_eq!(data[1], 0.0);
        assert_eq!(data[2], -1.0);
    }

    #[test]
    fn stereo_to_u16_is_offset_binary() {
        let mut data = [0u16; 2];
        write_interleaved(&mut data, 2, &[StereoFrame::SILENCE]);
        assert_eq!(data, [32768, 32768]);
    }

    #[test]
    fn mono_device_gets_average() {
        let mut data = [0i16; 2];
        let frames = [
            StereoFrame {
                left: 100,
                right: 300,
            },
            StereoFrame::mono(-7),
        ];
        write_interleaved(&mut data, 1, &frames);
        assert_eq!(data, [200, -7]);
    }

    #[test]
    fn surround_extra_channels_are_silent() {
        let mut data = [1i16; 6];
        write_interleaved(&mut data, 6, &[StereoFrame { left: 5, right: 6 }]);
        assert_eq!(data, [5, 6, 0, 0, 0, 0]);
    }

    #[test]
    fn long_device_buffers_play_in_passes() {
        let storage = RingStorage::new(64).unwrap();
        {
            let mut lock = storage.lock(0, 64).unwrap();
            for (i, frame) in lock.regions_mut().0.iter_mut().enumerate() {
                *frame = StereoFrame::mono(i as i16);
            }
        }

        let mut scratch = [StereoFrame::SILENCE; 3];
        let mut data = [0i16; 14];
        let (frames, served) = play_chunked(&storage, &mut scratch, &mut data, 2);

        assert_eq!((frames, served), (7, true));
        assert_eq!(data, [0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6]);
        assert_eq!(storage.cursors().play, 28);
    }

    #[test]
    fn no_channels_plays_nothing() {
        let storage = RingStorage::new(64).unwrap();
        let mut scratch = [StereoFrame::SILENCE; 3];
        let mut data: [f32; 0] = [];
        assert_eq!(play_chunked(&storage, &mut scratch, &mut data, 0), (0, true));
        assert_eq!(storage.cursors().play, 0);
    }

    #[test]
    fn caught_up_pass_asks_the_game_for_nothing() {
        let mut output = output();
        let mut game = GameState::new(tone());
        output.update(&mut game);
        let phase = game.tone.phase();

        assert!(matches!(output.update(&mut game), FillOutcome::NothingToWrite));
        assert_eq!(game.tone.phase(), phase);
        assert_eq!(output.frames_written(), 3200);
    }

    #[test]
    fn playback_starts_after_first_fill() {
        let mut output = output();
        assert!(!output.device().is_playing());

        let mut game = GameState::new(tone());
        let outcome = output.update(&mut game);
        assert!(matches!(outcome, FillOutcome::Written { frames: 3200 }));
        assert!(output.device().is_playing());
        assert_eq!(output.frames_written(), 3200);
    }

    #[test]
    fn lock_failure_is_absorbed() {
        let mut output = output();
        let mut game = GameState::new(tone());
        output.device_mut().fail_next_lock();

        assert!(matches!(output.update(&mut game), FillOutcome::Skipped(_)));
        assert!(!output.device().is_playing());
        assert_eq!(output.ring().next_sample_index(), 0);

        assert!(matches!(
            output.update(&mut game),
            FillOutcome::Written { frames: 3200 }
        ));
    }

    #[test]
    fn game_sound_is_what_plays() {
        let mut output = output();
        let mut game = GameState::new(tone());
        let mut reference = tone();

        for _ in 0..10 {
            output.update(&mut game);
            let heard = output.device_mut().advance(800);
            for frame in heard {
                assert_eq!(frame, reference.next_frame());
            }
        }
    }
}
