use std::collections::TryReserveError;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Interleaved left/right channels.
pub const CHANNEL_COUNT: u32 = 2;

/// Bytes in one interleaved stereo frame of 16-bit samples.
pub const BYTES_PER_FRAME: u32 = CHANNEL_COUNT * size_of::<i16>() as u32;

/// One stereo frame of signed 16-bit PCM.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoFrame {
    pub left: i16,
    pub right: i16,
}

impl StereoFrame {
    pub const SILENCE: Self = Self { left: 0, right: 0 };

    /// Same value on both channels.
    pub fn mono(value: i16) -> Self {
        Self {
            left: value,
            right: value,
        }
    }
}

/// Anything that can produce an endless stream of stereo frames.
pub trait SampleSource {
    fn next_frame(&mut self) -> StereoFrame;
}

impl<S: SampleSource + ?Sized> SampleSource for &mut S {
    fn next_frame(&mut self) -> StereoFrame {
        (**self).next_frame()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("cannot allocate a {frames}-frame sound buffer")]
    Allocation {
        frames: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("invalid ring format: {0}")]
    InvalidFormat(String),
    #[error("lock of {length} bytes at offset {offset} does not fit a {buffer_bytes}-byte ring")]
    InvalidLock {
        offset: u32,
        length: u32,
        buffer_bytes: u32,
    },
    #[error("ring lock failed: {0}")]
    LockFailed(String),
    #[error("audio stream error: {0}")]
    Stream(String),
}

/// Hardware-reported byte offsets into the ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursors {
    /// Offset currently being read for output.
    pub play: u32,
    /// End of the region already committed to the hardware.
    pub write: u32,
}

/// Byte range of the ring that is safe to (re)write this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteWindow {
    pub offset: u32,
    pub length: u32,
}

impl WriteWindow {
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn frame_count(&self) -> usize {
        (self.length / BYTES_PER_FRAME) as usize
    }
}

/// Capability set of a cursor-driven circular audio buffer.
///
/// The producer only writes inside a [`RingLock`]; dropping the lock is the
/// unlock, so early returns and panics release it too.
pub trait AudioDevice {
    fn cursors(&self) -> Result<Cursors, AudioError>;

    fn lock(&mut self, offset: u32, length: u32) -> Result<RingLock<'_>, AudioError>;

    /// Start looping playback. Idempotent.
    fn play(&mut self) -> Result<(), AudioError>;

    fn is_playing(&self) -> bool;
}

/// Shared circular buffer of stereo frames plus the cursors the consumer
/// publishes. The producer writes through [`RingStorage::lock`]; the
/// consumer (an audio callback or a test) reads through
/// [`RingStorage::play_into`].
///
/// Each frame is its own atomic slot, so the consumer never waits on the
/// producer. A lock hides only its own range: the consumer plays silence
/// for frames inside it and the queued samples everywhere else.
pub struct RingStorage {
    frames: Box<[AtomicU32]>,
    /// Producer-side copy of the locked frames, reserved at full ring size.
    staging: Mutex<Vec<StereoFrame>>,
    /// Locked range as `start << 32 | count`, in frames. Zero when unlocked.
    locked: AtomicU64,
    buffer_bytes: u32,
    play_cursor: AtomicU32,
    write_cursor: AtomicU32,
}

impl RingStorage {
    pub fn new(buffer_bytes: u32) -> Result<Self, AudioError> {
        if buffer_bytes == 0 || buffer_bytes % BYTES_PER_FRAME != 0 {
            return Err(AudioError::InvalidFormat(format!(
                "ring of {buffer_bytes} bytes is not a whole number of {BYTES_PER_FRAME}-byte frames"
            )));
        }
        let count = (buffer_bytes / BYTES_PER_FRAME) as usize;
        let allocation = |source| AudioError::Allocation {
            frames: count,
            source,
        };

        let mut frames = Vec::new();
        frames.try_reserve_exact(count).map_err(allocation)?;
        frames.extend((0..count).map(|_| AtomicU32::new(pack_frame(StereoFrame::SILENCE))));

        let mut staging = Vec::new();
        staging.try_reserve_exact(count).map_err(allocation)?;

        Ok(Self {
            frames: frames.into_boxed_slice(),
            staging: Mutex::new(staging),
            locked: AtomicU64::new(0),
            buffer_bytes,
            play_cursor: AtomicU32::new(0),
            write_cursor: AtomicU32::new(0),
        })
    }

    pub fn buffer_bytes(&self) -> u32 {
        self.buffer_bytes
    }

    pub fn frame_capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn cursors(&self) -> Cursors {
        Cursors {
            play: self.play_cursor.load(Ordering::Acquire),
            write: self.write_cursor.load(Ordering::Acquire),
        }
    }

    /// Lock `[offset, offset + length)` for writing, wrapping past the end.
    /// Only one lock can be held at a time.
    pub fn lock(&self, offset: u32, length: u32) -> Result<RingLock<'_>, AudioError> {
        let invalid = || AudioError::InvalidLock {
            offset,
            length,
            buffer_bytes: self.buffer_bytes,
        };
        if length == 0
            || offset >= self.buffer_bytes
            || length > self.buffer_bytes
            || offset % BYTES_PER_FRAME != 0
            || length % BYTES_PER_FRAME != 0
        {
            return Err(invalid());
        }

        let mut staging = match self.staging.try_lock() {
            Ok(staging) => staging,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(AudioError::LockFailed("ring is already locked".into()));
            }
        };

        let total = self.frames.len();
        let start = (offset / BYTES_PER_FRAME) as usize;
        let count = (length / BYTES_PER_FRAME) as usize;
        self.locked.store(pack_range(start, count), Ordering::SeqCst);

        // Reserved at full size in `new`, so this never reallocates.
        staging.clear();
        staging.extend((0..count).map(|i| self.load((start + i) % total)));

        Ok(RingLock {
            storage: self,
            staging,
            start,
            first_len: count.min(total - start),
        })
    }

    /// Consumer side: copy `out.len()` frames starting at the play cursor and
    /// advance it. Frames inside a held lock cannot be read yet, so they play
    /// as silence and the call returns `false`; everything else is served.
    pub fn play_into(&self, out: &mut [StereoFrame]) -> bool {
        let total = self.frames.len();
        let start = (self.play_cursor.load(Ordering::Acquire) / BYTES_PER_FRAME) as usize;
        let locked = unpack_range(self.locked.load(Ordering::SeqCst));

        let mut served = true;
        for (i, frame) in out.iter_mut().enumerate() {
            let index = (start + i) % total;
            if locked.is_some_and(|(from, count)| (index + total - from) % total < count) {
                *frame = StereoFrame::SILENCE;
                served = false;
            } else {
                *frame = self.load(index);
            }
        }

        let play = (start + out.len()) % total;
        let write = (play + out.len()) % total;
        self.play_cursor
            .store(play as u32 * BYTES_PER_FRAME, Ordering::Release);
        self.write_cursor
            .store(write as u32 * BYTES_PER_FRAME, Ordering::Release);
        served
    }

    /// True while a producer holds a [`RingLock`].
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst) != 0
    }

    fn load(&self, index: usize) -> StereoFrame {
        bytemuck::cast(self.frames[index].load(Ordering::Relaxed))
    }

    fn commit(&self, start: usize, frames: &[StereoFrame]) {
        let total = self.frames.len();
        for (i, frame) in frames.iter().enumerate() {
            self.frames[(start + i) % total].store(pack_frame(*frame), Ordering::Relaxed);
        }
        // Publishes the stores above to the next `play_into`.
        self.locked.store(0, Ordering::SeqCst);
    }
}

fn pack_frame(frame: StereoFrame) -> u32 {
    bytemuck::cast(frame)
}

fn pack_range(start: usize, count: usize) -> u64 {
    ((start as u64) << 32) | count as u64
}

fn unpack_range(packed: u64) -> Option<(usize, usize)> {
    let count = (packed & u64::from(u32::MAX)) as usize;
    (count != 0).then_some(((packed >> 32) as usize, count))
}

/// Exclusive write access to up to two physical regions of the ring.
/// Writes land in the ring when the lock is dropped.
pub struct RingLock<'a> {
    storage: &'a RingStorage,
    staging: MutexGuard<'a, Vec<StereoFrame>>,
    start: usize,
    first_len: usize,
}

impl RingLock<'_> {
    /// The locked frames: up to the end of the ring, then from its start.
    /// The second region is empty when the lock does not wrap.
    pub fn regions_mut(&mut self) -> (&mut [StereoFrame], &mut [StereoFrame]) {
        self.staging.split_at_mut(self.first_len)
    }

    /// Raw interleaved little-endian PCM view of [`RingLock::regions_mut`].
    pub fn as_bytes_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let (first, second) = self.regions_mut();
        (
            bytemuck::cast_slice_mut(first),
            bytemuck::cast_slice_mut(second),
        )
    }

    pub fn frame_count(&self) -> usize {
        self.staging.len()
    }
}

impl Drop for RingLock<'_> {
    fn drop(&mut self) {
        self.storage.commit(self.start, &self.staging);
    }
}

/// What one frame's audio pass accomplished.
#[derive(Debug)]
pub enum FillOutcome {
    Written { frames: usize },
    /// The producer is already `latency` ahead of the play cursor.
    NothingToWrite,
    /// A transient failure; the next frame's window catches up.
    Skipped(AudioError),
}

/// Producer-side bookkeeping for a cursor-driven ring.
///
/// `next_sample_index` counts every stereo frame ever written; the physical
/// write offset is that count modulo the ring size.
#[derive(Debug)]
pub struct AudioRing {
    sample_rate: u32,
    buffer_bytes: u32,
    latency_frames: u32,
    next_sample_index: u32,
}

impl AudioRing {
    pub fn new(sample_rate: u32, buffer_bytes: u32, latency_frames: u32) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidFormat("sample rate is zero".into()));
        }
        if buffer_bytes == 0 || buffer_bytes % BYTES_PER_FRAME != 0 {
            return Err(AudioError::InvalidFormat(format!(
                "ring of {buffer_bytes} bytes is not a whole number of {BYTES_PER_FRAME}-byte frames"
            )));
        }
        if latency_frames == 0 || u64::from(latency_frames) * u64::from(BYTES_PER_FRAME) >= u64::from(buffer_bytes)
        {
            return Err(AudioError::InvalidFormat(format!(
                "latency of {latency_frames} frames does not fit a {buffer_bytes}-byte ring"
            )));
        }
        Ok(Self {
            sample_rate,
            buffer_bytes,
            latency_frames,
            next_sample_index: 0,
        })
    }

    /// Continue counting from `index` instead of zero.
    pub fn with_sample_index(mut self, index: u32) -> Self {
        self.next_sample_index = index;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_bytes(&self) -> u32 {
        self.buffer_bytes
    }

    pub fn latency_frames(&self) -> u32 {
        self.latency_frames
    }

    pub fn bytes_per_frame(&self) -> u32 {
        BYTES_PER_FRAME
    }

    pub fn next_sample_index(&self) -> u32 {
        self.next_sample_index
    }

    /// Byte offset immediately after the last queued frame.
    pub fn write_offset(&self) -> u32 {
        let logical = u64::from(self.next_sample_index) * u64::from(BYTES_PER_FRAME);
        (logical % u64::from(self.buffer_bytes)) as u32
    }

    /// The region from the last queued frame up to `latency_frames` past the
    /// play cursor.
    pub fn compute_write_window(&self, cursors: Cursors, latency_frames: u32) -> WriteWindow {
        let buffer = u64::from(self.buffer_bytes);
        let offset = self.write_offset();
        let target = ((u64::from(cursors.play)
            + u64::from(latency_frames) * u64::from(BYTES_PER_FRAME))
            % buffer) as u32;

        let length = if offset <= target {
            target - offset
        } else {
            (self.buffer_bytes - offset) + target
        };
        WriteWindow { offset, length }
    }

    /// Lock `window`, write one frame from `source` per locked frame (first
    /// region, then the wrapped one), and unlock. Returns frames written.
    pub fn fill<D, S>(
        &mut self,
        device: &mut D,
        window: WriteWindow,
        mut source: S,
    ) -> Result<usize, AudioError>
    where
        D: AudioDevice + ?Sized,
        S: SampleSource,
    {
        if window.is_empty() {
            return Ok(0);
        }

        let mut lock = device.lock(window.offset, window.length)?;
        let (first, second) = lock.regions_mut();
        let mut written = 0;
        for frame in first.iter_mut().chain(second.iter_mut()) {
            *frame = source.next_frame();
            self.next_sample_index = self.next_sample_index.wrapping_add(1);
            written += 1;
        }
        Ok(written)
    }

    /// Overwrite the whole ring with silence. Does not advance the counter.
    pub fn clear<D: AudioDevice + ?Sized>(&self, device: &mut D) -> Result<(), AudioError> {
        let mut lock = device.lock(0, self.buffer_bytes)?;
        let (first, second) = lock.regions_mut();
        first.fill(StereoFrame::SILENCE);
        second.fill(StereoFrame::SILENCE);
        Ok(())
    }

    /// One frame's audio pass: read the cursors, compute the window with the
    /// configured latency, and fill it. Transient failures are absorbed.
    pub fn service<D, S>(&mut self, device: &mut D, source: S) -> FillOutcome
    where
        D: AudioDevice + ?Sized,
        S: SampleSource,
    {
        self.service_with(device, |_| source)
    }

    /// Like [`AudioRing::service`], but the source is built only once the
    /// window is known, from the number of frames it needs. Nothing is
    /// produced when there is nothing to write.
    pub fn service_with<D, S, F>(&mut self, device: &mut D, produce: F) -> FillOutcome
    where
        D: AudioDevice + ?Sized,
        S: SampleSource,
        F: FnOnce(usize) -> S,
    {
        let cursors = match device.cursors() {
            Ok(cursors) => cursors,
            Err(e) => {
                tracing::debug!("skipping audio this frame: {e}");
                return FillOutcome::Skipped(e);
            }
        };

        let window = self.compute_write_window(cursors, self.latency_frames);
        if window.is_empty() {
            return FillOutcome::NothingToWrite;
        }

        match self.fill(device, window, produce(window.frame_count())) {
            Ok(frames) => FillOutcome::Written { frames },
            Err(e) => {
                tracing::debug!("skipping audio this frame: {e}");
                FillOutcome::Skipped(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(i16);

    impl SampleSource for Counter {
        fn next_frame(&mut self) -> StereoFrame {
            self.0 += 1;
            StereoFrame::mono(self.0)
        }
    }

    #[test]
    fn stereo_frame_is_pod() {
        let frame = StereoFrame {
            left: 0x0102,
            right: -1,
        };
        let bytes = bytemuck::bytes_of(&frame);
        assert_eq!(bytes.len(), BYTES_PER_FRAME as usize);
        assert_eq!(bytes, &[0x02, 0x01, 0xff, 0xff]);
    }

    #[test]
    fn rejects_ragged_ring() {
        assert!(matches!(
            RingStorage::new(10),
            Err(AudioError::InvalidFormat(_))
        ));
        assert!(AudioRing::new(48000, 10, 1).is_err());
        assert!(AudioRing::new(48000, 400, 100).is_err());
        assert!(AudioRing::new(0, 400, 10).is_err());
    }

    #[test]
    fn window_without_wrap() {
        let ring = AudioRing::new(48000, 48000 * 4, 3200)
            .unwrap()
            .with_sample_index(250);
        let window = ring.compute_write_window(
            Cursors {
                play: 1200,
                write: 1200,
            },
            3200,
        );
        assert_eq!(
            window,
            WriteWindow {
                offset: 1000,
                length: 13000
            }
        );
    }

    #[test]
    fn window_wraps_past_end() {
        let ring = AudioRing::new(48000, 192000, 3200)
            .unwrap()
            .with_sample_index(47500);
        // play + 12800 lands on 500 after wrapping
        let window = ring.compute_write_window(
            Cursors {
                play: 179700,
                write: 180000,
            },
            3200,
        );
        assert_eq!(
            window,
            WriteWindow {
                offset: 190000,
                length: 2500
            }
        );
    }

    #[test]
    fn caught_up_window_is_empty() {
        let ring = AudioRing::new(48000, 4000, 100)
            .unwrap()
            .with_sample_index(100);
        let window = ring.compute_write_window(Cursors::default(), 100);
        assert!(window.is_empty());
    }

    #[test]
    fn lock_splits_at_end_of_ring() {
        let storage = RingStorage::new(40).unwrap();
        let mut lock = storage.lock(32, 16).unwrap();
        let (first, second) = lock.regions_mut();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        let (a, b) = lock.as_bytes_mut();
        assert_eq!((a.len(), b.len()), (8, 8));
    }

    #[test]
    fn lock_rejects_bad_ranges() {
        let storage = RingStorage::new(40).unwrap();
        assert!(storage.lock(0, 0).is_err());
        assert!(storage.lock(40, 4).is_err());
        assert!(storage.lock(0, 44).is_err());
        assert!(storage.lock(2, 4).is_err());
        assert!(storage.lock(4, 6).is_err());
    }

    #[test]
    fn dropping_lock_unlocks() {
        let storage = RingStorage::new(40).unwrap();
        {
            let _lock = storage.lock(0, 8).unwrap();
            assert!(storage.is_locked());
        }
        assert!(!storage.is_locked());
    }

    #[test]
    fn consumer_plays_silence_over_the_locked_range() {
        let storage = RingStorage::new(40).unwrap();
        {
            let mut lock = storage.lock(0, 40).unwrap();
            lock.regions_mut().0.fill(StereoFrame::mono(7));
        }
        let lock = storage.lock(0, 8).unwrap();
        let mut out = [StereoFrame::mono(1); 2];
        assert!(!storage.play_into(&mut out));
        assert_eq!(out, [StereoFrame::SILENCE; 2]);
        drop(lock);

        assert!(storage.play_into(&mut out));
        assert_eq!(out, [StereoFrame::mono(7); 2]);
        assert_eq!(
            storage.cursors(),
            Cursors {
                play: 16,
                write: 24
            }
        );
    }

    #[test]
    fn disjoint_lock_does_not_silence_playback() {
        let storage = RingStorage::new(64).unwrap();
        {
            let mut lock = storage.lock(0, 64).unwrap();
            lock.regions_mut().0.fill(StereoFrame::mono(7));
        }

        let _lock = storage.lock(32, 16).unwrap();
        let mut out = [StereoFrame::SILENCE; 2];
        assert!(storage.play_into(&mut out));
        assert_eq!(out, [StereoFrame::mono(7); 2]);
        assert_eq!(storage.cursors().play, 8);
    }

    #[test]
    fn only_locked_frames_play_as_silence() {
        let storage = RingStorage::new(64).unwrap();
        {
            let mut lock = storage.lock(0, 64).unwrap();
            lock.regions_mut().0.fill(StereoFrame::mono(7));
        }

        // Frames 14, 15, 0 and 1 are locked.
        let _lock = storage.lock(56, 16).unwrap();
        let mut out = [StereoFrame::mono(1); 4];
        assert!(!storage.play_into(&mut out));
        assert_eq!(
            out,
            [
                StereoFrame::SILENCE,
                StereoFrame::SILENCE,
                StereoFrame::mono(7),
                StereoFrame::mono(7)
            ]
        );
    }

    #[test]
    fn writes_land_when_the_lock_drops() {
        let storage = RingStorage::new(16).unwrap();
        let mut lock = storage.lock(0, 8).unwrap();
        lock.regions_mut().0.fill(StereoFrame::mono(3));
        drop(lock);

        let mut out = [StereoFrame::SILENCE; 3];
        assert!(storage.play_into(&mut out));
        assert_eq!(
            out,
            [
                StereoFrame::mono(3),
                StereoFrame::mono(3),
                StereoFrame::SILENCE
            ]
        );
    }

    #[test]
    fn second_lock_fails_while_first_is_held() {
        let storage = RingStorage::new(40).unwrap();
        let _first = storage.lock(0, 8).unwrap();
        assert!(matches!(
            storage.lock(16, 8),
            Err(AudioError::LockFailed(_))
        ));
    }

    #[test]
    fn play_cursor_wraps() {
        let storage = RingStorage::new(16).unwrap();
        let mut out = [StereoFrame::SILENCE; 3];
        storage.play_into(&mut out);
        storage.play_into(&mut out);
        assert_eq!(storage.cursors().play, 8);
    }

    #[test]
    fn service_with_builds_the_source_for_the_window() {
        let mut device = crate::device::ManualDevice::new(4000).unwrap();
        let mut ring = AudioRing::new(48000, 4000, 100).unwrap();

        let mut asked = None;
        let outcome = ring.service_with(&mut device, |frames| {
            asked = Some(frames);
            Counter(0)
        });
        assert!(matches!(outcome, FillOutcome::Written { frames: 100 }));
        assert_eq!(asked, Some(100));

        let outcome = ring.service_with(&mut device, |_| -> Counter {
            panic!("nothing to write, nothing to produce")
        });
        assert!(matches!(outcome, FillOutcome::NothingToWrite));
    }

    #[test]
    fn sources_can_be_borrowed() {
        fn pull<S: SampleSource>(mut source: S) -> StereoFrame {
            source.next_frame()
        }

        let mut counter = Counter(0);
        assert_eq!(pull(&mut counter), StereoFrame::mono(1));
        assert_eq!(counter.next_frame(), StereoFrame::mono(2));
    }
}
