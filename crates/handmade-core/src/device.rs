use crate::ring::{AudioDevice, AudioError, Cursors, RingLock, RingStorage, StereoFrame};

/// In-memory audio device whose play cursor only moves when
/// [`ManualDevice::advance`] is called. Stands in for hardware wherever
/// playback has to be deterministic.
pub struct ManualDevice {
    storage: RingStorage,
    playing: bool,
    fail_next_lock: bool,
    locks: u32,
}

impl ManualDevice {
    pub fn new(buffer_bytes: u32) -> Result<Self, AudioError> {
        Ok(Self {
            storage: RingStorage::new(buffer_bytes)?,
            playing: false,
            fail_next_lock: false,
            locks: 0,
        })
    }

    pub fn storage(&self) -> &RingStorage {
        &self.storage
    }

    /// "Play" `frames` frames, returning what the hardware would have heard.
    /// Nothing moves while stopped.
    pub fn advance(&mut self, frames: usize) -> Vec<StereoFrame> {
        if !self.playing {
            return Vec::new();
        }
        let mut out = vec![StereoFrame::SILENCE; frames];
        self.storage.play_into(&mut out);
        out
    }

    /// Make the next [`AudioDevice::lock`] fail once.
    pub fn fail_next_lock(&mut self) {
        self.fail_next_lock = true;
    }

    /// Successful locks taken so far.
    pub fn lock_count(&self) -> u32 {
        self.locks
    }
}

impl AudioDevice for ManualDevice {
    fn cursors(&self) -> Result<Cursors, AudioError> {
        Ok(self.storage.cursors())
    }

    fn lock(&mut self, offset: u32, length: u32) -> Result<RingLock<'_>, AudioError> {
        if std::mem::take(&mut self.fail_next_lock) {
            return Err(AudioError::LockFailed("buffer lost".into()));
        }
        let lock = self.storage.lock(offset, length)?;
        self.locks += 1;
        Ok(lock)
    }

    fn play(&mut self) -> Result<(), AudioError> {
        self.playing = true;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_device_does_not_advance() {
        let mut device = ManualDevice::new(64).unwrap();
        assert!(device.advance(4).is_empty());
        assert_eq!(device.cursors().unwrap().play, 0);
    }

    #[test]
    fn injected_failure_fires_once() {
        let mut device = ManualDevice::new(64).unwrap();
        device.fail_next_lock();
        assert!(matches!(
            device.lock(0, 4),
            Err(AudioError::LockFailed(_))
        ));
        assert!(device.lock(0, 4).is_ok());
        assert_eq!(device.lock_count(), 1);
    }
}
