//! Platform-independent core of the handmade frame loop: the back buffer,
//! the gradient painter, presentation geometry, the circular audio ring and
//! the tone generator that feeds it.

pub mod device;
pub mod game;
pub mod gradient;
pub mod present;
pub mod ring;
pub mod surface;
pub mod tone;

pub use device::ManualDevice;
pub use game::{ControllerInput, GameState, SoundBuffer};
pub use gradient::render_gradient;
pub use present::{Extent, PresentTarget, Presenter, Rect, ScaleMode, SoftwareTarget};
pub use ring::{
    AudioDevice, AudioError, AudioRing, BYTES_PER_FRAME, CHANNEL_COUNT, Cursors, FillOutcome,
    RingLock, RingStorage, SampleSource, StereoFrame, WriteWindow,
};
pub use surface::{BYTES_PER_PIXEL, PixelFormat, PixelSurface, ResizeOutcome, SurfaceError};
pub use tone::{ToneGenerator, Waveform};
