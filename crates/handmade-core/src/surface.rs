use std::collections::TryReserveError;
use std::slice::ChunksExactMut;

/// Every surface stores 32-bit pixels.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Pixel encoding of a [`PixelSurface`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed `0x00RRGGBB` stored little-endian, so memory order is blue,
    /// green, red, unused. Rows are top-down.
    #[default]
    Bgrx8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        BYTES_PER_PIXEL
    }

    pub fn is_top_down(self) -> bool {
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("cannot allocate {bytes} bytes for a {width}x{height} surface")]
    Allocation {
        width: u32,
        height: u32,
        bytes: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("a {width}x{height} surface does not fit in addressable memory")]
    Overflow { width: u32, height: u32 },
}

/// What a successful [`PixelSurface::resize`] actually did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    Resized,
    /// Zero-area request (e.g. a minimized window); the surface is untouched.
    IgnoredZeroArea,
}

/// CPU-side back buffer.
///
/// Owns exactly one pixel allocation of `stride * height` bytes. A surface
/// whose last allocation failed is left empty with all dimensions zero, and
/// every consumer checks [`PixelSurface::is_valid`] before touching pixels.
#[derive(Debug, Default)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    stride: usize,
    pixels: Vec<u8>,
}

impl PixelSurface {
    /// Allocate a surface of the given size.
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        let mut surface = Self::default();
        surface.resize(width, height)?;
        Ok(surface)
    }

    /// Reallocate the pixel memory for a new size. Old pixels are released
    /// before the new allocation is requested; contents start zeroed.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<ResizeOutcome, SurfaceError> {
        self.resize_with(width, height, allocate_zeroed)
    }

    /// [`PixelSurface::resize`] with a caller-supplied allocator, which must
    /// return exactly the requested number of bytes.
    pub fn resize_with<F>(
        &mut self,
        width: u32,
        height: u32,
        allocate: F,
    ) -> Result<ResizeOutcome, SurfaceError>
    where
        F: FnOnce(usize) -> Result<Vec<u8>, TryReserveError>,
    {
        if width == 0 || height == 0 {
            tracing::debug!(width, height, "ignoring zero-area resize");
            return Ok(ResizeOutcome::IgnoredZeroArea);
        }

        self.release();

        let Some((stride, bytes)) = layout(width, height) else {
            return Err(SurfaceError::Overflow { width, height });
        };

        let pixels = allocate(bytes).map_err(|source| SurfaceError::Allocation {
            width,
            height,
            bytes,
            source,
        })?;
        debug_assert_eq!(pixels.len(), bytes);

        self.width = width;
        self.height = height;
        self.stride = stride;
        self.pixels = pixels;

        tracing::debug!(width, height, stride, "back buffer resized");
        Ok(ResizeOutcome::Resized)
    }

    /// Drop the pixel memory and zero every dimension.
    pub fn release(&mut self) {
        self.pixels = Vec::new();
        self.width = 0;
        self.height = 0;
        self.stride = 0;
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.pixels.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes from the start of one row to the start of the next.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::Bgrx8
    }

    /// Raw pixel bytes; empty when the surface is invalid.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable rows of `stride` bytes, top row first. `None` when invalid.
    pub fn rows_mut(&mut self) -> Option<ChunksExactMut<'_, u8>> {
        if !self.is_valid() {
            return None;
        }
        Some(self.pixels.chunks_exact_mut(self.stride))
    }

    /// Packed `0x00RRGGBB` value at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if !self.is_valid() || x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride + x as usize * BYTES_PER_PIXEL as usize;
        let bytes = self.pixels.get(offset..offset + BYTES_PER_PIXEL as usize)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// `(stride, total bytes)` for a surface, or `None` on overflow.
fn layout(width: u32, height: u32) -> Option<(usize, usize)> {
    let stride = (width as usize).checked_mul(BYTES_PER_PIXEL as usize)?;
    let bytes = stride.checked_mul(height as usize)?;
    Some((stride, bytes))
}

fn allocate_zeroed(bytes: usize) -> Result<Vec<u8>, TryReserveError> {
    let mut pixels = Vec::new();
    pixels.try_reserve_exact(bytes)?;
    pixels.resize(bytes, 0);
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_allocator(_: usize) -> Result<Vec<u8>, TryReserveError> {
        Err(Vec::<u8>::new().try_reserve(usize::MAX).unwrap_err())
    }

    #[test]
    fn resize_sets_dimensions_and_stride() {
        let mut surface = PixelSurface::default();
        assert_eq!(surface.resize(800, 600).unwrap(), ResizeOutcome::Resized);
        assert_eq!(surface.width(), 800);
        assert_eq!(surface.height(), 600);
        assert_eq!(surface.stride(), 3200);
        assert_eq!(surface.pixels().len(), 3200 * 600);
        assert!(surface.is_valid());
    }

    #[test]
    fn new_surface_starts_black() {
        let surface = PixelSurface::new(3, 2).unwrap();
        assert!(surface.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_area_resize_keeps_previous_buffer() {
        let mut surface = PixelSurface::new(16, 8).unwrap();
        assert_eq!(
            surface.resize(0, 8).unwrap(),
            ResizeOutcome::IgnoredZeroArea
        );
        assert_eq!(
            surface.resize(16, 0).unwrap(),
            ResizeOutcome::IgnoredZeroArea
        );
        assert_eq!((surface.width(), surface.height()), (16, 8));
        assert_eq!(surface.pixels().len(), 16 * 4 * 8);
    }

    #[test]
    fn failed_allocation_leaves_surface_invalid() {
        let mut surface = PixelSurface::new(4, 4).unwrap();
        let err = surface.resize_with(64, 64, failing_allocator).unwrap_err();
        assert!(matches!(
            err,
            SurfaceError::Allocation {
                width: 64,
                height: 64,
                bytes: 16384,
                ..
            }
        ));
        assert!(!surface.is_valid());
        assert_eq!(surface.width(), 0);
        assert_eq!(surface.height(), 0);
        assert_eq!(surface.stride(), 0);
        assert!(surface.pixels().is_empty());
        assert!(surface.rows_mut().is_none());
    }

    #[test]
    fn recovers_after_failed_allocation() {
        let mut surface = PixelSurface::default();
        assert!(surface.resize_with(10, 10, failing_allocator).is_err());
        surface.resize(10, 10).unwrap();
        assert!(surface.is_valid());
    }

    #[test]
    fn repeated_resizes_hold_one_exact_buffer() {
        let mut surface = PixelSurface::default();
        for (w, h) in [(1280, 720), (3, 7), (800, 600), (800, 600)] {
            surface.resize(w, h).unwrap();
            assert_eq!(surface.pixels().len(), surface.stride() * h as usize);
        }
    }

    #[test]
    fn pixel_reads_little_endian() {
        let mut surface = PixelSurface::new(2, 2).unwrap();
        let row = surface.rows_mut().unwrap().nth(1).unwrap();
        row[4..8].copy_from_slice(&[0x03, 0x02, 0x01, 0x00]);
        assert_eq!(surface.pixel(1, 1), Some(0x0001_0203));
        assert_eq!(surface.pixel(2, 1), None);
    }

    #[test]
    fn format_is_top_down_bgrx() {
        let surface = PixelSurface::default();
        assert_eq!(surface.format(), PixelFormat::Bgrx8);
        assert!(surface.format().is_top_down());
        assert_eq!(surface.format().bytes_per_pixel(), 4);
    }
}
