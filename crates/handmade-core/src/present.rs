use std::fmt;

use serde::Deserialize;

use crate::surface::PixelSurface;

/// Width x height in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\u{00d7}{}", self.width, self.height)
    }
}

/// Destination rectangle inside the window, in window pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// How the back buffer is mapped onto the window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    /// Fill the whole window, distorting when aspect ratios differ.
    Stretch,
    /// Largest centered rectangle with the surface's aspect ratio.
    #[default]
    Letterbox,
}

impl ScaleMode {
    pub fn toggled(self) -> Self {
        match self {
            ScaleMode::Stretch => ScaleMode::Letterbox,
            ScaleMode::Letterbox => ScaleMode::Stretch,
        }
    }

    /// Where a `source`-sized image lands in a `window`-sized target.
    /// `None` when either is empty.
    pub fn destination(self, source: Extent, window: Extent) -> Option<Rect> {
        if source.is_empty() || window.is_empty() {
            return None;
        }
        Some(match self {
            ScaleMode::Stretch => Rect {
                x: 0,
                y: 0,
                width: window.width,
                height: window.height,
            },
            ScaleMode::Letterbox => letterbox(source, window),
        })
    }
}

fn letterbox(source: Extent, window: Extent) -> Rect {
    let (sw, sh) = (u64::from(source.width), u64::from(source.height));
    let (ww, wh) = (u64::from(window.width), u64::from(window.height));

    // Compare aspect ratios without division: ww/wh vs sw/sh.
    let (width, height) = if ww * sh <= wh * sw {
        (ww, ww * sh / sw)
    } else {
        (wh * sw / sh, wh)
    };
    let width = width.max(1) as u32;
    let height = height.max(1) as u32;

    Rect {
        x: (window.width - width) / 2,
        y: (window.height - height) / 2,
        width,
        height,
    }
}

/// Something a [`PixelSurface`] can be stretched onto.
///
/// Implementors copy the whole surface into `dest`; anything outside `dest`
/// is theirs to clear.
pub trait PresentTarget {
    type Error: fmt::Display;

    fn blit(&mut self, surface: &PixelSurface, dest: Rect, window: Extent)
    -> Result<(), Self::Error>;
}

/// Maps the back buffer onto the window according to a [`ScaleMode`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Presenter {
    pub mode: ScaleMode,
}

impl Presenter {
    pub fn new(mode: ScaleMode) -> Self {
        Self { mode }
    }

    /// Blit `surface` onto `target`. Invalid surfaces and empty windows are a
    /// no-op; blit failures only cost this frame, so they are logged and
    /// dropped. Returns the rectangle that was drawn.
    pub fn present<T: PresentTarget>(
        &self,
        target: &mut T,
        window: Extent,
        surface: &PixelSurface,
    ) -> Option<Rect> {
        if !surface.is_valid() {
            return None;
        }
        let source = Extent::new(surface.width(), surface.height());
        let dest = self.mode.destination(source, window)?;
        match target.blit(surface, dest, window) {
            Ok(()) => Some(dest),
            Err(e) => {
                tracing::warn!(%window, "present failed: {e}");
                None
            }
        }
    }
}

/// CPU framebuffer target using nearest-neighbour scaling. Pixels are the
/// same packed `0x00RRGGBB` values the surface holds.
pub struct SoftwareTarget {
    pub extent: Extent,
    pub pixels: Vec<u32>,
}

impl SoftwareTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: Extent::new(width, height),
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn clear(&mut self, color: u32) {
        self.pixels.fill(color);
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.extent.width || y >= self.extent.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.extent.width as usize + x as usize)
            .copied()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("target is {target} but the window is {window}")]
pub struct ExtentMismatch {
    pub target: Extent,
    pub window: Extent,
}

impl PresentTarget for SoftwareTarget {
    type Error = ExtentMismatch;

    fn blit(
        &mut self,
        surface: &PixelSurface,
        dest: Rect,
        window: Extent,
    ) -> Result<(), Self::Error> {
        if window != self.extent {
            return Err(ExtentMismatch {
                target: self.extent,
                window,
            });
        }

        let stride = self.extent.width as usize;
        for dy in 0..dest.height {
            let sy = (u64::from(dy) * u64::from(surface.height()) / u64::from(dest.height)) as u32;
            let row = (dest.y + dy) as usize * stride;
            for dx in 0..dest.width {
                let sx =
                    (u64::from(dx) * u64::from(surface.width()) / u64::from(dest.width)) as u32;
                if let Some(pixel) = surface.pixel(sx, sy) {
                    self.pixels[row + (dest.x + dx) as usize] = pixel;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::render_gradient;

    #[test]
    fn letterbox_pillarboxes_wide_window() {
        let rect = ScaleMode::Letterbox
            .destination(Extent::new(800, 600), Extent::new(1280, 300))
            .unwrap();
        assert_eq!(
            rect,
            Rect {
                x: 440,
                y: 0,
                width: 400,
                height: 300
            }
        );
    }

    #[test]
    fn letterbox_adds_bars_to_tall_window() {
        let rect = ScaleMode::Letterbox
            .destination(Extent::new(800, 600), Extent::new(800, 1000))
            .unwrap();
        assert_eq!(
            rect,
            Rect {
                x: 0,
                y: 200,
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn letterbox_matching_aspect_fills_window() {
        let rect = ScaleMode::Letterbox
            .destination(Extent::new(800, 600), Extent::new(1600, 1200))
            .unwrap();
        assert_eq!(
            rect,
            Rect {
                x: 0,
                y: 0,
                width: 1600,
                height: 1200
            }
        );
    }

    #[test]
    fn stretch_fills_window() {
        let rect = ScaleMode::Stretch
            .destination(Extent::new(800, 600), Extent::new(1280, 300))
            .unwrap();
        assert_eq!(
            rect,
            Rect {
                x: 0,
                y: 0,
                width: 1280,
                height: 300
            }
        );
    }

    #[test]
    fn empty_window_has_no_destination() {
        assert!(
            ScaleMode::Letterbox
                .destination(Extent::new(800, 600), Extent::new(0, 300))
                .is_none()
        );
        assert!(
            ScaleMode::Stretch
                .destination(Extent::new(800, 600), Extent::new(300, 0))
                .is_none()
        );
    }

    #[test]
    fn tiny_window_keeps_a_pixel() {
        let rect = ScaleMode::Letterbox
            .destination(Extent::new(800, 600), Extent::new(1, 1))
            .unwrap();
        assert_eq!((rect.width, rect.height), (1, 1));
    }

    #[test]
    fn software_blit_scales_and_leaves_bars() {
        let mut surface = PixelSurface::new(2, 2).unwrap();
        render_gradient(&mut surface, 0, 0);
        let mut target = SoftwareTarget::new(8, 4);
        target.clear(0xdead);

        let presenter = Presenter::new(ScaleMode::Letterbox);
        let rect = presenter
            .present(&mut target, Extent::new(8, 4), &surface)
            .unwrap();
        assert_eq!(
            rect,
            Rect {
                x: 2,
                y: 0,
                width: 4,
                height: 4
            }
        );

        assert_eq!(target.get(0, 0), Some(0xdead));
        assert_eq!(target.get(7, 3), Some(0xdead));
        assert_eq!(target.get(2, 0), surface.pixel(0, 0));
        assert_eq!(target.get(5, 3), surface.pixel(1, 1));
    }

    #[test]
    fn mismatched_window_is_reported_not_fatal() {
        let surface = PixelSurface::new(2, 2).unwrap();
        let mut target = SoftwareTarget::new(4, 4);
        let presenter = Presenter::default();
        assert!(
            presenter
                .present(&mut target, Extent::new(5, 4), &surface)
                .is_none()
        );
    }

    #[test]
    fn scale_mode_toggles() {
        assert_eq!(ScaleMode::Letterbox.toggled(), ScaleMode::Stretch);
        assert_eq!(ScaleMode::Stretch.toggled(), ScaleMode::Letterbox);
    }
}
