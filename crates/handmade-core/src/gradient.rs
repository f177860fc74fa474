use crate::surface::{BYTES_PER_PIXEL, PixelSurface};

/// Paint the animated test gradient.
///
/// Red follows `x + x_offset`, green and blue both follow `y + y_offset`,
/// each truncated to its low 8 bits. Rows advance by the surface stride.
/// An invalid surface is left alone.
pub fn render_gradient(surface: &mut PixelSurface, x_offset: i32, y_offset: i32) {
    let width = surface.width() as usize;
    let Some(rows) = surface.rows_mut() else {
        return;
    };

    for (y, row) in rows.enumerate() {
        let g = (y as i32).wrapping_add(y_offset) as u8;
        let b = g;
        for (x, pixel) in row
            .chunks_exact_mut(BYTES_PER_PIXEL as usize)
            .take(width)
            .enumerate()
        {
            let r = (x as i32).wrapping_add(x_offset) as u8;
            pixel.copy_from_slice(&pack(r, g, b).to_le_bytes());
        }
    }
}

fn pack(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_channels_as_xrgb() {
        assert_eq!(pack(2, 1, 1), 0x0002_0101);
        assert_eq!(pack(0xff, 0, 0x80), 0x00ff_0080);
    }

    #[test]
    fn blue_mirrors_green() {
        let mut surface = PixelSurface::new(8, 8).unwrap();
        render_gradient(&mut surface, 3, 5);
        for y in 0..8 {
            for x in 0..8 {
                let p = surface.pixel(x, y).unwrap();
                assert_eq!(p & 0xff, (p >> 8) & 0xff);
            }
        }
    }

    #[test]
    fn negative_offsets_wrap() {
        let mut surface = PixelSurface::new(1, 1).unwrap();
        render_gradient(&mut surface, -1, -2);
        assert_eq!(surface.pixel(0, 0), Some(pack(0xff, 0xfe, 0xfe)));
    }

    #[test]
    fn unused_byte_stays_zero() {
        let mut surface = PixelSurface::new(300, 2).unwrap();
        render_gradient(&mut surface, 7, 9);
        assert!(surface.pixels().chunks_exact(4).all(|p| p[3] == 0));
    }

    #[test]
    fn invalid_surface_is_untouched() {
        let mut surface = PixelSurface::default();
        render_gradient(&mut surface, 1, 1);
        assert!(surface.pixels().is_empty());
    }
}
