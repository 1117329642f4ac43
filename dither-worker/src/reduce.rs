//! Color reduction shared by every dithering strategy.
//!
//! Also home of the two numeric primitives the whole engine relies on: the BT.601
//! luminance and the clamped byte store.

/// BT.601 luminance scaled by 1000 (`299R + 587G + 114B`), exact for byte inputs.
#[inline(always)]
pub fn luma_milli(r: u8, g: u8, b: u8) -> u32 {
    299 * r as u32 + 587 * g as u32 + 114 * b as u32
}

/// Clamp to 0..=255 and round half to even, the way a clamped byte array stores floats.
#[inline(always)]
pub fn clamp_channel(x: f32) -> u8 {
    if !x.is_finite() || x <= 0.0 {
        return 0;
    }
    if x >= 255.0 {
        return 255;
    }
    let f = x.floor();
    let frac = x - f;
    let n = f as u8;
    if frac > 0.5 || (frac == 0.5 && n % 2 == 1) {
        n + 1
    } else {
        n
    }
}

#[inline(always)]
fn color_sq_dist(r: u8, g: u8, b: u8, c: &[u8; 3]) -> u32 {
    let dr = r as i32 - c[0] as i32;
    let dg = g as i32 - c[1] as i32;
    let db = b as i32 - c[2] as i32;
    (dr * dr + dg * dg + db * db) as u32
}

/// Replacement color policy: binary threshold or nearest palette entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorReducer {
    Binary,
    Palette(Vec<[u8; 3]>),
}

impl ColorReducer {
    /// Palette mode when a non-empty palette is given, binary otherwise.
    pub fn from_palette(palette: Option<&[[u8; 3]]>) -> Self {
        match palette {
            Some(p) if !p.is_empty() => ColorReducer::Palette(p.to_vec()),
            _ => ColorReducer::Binary,
        }
    }

    #[inline]
    pub fn quantize(&self, r: u8, g: u8, b: u8) -> [u8; 3] {
        match self {
            ColorReducer::Binary => {
                if luma_milli(r, g, b) >= 128_000 {
                    [255, 255, 255]
                } else {
                    [0, 0, 0]
                }
            }
            ColorReducer::Palette(palette) => nearest(palette, r, g, b),
        }
    }
}

/// Linear scan; strict `<` keeps the first entry on ties.
fn nearest(palette: &[[u8; 3]], r: u8, g: u8, b: u8) -> [u8; 3] {
    let mut best = 0usize;
    let mut best_dist = u32::MAX;
    for (idx, c) in palette.iter().enumerate() {
        let dist = color_sq_dist(r, g, b, c);
        if dist < best_dist {
            best_dist = dist;
            best = idx;
            if dist == 0 {
                break;
            }
        }
    }
    palette[best]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_threshold_is_inclusive_at_128() {
        let r = ColorReducer::Binary;
        assert_eq!(r.quantize(128, 128, 128), [255, 255, 255]);
        assert_eq!(r.quantize(127, 127, 127), [0, 0, 0]);
        // pure green is bright, pure blue is dark
        assert_eq!(r.quantize(0, 255, 0), [255, 255, 255]);
        assert_eq!(r.quantize(0, 0, 255), [0, 0, 0]);
    }

    #[test]
    fn palette_ties_keep_first_entry() {
        let r = ColorReducer::Palette(vec![[0, 0, 0], [20, 20, 20], [20, 20, 20]]);
        // equidistant between black and the first gray
        assert_eq!(r.quantize(10, 10, 10), [0, 0, 0]);
        let r = ColorReducer::Palette(vec![[100, 0, 0], [0, 100, 0]]);
        assert_eq!(r.quantize(50, 50, 0), [100, 0, 0]);
    }

    #[test]
    fn palette_picks_nearest() {
        let r = ColorReducer::Palette(vec![[0, 0, 0], [255, 255, 255], [255, 0, 0]]);
        assert_eq!(r.quantize(200, 30, 40), [255, 0, 0]);
        assert_eq!(r.quantize(200, 200, 220), [255, 255, 255]);
    }

    #[test]
    fn empty_palette_means_binary() {
        assert_eq!(ColorReducer::from_palette(Some(&[])), ColorReducer::Binary);
        assert_eq!(ColorReducer::from_palette(None), ColorReducer::Binary);
    }

    #[test]
    fn clamp_channel_rounds_half_to_even() {
        assert_eq!(clamp_channel(-3.0), 0);
        assert_eq!(clamp_channel(300.0), 255);
        assert_eq!(clamp_channel(f32::NAN), 0);
        assert_eq!(clamp_channel(101.5), 102);
        assert_eq!(clamp_channel(142.5), 142);
        assert_eq!(clamp_channel(72.4375), 72);
        assert_eq!(clamp_channel(186.6), 187);
    }

    #[test]
    fn luminance_is_exact_for_gray() {
        for v in [0u8, 64, 128, 192, 255] {
            assert_eq!(luma_milli(v, v, v), v as u32 * 1000);
        }
    }
}
