use crate::reduce::{clamp_channel, luma_milli};

/// Apply contrast, then midtone and highlight shifts, to an RGBA buffer in place.
///
/// All three controls live in 0..=100 with 50 as the neutral value; a neutral control
/// is skipped entirely so `adjust(.., 50, 50, 50)` leaves the buffer untouched.
/// Alpha is never modified.
pub fn adjust(pixels: &mut [u8], contrast: f32, midtones: f32, highlights: f32) {
    let contrast_factor = if contrast == 50.0 {
        None
    } else {
        // maps 0..100 onto -127.5..127.5
        let c = (contrast - 50.0) * 2.55;
        Some((259.0 * (c + 255.0)) / (255.0 * (259.0 - c)))
    };
    let mid_shift = (midtones != 50.0).then(|| (midtones - 50.0) / 50.0 * 30.0);
    let high_shift = (highlights != 50.0).then(|| (highlights - 50.0) / 50.0 * 30.0);
    if contrast_factor.is_none() && mid_shift.is_none() && high_shift.is_none() {
        return;
    }

    for px in pixels.chunks_exact_mut(4) {
        if let Some(cf) = contrast_factor {
            for ch in &mut px[..3] {
                *ch = clamp_channel(cf * (*ch as f32 - 128.0) + 128.0);
            }
        }
        if mid_shift.is_none() && high_shift.is_none() {
            continue;
        }
        // gate on post-contrast luminance, computed once
        let l = luma_milli(px[0], px[1], px[2]);
        let shift = if l > 64_000 && l < 192_000 {
            mid_shift
        } else if l > 192_000 {
            high_shift
        } else {
            None
        };
        if let Some(s) = shift {
            for ch in &mut px[..3] {
                *ch = clamp_channel(*ch as f32 + s);
            }
        }
    }
}
