/// Box blur of the RGB channels with a `(2r+1)²` window clipped at the image edges.
///
/// Every output value is the plain average of the in-bounds window taken from the
/// pre-blur image. Row sums are collected from that snapshot first, then a vertical
/// sliding window over the sums writes the result, so the cost does not grow with the
/// radius. Alpha is left as is.
pub fn box_blur(pixels: &mut [u8], width: usize, height: usize, radius: u32) {
    if radius == 0 || width == 0 || height == 0 {
        return;
    }
    let r = radius as usize;

    // horizontal window sums per channel, read from the untouched buffer
    let mut row_sums = vec![0u32; width * height * 3];
    for y in 0..height {
        let row = &pixels[y * width * 4..(y + 1) * width * 4];
        let out = &mut row_sums[y * width * 3..(y + 1) * width * 3];
        let mut acc = [0u32; 3];
        // prime with the window for x = 0: columns 0..=r
        for x in 0..=r.min(width - 1) {
            for c in 0..3 {
                acc[c] += row[x * 4 + c] as u32;
            }
        }
        for x in 0..width {
            out[x * 3..x * 3 + 3].copy_from_slice(&acc);
            let enter = x + r + 1;
            if enter < width {
                for c in 0..3 {
                    acc[c] += row[enter * 4 + c] as u32;
                }
            }
            if x >= r {
                let leave = x - r;
                for c in 0..3 {
                    acc[c] -= row[leave * 4 + c] as u32;
                }
            }
        }
    }

    for x in 0..width {
        let cols = (x + r + 1).min(width) - x.saturating_sub(r);
        let mut acc = [0u64; 3];
        for y in 0..=r.min(height - 1) {
            for c in 0..3 {
                acc[c] += row_sums[(y * width + x) * 3 + c] as u64;
            }
        }
        for y in 0..height {
            let rows = (y + r + 1).min(height) - y.saturating_sub(r);
            let count = (rows * cols) as u64;
            let i = (y * width + x) * 4;
            for c in 0..3 {
                pixels[i + c] = mean_round_even(acc[c], count);
            }
            let enter = y + r + 1;
            if enter < height {
                for c in 0..3 {
                    acc[c] += row_sums[(enter * width + x) * 3 + c] as u64;
                }
            }
            if y >= r {
                let leave = y - r;
                for c in 0..3 {
                    acc[c] -= row_sums[(leave * width + x) * 3 + c] as u64;
                }
            }
        }
    }
}

/// `sum / count` rounded half to even, computed exactly in integers.
#[inline(always)]
fn mean_round_even(sum: u64, count: u64) -> u8 {
    let q = sum / count;
    let rem2 = (sum % count) * 2;
    let q = if rem2 > count || (rem2 == count && q % 2 == 1) {
        q + 1
    } else {
        q
    };
    q.min(255) as u8
}
