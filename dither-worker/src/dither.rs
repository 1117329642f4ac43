//! Dithering strategies over RGBA8 buffers.
//!
//! Error diffusion (seven kernels), ordered Bayer thresholds, random thresholds and two
//! fixed binary patterns (halftone, crosshatch). Every strategy scans row-major from the
//! top-left corner, asks a [`ColorReducer`] for the replacement color and keeps alpha.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::options::{Algorithm, BayerSize, DiffusionKernel};
use crate::reduce::{ColorReducer, clamp_channel, luma_milli};

/// Dither `pixels` (RGBA8, `width * height * 4` bytes) in place.
///
/// `random_magnitude` and `seed` are only read by [`Algorithm::Random`].
pub fn dither_image(
    pixels: &mut [u8],
    width: usize,
    height: usize,
    algorithm: Algorithm,
    reducer: &ColorReducer,
    random_magnitude: f32,
    seed: Option<u64>,
) {
    if pixels.is_empty() {
        return;
    }
    match algorithm {
        Algorithm::Diffusion(kernel) => {
            diffuse(pixels, width, height, reducer, model(kernel));
        }
        Algorithm::Ordered(size) => ordered_bayer(pixels, width, height, reducer, size),
        Algorithm::Random => {
            let mut rng = match seed {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            random_threshold(pixels, reducer, random_magnitude, &mut rng)
        }
        Algorithm::Halftone => halftone(pixels, width, height),
        Algorithm::Crosshatch => crosshatch(pixels, width),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PropEntry {
    pub dx: i32,
    pub dy: usize,
    pub fraction: f32,
}

/// Error diffusion kernel: where the quantization error goes and how much of it.
#[derive(Clone, Copy, Debug)]
pub struct Model {
    pub entries: &'static [PropEntry],
}

impl Model {
    #[cfg(test)]
    pub fn weight_sum(&self) -> f32 {
        self.entries.iter().map(|e| e.fraction).sum()
    }
}

pub fn model(kernel: DiffusionKernel) -> Model {
    match kernel {
        DiffusionKernel::FloydSteinberg => FLOYD_STEINBERG,
        DiffusionKernel::Atkinson => ATKINSON,
        DiffusionKernel::JarvisJudiceNinke => JARVIS,
        DiffusionKernel::Stucki => STUCKI,
        DiffusionKernel::Burkes => BURKES,
        DiffusionKernel::Sierra => SIERRA3,
        DiffusionKernel::SierraLite => SIERRA1,
    }
}

macro_rules! model {($name:ident, [ $( ($dx:expr,$dy:expr,$frac:expr) ),* $(,)? ]) => {
    const $name: Model = Model { entries: &[ $( PropEntry { dx: $dx, dy: $dy, fraction: $frac } ),* ] };};}

model!(
    FLOYD_STEINBERG,
    [
        (1, 0, 7.0 / 16.0),
        (-1, 1, 3.0 / 16.0),
        (0, 1, 5.0 / 16.0),
        (1, 1, 1.0 / 16.0)
    ]
);
// Only 6/8 of the error is passed on.
model!(
    ATKINSON,
    [
        (1, 0, 1.0 / 8.0),
        (2, 0, 1.0 / 8.0),
        (-1, 1, 1.0 / 8.0),
        (0, 1, 1.0 / 8.0),
        (1, 1, 1.0 / 8.0),
        (0, 2, 1.0 / 8.0)
    ]
);
model!(
    JARVIS,
    [
        (1, 0, 7.0 / 48.0),
        (2, 0, 5.0 / 48.0),
        (-2, 1, 3.0 / 48.0),
        (-1, 1, 5.0 / 48.0),
        (0, 1, 7.0 / 48.0),
        (1, 1, 5.0 / 48.0),
        (2, 1, 3.0 / 48.0),
        (-2, 2, 1.0 / 48.0),
        (-1, 2, 3.0 / 48.0),
        (0, 2, 5.0 / 48.0),
        (1, 2, 3.0 / 48.0),
        (2, 2, 1.0 / 48.0)
    ]
);
model!(
    STUCKI,
    [
        (1, 0, 8.0 / 42.0),
        (2, 0, 4.0 / 42.0),
        (-2, 1, 2.0 / 42.0),
        (-1, 1, 4.0 / 42.0),
        (0, 1, 8.0 / 42.0),
        (1, 1, 4.0 / 42.0),
        (2, 1, 2.0 / 42.0),
        (-2, 2, 1.0 / 42.0),
        (-1, 2, 2.0 / 42.0),
        (0, 2, 4.0 / 42.0),
        (1, 2, 2.0 / 42.0),
        (2, 2, 1.0 / 42.0)
    ]
);
model!(
    BURKES,
    [
        (1, 0, 8.0 / 32.0),
        (2, 0, 4.0 / 32.0),
        (-2, 1, 2.0 / 32.0),
        (-1, 1, 4.0 / 32.0),
        (0, 1, 8.0 / 32.0),
        (1, 1, 4.0 / 32.0),
        (2, 1, 2.0 / 32.0)
    ]
);
model!(
    SIERRA3,
    [
        (1, 0, 5.0 / 32.0),
        (2, 0, 3.0 / 32.0),
        (-2, 1, 2.0 / 32.0),
        (-1, 1, 4.0 / 32.0),
        (0, 1, 5.0 / 32.0),
        (1, 1, 4.0 / 32.0),
        (2, 1, 2.0 / 32.0),
        (-1, 2, 2.0 / 32.0),
        (0, 2, 3.0 / 32.0),
        (1, 2, 2.0 / 32.0)
    ]
);
model!(
    SIERRA1,
    [(1, 0, 2.0 / 4.0), (-1, 1, 1.0 / 4.0), (0, 1, 1.0 / 4.0)]
);

/// In-place error diffusion. Error is accumulated straight into the not-yet-visited
/// neighbours of the same buffer, clamped on every write.
pub fn diffuse(pixels: &mut [u8], width: usize, height: usize, reducer: &ColorReducer, model: Model) {
    for y in 0..height {
        for x in 0..width {
            let i = (y * width + x) * 4;
            let (r0, g0, b0) = (pixels[i], pixels[i + 1], pixels[i + 2]);
            let chosen = reducer.quantize(r0, g0, b0);
            pixels[i] = chosen[0];
            pixels[i + 1] = chosen[1];
            pixels[i + 2] = chosen[2];

            // Error (expected - actual).
            let er = r0 as f32 - chosen[0] as f32;
            let eg = g0 as f32 - chosen[1] as f32;
            let eb = b0 as f32 - chosen[2] as f32;
            if er == 0.0 && eg == 0.0 && eb == 0.0 {
                continue;
            }
            for entry in model.entries.iter() {
                let nx = x as isize + entry.dx as isize;
                let ny = y + entry.dy;
                if nx < 0 || nx as usize >= width || ny >= height {
                    continue;
                }
                let j = (ny * width + nx as usize) * 4;
                pixels[j] = clamp_channel(pixels[j] as f32 + er * entry.fraction);
                pixels[j + 1] = clamp_channel(pixels[j + 1] as f32 + eg * entry.fraction);
                pixels[j + 2] = clamp_channel(pixels[j + 2] as f32 + eb * entry.fraction);
            }
        }
    }
}

// Ordered Bayer matrices (values in range [0, n*n-1]).
#[rustfmt::skip]
pub const BAYER_2: [[u8; 2]; 2] = [[0, 2],[3, 1]];
#[rustfmt::skip]
pub const BAYER_4: [[u8; 4]; 4] = [
    [ 0,  8,  2, 10],
    [12,  4, 14,  6],
    [ 3, 11,  1,  9],
    [15,  7, 13,  5],
];
#[rustfmt::skip]
pub const BAYER_8: [[u8; 8]; 8] = [
    [ 0, 32,  8, 40,  2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44,  4, 36, 14, 46,  6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [ 3, 35, 11, 43,  1, 33,  9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47,  7, 39, 13, 45,  5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

pub fn bayer_index(size: BayerSize, x: usize, y: usize) -> u8 {
    match size {
        BayerSize::Two => BAYER_2[y % 2][x % 2],
        BayerSize::Four => BAYER_4[y % 4][x % 4],
        BayerSize::Eight => BAYER_8[y % 8][x % 8],
    }
}

fn ordered_bayer(
    pixels: &mut [u8],
    width: usize,
    height: usize,
    reducer: &ColorReducer,
    size: BayerSize,
) {
    let dim = size.dim();
    let cells = (dim * dim) as f32;
    // threshold offset per matrix cell, in channel units
    let mut offsets = vec![0f32; dim * dim];
    for my in 0..dim {
        for mx in 0..dim {
            offsets[my * dim + mx] = (bayer_index(size, mx, my) as f32 / cells - 0.5) * 255.0;
        }
    }
    for y in 0..height {
        let row = &offsets[(y % dim) * dim..(y % dim + 1) * dim];
        for x in 0..width {
            let i = (y * width + x) * 4;
            let t = row[x % dim];
            write_quantized(pixels, i, reducer, t);
        }
    }
}

fn random_threshold(pixels: &mut [u8], reducer: &ColorReducer, magnitude: f32, rng: &mut impl Rng) {
    for i in (0..pixels.len()).step_by(4) {
        let t = rng.random_range(-0.5f32..0.5) * magnitude;
        write_quantized(pixels, i, reducer, t);
    }
}

/// Offset the pixel at byte `i` by `t`, clamp, quantize and store.
#[inline(always)]
fn write_quantized(pixels: &mut [u8], i: usize, reducer: &ColorReducer, t: f32) {
    let r = clamp_channel(pixels[i] as f32 + t);
    let g = clamp_channel(pixels[i + 1] as f32 + t);
    let b = clamp_channel(pixels[i + 2] as f32 + t);
    let chosen = reducer.quantize(r, g, b);
    pixels[i] = chosen[0];
    pixels[i + 1] = chosen[1];
    pixels[i + 2] = chosen[2];
}

#[inline(always)]
fn write_binary(pixels: &mut [u8], i: usize, black: bool) {
    let v = if black { 0 } else { 255 };
    pixels[i] = v;
    pixels[i + 1] = v;
    pixels[i + 2] = v;
}

const HALFTONE_CELL: usize = 4;

/// Black disk per 4x4 cell, sized by the cell's mean darkness. Always black/white.
fn halftone(pixels: &mut [u8], width: usize, height: usize) {
    let center = HALFTONE_CELL as f32 / 2.0;
    for by in (0..height).step_by(HALFTONE_CELL) {
        for bx in (0..width).step_by(HALFTONE_CELL) {
            let y_end = (by + HALFTONE_CELL).min(height);
            let x_end = (bx + HALFTONE_CELL).min(width);
            let mut sum = 0u64;
            for y in by..y_end {
                for x in bx..x_end {
                    let i = (y * width + x) * 4;
                    sum += luma_milli(pixels[i], pixels[i + 1], pixels[i + 2]) as u64;
                }
            }
            let count = ((y_end - by) * (x_end - bx)) as f32;
            let avg = sum as f32 / 1000.0 / count;
            let radius = (255.0 - avg) / 255.0 * 2.0;
            for y in by..y_end {
                for x in bx..x_end {
                    let dx = (x - bx) as f32 - center;
                    let dy = (y - by) as f32 - center;
                    let i = (y * width + x) * 4;
                    write_binary(pixels, i, (dx * dx + dy * dy).sqrt() < radius);
                }
            }
        }
    }
}

/// Line patterns that get denser as luminance drops. Always black/white.
fn crosshatch(pixels: &mut [u8], width: usize) {
    for (p, px) in pixels.chunks_exact_mut(4).enumerate() {
        let (x, y) = (p % width, p / width);
        let (u, v, d) = (x % 4, y % 4, (x + y) % 4);
        let l = luma_milli(px[0], px[1], px[2]);
        let black = if l < 51_000 {
            u == 0 || v == 0 || d == 0 || d == 2
        } else if l < 102_000 {
            u == 0 || v == 0 || d == 0
        } else if l < 153_000 {
            u == 0 || d == 0
        } else if l < 204_000 {
            d == 0
        } else {
            false
        };
        write_binary(px, 0, black);
    }
}
