use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Side of a supported Bayer threshold matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerSize {
    Two,
    Four,
    Eight,
}

impl BayerSize {
    pub fn dim(self) -> usize {
        match self {
            BayerSize::Two => 2,
            BayerSize::Four => 4,
            BayerSize::Eight => 8,
        }
    }
}

impl TryFrom<usize> for BayerSize {
    type Error = EngineError;

    fn try_from(n: usize) -> Result<Self, Self::Error> {
        match n {
            2 => Ok(BayerSize::Two),
            4 => Ok(BayerSize::Four),
            8 => Ok(BayerSize::Eight),
            other => Err(EngineError::UnsupportedMatrixSize(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffusionKernel {
    FloydSteinberg,
    Atkinson,
    JarvisJudiceNinke,
    Stucki,
    Burkes,
    Sierra,
    SierraLite,
}

/// Every strategy the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Diffusion(DiffusionKernel),
    Ordered(BayerSize),
    Random,
    Halftone,
    Crosshatch,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Diffusion(DiffusionKernel::FloydSteinberg)
    }
}

impl Algorithm {
    pub const ALL: [Algorithm; 13] = [
        Algorithm::Diffusion(DiffusionKernel::FloydSteinberg),
        Algorithm::Diffusion(DiffusionKernel::Atkinson),
        Algorithm::Diffusion(DiffusionKernel::JarvisJudiceNinke),
        Algorithm::Diffusion(DiffusionKernel::Stucki),
        Algorithm::Diffusion(DiffusionKernel::Burkes),
        Algorithm::Diffusion(DiffusionKernel::Sierra),
        Algorithm::Diffusion(DiffusionKernel::SierraLite),
        Algorithm::Ordered(BayerSize::Two),
        Algorithm::Ordered(BayerSize::Four),
        Algorithm::Ordered(BayerSize::Eight),
        Algorithm::Random,
        Algorithm::Halftone,
        Algorithm::Crosshatch,
    ];

    /// Resolve an identifier (case-insensitive, `-`/space/`_` interchangeable).
    ///
    /// Unknown names fall back to Floyd–Steinberg. The only failure is an ordered
    /// dither request with a matrix size other than 2, 4 or 8.
    pub fn parse(name: &str) -> Result<Self, EngineError> {
        let norm = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let algo = match norm.as_str() {
            "floyd_steinberg" | "floyd" | "fs" => Algorithm::default(),
            "atkinson" => Algorithm::Diffusion(DiffusionKernel::Atkinson),
            "jarvis_judice_ninke" | "jarvis" | "jjn" => {
                Algorithm::Diffusion(DiffusionKernel::JarvisJudiceNinke)
            }
            "stucki" => Algorithm::Diffusion(DiffusionKernel::Stucki),
            "burkes" => Algorithm::Diffusion(DiffusionKernel::Burkes),
            "sierra" | "sierra_3" => Algorithm::Diffusion(DiffusionKernel::Sierra),
            "sierra_lite" | "sierra_1" => Algorithm::Diffusion(DiffusionKernel::SierraLite),
            "ordered" | "bayer" => Algorithm::Ordered(BayerSize::Four),
            "random" => Algorithm::Random,
            "halftone" => Algorithm::Halftone,
            "crosshatch" => Algorithm::Crosshatch,
            other => match ordered_size(other) {
                Some(n) => Algorithm::Ordered(BayerSize::try_from(n)?),
                None => {
                    tracing::debug!(algorithm = %name, "unknown algorithm; using floyd-steinberg");
                    Algorithm::default()
                }
            },
        };
        Ok(algo)
    }

    /// Canonical identifier, accepted back by [`Algorithm::parse`].
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Diffusion(k) => match k {
                DiffusionKernel::FloydSteinberg => "floyd-steinberg",
                DiffusionKernel::Atkinson => "atkinson",
                DiffusionKernel::JarvisJudiceNinke => "jarvis-judice-ninke",
                DiffusionKernel::Stucki => "stucki",
                DiffusionKernel::Burkes => "burkes",
                DiffusionKernel::Sierra => "sierra",
                DiffusionKernel::SierraLite => "sierra-lite",
            },
            Algorithm::Ordered(BayerSize::Two) => "bayer-2",
            Algorithm::Ordered(BayerSize::Four) => "bayer-4",
            Algorithm::Ordered(BayerSize::Eight) => "bayer-8",
            Algorithm::Random => "random",
            Algorithm::Halftone => "halftone",
            Algorithm::Crosshatch => "crosshatch",
        }
    }
}

/// `bayer_4`, `ordered8`, ... -> matrix size.
fn ordered_size(norm: &str) -> Option<usize> {
    let rest = norm
        .strip_prefix("ordered")
        .or_else(|| norm.strip_prefix("bayer"))?;
    let digits = rest.strip_prefix('_').unwrap_or(rest);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn default_algorithm() -> String {
    Algorithm::default().name().to_string()
}

fn neutral() -> f32 {
    50.0
}

fn default_random_magnitude() -> f32 {
    128.0
}

/// Parameters of one transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DitheringOptions {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "neutral")]
    pub contrast: f32,
    #[serde(default = "neutral")]
    pub midtones: f32,
    #[serde(default = "neutral")]
    pub highlights: f32,
    /// Box blur radius, 0 disables.
    #[serde(default)]
    pub blur: u32,
    /// Switches the reducer from black/white to nearest palette color.
    #[serde(default)]
    pub palette: Option<Vec<[u8; 3]>>,
    #[serde(default = "default_random_magnitude")]
    pub random_magnitude: f32,
    /// Seed for the random strategy; fresh entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for DitheringOptions {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            contrast: neutral(),
            midtones: neutral(),
            highlights: neutral(),
            blur: 0,
            palette: None,
            random_magnitude: default_random_magnitude(),
            seed: None,
        }
    }
}

impl DitheringOptions {
    #[cfg(test)]
    pub fn with_algorithm(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            ..Self::default()
        }
    }

    /// Reject values the numeric stages are not defined for.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (field, v) in [
            ("contrast", self.contrast),
            ("midtones", self.midtones),
            ("highlights", self.highlights),
        ] {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(EngineError::InvalidOption {
                    field,
                    reason: format!("{v} is outside 0..=100"),
                });
            }
        }
        if !self.random_magnitude.is_finite() || self.random_magnitude < 0.0 {
            return Err(EngineError::InvalidOption {
                field: "randomMagnitude",
                reason: format!("{} must be a finite non-negative number", self.random_magnitude),
            });
        }
        if self.palette.as_ref().is_some_and(|p| p.is_empty()) {
            return Err(EngineError::InvalidOption {
                field: "palette",
                reason: "palette must contain at least one color".into(),
            });
        }
        Ok(())
    }
}
