use thiserror::Error;

/// Structural faults that stop a transformation before any pixel is touched.
///
/// Numeric problems (overflowing channels, out-of-bounds kernel taps) never show up
/// here: they are clamped or skipped where they occur.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error(
        "invalid image dimensions {width}x{height}: expected {expected} bytes, got {actual}"
    )]
    InvalidDimensions {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported ordered dither matrix size {0} (expected 2, 4 or 8)")]
    UnsupportedMatrixSize(usize),

    #[error("invalid option `{field}`: {reason}")]
    InvalidOption { field: &'static str, reason: String },
}
