//! Error types for the StreamToy runtime.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the runtime core.
#[derive(Error, Debug)]
pub enum Error {
    /// A viewer's transport could not be opened.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Tile coordinate outside the 3×5 grid.
    #[error("invalid tile coordinate ({row}, {col})")]
    InvalidCoordinate { row: usize, col: usize },

    /// Writing one tile to a transport failed.
    #[error("transmit failed for tile ({row}, {col}): {reason}")]
    TransmitFailure { row: u8, col: u8, reason: String },

    /// A source image could not be read or decoded.
    #[error("failed to decode {path}: {source}")]
    DecodeFailure {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A viewer or key callback failed or panicked.
    #[error("callback failed: {0}")]
    CallbackFailure(String),

    /// Unknown animation name.
    #[error("unknown animation: {0}")]
    UnknownAnimation(String),

    /// Unknown colour name or malformed hex colour.
    #[error("invalid colour: {0}")]
    InvalidColor(String),

    /// Tile rendering failed.
    #[error("render error: {0}")]
    Render(String),

    /// Scene registry lookup failed.
    #[error("unknown scene: {0}")]
    UnknownScene(String),

    /// Hardware library error.
    #[error(transparent)]
    Hardware(#[from] streamtoy_hw::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// PNG encoding error.
    #[error("PNG encoding error: {0}")]
    Png(#[from] png::EncodingError),
}

impl Error {
    /// Builds a `DecodeFailure` for `path`.
    pub fn decode(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Error::DecodeFailure {
            path: path.into(),
            source,
        }
    }
}
