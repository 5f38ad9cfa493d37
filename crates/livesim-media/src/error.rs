//! Error types for livesim-media.

use std::io;
use thiserror::Error;

/// Result type for livesim-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for livesim-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed box structure in the source bytes, or an output box that
    /// cannot be represented with a 32-bit size.
    #[error("Format error at {path} (byte {offset}): {message}")]
    Format {
        path: String,
        offset: u64,
        message: String,
    },

    /// A legal box layout the rewriter does not implement.
    #[error("Unsupported layout at {path} (byte {offset}): {message}")]
    UnsupportedLayout {
        path: String,
        offset: u64,
        message: String,
    },

    /// Content violates an invariant established at analysis time.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// A rewritten decode time does not fit in 64 bits.
    #[error("Decode time overflow: {base} + {offset} ticks")]
    TimeOverflow { base: u64, offset: u64 },

    /// Required box is missing.
    #[error("Missing required box: {0}")]
    MissingBox(&'static str),
}

impl Error {
    /// Create a format error for the box at `path`.
    pub fn format(path: impl Into<String>, offset: u64, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            offset,
            message: message.into(),
        }
    }

    /// Create an unsupported layout error for the box at `path`.
    pub fn unsupported(path: impl Into<String>, offset: u64, message: impl Into<String>) -> Self {
        Self::UnsupportedLayout {
            path: path.into(),
            offset,
            message: message.into(),
        }
    }

    /// Create a consistency error.
    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }
}
