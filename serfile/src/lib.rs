//! SER astronomy video container format.
//!
//! SER is a simple container popular in planetary and lunar imaging: a fixed
//! 178-byte little-endian header, a body of packed raw frames with no padding,
//! and an optional trailer of per-frame timestamps. This crate implements
//! version 3 of the format as documented at
//! <http://www.grischa-hahn.homepage.t-online.de/astro/ser/>.
//!
//! [`SerWriter`] is built for sustained sequential capture: the header region
//! is memory-mapped so the frame count can be bumped in place after every
//! append, which keeps the file recoverable if the process dies mid-recording.

mod header;
mod reader;
pub mod timestamp;
mod writer;

pub use header::{bytes_per_frame, ColorId, SerHeader, FILE_ID, HEADER_LEN};
pub use reader::SerReader;
pub use writer::{SerConfig, SerWriter};

use thiserror::Error;

/// Errors produced while reading or writing SER containers.
#[derive(Error, Debug)]
pub enum SerError {
    /// The 14-byte file tag did not match `LUCAM-RECORDER`.
    #[error("not a SER file: bad file tag")]
    BadFileTag,

    /// Color ID field holds a value the format does not define.
    #[error("unknown SER color id {0}")]
    UnknownColorId(i32),

    /// Pixel depth per plane outside the 1..=16 range the format allows.
    #[error("pixel depth {0} out of range (1-16)")]
    BadPixelDepth(i32),

    /// Header declares non-positive image dimensions.
    #[error("bad image dimensions {width}x{height}")]
    BadDimensions {
        /// Declared width.
        width: i32,
        /// Declared height.
        height: i32,
    },

    /// File length does not match the header's frame count.
    #[error("file length {actual} does not match expected {expected} bytes")]
    LengthMismatch {
        /// Length computed from the header fields.
        expected: u64,
        /// Length observed on disk.
        actual: u64,
    },

    /// Frame index past the end of the recording.
    #[error("frame {0} out of range")]
    FrameOutOfRange(usize),

    /// Underlying I/O failure; the source names the failing syscall.
    #[error("{context}: {source}")]
    Io {
        /// Which operation failed (open, write, mmap, ...).
        context: &'static str,
        /// The OS error.
        #[source]
        source: std::io::Error,
    },
}

impl SerError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        SerError::Io { context, source }
    }
}

/// Result type for SER operations.
pub type SerResult<T> = Result<T, SerError>;
