//! Structural models for every seed format the fuzzer understands.
//!
//! Each model parses a seed into an editable representation, registers its
//! named mutation operations and knows how to serialize itself back into a
//! well-framed byte stream.

pub mod grid;
pub mod json;
pub mod lines;
pub mod segment;
pub mod tree;

pub use grid::Grid;
pub use json::JsonDocument;
pub use lines::LineList;
pub use segment::SegmentDocument;
pub use tree::Tree;

use thiserror::Error;

/// Errors raised while parsing a seed into a structural model.
///
/// A `FormatError` means "these bytes are not this format". During mutator
/// construction it is fatal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("seed is empty")]
    Empty,

    #[error("seed is not valid UTF-8")]
    NotUtf8,

    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("malformed XML at byte {offset}: {reason}")]
    Xml { offset: usize, reason: String },

    #[error("missing start-of-image marker")]
    MissingStartMarker,

    #[error("missing start-of-scan marker")]
    MissingStartOfScan,

    #[error("missing end-of-image marker")]
    MissingEndMarker,

    /// A segment's length field points past the end of the buffer.
    #[error(
        "segment {marker:#06x} at offset {offset} declares {declared} bytes but only {available} remain"
    )]
    SegmentOverrun {
        marker: u16,
        offset: usize,
        declared: usize,
        available: usize,
    },

    /// A segment's content is too short for the structure it must hold.
    #[error("{segment} segment truncated: needs {needed} bytes, has {available}")]
    Truncated {
        segment: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("model registers no mutation operations")]
    NoOperations,
}
