use thiserror::Error;

/// All errors that can occur while parsing, navigating or writing FITS data.
#[derive(Debug, Error)]
pub enum FitsError {
    /// A header card or header unit is malformed.
    #[error("malformed header card {line:?}: {reason}")]
    Format { line: String, reason: String },

    /// Header cards ran out before the END card.
    #[error("header has no END card")]
    MissingEnd,

    /// The stream ended inside a header or data unit.
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// Unrecognized BITPIX value.
    #[error("invalid BITPIX value: {0}")]
    InvalidBitpix(i64),

    /// Unsupported BITPIX/BZERO combination or image rank.
    #[error("unsupported precision: {0}")]
    Precision(String),

    /// A named or ordinal extension is absent.
    #[error("extension not found: {0}")]
    NotFound(String),

    /// Attempted edit, copy or removal of a reserved keyword.
    #[error("keyword {0:?} is reserved and cannot be edited")]
    RestrictedKey(String),

    /// Binary image operators on images of differing dimensions.
    #[error("image shapes differ: {left:?} vs {right:?}")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },

    /// A card field violates its length constraints.
    #[error("invalid card field: {0}")]
    Validation(String),

    /// A pixel range falls outside the image.
    #[error("invalid pixel range: {0}")]
    InvalidRange(String),

    /// The target extension exists and overwriting was not allowed.
    #[error("extension {0:?} already exists")]
    Exists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FitsError>;

impl FitsError {
    pub(crate) fn format(line: &str, reason: impl Into<String>) -> Self {
        FitsError::Format {
            line: line.trim_end().to_string(),
            reason: reason.into(),
        }
    }
}
