use thiserror::Error;

/// Errors that can occur while batching, tagging, or decoding.
#[derive(Debug, Error)]
pub enum SlotFillError {
    /// The batch builder was handed no examples.
    #[error("cannot build a batch from an empty example list")]
    EmptyBatch,

    /// An example has no input tokens.
    #[error("example {index} has an empty input sequence")]
    EmptySequence {
        /// Position of the offending example in the input list.
        index: usize,
    },

    /// Sequence lengths are not in non-increasing order.
    #[error("batch is not sorted by length: row {position} has length {current} after {previous}")]
    UnsortedBatch {
        /// Row whose length breaks the ordering.
        position: usize,
        /// Length of the preceding row.
        previous: usize,
        /// Length of the offending row.
        current: usize,
    },

    /// Scores, labels, and mask disagree in shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A training batch was requested for an example without gold tags.
    #[error("example {index} has no gold tag ids")]
    MissingLabels {
        /// Position of the offending example in the input list.
        index: usize,
    },

    /// A tag string is not part of the label vocabulary.
    #[error("unknown tag: {0:?}")]
    UnknownTag(String),

    /// A tag id is outside the label vocabulary.
    #[error("unknown tag id: {0}")]
    UnknownTagId(u32),

    /// The tagger configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested execution device is unavailable or malformed.
    #[error("device error: {0}")]
    Device(String),

    /// Candle tensor framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// I/O failure while reading configuration or weights.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for slot tagging operations.
pub type Result<T> = std::result::Result<T, SlotFillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = SlotFillError::EmptyBatch;
        assert_eq!(
            err.to_string(),
            "cannot build a batch from an empty example list"
        );

        let err = SlotFillError::UnsortedBatch {
            position: 2,
            previous: 3,
            current: 5,
        };
        assert!(err.to_string().contains("row 2 has length 5 after 3"));

        let err = SlotFillError::UnknownTag("B-nope".into());
        assert!(err.to_string().contains("B-nope"));
    }

    #[test]
    fn candle_errors_convert() {
        let err: SlotFillError = candle_core::Error::Msg("boom".into()).into();
        assert!(matches!(err, SlotFillError::Candle(_)));
    }
}
