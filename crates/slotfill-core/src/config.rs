//! # Tagger Configuration
//!
//! Hyperparameters for the encoder, scorer, and CRF. The value is passed
//! explicitly to every constructor that needs it.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotFillError};

/// Recurrent cell used by each direction of the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncoderCell {
    /// Elman recurrence with a `tanh` activation.
    #[serde(rename = "RNN")]
    Rnn,
    /// Long short-term memory.
    #[serde(rename = "LSTM")]
    Lstm,
    /// Gated recurrent unit.
    #[serde(rename = "GRU")]
    Gru,
}

impl fmt::Display for EncoderCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderCell::Rnn => write!(f, "RNN"),
            EncoderCell::Lstm => write!(f, "LSTM"),
            EncoderCell::Gru => write!(f, "GRU"),
        }
    }
}

/// Configuration for [`SlotTagger`](crate::model::SlotTagger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggerConfig {
    /// Size of the input token vocabulary.
    pub vocab_size: usize,
    /// Width of the token embeddings.
    pub embed_size: usize,
    /// Width of the encoder output (both directions together).
    pub hidden_size: usize,
    /// Number of stacked bidirectional layers.
    pub num_layer: usize,
    /// Recurrent cell type.
    pub encoder_cell: EncoderCell,
    /// Dropout rate applied to the encoder output during training.
    pub dropout: f32,
    /// Size of the tag vocabulary, including the pad tag.
    pub num_tags: usize,
    /// Tag id used to pad gold tag sequences.
    pub tag_pad_idx: u32,
    /// Token id used to pad input sequences.
    pub pad_idx: u32,
    /// Whether a CRF layer decodes the tag path.
    pub crf: bool,
    /// Restrict Viterbi decoding to BIO-legal transitions.
    pub constrained_decoding: bool,
    /// Device specifier, see [`resolve_device`](crate::device::resolve_device).
    pub device: String,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 2000,
            embed_size: 768,
            hidden_size: 512,
            num_layer: 2,
            encoder_cell: EncoderCell::Lstm,
            dropout: 0.2,
            num_tags: 2,
            tag_pad_idx: 0,
            pad_idx: 0,
            crf: true,
            constrained_decoding: false,
            device: "cpu".to_string(),
        }
    }
}

impl TaggerConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a JSON string. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn with_embed_size(mut self, embed_size: usize) -> Self {
        self.embed_size = embed_size;
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_num_layer(mut self, num_layer: usize) -> Self {
        self.num_layer = num_layer;
        self
    }

    pub fn with_encoder_cell(mut self, cell: EncoderCell) -> Self {
        self.encoder_cell = cell;
        self
    }

    /// Set the dropout rate, clamped to `[0.0, 1.0)`.
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout.clamp(0.0, 0.99);
        self
    }

    pub fn with_num_tags(mut self, num_tags: usize) -> Self {
        self.num_tags = num_tags;
        self
    }

    pub fn with_tag_pad_idx(mut self, tag_pad_idx: u32) -> Self {
        self.tag_pad_idx = tag_pad_idx;
        self
    }

    pub fn with_pad_idx(mut self, pad_idx: u32) -> Self {
        self.pad_idx = pad_idx;
        self
    }

    pub fn with_crf(mut self, enabled: bool) -> Self {
        self.crf = enabled;
        self
    }

    pub fn with_constrained_decoding(mut self, enabled: bool) -> Self {
        self.constrained_decoding = enabled;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Width of each recurrent direction.
    pub fn direction_size(&self) -> usize {
        self.hidden_size / 2
    }

    /// Check that the hyperparameters describe a buildable model.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SlotFillError::InvalidConfig(msg));

        if self.hidden_size == 0 || self.hidden_size % 2 != 0 {
            return invalid(format!(
                "hidden_size must be a positive even number, got {}",
                self.hidden_size
            ));
        }
        if self.embed_size == 0 {
            return invalid("embed_size must be positive".into());
        }
        if self.num_layer == 0 {
            return invalid("num_layer must be at least 1".into());
        }
        if self.num_tags == 0 {
            return invalid("num_tags must be positive".into());
        }
        if self.tag_pad_idx as usize >= self.num_tags {
            return invalid(format!(
                "tag_pad_idx {} is outside the tag vocabulary of size {}",
                self.tag_pad_idx, self.num_tags
            ));
        }
        if self.pad_idx as usize >= self.vocab_size {
            return invalid(format!(
                "pad_idx {} is outside the token vocabulary of size {}",
                self.pad_idx, self.vocab_size
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TaggerConfig::default().validate().is_ok());
    }

    #[test]
    fn odd_hidden_size_is_rejected() {
        let config = TaggerConfig::new().with_hidden_size(7);
        assert!(matches!(
            config.validate(),
            Err(SlotFillError::InvalidConfig(_))
        ));
    }

    #[test]
    fn tag_pad_outside_vocab_is_rejected() {
        let config = TaggerConfig::new().with_num_tags(3).with_tag_pad_idx(3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_json_with_cell_names() {
        let config = TaggerConfig::from_json_str(
            r#"{"vocab_size": 50, "encoder_cell": "GRU", "hidden_size": 16, "num_tags": 5, "crf": false}"#,
        )
        .unwrap();

        assert_eq!(config.encoder_cell, EncoderCell::Gru);
        assert_eq!(config.vocab_size, 50);
        assert_eq!(config.direction_size(), 8);
        assert!(!config.crf);
        // untouched fields keep defaults
        assert_eq!(config.num_layer, 2);
    }

    #[test]
    fn unknown_cell_name_fails() {
        let result = TaggerConfig::from_json_str(r#"{"encoder_cell": "Transformer"}"#);
        assert!(matches!(result, Err(SlotFillError::Json(_))));
    }

    #[test]
    fn dropout_builder_clamps() {
        let config = TaggerConfig::new().with_dropout(1.5);
        assert!(config.dropout < 1.0);
        assert!(config.validate().is_ok());
    }
}
