//! # Slotfill Core
//!
//! Slot tagging for spoken language understanding. A bidirectional recurrent
//! encoder scores BIO tags per token, an optional linear-chain CRF decodes the
//! best tag path, and the span decoder turns that path into `slot-value`
//! strings.
//!
//! ## Quick Start
//!
//! ```rust
//! use slotfill_core::{IdentityProjection, LabelVocab, SpanDecoder};
//!
//! let vocab = LabelVocab::from_slots(["device"]);
//! let tags = ["O", "O", "B-device", "I-device"];
//! let utt: Vec<String> = ["turn", "on", "the", "light"].iter().map(|s| s.to_string()).collect();
//!
//! let ids = vocab.encode_tags(&tags).unwrap();
//! let decoder = SpanDecoder::new(&IdentityProjection);
//! let slots = decoder.decode_ids(&vocab, &ids, &utt).unwrap();
//!
//! assert_eq!(slots, vec!["device-thelight".to_string()]);
//! ```
pub mod config;
pub mod crf;
pub mod data;
pub mod decode;
pub mod device;
pub mod error;
pub mod metrics;
pub mod model;
pub mod tagging;

// Re-export primary API
pub use config::{EncoderCell, TaggerConfig};
pub use crf::{Crf, ViterbiDecoder};
pub use data::{Batch, BatchBuilder, Example};
pub use decode::{IdentityProjection, Projection, SpanDecoder};
pub use device::resolve_device;
pub use error::{Result, SlotFillError};
pub use metrics::SlotMetrics;
pub use model::{
    BiRecurrentEncoder, DecodeOutput, SequenceEncoder, SlotTagger, TagOutput, TagPredictions,
    TagScorer,
};
pub use tagging::LabelVocab;
