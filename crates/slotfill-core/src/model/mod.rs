pub mod encoder;
pub mod scorer;
pub mod tagger;

pub use encoder::{BiRecurrentEncoder, SequenceEncoder};
pub use scorer::{MASK_PENALTY, TagOutput, TagPredictions, TagScorer};
pub use tagger::{DecodeOutput, SlotTagger};
