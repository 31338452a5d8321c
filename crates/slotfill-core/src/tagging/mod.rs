pub mod label_vocab;

pub use label_vocab::{BioPrefix, LabelVocab, OUTSIDE_TAG, PAD_TAG};
