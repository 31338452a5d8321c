pub mod layer;
pub mod viterbi;

pub use layer::Crf;
pub use viterbi::ViterbiDecoder;
