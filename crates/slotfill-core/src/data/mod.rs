pub mod batch;
pub mod example;

pub use batch::{Batch, BatchBuilder};
pub use example::Example;
