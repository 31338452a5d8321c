pub mod span;

pub use span::{IdentityProjection, Projection, SpanDecoder};
