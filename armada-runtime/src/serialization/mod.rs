#[cfg(feature = "json")]
mod json;

#[cfg(feature = "json")]
pub use json::JsonCodec;

/// Re-export the codec traits from `armada-core`.
pub use armada_core::codec::{Codec, Decoder, Encoder, sealed};
