//! Deferred argument decoding.
//!
//! Arguments are encoded once, when the invocation is built, and decoded only when a
//! task body asks for them. A worker may need to prepare its environment before
//! argument types can be decoded, so decoding is never done implicitly.

use crate::codec::{Decoder, Encoder, sealed};
use anyhow::Result;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use std::fmt;

/// Encoded bytes plus a decode-once cache of the value they hold.
pub struct LazyArgs<T> {
    encoded: Bytes,
    decoded: OnceCell<T>,
}

impl<T> LazyArgs<T> {
    /// Encode `value` now. The container does not keep the value itself.
    pub fn new<C>(value: &T, codec: &C) -> Result<Self>
    where
        C: Encoder + sealed::EncodeValue<T>,
    {
        Ok(Self::from_encoded(codec.encode(value)?))
    }

    /// Wrap bytes that were encoded elsewhere.
    pub fn from_encoded(encoded: Bytes) -> Self {
        Self {
            encoded,
            decoded: OnceCell::new(),
        }
    }

    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }

    /// Decode on first access and return the cached value afterwards.
    pub fn get<C>(&self, codec: &C) -> Result<&T>
    where
        C: Decoder + sealed::DecodeValue<T>,
    {
        self.get_or_decode(|bytes| codec.decode(bytes))
    }

    /// Like [`get`](Self::get), with a caller-provided decoder.
    ///
    /// `decode` runs at most once per successful initialization; a failed decode
    /// leaves the container empty so the caller may retry.
    pub fn get_or_decode<F>(&self, decode: F) -> Result<&T>
    where
        F: FnOnce(Bytes) -> Result<T>,
    {
        self.decoded
            .get_or_try_init(|| decode(self.encoded.clone()))
    }
}

impl<T: fmt::Debug> fmt::Debug for LazyArgs<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decoded.get() {
            Some(value) => f.debug_tuple("LazyArgs").field(value).finish(),
            None => write!(f, "LazyArgs(<{} bytes, not loaded>)", self.encoded.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCodec {
        decodes: AtomicUsize,
    }

    impl Encoder for CountingCodec {}
    impl Decoder for CountingCodec {}

    impl sealed::EncodeValue<u64> for CountingCodec {
        fn encode_value(&self, value: &u64) -> Result<Bytes> {
            Ok(Bytes::copy_from_slice(&value.to_le_bytes()))
        }
    }

    impl sealed::DecodeValue<u64> for CountingCodec {
        fn decode_value(&self, bytes: Bytes) -> Result<u64> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            let raw: [u8; 8] = bytes
                .as_ref()
                .try_into()
                .map_err(|_| anyhow::anyhow!("expected 8 bytes, got {}", bytes.len()))?;
            Ok(u64::from_le_bytes(raw))
        }
    }

    #[test]
    fn test_encodes_eagerly_and_decodes_once() {
        let codec = CountingCodec::default();
        let lazy = LazyArgs::new(&42u64, &codec).unwrap();

        assert_eq!(lazy.encoded().len(), 8);
        assert!(!lazy.is_decoded());
        assert_eq!(codec.decodes.load(Ordering::SeqCst), 0);

        assert_eq!(*lazy.get(&codec).unwrap(), 42);
        assert_eq!(*lazy.get(&codec).unwrap(), 42);
        assert!(lazy.is_decoded());
        assert_eq!(codec.decodes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_decode_leaves_container_empty() {
        let codec = CountingCodec::default();
        let lazy: LazyArgs<u64> = LazyArgs::from_encoded(Bytes::from_static(b"short"));

        assert!(lazy.get(&codec).is_err());
        assert!(!lazy.is_decoded());
    }

    #[test]
    fn test_debug_does_not_decode() {
        let codec = CountingCodec::default();
        let lazy = LazyArgs::new(&7u64, &codec).unwrap();
        assert_eq!(format!("{lazy:?}"), "LazyArgs(<8 bytes, not loaded>)");
        lazy.get(&codec).unwrap();
        assert_eq!(format!("{lazy:?}"), "LazyArgs(7)");
    }
}
