//! Sample serialization at process boundaries.
//!
//! Samples only need a codec when they cross a process boundary through a
//! [`QueueTransport`](crate::link::QueueTransport). Local connections move
//! samples by `Clone` and never touch the codec.
//!
//! The default codec is rkyv: [`impl_rkyv_codec!`](crate::impl_rkyv_codec)
//! implements [`Codec`] for any type deriving `rkyv::Archive`,
//! `rkyv::Serialize` and `rkyv::Deserialize`. Decoding always validates the
//! archive, so malformed bytes surface as [`Error::Decode`](crate::Error::Decode)
//! instead of undefined behaviour.
//!
//! # Example
//!
//! ```rust
//! use topiclink::codec::Codec;
//! use topiclink::impl_rkyv_codec;
//!
//! #[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Clone, Debug, Default, PartialEq)]
//! struct Pose {
//!     x: f64,
//!     y: f64,
//! }
//!
//! impl_rkyv_codec!(Pose);
//!
//! let bytes = Pose { x: 1.0, y: 2.0 }.encode().unwrap();
//! assert_eq!(Pose::decode(&bytes).unwrap(), Pose { x: 1.0, y: 2.0 });
//! ```

use crate::error::Result;

/// Serialize/deserialize capability for a sample type.
pub trait Codec: Sized {
    /// Encode the sample into bytes.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode a sample from bytes produced by [`Codec::encode`].
    ///
    /// Malformed input fails with [`Error::Decode`](crate::Error::Decode).
    fn decode(bytes: &[u8]) -> Result<Self>;

    /// Stable name of the sample type.
    ///
    /// Used for type-compatibility checks and to derive queue names, so two
    /// processes only rendezvous on a queue when their sample types agree.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Values that can flow through a pipeline.
///
/// Blanket-implemented for every `Clone + Default + Codec` type that can be
/// shared between threads.
pub trait Sample: Codec + Clone + Default + Send + Sync + 'static {}

impl<T> Sample for T where T: Codec + Clone + Default + Send + Sync + 'static {}

/// Implement [`Codec`] for one or more rkyv-archivable types.
///
/// Encoding uses `rkyv::to_bytes`; decoding copies the input into an aligned
/// buffer and uses the validating `rkyv::from_bytes`.
#[macro_export]
macro_rules! impl_rkyv_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::codec::Codec for $ty {
                fn encode(&self) -> $crate::Result<::std::vec::Vec<u8>> {
                    $crate::rkyv::to_bytes::<$crate::rkyv::rancor::Error>(self)
                        .map(|bytes| bytes[..].to_vec())
                        .map_err(|e| $crate::Error::Encode(e.to_string()))
                }

                fn decode(bytes: &[u8]) -> $crate::Result<Self> {
                    let mut aligned = $crate::rkyv::util::AlignedVec::<16>::new();
                    aligned.extend_from_slice(bytes);
                    $crate::rkyv::from_bytes::<$ty, $crate::rkyv::rancor::Error>(&aligned)
                        .map_err(|e| $crate::Error::Decode(e.to_string()))
                }
            }
        )+
    };
}

impl_rkyv_codec!(
    u8, u16, u32, u64, i8, i16, i32, i64, f32, f64, bool, String, Vec<u8>
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Clone, Debug, Default, PartialEq)]
    struct Telemetry {
        seq: u64,
        label: String,
        readings: Vec<f32>,
    }

    impl_rkyv_codec!(Telemetry);

    #[test]
    fn test_struct_roundtrip() {
        let sample = Telemetry {
            seq: 7,
            label: "imu".into(),
            readings: vec![0.5, -1.25, 3.0],
        };
        let bytes = sample.encode().unwrap();
        assert_eq!(Telemetry::decode(&bytes).unwrap(), sample);
    }

    #[test]
    fn test_string_roundtrip() {
        let long = "x".repeat(300);
        let bytes = long.encode().unwrap();
        assert_eq!(String::decode(&bytes).unwrap(), long);
    }

    #[test]
    fn test_truncated_input_is_decode_error() {
        let bytes = 0xdead_beef_u64.encode().unwrap();
        let err = u64::decode(&bytes[..3]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_empty_input_is_decode_error() {
        assert!(matches!(Telemetry::decode(&[]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_type_name_distinguishes_types() {
        assert_ne!(<u32 as Codec>::type_name(), <u64 as Codec>::type_name());
        assert!(<Telemetry as Codec>::type_name().ends_with("Telemetry"));
    }
}
