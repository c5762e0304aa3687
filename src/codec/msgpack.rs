//! MessagePack encoding of debugger values.
//!
//! Debugger messages are plain `Variant` trees, which serialize to native
//! MessagePack values. `to_vec_named` is used so that any typed record
//! serialized through the codec keeps its field names.
//!
//! # Example
//!
//! ```
//! use debugwire::codec::{MsgPackCodec, Variant};
//!
//! let value = Variant::Array(vec![Variant::from("step"), Variant::Array(vec![])]);
//! let encoded = MsgPackCodec::encode(&value).unwrap();
//! let decoded: Variant = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, value);
//! ```

use crate::error::Result;

/// MessagePack codec for debugger values.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Serialize a value tree.
    ///
    /// # Errors
    ///
    /// `MsgPackEncode` if serde rejects the value.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Parse one value from `bytes`.
    ///
    /// # Errors
    ///
    /// `MsgPackDecode` on truncated input or a type `T` cannot hold.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Number of bytes `value` occupies once encoded.
    pub fn encoded_len<T: serde::Serialize>(value: &T) -> Result<usize> {
        Ok(Self::encode(value)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Variant;

    fn round_trip(value: &Variant) -> Variant {
        let encoded = MsgPackCodec::encode(value).unwrap();
        MsgPackCodec::decode(&encoded).unwrap()
    }

    #[test]
    fn test_scalars_round_trip() {
        for value in [
            Variant::Nil,
            Variant::Bool(false),
            Variant::Int(-12345),
            Variant::Int(i64::MAX),
            Variant::Float(3.25),
            Variant::String("res://main.gd".into()),
            Variant::Bytes(vec![1, 2, 3]),
        ] {
            assert_eq!(round_trip(&value), value);
        }
    }

    #[test]
    fn test_nested_arrays_round_trip() {
        let value = Variant::Array(vec![
            Variant::from("stack_dump"),
            Variant::Array(vec![Variant::Int(1), Variant::Array(vec![Variant::Nil])]),
        ]);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_native_wire_tags() {
        assert_eq!(MsgPackCodec::encode(&Variant::Nil).unwrap(), vec![0xc0]);
        assert_eq!(MsgPackCodec::encode(&Variant::Bool(true)).unwrap(), vec![0xc3]);

        let array = Variant::Array(vec![Variant::Int(1), Variant::Int(2), Variant::Int(3)]);
        assert_eq!(MsgPackCodec::encode(&array).unwrap()[0], 0x93);

        let bytes = MsgPackCodec::encode(&Variant::Bytes(vec![9; 5])).unwrap();
        assert_eq!(bytes[0], 0xc4, "Expected bin8 format");
    }

    #[test]
    fn test_plain_integers_decode_as_int() {
        let encoded = MsgPackCodec::encode(&200u8).unwrap();
        let decoded: Variant = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, Variant::Int(200));
    }

    #[test]
    fn test_unsigned_overflow_rejected() {
        let encoded = MsgPackCodec::encode(&u64::MAX).unwrap();
        assert!(MsgPackCodec::decode::<Variant>(&encoded).is_err());
    }

    #[test]
    fn test_map_rejected() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert("key", 1);
        let encoded = MsgPackCodec::encode(&map).unwrap();
        assert!(MsgPackCodec::decode::<Variant>(&encoded).is_err());
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let truncated = [0x93, 0x01];
        assert!(MsgPackCodec::decode::<Variant>(&truncated).is_err());
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(MsgPackCodec::encoded_len(&Variant::Int(1)).unwrap(), 1);
        assert_eq!(
            MsgPackCodec::encoded_len(&Variant::String("abc".into())).unwrap(),
            4
        );
    }
}
