//! Value encoding at the storage boundary.
//!
//! A [`Codec`] turns any `serde`-serializable value into the opaque bytes the
//! backend stores, and back. [`JsonCodec`] is the default.
//!
//! The codec never sees an absent key. The result store checks the backend's
//! typed miss first, so a stored `null` (the encoding of `None` or
//! `Payload::Null`) and "nothing was ever written" stay distinct states.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{ser, Serialize};

/// Dynamic payload type for engines that do not carry a typed result.
pub type Payload = serde_json::Value;

/// Errors raised while encoding or decoding a value.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value cannot be represented in this codec's format.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The bytes are not a valid encoding of the requested type.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Encodes values to bytes and decodes them back.
///
/// Implementations must round-trip exactly: decoding the output of `encode`
/// into the same type yields a value equal to the input.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Encodes `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value has no representation
    /// (e.g. a map with non-string keys in JSON).
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decodes `bytes` into a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are malformed or do not
    /// describe a `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// JSON cannot represent `NaN` or infinite floats, and `serde_json` would
/// silently write them as `null`. `JsonCodec` rejects them at encode time
/// instead, so a stored value always loads back as itself.
///
/// # Examples
///
/// ```
/// use memo_store::{Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&Some(vec![1, 2, 3])).unwrap();
/// let back: Option<Vec<i32>> = codec.decode(&bytes).unwrap();
/// assert_eq!(back, Some(vec![1, 2, 3]));
///
/// let none = codec.encode(&None::<i32>).unwrap();
/// assert_eq!(none, b"null");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        value
            .serialize(FiniteFloats)
            .map_err(|e| CodecError::Encode(e.0))?;
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Non-finite float check
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct NonFinite(String);

impl fmt::Display for NonFinite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NonFinite {}

impl ser::Error for NonFinite {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

fn check_float(value: f64) -> Result<(), NonFinite> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(NonFinite(format!("{value} has no JSON representation")))
    }
}

/// Serializer that writes nothing and fails on the first `NaN` or infinity.
struct FiniteFloats;

macro_rules! accept_scalars {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> Result<(), NonFinite> {
                Ok(())
            }
        )*
    };
}

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept_scalars!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    );

    fn serialize_f32(self, value: f32) -> Result<(), NonFinite> {
        check_float(f64::from(value))
    }

    fn serialize_f64(self, value: f64) -> Result<(), NonFinite> {
        check_float(value)
    }

    fn serialize_none(self) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), NonFinite> {
        key.serialize(FiniteFloats)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use serde_json::json;

    use super::*;

    #[test]
    fn round_trip_nested_payload() {
        let codec = JsonCodec;
        let value = json!({
            "x": 1,
            "nested": {"list": [1, "two", null, [3.5, {"deep": true}]]},
            "empty_map": {},
            "empty_list": [],
        });
        let bytes = codec.encode(&value).unwrap();
        let back: Payload = codec.decode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn round_trip_typed_containers() {
        let codec = JsonCodec;
        let mut value: HashMap<String, Vec<Option<u64>>> = HashMap::new();
        value.insert("a".to_string(), vec![Some(1), None, Some(u64::MAX)]);
        value.insert("b".to_string(), vec![]);
        let back: HashMap<String, Vec<Option<u64>>> =
            codec.decode(&codec.encode(&value).unwrap()).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn none_encodes_as_null() {
        let codec = JsonCodec;
        let bytes = codec.encode(&None::<String>).unwrap();
        assert_eq!(bytes, b"null");
        let back: Option<String> = codec.decode(&bytes).unwrap();
        assert_eq!(back, None);
        let payload: Payload = codec.decode(&bytes).unwrap();
        assert_eq!(payload, Payload::Null);
    }

    #[test]
    fn unsized_values_encode() {
        let codec = JsonCodec;
        assert_eq!(codec.encode("text").unwrap(), b"\"text\"");
        assert_eq!(codec.encode(&[1u8, 2][..]).unwrap(), b"[1,2]");
    }

    #[test]
    fn non_string_map_keys_fail_to_encode() {
        let codec = JsonCodec;
        let mut value = BTreeMap::new();
        value.insert(vec![1u8], "v");
        assert!(matches!(codec.encode(&value), Err(CodecError::Encode(_))));
    }

    #[test]
    fn non_finite_floats_fail_to_encode() {
        let codec = JsonCodec;
        assert!(matches!(codec.encode(&f64::NAN), Err(CodecError::Encode(_))));
        assert!(matches!(codec.encode(&Some(f64::NAN)), Err(CodecError::Encode(_))));
        assert!(matches!(codec.encode(&f64::INFINITY), Err(CodecError::Encode(_))));
        assert!(matches!(codec.encode(&f32::NEG_INFINITY), Err(CodecError::Encode(_))));

        let mut nested = BTreeMap::new();
        nested.insert("weights".to_string(), vec![(1, 0.5), (2, f64::NAN)]);
        match codec.encode(&nested) {
            Err(CodecError::Encode(message)) => assert!(message.contains("NaN")),
            other => panic!("expected encode error, got {other:?}"),
        }
    }

    #[test]
    fn finite_floats_round_trip() {
        let codec = JsonCodec;
        let value = vec![Some(0.5), None, Some(-1.25e10), Some(-0.0)];
        let back: Vec<Option<f64>> = codec.decode(&codec.encode(&value).unwrap()).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let codec = JsonCodec;
        let result: Result<Payload, _> = codec.decode(b"\x80\x04not json");
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn empty_bytes_fail_to_decode() {
        let codec = JsonCodec;
        let result: Result<Option<i32>, _> = codec.decode(b"");
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn type_mismatch_fails_to_decode() {
        let codec = JsonCodec;
        let bytes = codec.encode(&json!({"x": 1})).unwrap();
        let result: Result<Vec<i32>, _> = codec.decode(&bytes);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }
}
