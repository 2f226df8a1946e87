// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary encoding of built-in types.
//!
//! All integers are little endian. Strings and arrays are prefixed with an
//! `i32` length where `-1` denotes null. Decoders never panic on short input;
//! every read is bounds-checked and reported as `BadDecodingError`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{UaError, UaResult};
use crate::status::StatusCode;
use crate::types::{
    DataValue, NodeClass, NodeId, NodeIdentifier, QualifiedName, ReferenceDescription, Variant,
};

/// Upper bound for any single length prefix.
const MAX_LENGTH: usize = 16 * 1024 * 1024;

/// Ticks between 1601-01-01 and 1970-01-01 in 100 ns units.
const EPOCH_DIFFERENCE_TICKS: i64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Types that can be written in OPC UA binary form.
pub trait BinaryEncode {
    /// Appends the encoded form to `buf`.
    fn encode(&self, buf: &mut BytesMut);
}

/// Types that can be read from OPC UA binary form.
pub trait BinaryDecode: Sized {
    /// Reads one value from the front of `buf`.
    fn decode(buf: &mut Bytes) -> UaResult<Self>;
}

/// Encodes a value into a fresh buffer.
pub fn encode_to_bytes<T: BinaryEncode + ?Sized>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.freeze()
}

#[inline]
fn ensure(buf: &Bytes, needed: usize, what: &str) -> UaResult<()> {
    if buf.remaining() < needed {
        return Err(UaError::decoding(format!(
            "need {needed} bytes for {what}, {} remaining",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Reads an `i32` length prefix; `None` for null.
fn decode_length(buf: &mut Bytes, what: &str) -> UaResult<Option<usize>> {
    let length = i32::decode(buf)?;
    if length < 0 {
        return Ok(None);
    }
    let length = length as usize;
    if length > MAX_LENGTH {
        return Err(UaError::decoding(format!("{what} length {length} exceeds limit")));
    }
    Ok(Some(length))
}

fn encode_length(length: usize, buf: &mut BytesMut) {
    buf.put_i32_le(i32::try_from(length).unwrap_or(i32::MAX));
}

// =============================================================================
// Primitives
// =============================================================================

macro_rules! primitive {
    ($ty:ty, $size:expr, $put:ident, $get:ident) => {
        impl BinaryEncode for $ty {
            #[inline]
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }
        }

        impl BinaryDecode for $ty {
            #[inline]
            fn decode(buf: &mut Bytes) -> UaResult<Self> {
                ensure(buf, $size, stringify!($ty))?;
                Ok(buf.$get())
            }
        }
    };
}

primitive!(u8, 1, put_u8, get_u8);
primitive!(i8, 1, put_i8, get_i8);
primitive!(u16, 2, put_u16_le, get_u16_le);
primitive!(i16, 2, put_i16_le, get_i16_le);
primitive!(u32, 4, put_u32_le, get_u32_le);
primitive!(i32, 4, put_i32_le, get_i32_le);
primitive!(u64, 8, put_u64_le, get_u64_le);
primitive!(i64, 8, put_i64_le, get_i64_le);
primitive!(f32, 4, put_f32_le, get_f32_le);
primitive!(f64, 8, put_f64_le, get_f64_le);

impl BinaryEncode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl BinaryDecode for bool {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(u8::decode(buf)? != 0)
    }
}

impl BinaryEncode for str {
    fn encode(&self, buf: &mut BytesMut) {
        encode_length(self.len(), buf);
        buf.put_slice(self.as_bytes());
    }
}

impl BinaryEncode for String {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_str().encode(buf);
    }
}

/// Null strings decode as empty.
impl BinaryDecode for String {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Option::<String>::decode(buf)?.unwrap_or_default())
    }
}

impl BinaryEncode for Option<String> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Some(s) => s.encode(buf),
            None => buf.put_i32_le(-1),
        }
    }
}

impl BinaryDecode for Option<String> {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let Some(length) = decode_length(buf, "string")? else {
            return Ok(None);
        };
        ensure(buf, length, "string body")?;
        let raw = buf.split_to(length);
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|_| UaError::decoding("string is not valid UTF-8"))
    }
}

/// Arrays; a `Vec<u8>` therefore encodes exactly like a ByteString.
impl<T: BinaryEncode> BinaryEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        encode_length(self.len(), buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: BinaryDecode> BinaryDecode for Vec<T> {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let Some(length) = decode_length(buf, "array")? else {
            return Ok(Vec::new());
        };
        // every element takes at least one byte
        ensure(buf, length, "array elements")?;
        let mut items = Vec::with_capacity(length);
        for _ in 0..length {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

impl BinaryEncode for DateTime<Utc> {
    fn encode(&self, buf: &mut BytesMut) {
        let ticks = self
            .timestamp()
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|t| t.checked_add(i64::from(self.timestamp_subsec_nanos() / 100)))
            .and_then(|t| t.checked_add(EPOCH_DIFFERENCE_TICKS))
            .map(|t| t.max(0))
            .unwrap_or(0);
        buf.put_i64_le(ticks);
    }
}

impl BinaryDecode for DateTime<Utc> {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let ticks = i64::decode(buf)?.max(0) - EPOCH_DIFFERENCE_TICKS;
        let seconds = ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::<Utc>::from_timestamp(seconds, nanos)
            .ok_or_else(|| UaError::decoding(format!("date time {ticks} out of range")))
    }
}

impl BinaryEncode for Uuid {
    fn encode(&self, buf: &mut BytesMut) {
        let (d1, d2, d3, d4) = self.as_fields();
        buf.put_u32_le(d1);
        buf.put_u16_le(d2);
        buf.put_u16_le(d3);
        buf.put_slice(d4);
    }
}

impl BinaryDecode for Uuid {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        ensure(buf, 16, "guid")?;
        let d1 = buf.get_u32_le();
        let d2 = buf.get_u16_le();
        let d3 = buf.get_u16_le();
        let mut d4 = [0u8; 8];
        buf.copy_to_slice(&mut d4);
        Ok(Uuid::from_fields(d1, d2, d3, &d4))
    }
}

impl BinaryEncode for StatusCode {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.0);
    }
}

impl BinaryDecode for StatusCode {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(StatusCode(u32::decode(buf)?))
    }
}

// =============================================================================
// NodeId
// =============================================================================

impl BinaryEncode for NodeId {
    fn encode(&self, buf: &mut BytesMut) {
        let ns = self.namespace_index;
        match &self.identifier {
            NodeIdentifier::Numeric(v) if ns == 0 && *v <= 0xFF => {
                buf.put_u8(0x00);
                buf.put_u8(*v as u8);
            }
            NodeIdentifier::Numeric(v) if ns <= 0xFF && *v <= 0xFFFF => {
                buf.put_u8(0x01);
                buf.put_u8(ns as u8);
                buf.put_u16_le(*v as u16);
            }
            NodeIdentifier::Numeric(v) => {
                buf.put_u8(0x02);
                buf.put_u16_le(ns);
                buf.put_u32_le(*v);
            }
            NodeIdentifier::String(s) => {
                buf.put_u8(0x03);
                buf.put_u16_le(ns);
                s.encode(buf);
            }
            NodeIdentifier::Guid(g) => {
                buf.put_u8(0x04);
                buf.put_u16_le(ns);
                g.encode(buf);
            }
            NodeIdentifier::Opaque(b) => {
                buf.put_u8(0x05);
                buf.put_u16_le(ns);
                b.encode(buf);
            }
        }
    }
}

impl BinaryDecode for NodeId {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let mask = u8::decode(buf)?;
        let node = match mask {
            0x00 => NodeId::numeric(0, u32::from(u8::decode(buf)?)),
            0x01 => {
                let ns = u16::from(u8::decode(buf)?);
                NodeId::numeric(ns, u32::from(u16::decode(buf)?))
            }
            0x02 => {
                let ns = u16::decode(buf)?;
                NodeId::numeric(ns, u32::decode(buf)?)
            }
            0x03 => {
                let ns = u16::decode(buf)?;
                NodeId::string(ns, String::decode(buf)?)
            }
            0x04 => {
                let ns = u16::decode(buf)?;
                NodeId::guid(ns, Uuid::decode(buf)?)
            }
            0x05 => {
                let ns = u16::decode(buf)?;
                NodeId::opaque(ns, Vec::<u8>::decode(buf)?)
            }
            other => {
                return Err(UaError::decoding(format!(
                    "unsupported node id encoding 0x{other:02X}"
                )))
            }
        };
        Ok(node)
    }
}

// =============================================================================
// Composite types
// =============================================================================

impl BinaryEncode for QualifiedName {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.namespace_index);
        self.name.encode(buf);
    }
}

impl BinaryDecode for QualifiedName {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        Ok(Self {
            namespace_index: u16::decode(buf)?,
            name: String::decode(buf)?,
        })
    }
}

/// Writes a LocalizedText carrying only a text field.
fn encode_localized_text(text: &str, buf: &mut BytesMut) {
    if text.is_empty() {
        buf.put_u8(0x00);
    } else {
        buf.put_u8(0x02);
        text.encode(buf);
    }
}

fn decode_localized_text(buf: &mut Bytes) -> UaResult<String> {
    let mask = u8::decode(buf)?;
    if mask & 0x01 != 0 {
        let _locale = String::decode(buf)?;
    }
    if mask & 0x02 != 0 {
        return String::decode(buf);
    }
    Ok(String::new())
}

impl BinaryEncode for ReferenceDescription {
    fn encode(&self, buf: &mut BytesMut) {
        self.reference_type_id.encode(buf);
        self.is_forward.encode(buf);
        self.node_id.encode(buf);
        self.browse_name.encode(buf);
        encode_localized_text(&self.display_name, buf);
        buf.put_u32_le(self.node_class.value());
        self.type_definition.encode(buf);
    }
}

impl BinaryDecode for ReferenceDescription {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let reference_type_id = NodeId::decode(buf)?;
        let is_forward = bool::decode(buf)?;
        let node_id = NodeId::decode(buf)?;
        let browse_name = QualifiedName::decode(buf)?;
        let display_name = decode_localized_text(buf)?;
        let class = u32::decode(buf)?;
        let node_class = NodeClass::from_value(class)
            .ok_or_else(|| UaError::decoding(format!("invalid node class {class}")))?;
        let type_definition = NodeId::decode(buf)?;
        Ok(Self {
            reference_type_id,
            is_forward,
            node_id,
            browse_name,
            display_name,
            node_class,
            type_definition,
        })
    }
}

// =============================================================================
// Variant / DataValue
// =============================================================================

const VARIANT_ARRAY_FLAG: u8 = 0x80;
const VARIANT_DIMENSIONS_FLAG: u8 = 0x40;
const VARIANT_TYPE_MASK: u8 = 0x3F;

fn encode_scalar(value: &Variant, buf: &mut BytesMut) {
    match value {
        Variant::Null | Variant::Array(_) => {}
        Variant::Boolean(v) => v.encode(buf),
        Variant::SByte(v) => v.encode(buf),
        Variant::Byte(v) => v.encode(buf),
        Variant::Int16(v) => v.encode(buf),
        Variant::UInt16(v) => v.encode(buf),
        Variant::Int32(v) => v.encode(buf),
        Variant::UInt32(v) => v.encode(buf),
        Variant::Int64(v) => v.encode(buf),
        Variant::UInt64(v) => v.encode(buf),
        Variant::Float(v) => v.encode(buf),
        Variant::Double(v) => v.encode(buf),
        Variant::String(v) => v.encode(buf),
        Variant::DateTime(v) => v.encode(buf),
        Variant::Guid(v) => v.encode(buf),
        Variant::ByteString(v) => v.encode(buf),
        Variant::StatusCode(v) => v.encode(buf),
    }
}

fn decode_scalar(type_id: u8, buf: &mut Bytes) -> UaResult<Variant> {
    let value = match type_id {
        0 => Variant::Null,
        1 => Variant::Boolean(bool::decode(buf)?),
        2 => Variant::SByte(i8::decode(buf)?),
        3 => Variant::Byte(u8::decode(buf)?),
        4 => Variant::Int16(i16::decode(buf)?),
        5 => Variant::UInt16(u16::decode(buf)?),
        6 => Variant::Int32(i32::decode(buf)?),
        7 => Variant::UInt32(u32::decode(buf)?),
        8 => Variant::Int64(i64::decode(buf)?),
        9 => Variant::UInt64(u64::decode(buf)?),
        10 => Variant::Float(f32::decode(buf)?),
        11 => Variant::Double(f64::decode(buf)?),
        12 => Variant::String(String::decode(buf)?),
        13 => Variant::DateTime(DateTime::<Utc>::decode(buf)?),
        14 => Variant::Guid(Uuid::decode(buf)?),
        15 => Variant::ByteString(Vec::<u8>::decode(buf)?),
        19 => Variant::StatusCode(StatusCode::decode(buf)?),
        other => {
            return Err(UaError::decoding(format!(
                "unsupported variant type {other}"
            )))
        }
    };
    Ok(value)
}

impl BinaryEncode for Variant {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Variant::Array(items) => {
                buf.put_u8(self.type_id() | VARIANT_ARRAY_FLAG);
                encode_length(items.len(), buf);
                for item in items {
                    encode_scalar(item, buf);
                }
            }
            scalar => {
                buf.put_u8(scalar.type_id());
                encode_scalar(scalar, buf);
            }
        }
    }
}

impl BinaryDecode for Variant {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let mask = u8::decode(buf)?;
        let type_id = mask & VARIANT_TYPE_MASK;
        if mask & VARIANT_DIMENSIONS_FLAG != 0 {
            return Err(UaError::decoding("multi-dimensional variants are not supported"));
        }
        if mask & VARIANT_ARRAY_FLAG == 0 {
            return decode_scalar(type_id, buf);
        }
        let length = decode_length(buf, "variant array")?.unwrap_or(0);
        ensure(buf, length, "variant array elements")?;
        let mut items = Vec::with_capacity(length);
        for _ in 0..length {
            items.push(decode_scalar(type_id, buf)?);
        }
        Ok(Variant::Array(items))
    }
}

const DATA_VALUE_HAS_VALUE: u8 = 0x01;
const DATA_VALUE_HAS_STATUS: u8 = 0x02;
const DATA_VALUE_HAS_SOURCE_TIMESTAMP: u8 = 0x04;
const DATA_VALUE_HAS_SERVER_TIMESTAMP: u8 = 0x08;

impl BinaryEncode for DataValue {
    fn encode(&self, buf: &mut BytesMut) {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= DATA_VALUE_HAS_VALUE;
        }
        if self.status != StatusCode::Good {
            mask |= DATA_VALUE_HAS_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= DATA_VALUE_HAS_SOURCE_TIMESTAMP;
        }
        if self.server_timestamp.is_some() {
            mask |= DATA_VALUE_HAS_SERVER_TIMESTAMP;
        }
        buf.put_u8(mask);
        if let Some(value) = &self.value {
            value.encode(buf);
        }
        if mask & DATA_VALUE_HAS_STATUS != 0 {
            self.status.encode(buf);
        }
        if let Some(ts) = &self.source_timestamp {
            ts.encode(buf);
        }
        if let Some(ts) = &self.server_timestamp {
            ts.encode(buf);
        }
    }
}

impl BinaryDecode for DataValue {
    fn decode(buf: &mut Bytes) -> UaResult<Self> {
        let mask = u8::decode(buf)?;
        let value = if mask & DATA_VALUE_HAS_VALUE != 0 {
            Some(Variant::decode(buf)?)
        } else {
            None
        };
        let status = if mask & DATA_VALUE_HAS_STATUS != 0 {
            StatusCode::decode(buf)?
        } else {
            StatusCode::Good
        };
        let source_timestamp = if mask & DATA_VALUE_HAS_SOURCE_TIMESTAMP != 0 {
            Some(DateTime::<Utc>::decode(buf)?)
        } else {
            None
        };
        let server_timestamp = if mask & DATA_VALUE_HAS_SERVER_TIMESTAMP != 0 {
            Some(DateTime::<Utc>::decode(buf)?)
        } else {
            None
        };
        Ok(Self {
            value,
            status,
            source_timestamp,
            server_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: BinaryEncode + BinaryDecode>(value: &T) -> T {
        let mut bytes = encode_to_bytes(value);
        let decoded = T::decode(&mut bytes).unwrap();
        assert!(bytes.is_empty(), "trailing bytes after decode");
        decoded
    }

    #[test]
    fn test_node_id_compact_forms() {
        assert_eq!(encode_to_bytes(&NodeId::numeric(0, 85)).as_ref(), &[0x00, 85]);
        assert_eq!(
            encode_to_bytes(&NodeId::numeric(2, 1001)).as_ref(),
            &[0x01, 2, 0xE9, 0x03]
        );
        assert_eq!(encode_to_bytes(&NodeId::numeric(0, 70_000))[0], 0x02);

        let node = NodeId::string(3, "Pump.Speed");
        assert_eq!(round_trip(&node), node);
        let node = NodeId::guid(1, Uuid::new_v4());
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_null_string() {
        let mut bytes = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(Option::<String>::decode(&mut bytes).unwrap(), None);
        let mut bytes = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(String::decode(&mut bytes).unwrap(), "");
    }

    #[test]
    fn test_short_buffer_is_an_error() {
        let mut bytes = Bytes::from_static(&[0x10, 0x00, 0x00, 0x00, b'a']);
        let error = String::decode(&mut bytes).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadDecodingError);

        let mut bytes = Bytes::from_static(&[0x01]);
        assert!(u32::decode(&mut bytes).is_err());
    }

    #[test]
    fn test_date_time_epoch() {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let bytes = encode_to_bytes(&epoch);
        assert_eq!(
            i64::from_le_bytes(bytes.as_ref().try_into().unwrap()),
            EPOCH_DIFFERENCE_TICKS
        );
        assert_eq!(round_trip(&epoch), epoch);
    }

    #[test]
    fn test_variant_array() {
        let value = Variant::Array(vec![Variant::Double(1.5), Variant::Double(-2.0)]);
        assert_eq!(round_trip(&value), value);
        assert_eq!(round_trip(&Variant::Null), Variant::Null);
    }

    #[test]
    fn test_data_value_mask() {
        let value = DataValue {
            value: Some(Variant::Int32(7)),
            status: StatusCode::Good.with_overflow(),
            source_timestamp: None,
            server_timestamp: None,
        };
        let decoded = round_trip(&value);
        assert_eq!(decoded, value);
        assert!(decoded.status.is_overflow());

        let empty = DataValue::default();
        assert_eq!(encode_to_bytes(&empty).as_ref(), &[0x00]);
    }
}
