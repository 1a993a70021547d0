//! # Primitive Encoding
//!
//! Decoding and encoding of RWF primitive values. Lengths come from the
//! enclosing container entry; a zero-length value is blank for every type.
//!
//! - **Int/UInt**: 1-8 bytes, big-endian, sign-extended for Int
//! - **Real**: hint byte then Int mantissa; hint `0x20` is blank
//! - **Float/Double**: IEEE-754, 4/8 bytes
//! - **Date**: `day · month · u16 year`
//! - **Time**: `h m s` or `h m s · u16 ms`
//! - **Enum**: 1 or 2 bytes
//! - **Strings/Buffer**: raw bytes

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use rdm_types::{Date, DataType, DateTime, FieldValue, Real, Time};

use crate::constants::REAL_BLANK_HINT;
use crate::error::{CodecError, CodecResult};

pub fn decode_int(data: &[u8]) -> CodecResult<Option<i64>> {
    match data.len() {
        0 => Ok(None),
        n @ 1..=8 => {
            let mut buf = if data[0] & 0x80 != 0 { [0xffu8; 8] } else { [0u8; 8] };
            buf[8 - n..].copy_from_slice(data);
            Ok(Some(i64::from_be_bytes(buf)))
        }
        n => Err(CodecError::InvalidPrimitiveLength {
            type_name: "Int",
            len: n,
            expected: "0-8 bytes",
        }),
    }
}

pub fn decode_uint(data: &[u8]) -> CodecResult<Option<u64>> {
    match data.len() {
        0 => Ok(None),
        n @ 1..=8 => {
            let mut buf = [0u8; 8];
            buf[8 - n..].copy_from_slice(data);
            Ok(Some(u64::from_be_bytes(buf)))
        }
        n => Err(CodecError::InvalidPrimitiveLength {
            type_name: "UInt",
            len: n,
            expected: "0-8 bytes",
        }),
    }
}

pub fn decode_real(data: &[u8]) -> CodecResult<Real> {
    let Some((&hint, mantissa)) = data.split_first() else {
        return Ok(Real::blank());
    };
    if hint == REAL_BLANK_HINT {
        return Ok(Real::blank());
    }
    let mantissa = decode_int(mantissa)?.unwrap_or(0);
    Real::new(mantissa, hint).map_err(|e| CodecError::invalid_payload(0, e.to_string(), data.len()))
}

pub fn decode_date(data: &[u8]) -> CodecResult<Option<Date>> {
    match data.len() {
        0 => Ok(None),
        4 => {
            let date = Date {
                day: data[0],
                month: data[1],
                year: BigEndian::read_u16(&data[2..4]),
            };
            Ok((!date.is_blank()).then_some(date))
        }
        n => Err(CodecError::InvalidPrimitiveLength {
            type_name: "Date",
            len: n,
            expected: "0 or 4 bytes",
        }),
    }
}

pub fn decode_time(data: &[u8]) -> CodecResult<Option<Time>> {
    match data.len() {
        0 => Ok(None),
        3 | 5 => {
            let millisecond = if data.len() == 5 {
                BigEndian::read_u16(&data[3..5])
            } else {
                0
            };
            Time::new(data[0], data[1], data[2], millisecond)
                .map(Some)
                .map_err(|e| CodecError::invalid_payload(0, e.to_string(), data.len()))
        }
        n => Err(CodecError::InvalidPrimitiveLength {
            type_name: "Time",
            len: n,
            expected: "0, 3 or 5 bytes",
        }),
    }
}

pub fn decode_datetime(data: &[u8]) -> CodecResult<Option<DateTime>> {
    match data.len() {
        0 => Ok(None),
        7 | 9 => {
            let date = decode_date(&data[..4])?.unwrap_or_default();
            let time = decode_time(&data[4..])?.unwrap_or_default();
            Ok(Some(DateTime { date, time }))
        }
        n => Err(CodecError::InvalidPrimitiveLength {
            type_name: "DateTime",
            len: n,
            expected: "0, 7 or 9 bytes",
        }),
    }
}

pub fn decode_enum(data: &[u8]) -> CodecResult<Option<u16>> {
    match data.len() {
        0 => Ok(None),
        1 => Ok(Some(data[0] as u16)),
        2 => Ok(Some(BigEndian::read_u16(data))),
        n => Err(CodecError::InvalidPrimitiveLength {
            type_name: "Enum",
            len: n,
            expected: "0-2 bytes",
        }),
    }
}

/// Decode a primitive of the given type into a `FieldValue`
pub fn decode_value(data_type: DataType, data: &[u8]) -> CodecResult<FieldValue> {
    let value = match data_type {
        DataType::Int => decode_int(data)?.map(FieldValue::Int),
        DataType::UInt => decode_uint(data)?.map(FieldValue::UInt),
        DataType::Real => Some(FieldValue::Real(decode_real(data)?)),
        DataType::Float => match data.len() {
            0 => None,
            4 => Some(FieldValue::Float(BigEndian::read_f32(data))),
            n => {
                return Err(CodecError::InvalidPrimitiveLength {
                    type_name: "Float",
                    len: n,
                    expected: "0 or 4 bytes",
                })
            }
        },
        DataType::Double => match data.len() {
            0 => None,
            8 => Some(FieldValue::Double(BigEndian::read_f64(data))),
            n => {
                return Err(CodecError::InvalidPrimitiveLength {
                    type_name: "Double",
                    len: n,
                    expected: "0 or 8 bytes",
                })
            }
        },
        DataType::Date => decode_date(data)?.map(FieldValue::Date),
        DataType::Time => decode_time(data)?.map(FieldValue::Time),
        DataType::DateTime => decode_datetime(data)?.map(FieldValue::DateTime),
        DataType::Enum => decode_enum(data)?.map(FieldValue::Enum),
        DataType::AsciiString | DataType::Utf8String | DataType::RmtesString => {
            if data.is_empty() {
                None
            } else {
                Some(FieldValue::Ascii(String::from_utf8_lossy(data).into_owned()))
            }
        }
        DataType::Buffer | DataType::Opaque | DataType::Xml => {
            if data.is_empty() {
                None
            } else {
                Some(FieldValue::Buffer(data.to_vec()))
            }
        }
        other => Some(FieldValue::Unsupported(other)),
    };
    Ok(value.unwrap_or(FieldValue::Blank))
}

/// Decode a UInt that must be present
pub fn require_uint(data: &[u8], context: &'static str) -> CodecResult<u64> {
    decode_uint(data)?.ok_or_else(|| CodecError::invalid_payload(0, format!("blank {}", context), 0))
}

/// Decode an Int that must be present
pub fn require_int(data: &[u8], context: &'static str) -> CodecResult<i64> {
    decode_int(data)?.ok_or_else(|| CodecError::invalid_payload(0, format!("blank {}", context), 0))
}

fn int_width(value: i64) -> usize {
    (1..8)
        .find(|&n| {
            let bits = 8 * n as u32 - 1;
            value >= -(1i64 << bits) && value < (1i64 << bits)
        })
        .unwrap_or(8)
}

fn uint_width(value: u64) -> usize {
    (1..8).find(|&n| value < (1u64 << (8 * n))).unwrap_or(8)
}

/// Minimal-width Int encoding
pub fn put_int(out: &mut BytesMut, value: i64) {
    let n = int_width(value);
    out.put_slice(&value.to_be_bytes()[8 - n..]);
}

/// Minimal-width UInt encoding
pub fn put_uint(out: &mut BytesMut, value: u64) {
    let n = uint_width(value);
    out.put_slice(&value.to_be_bytes()[8 - n..]);
}

pub fn put_real(out: &mut BytesMut, real: &Real) {
    if real.blank {
        out.put_u8(REAL_BLANK_HINT);
        return;
    }
    out.put_u8(real.hint);
    put_int(out, real.mantissa);
}

pub fn put_date(out: &mut BytesMut, date: &Date) {
    out.put_u8(date.day);
    out.put_u8(date.month);
    out.put_u16(date.year);
}

pub fn put_time(out: &mut BytesMut, time: &Time) {
    out.put_u8(time.hour);
    out.put_u8(time.minute);
    out.put_u8(time.second);
    if time.millisecond != 0 {
        out.put_u16(time.millisecond);
    }
}

/// Encode a value's bytes (without length prefix)
pub fn put_value(out: &mut BytesMut, value: &FieldValue) -> CodecResult<()> {
    match value {
        FieldValue::Blank => {}
        FieldValue::Int(v) => put_int(out, *v),
        FieldValue::UInt(v) => put_uint(out, *v),
        FieldValue::Float(v) => out.put_f32(*v),
        FieldValue::Double(v) => out.put_f64(*v),
        FieldValue::Real(v) => put_real(out, v),
        FieldValue::Date(v) => put_date(out, v),
        FieldValue::Time(v) => put_time(out, v),
        FieldValue::DateTime(v) => {
            put_date(out, &v.date);
            put_time(out, &v.time);
        }
        FieldValue::Enum(v) => out.put_u16(*v),
        FieldValue::Ascii(v) => out.put_slice(v.as_bytes()),
        FieldValue::Buffer(v) => out.put_slice(v),
        FieldValue::Unsupported(ty) => {
            return Err(CodecError::unsupported_type(*ty, "value encoding"));
        }
    }
    Ok(())
}

/// Wire type a value encodes as inside element lists
pub fn value_type(value: &FieldValue) -> DataType {
    match value {
        FieldValue::Blank => DataType::NoData,
        FieldValue::Int(_) => DataType::Int,
        FieldValue::UInt(_) => DataType::UInt,
        FieldValue::Float(_) => DataType::Float,
        FieldValue::Double(_) => DataType::Double,
        FieldValue::Real(_) => DataType::Real,
        FieldValue::Date(_) => DataType::Date,
        FieldValue::Time(_) => DataType::Time,
        FieldValue::DateTime(_) => DataType::DateTime,
        FieldValue::Enum(_) => DataType::Enum,
        FieldValue::Ascii(_) => DataType::AsciiString,
        FieldValue::Buffer(_) => DataType::Buffer,
        FieldValue::Unsupported(ty) => *ty,
    }
}
