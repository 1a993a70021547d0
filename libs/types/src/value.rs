//! Primitive Values
//!
//! Decoded forms of the RWF primitive types that field sinks and the book
//! accumulators work with.
//!
//! ## Real Encoding
//!
//! A `Real` is a signed mantissa scaled by a hint:
//! - **0-21**: power-of-ten exponent, `10^(hint - 14)` (hint 14 is the integer)
//! - **22-29**: binary fractions, `1 / 2^(hint - 22)`
//! - **blank**: no value; distinct from zero
//!
//! Mantissa and hint are kept as received so values re-encode without loss.

use std::fmt;

use crate::errors::ValueError;
use crate::rdm::DataType;

/// Largest valid real hint
pub const MAX_REAL_HINT: u8 = 29;

/// Hint meaning "integer, no scaling"
pub const REAL_HINT_INTEGER: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Real {
    pub mantissa: i64,
    pub hint: u8,
    pub blank: bool,
}

impl Real {
    pub fn new(mantissa: i64, hint: u8) -> Result<Self, ValueError> {
        if hint > MAX_REAL_HINT {
            return Err(ValueError::InvalidRealHint { hint });
        }
        Ok(Self {
            mantissa,
            hint,
            blank: false,
        })
    }

    pub const fn blank() -> Self {
        Self {
            mantissa: 0,
            hint: 0,
            blank: true,
        }
    }

    /// Build from a float keeping `decimals` places (0-14)
    pub fn from_f64(value: f64, decimals: u8) -> Result<Self, ValueError> {
        if !value.is_finite() {
            return Err(ValueError::NotFinite { value });
        }
        let decimals = decimals.min(REAL_HINT_INTEGER);
        let scaled = (value * 10f64.powi(decimals as i32)).round();
        if scaled.abs() >= i64::MAX as f64 {
            return Err(ValueError::Overflow { value, decimals });
        }
        Self::new(scaled as i64, REAL_HINT_INTEGER - decimals)
    }

    pub fn to_f64(&self) -> Option<f64> {
        if self.blank {
            return None;
        }
        let m = self.mantissa as f64;
        Some(match self.hint {
            0..=13 => m / 10f64.powi((REAL_HINT_INTEGER - self.hint) as i32),
            14..=21 => m * 10f64.powi((self.hint - REAL_HINT_INTEGER) as i32),
            _ => m / 2f64.powi((self.hint - 22) as i32),
        })
    }
}

impl fmt::Display for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_f64() {
            None => Ok(()),
            Some(v) if self.hint < REAL_HINT_INTEGER => {
                write!(f, "{:.*}", (REAL_HINT_INTEGER - self.hint) as usize, v)
            }
            Some(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Date {
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

impl Date {
    pub fn new(day: u8, month: u8, year: u16) -> Result<Self, ValueError> {
        if day > 31 {
            return Err(ValueError::OutOfRange {
                component: "day",
                value: day as u32,
            });
        }
        if month > 12 {
            return Err(ValueError::OutOfRange {
                component: "month",
                value: month as u32,
            });
        }
        Ok(Self { day, month, year })
    }

    /// All-zero dates are blank
    pub fn is_blank(&self) -> bool {
        self.day == 0 && self.month == 0 && self.year == 0
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8, millisecond: u16) -> Result<Self, ValueError> {
        if hour > 23 {
            return Err(ValueError::OutOfRange {
                component: "hour",
                value: hour as u32,
            });
        }
        if minute > 59 {
            return Err(ValueError::OutOfRange {
                component: "minute",
                value: minute as u32,
            });
        }
        // 60 allows a leap second
        if second > 60 {
            return Err(ValueError::OutOfRange {
                component: "second",
                value: second as u32,
            });
        }
        if millisecond > 999 {
            return Err(ValueError::OutOfRange {
                component: "millisecond",
                value: millisecond as u32,
            });
        }
        Ok(Self {
            hour,
            minute,
            second,
            millisecond,
        })
    }

    pub fn millis_of_day(&self) -> u32 {
        ((self.hour as u32 * 60 + self.minute as u32) * 60 + self.second as u32) * 1000
            + self.millisecond as u32
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            self.hour, self.minute, self.second, self.millisecond
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.date, self.time)
    }
}

/// Book side of an order or price point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Side from the ORDER_SIDE enumeration (1 bid, 2 ask)
    pub fn from_enum(value: u16) -> Option<Self> {
        match value {
            1 => Some(Side::Bid),
            2 => Some(Side::Ask),
            _ => None,
        }
    }

    /// Side from the marker in a price-point key
    ///
    /// The marker is either the last byte (`101.25B`) or a single letter
    /// right after the price digits, followed by a non-alphanumeric suffix
    /// (`100.5A#2`).
    pub fn from_key_marker(key: &[u8]) -> Option<Self> {
        let side = |b: u8| match b {
            b'B' | b'b' => Some(Side::Bid),
            b'A' | b'a' => Some(Side::Ask),
            _ => None,
        };
        if let Some(trailing) = key.last().copied().and_then(side) {
            return Some(trailing);
        }
        let mut found = None;
        for window in key.windows(3) {
            let (prev, mark, next) = (window[0], window[1], window[2]);
            let Some(candidate) = side(mark) else { continue };
            if prev.is_ascii_digit() && !next.is_ascii_alphanumeric() {
                if found.is_some() {
                    return None;
                }
                found = Some(candidate);
            }
        }
        found
    }

    pub fn as_enum(self) -> u16 {
        match self {
            Side::Bid => 1,
            Side::Ask => 2,
        }
    }
}

/// A decoded field or element value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Blank,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Real(Real),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
    Enum(u16),
    Ascii(String),
    Buffer(Vec<u8>),
    /// Type the decoder does not expand (containers, arrays, qos)
    Unsupported(DataType),
}

impl FieldValue {
    pub fn is_blank(&self) -> bool {
        matches!(self, FieldValue::Blank)
            || matches!(self, FieldValue::Real(r) if r.blank)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v as f64),
            FieldValue::Double(v) => Some(*v),
            FieldValue::Real(r) => r.to_f64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(v) => Some(*v),
            FieldValue::Int(v) if *v >= 0 => Some(*v as u64),
            FieldValue::Enum(v) => Some(*v as u64),
            FieldValue::Real(r) => r.to_f64().filter(|v| *v >= 0.0).map(|v| v as u64),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<u16> {
        match self {
            FieldValue::Enum(v) => Some(*v),
            FieldValue::UInt(v) => u16::try_from(*v).ok(),
            FieldValue::Int(v) => u16::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Ascii(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Blank => Ok(()),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::UInt(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Real(v) => write!(f, "{}", v),
            FieldValue::Date(v) => write!(f, "{}", v),
            FieldValue::Time(v) => write!(f, "{}", v),
            FieldValue::DateTime(v) => write!(f, "{}", v),
            FieldValue::Enum(v) => write!(f, "{}", v),
            FieldValue::Ascii(v) => f.write_str(v),
            FieldValue::Buffer(v) => {
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            FieldValue::Unsupported(ty) => write!(f, "<{}>", ty.rwf_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_real_hints() {
        assert_eq!(Real::new(12345, 12).unwrap().to_f64(), Some(123.45));
        assert_eq!(Real::new(7, 14).unwrap().to_f64(), Some(7.0));
        assert_eq!(Real::new(3, 15).unwrap().to_f64(), Some(30.0));
        assert_eq!(Real::new(5, 23).unwrap().to_f64(), Some(2.5));
        assert_eq!(Real::blank().to_f64(), None);
        assert!(Real::new(1, 30).is_err());
    }

    #[test]
    fn test_real_display_keeps_decimals() {
        assert_eq!(Real::new(10050, 12).unwrap().to_string(), "100.50");
        assert_eq!(Real::blank().to_string(), "");
    }

    #[test]
    fn test_real_from_f64() {
        let real = Real::from_f64(101.25, 2).unwrap();
        assert_eq!(real.mantissa, 10125);
        assert_eq!(real.hint, 12);
        assert!(Real::from_f64(f64::NAN, 2).is_err());
    }

    #[test]
    fn test_side_markers() {
        assert_eq!(Side::from_key_marker(b"101.25B"), Some(Side::Bid));
        assert_eq!(Side::from_key_marker(b"101.25A"), Some(Side::Ask));
        assert_eq!(Side::from_key_marker(b"101.25"), None);
        assert_eq!(Side::from_key_marker(b"100.5A#2"), Some(Side::Ask));
        assert_eq!(Side::from_key_marker(b"99B/7"), Some(Side::Bid));
        // letters inside an alphanumeric run are not markers
        assert_eq!(Side::from_key_marker(b"12AB34"), None);
        assert_eq!(Side::from_key_marker(b"1A#2B#3"), None);
        assert_eq!(Side::from_enum(2), Some(Side::Ask));
        assert_eq!(Side::from_enum(0), None);
    }

    #[test]
    fn test_time_validation() {
        assert!(Time::new(24, 0, 0, 0).is_err());
        let t = Time::new(1, 2, 3, 4).unwrap();
        assert_eq!(t.millis_of_day(), 3_723_004);
        assert_eq!(t.to_string(), "01:02:03.004");
    }

    proptest! {
        #[test]
        fn prop_decimal_real_matches_scaled_mantissa(mantissa in -1_000_000_000i64..1_000_000_000, decimals in 0u8..8) {
            let real = Real::new(mantissa, REAL_HINT_INTEGER - decimals).unwrap();
            let expected = mantissa as f64 / 10f64.powi(decimals as i32);
            let got = real.to_f64().unwrap();
            prop_assert!((got - expected).abs() <= expected.abs() * 1e-12 + 1e-12);
        }
    }
}
