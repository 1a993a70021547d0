//! Error types for primitive value construction and conversion

use thiserror::Error;

/// Errors raised while building or converting primitive values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    /// Real hint outside the defined exponent/fraction range
    #[error("Invalid real hint {hint}: valid hints are 0-29")]
    InvalidRealHint { hint: u8 },

    /// Value is not finite (NaN or infinity)
    #[error("Value is not finite: {value}")]
    NotFinite { value: f64 },

    /// Mantissa would overflow an i64 at the requested precision
    #[error("Overflow: value {value} cannot be represented with {decimals} decimals")]
    Overflow { value: f64, decimals: u8 },

    /// Calendar component out of range
    #[error("Invalid {component}: {value}")]
    OutOfRange { component: &'static str, value: u32 },

    /// Unparseable textual representation
    #[error("Invalid {kind} string: '{input}'")]
    InvalidString { kind: &'static str, input: String },
}
