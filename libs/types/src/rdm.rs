//! # RDM Enumerations
//!
//! Numeric registries for the Reuters Domain Model as carried on the RWF wire:
//! message classes, domains, stream and data states, state codes, container
//! entry actions, and the primitive/container data type table.
//!
//! Every enum here converts from its wire byte through `num_enum`. Enums whose
//! registry is open-ended (`StateCode`, `DomainType`) keep unknown values in a
//! catch-all variant instead of failing, so a newer provider never breaks decoding.

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

/// Message class byte of the message base header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum MsgClass {
    Request = 1,
    Refresh = 2,
    Status = 3,
    Update = 4,
    Close = 5,
    Ack = 6,
    Generic = 7,
    Post = 8,
}

/// RDM domain of a stream
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
pub enum DomainType {
    Login = 1,
    Source = 4,
    Dictionary = 5,
    MarketPrice = 6,
    MarketByOrder = 7,
    MarketByPrice = 8,
    MarketMaker = 9,
    SymbolList = 10,
    YieldCurve = 22,
    #[num_enum(catch_all)]
    Other(u8),
}

impl DomainType {
    /// Order-book domains keyed by price point or order id
    pub fn is_book(self) -> bool {
        matches!(
            self,
            DomainType::MarketByOrder | DomainType::MarketByPrice | DomainType::MarketMaker
        )
    }

    /// Parse a domain name as advertised in directory capabilities or config
    pub fn from_name(name: &str) -> Option<Self> {
        let domain = match name.to_ascii_lowercase().as_str() {
            "login" => DomainType::Login,
            "source" | "directory" => DomainType::Source,
            "dictionary" => DomainType::Dictionary,
            "marketprice" | "market_price" | "mp" => DomainType::MarketPrice,
            "marketbyorder" | "market_by_order" | "mbo" => DomainType::MarketByOrder,
            "marketbyprice" | "market_by_price" | "mbp" => DomainType::MarketByPrice,
            "marketmaker" | "market_maker" => DomainType::MarketMaker,
            "symbollist" | "symbol_list" => DomainType::SymbolList,
            "yieldcurve" | "yield_curve" => DomainType::YieldCurve,
            _ => return None,
        };
        Some(domain)
    }
}

/// Stream state: 3 high bits of the packed state byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum StreamState {
    Open = 1,
    NonStreaming = 2,
    ClosedRecover = 3,
    Closed = 4,
    Redirected = 5,
}

impl StreamState {
    /// Provider will send no further messages on this stream
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            StreamState::ClosedRecover | StreamState::Closed | StreamState::Redirected
        )
    }
}

/// Data state: 3 low bits of the packed state byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum DataState {
    NoChange = 0,
    Ok = 1,
    Suspect = 2,
}

/// Provider status code attached to a state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
pub enum StateCode {
    None = 0,
    NotFound = 1,
    Timeout = 2,
    NotEntitled = 3,
    InvalidArgument = 4,
    UsageError = 5,
    Preempted = 6,
    #[num_enum(catch_all)]
    Other(u8),
}

/// Action of a map entry
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum MapEntryAction {
    Update = 1,
    Add = 2,
    Delete = 3,
}

/// Action of a filter-list entry
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum FilterAction {
    Update = 1,
    Set = 2,
    Clear = 3,
}

/// Primitive and container data types
///
/// Values below 128 are primitives, 128 and above are containers. The numbering
/// follows the RWF registry; the `RWFTYPE` column of a field dictionary names
/// these same types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
pub enum DataType {
    Unknown = 0,
    Int = 3,
    UInt = 4,
    Float = 5,
    Double = 6,
    Real = 8,
    Date = 9,
    Time = 10,
    DateTime = 11,
    Qos = 12,
    State = 13,
    Enum = 14,
    Array = 15,
    Buffer = 16,
    AsciiString = 17,
    Utf8String = 18,
    RmtesString = 19,
    NoData = 128,
    Opaque = 130,
    Xml = 131,
    FieldList = 132,
    ElementList = 133,
    AnsiPage = 134,
    FilterList = 135,
    Vector = 136,
    Map = 137,
    Series = 138,
    Msg = 141,
    #[num_enum(catch_all)]
    Other(u8),
}

impl DataType {
    /// Containers carry nested entries rather than a single value
    pub fn is_container(self) -> bool {
        u8::from(self) >= 128
    }

    /// Resolve a dictionary `RWFTYPE` token (`INT64`, `REAL64`, `ASCII_STRING`, ...)
    pub fn from_rwf_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let ty = match upper.as_str() {
            "INT" | "INT32" | "INT64" | "INT_1" | "INT_2" | "INT_4" | "INT_8" => DataType::Int,
            "UINT" | "UINT32" | "UINT64" | "UINT_1" | "UINT_2" | "UINT_4" | "UINT_8" => {
                DataType::UInt
            }
            "FLOAT" | "FLOAT_4" => DataType::Float,
            "DOUBLE" | "DOUBLE_8" => DataType::Double,
            "REAL" | "REAL32" | "REAL64" | "REAL_4RB" | "REAL_8RB" => DataType::Real,
            "DATE" | "DATE_4" => DataType::Date,
            "TIME" | "TIME_3" | "TIME_5" => DataType::Time,
            "DATETIME" | "DATETIME_7" | "DATETIME_9" => DataType::DateTime,
            "QOS" => DataType::Qos,
            "STATE" => DataType::State,
            "ENUM" => DataType::Enum,
            "ARRAY" => DataType::Array,
            "BUFFER" => DataType::Buffer,
            "ASCII_STRING" => DataType::AsciiString,
            "UTF8_STRING" => DataType::Utf8String,
            "RMTES_STRING" => DataType::RmtesString,
            "NO_DATA" => DataType::NoData,
            "OPAQUE" => DataType::Opaque,
            "XML" => DataType::Xml,
            "FIELD_LIST" => DataType::FieldList,
            "ELEMENT_LIST" => DataType::ElementList,
            "ANSI_PAGE" => DataType::AnsiPage,
            "FILTER_LIST" => DataType::FilterList,
            "VECTOR" => DataType::Vector,
            "MAP" => DataType::Map,
            "SERIES" => DataType::Series,
            "MSG" => DataType::Msg,
            _ => return None,
        };
        Some(ty)
    }

    /// Canonical dictionary token for this type
    pub fn rwf_name(self) -> &'static str {
        match self {
            DataType::Int => "INT64",
            DataType::UInt => "UINT64",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Real => "REAL64",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::DateTime => "DATETIME",
            DataType::Qos => "QOS",
            DataType::State => "STATE",
            DataType::Enum => "ENUM",
            DataType::Array => "ARRAY",
            DataType::Buffer => "BUFFER",
            DataType::AsciiString => "ASCII_STRING",
            DataType::Utf8String => "UTF8_STRING",
            DataType::RmtesString => "RMTES_STRING",
            DataType::NoData => "NO_DATA",
            DataType::Opaque => "OPAQUE",
            DataType::Xml => "XML",
            DataType::FieldList => "FIELD_LIST",
            DataType::ElementList => "ELEMENT_LIST",
            DataType::AnsiPage => "ANSI_PAGE",
            DataType::FilterList => "FILTER_LIST",
            DataType::Vector => "VECTOR",
            DataType::Map => "MAP",
            DataType::Series => "SERIES",
            DataType::Msg => "MSG",
            DataType::Unknown | DataType::Other(_) => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_state_code_is_preserved() {
        let code = StateCode::from(42u8);
        assert_eq!(code, StateCode::Other(42));
        assert_eq!(u8::from(code), 42);
        assert_eq!(StateCode::from(3u8), StateCode::NotEntitled);
    }

    #[test]
    fn test_msg_class_rejects_unknown() {
        assert!(MsgClass::try_from(9u8).is_err());
        assert_eq!(MsgClass::try_from(4u8).unwrap(), MsgClass::Update);
    }

    #[test]
    fn test_rwf_type_names() {
        assert_eq!(DataType::from_rwf_name("REAL64"), Some(DataType::Real));
        assert_eq!(DataType::from_rwf_name("rmtes_string"), Some(DataType::RmtesString));
        assert_eq!(DataType::from_rwf_name("bogus"), None);
        assert!(DataType::Map.is_container());
        assert!(!DataType::Enum.is_container());
    }

    #[test]
    fn test_book_domains() {
        assert!(DomainType::MarketByOrder.is_book());
        assert!(DomainType::MarketByPrice.is_book());
        assert!(!DomainType::MarketPrice.is_book());
        assert_eq!(DomainType::from_name("MBP"), Some(DomainType::MarketByPrice));
    }
}
