//! # Wire Constants
//!
//! Flag bits and fixed values of the RWF message base, message keys and
//! containers. These values define interop with the provider and must not drift.

/// Message flags (`u16` in the message base)
pub mod msg_flags {
    pub const HAS_KEY: u16 = 0x0001;
    pub const SOLICITED: u16 = 0x0002;
    pub const COMPLETE: u16 = 0x0004;
    pub const CLEAR_CACHE: u16 = 0x0008;
    pub const HAS_SEQ: u16 = 0x0010;
    pub const HAS_POST_USER: u16 = 0x0020;
    pub const HAS_STATE: u16 = 0x0040;
    pub const HAS_NAK: u16 = 0x0080;
    pub const HAS_TEXT: u16 = 0x0100;
    pub const HAS_POST_ID: u16 = 0x0200;
    pub const ACK: u16 = 0x0400;
    pub const POST_COMPLETE: u16 = 0x0800;
    pub const STREAMING: u16 = 0x1000;
    pub const NO_REFRESH: u16 = 0x2000;
}

/// Message key member flags
pub mod key_flags {
    pub const SERVICE_ID: u8 = 0x01;
    pub const NAME: u8 = 0x02;
    pub const NAME_TYPE: u8 = 0x04;
    pub const FILTER: u8 = 0x08;
    pub const IDENTIFIER: u8 = 0x10;
    pub const ATTRIB: u8 = 0x20;
}

/// Map and Series summary flag
pub const HAS_SUMMARY: u8 = 0x01;

/// Real hint byte marking a blank value
pub const REAL_BLANK_HINT: u8 = 0x20;

/// Fixed part of the message base after the `u16` header length:
/// class(1) + domain(1) + stream id(4) + flags(2) + container(1)
pub const MSG_BASE_SIZE: usize = 9;

/// Source directory filter bits
pub mod directory_filter {
    pub const INFO: u32 = 0x01;
    pub const STATE: u32 = 0x02;
}

/// Directory filter-list entry ids
pub mod directory_filter_id {
    pub const INFO: u8 = 1;
    pub const STATE: u8 = 2;
}

/// Dictionary request verbosity filter (all definitions)
pub const DICTIONARY_VERBOSE: u32 = 0x07;

/// Dictionary summary `Type` values
pub mod dictionary_type {
    pub const FIELD_DEFINITIONS: u64 = 1;
    pub const ENUM_TABLES: u64 = 2;
}

/// Name type of a user-name login key
pub const NAME_TYPE_USER_NAME: u8 = 1;

/// Name type of an instrument code (RIC)
pub const NAME_TYPE_RIC: u8 = 1;

/// Nak codes carried by an Ack message
pub mod nak_code {
    pub const NONE: u8 = 0;
    pub const ACCESS_DENIED: u8 = 1;
    pub const DENIED_BY_SOURCE: u8 = 2;
    pub const SOURCE_DOWN: u8 = 3;
    pub const SOURCE_UNKNOWN: u8 = 4;
    pub const NO_RESOURCES: u8 = 5;
    pub const NO_RESPONSE: u8 = 6;
    pub const GATEWAY_DOWN: u8 = 7;
    pub const SYMBOL_UNKNOWN: u8 = 10;
    pub const NOT_OPEN: u8 = 11;
    pub const INVALID_CONTENT: u8 = 12;
}

/// Login key attribute element names
pub mod login_attrib {
    pub const APPLICATION_ID: &str = "ApplicationId";
    pub const POSITION: &str = "Position";
    pub const ROLE: &str = "Role";
    pub const SUPPORT_OMM_POST: &str = "SupportOMMPost";

    /// `Role` value of a consumer
    pub const ROLE_CONSUMER: u64 = 0;
}
