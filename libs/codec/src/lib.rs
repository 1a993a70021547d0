//! # RWF Codec
//!
//! ## Purpose
//!
//! The "Rules" layer of the consumer: everything needed to turn untrusted RWF
//! bytes into typed views, and typed requests back into bytes.
//! - Message base and class-header decoding (`decode_msg`)
//! - Container decoding: FieldList, ElementList, Map, FilterList, Series
//! - Primitive decoding/encoding: Int, UInt, Real, Float, Double, Date, Time, Enum, strings
//! - Message and container builders for every message class
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [rwf-codec] → services/consumer
//!     ↑             ↓               ↓
//! Pure Data    Decode/Encode    Session Engine
//! State, Key   MsgBuilder       Subscriptions
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Transport framing (belongs in rssl-transport)
//! - Dictionary lookups: field lists are returned as raw `(fid, bytes)` pairs
//!   and typed by the caller
//! - Socket management or session state
//!
//! ## Error Policy
//!
//! Decoders never panic on malformed input. Every failure is a `CodecError`
//! carrying offsets and context; callers decide whether to skip the entry,
//! the frame, or the connection.

pub mod builder;
pub mod constants;
pub mod containers;
pub mod error;
pub mod message;
pub mod primitive;
pub mod reader;

pub use builder::{
    encode_key, encode_state, ElementListBuilder, FieldListBuilder, FilterListBuilder, MapBuilder,
    MsgBuilder, SeriesBuilder,
};
pub use constants::*;
pub use containers::{
    decode_element_list, decode_field_list, decode_filter_list, decode_map, decode_series,
    find_element, ElementEntry, FieldEntry, FilterEntry, MapEntry, MapView, SeriesView,
};
pub use error::{hex_preview, CodecError, CodecResult};
pub use message::{decode_key, decode_msg, decode_state, peek_route, Msg, MsgHeader};
pub use primitive::decode_value;
pub use reader::Reader;
