//! # RDM Types
//!
//! Pure data definitions shared by the wire codec and the consumer session:
//!
//! - **RDM enumerations**: domains, message classes, stream/data states, state codes,
//!   map and filter entry actions, primitive and container data types
//! - **State**: the stream-state / data-state / code / text quadruple carried by
//!   refresh and status messages
//! - **MsgKey**: the item key (service id, name, name type, filter, attributes)
//! - **Primitive values**: `Real`, `Date`, `Time`, `DateTime` and the decoded
//!   `FieldValue` union handed to field sinks
//!
//! ## Architecture Role
//!
//! ```text
//! rdm-types → rwf-codec → rmds-consumer
//!     ↑           ↓              ↓
//! Pure Data   Wire Rules    Session Engine
//! ```
//!
//! Nothing in this crate performs I/O or owns protocol behavior.

pub mod errors;
pub mod key;
pub mod rdm;
pub mod state;
pub mod value;

pub use errors::ValueError;
pub use key::MsgKey;
pub use rdm::{
    DataState, DataType, DomainType, FilterAction, MapEntryAction, MsgClass, StateCode,
    StreamState,
};
pub use state::State;
pub use value::{Date, DateTime, FieldValue, Real, Side, Time};

/// Stream id reserved for the login stream; also carries off-stream post acks
pub const LOGIN_STREAM_ID: i32 = 1;

/// Stream id used for the source directory request
pub const DIRECTORY_STREAM_ID: i32 = 2;

/// Stream id used for the field dictionary request
pub const FIELD_DICTIONARY_STREAM_ID: i32 = 3;

/// Stream id used for the enumerated-type dictionary request
pub const ENUM_DICTIONARY_STREAM_ID: i32 = 4;

/// First stream id available to item subscriptions (0-15 are reserved)
pub const FIRST_ITEM_STREAM_ID: i32 = 16;
