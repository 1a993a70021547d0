//! # RMDS Consumer
//!
//! Market data consumer for RMDS/TREP distribution over RSSL. One session
//! owns one connection; callers subscribe to items by service name and
//! symbol and receive decoded field lists or maintained order books through
//! listener callbacks.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  SessionRequest   ┌──────────────────────────────────┐
//! │ SessionHandle │ ────────────────> │ reactor thread                   │
//! │ (any thread)  │                   │                                  │
//! └───────────────┘                   │  RsslConnection ─> SessionCore   │
//!         ▲                           │                     │            │
//!         │ ItemListener callbacks    │   SourceRegistry  Subscriptions  │
//!         └────────────────────────── │   Dictionary      PostCorrelator │
//!                                     │   StreamTable     BookAccumulator│
//!                                     └──────────────────────────────────┘
//! ```
//!
//! All session state is owned by the reactor. Listeners are invoked on the
//! reactor thread and must not block.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feed_config::ConsumerConfig;
//! use rmds_consumer::{ConsumerStats, ItemListener, ItemMessage, RequestKind, Session};
//!
//! struct Print;
//! impl ItemListener for Print {
//!     fn on_message(&self, message: &ItemMessage) {
//!         println!("{} {:?}", message.key, message.msg_type);
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ConsumerConfig::load(None, None)?;
//! let (session, _events) = Session::spawn(config, ConsumerStats::new())?;
//! session
//!     .handle()
//!     .subscribe("IDN_RDF", "TRI.N", RequestKind::MarketPrice, Arc::new(Print))?;
//! # Ok(())
//! # }
//! ```

pub mod book;
pub mod dictionary;
pub mod error;
pub mod events;
pub mod fields;
pub mod post;
pub mod provider;
pub mod session;
pub mod source;
pub mod stats;
pub mod stream_table;
pub mod subscription;

pub use book::{BookAccumulator, BookAction, BookEntry, BookMessage, MboAccumulator, MbpAccumulator};
pub use dictionary::{Dictionary, DictionaryListener};
pub use error::{ItemError, Result, SessionError};
pub use events::{
    ConnectionEvent, ItemData, ItemKey, ItemMessage, ItemStatus, MessageType, Quality,
};
pub use fields::{Field, FieldSet};
pub use post::{PostAck, PostCorrelator, PostListener, PostOutcome};
pub use session::{PostRequest, Session, SessionCore, SessionHandle, SessionState};
pub use source::{DomainHint, SourceRegistry};
pub use stats::{ConsumerStats, StatsSnapshot};
pub use stream_table::StreamTable;
pub use subscription::{ItemListener, ListenerId, RequestKind, SubscriptionKind};
