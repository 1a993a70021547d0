//! Caller front door
//!
//! Every caller operation becomes an owned [`SessionRequest`] sent to the
//! reactor over an unbounded channel. The handle never touches subscription
//! state; the only shared state it reads is the stream table, for
//! backpressure figures.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rdm_types::FieldValue;
use tokio::sync::mpsc;

use crate::dictionary::DictionaryListener;
use crate::error::{Result, SessionError};
use crate::post::PostListener;
use crate::stats::ConsumerStats;
use crate::stream_table::SharedStreamTable;
use crate::subscription::{ItemListener, ItemRequest, ListenerId, RequestKind, SubscriptionId};

/// One post on behalf of a caller
#[derive(Clone)]
pub struct PostRequest {
    pub source: String,
    pub symbol: String,
    pub fields: Vec<(i16, FieldValue)>,
    pub poster: Arc<dyn PostListener>,
    pub reply: Option<String>,
    /// Send on the item's own stream instead of the login stream
    pub on_stream: bool,
}

impl fmt::Debug for PostRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostRequest")
            .field("source", &self.source)
            .field("symbol", &self.symbol)
            .field("fields", &self.fields.len())
            .field("reply", &self.reply)
            .field("on_stream", &self.on_stream)
            .finish()
    }
}

pub enum SessionRequest {
    Subscribe(ItemRequest),
    Snapshot(ItemRequest),
    Unsubscribe { id: ListenerId },
    Refresh { id: ListenerId },
    Post(PostRequest),
    RequestDictionary { listener: Arc<dyn DictionaryListener> },
    /// Drop the connection and run the reconnect sequence
    Recover { reason: String },
    Shutdown,
}

impl SessionRequest {
    pub fn name(&self) -> &'static str {
        match self {
            SessionRequest::Subscribe(_) => "subscribe",
            SessionRequest::Snapshot(_) => "snapshot",
            SessionRequest::Unsubscribe { .. } => "unsubscribe",
            SessionRequest::Refresh { .. } => "refresh",
            SessionRequest::Post(_) => "post",
            SessionRequest::RequestDictionary { .. } => "request_dictionary",
            SessionRequest::Recover { .. } => "recover",
            SessionRequest::Shutdown => "shutdown",
        }
    }

    /// Requests that open a new stream and count against the pending gate
    pub fn opens_stream(&self) -> bool {
        matches!(self, SessionRequest::Subscribe(_) | SessionRequest::Snapshot(_))
    }
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRequest::Subscribe(r) | SessionRequest::Snapshot(r) => {
                f.debug_tuple(self.name()).field(r).finish()
            }
            SessionRequest::Unsubscribe { id } | SessionRequest::Refresh { id } => {
                f.debug_tuple(self.name()).field(id).finish()
            }
            SessionRequest::Post(p) => f.debug_tuple(self.name()).field(p).finish(),
            SessionRequest::Recover { reason } => f.debug_tuple(self.name()).field(reason).finish(),
            _ => f.write_str(self.name()),
        }
    }
}

/// Cloneable, thread-safe handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionRequest>,
    next_listener: Arc<AtomicU64>,
    streams: SharedStreamTable<SubscriptionId>,
    stats: Arc<ConsumerStats>,
}

impl SessionHandle {
    pub fn new(
        tx: mpsc::UnboundedSender<SessionRequest>,
        streams: SharedStreamTable<SubscriptionId>,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            tx,
            next_listener: Arc::new(AtomicU64::new(1)),
            streams,
            stats,
        }
    }

    fn send(&self, request: SessionRequest) -> Result<()> {
        self.tx.send(request).map_err(|_| SessionError::ChannelClosed)
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    fn item_request(
        &self,
        source: &str,
        symbol: &str,
        kind: RequestKind,
        listener: Arc<dyn ItemListener>,
    ) -> ItemRequest {
        ItemRequest {
            listener_id: self.next_listener_id(),
            source: source.to_string(),
            symbol: symbol.to_string(),
            kind,
            listener,
        }
    }

    /// Stream an item to `listener`; the returned id unsubscribes it
    pub fn subscribe(
        &self,
        source: &str,
        symbol: &str,
        kind: RequestKind,
        listener: Arc<dyn ItemListener>,
    ) -> Result<ListenerId> {
        let request = self.item_request(source, symbol, kind, listener);
        let id = request.listener_id;
        self.send(SessionRequest::Subscribe(request))?;
        Ok(id)
    }

    /// One image of an item, then `SnapshotComplete`
    pub fn snapshot(
        &self,
        source: &str,
        symbol: &str,
        kind: RequestKind,
        listener: Arc<dyn ItemListener>,
    ) -> Result<ListenerId> {
        let request = self.item_request(source, symbol, kind, listener);
        let id = request.listener_id;
        self.send(SessionRequest::Snapshot(request))?;
        Ok(id)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> Result<()> {
        self.send(SessionRequest::Unsubscribe { id })
    }

    pub fn refresh(&self, id: ListenerId) -> Result<()> {
        self.send(SessionRequest::Refresh { id })
    }

    pub fn post(&self, request: PostRequest) -> Result<()> {
        self.send(SessionRequest::Post(request))
    }

    pub fn request_dictionary(&self, listener: Arc<dyn DictionaryListener>) -> Result<()> {
        self.send(SessionRequest::RequestDictionary { listener })
    }

    pub fn recover(&self, reason: impl Into<String>) -> Result<()> {
        self.send(SessionRequest::Recover {
            reason: reason.into(),
        })
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionRequest::Shutdown)
    }

    /// Opens sent and not yet answered
    pub fn pending_opens(&self) -> usize {
        self.streams.lock().pending_count()
    }

    /// Item streams currently allocated
    pub fn open_streams(&self) -> usize {
        self.streams.lock().in_use()
    }

    pub fn stats(&self) -> &Arc<ConsumerStats> {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
