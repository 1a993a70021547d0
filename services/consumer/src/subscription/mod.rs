//! # Subscriptions
//!
//! One [`Subscription`] per (source, symbol, kind), shared by every listener
//! that asked for it. The [`Subscriptions`] arena owns them all and is only
//! touched from the reactor thread; the stream table it allocates from is
//! shared with caller handles for backpressure telemetry.
//!
//! ## Lifecycle
//!
//! ```text
//! Inactive → Subscribing → Live ⇄ Stale
//!     ↑                                 │
//!     └──────────── close ──────────────┘
//! ```
//!
//! ## Delivery rules
//!
//! - The first image goes to every listener as `Initial`.
//! - A refresh asked for by one listener is `Initial` for that listener and
//!   `Recap` for the others, unless recaps are suppressed.
//! - Updates before any image are dropped. Status messages always pass.
//! - Data messages carry a per-subscription sequence starting at zero;
//!   status messages carry zero.

pub mod listeners;
pub mod state;
pub mod throttle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use feed_config::{BookDomain, ConsumerConfig};
use rdm_types::{DataType, DomainType, MsgClass, MsgKey};
use rwf_codec::{msg_flags, CodecError, Msg, MsgBuilder};
use tracing::{debug, warn};

use crate::book::{apply_map, BookAccumulator, MboAccumulator, MbpAccumulator};
use crate::dictionary::Dictionary;
use crate::error::ItemError;
use crate::events::{ItemData, ItemKey, ItemMessage, ItemStatus, MessageType, Quality};
use crate::fields::{decode_fields, DecodeReport, FieldSet};
use crate::source::{DomainHint, SourceRegistry};
use crate::stats::ConsumerStats;
use crate::stream_table::SharedStreamTable;

pub use listeners::{ItemListener, ListenerEntry, ListenerId, ListenerSet};
pub use state::{classify, still_open, StateOutcome, SubscriptionState};
pub use throttle::{FailureReport, FailureThrottle, FAILURE_REPORT_INTERVAL};

/// Arena index of a subscription
pub type SubscriptionId = usize;

/// Wire domain of a subscription, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    MarketPrice,
    MarketByOrder,
    MarketByPrice,
}

/// What the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestKind {
    #[default]
    MarketPrice,
    /// Order book of whichever flavour the symbol prefix, source or config picks
    Book,
    MarketByOrder,
    MarketByPrice,
}

impl SubscriptionKind {
    pub fn domain(self) -> DomainType {
        match self {
            SubscriptionKind::MarketPrice => DomainType::MarketPrice,
            SubscriptionKind::MarketByOrder => DomainType::MarketByOrder,
            SubscriptionKind::MarketByPrice => DomainType::MarketByPrice,
        }
    }

    pub fn is_book(self) -> bool {
        self != SubscriptionKind::MarketPrice
    }

    /// Decide the kind once and return the wire symbol
    ///
    /// For book requests a lowercase `s` prefix selects Market-By-Price and
    /// `b` selects Market-By-Order; the prefix is stripped. Without a prefix
    /// the source's advertised domain wins over the configured default.
    pub fn resolve(
        request: RequestKind,
        symbol: &str,
        hint: DomainHint,
        default_book: BookDomain,
    ) -> (Self, &str) {
        match request {
            RequestKind::MarketPrice => (SubscriptionKind::MarketPrice, symbol),
            RequestKind::MarketByOrder => (SubscriptionKind::MarketByOrder, symbol),
            RequestKind::MarketByPrice => (SubscriptionKind::MarketByPrice, symbol),
            RequestKind::Book => {
                if let Some(rest) = symbol.strip_prefix('s') {
                    return (SubscriptionKind::MarketByPrice, rest);
                }
                if let Some(rest) = symbol.strip_prefix('b') {
                    return (SubscriptionKind::MarketByOrder, rest);
                }
                let kind = match (hint, default_book) {
                    (DomainHint::MarketByOrder, _) => SubscriptionKind::MarketByOrder,
                    (DomainHint::MarketByPrice, _) => SubscriptionKind::MarketByPrice,
                    (_, BookDomain::Mbo) => SubscriptionKind::MarketByOrder,
                    (_, BookDomain::Mbp) => SubscriptionKind::MarketByPrice,
                };
                (kind, symbol)
            }
        }
    }

    fn accumulator(self) -> Option<Box<dyn BookAccumulator>> {
        match self {
            SubscriptionKind::MarketPrice => None,
            SubscriptionKind::MarketByOrder => Some(Box::new(MboAccumulator::new())),
            SubscriptionKind::MarketByPrice => Some(Box::new(MbpAccumulator::new())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    pub suppress_duplicate_recaps: bool,
    pub fake_initial_on_stale_recovery: bool,
    pub default_book_domain: BookDomain,
    pub failure_report_interval: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            suppress_duplicate_recaps: false,
            fake_initial_on_stale_recovery: true,
            default_book_domain: BookDomain::Mbp,
            failure_report_interval: FAILURE_REPORT_INTERVAL,
        }
    }
}

impl SubscriptionSettings {
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            suppress_duplicate_recaps: config.suppress_duplicate_recaps,
            fake_initial_on_stale_recovery: config.fake_initial_on_stale_recovery,
            default_book_domain: config.default_book_domain,
            failure_report_interval: FAILURE_REPORT_INTERVAL,
        }
    }
}

/// One subscribe or snapshot request from a caller
#[derive(Clone)]
pub struct ItemRequest {
    pub listener_id: ListenerId,
    pub source: String,
    pub symbol: String,
    pub kind: RequestKind,
    pub listener: Arc<dyn ItemListener>,
}

impl std::fmt::Debug for ItemRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemRequest")
            .field("listener_id", &self.listener_id)
            .field("source", &self.source)
            .field("symbol", &self.symbol)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Who receives which message type for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fanout {
    All(MessageType),
    /// `Initial` for the requester, `Recap` for everyone else
    Requester(ListenerId),
}

pub struct Subscription {
    id: SubscriptionId,
    key: ItemKey,
    kind: SubscriptionKind,
    service_id: u16,
    state: SubscriptionState,
    quality: Quality,
    stream_id: Option<i32>,
    listeners: ListenerSet,
    snapshot: bool,
    seq: u32,
    got_image: bool,
    refresh_requester: Option<ListenerId>,
    // fan-out of a multi-part image still in progress
    image: Option<Fanout>,
    book: Option<Box<dyn BookAccumulator>>,
    throttle: FailureThrottle,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("stream_id", &self.stream_id)
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl Subscription {
    fn new(
        id: SubscriptionId,
        key: ItemKey,
        kind: SubscriptionKind,
        service_id: u16,
        snapshot: bool,
        throttle_interval: Duration,
    ) -> Self {
        Self {
            id,
            key,
            kind,
            service_id,
            state: SubscriptionState::Inactive,
            quality: Quality::Ok,
            stream_id: None,
            listeners: ListenerSet::new(),
            snapshot,
            seq: 0,
            got_image: false,
            refresh_requester: None,
            image: None,
            book: kind.accumulator(),
            throttle: FailureThrottle::new(throttle_interval),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn service_id(&self) -> u16 {
        self.service_id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn stream_id(&self) -> Option<i32> {
        self.stream_id
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    pub fn has_image(&self) -> bool {
        self.got_image
    }

    /// Live entries in the order book, zero for market price items
    pub fn book_len(&self) -> usize {
        self.book.as_ref().map_or(0, |b| b.len())
    }

    #[cfg(test)]
    pub(crate) fn set_next_seq(&mut self, seq: u32) {
        self.seq = seq;
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    fn request(&self, stream_id: i32) -> Result<Bytes, CodecError> {
        let mut builder = MsgBuilder::request(
            self.kind.domain(),
            stream_id,
            MsgKey::named(self.service_id, &*self.key.symbol),
        );
        if self.snapshot {
            builder = builder.without_flags(msg_flags::STREAMING);
        }
        builder.encode()
    }

    /// Report a quality change to every listener; no-op when unchanged
    fn set_quality(&mut self, quality: Quality, cause: &str) -> bool {
        if self.quality == quality {
            return false;
        }
        self.quality = quality;
        self.notify_quality(cause);
        true
    }

    fn notify_quality(&self, cause: &str) {
        let status = match self.quality {
            Quality::Ok => ItemStatus::Live,
            Quality::Stale => ItemStatus::Stale,
        };
        for (_, listener) in self.listeners.snapshot() {
            listener.on_status(&self.key, status);
            listener.on_quality(&self.key, self.quality, cause);
        }
    }

    fn to_stale(&mut self, cause: &str) {
        self.state = SubscriptionState::Stale;
        self.set_quality(Quality::Stale, cause);
    }

    fn to_live(&mut self, cause: &str) {
        self.state = SubscriptionState::Live;
        self.set_quality(Quality::Ok, cause);
    }

    fn notify_status(&self, status: ItemStatus) {
        for (_, listener) in self.listeners.snapshot() {
            listener.on_status(&self.key, status);
        }
    }

    fn notify_error(&self, error: &ItemError) {
        for (_, listener) in self.listeners.snapshot() {
            listener.on_error(&self.key, error);
        }
    }

    fn deliver(&self, fanout: Fanout, seq: u32, data: ItemData, suppress_recaps: bool) -> usize {
        let book = self.kind.is_book();
        let mut message = ItemMessage {
            key: self.key.clone(),
            seq,
            msg_type: MessageType::Update,
            data,
        };
        let mut delivered = 0;
        for (id, listener) in self.listeners.snapshot() {
            let msg_type = match fanout {
                Fanout::All(t) => t,
                Fanout::Requester(requester) if requester == id => MessageType::Initial,
                Fanout::Requester(_) if suppress_recaps => continue,
                Fanout::Requester(_) => MessageType::Recap,
            };
            message.msg_type = if book { msg_type.for_book() } else { msg_type };
            listener.on_message(&message);
            delivered += 1;
        }
        delivered
    }

    fn decode(
        &mut self,
        msg: &Msg<'_>,
        dictionary: &Dictionary,
        clear: bool,
    ) -> Result<(ItemData, DecodeReport), CodecError> {
        match (msg.container, self.book.as_mut()) {
            (DataType::NoData, _) => Ok((ItemData::Empty, DecodeReport::default())),
            (DataType::Map, Some(book)) => {
                let (message, report) = apply_map(book.as_mut(), dictionary, msg.payload, clear)?;
                Ok((ItemData::Book(message), report))
            }
            (DataType::FieldList, None) => {
                let mut fields = FieldSet::new();
                let report = decode_fields(dictionary, msg.payload, &mut fields)?;
                Ok((ItemData::Fields(fields), report))
            }
            (other, _) => Err(CodecError::unsupported_type(other, "item payload")),
        }
    }

    fn note_failures(&mut self, now: Instant, count: u64, reason: &str, stats: &ConsumerStats) {
        stats
            .decode_failures
            .fetch_add(count, std::sync::atomic::Ordering::Relaxed);
        if let Some(report) = self.throttle.record(now, count) {
            warn!(
                item = %self.key,
                stream_id = ?self.stream_id,
                total = report.total,
                since_last = report.since_last,
                reason,
                "Decode failures"
            );
        }
    }
}

/// Arena of every subscription on the session
pub struct Subscriptions {
    slots: Vec<Option<Subscription>>,
    free: Vec<SubscriptionId>,
    by_listener: HashMap<ListenerId, SubscriptionId>,
    streams: SharedStreamTable<SubscriptionId>,
    settings: SubscriptionSettings,
    stats: Arc<ConsumerStats>,
    pending_closes: usize,
}

impl Subscriptions {
    pub fn new(
        streams: SharedStreamTable<SubscriptionId>,
        settings: SubscriptionSettings,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_listener: HashMap::new(),
            streams,
            settings,
            stats,
            pending_closes: 0,
        }
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    pub fn for_listener(&self, listener: ListenerId) -> Option<&Subscription> {
        self.by_listener.get(&listener).and_then(|id| self.get(*id))
    }

    /// Subscription that owns an item stream
    pub fn by_stream(&self, stream_id: i32) -> Option<SubscriptionId> {
        self.streams.lock().lookup(stream_id)
    }

    pub fn streams(&self) -> &SharedStreamTable<SubscriptionId> {
        &self.streams
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Close messages queued since the last call
    pub fn take_pending_closes(&mut self) -> usize {
        std::mem::take(&mut self.pending_closes)
    }

    pub fn update_gauges(&self) {
        let pending = self.streams.lock().pending_count();
        ConsumerStats::set(&self.stats.pending_opens, pending);
        ConsumerStats::set(&self.stats.open_items, self.len());
        ConsumerStats::set(&self.stats.pending_closes, self.pending_closes);
    }

    fn insert(&mut self, build: impl FnOnce(SubscriptionId) -> Subscription) -> SubscriptionId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(build(id));
                id
            }
            None => {
                let id = self.slots.len();
                self.slots.push(Some(build(id)));
                id
            }
        }
    }

    /// Add a listener to (source, symbol), opening the item if it is new
    ///
    /// Failures are delivered to the listener's `on_error` before returning.
    pub fn subscribe(
        &mut self,
        registry: &mut SourceRegistry,
        request: ItemRequest,
        out: &mut Vec<Bytes>,
    ) -> Result<SubscriptionId, ItemError> {
        let listener = request.listener.clone();
        let key = ItemKey::new(&request.source, &request.symbol);
        self.try_subscribe(registry, request, out).inspect_err(|e| {
            warn!(item = %key, error = %e, "Subscribe failed");
            ConsumerStats::incr(&self.stats.failed);
            listener.on_error(&key, e);
        })
    }

    fn try_subscribe(
        &mut self,
        registry: &mut SourceRegistry,
        request: ItemRequest,
        out: &mut Vec<Bytes>,
    ) -> Result<SubscriptionId, ItemError> {
        if self.by_listener.contains_key(&request.listener_id) {
            return Err(ItemError::BadSymbol {
                reason: format!("listener {:?} is already subscribed", request.listener_id),
            });
        }
        let source = registry
            .find_by_name(&request.source)
            .ok_or_else(|| ItemError::BadSymbol {
                reason: format!("unknown source {}", request.source),
            })?;
        let (kind, symbol) = SubscriptionKind::resolve(
            request.kind,
            &request.symbol,
            source.hint(),
            self.settings.default_book_domain,
        );
        if symbol.is_empty() {
            return Err(ItemError::BadSymbol {
                reason: "empty symbol".into(),
            });
        }
        let service_id = source.id();

        if let Some(existing) = source.item(symbol, kind) {
            let Some(sub) = self.get_mut(existing) else {
                return Err(ItemError::BadSymbol {
                    reason: format!("stale registry entry for {}", symbol),
                });
            };
            sub.listeners.add(request.listener_id, request.listener);
            let needs_image = sub.got_image && sub.state != SubscriptionState::Inactive;
            self.by_listener.insert(request.listener_id, existing);
            debug!(item = %request.source, symbol, listeners = self.get(existing).map_or(0, |s| s.listener_count()), "Sharing subscription");
            if needs_image {
                self.send_refresh(existing, request.listener_id, out)?;
            }
            return Ok(existing);
        }

        let key = ItemKey::new(&request.source, symbol);
        let interval = self.settings.failure_report_interval;
        let id = self.insert(|id| Subscription::new(id, key.clone(), kind, service_id, false, interval));
        if let Some(sub) = self.get_mut(id) {
            sub.listeners.add(request.listener_id, request.listener);
        }
        self.by_listener.insert(request.listener_id, id);
        registry.register_item(service_id, key.symbol.clone(), kind, id);

        if let Err(e) = self.open(id, out) {
            self.teardown(id, registry, None);
            return Err(e);
        }
        Ok(id)
    }

    /// One-shot non-streaming request delivered only to the requester
    pub fn snapshot(
        &mut self,
        registry: &SourceRegistry,
        request: ItemRequest,
        out: &mut Vec<Bytes>,
    ) -> Result<SubscriptionId, ItemError> {
        let listener = request.listener.clone();
        let key = ItemKey::new(&request.source, &request.symbol);
        self.try_snapshot(registry, request, out).inspect_err(|e| {
            warn!(item = %key, error = %e, "Snapshot failed");
            ConsumerStats::incr(&self.stats.failed);
            listener.on_error(&key, e);
        })
    }

    fn try_snapshot(
        &mut self,
        registry: &SourceRegistry,
        request: ItemRequest,
        out: &mut Vec<Bytes>,
    ) -> Result<SubscriptionId, ItemError> {
        let source = registry
            .find_by_name(&request.source)
            .ok_or_else(|| ItemError::BadSymbol {
                reason: format!("unknown source {}", request.source),
            })?;
        let (kind, symbol) = SubscriptionKind::resolve(
            request.kind,
            &request.symbol,
            source.hint(),
            self.settings.default_book_domain,
        );
        if symbol.is_empty() {
            return Err(ItemError::BadSymbol {
                reason: "empty symbol".into(),
            });
        }
        let key = ItemKey::new(&request.source, symbol);
        let service_id = source.id();
        let interval = self.settings.failure_report_interval;
        let id = self.insert(|id| Subscription::new(id, key, kind, service_id, true, interval));
        if let Some(sub) = self.get_mut(id) {
            sub.listeners.add(request.listener_id, request.listener);
        }
        if let Err(e) = self.open(id, out) {
            self.discard(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Remove one listener; the item is closed when none remain
    pub fn unsubscribe(
        &mut self,
        registry: &mut SourceRegistry,
        listener: ListenerId,
        out: &mut Vec<Bytes>,
    ) -> bool {
        let Some(id) = self.by_listener.remove(&listener) else {
            debug!(listener = ?listener, "Unsubscribe for unknown listener");
            return false;
        };
        let empty = match self.get_mut(id) {
            Some(sub) => {
                sub.listeners.remove(listener);
                if sub.refresh_requester == Some(listener) {
                    sub.refresh_requester = None;
                }
                sub.listeners.is_empty()
            }
            None => return false,
        };
        if empty {
            self.close(id, registry, out);
        }
        true
    }

    /// Ask for a fresh image on the listener's existing stream
    pub fn refresh(&mut self, listener: ListenerId, out: &mut Vec<Bytes>) -> Result<(), ItemError> {
        let id = *self.by_listener.get(&listener).ok_or_else(|| ItemError::BadSymbol {
            reason: format!("listener {:?} has no subscription", listener),
        })?;
        self.send_refresh(id, listener, out)
    }

    fn send_refresh(
        &mut self,
        id: SubscriptionId,
        requester: ListenerId,
        out: &mut Vec<Bytes>,
    ) -> Result<(), ItemError> {
        let Some(sub) = self.get_mut(id) else {
            return Ok(());
        };
        let Some(stream_id) = sub.stream_id else {
            return Ok(());
        };
        if sub.state == SubscriptionState::Subscribing {
            // the first image will reach every listener anyway
            return Ok(());
        }
        let bytes = sub.request(stream_id).map_err(|e| ItemError::BadSymbol {
            reason: e.to_string(),
        })?;
        sub.refresh_requester = Some(requester);
        debug!(item = %sub.key, stream_id, requester = ?requester, "Requesting refresh");
        out.push(bytes);
        Ok(())
    }

    /// Inactive → Subscribing: take a stream and queue the request
    fn open(&mut self, id: SubscriptionId, out: &mut Vec<Bytes>) -> Result<(), ItemError> {
        let Some(sub) = self.slots.get_mut(id).and_then(Option::as_mut) else {
            return Ok(());
        };
        if sub.state != SubscriptionState::Inactive {
            return Ok(());
        }
        Self::send_open(sub, &self.streams, &self.stats, out)
    }

    fn send_open(
        sub: &mut Subscription,
        streams: &SharedStreamTable<SubscriptionId>,
        stats: &ConsumerStats,
        out: &mut Vec<Bytes>,
    ) -> Result<(), ItemError> {
        let mut table = streams.lock();
        let (stream_id, allocated) = match sub.stream_id {
            Some(stream_id) => (stream_id, false),
            None => (table.allocate(sub.id)?, true),
        };
        let bytes = match sub.request(stream_id) {
            Ok(bytes) => bytes,
            Err(e) => {
                if allocated {
                    table.release(stream_id);
                }
                return Err(ItemError::BadSymbol {
                    reason: e.to_string(),
                });
            }
        };
        table.mark_pending(stream_id);
        drop(table);

        sub.stream_id = Some(stream_id);
        sub.state = SubscriptionState::Subscribing;
        sub.got_image = false;
        sub.image = None;
        sub.refresh_requester = None;
        ConsumerStats::incr(&stats.subscribed);
        debug!(item = %sub.key, stream_id, kind = ?sub.kind, snapshot = sub.snapshot, "Opening item");
        out.push(bytes);
        Ok(())
    }

    /// Send a close and forget the subscription
    pub fn close(&mut self, id: SubscriptionId, registry: &mut SourceRegistry, out: &mut Vec<Bytes>) {
        if self.teardown(id, registry, Some(out)).is_some() {
            ConsumerStats::incr(&self.stats.closed);
        }
    }

    /// Remove a subscription from the arena, the registry and the stream table
    fn teardown(
        &mut self,
        id: SubscriptionId,
        registry: &mut SourceRegistry,
        out: Option<&mut Vec<Bytes>>,
    ) -> Option<Subscription> {
        let sub = self.discard(id)?;
        if !sub.snapshot {
            registry.unregister_item(sub.service_id, &sub.key.symbol, sub.kind, id);
        }
        if let (Some(stream_id), Some(out)) = (sub.stream_id, out) {
            match MsgBuilder::close(sub.kind.domain(), stream_id).encode() {
                Ok(bytes) => {
                    out.push(bytes);
                    self.pending_closes += 1;
                }
                Err(e) => warn!(item = %sub.key, stream_id, error = %e, "Failed to encode close"),
            }
        }
        Some(sub)
    }

    /// Free the arena slot, listener index and stream id
    fn discard(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let mut sub = self.slots.get_mut(id)?.take()?;
        self.free.push(id);
        for listener in sub.listeners.ids() {
            if self.by_listener.get(&listener) == Some(&id) {
                self.by_listener.remove(&listener);
            }
        }
        if let Some(stream_id) = sub.stream_id {
            self.streams.lock().release(stream_id);
        }
        sub.state = SubscriptionState::Inactive;
        Some(sub)
    }

    /// Deliver an item error and drop the subscription
    ///
    /// `close` carries the outbox when the provider still holds the stream
    /// open; the close must precede any reuse of the stream id.
    fn fail(
        &mut self,
        id: SubscriptionId,
        error: ItemError,
        registry: &mut SourceRegistry,
        close: Option<&mut Vec<Bytes>>,
    ) {
        if let Some(sub) = self.teardown(id, registry, close) {
            warn!(item = %sub.key, stream_id = ?sub.stream_id, error = %error, "Item failed");
            ConsumerStats::incr(&self.stats.failed);
            sub.notify_error(&error);
        }
    }

    /// Route one item-stream message to its subscription
    pub fn process_response(
        &mut self,
        id: SubscriptionId,
        msg: &Msg<'_>,
        dictionary: &Dictionary,
        registry: &mut SourceRegistry,
        out: &mut Vec<Bytes>,
        now: Instant,
    ) {
        let Some(sub) = self.get(id) else {
            debug!(stream_id = msg.stream_id, "No subscription for stream");
            return;
        };
        if sub.state == SubscriptionState::Inactive {
            debug!(item = %sub.key, stream_id = msg.stream_id, "Discarding response for closed item");
            return;
        }
        match msg.class() {
            MsgClass::Refresh => self.on_refresh(id, msg, dictionary, registry, out, now),
            MsgClass::Update => self.on_update(id, msg, dictionary, registry, now),
            MsgClass::Status => self.on_status(id, msg, registry, out),
            other => debug!(stream_id = msg.stream_id, class = ?other, "Unhandled item message class"),
        }
    }

    /// Apply a non-error state outcome; returns whether a snapshot completed
    fn apply_outcome(&mut self, id: SubscriptionId, outcome: StateOutcome) -> bool {
        let stats = self.stats.clone();
        let Some(sub) = self.get_mut(id) else {
            return false;
        };
        match outcome {
            StateOutcome::Stale { text } => sub.to_stale(&text),
            StateOutcome::Recovered { text } => sub.to_live(&text),
            StateOutcome::FirstLive => {
                sub.to_live("");
                ConsumerStats::incr(&stats.succeeded);
            }
            StateOutcome::Anomaly { reason } => {
                warn!(item = %sub.key, stream_id = ?sub.stream_id, reason, "Unexpected item state");
                ConsumerStats::incr(&stats.failed);
            }
            StateOutcome::SnapshotComplete => return true,
            StateOutcome::NoChange | StateOutcome::Error(_) => {}
        }
        false
    }

    fn on_refresh(
        &mut self,
        id: SubscriptionId,
        msg: &Msg<'_>,
        dictionary: &Dictionary,
        registry: &mut SourceRegistry,
        out: &mut Vec<Bytes>,
        now: Instant,
    ) {
        self.streams.lock().clear_pending(msg.stream_id);
        let Some(sub) = self.get(id) else { return };
        let state = msg.state();
        let outcome = match state {
            Some(state) => classify(state, sub.state, sub.snapshot),
            None => StateOutcome::NoChange,
        };
        if let StateOutcome::Error(error) = outcome {
            let close = state.is_some_and(still_open).then_some(out);
            self.fail(id, error, registry, close);
            return;
        }
        let snapshot_answered = self.apply_outcome(id, outcome);

        let suppress = self.settings.suppress_duplicate_recaps;
        let stats = self.stats.clone();
        let Some(sub) = self.get_mut(id) else { return };
        let first_part = sub.image.is_none();
        let fanout = match sub.image {
            Some(fanout) => fanout,
            None => match sub.refresh_requester {
                Some(requester) if msg.is_solicited() && sub.got_image => Fanout::Requester(requester),
                _ if !sub.got_image => Fanout::All(MessageType::Initial),
                _ => Fanout::All(MessageType::Recap),
            },
        };
        let clear = msg.clears_cache() || (first_part && !sub.got_image);
        match sub.decode(msg, dictionary, clear) {
            Ok((data, report)) => {
                if report.failures > 0 {
                    let reason = report.last_error.as_deref().unwrap_or("field decode failure");
                    sub.note_failures(now, report.failures as u64, reason, &stats);
                }
                let seq = sub.next_seq();
                let delivered = sub.deliver(fanout, seq, data, suppress);
                stats
                    .messages_delivered
                    .fetch_add(delivered as u64, std::sync::atomic::Ordering::Relaxed);
                sub.got_image = true;
            }
            Err(e) => sub.note_failures(now, 1, &e.to_string(), &stats),
        }
        if msg.is_complete() {
            sub.image = None;
            if matches!(fanout, Fanout::Requester(_)) {
                sub.refresh_requester = None;
            }
        } else {
            sub.image = Some(fanout);
        }

        if sub.snapshot && (snapshot_answered || msg.is_complete()) {
            self.finish_snapshot(id, registry);
        }
    }

    fn on_update(
        &mut self,
        id: SubscriptionId,
        msg: &Msg<'_>,
        dictionary: &Dictionary,
        registry: &SourceRegistry,
        now: Instant,
    ) {
        let fake_initial = self.settings.fake_initial_on_stale_recovery;
        let stats = self.stats.clone();
        let Some(sub) = self.get_mut(id) else { return };
        if registry.is_paused(sub.service_id) {
            return;
        }
        let mut fanout = Fanout::All(MessageType::Update);
        if sub.state == SubscriptionState::Stale {
            // an update with no state means the data is flowing again
            sub.to_live("");
            if fake_initial {
                fanout = Fanout::All(MessageType::Initial);
            }
        }
        if !sub.got_image && fanout == Fanout::All(MessageType::Update) {
            debug!(item = %sub.key, stream_id = msg.stream_id, "Dropping update before image");
            return;
        }
        match sub.decode(msg, dictionary, false) {
            Ok((data, report)) => {
                if report.failures > 0 {
                    let reason = report.last_error.as_deref().unwrap_or("field decode failure");
                    sub.note_failures(now, report.failures as u64, reason, &stats);
                }
                let seq = sub.next_seq();
                let delivered = sub.deliver(fanout, seq, data, false);
                stats
                    .messages_delivered
                    .fetch_add(delivered as u64, std::sync::atomic::Ordering::Relaxed);
                sub.got_image = true;
            }
            Err(e) => sub.note_failures(now, 1, &e.to_string(), &stats),
        }
    }

    fn on_status(
        &mut self,
        id: SubscriptionId,
        msg: &Msg<'_>,
        registry: &mut SourceRegistry,
        out: &mut Vec<Bytes>,
    ) {
        let mut snapshot_answered = false;
        if let Some(state) = msg.state() {
            self.streams.lock().clear_pending(msg.stream_id);
            let Some(sub) = self.get(id) else { return };
            let outcome = classify(state, sub.state, sub.snapshot);
            if let StateOutcome::Error(error) = outcome {
                let close = still_open(state).then_some(out);
                self.fail(id, error, registry, close);
                return;
            }
            snapshot_answered = self.apply_outcome(id, outcome);
        }
        if let Some(sub) = self.get(id) {
            sub.deliver(Fanout::All(MessageType::Status), 0, ItemData::Empty, false);
        }
        if snapshot_answered {
            self.finish_snapshot(id, registry);
        }
    }

    fn finish_snapshot(&mut self, id: SubscriptionId, registry: &mut SourceRegistry) {
        // the provider closes a non-streaming stream itself
        if let Some(sub) = self.teardown(id, registry, None) {
            ConsumerStats::incr(&self.stats.succeeded);
            debug!(item = %sub.key, "Snapshot complete");
            sub.notify_status(ItemStatus::SnapshotComplete);
        }
    }

    /// Source went down: items go Stale, streams stay open
    pub fn mark_stale(&mut self, ids: &[SubscriptionId], cause: &str) {
        for id in ids {
            if let Some(sub) = self.get_mut(*id) {
                if sub.state == SubscriptionState::Live {
                    sub.state = SubscriptionState::Stale;
                }
                sub.set_quality(Quality::Stale, cause);
            }
        }
    }

    /// Source came back: items are forced Live and told so
    pub fn mark_live(&mut self, ids: &[SubscriptionId], cause: &str) {
        for id in ids {
            if let Some(sub) = self.get_mut(*id) {
                match sub.state {
                    SubscriptionState::Stale | SubscriptionState::Live => {
                        sub.state = SubscriptionState::Live;
                        sub.quality = Quality::Ok;
                        sub.notify_quality(cause);
                    }
                    SubscriptionState::Subscribing => {
                        sub.set_quality(Quality::Ok, cause);
                    }
                    SubscriptionState::Inactive => {}
                }
            }
        }
    }

    /// Re-request every given item on its existing stream after a reconnect
    pub fn reopen(&mut self, ids: &[SubscriptionId], registry: &mut SourceRegistry, out: &mut Vec<Bytes>) {
        for id in ids {
            let Some(sub) = self.slots.get_mut(*id).and_then(Option::as_mut) else {
                continue;
            };
            if let Err(e) = Self::send_open(sub, &self.streams, &self.stats, out) {
                self.fail(*id, e, registry, None);
            }
        }
    }

    /// Connection lost: one-shot requests cannot be recovered
    pub fn abandon_snapshots(&mut self, registry: &mut SourceRegistry) {
        let ids: Vec<_> = self.iter().filter(|s| s.snapshot).map(|s| s.id).collect();
        for id in ids {
            self.fail(
                id,
                ItemError::Timeout {
                    text: "connection lost before snapshot completed".into(),
                },
                registry,
                None,
            );
        }
    }

    /// Close every item; used on shutdown
    pub fn close_all(&mut self, registry: &mut SourceRegistry, out: &mut Vec<Bytes>) {
        let ids: Vec<_> = self.iter().map(|s| s.id).collect();
        for id in ids {
            self.close(id, registry, out);
        }
    }
}
