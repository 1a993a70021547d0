//! # Session
//!
//! The session is split in two. [`SessionCore`] is the whole protocol state
//! machine with no I/O: it consumes decoded wire messages, caller requests
//! and clock ticks, and produces outbound message bytes and connection
//! events. [`reactor::Session`] owns the socket and drives the core on a
//! dedicated thread.
//!
//! ## Handshake
//!
//! ```text
//! Unconnected → Connecting → LoggingIn → RequestingSourceDirectory
//!                   ↑                              ↓
//!                   │                     RequestingDictionary → Live
//!                   └──────── transport loss (recovering) ───────┘
//! ```
//!
//! The dictionary stage is skipped when both halves are already loaded from
//! files or from an earlier connection. Reaching Live the first time fires
//! [`ConnectionEvent::Complete`]; every later arrival re-requests all known
//! items and fires [`ConnectionEvent::Reconnected`].

pub mod reactor;
pub mod reconnect;
pub mod requests;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use feed_config::ConsumerConfig;
use rdm_types::{
    DataType, DomainType, FieldValue, MsgClass, MsgKey, StateCode, LOGIN_STREAM_ID,
};
use rwf_codec::{
    decode_element_list, decode_msg, find_element, login_attrib, msg_flags, nak_code,
    ElementListBuilder, Msg, MsgBuilder, MsgHeader, NAME_TYPE_USER_NAME,
};
use tracing::{debug, info, warn};

use crate::dictionary::{Dictionary, DictionaryEvent};
use crate::error::{Result, SessionError};
use crate::events::{ConnectionEvent, ItemKey};
use crate::post::{PostCorrelator, PostOutcome, PostTarget};
use crate::source::{directory_request, SourceRegistry, SourceTransition};
use crate::stats::ConsumerStats;
use crate::stream_table::{SharedStreamTable, StreamTable};
use crate::subscription::{SubscriptionId, SubscriptionKind, SubscriptionSettings, Subscriptions};

pub use reactor::Session;
pub use reconnect::{Attempt, ReconnectPolicy};
pub use requests::{PostRequest, SessionHandle, SessionRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unconnected,
    Connecting,
    LoggingIn,
    RequestingSourceDirectory,
    RequestingDictionary,
    Live,
}

impl SessionState {
    fn in_handshake(self) -> bool {
        matches!(
            self,
            SessionState::LoggingIn
                | SessionState::RequestingSourceDirectory
                | SessionState::RequestingDictionary
        )
    }
}

/// What the reactor must do after a timer check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    None,
    SendPing,
    /// Nothing received for the whole ping timeout
    Timeout,
}

/// Requests the reactor handles itself instead of queueing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Recover { reason: String },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct Liveness {
    timeout: Duration,
    ping_interval: Duration,
    last_received: Instant,
    last_sent: Instant,
}

impl Liveness {
    fn new(now: Instant, timeout: Duration) -> Self {
        Self {
            timeout,
            ping_interval: timeout / 3,
            last_received: now,
            last_sent: now,
        }
    }
}

pub struct SessionCore {
    config: ConsumerConfig,
    state: SessionState,
    completed_once: bool,
    recovering: bool,
    registry: SourceRegistry,
    subs: Subscriptions,
    dictionary: Dictionary,
    posts: PostCorrelator<PostTarget>,
    post_supported: bool,
    outbox: Vec<Bytes>,
    events: Vec<ConnectionEvent>,
    requests: VecDeque<SessionRequest>,
    liveness: Option<Liveness>,
    stats: Arc<ConsumerStats>,
}

impl SessionCore {
    /// Build the core and load any configured dictionary files
    pub fn new(config: ConsumerConfig, stats: Arc<ConsumerStats>) -> Result<Self> {
        let mut dictionary = Dictionary::new();
        dictionary
            .load_from_files(
                config.field_dictionary_path.as_deref(),
                config.enum_dictionary_path.as_deref(),
            )
            .map_err(|e| SessionError::DictionaryFailed {
                reason: e.to_string(),
            })?;
        let streams = StreamTable::shared(config.stream_capacity);
        let subs = Subscriptions::new(streams, SubscriptionSettings::from_config(&config), stats.clone());
        Ok(Self {
            config,
            state: SessionState::Unconnected,
            completed_once: false,
            recovering: false,
            registry: SourceRegistry::new(),
            subs,
            dictionary,
            posts: PostCorrelator::new(),
            post_supported: false,
            outbox: Vec::new(),
            events: Vec::new(),
            requests: VecDeque::new(),
            liveness: None,
            stats,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == SessionState::Live
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SourceRegistry {
        &mut self.registry
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subs
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn posts(&self) -> &PostCorrelator<PostTarget> {
        &self.posts
    }

    pub fn post_supported(&self) -> bool {
        self.post_supported
    }

    pub fn streams(&self) -> &SharedStreamTable<SubscriptionId> {
        self.subs.streams()
    }

    pub fn stats(&self) -> &Arc<ConsumerStats> {
        &self.stats
    }

    pub fn queued_requests(&self) -> usize {
        self.requests.len()
    }

    /// Begin connecting; `false` selects pass-through mode (no hosts)
    pub fn start(&mut self) -> bool {
        if self.config.hosts.is_empty() {
            info!("No hosts configured; session stays unconnected");
            return false;
        }
        self.state = SessionState::Connecting;
        true
    }

    /// Transport is up: send the login request
    pub fn on_connected(&mut self, now: Instant, ping_timeout: Duration) -> Result<()> {
        self.liveness = Some(Liveness::new(now, ping_timeout));
        self.state = SessionState::LoggingIn;
        self.outbox.clear();
        self.outbox.push(self.login_request()?);
        debug!(ping_timeout_ms = ping_timeout.as_millis() as u64, "Requesting login");
        Ok(())
    }

    fn login_request(&self) -> Result<Bytes> {
        let mut attrib = ElementListBuilder::new();
        attrib
            .add(
                login_attrib::APPLICATION_ID,
                &FieldValue::Ascii(self.config.application_id.clone()),
            )?
            .add(login_attrib::POSITION, &FieldValue::Ascii(self.config.position.clone()))?
            .add(login_attrib::ROLE, &FieldValue::UInt(login_attrib::ROLE_CONSUMER))?
            .add(login_attrib::SUPPORT_OMM_POST, &FieldValue::UInt(1))?;
        let key = MsgKey {
            name: Some(self.config.user_name.clone()),
            name_type: Some(NAME_TYPE_USER_NAME),
            ..MsgKey::default()
        }
        .with_attrib(DataType::ElementList, attrib.finish().to_vec());
        Ok(MsgBuilder::request(DomainType::Login, LOGIN_STREAM_ID, key).encode()?)
    }

    /// Anything arrived from the server, pings included
    pub fn note_received(&mut self, now: Instant) {
        if let Some(liveness) = self.liveness.as_mut() {
            liveness.last_received = now;
        }
    }

    /// Bytes went out; they count as a ping
    pub fn note_sent(&mut self, now: Instant) {
        if let Some(liveness) = self.liveness.as_mut() {
            liveness.last_sent = now;
        }
    }

    /// Interval between client pings; zero while disconnected
    pub fn ping_interval(&self) -> Duration {
        self.liveness.map_or(Duration::ZERO, |l| l.ping_interval)
    }

    /// How long one read pass may run before pings and writes get a turn
    pub fn read_budget(&self) -> Duration {
        self.ping_interval() / 2
    }

    pub fn poll_timers(&mut self, now: Instant) -> TimerAction {
        let Some(liveness) = self.liveness.as_mut() else {
            return TimerAction::None;
        };
        if now.saturating_duration_since(liveness.last_received) >= liveness.timeout {
            return TimerAction::Timeout;
        }
        if now.saturating_duration_since(liveness.last_sent) >= liveness.ping_interval {
            liveness.last_sent = now;
            return TimerAction::SendPing;
        }
        TimerAction::None
    }

    /// Ping timeout as a session error, for logging and events
    pub fn ping_timeout_error(&self) -> SessionError {
        SessionError::PingTimeout {
            timeout_ms: self.liveness.map_or(0, |l| l.timeout.as_millis() as u64),
        }
    }

    /// Decode and route one RWF message
    ///
    /// Undecodable frames are logged and skipped. An `Err` ends the current
    /// connection attempt; the matching event has already been queued.
    pub fn on_message(&mut self, now: Instant, bytes: &[u8]) -> Result<()> {
        self.note_received(now);
        let msg = match decode_msg(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable message");
                ConsumerStats::incr(&self.stats.decode_failures);
                return Ok(());
            }
        };

        if msg.class() == MsgClass::Ack {
            self.on_ack(&msg);
            return Ok(());
        }

        match msg.domain {
            DomainType::Login => self.on_login(&msg),
            DomainType::Source => self.on_directory(&msg),
            DomainType::Dictionary => self.on_dictionary(&msg),
            DomainType::MarketPrice | DomainType::MarketByOrder | DomainType::MarketByPrice => {
                match self.subs.by_stream(msg.stream_id) {
                    Some(id) => self.subs.process_response(
                        id,
                        &msg,
                        &self.dictionary,
                        &mut self.registry,
                        &mut self.outbox,
                        now,
                    ),
                    None => debug!(
                        stream_id = msg.stream_id,
                        class = ?msg.class(),
                        "Message for unknown item stream"
                    ),
                }
                Ok(())
            }
            other => {
                debug!(domain = ?other, stream_id = msg.stream_id, "Unhandled domain");
                Ok(())
            }
        }
    }

    fn fail(&mut self, error: SessionError) -> Result<()> {
        let event = match &error {
            SessionError::LoginFailed {
                reason,
                recoverable,
            } => ConnectionEvent::LoginFailed {
                reason: reason.clone(),
                recoverable: *recoverable,
            },
            SessionError::DirectoryFailed { reason } => ConnectionEvent::DirectoryFailed {
                reason: reason.clone(),
            },
            SessionError::DictionaryFailed { reason } => ConnectionEvent::DictionaryFailed {
                reason: reason.clone(),
            },
            _ => return Err(error),
        };
        warn!(state = ?self.state, "{}", event);
        self.events.push(event);
        Err(error)
    }

    fn on_login(&mut self, msg: &Msg<'_>) -> Result<()> {
        let Some(state) = msg.state() else {
            debug!(class = ?msg.class(), "Login message without state");
            return Ok(());
        };
        if state.is_closed() {
            return self.fail(SessionError::LoginFailed {
                reason: state.to_string(),
                recoverable: state.code != StateCode::NotEntitled,
            });
        }
        if msg.class() != MsgClass::Refresh {
            if state.is_suspect() {
                warn!(state = %state, "Login stream suspect");
            }
            return Ok(());
        }

        self.post_supported = msg
            .key()
            .and_then(|key| key.attrib.as_ref())
            .filter(|(container, _)| *container == DataType::ElementList)
            .and_then(|(_, bytes)| {
                let elements = decode_element_list(bytes).ok()?;
                let support = find_element(&elements, login_attrib::SUPPORT_OMM_POST)?;
                rwf_codec::primitive::decode_uint(support.data).ok().flatten()
            })
            .is_some_and(|v| v == 1);

        if self.state == SessionState::LoggingIn && msg.is_solicited() && state.is_ok() {
            info!(user = %self.config.user_name, post = self.post_supported, "Login accepted");
            self.state = SessionState::RequestingSourceDirectory;
            self.outbox.push(directory_request()?);
        }
        Ok(())
    }

    fn on_directory(&mut self, msg: &Msg<'_>) -> Result<()> {
        if let Some(state) = msg.state() {
            if state.is_closed() {
                if self.state == SessionState::RequestingSourceDirectory {
                    return self.fail(SessionError::DirectoryFailed {
                        reason: state.to_string(),
                    });
                }
                warn!(state = %state, "Source directory stream closed");
                return Ok(());
            }
        }
        if !matches!(msg.class(), MsgClass::Refresh | MsgClass::Update) {
            return Ok(());
        }

        match self.registry.process_directory(msg) {
            Ok(transitions) => {
                for (service, transition) in transitions {
                    match transition {
                        SourceTransition::WentDown { items } => {
                            info!(service, items = items.len(), "Service down");
                            self.subs.mark_stale(&items, "service down");
                        }
                        SourceTransition::WentUp { items } => {
                            info!(service, items = items.len(), "Service up");
                            self.subs.mark_live(&items, "service up");
                        }
                        SourceTransition::Unchanged => {}
                    }
                }
            }
            Err(e) if self.state == SessionState::RequestingSourceDirectory => {
                return self.fail(SessionError::DirectoryFailed {
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(error = %e, "Skipping malformed directory update"),
        }

        if self.state == SessionState::RequestingSourceDirectory
            && msg.class() == MsgClass::Refresh
            && msg.is_complete()
        {
            info!(services = self.registry.len(), "Source directory received");
            return self.after_directory();
        }
        Ok(())
    }

    fn after_directory(&mut self) -> Result<()> {
        if self.dictionary.is_complete() {
            self.go_live();
            return Ok(());
        }
        self.state = SessionState::RequestingDictionary;
        let service = match &self.config.dictionary_service {
            Some(name) => self.registry.find_by_name(name),
            None => self.registry.first_up(),
        };
        let Some(service_id) = service.map(|s| s.id()) else {
            return self.fail(SessionError::DictionaryFailed {
                reason: "no service available to request the dictionary from".into(),
            });
        };
        let requests = self.dictionary.requests(service_id)?;
        debug!(service_id, requests = requests.len(), "Requesting dictionary");
        self.outbox.extend(requests);
        Ok(())
    }

    fn on_dictionary(&mut self, msg: &Msg<'_>) -> Result<()> {
        let handshake = self.state == SessionState::RequestingDictionary;
        match self.dictionary.process_wire_response(msg) {
            Ok(Some(DictionaryEvent::Failed { reason })) => {
                self.dictionary.notify_listeners(false);
                if handshake {
                    return self.fail(SessionError::DictionaryFailed { reason });
                }
                warn!(reason, "Dictionary request failed");
            }
            Ok(Some(event)) => {
                debug!(event = ?event, "Dictionary half complete");
                if self.dictionary.is_complete() {
                    info!(
                        fields = self.dictionary.field_count(),
                        enums = self.dictionary.enum_count(),
                        "Dictionary complete"
                    );
                    self.dictionary.notify_listeners(true);
                    if handshake {
                        self.go_live();
                    }
                }
            }
            Ok(None) => {}
            Err(e) if handshake => {
                return self.fail(SessionError::DictionaryFailed {
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(error = %e, "Skipping dictionary response"),
        }
        Ok(())
    }

    fn go_live(&mut self) {
        self.state = SessionState::Live;
        self.recovering = false;
        if !self.completed_once {
            self.completed_once = true;
            info!(services = self.registry.len(), "Session live");
            self.events.push(ConnectionEvent::Complete);
            return;
        }
        let items = self.registry.resubscribe_all();
        info!(items = items.len(), "Session recovered; re-requesting items");
        self.subs.reopen(&items, &mut self.registry, &mut self.outbox);
        ConsumerStats::incr(&self.stats.reconnects);
        self.events.push(ConnectionEvent::Reconnected);
    }

    fn on_ack(&mut self, msg: &Msg<'_>) {
        let MsgHeader::Ack {
            ack_id,
            nak_code: nak,
            ref text,
        } = msg.header
        else {
            return;
        };
        let Some(target) = self.posts.remove(ack_id) else {
            return;
        };
        let outcome = match nak {
            Some(code) => {
                ConsumerStats::incr(&self.stats.naks);
                PostOutcome::Nak {
                    code,
                    text: text.clone().unwrap_or_default(),
                }
            }
            None => {
                ConsumerStats::incr(&self.stats.acks);
                PostOutcome::Ack
            }
        };
        debug!(ack_id, stream_id = msg.stream_id, outcome = ?outcome, "Post acknowledged");
        target.complete(ack_id, outcome);
    }

    /// Transport gone; items go Stale and wait for the next Live
    pub fn on_connection_lost(&mut self, reason: &str) {
        let was_live = self.state == SessionState::Live;
        if was_live || self.state.in_handshake() {
            warn!(reason, state = ?self.state, "Connection lost");
        }
        self.state = if self.config.hosts.is_empty() {
            SessionState::Unconnected
        } else {
            SessionState::Connecting
        };
        self.liveness = None;
        self.outbox.clear();
        self.dictionary.reset_requests();
        self.streams().lock().reset_pending();

        let items = self.registry.set_all_stale();
        self.subs.mark_stale(&items, "connection lost");
        self.subs.abandon_snapshots(&mut self.registry);
        if was_live {
            self.recovering = true;
            self.events.push(ConnectionEvent::Lost {
                reason: reason.to_string(),
            });
        }
    }

    /// Connect attempt failed before the transport came up
    pub fn on_connect_failed(&mut self, host: &str, reason: &str) {
        warn!(host, reason, "Connection attempt failed");
        self.events.push(ConnectionEvent::ConnectionFailed {
            host: host.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Queue a caller request; control requests are handed back
    pub fn enqueue(&mut self, request: SessionRequest) -> Option<Control> {
        match request {
            SessionRequest::Shutdown => Some(Control::Shutdown),
            SessionRequest::Recover { reason } => Some(Control::Recover { reason }),
            other => {
                self.requests.push_back(other);
                ConsumerStats::set(&self.stats.request_queue_len, self.requests.len());
                None
            }
        }
    }

    /// Whether queued requests may run now
    fn can_dispatch(&self) -> bool {
        matches!(self.state, SessionState::Live | SessionState::Unconnected)
    }

    /// Run queued requests, bounded per cycle and by unanswered opens
    ///
    /// Returns how many requests ran.
    pub fn dispatch_requests(&mut self) -> usize {
        if !self.can_dispatch() {
            return 0;
        }
        let mut dispatched = 0;
        while dispatched < self.config.max_dispatch_per_cycle {
            let Some(front) = self.requests.front() else {
                break;
            };
            if front.opens_stream()
                && self.streams().lock().pending_count() >= self.config.max_pending_opens
            {
                debug!(queued = self.requests.len(), "Pending-open limit reached; deferring requests");
                break;
            }
            let Some(request) = self.requests.pop_front() else {
                break;
            };
            self.handle_request(request);
            dispatched += 1;
        }
        ConsumerStats::set(&self.stats.request_queue_len, self.requests.len());
        self.subs.update_gauges();
        dispatched
    }

    fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Subscribe(item) => {
                // failures reach the listener's on_error
                let _ = self.subs.subscribe(&mut self.registry, item, &mut self.outbox);
            }
            SessionRequest::Snapshot(item) => {
                let _ = self.subs.snapshot(&self.registry, item, &mut self.outbox);
            }
            SessionRequest::Unsubscribe { id } => {
                self.subs.unsubscribe(&mut self.registry, id, &mut self.outbox);
            }
            SessionRequest::Refresh { id } => {
                if let Err(e) = self.subs.refresh(id, &mut self.outbox) {
                    debug!(listener = ?id, error = %e, "Refresh ignored");
                }
            }
            SessionRequest::Post(post) => self.post(post),
            SessionRequest::RequestDictionary { listener } => {
                if self.dictionary.is_complete() {
                    listener.on_dictionary(true);
                }
                self.dictionary.add_listener(listener);
            }
            SessionRequest::Recover { .. } | SessionRequest::Shutdown => {}
        }
    }

    fn post(&mut self, request: PostRequest) {
        let target = PostTarget {
            poster: request.poster,
            key: ItemKey::new(&request.source, &request.symbol),
            reply: request.reply,
        };
        if !self.post_supported {
            reject_post(target, nak_code::DENIED_BY_SOURCE, "provider does not support posting", &self.stats);
            return;
        }
        let Some(source) = self.registry.find_by_name(&request.source) else {
            reject_post(target, nak_code::SOURCE_UNKNOWN, "unknown source", &self.stats);
            return;
        };
        let service_id = source.id();
        let item_stream = source
            .item(&request.symbol, SubscriptionKind::MarketPrice)
            .and_then(|id| self.subs.get(id))
            .and_then(|sub| sub.stream_id());
        let stream_id = match (request.on_stream, item_stream) {
            (true, Some(stream_id)) => stream_id,
            (true, None) => {
                debug!(item = %target.key, "No open stream for on-stream post; posting off-stream");
                LOGIN_STREAM_ID
            }
            (false, _) => LOGIN_STREAM_ID,
        };

        let payload = match crate::provider::field_list(&request.fields) {
            Ok(payload) => payload,
            Err(e) => {
                reject_post(target, nak_code::INVALID_CONTENT, &e.to_string(), &self.stats);
                return;
            }
        };
        let key = target.key.clone();
        let post_id = self.posts.add(target);
        let encoded = MsgBuilder::post(DomainType::MarketPrice, stream_id, 0, 0)
            .with_post_id(post_id)
            .with_key(MsgKey::named(service_id, &*key.symbol))
            .with_flags(msg_flags::ACK | msg_flags::POST_COMPLETE)
            .with_payload(DataType::FieldList, payload)
            .encode();
        match encoded {
            Ok(bytes) => {
                debug!(item = %key, post_id, stream_id, "Posting");
                ConsumerStats::incr(&self.stats.posts_sent);
                self.outbox.push(bytes);
            }
            Err(e) => {
                if let Some(target) = self.posts.remove(post_id) {
                    reject_post(target, nak_code::INVALID_CONTENT, &e.to_string(), &self.stats);
                }
            }
        }
    }

    /// Close every item and the login stream; the session is done
    pub fn close_all(&mut self) {
        self.subs.close_all(&mut self.registry, &mut self.outbox);
        if self.state != SessionState::Unconnected && self.state != SessionState::Connecting {
            match MsgBuilder::close(DomainType::Login, LOGIN_STREAM_ID).encode() {
                Ok(bytes) => self.outbox.push(bytes),
                Err(e) => warn!(error = %e, "Failed to encode login close"),
            }
        }
        self.subs.update_gauges();
    }

    /// Final state; emits `Stopped`
    pub fn stop(&mut self) {
        self.state = SessionState::Unconnected;
        self.liveness = None;
        self.events.push(ConnectionEvent::Stopped);
    }

    pub fn take_outbox(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Nak a post that never reached the wire
fn reject_post(target: PostTarget, code: u8, text: &str, stats: &ConsumerStats) {
    debug!(item = %target.key, code, text, "Rejecting post locally");
    ConsumerStats::incr(&stats.naks);
    target.complete(
        0,
        PostOutcome::Nak {
            code,
            text: text.to_string(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{self, ServiceInfo};
    use rdm_types::State;

    fn config(hosts: &[&str]) -> ConsumerConfig {
        ConsumerConfig {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..ConsumerConfig::default()
        }
    }

    fn core(hosts: &[&str]) -> SessionCore {
        SessionCore::new(config(hosts), ConsumerStats::new()).unwrap()
    }

    #[test]
    fn test_no_hosts_is_pass_through() {
        let mut core = core(&[]);
        assert!(!core.start());
        assert_eq!(core.state(), SessionState::Unconnected);
        assert!(core.take_events().is_empty());
    }

    #[test]
    fn test_login_then_directory_request() {
        let mut core = core(&["h:1"]);
        assert!(core.start());
        let now = Instant::now();
        core.on_connected(now, Duration::from_secs(30)).unwrap();
        let login = core.take_outbox();
        assert_eq!(login.len(), 1);
        let msg = decode_msg(&login[0]).unwrap();
        assert_eq!(msg.domain, DomainType::Login);
        assert_eq!(msg.key().map(|k| k.name_str()), Some("rmds-consumer"));

        core.on_message(now, &provider::login_refresh("rmds-consumer", true).unwrap())
            .unwrap();
        assert_eq!(core.state(), SessionState::RequestingSourceDirectory);
        assert!(core.post_supported());
        let out = core.take_outbox();
        assert_eq!(decode_msg(&out[0]).unwrap().domain, DomainType::Source);
    }

    #[test]
    fn test_not_entitled_login_is_terminal() {
        let mut core = core(&["h:1"]);
        core.start();
        core.on_connected(Instant::now(), Duration::from_secs(30)).unwrap();
        let closed = provider::login_status(State::closed(StateCode::NotEntitled, "denied")).unwrap();
        let err = core.on_message(Instant::now(), &closed).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(matches!(
            core.take_events().as_slice(),
            [ConnectionEvent::LoginFailed { recoverable: false, .. }]
        ));
    }

    #[test]
    fn test_directory_without_dictionary_requests_both_halves() {
        let mut core = core(&["h:1"]);
        core.start();
        let now = Instant::now();
        core.on_connected(now, Duration::from_secs(30)).unwrap();
        core.on_message(now, &provider::login_refresh("u", false).unwrap()).unwrap();
        core.take_outbox();
        core.on_message(now, &provider::directory_refresh(&[ServiceInfo::new(10, "X")]).unwrap())
            .unwrap();
        assert_eq!(core.state(), SessionState::RequestingDictionary);
        let requests: Vec<i32> = core
            .take_outbox()
            .iter()
            .map(|b| decode_msg(b).unwrap().stream_id)
            .collect();
        assert_eq!(requests, vec![3, 4]);
    }

    #[test]
    fn test_timers_ping_then_timeout() {
        let mut core = core(&["h:1"]);
        core.start();
        let start = Instant::now();
        core.on_connected(start, Duration::from_secs(30)).unwrap();
        assert_eq!(core.read_budget(), Duration::from_secs(5));
        assert_eq!(core.poll_timers(start + Duration::from_secs(5)), TimerAction::None);
        assert_eq!(core.poll_timers(start + Duration::from_secs(10)), TimerAction::SendPing);
        assert_eq!(core.poll_timers(start + Duration::from_secs(11)), TimerAction::None);
        core.note_received(start + Duration::from_secs(20));
        assert_eq!(core.poll_timers(start + Duration::from_secs(45)), TimerAction::SendPing);
        assert_eq!(core.poll_timers(start + Duration::from_secs(50)), TimerAction::Timeout);
    }

    #[test]
    fn test_requests_wait_for_live() {
        let mut core = core(&["h:1"]);
        core.start();
        assert_eq!(
            core.enqueue(SessionRequest::Recover { reason: "test".into() }),
            Some(Control::Recover { reason: "test".into() })
        );
        assert_eq!(core.enqueue(SessionRequest::Shutdown), Some(Control::Shutdown));
        assert!(core
            .enqueue(SessionRequest::Unsubscribe {
                id: crate::subscription::ListenerId(1)
            })
            .is_none());
        assert_eq!(core.dispatch_requests(), 0);
        assert_eq!(core.queued_requests(), 1);
    }

    #[test]
    fn test_undecodable_frame_is_skipped() {
        let mut core = core(&["h:1"]);
        core.start();
        core.on_connected(Instant::now(), Duration::from_secs(30)).unwrap();
        assert!(core.on_message(Instant::now(), &[0x00, 0x01, 0xFF]).is_ok());
        assert_eq!(core.stats().snapshot().decode_failures, 1);
    }
}
