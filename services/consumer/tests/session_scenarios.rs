//! End-to-end session scenarios
//!
//! Drives the I/O-free session core with encoded provider messages, the same
//! bytes a real RMDS would send, and checks what callers observe.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use feed_config::{ConsumerConfig, ReconnectSchedule};
use parking_lot::Mutex;
use rdm_types::{DataType, DomainType, FieldValue, MsgClass, Real, State, StateCode, LOGIN_STREAM_ID};
use rmds_consumer::provider::{self, ServiceInfo};
use rmds_consumer::session::{ReconnectPolicy, SessionRequest};
use rmds_consumer::subscription::ItemRequest;
use rmds_consumer::{
    ConnectionEvent, ConsumerStats, ItemData, ItemError, ItemKey, ItemListener, ItemMessage,
    ItemStatus, ListenerId, MessageType, PostAck, PostListener, PostOutcome, PostRequest,
    Quality, RequestKind, SessionCore, SessionState,
};
use rwf_codec::decode_msg;
use tempfile::TempDir;

const FIELDS: &str = r#"
!ACRONYM    DDE ACRONYM          FID  RIPPLES TO  FIELD TYPE     LENGTH  RWF TYPE   RWF LEN
!-------    -----------          ---  ----------  ----------     ------  --------   -------
DSPLY_NAME "DISPLAY NAME"           3  NULL        ALPHANUMERIC      16  RMTES_STRING    16
TRDPRC_1   "LAST"                   6  TRDPRC_2    PRICE             17  REAL64           7
BID        "BID"                   22  NULL        PRICE             17  REAL64           7
ASK        "ASK"                   25  NULL        PRICE             17  REAL64           7
"#;

const ENUMS: &str = r#"
! ACRONYM    FID
RDN_EXCHID     4
!
! VALUE      DISPLAY    MEANING
      1       "NYS"     New York
"#;

#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<ItemMessage>>,
    statuses: Mutex<Vec<ItemStatus>>,
    errors: Mutex<Vec<ItemError>>,
    qualities: Mutex<Vec<(Quality, String)>>,
}

impl ItemListener for Recorder {
    fn on_message(&self, message: &ItemMessage) {
        self.messages.lock().push(message.clone());
    }

    fn on_status(&self, _key: &ItemKey, status: ItemStatus) {
        self.statuses.lock().push(status);
    }

    fn on_error(&self, _key: &ItemKey, error: &ItemError) {
        self.errors.lock().push(error.clone());
    }

    fn on_quality(&self, _key: &ItemKey, quality: Quality, cause: &str) {
        self.qualities.lock().push((quality, cause.to_string()));
    }
}

#[derive(Default)]
struct Poster {
    acks: Mutex<Vec<PostAck>>,
}

impl PostListener for Poster {
    fn on_ack(&self, ack: &PostAck) {
        self.acks.lock().push(ack.clone());
    }
}

fn dictionary_files() -> (TempDir, ConsumerConfig) {
    let dir = tempfile::tempdir().unwrap();
    let fields = dir.path().join("RDMFieldDictionary");
    let enums = dir.path().join("enumtype.def");
    fs::write(&fields, FIELDS).unwrap();
    fs::write(&enums, ENUMS).unwrap();
    let config = ConsumerConfig {
        hosts: vec!["rmds1:14002".into()],
        field_dictionary_path: Some(fields),
        enum_dictionary_path: Some(enums),
        ..ConsumerConfig::default()
    };
    (dir, config)
}

/// Login and directory handshake on a fresh connection
fn handshake(core: &mut SessionCore, now: Instant, support_post: bool) {
    core.on_connected(now, Duration::from_secs(30)).unwrap();
    let user = core.config().user_name.clone();
    core.on_message(now, &provider::login_refresh(&user, support_post).unwrap())
        .unwrap();
    core.on_message(now, &provider::directory_refresh(&[ServiceInfo::new(10, "X")]).unwrap())
        .unwrap();
}

fn live_core(support_post: bool) -> (TempDir, SessionCore) {
    live_core_with(support_post, |_| {})
}

fn live_core_with(support_post: bool, tune: impl FnOnce(&mut ConsumerConfig)) -> (TempDir, SessionCore) {
    let (dir, mut config) = dictionary_files();
    tune(&mut config);
    let mut core = SessionCore::new(config, ConsumerStats::new()).unwrap();
    assert!(core.start());
    handshake(&mut core, Instant::now(), support_post);
    assert_eq!(core.state(), SessionState::Live);
    (dir, core)
}

fn item(id: u64, source: &str, symbol: &str, listener: Arc<Recorder>) -> SessionRequest {
    SessionRequest::Subscribe(ItemRequest {
        listener_id: ListenerId(id),
        source: source.into(),
        symbol: symbol.into(),
        kind: RequestKind::MarketPrice,
        listener,
    })
}

fn subscribe(core: &mut SessionCore, id: u64, source: &str, symbol: &str, listener: Arc<Recorder>) {
    assert!(core.enqueue(item(id, source, symbol, listener)).is_none());
    core.dispatch_requests();
}

/// Stream ids of the item requests in the outbox
fn item_requests(core: &mut SessionCore) -> Vec<(i32, String)> {
    core.take_outbox()
        .iter()
        .filter_map(|bytes| {
            let msg = decode_msg(bytes).ok()?;
            if msg.class() != MsgClass::Request || msg.domain != DomainType::MarketPrice {
                return None;
            }
            Some((msg.stream_id, msg.key()?.name_str().to_string()))
        })
        .collect()
}

fn quote(bid: i64) -> bytes::Bytes {
    provider::field_list(&[
        (22, FieldValue::Real(Real::new(bid, 12).unwrap())),
        (25, FieldValue::Real(Real::new(bid + 1, 12).unwrap())),
    ])
    .unwrap()
}

#[test]
fn test_no_hosts_stays_unconnected() {
    let mut core = SessionCore::new(ConsumerConfig::default(), ConsumerStats::new()).unwrap();
    assert!(!core.start());
    assert_eq!(core.state(), SessionState::Unconnected);
    assert!(core.take_events().is_empty());
    assert!(core.take_outbox().is_empty());

    let mut policy = ReconnectPolicy::new(ReconnectSchedule::default(), Vec::new());
    assert!(policy.next_attempt().is_none());
}

#[test]
fn test_first_live_fires_complete_once_without_resubscribe() {
    let (_dir, mut core) = live_core(false);
    assert_eq!(core.take_events(), vec![ConnectionEvent::Complete]);
    assert_eq!(core.stats().snapshot().reconnects, 0);

    // login then directory, no dictionary requests since both halves came from files
    let sent: Vec<DomainType> = core
        .take_outbox()
        .iter()
        .map(|b| decode_msg(b).unwrap().domain)
        .collect();
    assert_eq!(sent, vec![DomainType::Login, DomainType::Source]);
    assert!(core.dictionary().is_complete());
}

#[test]
fn test_transport_loss_then_recovery_resubscribes_and_reports_reconnected() {
    let (_dir, mut core) = live_core(false);
    core.take_events();
    core.take_outbox();

    let listener = Arc::new(Recorder::default());
    subscribe(&mut core, 1, "X", "AAA", listener.clone());
    let requests = item_requests(&mut core);
    assert_eq!(requests.len(), 1);
    let (stream_id, ref symbol) = requests[0];
    assert_eq!(symbol, "AAA");

    let now = Instant::now();
    let image = provider::item_refresh(DomainType::MarketPrice, stream_id, DataType::FieldList, quote(100))
        .unwrap();
    core.on_message(now, &image).unwrap();
    assert_eq!(listener.messages.lock()[0].msg_type, MessageType::Initial);

    core.on_connection_lost("socket read failed");
    assert_eq!(core.state(), SessionState::Connecting);
    assert!(core.is_recovering());
    assert!(matches!(
        core.take_events().as_slice(),
        [ConnectionEvent::Lost { .. }]
    ));
    assert_eq!(
        listener.qualities.lock().last(),
        Some(&(Quality::Stale, "connection lost".to_string()))
    );
    assert_eq!(listener.statuses.lock().last(), Some(&ItemStatus::Stale));

    let mut policy = ReconnectPolicy::new(
        ReconnectSchedule::parse("0,3(3),10(3),30(6)").unwrap(),
        core.config().hosts.clone(),
    );
    let first = policy.next_attempt().unwrap();
    assert_eq!(first.delay, Duration::ZERO);
    assert_eq!(first.host, "rmds1:14002");

    handshake(&mut core, now, false);
    assert_eq!(core.state(), SessionState::Live);
    assert_eq!(core.take_events(), vec![ConnectionEvent::Reconnected]);
    assert_eq!(core.stats().snapshot().reconnects, 1);

    // the item is re-requested on the stream it already owns
    let requests = item_requests(&mut core);
    assert_eq!(requests, vec![(stream_id, "AAA".to_string())]);

    let image = provider::item_refresh(DomainType::MarketPrice, stream_id, DataType::FieldList, quote(101))
        .unwrap();
    core.on_message(now, &image).unwrap();
    let messages = listener.messages.lock();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].msg_type, MessageType::Initial);
    assert!(matches!(messages[1].data, ItemData::Fields(ref f) if f.len() == 2));
    assert_eq!(listener.qualities.lock().last().map(|q| q.0), Some(Quality::Ok));
}

#[test]
fn test_unknown_source_fails_synchronously_without_stream() {
    let (_dir, mut core) = live_core(false);
    core.take_outbox();
    let listener = Arc::new(Recorder::default());
    subscribe(&mut core, 1, "NOPE", "AAA", listener.clone());

    assert!(matches!(
        listener.errors.lock().as_slice(),
        [ItemError::BadSymbol { .. }]
    ));
    assert!(core.take_outbox().is_empty());
    assert_eq!(core.streams().lock().in_use(), 0);
    assert!(core.subscriptions().is_empty());
    assert_eq!(core.stats().snapshot().failed, 1);
}

#[test]
fn test_post_ack_resolves_once() {
    let (_dir, mut core) = live_core(true);
    assert!(core.post_supported());
    core.take_outbox();

    let poster = Arc::new(Poster::default());
    for n in 0..5 {
        let request = PostRequest {
            source: "X".into(),
            symbol: "AAA".into(),
            fields: vec![(22, FieldValue::Real(Real::new(100 + n, 12).unwrap()))],
            poster: poster.clone(),
            reply: Some(format!("reply-{}", n + 1)),
            on_stream: false,
        };
        core.enqueue(SessionRequest::Post(request));
    }
    core.dispatch_requests();
    let posts = core.take_outbox();
    assert_eq!(posts.len(), 5);
    let last = decode_msg(&posts[4]).unwrap();
    assert_eq!(last.class(), MsgClass::Post);
    assert_eq!(last.stream_id, LOGIN_STREAM_ID);
    assert_eq!(core.posts().len(), 5);

    let now = Instant::now();
    core.on_message(now, &provider::ack(LOGIN_STREAM_ID, 5, None).unwrap())
        .unwrap();
    {
        let acks = poster.acks.lock();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].post_id, 5);
        assert_eq!(acks[0].reply.as_deref(), Some("reply-5"));
        assert_eq!(acks[0].outcome, PostOutcome::Ack);
    }
    assert_eq!(core.posts().len(), 4);

    // second ack for the same id finds nothing
    core.on_message(now, &provider::ack(LOGIN_STREAM_ID, 5, None).unwrap())
        .unwrap();
    assert_eq!(poster.acks.lock().len(), 1);
    assert_eq!(core.stats().snapshot().acks, 1);
}

#[test]
fn test_post_without_provider_support_is_naked_locally() {
    let (_dir, mut core) = live_core(false);
    core.take_outbox();
    let poster = Arc::new(Poster::default());
    core.enqueue(SessionRequest::Post(PostRequest {
        source: "X".into(),
        symbol: "AAA".into(),
        fields: Vec::new(),
        poster: poster.clone(),
        reply: None,
        on_stream: true,
    }));
    core.dispatch_requests();

    assert!(core.take_outbox().is_empty());
    let acks = poster.acks.lock();
    assert_eq!(acks.len(), 1);
    assert!(!acks[0].is_ack());
}

#[test]
fn test_service_down_and_up_flags_items() {
    let (_dir, mut core) = live_core(false);
    core.take_outbox();
    let listener = Arc::new(Recorder::default());
    subscribe(&mut core, 1, "X", "AAA", listener.clone());
    let (stream_id, _) = item_requests(&mut core)[0].clone();
    let now = Instant::now();
    core.on_message(
        now,
        &provider::item_refresh(DomainType::MarketPrice, stream_id, DataType::FieldList, quote(5))
            .unwrap(),
    )
    .unwrap();

    core.on_message(
        now,
        &provider::directory_update(&[ServiceInfo::new(10, "X").down()], &[]).unwrap(),
    )
    .unwrap();
    assert_eq!(listener.qualities.lock().last().map(|q| q.0), Some(Quality::Stale));

    core.on_message(now, &provider::directory_update(&[ServiceInfo::new(10, "X")], &[]).unwrap())
        .unwrap();
    assert_eq!(listener.qualities.lock().last().map(|q| q.0), Some(Quality::Ok));
    assert_eq!(core.state(), SessionState::Live);
}

#[test]
fn test_paused_source_drops_updates_only() {
    let (_dir, mut core) = live_core(false);
    core.take_outbox();
    let listener = Arc::new(Recorder::default());
    subscribe(&mut core, 1, "X", "AAA", listener.clone());
    let (stream_id, _) = item_requests(&mut core)[0].clone();
    let now = Instant::now();
    core.on_message(
        now,
        &provider::item_refresh(DomainType::MarketPrice, stream_id, DataType::FieldList, quote(5))
            .unwrap(),
    )
    .unwrap();

    assert!(core.registry_mut().pause_updates("X"));
    let update =
        provider::item_update(DomainType::MarketPrice, stream_id, DataType::FieldList, quote(6))
            .unwrap();
    core.on_message(now, &update).unwrap();
    assert_eq!(listener.messages.lock().len(), 1);

    assert!(core.registry_mut().resume_updates("X"));
    core.on_message(now, &update).unwrap();
    let messages = listener.messages.lock();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].msg_type, MessageType::Update);
}

#[test]
fn test_item_not_found_closes_subscription() {
    let (_dir, mut core) = live_core(false);
    core.take_outbox();
    let listener = Arc::new(Recorder::default());
    subscribe(&mut core, 1, "X", "NOSUCH", listener.clone());
    let (stream_id, _) = item_requests(&mut core)[0].clone();

    let status = provider::item_status(
        DomainType::MarketPrice,
        stream_id,
        State::closed(StateCode::NotFound, "not found"),
    )
    .unwrap();
    core.on_message(Instant::now(), &status).unwrap();

    assert!(matches!(
        listener.errors.lock().as_slice(),
        [ItemError::NotFound { .. }]
    ));
    assert!(core.subscriptions().is_empty());
    assert_eq!(core.streams().lock().in_use(), 0);
}

#[test]
fn test_pending_open_limit_defers_subscribes_until_images_arrive() {
    let (_dir, mut core) = live_core_with(false, |config| config.max_pending_opens = 2);
    core.take_outbox();
    let symbols = ["AAA", "BBB", "CCC", "DDD", "EEE"];
    for (i, symbol) in symbols.iter().enumerate() {
        assert!(core
            .enqueue(item(i as u64 + 1, "X", symbol, Arc::new(Recorder::default())))
            .is_none());
    }

    assert_eq!(core.dispatch_requests(), 2);
    assert_eq!(core.queued_requests(), 3);
    let mut open = item_requests(&mut core);
    assert_eq!(open.len(), 2);
    // gate stays shut while both opens are unanswered
    assert_eq!(core.dispatch_requests(), 0);

    let now = Instant::now();
    let mut requested = Vec::new();
    while let Some((stream_id, symbol)) = open.pop() {
        requested.push(symbol);
        let image = provider::item_refresh(DomainType::MarketPrice, stream_id, DataType::FieldList, quote(100))
            .unwrap();
        core.on_message(now, &image).unwrap();
        assert!(core.dispatch_requests() <= 1);
        open.extend(item_requests(&mut core));
        assert!(core.streams().lock().pending_count() <= 2);
    }
    requested.sort();
    assert_eq!(requested, symbols);
    assert_eq!(core.queued_requests(), 0);
}

#[test]
fn test_dispatch_per_cycle_cap_spreads_requests_over_cycles() {
    let (_dir, mut core) = live_core_with(false, |config| {
        config.max_dispatch_per_cycle = 2;
        config.max_pending_opens = 100;
    });
    core.take_outbox();
    for i in 0..5u64 {
        let symbol = format!("S{}", i);
        assert!(core
            .enqueue(item(i + 1, "X", &symbol, Arc::new(Recorder::default())))
            .is_none());
    }

    let cycles: Vec<usize> = (0..4).map(|_| core.dispatch_requests()).collect();
    assert_eq!(cycles, vec![2, 2, 1, 0]);
    assert_eq!(item_requests(&mut core).len(), 5);
    assert_eq!(core.stats().snapshot().request_queue_len, 0);
}
