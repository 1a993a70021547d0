//! Session reactor against a provider on a loopback socket
//!
//! The provider side is a plain accepted [`RsslConnection`] answering with
//! encoded provider messages; the consumer side is the real reactor thread.

use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use feed_config::{ConsumerConfig, ReconnectSchedule};
use rdm_types::{DataType, DomainType, FieldValue, MsgClass, Real};
use rmds_consumer::provider::{self, ServiceInfo};
use rmds_consumer::{
    ConnectionEvent, ConsumerStats, ItemKey, ItemListener, ItemMessage, ItemStatus, MessageType,
    RequestKind, Session,
};
use rssl_transport::RsslConnection;
use rwf_codec::decode_msg;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

const FIELDS: &str = "BID \"BID\" 22 NULL PRICE 17 REAL64 7\nASK \"ASK\" 25 NULL PRICE 17 REAL64 7\n";
const ENUMS: &str = "RDN_EXCHID 4\n 1 \"NYS\"\n";

enum Seen {
    Message(ItemMessage),
    Status(ItemStatus),
}

struct Forward(mpsc::UnboundedSender<Seen>);

impl ItemListener for Forward {
    fn on_message(&self, message: &ItemMessage) {
        let _ = self.0.send(Seen::Message(message.clone()));
    }

    fn on_status(&self, _key: &ItemKey, status: ItemStatus) {
        let _ = self.0.send(Seen::Status(status));
    }
}

/// Provider end of one accepted connection
struct Provider {
    conn: RsslConnection,
    pending: VecDeque<Bytes>,
}

impl Provider {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let conn = RsslConnection::accept(stream, 30).await.unwrap();
        Self {
            conn,
            pending: VecDeque::new(),
        }
    }

    async fn next(&mut self) -> Bytes {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return message;
            }
            let batch = timeout(WAIT, self.conn.read_batch()).await.unwrap().unwrap();
            self.pending.extend(batch.messages);
        }
    }

    /// Next request for `domain`, skipping anything else
    async fn request(&mut self, domain: DomainType) -> (i32, String) {
        loop {
            let bytes = self.next().await;
            let msg = decode_msg(&bytes).unwrap();
            if msg.class() == MsgClass::Request && msg.domain == domain {
                let name = msg.key().map(|k| k.name_str().to_string()).unwrap_or_default();
                return (msg.stream_id, name);
            }
        }
    }

    async fn send(&mut self, message: Bytes) {
        self.conn.queue_message(&message).unwrap();
        self.conn.flush().await.unwrap();
    }

    async fn handshake(&mut self) {
        let (_, user) = self.request(DomainType::Login).await;
        self.send(provider::login_refresh(&user, false).unwrap()).await;
        self.request(DomainType::Source).await;
        self.send(provider::directory_refresh(&[ServiceInfo::new(10, "X")]).unwrap())
            .await;
    }
}

fn config(address: String) -> (TempDir, ConsumerConfig) {
    let dir = tempfile::tempdir().unwrap();
    let fields = dir.path().join("RDMFieldDictionary");
    let enums = dir.path().join("enumtype.def");
    fs::write(&fields, FIELDS).unwrap();
    fs::write(&enums, ENUMS).unwrap();
    let config = ConsumerConfig {
        hosts: vec![address],
        reconnect_schedule: ReconnectSchedule::parse("0").unwrap(),
        field_dictionary_path: Some(fields),
        enum_dictionary_path: Some(enums),
        stats_interval_secs: 0,
        ..ConsumerConfig::default()
    };
    (dir, config)
}

fn image(stream_id: i32, bid: i64) -> Bytes {
    let payload = provider::field_list(&[(22, FieldValue::Real(Real::new(bid, 2).unwrap()))]).unwrap();
    provider::item_refresh(DomainType::MarketPrice, stream_id, DataType::FieldList, payload).unwrap()
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

async fn next_message(seen: &mut mpsc::UnboundedReceiver<Seen>) -> ItemMessage {
    loop {
        if let Seen::Message(message) = timeout(WAIT, seen.recv()).await.unwrap().unwrap() {
            return message;
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_subscribe_recover_and_shutdown_over_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (_dir, config) = config(listener.local_addr().unwrap().to_string());
    let stats = ConsumerStats::new();
    let (session, mut events) = Session::spawn(config, stats.clone()).unwrap();
    let handle = session.handle();

    // queued until the session is live
    let (tx, mut seen) = mpsc::unbounded_channel();
    handle
        .subscribe("X", "AAA", RequestKind::MarketPrice, Arc::new(Forward(tx)))
        .unwrap();

    let mut provider = Provider::accept(&listener).await;
    provider.handshake().await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Complete);

    let (stream_id, symbol) = provider.request(DomainType::MarketPrice).await;
    assert_eq!(symbol, "AAA");
    provider.send(image(stream_id, 10050)).await;
    let first = next_message(&mut seen).await;
    assert_eq!(first.msg_type, MessageType::Initial);
    assert_eq!(&*first.key.symbol, "AAA");

    // provider drops the connection; the reactor reconnects and re-requests
    drop(provider);
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Lost { .. }
    ));
    let mut provider = Provider::accept(&listener).await;
    provider.handshake().await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Reconnected);
    let (again, _) = provider.request(DomainType::MarketPrice).await;
    assert_eq!(again, stream_id);
    provider.send(image(stream_id, 10075)).await;
    assert_eq!(next_message(&mut seen).await.msg_type, MessageType::Initial);
    assert_eq!(stats.snapshot().reconnects, 1);

    tokio::task::spawn_blocking(move || session.shutdown())
        .await
        .unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Stopped);
    assert!(handle.is_closed());
}

#[test_log::test(tokio::test)]
async fn test_pass_through_mode_reports_unknown_source() {
    let stats = ConsumerStats::new();
    let (session, mut events) = Session::spawn(ConsumerConfig::default(), stats.clone()).unwrap();

    struct Errors(mpsc::UnboundedSender<String>);
    impl ItemListener for Errors {
        fn on_message(&self, _message: &ItemMessage) {}
        fn on_error(&self, key: &ItemKey, error: &rmds_consumer::ItemError) {
            let _ = self.0.send(format!("{}: {}", key, error));
        }
    }

    let (tx, mut errors) = mpsc::unbounded_channel();
    session
        .handle()
        .subscribe("X", "AAA", RequestKind::MarketPrice, Arc::new(Errors(tx)))
        .unwrap();
    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(error.starts_with("X.AAA"));

    tokio::task::spawn_blocking(move || session.shutdown())
        .await
        .unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Stopped);
    assert_eq!(stats.snapshot().failed, 1);
}
