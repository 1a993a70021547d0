//! Session reactor
//!
//! One thread, one current-thread tokio runtime, one socket. The reactor
//! connects, feeds every received message to the [`SessionCore`], writes
//! whatever the core queued and runs the liveness timers. Caller requests
//! arrive on an unbounded channel; connection events leave on another.
//!
//! Each loop iteration:
//! 1. dispatch queued requests (bounded per cycle and by pending opens)
//! 2. wait for socket readiness, a caller request or the poll tick
//! 3. read until the socket drains or the read budget runs out
//! 4. flush buffered writes
//! 5. check the ping timers

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use feed_config::ConsumerConfig;
use rssl_transport::{ConnectOptions, RsslConnection, TransportError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::reconnect::ReconnectPolicy;
use super::requests::{SessionHandle, SessionRequest};
use super::{Control, SessionCore, TimerAction};
use crate::error::Result;
use crate::events::ConnectionEvent;
use crate::stats::{ConsumerStats, StatsReporter, TracingSink};

/// Upper bound on one readiness wait
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reconnect waits are sliced so shutdown is noticed promptly
const WAIT_SLICE: Duration = Duration::from_secs(1);

/// Log a transport failure with its category and turn it into a loss reason
fn lost_reason(e: TransportError) -> String {
    warn!(category = e.category(), retryable = e.is_retryable(), error = %e, "Transport failed");
    e.to_string()
}

/// Running session: the reactor thread plus a handle to it
pub struct Session {
    handle: SessionHandle,
    thread: Option<JoinHandle<()>>,
}

impl Session {
    /// Start the reactor thread
    ///
    /// Returns the session and the receiver of connection events. Dictionary
    /// files named in `config` are loaded before the thread starts.
    pub fn spawn(
        config: ConsumerConfig,
        stats: Arc<ConsumerStats>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let core = SessionCore::new(config, stats.clone())?;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(request_tx, core.streams().clone(), stats);

        let reactor = Reactor::new(core, request_rx, event_tx);
        let thread = std::thread::Builder::new()
            .name("rmds-reactor".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "Failed to create reactor runtime");
                        return;
                    }
                };
                runtime.block_on(reactor.run());
            })?;

        Ok((
            Self {
                handle,
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Ask the reactor to stop and wait for its thread
    pub fn shutdown(mut self) {
        let _ = self.handle.shutdown();
        self.join();
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Session reactor thread panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.handle.shutdown();
            self.join();
        }
    }
}

/// How one connection ended
#[derive(Debug)]
enum DriveEnd {
    Shutdown,
    Lost(String),
    /// Non-recoverable handshake failure
    Terminal,
}

struct Reactor {
    core: SessionCore,
    requests: mpsc::UnboundedReceiver<SessionRequest>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    policy: ReconnectPolicy,
}

impl Reactor {
    fn new(
        core: SessionCore,
        requests: mpsc::UnboundedReceiver<SessionRequest>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let config = core.config();
        let policy = ReconnectPolicy::new(config.reconnect_schedule.clone(), config.hosts.clone());
        Self {
            core,
            requests,
            events,
            policy,
        }
    }

    async fn run(mut self) {
        let interval = self.core.config().stats_interval_secs;
        let reporter = (interval > 0).then(|| {
            StatsReporter::start(
                self.core.stats().clone(),
                Duration::from_secs(interval),
                Arc::new(TracingSink),
            )
        });

        if self.core.start() {
            self.connect_loop().await;
        } else {
            self.pass_through().await;
        }

        self.core.stop();
        self.publish();
        if let Some(reporter) = reporter {
            reporter.stop().await;
        }
        info!("Session reactor stopped");
    }

    /// Forward queued connection events to the caller
    fn publish(&mut self) {
        for event in self.core.take_events() {
            if self.events.send(event).is_err() {
                debug!("Connection event receiver dropped");
            }
        }
    }

    /// No hosts: requests are served locally until shutdown
    async fn pass_through(&mut self) {
        while let Some(request) = self.requests.recv().await {
            match self.core.enqueue(request) {
                Some(Control::Shutdown) => break,
                Some(Control::Recover { reason }) => {
                    debug!(reason, "Recovery ignored without a connection")
                }
                None => {
                    self.core.dispatch_requests();
                    self.core.take_outbox();
                }
            }
            self.publish();
        }
    }

    async fn connect_loop(&mut self) {
        loop {
            let Some(attempt) = self.policy.next_attempt() else {
                return;
            };
            if !attempt.delay.is_zero() {
                info!(
                    host = %attempt.host,
                    attempt = attempt.number,
                    delay_secs = attempt.delay.as_secs(),
                    "Waiting before reconnect"
                );
            }
            if !self.wait(attempt.delay).await {
                return;
            }

            let config = self.core.config();
            let options = ConnectOptions {
                address: attempt.host.clone(),
                connect_timeout: Duration::from_millis(config.connect_timeout_ms),
                ping_timeout_secs: config.ping_timeout_secs,
                ..ConnectOptions::default()
            };
            let mut conn = match RsslConnection::connect(&options).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(host = %attempt.host, category = e.category(), "Connect attempt failed");
                    self.core.on_connect_failed(&attempt.host, &e.to_string());
                    self.publish();
                    continue;
                }
            };
            info!(
                host = %attempt.host,
                peer = %conn.peer_addr(),
                ping_timeout_secs = conn.ping_timeout().as_secs(),
                "Connected"
            );

            let end = self.drive(&mut conn).await;
            conn.close().await;
            match end {
                DriveEnd::Shutdown | DriveEnd::Terminal => return,
                DriveEnd::Lost(reason) => {
                    self.core.on_connection_lost(&reason);
                    self.publish();
                }
            }
        }
    }

    /// Sleep for `delay`; `false` when shutdown arrived meanwhile
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            tokio::select! {
                request = self.requests.recv() => match request {
                    None => return false,
                    Some(request) => match self.core.enqueue(request) {
                        Some(Control::Shutdown) => return false,
                        Some(Control::Recover { .. }) | None => {}
                    },
                },
                _ = tokio::time::sleep(slice) => {}
            }
        }
    }

    /// Write everything the core queued; `Err` text describes the failure
    fn flush(&mut self, conn: &mut RsslConnection) -> std::result::Result<(), String> {
        for message in self.core.take_outbox() {
            conn.queue_message(&message).map_err(lost_reason)?;
        }
        if conn.has_pending_writes() {
            let written = conn.try_flush().map_err(lost_reason)?;
            if written > 0 {
                self.core.note_sent(Instant::now());
            }
        }
        Ok(())
    }

    async fn drive(&mut self, conn: &mut RsslConnection) -> DriveEnd {
        if let Err(e) = self.core.on_connected(Instant::now(), conn.ping_timeout()) {
            warn!(error = %e, "Failed to build login request");
            return DriveEnd::Lost(e.to_string());
        }
        let mut marked_success = false;

        loop {
            self.core.dispatch_requests();
            if let Err(reason) = self.flush(conn) {
                return DriveEnd::Lost(reason);
            }
            self.publish();
            if !marked_success && self.core.is_live() {
                self.policy.on_success();
                marked_success = true;
            }

            let wait = self.core.ping_interval().min(POLL_INTERVAL);
            tokio::select! {
                ready = conn.ready() => {
                    let ready = match ready {
                        Ok(ready) => ready,
                        Err(e) => return DriveEnd::Lost(lost_reason(e)),
                    };
                    if ready.is_readable() {
                        if let Some(end) = self.read(conn) {
                            return end;
                        }
                    }
                    if ready.is_writable() {
                        if let Err(reason) = self.flush(conn) {
                            return DriveEnd::Lost(reason);
                        }
                    }
                }
                request = self.requests.recv() => {
                    let control = match request {
                        None => Some(Control::Shutdown),
                        Some(request) => self.core.enqueue(request),
                    };
                    match control {
                        Some(Control::Shutdown) => {
                            info!("Shutting down session");
                            self.core.close_all();
                            if self.flush(conn).is_ok() {
                                if let Err(e) = conn.flush().await {
                                    debug!(error = %e, "Close messages not fully flushed");
                                }
                            }
                            return DriveEnd::Shutdown;
                        }
                        Some(Control::Recover { reason }) => {
                            info!(reason, "Recovery requested");
                            return DriveEnd::Lost(reason);
                        }
                        None => {}
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.core.poll_timers(Instant::now()) {
                TimerAction::SendPing => conn.queue_ping(),
                TimerAction::Timeout => {
                    let error = self.core.ping_timeout_error();
                    warn!(error = %error, "Server unresponsive");
                    return DriveEnd::Lost(error.to_string());
                }
                TimerAction::None => {}
            }
        }
    }

    /// One read pass; `Some` when the connection must end
    fn read(&mut self, conn: &mut RsslConnection) -> Option<DriveEnd> {
        let deadline = Instant::now() + self.core.read_budget();
        let batch = match conn.try_read(deadline) {
            Ok(batch) => batch,
            Err(e) => return Some(DriveEnd::Lost(lost_reason(e))),
        };
        let now = Instant::now();
        if batch.received_anything() {
            self.core.note_received(now);
        }
        for message in &batch.messages {
            if let Err(e) = self.core.on_message(now, message) {
                self.publish();
                return Some(if e.is_recoverable() {
                    DriveEnd::Lost(e.to_string())
                } else {
                    DriveEnd::Terminal
                });
            }
        }
        if batch.hit_deadline {
            debug!(messages = batch.messages.len(), "Read budget exhausted");
        }
        None
    }
}
