//! Consumer statistics context
//!
//! One `ConsumerStats` is constructed by the caller and shared with the session
//! through an `Arc`. Counters are plain atomics so any thread may read a
//! snapshot while the reactor thread writes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct ConsumerStats {
    // counters
    pub subscribed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub closed: AtomicU64,
    pub posts_sent: AtomicU64,
    pub acks: AtomicU64,
    pub naks: AtomicU64,
    pub decode_failures: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub reconnects: AtomicU64,

    // gauges
    pub pending_opens: AtomicU64,
    pub open_items: AtomicU64,
    pub pending_closes: AtomicU64,
    pub request_queue_len: AtomicU64,
}

impl ConsumerStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(gauge: &AtomicU64, value: usize) {
        gauge.store(value as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        StatsSnapshot {
            subscribed: load(&self.subscribed),
            succeeded: load(&self.succeeded),
            failed: load(&self.failed),
            closed: load(&self.closed),
            posts_sent: load(&self.posts_sent),
            acks: load(&self.acks),
            naks: load(&self.naks),
            decode_failures: load(&self.decode_failures),
            messages_delivered: load(&self.messages_delivered),
            reconnects: load(&self.reconnects),
            pending_opens: load(&self.pending_opens),
            open_items: load(&self.open_items),
            pending_closes: load(&self.pending_closes),
            request_queue_len: load(&self.request_queue_len),
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub subscribed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub closed: u64,
    pub posts_sent: u64,
    pub acks: u64,
    pub naks: u64,
    pub decode_failures: u64,
    pub messages_delivered: u64,
    pub reconnects: u64,
    pub pending_opens: u64,
    pub open_items: u64,
    pub pending_closes: u64,
    pub request_queue_len: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subscribed={} succeeded={} failed={} closed={} open={} pending_opens={} \
             pending_closes={} queue={} delivered={} decode_failures={} posts={} acks={} naks={} reconnects={}",
            self.subscribed,
            self.succeeded,
            self.failed,
            self.closed,
            self.open_items,
            self.pending_opens,
            self.pending_closes,
            self.request_queue_len,
            self.messages_delivered,
            self.decode_failures,
            self.posts_sent,
            self.acks,
            self.naks,
            self.reconnects,
        )
    }
}

/// Receives periodic snapshots
pub trait StatsSink: Send + Sync {
    fn record(&self, snapshot: &StatsSnapshot);
}

/// Default sink: one `info!` line per report
#[derive(Debug, Default)]
pub struct TracingSink;

impl StatsSink for TracingSink {
    fn record(&self, snapshot: &StatsSnapshot) {
        info!(
            subscribed = snapshot.subscribed,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            open_items = snapshot.open_items,
            pending_opens = snapshot.pending_opens,
            request_queue_len = snapshot.request_queue_len,
            "Consumer statistics: {}",
            snapshot
        );
    }
}

/// Periodic reporter task tied to the session lifecycle
pub struct StatsReporter {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatsReporter {
    /// Spawn the reporter on the current tokio runtime
    pub fn start(stats: Arc<ConsumerStats>, interval: Duration, sink: Arc<dyn StatsSink>) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => sink.record(&stats.snapshot()),
                    _ = &mut stop_rx => break,
                }
            }
            sink.record(&stats.snapshot());
            debug!("Statistics reporter stopped");
        });
        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop the reporter after one final snapshot
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        snapshots: Mutex<Vec<StatsSnapshot>>,
    }

    impl StatsSink for CollectingSink {
        fn record(&self, snapshot: &StatsSnapshot) {
            self.snapshots.lock().push(*snapshot);
        }
    }

    #[test]
    fn test_snapshot_reads_counters() {
        let stats = ConsumerStats::new();
        ConsumerStats::incr(&stats.subscribed);
        ConsumerStats::incr(&stats.subscribed);
        ConsumerStats::set(&stats.pending_opens, 7);
        let snap = stats.snapshot();
        assert_eq!(snap.subscribed, 2);
        assert_eq!(snap.pending_opens, 7);
        assert!(snap.to_string().contains("subscribed=2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_records_periodically_and_on_stop() {
        let stats = ConsumerStats::new();
        let sink = Arc::new(CollectingSink::default());
        let reporter = StatsReporter::start(stats.clone(), Duration::from_secs(10), sink.clone());

        tokio::time::sleep(Duration::from_secs(25)).await;
        ConsumerStats::incr(&stats.failed);
        reporter.stop().await;

        let snapshots = sink.snapshots.lock();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots.last().map(|s| s.failed), Some(1));
    }
}
