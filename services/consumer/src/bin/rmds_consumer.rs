//! RMDS consumer binary
//!
//! Usage:
//!   rmds_consumer --config config/consumer.toml --source IDN_RDF --symbol TRI.N
//!   rmds_consumer --env prod --source IDN_RDF --symbol VOD.L --book
//!   rmds_consumer --source IDN_RDF --symbol TRI.N --symbol IBM.N --snapshot

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use feed_config::ConsumerConfig;
use rmds_consumer::{
    ConnectionEvent, ConsumerStats, ItemData, ItemError, ItemKey, ItemListener, ItemMessage,
    ItemStatus, Quality, RequestKind, Session,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rmds_consumer")]
#[command(about = "Subscribe to RMDS items and log every update")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment override (loads config/<env>.toml on top of the base file)
    #[arg(short, long)]
    env: Option<String>,

    /// Service name to request items from
    #[arg(short, long)]
    source: String,

    /// Item symbol; repeat for several items
    #[arg(long, required = true)]
    symbol: Vec<String>,

    /// Request order books instead of market price
    #[arg(long)]
    book: bool,

    /// One image per item instead of a streaming subscription
    #[arg(long)]
    snapshot: bool,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

struct LogListener;

impl ItemListener for LogListener {
    fn on_message(&self, message: &ItemMessage) {
        match &message.data {
            ItemData::Fields(fields) => {
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}={:?}", f.fid, f.value))
                    .collect();
                info!(
                    item = %message.key,
                    seq = message.seq,
                    kind = ?message.msg_type,
                    "{}",
                    rendered.join(" ")
                );
            }
            ItemData::Book(book) => {
                info!(
                    item = %message.key,
                    seq = message.seq,
                    kind = ?message.msg_type,
                    clear = book.clear,
                    entries = book.entries.len(),
                    "Book message"
                );
                for entry in &book.entries {
                    info!(
                        item = %message.key,
                        action = ?entry.action,
                        key = %entry.key,
                        side = ?entry.side,
                        price = ?entry.price,
                        size = ?entry.size,
                        "  entry"
                    );
                }
            }
            ItemData::Empty => {
                info!(item = %message.key, kind = ?message.msg_type, "Empty message")
            }
        }
    }

    fn on_status(&self, key: &ItemKey, status: ItemStatus) {
        info!(item = %key, ?status, "Item status");
    }

    fn on_error(&self, key: &ItemKey, error: &ItemError) {
        warn!(item = %key, %error, "Item failed");
    }

    fn on_quality(&self, key: &ItemKey, quality: Quality, cause: &str) {
        info!(item = %key, ?quality, cause, "Item quality changed");
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConsumerConfig::load(args.config.as_deref(), args.env.as_deref())
        .context("Failed to load configuration")?;
    init_logging(&config.log_level, args.json_logs);

    info!(
        hosts = ?config.hosts,
        user = %config.user_name,
        source = %args.source,
        items = args.symbol.len(),
        "Starting RMDS consumer"
    );

    let stats = ConsumerStats::new();
    let (session, mut events) = Session::spawn(config, stats.clone())?;
    let handle = session.handle();

    let kind = if args.book {
        RequestKind::Book
    } else {
        RequestKind::MarketPrice
    };
    let listener: Arc<dyn ItemListener> = Arc::new(LogListener);
    for symbol in &args.symbol {
        if args.snapshot {
            handle.snapshot(&args.source, symbol, kind, listener.clone())?;
        } else {
            handle.subscribe(&args.source, symbol, kind, listener.clone())?;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Stopped) | None => {
                    info!("Session stopped");
                    break;
                }
                Some(event @ ConnectionEvent::LoginFailed { recoverable: false, .. }) => {
                    error!(%event, "Giving up");
                    break;
                }
                Some(event) => info!(%event, "Connection event"),
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Received shutdown signal");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || session.shutdown()).await?;
    info!(stats = %stats.snapshot(), "Consumer exited");
    Ok(())
}
