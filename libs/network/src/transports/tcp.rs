//! TCP Socket Transport
//!
//! One RSSL socket connection: connect with timeout, the RIPC connect handshake
//! with ping-timeout negotiation, then non-blocking reads and buffered writes
//! driven by the session reactor.
//!
//! The reactor waits on [`RsslConnection::ready`] and then calls the `try_*`
//! methods, which never block: reads stop at `WouldBlock` or at the caller's
//! deadline, writes keep unsent bytes buffered for the next writable event.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest, Ready};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::framing::{self, Frame, FrameDecoder, RIPC_VERSION};

/// Socket connect options
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `host:port`
    pub address: String,
    /// Bound on TCP connect plus the RIPC handshake
    pub connect_timeout: Duration,
    /// Ping timeout requested from the server, in seconds
    pub ping_timeout_secs: u16,
    /// Largest inbound frame accepted
    pub max_frame_size: usize,
    /// Read buffer growth step
    pub buffer_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout: Duration::from_secs(5),
            ping_timeout_secs: 60,
            max_frame_size: framing::MAX_FRAME_SIZE,
            buffer_size: 64 * 1024,
        }
    }
}

/// Outcome of one non-blocking read pass
#[derive(Debug, Default)]
pub struct ReadBatch {
    /// RWF messages in arrival order
    pub messages: Vec<Bytes>,
    /// Pings received in this pass
    pub pings: usize,
    /// Bytes read from the socket
    pub bytes: usize,
    /// Stopped because the deadline passed, not because the socket drained
    pub hit_deadline: bool,
}

impl ReadBatch {
    /// Anything at all arrived, pings included
    pub fn received_anything(&self) -> bool {
        self.bytes > 0
    }
}

/// Established RSSL connection
pub struct RsslConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    ping_timeout: Duration,
    decoder: FrameDecoder,
    connected_at: Instant,
    bytes_sent: u64,
    bytes_received: u64,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    buffer_size: usize,
}

impl RsslConnection {
    fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        ping_timeout: Duration,
        decoder: FrameDecoder,
        buffer_size: usize,
    ) -> Self {
        Self {
            stream,
            peer_addr,
            ping_timeout,
            decoder,
            connected_at: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
            read_buffer: BytesMut::with_capacity(buffer_size),
            write_buffer: BytesMut::with_capacity(buffer_size),
            buffer_size,
        }
    }

    /// Connect and complete the RIPC handshake as a client
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        if options.address.is_empty() {
            return Err(TransportError::configuration(
                "No host address configured",
                Some("hosts"),
            ));
        }
        let timeout_ms = options.connect_timeout.as_millis() as u64;
        info!(host = %options.address, "Connecting to RSSL server");

        tokio::time::timeout(options.connect_timeout, Self::connect_inner(options))
            .await
            .map_err(|_| TransportError::timeout("RSSL connect", timeout_ms))?
    }

    async fn connect_inner(options: &ConnectOptions) -> Result<Self> {
        let mut stream = TcpStream::connect(options.address.as_str())
            .await
            .map_err(|e| TransportError::network_with_source("Failed to connect to RSSL server", e))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TransportError::network_with_source("Failed to get peer address", e))?;

        let mut request = BytesMut::with_capacity(8);
        framing::encode_connect_request(&mut request, options.ping_timeout_secs);
        stream.write_all(&request).await.map_err(|e| {
            TransportError::connection_with_source("Failed to send connect request", Some(peer_addr), e)
        })?;

        let decoder = FrameDecoder::new(options.max_frame_size);
        let mut read_buffer = BytesMut::with_capacity(options.buffer_size);
        let negotiated = loop {
            if let Some(frame) = decoder.decode(&mut read_buffer)? {
                match frame {
                    Frame::ConnectAck {
                        version,
                        ping_timeout,
                    } => {
                        if version != RIPC_VERSION {
                            warn!(peer = %peer_addr, version, "Server acked with a different RIPC version");
                        }
                        break ping_timeout.min(options.ping_timeout_secs).max(1);
                    }
                    Frame::ConnectNak { reason } => {
                        return Err(TransportError::Rejected {
                            reason,
                            remote_addr: Some(peer_addr),
                        });
                    }
                    other => {
                        return Err(TransportError::protocol(format!(
                            "unexpected frame during handshake: {:?}",
                            other
                        )));
                    }
                }
            }
            let n = stream.read_buf(&mut read_buffer).await.map_err(|e| {
                TransportError::connection_with_source("Failed to read connect ack", Some(peer_addr), e)
            })?;
            if n == 0 {
                return Err(TransportError::Closed {
                    remote_addr: Some(peer_addr),
                });
            }
        };

        info!(peer = %peer_addr, ping_timeout_secs = negotiated, "RSSL connection established");
        let mut conn = Self::new(
            stream,
            peer_addr,
            Duration::from_secs(negotiated as u64),
            decoder,
            options.buffer_size,
        );
        conn.read_buffer = read_buffer;
        Ok(conn)
    }

    /// Complete the server side of the handshake on an accepted socket
    ///
    /// The negotiated ping timeout is the smaller of the client's request and `max_ping_secs`.
    pub async fn accept(mut stream: TcpStream, max_ping_secs: u16) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TransportError::network_with_source("Failed to get peer address", e))?;
        let decoder = FrameDecoder::default();
        let mut read_buffer = BytesMut::with_capacity(1024);

        let requested = loop {
            if let Some(frame) = decoder.decode(&mut read_buffer)? {
                match frame {
                    Frame::ConnectRequest { ping_timeout, .. } => break ping_timeout,
                    other => {
                        return Err(TransportError::protocol(format!(
                            "expected connect request, got {:?}",
                            other
                        )));
                    }
                }
            }
            let n = stream.read_buf(&mut read_buffer).await.map_err(|e| {
                TransportError::connection_with_source("Failed to read connect request", Some(peer_addr), e)
            })?;
            if n == 0 {
                return Err(TransportError::Closed {
                    remote_addr: Some(peer_addr),
                });
            }
        };

        let negotiated = requested.min(max_ping_secs).max(1);
        let mut ack = BytesMut::with_capacity(8);
        framing::encode_connect_ack(&mut ack, negotiated);
        stream.write_all(&ack).await.map_err(|e| {
            TransportError::connection_with_source("Failed to send connect ack", Some(peer_addr), e)
        })?;

        debug!(peer = %peer_addr, ping_timeout_secs = negotiated, "Accepted RSSL connection");
        let mut conn = Self::new(
            stream,
            peer_addr,
            Duration::from_secs(negotiated as u64),
            decoder,
            64 * 1024,
        );
        conn.read_buffer = read_buffer;
        Ok(conn)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Ping timeout negotiated during the handshake
    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    /// Frame one RWF message into the write buffer
    pub fn queue_message(&mut self, message: &[u8]) -> Result<()> {
        framing::encode_data(&mut self.write_buffer, message)
    }

    pub fn queue_ping(&mut self) {
        framing::encode_ping(&mut self.write_buffer);
    }

    /// Wait for readability, and writability when bytes are queued
    pub async fn ready(&self) -> Result<Ready> {
        let interest = if self.has_pending_writes() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.stream
            .ready(interest)
            .await
            .map_err(|e| TransportError::network_with_source("Socket readiness failed", e))
    }

    /// Read and decode everything available without blocking
    ///
    /// Stops when the socket would block or when `deadline` passes, whichever
    /// comes first; undecoded partial frames stay buffered.
    pub fn try_read(&mut self, deadline: Instant) -> Result<ReadBatch> {
        let mut batch = ReadBatch::default();
        loop {
            self.drain_frames(&mut batch)?;
            if Instant::now() >= deadline {
                batch.hit_deadline = true;
                return Ok(batch);
            }

            if self.read_buffer.capacity() - self.read_buffer.len() < self.buffer_size / 4 {
                self.read_buffer.reserve(self.buffer_size);
            }
            match self.stream.try_read_buf(&mut self.read_buffer) {
                Ok(0) => {
                    return Err(TransportError::Closed {
                        remote_addr: Some(self.peer_addr),
                    })
                }
                Ok(n) => {
                    batch.bytes += n;
                    self.bytes_received += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.drain_frames(&mut batch)?;
                    return Ok(batch);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(TransportError::connection_with_source(
                        "Socket read failed",
                        Some(self.peer_addr),
                        e,
                    ))
                }
            }
        }
    }

    fn drain_frames(&mut self, batch: &mut ReadBatch) -> Result<()> {
        while let Some(frame) = self.decoder.decode(&mut self.read_buffer)? {
            match frame {
                Frame::Ping => batch.pings += 1,
                Frame::Data(messages) => batch.messages.extend(messages),
                other => {
                    return Err(TransportError::protocol(format!(
                        "unexpected frame after handshake: {:?}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Write as much of the buffered output as the socket accepts
    ///
    /// Returns the number of bytes written.
    pub fn try_flush(&mut self) -> Result<usize> {
        let mut written = 0;
        while !self.write_buffer.is_empty() {
            match self.stream.try_write(&self.write_buffer) {
                Ok(0) => {
                    return Err(TransportError::Closed {
                        remote_addr: Some(self.peer_addr),
                    })
                }
                Ok(n) => {
                    let _ = self.write_buffer.split_to(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(TransportError::connection_with_source(
                        "Socket write failed",
                        Some(self.peer_addr),
                        e,
                    ))
                }
            }
        }
        self.bytes_sent += written as u64;
        Ok(written)
    }

    /// Flush everything, waiting for writability as needed
    pub async fn flush(&mut self) -> Result<()> {
        while self.has_pending_writes() {
            self.stream
                .writable()
                .await
                .map_err(|e| TransportError::network_with_source("Socket writability failed", e))?;
            self.try_flush()?;
        }
        Ok(())
    }

    /// Wait for the next batch of messages (blocking helper for tests and tools)
    pub async fn read_batch(&mut self) -> Result<ReadBatch> {
        let mut buffered = ReadBatch::default();
        self.drain_frames(&mut buffered)?;
        if !buffered.messages.is_empty() || buffered.pings > 0 {
            return Ok(buffered);
        }
        loop {
            self.stream
                .readable()
                .await
                .map_err(|e| TransportError::network_with_source("Socket readability failed", e))?;
            let batch = self.try_read(Instant::now() + Duration::from_secs(1))?;
            if !batch.messages.is_empty() || batch.pings > 0 {
                return Ok(batch);
            }
        }
    }

    /// Close the connection after flushing what can be flushed
    pub async fn close(mut self) {
        if let Err(e) = self.try_flush() {
            debug!(peer = %self.peer_addr, "Discarding unsent bytes on close: {}", e);
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer_addr, "Error shutting down RSSL connection: {}", e);
        }
        info!(
            peer = %self.peer_addr,
            bytes_sent = self.bytes_sent,
            bytes_received = self.bytes_received,
            "Closed RSSL connection"
        );
    }
}
