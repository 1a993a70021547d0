//! Transport tests over real loopback sockets
//!
//! Uses real connections, no mocks: a listener plays the server side of the
//! RIPC handshake and exchanges frames with the client connection.

use super::*;
use crate::error::TransportError;
use crate::framing;
use bytes::BytesMut;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn options(address: String) -> ConnectOptions {
    ConnectOptions {
        address,
        connect_timeout: Duration::from_secs(2),
        ping_timeout_secs: 60,
        ..Default::default()
    }
}

mod handshake {
    use super::*;

    #[tokio::test]
    async fn test_ping_timeout_negotiated_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let conn = RsslConnection::accept(stream, 30).await.unwrap();
            conn.ping_timeout()
        });

        let client = RsslConnection::connect(&options(addr.to_string())).await.unwrap();
        assert_eq!(client.ping_timeout(), Duration::from_secs(30));
        assert_eq!(server.await.unwrap(), Duration::from_secs(30));
    }

    #[test_log::test(tokio::test)]
    async fn test_connect_nak_is_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await.unwrap();
            let mut nak = BytesMut::new();
            framing::encode_connect_nak(&mut nak, "too many connections");
            stream.write_all(&nak).await.unwrap();
        });

        match RsslConnection::connect(&options(addr.to_string())).await {
            Err(TransportError::Rejected { reason, .. }) => {
                assert_eq!(reason, "too many connections")
            }
            other => panic!("expected rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let mut opts = options(addr.to_string());
        opts.connect_timeout = Duration::from_millis(200);
        let err = RsslConnection::connect(&opts).await.err().unwrap();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_address_is_configuration_error() {
        let err = RsslConnection::connect(&ConnectOptions::default()).await.err().unwrap();
        assert!(!err.is_retryable());
    }
}

mod data_flow {
    use super::*;

    async fn pair() -> (RsslConnection, RsslConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            RsslConnection::accept(stream, 60).await.unwrap()
        });
        let client = RsslConnection::connect(&options(addr.to_string())).await.unwrap();
        (client, server.await.unwrap())
    }

    #[tokio::test]
    async fn test_messages_and_pings_cross_the_socket() {
        let (mut client, mut server) = pair().await;

        client.queue_message(b"first").unwrap();
        client.queue_ping();
        client.queue_message(b"second").unwrap();
        client.flush().await.unwrap();
        assert!(!client.has_pending_writes());

        let mut messages = Vec::new();
        let mut pings = 0;
        while messages.len() < 2 || pings < 1 {
            let batch = server.read_batch().await.unwrap();
            messages.extend(batch.messages);
            pings += batch.pings;
        }
        assert_eq!(messages, vec![&b"first"[..], &b"second"[..]]);
        assert_eq!(pings, 1);
    }

    #[tokio::test]
    async fn test_large_message_survives_partial_reads() {
        let (mut client, mut server) = pair().await;
        let big = vec![0xAB; 60_000];
        server.queue_message(&big).unwrap();
        server.flush().await.unwrap();

        let batch = client.read_batch().await.unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].len(), 60_000);
    }

    #[test_log::test(tokio::test)]
    async fn test_peer_close_is_reported() {
        let (mut client, server) = pair().await;
        server.close().await;
        let err = loop {
            match client.read_batch().await {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(matches!(err, TransportError::Closed { .. }));
    }

    #[tokio::test]
    async fn test_expired_deadline_reads_nothing_new() {
        let (mut client, _server) = pair().await;
        let batch = client.try_read(Instant::now()).unwrap();
        assert!(batch.hit_deadline);
        assert!(batch.messages.is_empty());
    }
}
