// tests/integration/channel_test.rs

use super::test_helpers::{MockBackend, Script, eventually, reply_to, reply_with};
use gatewire::GatewireError;
use gatewire::WireMessage;
use gatewire::connection::{ChannelOptions, Connection, Correlation, RequestChannel};
use gatewire::core::protocol::tags;
use gatewire::core::transport::TransportAddress;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

async fn open(address: &TransportAddress, options: ChannelOptions) -> Arc<RequestChannel> {
    let mut conn = Connection::new(address.clone());
    conn.connect().await.unwrap();
    conn.into_channel(options).unwrap()
}

#[tokio::test]
async fn test_pipelined_replies_matched_out_of_order() {
    let backend = MockBackend::start(|req| match req.command() {
        Some("SLOW") => Script::Delayed(Duration::from_millis(200), vec![reply_to(req)]),
        _ => Script::Reply(vec![reply_to(req)]),
    })
    .await;
    let channel = open(&backend.address, ChannelOptions::default()).await;
    let wait = Duration::from_secs(5);

    let (slow, fast) = tokio::join!(
        channel.request(WireMessage::with_command("SLOW"), wait),
        async {
            // Make sure SLOW is written first.
            tokio::time::sleep(Duration::from_millis(20)).await;
            channel.request(WireMessage::with_command("FAST"), wait).await
        }
    );

    assert_eq!(slow.unwrap().command(), Some("SLOW"));
    assert_eq!(fast.unwrap().command(), Some("FAST"));
    assert_eq!(channel.pending(), 0);

    let received = backend.received();
    assert_eq!(received.len(), 2);
    assert_ne!(
        received[0].get(tags::REQUEST_ID),
        received[1].get(tags::REQUEST_ID)
    );
}

#[tokio::test]
async fn test_request_times_out_within_bounds() {
    let backend = MockBackend::start(|_| Script::Silent).await;
    let channel = open(&backend.address, ChannelOptions::default()).await;

    let started = Instant::now();
    let err = channel
        .request(WireMessage::with_command("QUERY"), Duration::from_secs(2))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, GatewireError::RequestTimeout(Duration::from_secs(2)));
    assert!(elapsed >= Duration::from_secs(2), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2500), "fired late: {elapsed:?}");
    assert_eq!(channel.consecutive_timeouts(), 1);
    assert_eq!(channel.pending(), 0);
    // A timeout alone does not close the channel.
    assert!(!channel.is_closed());
}

#[tokio::test]
async fn test_late_reply_after_timeout_is_unmatched() {
    let backend = MockBackend::start(|req| match req.command() {
        Some("LATE") => Script::Delayed(Duration::from_millis(300), vec![reply_to(req)]),
        _ => Script::Reply(vec![reply_to(req)]),
    })
    .await;
    let (tx, mut rx) = mpsc::channel(8);
    let channel = open(
        &backend.address,
        ChannelOptions {
            unsolicited: Some(tx),
            ..Default::default()
        },
    )
    .await;

    let err = channel
        .request(WireMessage::with_command("LATE"), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewireError::RequestTimeout(_)));

    let late = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(late.command(), Some("LATE"));

    // The channel keeps working, and a success resets the timeout count.
    let reply = channel
        .request(WireMessage::with_command("ECHO"), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(reply.command(), Some("ECHO"));
    assert_eq!(channel.consecutive_timeouts(), 0);
}

#[tokio::test]
async fn test_multipart_reply_is_collected() {
    let backend = MockBackend::start(|req| {
        Script::Reply(vec![
            reply_with(req, &[(tags::MULTIPART, tags::MORE_PARTS), ("SQ", "1")]),
            reply_with(req, &[(tags::MULTIPART, tags::MORE_PARTS), ("SQ", "2")]),
            reply_with(req, &[("SQ", "3")]),
        ])
    })
    .await;
    let channel = open(&backend.address, ChannelOptions::default()).await;

    let parts = channel
        .request_parts(WireMessage::with_command("LIST"), Duration::from_secs(5))
        .await
        .unwrap();
    let sequence: Vec<_> = parts.iter().map(|p| p.get("SQ").unwrap()).collect();
    assert_eq!(sequence, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_peer_hangup_fails_pending_request() {
    let backend = MockBackend::start(|_| Script::Hangup).await;
    let channel = open(&backend.address, ChannelOptions::default()).await;

    let err = channel
        .request(WireMessage::with_command("QUERY"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err:?}");
    assert!(eventually(Duration::from_secs(1), || channel.is_closed()).await);

    let err = channel
        .request(WireMessage::with_command("QUERY"), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err, GatewireError::ConnectionClosed);
}

#[tokio::test]
async fn test_close_fails_outstanding_requests() {
    let backend = MockBackend::start(|_| Script::Silent).await;
    let channel = open(&backend.address, ChannelOptions::default()).await;

    let pending = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            channel
                .request(WireMessage::with_command("QUERY"), Duration::from_secs(10))
                .await
        })
    };
    assert!(eventually(Duration::from_secs(1), || channel.pending() == 1).await);

    channel.close().await;
    channel.close().await;
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err, GatewireError::ConnectionClosed);
    assert!(channel.is_closed());
}

#[tokio::test]
async fn test_command_correlation() {
    let backend = MockBackend::start(|req| match req.command() {
        Some("HOLD") => Script::Delayed(Duration::from_millis(300), vec![reply_to(req)]),
        _ => Script::Reply(vec![reply_to(req)]),
    })
    .await;
    let channel = open(
        &backend.address,
        ChannelOptions {
            correlation: Correlation::Command,
            ..Default::default()
        },
    )
    .await;
    let wait = Duration::from_secs(5);

    let reply = channel
        .request(WireMessage::with_command("ECHO"), wait)
        .await
        .unwrap();
    assert_eq!(reply.command(), Some("ECHO"));
    assert!(backend.received()[0].get(tags::REQUEST_ID).is_none());

    // Only one request per command may be in flight.
    let (first, second) = tokio::join!(
        channel.request(WireMessage::with_command("HOLD"), wait),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            channel.request(WireMessage::with_command("HOLD"), wait).await
        }
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(GatewireError::InvalidState(_))));
}

#[tokio::test]
async fn test_forward_relays_reply_to_destination() {
    let backend = MockBackend::start(|req| {
        if req.contains(tags::STATUS) {
            // A relayed reply; don't answer it.
            Script::Silent
        } else {
            Script::Reply(vec![reply_with(req, &[("PL", "payload")])])
        }
    })
    .await;
    let source = open(&backend.address, ChannelOptions::default()).await;
    let destination = open(&backend.address, ChannelOptions::default()).await;

    source
        .forward(
            WireMessage::with_command("FETCH"),
            Arc::clone(&destination),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert!(
        eventually(Duration::from_secs(2), || {
            backend
                .received()
                .iter()
                .any(|m| m.get("PL") == Some("payload"))
        })
        .await
    );
    assert!(eventually(Duration::from_secs(1), || source.pending() == 0).await);
}

#[tokio::test]
async fn test_forward_registration_expires() {
    let backend = MockBackend::start(|_| Script::Silent).await;
    let source = open(&backend.address, ChannelOptions::default()).await;
    let destination = open(&backend.address, ChannelOptions::default()).await;

    source
        .forward(
            WireMessage::with_command("FETCH"),
            destination,
            Duration::from_millis(100),
        )
        .await
        .unwrap();
    assert_eq!(source.pending(), 1);
    assert!(eventually(Duration::from_secs(1), || source.pending() == 0).await);
}

#[tokio::test]
async fn test_expired_forward_leaves_reused_key_alone() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let backend = {
        let fetches = Arc::clone(&fetches);
        MockBackend::start(move |req| {
            if req.contains(tags::STATUS) {
                return Script::Silent;
            }
            // The first FETCH completes the forward at once; the next is
            // answered after the forward's ttl has elapsed.
            if fetches.fetch_add(1, Ordering::SeqCst) == 0 {
                Script::Reply(vec![reply_to(req)])
            } else {
                Script::Delayed(Duration::from_millis(400), vec![reply_to(req)])
            }
        })
        .await
    };
    let options = || ChannelOptions {
        correlation: Correlation::Command,
        ..Default::default()
    };
    let source = open(&backend.address, options()).await;
    let destination = open(&backend.address, options()).await;

    source
        .forward(
            WireMessage::with_command("FETCH"),
            destination,
            Duration::from_millis(200),
        )
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(1), || source.pending() == 0).await);

    let reply = source
        .request(WireMessage::with_command("FETCH"), Duration::from_secs(2))
        .await;
    assert_eq!(reply.unwrap().command(), Some("FETCH"));
    assert!(!source.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forward_keeps_multipart_order() {
    const PARTS: usize = 300;
    let backend = MockBackend::start(|req| {
        if req.contains(tags::STATUS) {
            return Script::Silent;
        }
        let parts = (0..PARTS)
            .map(|i| {
                let more = if i + 1 < PARTS { tags::MORE_PARTS } else { "N" };
                let sq = i.to_string();
                reply_with(req, &[("SQ", sq.as_str()), (tags::MULTIPART, more)])
            })
            .collect();
        Script::Reply(parts)
    })
    .await;
    let source = open(&backend.address, ChannelOptions::default()).await;
    let destination = open(&backend.address, ChannelOptions::default()).await;

    source
        .forward(
            WireMessage::with_command("FETCH"),
            destination,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    let relayed = || -> Vec<usize> {
        backend
            .received()
            .iter()
            .filter_map(|m| m.get("SQ"))
            .map(|sq| sq.parse().unwrap())
            .collect()
    };
    assert!(eventually(Duration::from_secs(5), || relayed().len() == PARTS).await);
    assert_eq!(relayed(), (0..PARTS).collect::<Vec<_>>());
    assert_eq!(source.pending(), 0);
}
