//! Integration tests for aerobio-client.
//!
//! Each test drives a full `Connection` against a scripted peer on the other
//! end of an in-memory transport.

use std::time::Duration;

use aerobio_client::codec::{decode_message, encode_envelope, Encoding};
use aerobio_client::protocol::control::{BPSIZE, MSGSNT};
use aerobio_client::protocol::{CloseInfo, Envelope, FlowStats, Operation, ResetWindow, SetWindow};
use aerobio_client::transport::{Transport, WireMessage};
use aerobio_client::{
    Connection, ConnectionConfig, ConnectionHandle, ConnectionState, DispatchTable, Error, Keyword,
    KeywordRegistry, Value,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

/// The far end of the transport, speaking the wire protocol by hand.
struct Peer {
    transport: Transport,
}

impl Peer {
    async fn send(&mut self, envelope: Envelope) {
        let frame = encode_envelope(&envelope, Encoding::Binary).unwrap();
        self.send_raw(frame).await;
    }

    async fn send_raw(&mut self, frame: WireMessage) {
        self.transport.sink.send(frame).await.unwrap();
    }

    async fn set_window(&mut self, window_size: usize) {
        self.send(SetWindow { window_size, received: 0 }.to_envelope()).await;
    }

    async fn reset(&mut self) {
        self.send(ResetWindow::default().to_envelope()).await;
    }

    async fn recv_raw(&mut self) -> WireMessage {
        timeout(WAIT, self.transport.stream.next())
            .await
            .expect("peer timed out waiting for a frame")
            .expect("transport ended")
            .unwrap()
    }

    async fn recv(&mut self) -> Envelope {
        let frame = self.recv_raw().await;
        decode_message(&frame).unwrap().expect("expected a data frame")
    }

    async fn expect_silence(&mut self) {
        assert!(
            timeout(Duration::from_millis(50), self.transport.stream.next())
                .await
                .is_err(),
            "peer received an unexpected frame"
        );
    }
}

/// Envelopes as seen by the dispatcher.
struct Events {
    rx: mpsc::UnboundedReceiver<(Operation, Value)>,
}

impl Events {
    async fn next(&mut self) -> (Operation, Value) {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for an envelope")
            .expect("dispatcher dropped")
    }

    async fn expect(&mut self, op: Operation) -> Value {
        let (got, payload) = self.next().await;
        assert_eq!(got, op, "unexpected envelope with payload {payload}");
        payload
    }
}

fn start() -> (Connection, Peer, Events) {
    start_with(ConnectionConfig::default())
}

fn start_with(config: ConnectionConfig) -> (Connection, Peer, Events) {
    let (local, remote) = Transport::memory_pair(64);
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Connection::open(
        local,
        move |_: &ConnectionHandle, op: Operation, payload: Value| {
            let _ = tx.send((op, payload));
        },
        config,
    );
    (conn, Peer { transport: remote }, Events { rx })
}

async fn wait_stats(handle: &ConnectionHandle, ready: impl Fn(&FlowStats) -> bool) -> FlowStats {
    timeout(WAIT, async {
        loop {
            let stats = handle.stats().await.unwrap();
            if ready(&stats) {
                return stats;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("stats never reached the expected state")
}

fn count(payload: &Value, key: &str) -> Option<i64> {
    payload.get(key).and_then(Value::as_i64)
}

#[tokio::test]
async fn test_window_of_three_defers_fourth_until_reset() {
    let (conn, mut peer, mut events) = start();
    let handle = conn.handle();
    events.expect(Operation::Open).await;

    peer.set_window(3).await;
    wait_stats(&handle, |s| s.window_size == 3).await;

    for i in 1..=4 {
        handle.queue_msg(Value::map().kw("seq", i).build()).unwrap();
    }

    for i in 1..=3 {
        let sent = events.expect(Operation::Sent).await;
        assert_eq!(count(&sent, MSGSNT), Some(i));
    }
    let waiting = events.expect(Operation::BpWait).await;
    assert_eq!(count(&waiting, MSGSNT), Some(3));
    assert_eq!(waiting.get("encode").and_then(Value::as_str), Some("binary"));
    assert_eq!(waiting.get("msg").and_then(|m| count(m, "seq")), Some(4));

    for i in 1..=3 {
        let envelope = peer.recv().await;
        assert_eq!(envelope.op, Operation::Msg);
        assert_eq!(count(&envelope.payload, "seq"), Some(i));
    }
    peer.expect_silence().await;

    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.sent, stats.deferred), (3, 1));

    peer.reset().await;
    let resumed = events.expect(Operation::BpResume).await;
    assert_eq!(
        resumed.get("op").and_then(Value::as_keyword),
        Some(&Keyword::new("reset"))
    );
    let sent = events.expect(Operation::Sent).await;
    assert_eq!(count(&sent, MSGSNT), Some(1));

    let envelope = peer.recv().await;
    assert_eq!(count(&envelope.payload, "seq"), Some(4));

    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.sent, stats.deferred), (1, 0));

    handle.stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deferred_messages_keep_their_order() {
    let (conn, mut peer, mut events) = start();
    let handle = conn.handle();
    events.expect(Operation::Open).await;

    peer.set_window(1).await;
    wait_stats(&handle, |s| s.window_size == 1).await;

    for i in 0..4 {
        handle.queue_msg(i).unwrap();
    }
    wait_stats(&handle, |s| s.deferred == 3).await;

    let mut order = vec![peer.recv().await.payload];
    for _ in 0..3 {
        peer.reset().await;
        order.push(peer.recv().await.payload);
    }
    assert_eq!(
        order,
        vec![Value::from(0), Value::from(1), Value::from(2), Value::from(3)]
    );

    handle.stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_msg_resolves_when_transmitted() {
    let (conn, mut peer, mut events) = start();
    let handle = conn.handle();
    events.expect(Operation::Open).await;

    peer.set_window(1).await;
    wait_stats(&handle, |s| s.window_size == 1).await;

    handle.send_msg("first").await.unwrap();
    let second = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.send_msg("second").await })
    };
    wait_stats(&handle, |s| s.deferred == 1).await;
    assert!(!second.is_finished());

    assert_eq!(peer.recv().await.payload, Value::from("first"));
    peer.reset().await;
    timeout(WAIT, second).await.unwrap().unwrap().unwrap();
    assert_eq!(peer.recv().await.payload, Value::from("second"));

    handle.stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inbound_messages_trigger_reset_on_window_boundary() {
    let (conn, mut peer, mut events) = start();
    let handle = conn.handle();
    events.expect(Operation::Open).await;

    peer.set_window(3).await;
    peer.send(Envelope::msg("a")).await;
    peer.send(Envelope::msg("b")).await;

    assert_eq!(events.expect(Operation::Msg).await, Value::from("a"));
    assert_eq!(events.expect(Operation::Msg).await, Value::from("b"));
    assert_eq!(handle.stats().await.unwrap().received, 2);
    peer.expect_silence().await;

    peer.send(Envelope::msg("c")).await;
    assert_eq!(events.expect(Operation::Msg).await, Value::from("c"));

    let ack = peer.recv().await;
    assert_eq!(ack.op, Operation::Reset);
    assert_eq!(ResetWindow::from_payload(&ack.payload), ResetWindow { sent: 0 });
    assert_eq!(handle.stats().await.unwrap().received, 0);

    handle.stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_msg_payload_is_delivered_verbatim() {
    let (conn, mut peer, mut events) = start();
    events.expect(Operation::Open).await;
    peer.set_window(10).await;

    let payload = Value::map()
        .kw("op", Keyword::new("status"))
        .kw("eid", "exp-17")
        .kw("done", true)
        .build();
    peer.send(Envelope::msg(payload.clone())).await;
    assert_eq!(events.expect(Operation::Msg).await, payload);

    conn.handle().stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_decoded_keywords_are_interned() {
    let keywords = KeywordRegistry::new();
    let (conn, mut peer, mut events) = start_with(ConnectionConfig {
        keywords: keywords.clone(),
        ..ConnectionConfig::default()
    });
    events.expect(Operation::Open).await;
    peer.set_window(10).await;

    for eid in ["exp-1", "exp-2"] {
        let payload = Value::map()
            .kw("op", Keyword::new("status"))
            .kw("eid", eid)
            .build();
        peer.send(Envelope::msg(payload)).await;
    }

    let first = events.expect(Operation::Msg).await;
    let second = events.expect(Operation::Msg).await;
    let tag = |payload: &Value| payload.get("op").and_then(Value::as_keyword).cloned().unwrap();
    assert!(tag(&first).ptr_eq(&tag(&second)));
    assert!(tag(&first).ptr_eq(&keywords.intern("status")));
    assert!(keywords.get("eid").is_some());

    conn.handle().stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let (conn, mut peer, mut events) = start();
    let handle = conn.handle();
    events.expect(Operation::Open).await;
    peer.set_window(10).await;

    peer.send_raw(WireMessage::Text(r#"{"payload":1}"#.to_string())).await;
    peer.send_raw(WireMessage::Text(r#"{"op":"msg"}"#.to_string())).await;
    peer.send_raw(WireMessage::Text(r#"{"op":"launch","payload":1}"#.to_string())).await;
    peer.send_raw(WireMessage::Text("not json".to_string())).await;
    peer.send_raw(WireMessage::Binary(Bytes::from_static(&[0xc1]))).await;
    peer.send(Envelope::new(Operation::Sent, Value::Nil)).await;
    peer.send(Envelope::msg("still alive")).await;

    assert_eq!(events.expect(Operation::Msg).await, Value::from("still alive"));
    assert_eq!(handle.state(), ConnectionState::Open);
    assert_eq!(handle.stats().await.unwrap().received, 1);

    handle.stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_text_frames_are_understood() {
    let (conn, mut peer, mut events) = start();
    events.expect(Operation::Open).await;

    peer.send_raw(WireMessage::Text(
        r#"{"op":"set","payload":{"bpsize":5,"msgrcv":0}}"#.to_string(),
    ))
    .await;
    peer.send_raw(WireMessage::Text(r#"{"op":"msg","payload":{"data":"hi"}}"#.to_string()))
        .await;

    let payload = events.expect(Operation::Msg).await;
    assert_eq!(payload.get("data").and_then(Value::as_str), Some("hi"));
    assert_eq!(conn.handle().stats().await.unwrap().window_size, 5);

    conn.handle().stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_outbound_text_encoding() {
    let (conn, mut peer, mut events) = start_with(ConnectionConfig {
        encoding: Encoding::Text,
        ..ConnectionConfig::default()
    });
    let handle = conn.handle();
    events.expect(Operation::Open).await;
    peer.set_window(2).await;
    wait_stats(&handle, |s| s.window_size == 2).await;

    handle.send_msg(Value::map().kw("cmd", "check").build()).await.unwrap();
    match peer.recv_raw().await {
        WireMessage::Text(text) => {
            assert_eq!(text, r#"{"op":"msg","payload":{"cmd":"check"}}"#)
        }
        other => panic!("expected a text frame, got {other:?}"),
    }

    handle
        .send_msg_with("raw", Encoding::Binary)
        .await
        .unwrap();
    assert!(matches!(peer.recv_raw().await, WireMessage::Binary(_)));

    handle.stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_close_yields_close_then_stop() {
    let (conn, mut peer, mut events) = start();
    let handle = conn.handle();
    events.expect(Operation::Open).await;

    peer.send_raw(WireMessage::Close(Some(CloseInfo::new(1001, "going away"))))
        .await;

    let close = events.expect(Operation::Close).await;
    assert_eq!(count(&close, "code"), Some(1001));
    assert_eq!(close.get("reason").and_then(Value::as_str), Some("going away"));

    let stop = events.expect(Operation::Stop).await;
    assert_eq!(stop.get("cause").and_then(Value::as_str), Some("closed"));
    assert_eq!(count(&stop, "connection"), Some(conn.id() as i64));

    conn.wait_for_shutdown().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert!(matches!(handle.send_msg(1).await, Err(Error::ConnectionStopped)));
}

#[tokio::test]
async fn test_dropped_transport_is_an_abnormal_close() {
    let (conn, peer, mut events) = start();
    events.expect(Operation::Open).await;
    drop(peer);

    let close = events.expect(Operation::Close).await;
    assert_eq!(count(&close, "code"), Some(1006));
    events.expect(Operation::Stop).await;
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_stop_ends_connection() {
    let (conn, mut peer, mut events) = start();
    events.expect(Operation::Open).await;

    peer.send(Envelope::new(Operation::Stop, Value::map().build())).await;
    let stop = events.expect(Operation::Stop).await;
    assert_eq!(stop.get("cause").and_then(Value::as_str), Some("remote stop"));

    assert_eq!(peer.recv_raw().await, WireMessage::Close(Some(CloseInfo::normal())));
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_local_stop_fails_deferred_senders() {
    let (conn, mut peer, mut events) = start();
    let handle = conn.handle();
    events.expect(Operation::Open).await;

    // No window announced yet: the message waits.
    let pending = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.send_msg("never").await })
    };
    events.expect(Operation::BpWait).await;

    handle.stop_with("user abort");
    let stop = events.expect(Operation::Stop).await;
    assert_eq!(stop.get("cause").and_then(Value::as_str), Some("user abort"));
    assert!(matches!(
        timeout(WAIT, pending).await.unwrap().unwrap(),
        Err(Error::ConnectionStopped)
    ));

    assert!(peer.recv_raw().await.is_close());
    conn.wait_for_shutdown().await.unwrap();
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_transport_error_yields_error_then_stop() {
    let set = SetWindow { window_size: 3, received: 0 }.to_envelope();
    let frames = vec![
        Ok(encode_envelope(&set, Encoding::Binary).unwrap()),
        Err(Error::Transport("connection reset".to_string())),
    ];
    let stream = futures::stream::iter(frames).chain(futures::stream::pending());
    let sink = futures::sink::drain().sink_map_err(|never| match never {});
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Connection::open(
        Transport::new(sink, stream),
        move |_: &ConnectionHandle, op: Operation, payload: Value| {
            let _ = tx.send((op, payload));
        },
        ConnectionConfig::default(),
    );
    let mut events = Events { rx };

    events.expect(Operation::Open).await;
    let error = events.expect(Operation::Error).await;
    assert!(error
        .get("err")
        .and_then(Value::as_str)
        .is_some_and(|e| e.contains("connection reset")));
    let stop = events.expect(Operation::Stop).await;
    assert_eq!(stop.get("cause").and_then(Value::as_str), Some("error"));

    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dispatcher_can_reply_through_handle() {
    let (local, remote) = Transport::memory_pair(64);
    let mut peer = Peer { transport: remote };
    let table = DispatchTable::new().on(Operation::Msg, |conn, payload| {
        let reply = Value::map().kw("echo", payload).build();
        conn.queue_msg(reply).unwrap();
    });
    let conn = Connection::open(local, table, ConnectionConfig::default());

    peer.set_window(4).await;
    peer.send(Envelope::msg("ping")).await;

    let reply = peer.recv().await;
    assert_eq!(reply.op, Operation::Msg);
    assert_eq!(reply.payload.get("echo"), Some(&Value::from("ping")));

    conn.handle().stop();
    conn.wait_for_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_set_requires_window_size() {
    let (conn, mut peer, mut events) = start();
    let handle = conn.handle();
    events.expect(Operation::Open).await;

    peer.send(Envelope::new(Operation::Set, Value::map().kw("msgrcv", 0).build()))
        .await;
    peer.send(Envelope::new(Operation::Set, Value::map().kw(BPSIZE, 7).build()))
        .await;
    let stats = wait_stats(&handle, |s| s.window_size != 0).await;
    assert_eq!(stats.window_size, 7);

    handle.stop();
    conn.wait_for_shutdown().await.unwrap();
}
