//! End-to-end tests against an in-process WebSocket server.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async, WebSocketStream};

use iwanrpc_core::{
    ClientConfig, HealthStatus, JsonRpcRequest, RequestOptions, RpcTransport, SignedEnvelope,
    Signer, TransportError,
};
use iwanrpc_ws::{ConnectionState, WsTransport};

type ServerWs = WebSocketStream<TcpStream>;

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn config(port: u16) -> ClientConfig {
    ClientConfig::new("test_key", "test_secret")
        .with_endpoint("127.0.0.1", port, false)
        .with_request_timeout(Duration::from_secs(5))
        .with_heartbeat(Duration::from_secs(60), 3)
        .with_reconnect_delay(Duration::from_millis(50))
        .with_sweep_interval(Duration::from_millis(10))
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (tcp, _) = listener.accept().await.unwrap();
    accept_async(tcp).await.unwrap()
}

/// Next request from the client, skipping control frames.
async fn recv_request(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await.expect("client hung up").expect("read error") {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

async fn reply(ws: &mut ServerWs, body: Value) {
    ws.send(Message::Text(body.to_string().into())).await.unwrap();
}

/// Keep reading (and thereby answering pings) until the client goes away.
async fn drain(mut ws: ServerWs) -> usize {
    let mut pings = 0;
    while let Some(Ok(msg)) = ws.next().await {
        if msg.is_ping() {
            pings += 1;
        }
    }
    pings
}

#[tokio::test]
async fn get_balance_round_trip() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut path = String::new();
        let mut ws = accept_hdr_async(
            tcp,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path = req.uri().path().to_string();
                Ok(resp)
            },
        )
        .await
        .unwrap();
        let req = recv_request(&mut ws).await;
        reply(&mut ws, json!({"jsonrpc": "2.0", "id": req["id"], "result": "123"})).await;
        (path, req, ws)
    });

    let transport = WsTransport::connect(config(port)).await.unwrap();
    let result = transport
        .request("getBalance", json!({"chainType": "WAN", "address": "0xabc"}))
        .await
        .unwrap();
    assert_eq!(result, json!("123"));

    let (path, req, _ws) = server.await.unwrap();
    assert_eq!(path, "/ws/v3/test_key");
    assert_eq!(req["jsonrpc"], "2.0");
    assert_eq!(req["method"], "getBalance");
    assert_eq!(req["params"]["chainType"], "WAN");
    assert_eq!(req["params"]["address"], "0xabc");
    assert!(req["params"]["timestamp"].is_u64());
    assert!(req["params"]["signature"].is_string());
    assert!(req["id"].is_u64());
    assert_eq!(transport.health(), HealthStatus::Healthy);
    assert!(!transport.url().contains("test_key"));
}

#[tokio::test]
async fn responses_in_reverse_order_reach_their_callers() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let first = recv_request(&mut ws).await;
        let second = recv_request(&mut ws).await;
        for req in [&second, &first] {
            reply(
                &mut ws,
                json!({"jsonrpc": "2.0", "id": req["id"], "result": req["params"]["tag"]}),
            )
            .await;
        }
        (first["id"].as_u64().unwrap(), second["id"].as_u64().unwrap(), ws)
    });

    let transport = WsTransport::connect(config(port)).await.unwrap();
    transport.wait_until_open().await.unwrap();
    let (a, b) = tokio::join!(
        transport.request("getBalance", json!({"tag": "first"})),
        transport.request("getBalance", json!({"tag": "second"})),
    );
    assert_eq!(a.unwrap(), json!("first"));
    assert_eq!(b.unwrap(), json!("second"));

    let (first_id, second_id, _ws) = server.await.unwrap();
    assert!(first_id < second_id, "requests must go out in call order");
}

#[tokio::test]
async fn permuted_responses_never_swap() {
    const N: u64 = 50;
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let mut reqs = Vec::new();
        for _ in 0..N {
            reqs.push(recv_request(&mut ws).await);
        }
        // interleave: odd positions first, then even positions reversed
        let (odd, even): (Vec<_>, Vec<_>) = reqs.into_iter().enumerate().partition(|(i, _)| i % 2 == 1);
        for (_, req) in odd.into_iter().chain(even.into_iter().rev()) {
            let n = req["params"]["n"].as_u64().unwrap();
            reply(&mut ws, json!({"jsonrpc": "2.0", "id": req["id"], "result": n * 10})).await;
        }
        ws
    });

    let transport = Arc::new(WsTransport::connect(config(port)).await.unwrap());
    let results = join_all((0..N).map(|n| {
        let t = transport.clone();
        async move { (n, t.request("getNonce", json!({"n": n})).await) }
    }))
    .await;
    for (n, result) in results {
        assert_eq!(result.unwrap(), json!(n * 10));
    }
    let _ws = server.await.unwrap();
}

#[tokio::test]
async fn thousand_concurrent_requests_get_distinct_ids() {
    const N: usize = 1000;
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let mut ids = HashSet::new();
        let mut reqs = Vec::with_capacity(N);
        for _ in 0..N {
            let req = recv_request(&mut ws).await;
            ids.insert(req["id"].as_u64().unwrap());
            reqs.push(req);
        }
        for req in reqs.iter().rev() {
            reply(&mut ws, json!({"jsonrpc": "2.0", "id": req["id"], "result": req["id"]})).await;
        }
        (ids.len(), ws)
    });

    let transport = Arc::new(WsTransport::connect(config(port)).await.unwrap());
    let results = join_all((0..N).map(|_| {
        let t = transport.clone();
        async move { t.request("getBlockNumber", json!({"chainType": "WAN"})).await }
    }))
    .await;

    let echoed: HashSet<u64> = results
        .into_iter()
        .map(|r| r.unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(echoed.len(), N);

    let (distinct, _ws) = server.await.unwrap();
    assert_eq!(distinct, N);
    assert_eq!(transport.pending_len().await, 0);
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        recv_request(&mut ws).await;
        drain(ws).await
    });

    let cfg = config(port).with_request_timeout(Duration::from_millis(100));
    let transport = WsTransport::connect(cfg).await.unwrap();
    transport.wait_until_open().await.unwrap();

    let start = Instant::now();
    let err = transport
        .request("getTxInfo", json!({"chainType": "WAN", "txHash": "0x1"}))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    match err {
        TransportError::Timeout { method, ms } => {
            assert_eq!(method, "getTxInfo");
            assert_eq!(ms, 100);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(100), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "fired late: {elapsed:?}");
    assert_eq!(transport.pending_len().await, 0);
    assert_eq!(transport.state(), ConnectionState::Open);

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn per_request_timeout_override() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        recv_request(&mut ws).await;
        drain(ws).await
    });

    let transport = WsTransport::connect(config(port)).await.unwrap();
    let start = Instant::now();
    let err = transport
        .request_with(
            "getGasPrice",
            json!({"chainType": "WAN"}),
            RequestOptions::with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout { ms: 50, .. }));
    assert!(start.elapsed() < Duration::from_secs(2));

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn abrupt_disconnect_fails_pending_and_reconnects_once() {
    const K: usize = 3;
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        for _ in 0..K {
            recv_request(&mut ws).await;
        }
        drop(ws);
        let second = timeout(Duration::from_secs(3), accept(&listener))
            .await
            .expect("client did not reconnect");
        let third = timeout(Duration::from_millis(500), listener.accept()).await;
        (second, third.is_err())
    });

    let transport = Arc::new(WsTransport::connect(config(port)).await.unwrap());
    transport.wait_until_open().await.unwrap();
    let results = join_all((0..K).map(|i| {
        let t = transport.clone();
        async move { t.request("getBlockNumber", json!({"chainType": "WAN", "i": i})).await }
    }))
    .await;

    for result in results {
        assert!(
            matches!(result, Err(TransportError::ConnectionLost)),
            "expected connection lost, got {result:?}"
        );
    }

    let (_second, no_third) = server.await.unwrap();
    assert!(no_third, "more than one reconnect sequence started");
    transport.wait_until_open().await.unwrap();
    assert_eq!(transport.pending_len().await, 0);
}

#[tokio::test]
async fn silent_peer_is_detected_by_heartbeat() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        // never read from the first socket, so no pong is ever written
        let first = accept(&listener).await;
        let second = timeout(Duration::from_secs(3), accept(&listener))
            .await
            .expect("heartbeat did not force a reconnect");
        (first, second)
    });

    let cfg = config(port).with_heartbeat(Duration::from_millis(50), 2);
    let transport = WsTransport::connect(cfg).await.unwrap();
    transport.wait_until_open().await.unwrap();

    let err = transport
        .request("getBlockNumber", json!({"chainType": "WAN"}))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectionLost));

    let (_first, _second) = server.await.unwrap();
    transport.wait_until_open().await.unwrap();
}

#[tokio::test]
async fn answered_heartbeats_keep_connection() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let ws = accept(&listener).await;
        let reader = tokio::spawn(drain(ws));
        let extra = timeout(Duration::from_millis(600), listener.accept()).await;
        (extra.is_err(), reader)
    });

    let cfg = config(port).with_heartbeat(Duration::from_millis(50), 2);
    let transport = WsTransport::connect(cfg).await.unwrap();
    transport.wait_until_open().await.unwrap();

    let (no_reconnect, reader) = server.await.unwrap();
    assert!(no_reconnect, "connection was recycled despite pongs");
    assert_eq!(transport.state(), ConnectionState::Open);

    transport.close().await;
    let pings = reader.await.unwrap();
    assert!(pings >= 3, "only {pings} heartbeat probes seen");
}

#[tokio::test]
async fn close_fails_inflight_and_stays_closed() {
    let (listener, port) = listener().await;
    let (got_tx, got_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        recv_request(&mut ws).await;
        let _ = got_tx.send(());
        drain(ws).await;
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    });

    let transport = Arc::new(WsTransport::connect(config(port)).await.unwrap());
    let inflight = {
        let t = transport.clone();
        tokio::spawn(async move { t.request("getBlockNumber", json!({"chainType": "WAN"})).await })
    };
    got_rx.await.unwrap();

    transport.close().await;
    assert!(matches!(
        inflight.await.unwrap(),
        Err(TransportError::ConnectionLost)
    ));
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert_eq!(transport.health(), HealthStatus::Unhealthy);

    let err = transport
        .request("getBlockNumber", json!({"chainType": "WAN"}))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Closed));
    assert!(matches!(transport.wait_until_open().await, Err(TransportError::Closed)));

    assert!(server.await.unwrap(), "client reconnected after close()");
}

#[tokio::test]
async fn remote_error_passed_through() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        reply(
            &mut ws,
            json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": -32602, "message": "invalid params", "data": {"field": "address"}}
            }),
        )
        .await;
        ws
    });

    let transport = WsTransport::connect(config(port)).await.unwrap();
    let err = transport
        .request("getBalance", json!({"chainType": "WAN", "address": ""}))
        .await
        .unwrap_err();
    match err {
        TransportError::Rpc(e) => {
            assert_eq!(e.code, -32602);
            assert_eq!(e.message, "invalid params");
            assert_eq!(e.data, Some(json!({"field": "address"})));
        }
        other => panic!("expected RPC error, got {other:?}"),
    }
    let _ws = server.await.unwrap();
}

#[tokio::test]
async fn stray_and_garbage_frames_are_dropped() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        reply(&mut ws, json!({"jsonrpc": "2.0", "id": 999_999, "result": "stray"})).await;
        ws.send(Message::Text("definitely not json".to_string().into()))
            .await
            .unwrap();
        reply(&mut ws, json!({"jsonrpc": "2.0", "method": "monitorEvent", "params": {}})).await;
        reply(&mut ws, json!({"jsonrpc": "2.0", "id": req["id"], "result": "0x2a"})).await;
        ws
    });

    let transport = WsTransport::connect(config(port)).await.unwrap();
    let result = transport
        .request("getNonce", json!({"chainType": "WAN", "address": "0xabc"}))
        .await
        .unwrap();
    assert_eq!(result, json!("0x2a"));
    assert_eq!(transport.state(), ConnectionState::Open);
    let _ws = server.await.unwrap();
}

struct RejectingSigner;

impl Signer for RejectingSigner {
    fn sign(&self, _req: JsonRpcRequest) -> Result<SignedEnvelope, TransportError> {
        Err(TransportError::Authentication("signing key unavailable".into()))
    }
}

#[tokio::test]
async fn signing_failure_never_reaches_the_wire() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        timeout(Duration::from_millis(300), recv_request(&mut ws))
            .await
            .is_err()
    });

    let transport = WsTransport::connect_with_signer(config(port), Arc::new(RejectingSigner))
        .await
        .unwrap();
    transport.wait_until_open().await.unwrap();

    let err = transport
        .request("getBalance", json!({"chainType": "WAN", "address": "0xabc"}))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Authentication(_)));
    assert_eq!(transport.pending_len().await, 0);
    assert!(server.await.unwrap(), "server received an unsigned request");
}

#[tokio::test]
async fn requests_queue_until_open() {
    let (listener, port) = listener().await;
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        // hold the handshake until the client has queued a request
        release_rx.await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let req = recv_request(&mut ws).await;
        reply(&mut ws, json!({"jsonrpc": "2.0", "id": req["id"], "result": "queued-ok"})).await;
        ws
    });

    let transport = Arc::new(WsTransport::connect(config(port)).await.unwrap());
    assert_eq!(transport.state(), ConnectionState::Connecting);
    assert_eq!(transport.health(), HealthStatus::Degraded);

    let call = {
        let t = transport.clone();
        tokio::spawn(async move { t.request("getBlockNumber", json!({"chainType": "WAN"})).await })
    };
    while transport.pending_len().await == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    release_tx.send(()).unwrap();

    assert_eq!(call.await.unwrap().unwrap(), json!("queued-ok"));
    let _ws = server.await.unwrap();
}

#[tokio::test]
async fn unreachable_server_fails_requests_instead_of_hanging() {
    let port = {
        let (listener, port) = listener().await;
        drop(listener);
        port
    };

    let transport = WsTransport::connect(config(port)).await.unwrap();
    let result = timeout(
        Duration::from_secs(3),
        transport.request("getBlockNumber", json!({"chainType": "WAN"})),
    )
    .await
    .expect("request hung while the server was unreachable");
    assert!(matches!(result, Err(TransportError::ConnectionLost)));
    assert_ne!(transport.state(), ConnectionState::Open);
}

#[tokio::test]
async fn missing_credentials_rejected_at_construction() {
    let cfg = ClientConfig::new("", "secret").with_endpoint("127.0.0.1", 1, false);
    assert!(matches!(
        WsTransport::connect(cfg).await,
        Err(TransportError::Config(_))
    ));
}

#[tokio::test]
async fn peer_that_stops_reading_cannot_stall_timeouts() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        // never read, so the client's socket buffer fills up
        let first = accept(&listener).await;
        let second = timeout(Duration::from_secs(5), accept(&listener))
            .await
            .expect("client did not reconnect after the write stall");
        (first, second)
    });

    let cfg = config(port)
        .with_request_timeout(Duration::from_millis(200))
        .with_heartbeat(Duration::from_millis(50), 2);
    let transport = Arc::new(WsTransport::connect(cfg).await.unwrap());
    transport.wait_until_open().await.unwrap();

    let blob = "x".repeat(1 << 20);
    let results = timeout(
        Duration::from_secs(3),
        join_all((0..32).map(|i| {
            let t = transport.clone();
            let blob = blob.clone();
            async move {
                t.request("getTxInfo", json!({"chainType": "WAN", "i": i, "blob": blob}))
                    .await
            }
        })),
    )
    .await
    .expect("callers were left waiting behind a stalled write");

    for result in results {
        assert!(
            matches!(
                result,
                Err(TransportError::Timeout { .. }) | Err(TransportError::ConnectionLost)
            ),
            "unexpected outcome {result:?}"
        );
    }
    let (_first, _second) = server.await.unwrap();
    assert_eq!(transport.pending_len().await, 0);
}

#[tokio::test]
async fn stalled_handshake_is_abandoned_and_retried() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        // accept TCP but never answer the upgrade
        let (silent, _) = listener.accept().await.unwrap();
        let (retry, _) = timeout(Duration::from_secs(3), listener.accept())
            .await
            .expect("client never retried the connect")
            .unwrap();
        (silent, retry)
    });

    let cfg = config(port).with_handshake_timeout(Duration::from_millis(200));
    let transport = WsTransport::connect(cfg).await.unwrap();
    let result = timeout(
        Duration::from_secs(3),
        transport.request("getBlockNumber", json!({"chainType": "WAN"})),
    )
    .await
    .expect("request hung behind a stalled handshake");
    assert!(matches!(result, Err(TransportError::ConnectionLost)));

    let (_silent, _retry) = server.await.unwrap();
    assert_ne!(transport.state(), ConnectionState::Open);
}

#[tokio::test]
async fn request_expired_while_queued_is_never_sent() {
    let (listener, port) = listener().await;
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        release_rx.await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let first = recv_request(&mut ws).await;
        reply(&mut ws, json!({"jsonrpc": "2.0", "id": first["id"], "result": 7})).await;
        (first, ws)
    });

    let transport = WsTransport::connect(config(port)).await.unwrap();
    let err = transport
        .request_with(
            "getTxInfo",
            json!({"chainType": "WAN", "txHash": "0x1"}),
            RequestOptions::with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout { ms: 100, .. }));
    assert_eq!(transport.pending_len().await, 0);

    release_tx.send(()).unwrap();
    transport.wait_until_open().await.unwrap();
    let fresh = transport
        .request("getBlockNumber", json!({"chainType": "WAN"}))
        .await
        .unwrap();
    assert_eq!(fresh, json!(7));

    // the first frame on the wire is the fresh request, not the expired one
    let (first, _ws) = server.await.unwrap();
    assert_eq!(first["method"], "getBlockNumber");
}
