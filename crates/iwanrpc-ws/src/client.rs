//! Authenticated WebSocket JSON-RPC client with heartbeat, request timeouts
//! and fixed-delay auto-reconnect.
//!
//! [`WsTransport`] is a cheap handle. A background task owns the read half of
//! the socket, the pending-request table, the heartbeat state and the
//! connection state machine; every mutation happens on that task, in the
//! order its `select!` loop observes events.
//!
//! Writes go through a bounded queue to a per-connection writer task, so a
//! peer that stops reading can stall only the writer. The sweeper and the
//! heartbeat keep running and tear the connection down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use iwanrpc_core::auth::{HmacSigner, SignedEnvelope, Signer};
use iwanrpc_core::config::ClientConfig;
use iwanrpc_core::error::TransportError;
use iwanrpc_core::request::{InboundFrame, JsonRpcRequest};
use iwanrpc_core::transport::{HealthStatus, RequestOptions, RpcTransport};

use crate::connection::{Connection, ConnectionState};
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::pending::{PendingRegistry, PendingRequest, Responder};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type ConnectFuture = BoxFuture<'static, Result<WsStream, TransportError>>;
type WriterResult = Result<Result<(), tungstenite::Error>, JoinError>;

const PING_PAYLOAD: &[u8] = b"iwan";
/// Frames buffered for the writer task before the peer counts as stalled.
const OUTBOUND_CAPACITY: usize = 4096;
/// How long `close()` waits for queued frames and the close frame to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Command sent from handles to the background task.
enum WsCommand {
    Send {
        envelope: SignedEnvelope,
        timeout: Duration,
        tx: Responder,
    },
    PendingLen {
        tx: oneshot::Sender<usize>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// WebSocket JSON-RPC transport for an iWan endpoint.
///
/// Requests issued while the socket is (re)connecting are queued and sent
/// once it opens. On every disconnect the outstanding requests fail with
/// [`TransportError::ConnectionLost`]; they are never resent.
pub struct WsTransport {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    signer: Arc<dyn Signer>,
    next_id: AtomicU64,
    request_timeout: Duration,
    state_rx: watch::Receiver<ConnectionState>,
}

impl WsTransport {
    /// Validate `config`, then start connecting with the iWan HMAC signer.
    ///
    /// Returns as soon as the background task is running; use
    /// [`wait_until_open`](Self::wait_until_open) to wait for the handshake.
    pub async fn connect(config: ClientConfig) -> Result<Self, TransportError> {
        let signer = Arc::new(HmacSigner::new(config.secret_key.clone()));
        Self::connect_with_signer(config, signer).await
    }

    /// Like [`connect`](Self::connect) with a caller-supplied signer.
    pub async fn connect_with_signer(
        config: ClientConfig,
        signer: Arc<dyn Signer>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        let (conn, state_rx) = Connection::new();
        let url = config.redacted_url();
        let request_timeout = config.request_timeout();

        let manager = ConnectionManager::new(config, conn, cmd_rx);
        tokio::spawn(manager.run());

        Ok(Self {
            url,
            cmd_tx,
            signer,
            next_id: AtomicU64::new(1),
            request_timeout,
            state_rx,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the connection is open. Fails with `Closed` if the
    /// transport shuts down first.
    pub async fn wait_until_open(&self) -> Result<(), TransportError> {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow_and_update() == ConnectionState::Open {
                return Ok(());
            }
            // errors once the connection task has exited
            rx.changed().await.map_err(|_| TransportError::Closed)?;
        }
    }

    /// Number of requests awaiting a response (including queued ones).
    pub async fn pending_len(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(WsCommand::PendingLen { tx }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        let (done, _) = oneshot::channel();
        let _ = self.cmd_tx.send(WsCommand::Close { done });
    }
}

#[async_trait]
impl RpcTransport for WsTransport {
    async fn request_with(
        &self,
        method: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = self.signer.sign(JsonRpcRequest::new(id, method, params))?;
        let timeout = options.timeout.unwrap_or(self.request_timeout);

        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Send { envelope, timeout, tx })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.cmd_tx.send(WsCommand::Close { done }).is_ok() {
            let _ = rx.await;
        }
    }

    fn health(&self) -> HealthStatus {
        match self.state() {
            ConnectionState::Open => HealthStatus::Healthy,
            ConnectionState::Connecting => HealthStatus::Degraded,
            ConnectionState::Closing | ConnectionState::Closed => HealthStatus::Unhealthy,
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Background task that owns the WebSocket connection.
struct ConnectionManager {
    url: String,
    log_url: String,
    reconnect_delay: Duration,
    handshake_timeout: Duration,
    conn: Connection,
    reader: Option<WsSource>,
    outbound: Option<mpsc::Sender<Message>>,
    writer: Option<JoinHandle<Result<(), tungstenite::Error>>>,
    connecting: Option<ConnectFuture>,
    reconnect_at: Option<Instant>,
    pending: PendingRegistry,
    /// Signed requests waiting for the socket to open, in call order.
    deferred: VecDeque<SignedEnvelope>,
    heartbeat: HeartbeatMonitor,
    heartbeat_tick: Interval,
    sweep_tick: Interval,
    cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
}

impl ConnectionManager {
    fn new(
        config: ClientConfig,
        conn: Connection,
        cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    ) -> Self {
        let now = Instant::now();
        let hb_period = config.heartbeat_interval();
        let sweep_period = config.sweep_interval();

        let mut heartbeat_tick = time::interval_at(now + hb_period, hb_period);
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = time::interval_at(now + sweep_period, sweep_period);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let url = config.url();
        let handshake_timeout = config.handshake_timeout();
        let connecting = Some(connect_future(url.clone(), handshake_timeout));
        tracing::info!(url = %config.redacted_url(), "connecting via WebSocket");

        Self {
            url,
            log_url: config.redacted_url(),
            reconnect_delay: config.reconnect_delay(),
            handshake_timeout,
            conn,
            reader: None,
            outbound: None,
            writer: None,
            connecting,
            reconnect_at: None,
            pending: PendingRegistry::new(),
            deferred: VecDeque::new(),
            heartbeat: HeartbeatMonitor::new(hb_period, config.max_missed_heartbeats, now),
            heartbeat_tick,
            sweep_tick,
            cmd_rx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(WsCommand::Send { envelope, timeout, tx }) => {
                            self.submit(envelope, timeout, tx);
                        }
                        Some(WsCommand::PendingLen { tx }) => {
                            let _ = tx.send(self.pending.len());
                        }
                        Some(WsCommand::Close { done }) => {
                            self.shutdown().await;
                            let _ = done.send(());
                            return;
                        }
                        None => {
                            self.shutdown().await;
                            return;
                        }
                    }
                }
                res = finish_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(res);
                }
                msg = next_frame(&mut self.reader) => {
                    self.on_frame(msg);
                }
                res = finish_writer(&mut self.writer) => {
                    self.writer = None;
                    self.on_writer_exit(res);
                }
                _ = self.heartbeat_tick.tick(), if self.conn.state() == ConnectionState::Open => {
                    self.on_heartbeat_tick();
                }
                _ = self.sweep_tick.tick() => {
                    self.sweep();
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.start_connect();
                }
            }
        }
    }

    fn submit(&mut self, envelope: SignedEnvelope, timeout: Duration, tx: Responder) {
        let id = envelope.id();
        let req = PendingRequest::new(envelope.method(), timeout, Instant::now(), tx);
        if let Err(req) = self.pending.insert(id, req) {
            tracing::warn!(id, method = %req.method(), "request id already pending; rejected");
            req.fail(TransportError::Protocol(format!("duplicate request id {id}")));
            return;
        }

        if self.conn.state() == ConnectionState::Open {
            self.transmit(envelope);
        } else {
            tracing::debug!(
                id,
                method = %envelope.method(),
                state = %self.conn.state(),
                "connection not open; request queued"
            );
            self.deferred.push_back(envelope);
        }
    }

    fn transmit(&mut self, envelope: SignedEnvelope) {
        if self.outbound.is_none() {
            self.deferred.push_back(envelope);
            return;
        }
        let text = envelope.as_str().to_string();
        self.enqueue(Message::Text(text.into()));
    }

    /// Hand a frame to the writer task. A full queue means the peer has
    /// stopped reading and the connection is treated as lost.
    fn enqueue(&mut self, msg: Message) {
        let Some(out) = self.outbound.as_ref() else {
            return;
        };
        match out.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(capacity = OUTBOUND_CAPACITY, "outbound queue full; peer is not reading");
                self.on_connection_lost("outbound queue full");
            }
            Err(TrySendError::Closed(_)) => {
                self.on_connection_lost("writer stopped");
            }
        }
    }

    fn flush_deferred(&mut self) {
        while self.conn.state() == ConnectionState::Open {
            let Some(envelope) = self.deferred.pop_front() else {
                break;
            };
            // timed out while queued
            if !self.pending.contains(envelope.id()) {
                continue;
            }
            tracing::debug!(id = envelope.id(), method = %envelope.method(), "sending queued request");
            self.transmit(envelope);
        }
    }

    fn start_connect(&mut self) {
        if !self.conn.begin_connect() {
            return;
        }
        tracing::info!(url = %self.log_url, "reconnecting via WebSocket");
        self.connecting = Some(connect_future(self.url.clone(), self.handshake_timeout));
    }

    fn on_connect_result(&mut self, res: Result<WsStream, TransportError>) {
        match res {
            Ok(ws) => {
                let (sink, source) = ws.split();
                let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
                self.writer = Some(tokio::spawn(write_loop(sink, out_rx)));
                self.outbound = Some(out_tx);
                self.reader = Some(source);
                self.conn.mark_open();
                self.heartbeat.reset(Instant::now());
                self.heartbeat_tick.reset();
                tracing::info!(
                    url = %self.log_url,
                    queued = self.deferred.len(),
                    "WS connected"
                );
                self.flush_deferred();
            }
            Err(e) => {
                tracing::warn!(url = %self.log_url, error = %e, "WS connect failed");
                self.on_connection_lost(&format!("connect failed: {e}"));
            }
        }
    }

    fn on_frame(&mut self, msg: Option<Result<Message, tungstenite::Error>>) {
        let msg = match msg {
            None => {
                self.on_connection_lost("stream ended");
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "WS receive error");
                self.on_connection_lost(&e.to_string());
                return;
            }
            Some(Ok(msg)) => msg,
        };

        self.heartbeat.record_liveness(Instant::now());
        match msg {
            Message::Text(text) => self.dispatch(text.as_str()),
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.dispatch(text),
                Err(_) => tracing::debug!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
            },
            Message::Close(frame) => {
                tracing::info!(?frame, "WS closed by server");
                self.on_connection_lost("closed by server");
            }
            // pings are answered by tungstenite; pongs only count as liveness
            _ => {}
        }
    }

    fn dispatch(&mut self, text: &str) {
        match InboundFrame::decode(text) {
            Ok(InboundFrame::Response { id, outcome }) => {
                let result = outcome.map_err(TransportError::Rpc);
                if !self.pending.resolve(id, result) {
                    tracing::warn!(id, "response for unknown request id; dropped");
                }
            }
            Ok(InboundFrame::Malformed { id, reason }) => {
                tracing::warn!(id, %reason, "malformed response");
                if !self.pending.resolve(id, Err(TransportError::Protocol(reason))) {
                    tracing::warn!(id, "malformed response for unknown request id; dropped");
                }
            }
            Ok(InboundFrame::Notification { method }) => {
                tracing::debug!(?method, "ignoring server notification");
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable frame");
            }
        }
    }

    fn on_writer_exit(&mut self, res: WriterResult) {
        let reason = match res {
            Ok(Ok(())) => "writer stopped".to_string(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "WS send failed");
                format!("send failed: {e}")
            }
            Err(e) => format!("writer task failed: {e}"),
        };
        self.on_connection_lost(&reason);
    }

    fn on_heartbeat_tick(&mut self) {
        match self.heartbeat.tick() {
            HeartbeatAction::Probe => {
                tracing::trace!(remaining = self.heartbeat.remaining(), "heartbeat probe");
                self.enqueue(Message::Ping(PING_PAYLOAD.to_vec().into()));
            }
            HeartbeatAction::Dead => {
                tracing::warn!(
                    url = %self.log_url,
                    interval_ms = self.heartbeat.interval().as_millis() as u64,
                    silent_for_ms = self.heartbeat.last_liveness().elapsed().as_millis() as u64,
                    "heartbeat budget exhausted; connection presumed dead"
                );
                self.on_connection_lost("heartbeat timeout");
            }
        }
    }

    fn sweep(&mut self) {
        for expired in self.pending.sweep_expired(Instant::now()) {
            tracing::warn!(
                id = expired.id,
                method = %expired.method,
                age_ms = expired.age.as_millis() as u64,
                "request timed out"
            );
        }
        let pending = &self.pending;
        self.deferred.retain(|envelope| pending.contains(envelope.id()));
    }

    /// Drop the socket halves. An in-flight write is abandoned.
    fn drop_socket(&mut self) {
        self.reader = None;
        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }

    /// Any transition into `Closed` that the caller did not ask for.
    fn on_connection_lost(&mut self, reason: &str) {
        self.drop_socket();
        self.connecting = None;

        if self.conn.mark_closed() {
            let failed = self.pending.fail_all(|| TransportError::ConnectionLost);
            self.deferred.clear();
            tracing::warn!(url = %self.log_url, %reason, failed, "WS disconnected");
        }

        if self.conn.try_schedule_reconnect() {
            self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
            tracing::info!(
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "reconnect scheduled"
            );
        }
    }

    async fn shutdown(&mut self) {
        self.conn.begin_close();
        self.reconnect_at = None;
        self.connecting = None;
        self.reader = None;
        // closing the queue lets the writer flush and send the close frame
        self.outbound = None;
        if let Some(mut writer) = self.writer.take() {
            match time::timeout(CLOSE_GRACE, &mut writer).await {
                Ok(Ok(Err(e))) => tracing::debug!(error = %e, "WS close handshake failed"),
                Err(_) => {
                    writer.abort();
                    tracing::debug!("WS close timed out; socket dropped");
                }
                _ => {}
            }
        }
        self.conn.mark_closed();
        if !self.pending.is_empty() {
            let failed = self.pending.fail_all(|| TransportError::ConnectionLost);
            tracing::info!(failed, "pending requests failed on close");
        }
        self.deferred.clear();
        tracing::info!(url = %self.log_url, active = self.conn.is_active_close(), "WS transport closed");
    }
}

/// Owns the write half. Returns when the queue closes or a write fails.
async fn write_loop(
    mut sink: WsSink,
    mut out_rx: mpsc::Receiver<Message>,
) -> Result<(), tungstenite::Error> {
    while let Some(msg) = out_rx.recv().await {
        sink.send(msg).await?;
    }
    sink.close().await
}

fn connect_future(url: String, handshake_timeout: Duration) -> ConnectFuture {
    Box::pin(async move {
        match time::timeout(handshake_timeout, tokio_tungstenite::connect_async(url)).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(TransportError::WebSocket(e.to_string())),
            Err(_) => Err(TransportError::WebSocket(format!(
                "handshake timed out after {}ms",
                handshake_timeout.as_millis()
            ))),
        }
    })
}

async fn finish_connect(
    connecting: &mut Option<ConnectFuture>,
) -> Result<WsStream, TransportError> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    reader: &mut Option<WsSource>,
) -> Option<Result<Message, tungstenite::Error>> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

async fn finish_writer(
    writer: &mut Option<JoinHandle<Result<(), tungstenite::Error>>>,
) -> WriterResult {
    match writer {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
