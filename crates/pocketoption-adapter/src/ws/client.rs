/*
[INPUT]:  Session credentials, endpoint pool, client configuration
[OUTPUT]: Authenticated realtime session with request/response and push surfaces
[POS]:    WebSocket layer - connection lifecycle and public facade
[UPDATE]: When adding operations or changing connection logic
*/

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatch::{DispatchAction, Dispatcher, HISTORY_SLOT, SharedState};
use super::endpoint::{Endpoint, EndpointPool};
use super::frame;
use super::time_sync::ServerClock;
use super::tls;
use crate::error::{PocketOptionError, Result};
use crate::types::{
    AccountSnapshot, AuthPayload, ChangeSymbolRequest, ClosedDealsPayload, ConnectionStatus, Deal,
    Direction, HistoryBatch, HistoryNew, LoadHistoryPeriodRequest, OpenOrderRequest, OpenedOrder,
    OrderId, PayoutTable, StreamTick,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Origin the venue's gateways expect
const ORIGIN: &str = "https://pocketoption.com";
/// Browser user agent the gateways are known to accept
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Outbound messages buffered towards the single transport writer
const WRITE_CHANNEL_CAPACITY: usize = 128;
/// Keep-alive event tag
const HEARTBEAT_EVENT: &str = "ps";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Default deadline for correlated requests (order placement)
    pub request_timeout: Duration,
    /// Deadline for candle-history requests
    pub history_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_delay_floor: Duration,
    pub reconnect_delay_ceiling: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            history_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(20),
            reconnect_delay_floor: Duration::from_secs(5),
            reconnect_delay_ceiling: Duration::from_secs(60),
        }
    }
}

/// Exponential reconnect delay: starts at the floor, doubles per consecutive
/// failure, caps at the ceiling, resets after an authenticated session
#[derive(Debug, Clone)]
struct ReconnectBackoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }

    fn reset(&mut self) {
        self.current = self.floor;
    }
}

/// Outbound send path: one writer per connection, plus the FIFO queue for
/// payloads submitted before authentication completes
#[derive(Default)]
struct SendQueue {
    writer: RwLock<Option<mpsc::Sender<String>>>,
    queued: Mutex<VecDeque<String>>,
}

impl SendQueue {
    fn set_writer(&self, tx: mpsc::Sender<String>) {
        *self.writer.write().expect("writer lock poisoned") = Some(tx);
    }

    fn clear_writer(&self) {
        *self.writer.write().expect("writer lock poisoned") = None;
    }

    fn enqueue(&self, message: String) {
        self.queued
            .lock()
            .expect("queue lock poisoned")
            .push_back(message);
    }

    async fn send_now(&self, message: String) -> Result<()> {
        let tx = self
            .writer
            .read()
            .expect("writer lock poisoned")
            .clone()
            .ok_or(PocketOptionError::NotConnected)?;
        tx.send(message)
            .await
            .map_err(|_| PocketOptionError::Transport("writer task stopped".into()))
    }

    async fn flush(&self) -> Result<()> {
        let drained: Vec<String> = {
            let mut queued = self.queued.lock().expect("queue lock poisoned");
            queued.drain(..).collect()
        };
        for message in drained {
            self.send_now(message).await?;
        }
        Ok(())
    }
}

enum SessionEndKind {
    /// Transport dropped or errored; the reconnect loop takes over
    Lost(String),
    /// Explicit close requested by the caller
    Closed,
    /// The venue invalidated the session; terminal
    AuthRejected(String),
}

struct SessionEnd {
    authenticated: bool,
    kind: SessionEndKind,
}

/// Realtime client for the PocketOption venue.
///
/// Owns one transport connection at a time, reconnecting with exponential
/// backoff across the endpoint pool. All venue operations go through this
/// facade; protocol framing, dispatching, and time sync live in the sibling
/// modules.
pub struct PocketOptionClient {
    config: ClientConfig,
    auth: AuthPayload,
    pool: EndpointPool,
    shared: Arc<SharedState>,
    queue: Arc<SendQueue>,
    shutdown: CancellationToken,
    conn_task: Mutex<Option<JoinHandle<()>>>,
}

impl PocketOptionClient {
    /// New client with default configuration; the endpoint pool is chosen by
    /// the account mode carried in the credentials
    pub fn new(auth: impl Into<AuthPayload>) -> Self {
        Self::with_config(auth, ClientConfig::default())
    }

    /// New client with custom configuration
    pub fn with_config(auth: impl Into<AuthPayload>, config: ClientConfig) -> Self {
        let auth = auth.into();
        let pool = if auth.is_demo() {
            EndpointPool::demo()
        } else {
            EndpointPool::live()
        };
        Self {
            config,
            auth,
            pool,
            shared: SharedState::new(),
            queue: Arc::new(SendQueue::default()),
            shutdown: CancellationToken::new(),
            conn_task: Mutex::new(None),
        }
    }

    /// Override the endpoint candidate list
    pub fn with_endpoints(mut self, pool: EndpointPool) -> Self {
        self.pool = pool;
        self
    }

    /// Start the connection task. Returns immediately; use
    /// [`wait_until_authenticated`](Self::wait_until_authenticated) to block
    /// until the session is usable.
    pub async fn connect(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(PocketOptionError::Closed);
        }
        let mut guard = self.conn_task.lock().expect("task lock poisoned");
        if guard.is_some() {
            return Err(PocketOptionError::Config(
                "client is already connected".into(),
            ));
        }
        let auth_message = self.auth.to_message()?;
        let task = tokio::spawn(run_connection_loop(
            self.config.clone(),
            self.pool.clone(),
            auth_message,
            self.shared.clone(),
            self.queue.clone(),
            self.shutdown.clone(),
        ));
        *guard = Some(task);
        Ok(())
    }

    /// Suspend until the session authenticates, the venue rejects it, or the
    /// timeout expires
    pub async fn wait_until_authenticated(&self, deadline: Duration) -> Result<()> {
        let mut status_rx = self.shared.status_tx.subscribe();
        let wait = status_rx.wait_for(|status| {
            matches!(
                status,
                ConnectionStatus::Authenticated | ConnectionStatus::AuthRejected
            )
        });
        match timeout(deadline, wait).await {
            Err(_) => Err(PocketOptionError::RequestTimeout {
                key: "auth".into(),
                deadline,
            }),
            Ok(Err(_)) => Err(PocketOptionError::ConnectionLost(
                "status channel closed".into(),
            )),
            Ok(Ok(status)) => match *status {
                ConnectionStatus::Authenticated => Ok(()),
                _ => Err(PocketOptionError::AuthRejected(
                    "venue rejected the session".into(),
                )),
            },
        }
    }

    /// Close the connection and stop the reconnect loop
    pub async fn close(&self) {
        info!("closing client");
        self.shutdown.cancel();
        let task = self.conn_task.lock().expect("task lock poisoned").take();
        if let Some(task) = task {
            if timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("connection task did not stop in time");
            }
        }
        if self.shared.status() != ConnectionStatus::AuthRejected {
            self.shared.set_status(ConnectionStatus::Disconnected);
        }
    }

    /// Current connection status
    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Watch channel following every status transition
    pub fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Whether the session is authenticated right now
    pub fn is_connected(&self) -> bool {
        self.shared.status().is_authenticated()
    }

    /// Snapshot of the last known account state
    pub fn account(&self) -> AccountSnapshot {
        self.shared.account_snapshot()
    }

    /// Last known balance, if any update has arrived
    pub fn balance(&self) -> Option<Decimal> {
        self.shared.account_snapshot().balance
    }

    /// Server-relative clock
    pub fn server_clock(&self) -> &ServerClock {
        &self.shared.clock
    }

    /// Current server timestamp, seconds since epoch
    pub fn server_time(&self) -> Result<f64> {
        self.shared.clock.now()
    }

    /// Current server time as a UTC datetime
    pub fn server_datetime(&self) -> Result<DateTime<Utc>> {
        self.shared.clock.server_datetime()
    }

    /// Latest payout-table snapshot
    pub fn payouts(&self) -> Option<PayoutTable> {
        self.shared
            .payouts
            .read()
            .expect("payouts lock poisoned")
            .clone()
    }

    /// Payout percent for one asset, if the table has been received
    pub fn payout(&self, asset: &str) -> Option<i64> {
        self.payouts().and_then(|table| table.payout(asset))
    }

    /// Initial history snapshot from the most recent subscription
    pub fn history_snapshot(&self) -> Option<HistoryNew> {
        self.shared
            .history_new
            .read()
            .expect("history lock poisoned")
            .clone()
    }

    /// Long-lived quote tick stream (all subscribed symbols)
    pub fn ticks(&self) -> broadcast::Receiver<StreamTick> {
        self.shared.ticks_tx.subscribe()
    }

    /// Long-lived closed-deal stream
    pub fn closed_deals(&self) -> broadcast::Receiver<ClosedDealsPayload> {
        self.shared.deals_tx.subscribe()
    }

    /// Send a raw, pre-framed message.
    ///
    /// While the handshake is in progress the message is queued and flushed
    /// in FIFO order once the session authenticates.
    pub async fn send_raw(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let status = self.shared.status();
        if status.is_authenticated() {
            return self.queue.send_now(message).await;
        }
        if status.is_connecting() {
            debug!("queueing message until authentication completes");
            self.queue.enqueue(message);
            return Ok(());
        }
        match status {
            ConnectionStatus::AuthRejected => Err(PocketOptionError::AuthRejected(
                "session was rejected".into(),
            )),
            _ => Err(PocketOptionError::NotConnected),
        }
    }

    /// Send a tagged application event
    pub async fn send_event<T: Serialize>(&self, tag: &str, payload: &T) -> Result<()> {
        self.send_raw(frame::encode_event(tag, payload)?).await
    }

    /// Subscribe to the quote stream for a symbol.
    ///
    /// The venue starts pushing `updateStream` batches for the asset; the
    /// returned receiver yields every tick.
    pub async fn subscribe_symbol(
        &self,
        asset: &str,
        period: u32,
    ) -> Result<broadcast::Receiver<StreamTick>> {
        let request = ChangeSymbolRequest {
            asset: asset.to_string(),
            period,
        };
        self.send_event("changeSymbol", &request).await?;
        Ok(self.shared.ticks_tx.subscribe())
    }

    /// Request a candle-history batch.
    ///
    /// With no `end_time` the window ends at the current candle boundary on
    /// the server clock, which requires the clock to be synchronized. Only
    /// one history request may be in flight at a time.
    pub async fn load_history(
        &self,
        asset: &str,
        period: u32,
        count: u32,
        end_time: Option<i64>,
    ) -> Result<HistoryBatch> {
        let time = match end_time {
            Some(time) => time,
            None => self.shared.clock.last_candle_open(period)?,
        };
        let handle = self
            .shared
            .pending
            .register(HISTORY_SLOT, self.config.history_timeout)?;
        let request = LoadHistoryPeriodRequest {
            asset: asset.to_string(),
            period,
            count,
            time,
        };
        self.send_event("loadHistoryPeriod", &request).await?;
        HistoryBatch::from_value(handle.wait().await?)
    }

    /// Place an order built by the caller.
    ///
    /// The request's correlation id must not collide with one in flight;
    /// reusing a live id fails immediately without touching the network.
    pub async fn open_order(&self, request: OpenOrderRequest) -> Result<OpenedOrder> {
        let handle = self
            .shared
            .pending
            .register(&request.request_id, self.config.request_timeout)?;
        self.send_event("openOrder", &request).await?;
        OpenedOrder::from_value(handle.wait().await?)
    }

    /// Place an order with an auto-generated correlation id, inheriting the
    /// account mode from the session credentials
    pub async fn buy(
        &self,
        asset: &str,
        amount: Decimal,
        direction: Direction,
        expiry_secs: u32,
    ) -> Result<OpenedOrder> {
        let mut request = OpenOrderRequest::new(asset, amount, direction, expiry_secs);
        request.is_demo = u8::from(self.auth.is_demo());
        self.open_order(request).await
    }

    /// Suspend until the venue reports the given order as closed
    pub async fn wait_order_closed(&self, order_id: &OrderId, deadline: Duration) -> Result<Deal> {
        let mut deals_rx = self.shared.deals_tx.subscribe();
        let wait = async move {
            loop {
                match deals_rx.recv().await {
                    Ok(payload) => {
                        if let Some(deal) =
                            payload.deals.into_iter().find(|deal| &deal.id == order_id)
                        {
                            return Ok(deal);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "deal stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(PocketOptionError::ConnectionLost(
                            "deal stream closed".into(),
                        ));
                    }
                }
            }
        };
        timeout(deadline, wait)
            .await
            .map_err(|_| PocketOptionError::RequestTimeout {
                key: format!("closeOrder:{order_id}"),
                deadline,
            })?
    }
}

impl std::fmt::Debug for PocketOptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketOptionClient")
            .field("status", &self.shared.status())
            .field("endpoints", &self.pool.len())
            .field("is_demo", &self.auth.is_demo())
            .finish_non_exhaustive()
    }
}

/// Reconnect loop: one session per iteration, backoff between failures
async fn run_connection_loop(
    config: ClientConfig,
    mut pool: EndpointPool,
    auth_message: String,
    shared: Arc<SharedState>,
    queue: Arc<SendQueue>,
    shutdown: CancellationToken,
) {
    let mut backoff = ReconnectBackoff::new(
        config.reconnect_delay_floor,
        config.reconnect_delay_ceiling,
    );

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        let endpoint = pool.next_endpoint().clone();
        shared.set_status(ConnectionStatus::Connecting);
        info!(endpoint = %endpoint, "connecting");

        let outcome = run_session(&config, &endpoint, &auth_message, &shared, &queue, &shutdown)
            .await;
        queue.clear_writer();

        let reason = match outcome {
            Ok(end) => {
                if end.authenticated {
                    backoff.reset();
                }
                match end.kind {
                    SessionEndKind::Closed => {
                        shared.pending.fail_all("client closed");
                        shared.set_status(ConnectionStatus::Disconnected);
                        break;
                    }
                    SessionEndKind::AuthRejected(reason) => {
                        error!(reason, "authentication rejected, not reconnecting");
                        shared.pending.fail_all("session rejected by venue");
                        shared.set_status(ConnectionStatus::AuthRejected);
                        break;
                    }
                    SessionEndKind::Lost(reason) => reason,
                }
            }
            Err(e) => e.to_string(),
        };

        shared.pending.fail_all(&reason);
        shared.set_status(ConnectionStatus::Disconnected);
        let delay = backoff.next_delay();
        warn!(reason, delay_ms = delay.as_millis() as u64, "connection lost, reconnecting");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("connection loop terminated");
}

/// One transport session: connect, handshake, then pump frames until the
/// connection ends one way or another
async fn run_session(
    config: &ClientConfig,
    endpoint: &Endpoint,
    auth_message: &str,
    shared: &Arc<SharedState>,
    queue: &Arc<SendQueue>,
    shutdown: &CancellationToken,
) -> Result<SessionEnd> {
    let mut request = endpoint
        .url()
        .as_str()
        .into_client_request()
        .map_err(PocketOptionError::transport)?;
    let headers = request.headers_mut();
    headers.insert("Origin", HeaderValue::from_static(ORIGIN));
    headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));

    let connector = endpoint.is_secure().then(tls::insecure_connector);
    let connected = timeout(
        config.connect_timeout,
        connect_async_tls_with_config(request, None, true, connector),
    )
    .await;
    let (stream, _response) = match connected {
        Err(_) => {
            return Err(PocketOptionError::Transport(format!(
                "connect timeout to {endpoint}"
            )));
        }
        Ok(Err(e)) => return Err(PocketOptionError::transport(e)),
        Ok(Ok(pair)) => pair,
    };

    info!(region = endpoint.region(), "transport open, awaiting handshake");
    shared.set_status(ConnectionStatus::AwaitingHandshake);

    let (sink, stream) = stream.split();
    let (writer_tx, writer_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
    queue.set_writer(writer_tx.clone());

    let writer = tokio::spawn(run_writer(sink, writer_rx));
    let heartbeat = tokio::spawn(run_heartbeat(
        config.heartbeat_interval,
        shared.status_tx.subscribe(),
        writer_tx.clone(),
    ));

    let end = run_listener(
        stream,
        Dispatcher::new(shared.clone(), auth_message.to_string()),
        &writer_tx,
        queue,
        shutdown,
    )
    .await;

    heartbeat.abort();
    drop(writer_tx);
    writer.abort();
    queue.clear_writer();
    Ok(end)
}

/// Inbound listener: decodes and dispatches every frame. This is the single
/// writer of all connection-scoped dispatch state.
async fn run_listener(
    mut stream: SplitStream<WsStream>,
    mut dispatcher: Dispatcher,
    writer_tx: &mpsc::Sender<String>,
    queue: &Arc<SendQueue>,
    shutdown: &CancellationToken,
) -> SessionEnd {
    let mut authenticated = false;
    loop {
        let incoming = tokio::select! {
            _ = shutdown.cancelled() => {
                return SessionEnd { authenticated, kind: SessionEndKind::Closed };
            }
            incoming = stream.next() => incoming,
        };

        let frame = match incoming {
            Some(Ok(Message::Text(text))) => match frame::decode_text(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable text frame");
                    continue;
                }
            },
            Some(Ok(Message::Binary(bytes))) => match frame::decode_binary(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable binary frame");
                    continue;
                }
            },
            // Transport-level pings are answered by the websocket layer.
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(close))) => {
                return SessionEnd {
                    authenticated,
                    kind: SessionEndKind::Lost(format!("server closed the connection: {close:?}")),
                };
            }
            Some(Err(e)) => {
                return SessionEnd {
                    authenticated,
                    kind: SessionEndKind::Lost(format!("transport error: {e}")),
                };
            }
            None => {
                return SessionEnd {
                    authenticated,
                    kind: SessionEndKind::Lost("stream ended".into()),
                };
            }
        };

        match dispatcher.dispatch(frame) {
            DispatchAction::None => {}
            DispatchAction::Reply(message) => {
                if writer_tx.send(message).await.is_err() {
                    return SessionEnd {
                        authenticated,
                        kind: SessionEndKind::Lost("writer task stopped".into()),
                    };
                }
            }
            DispatchAction::Authenticated => {
                authenticated = true;
                info!("session authenticated");
                if let Err(e) = queue.flush().await {
                    warn!(error = %e, "failed flushing queued sends");
                }
            }
            DispatchAction::AuthRejected(reason) => {
                return SessionEnd {
                    authenticated,
                    kind: SessionEndKind::AuthRejected(reason),
                };
            }
        }
    }
}

/// Writer task: owns the sink, serializes all sends.
///
/// A failed write is retried once, silently; a second failure stops the
/// writer and lets the listener's error path drive the reconnect.
async fn run_writer(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
            warn!(error = %e, "send failed, retrying once");
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                error!(error = %e, "send failed twice, stopping writer");
                return;
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Heartbeat task: waits for authentication, then emits the keep-alive event
/// on a fixed cadence until the connection ends
async fn run_heartbeat(
    interval: Duration,
    mut status_rx: watch::Receiver<ConnectionStatus>,
    writer_tx: mpsc::Sender<String>,
) {
    if status_rx
        .wait_for(ConnectionStatus::is_authenticated)
        .await
        .is_err()
    {
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if writer_tx
            .send(frame::encode_bare_event(HEARTBEAT_EVENT))
            .await
            .is_err()
        {
            debug!("writer gone, heartbeat task ending");
            return;
        }
    }
}
