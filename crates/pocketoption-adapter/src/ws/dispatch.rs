/*
[INPUT]:  Decoded protocol frames from the listener task
[OUTPUT]: Updated shared state, fulfilled requests, subscriber deliveries
[POS]:    WebSocket layer - inbound frame routing
[UPDATE]: When the venue adds event tags or changes the two-frame pairs
*/

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use super::frame::{Frame, HANDSHAKE_ACK, HEARTBEAT_ACK};
use super::pending::PendingRequests;
use super::time_sync::ServerClock;
use crate::types::responses::reply_error;
use crate::types::{
    AccountSnapshot, ClosedDealsPayload, ConnectionStatus, HistoryNew, PayoutTable, StreamTick,
};

/// Correlation key for the single in-flight history request
pub(crate) const HISTORY_SLOT: &str = "loadHistoryPeriod";

/// Buffered quote ticks per lagging subscriber
const TICK_CHANNEL_CAPACITY: usize = 256;
/// Buffered closed-deal batches per lagging subscriber
const DEALS_CHANNEL_CAPACITY: usize = 64;

const EVT_AUTH_OK: &str = "successauth";
const EVT_NOT_AUTHORIZED: &str = "NotAuthorized";
const EVT_BALANCE_OK: &str = "successupdateBalance";
const EVT_ORDER_OPEN_OK: &str = "successopenOrder";
const EVT_ORDER_OPEN_FAIL: &str = "failopenOrder";
const EVT_CLOSED_DEALS: &str = "updateClosedDeals";
const EVT_ORDER_CLOSE_OK: &str = "successcloseOrder";
const EVT_HISTORY_PERIOD: &str = "loadHistoryPeriod";
const EVT_STREAM: &str = "updateStream";
const EVT_HISTORY_NEW: &str = "updateHistoryNew";

/// State shared between the facade, the listener, and caller tasks.
///
/// Single-writer discipline: only the listener's dispatcher mutates
/// connection-scoped fields; everyone else reads snapshots.
pub(crate) struct SharedState {
    pub account: RwLock<AccountSnapshot>,
    pub status_tx: watch::Sender<ConnectionStatus>,
    pub clock: ServerClock,
    pub pending: PendingRequests,
    pub payouts: RwLock<Option<PayoutTable>>,
    pub history_new: RwLock<Option<HistoryNew>>,
    pub ticks_tx: broadcast::Sender<StreamTick>,
    pub deals_tx: broadcast::Sender<ClosedDealsPayload>,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (ticks_tx, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        let (deals_tx, _) = broadcast::channel(DEALS_CHANNEL_CAPACITY);
        Arc::new(Self {
            account: RwLock::new(AccountSnapshot::default()),
            status_tx,
            clock: ServerClock::new(),
            pending: PendingRequests::new(),
            payouts: RwLock::new(None),
            history_new: RwLock::new(None),
            ticks_tx,
            deals_tx,
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
        let mut account = self.account.write().expect("account lock poisoned");
        account.connected = status.is_authenticated();
    }

    pub fn account_snapshot(&self) -> AccountSnapshot {
        self.account.read().expect("account lock poisoned").clone()
    }
}

/// Two-state latch for the venue's signal-then-payload frame pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Latch {
    #[default]
    Idle,
    Armed,
}

impl Latch {
    fn arm(&mut self) {
        *self = Latch::Armed;
    }

    /// Consume the armed state, reporting whether it was armed
    fn take(&mut self) -> bool {
        std::mem::take(self) == Latch::Armed
    }
}

/// One latch per signal kind so concurrent signals cannot cross-talk.
///
/// The wire sends an event tag first, then an untagged payload frame; which
/// latch claims an untagged frame depends on its JSON shape (object vs
/// array) and a fixed priority order.
#[derive(Debug, Default)]
struct SignalLatches {
    close_order: Latch,
    history_period: Latch,
    history_new: Latch,
    closed_deals: Latch,
    stream_update: Latch,
}

/// Protocol-mandated follow-up the listener must perform after a dispatch
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DispatchAction {
    None,
    /// Send this text frame immediately (handshake/heartbeat answers)
    Reply(String),
    /// Authentication confirmed; flush the pre-auth queue
    Authenticated,
    /// Venue invalidated the session; close and stop reconnecting
    AuthRejected(String),
}

/// Routes every decoded frame. Owned and driven by the listener task only,
/// which is what keeps all dispatch-state mutations single-writer.
pub(crate) struct Dispatcher {
    shared: Arc<SharedState>,
    auth_message: String,
    latches: SignalLatches,
}

impl Dispatcher {
    pub fn new(shared: Arc<SharedState>, auth_message: String) -> Self {
        Self {
            shared,
            auth_message,
            latches: SignalLatches::default(),
        }
    }

    pub fn dispatch(&mut self, frame: Frame) -> DispatchAction {
        match frame {
            Frame::Open { sid } => {
                debug!(sid, "session opened");
                DispatchAction::Reply(HANDSHAKE_ACK.to_string())
            }
            Frame::Ping => DispatchAction::Reply(HEARTBEAT_ACK.to_string()),
            Frame::Pong => DispatchAction::None,
            Frame::NamespaceAck => DispatchAction::Reply(self.auth_message.clone()),
            Frame::Event { tag, payload } => self.on_event(&tag, payload),
            Frame::Balance(update) => {
                debug!(balance = %update.balance, is_demo = update.is_demo, "balance update");
                let mut account = self.shared.account.write().expect("account lock poisoned");
                account.apply_balance(&update);
                DispatchAction::None
            }
            Frame::OrderReply {
                request_id,
                payload,
            } => {
                match reply_error(&payload) {
                    Some(err) => self.shared.pending.fail(&request_id, err),
                    None => self.shared.pending.fulfill(&request_id, payload),
                }
                DispatchAction::None
            }
            Frame::PayoutTable(raw) => {
                match PayoutTable::parse(&raw) {
                    Ok(table) => {
                        debug!(assets = table.len(), "payout table snapshot");
                        *self.shared.payouts.write().expect("payouts lock poisoned") = Some(table);
                    }
                    Err(e) => warn!(error = %e, "discarding malformed payout table"),
                }
                DispatchAction::None
            }
            Frame::Object(value) => {
                self.route_object(value);
                DispatchAction::None
            }
            Frame::Array(value) => {
                self.route_array(value);
                DispatchAction::None
            }
        }
    }

    fn on_event(&mut self, tag: &str, payload: Value) -> DispatchAction {
        match tag {
            EVT_AUTH_OK => {
                self.shared.set_status(ConnectionStatus::Authenticated);
                DispatchAction::Authenticated
            }
            EVT_NOT_AUTHORIZED => DispatchAction::AuthRejected(
                "venue reports the session id is no longer valid".to_string(),
            ),
            EVT_BALANCE_OK => {
                let mut account = self.shared.account.write().expect("account lock poisoned");
                account.balance_synced = true;
                DispatchAction::None
            }
            EVT_ORDER_OPEN_OK => {
                // The order details arrive in a requestId-correlated frame.
                debug!("venue accepted an order");
                DispatchAction::None
            }
            EVT_ORDER_OPEN_FAIL => {
                warn!(?payload, "venue refused an order");
                DispatchAction::None
            }
            EVT_CLOSED_DEALS => {
                self.latches.closed_deals.arm();
                DispatchAction::None
            }
            EVT_ORDER_CLOSE_OK => {
                self.latches.close_order.arm();
                DispatchAction::None
            }
            EVT_HISTORY_PERIOD => {
                self.latches.history_period.arm();
                DispatchAction::None
            }
            EVT_STREAM => {
                self.latches.stream_update.arm();
                DispatchAction::None
            }
            EVT_HISTORY_NEW => {
                self.latches.history_new.arm();
                DispatchAction::None
            }
            other => {
                debug!(tag = other, "unhandled event tag, dropping");
                DispatchAction::None
            }
        }
    }

    /// Untagged object frames: second half of an object-shaped signal pair
    fn route_object(&mut self, value: Value) {
        if self.latches.close_order.take() {
            match serde_json::from_value::<ClosedDealsPayload>(value) {
                Ok(payload) => {
                    debug!(deals = payload.deals.len(), "close-order result");
                    let _ = self.shared.deals_tx.send(payload);
                }
                Err(e) => warn!(error = %e, "discarding malformed close-order payload"),
            }
            return;
        }
        if self.latches.history_period.take() {
            self.shared.pending.fulfill(HISTORY_SLOT, value);
            return;
        }
        if self.latches.history_new.take() {
            match serde_json::from_value::<HistoryNew>(value) {
                Ok(snapshot) => {
                    *self
                        .shared
                        .history_new
                        .write()
                        .expect("history lock poisoned") = Some(snapshot);
                }
                Err(e) => warn!(error = %e, "discarding malformed history snapshot"),
            }
            return;
        }
        debug!("unsolicited object frame, dropping");
    }

    /// Untagged array frames: second half of an array-shaped signal pair
    fn route_array(&mut self, value: Value) {
        if self.latches.closed_deals.take() {
            // The closed-deals array repeats what the object payload already
            // carried; consuming the latch is the point.
            debug!("closed-deals follow-up frame consumed");
            return;
        }
        if self.latches.stream_update.take() {
            let rows = value.as_array().map(Vec::as_slice).unwrap_or_default();
            let mut synced = false;
            for row in rows {
                if let Some(tick) = StreamTick::from_row(row) {
                    if !synced {
                        self.shared.clock.update(tick.timestamp);
                        synced = true;
                    }
                    let _ = self.shared.ticks_tx.send(tick);
                } else {
                    debug!("skipping malformed stream row");
                }
            }
            return;
        }
        debug!("unsolicited array frame, dropping");
    }
}
