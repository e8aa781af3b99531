use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::market::PriceTick;

/// Shared payload ceiling for both realtime channels.
pub const MAX_PAYLOAD_BYTES: usize = 65_536;
const SSE_QUEUE_SIZE: usize = 256;

/// Every event type that may travel over the SSE stream. Anything else is
/// rejected at the door so a typo can never reach clients.
pub const SSE_EVENT_TYPES: &[&str] = &[
    "heartbeat",
    "snapshot",
    "alert",
    "price_update",
    "technical_alerts",
    "regime_update",
    "morning_briefing",
    "daily_summary",
    "weekly_review",
    "reddit_trending",
    "download_tracker",
    "provider_fallback",
    "job_completed",
    "rate_limit_update",
];

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: &'static str,
    pub data: serde_json::Value,
}

struct SseClient {
    id: Uuid,
    tx: mpsc::Sender<SseEvent>,
}

#[derive(Default)]
struct WsInner {
    // client_id -> outbound text sender
    connections: HashMap<Uuid, mpsc::UnboundedSender<String>>,
    // client_id -> subscribed tickers (uppercase)
    subscriptions: HashMap<Uuid, HashSet<String>>,
    // ticker -> subscribed client ids (reverse index)
    ticker_subscribers: HashMap<String, HashSet<Uuid>>,
}

/// Thread-safe registries for SSE and WebSocket clients.
///
/// Locks are held only while mutating a registry or snapshotting it; sends
/// happen through channels so a slow client can never stall a broadcast.
pub struct Broadcaster {
    sse_clients: Mutex<Vec<SseClient>>,
    ws: Mutex<WsInner>,
    max_subscriptions_per_client: usize,
}

impl Broadcaster {
    pub fn new(max_subscriptions_per_client: usize) -> Self {
        Self {
            sse_clients: Mutex::new(Vec::new()),
            ws: Mutex::new(WsInner::default()),
            max_subscriptions_per_client,
        }
    }

    // ------------------------------------------------------------------
    // SSE
    // ------------------------------------------------------------------

    pub fn register_sse(&self) -> (Uuid, mpsc::Receiver<SseEvent>) {
        let (tx, rx) = mpsc::channel(SSE_QUEUE_SIZE);
        let id = Uuid::new_v4();
        self.sse_clients.lock().push(SseClient { id, tx });
        debug!("SSE client registered: {}", id);
        (id, rx)
    }

    pub fn unregister_sse(&self, id: Uuid) {
        self.sse_clients.lock().retain(|c| c.id != id);
        debug!("SSE client unregistered: {}", id);
    }

    pub fn sse_client_count(&self) -> usize {
        self.sse_clients.lock().len()
    }

    /// Enqueue an event to every connected SSE client.
    ///
    /// Validates the event type against the allowlist and the serialised
    /// payload against the size gate. Clients whose queue is full are
    /// considered dead and dropped. Returns the number of clients reached.
    pub fn send_event(&self, event_type: &'static str, data: serde_json::Value) -> usize {
        if !SSE_EVENT_TYPES.contains(&event_type) {
            error!("SSE send blocked: unknown event type {:?}", event_type);
            return 0;
        }

        let serialised = match serde_json::to_string(&data) {
            Ok(s) => s,
            Err(e) => {
                error!("SSE send blocked: non-serialisable payload: {}", e);
                return 0;
            }
        };
        if serialised.len() > MAX_PAYLOAD_BYTES {
            error!(
                "SSE send blocked: {} payload exceeds {} bytes",
                event_type, MAX_PAYLOAD_BYTES
            );
            return 0;
        }

        let event = SseEvent { event_type, data };

        let mut clients = self.sse_clients.lock();
        let mut sent = 0;
        clients.retain(|client| match client.tx.try_send(event.clone()) {
            Ok(()) => {
                sent += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("SSE client {} queue full, dropping client", client.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        sent
    }

    // ------------------------------------------------------------------
    // WebSocket connection lifecycle
    // ------------------------------------------------------------------

    pub fn register_ws(&self, tx: mpsc::UnboundedSender<String>) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.ws.lock();
        inner.connections.insert(id, tx);
        inner.subscriptions.insert(id, HashSet::new());
        debug!("WS registered: {} total={}", id, inner.connections.len());
        id
    }

    pub fn unregister_ws(&self, id: Uuid) {
        let mut inner = self.ws.lock();
        let tickers = inner.subscriptions.remove(&id).unwrap_or_default();
        inner.connections.remove(&id);
        for ticker in tickers {
            if let Some(subs) = inner.ticker_subscribers.get_mut(&ticker) {
                subs.remove(&id);
                if subs.is_empty() {
                    inner.ticker_subscribers.remove(&ticker);
                }
            }
        }
        debug!("WS unregistered: {}", id);
    }

    pub fn ws_client_count(&self) -> usize {
        self.ws.lock().connections.len()
    }

    // ------------------------------------------------------------------
    // Subscription management
    // ------------------------------------------------------------------

    fn normalise(tickers: &[String]) -> Vec<String> {
        tickers
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn subscribe(&self, client_id: Uuid, tickers: &[String]) {
        let normalised = Self::normalise(tickers);
        let mut inner = self.ws.lock();
        let Some(subs) = inner.subscriptions.get(&client_id) else {
            return; // client disconnected before this arrived
        };

        let room = self.max_subscriptions_per_client.saturating_sub(subs.len());
        let accepted: Vec<String> = normalised
            .into_iter()
            .filter(|t| !subs.contains(t))
            .take(room)
            .collect();

        if let Some(subs) = inner.subscriptions.get_mut(&client_id) {
            for ticker in &accepted {
                subs.insert(ticker.clone());
            }
        }
        for ticker in accepted {
            inner
                .ticker_subscribers
                .entry(ticker)
                .or_default()
                .insert(client_id);
        }
    }

    pub fn unsubscribe(&self, client_id: Uuid, tickers: &[String]) {
        let normalised = Self::normalise(tickers);
        let mut inner = self.ws.lock();
        if let Some(subs) = inner.subscriptions.get_mut(&client_id) {
            for ticker in &normalised {
                subs.remove(ticker);
            }
        }
        for ticker in normalised {
            if let Some(subs) = inner.ticker_subscribers.get_mut(&ticker) {
                subs.remove(&client_id);
                if subs.is_empty() {
                    inner.ticker_subscribers.remove(&ticker);
                }
            }
        }
    }

    pub fn subscriptions_of(&self, client_id: Uuid) -> HashSet<String> {
        self.ws
            .lock()
            .subscriptions
            .get(&client_id)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Broadcasting
    // ------------------------------------------------------------------

    /// Send a payload to every client subscribed to `ticker`. Returns the
    /// number of clients reached; failed sends unregister the client.
    pub fn broadcast_to_subscribers(&self, ticker: &str, payload: &serde_json::Value) -> usize {
        let serialised = match serde_json::to_string(payload) {
            Ok(s) => s,
            Err(e) => {
                error!("WS broadcast blocked: non-serialisable payload for {}: {}", ticker, e);
                return 0;
            }
        };
        if serialised.len() > MAX_PAYLOAD_BYTES {
            error!(
                "WS broadcast blocked: payload for {} exceeds {} bytes",
                ticker, MAX_PAYLOAD_BYTES
            );
            return 0;
        }

        let ticker_upper = ticker.to_uppercase();
        let targets: Vec<(Uuid, mpsc::UnboundedSender<String>)> = {
            let inner = self.ws.lock();
            inner
                .ticker_subscribers
                .get(&ticker_upper)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.connections.get(id).map(|tx| (*id, tx.clone())))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut sent = 0;
        let mut dead = Vec::new();
        for (id, tx) in targets {
            if tx.send(serialised.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(id);
            }
        }
        for id in dead {
            self.unregister_ws(id);
        }
        sent
    }

    /// Group fresh prices per subscriber so each client receives one
    /// `price_batch` containing only the tickers it subscribed to.
    pub fn broadcast_prices(&self, prices: &HashMap<String, PriceTick>) -> usize {
        // client_id -> {ticker -> tick}, snapshotted under the lock.
        let mut per_client: HashMap<Uuid, HashMap<&str, &PriceTick>> = HashMap::new();
        let senders: HashMap<Uuid, mpsc::UnboundedSender<String>> = {
            let inner = self.ws.lock();
            for (ticker, tick) in prices {
                if let Some(ids) = inner.ticker_subscribers.get(&ticker.to_uppercase()) {
                    for id in ids {
                        per_client
                            .entry(*id)
                            .or_default()
                            .insert(ticker.as_str(), tick);
                    }
                }
            }
            per_client
                .keys()
                .filter_map(|id| inner.connections.get(id).map(|tx| (*id, tx.clone())))
                .collect()
        };

        let mut sent = 0;
        let mut dead = Vec::new();
        for (client_id, tickers) in per_client {
            let Some(tx) = senders.get(&client_id) else {
                continue;
            };
            let payload = json!({
                "type": "price_batch",
                "prices": tickers
                    .iter()
                    .map(|(t, tick)| {
                        (t.to_string(), json!({
                            "price": tick.price,
                            "change": tick.change,
                            "change_pct": tick.change_pct,
                            "volume": tick.volume,
                            "ts": tick.ts,
                        }))
                    })
                    .collect::<serde_json::Map<String, serde_json::Value>>(),
            });
            let serialised = payload.to_string();
            if serialised.len() > MAX_PAYLOAD_BYTES {
                warn!("WS price_batch for {} exceeds size gate, skipped", client_id);
                continue;
            }
            if tx.send(serialised).is_ok() {
                sent += 1;
            } else {
                dead.push(client_id);
            }
        }
        for id in dead {
            self.unregister_ws(id);
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64) -> PriceTick {
        PriceTick {
            price,
            change: 1.0,
            change_pct: 0.5,
            volume: 100,
            ts: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_send_event_rejects_unknown_type() {
        let b = Broadcaster::new(50);
        let (_id, _rx) = b.register_sse();
        assert_eq!(b.send_event("heartbeat", json!({})), 1);
        assert_eq!(b.send_event("not_a_real_event", json!({})), 0);
    }

    #[tokio::test]
    async fn test_send_event_rejects_oversized_payload() {
        let b = Broadcaster::new(50);
        let (_id, _rx) = b.register_sse();
        let big = json!({"blob": "x".repeat(MAX_PAYLOAD_BYTES + 1)});
        assert_eq!(b.send_event("snapshot", big), 0);
    }

    #[tokio::test]
    async fn test_sse_delivery_order_is_fifo() {
        let b = Broadcaster::new(50);
        let (_id, mut rx) = b.register_sse();
        b.send_event("price_update", json!({"seq": 1}));
        b.send_event("price_update", json!({"seq": 2}));

        assert_eq!(rx.recv().await.unwrap().data["seq"], 1);
        assert_eq!(rx.recv().await.unwrap().data["seq"], 2);
    }

    #[tokio::test]
    async fn test_full_sse_queue_drops_client() {
        let b = Broadcaster::new(50);
        let (_id, rx) = b.register_sse();
        // Never drain the receiver.
        for _ in 0..SSE_QUEUE_SIZE {
            assert_eq!(b.send_event("heartbeat", json!({})), 1);
        }
        // Queue is full now: the client is reaped on the next send.
        assert_eq!(b.send_event("heartbeat", json!({})), 0);
        assert_eq!(b.sse_client_count(), 0);
        drop(rx);
    }

    #[tokio::test]
    async fn test_ws_selective_broadcast() {
        let b = Broadcaster::new(50);
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = b.register_ws(tx1);
        let c2 = b.register_ws(tx2);
        b.subscribe(c1, &["aapl".to_string()]);
        b.subscribe(c2, &["MSFT".to_string()]);

        let sent = b.broadcast_to_subscribers("AAPL", &json!({"price": 205.0}));
        assert_eq!(sent, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_cap_enforced() {
        let b = Broadcaster::new(2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let c = b.register_ws(tx);
        b.subscribe(
            c,
            &["AAPL".into(), "MSFT".into(), "NVDA".into(), "AMZN".into()],
        );
        assert_eq!(b.subscriptions_of(c).len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_prices_groups_by_subscriber() {
        let b = Broadcaster::new(50);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let c = b.register_ws(tx);
        b.subscribe(c, &["AAPL".to_string()]);

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), tick(205.0));
        prices.insert("MSFT".to_string(), tick(297.0));

        assert_eq!(b.broadcast_prices(&prices), 1);
        let raw = rx.try_recv().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["type"], "price_batch");
        assert!(parsed["prices"].get("AAPL").is_some());
        assert!(parsed["prices"].get("MSFT").is_none());
    }

    #[tokio::test]
    async fn test_dead_ws_client_is_reaped_on_send() {
        let b = Broadcaster::new(50);
        let (tx, rx) = mpsc::unbounded_channel();
        let c = b.register_ws(tx);
        b.subscribe(c, &["AAPL".to_string()]);
        drop(rx);

        assert_eq!(b.broadcast_to_subscribers("AAPL", &json!({"p": 1})), 0);
        assert_eq!(b.ws_client_count(), 0);
    }

    #[test]
    fn test_non_finite_floats_serialise_to_null() {
        // serde_json maps non-finite f64 into Null, which is exactly the
        // sanitisation the alert payload contract requires.
        let v = json!({"bad": f64::NAN, "also": f64::INFINITY});
        assert!(v["bad"].is_null());
        assert!(v["also"].is_null());
    }
}
