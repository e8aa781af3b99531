use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::db::{alert_queries, job_queries};
use crate::models::market::PriceTick;
use crate::services::broadcast::SseEvent;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stream", get(sse_stream))
        .route("/ws/prices", get(ws_prices))
}

// ==============================================================================
// SSE
// ==============================================================================

fn to_sse(event: &SseEvent) -> Event {
    Event::default()
        .event(event.event_type)
        .data(event.data.to_string())
}

/// Current-state payload sent right after connect so a fresh client does not
/// wait for the next broadcast to render.
async fn build_snapshot(state: &AppState) -> serde_json::Value {
    let active_alerts = alert_queries::get_active_alerts(&state.pool)
        .await
        .unwrap_or_default();
    let last_regime = job_queries::latest_success(&state.pool, "regime_check")
        .await
        .ok()
        .flatten()
        .and_then(|row| row.result_summary)
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok());
    let last_technical = job_queries::latest_success(&state.pool, "technical_monitor")
        .await
        .ok()
        .flatten()
        .and_then(|row| row.result_summary);

    json!({
        "active_alerts": active_alerts,
        "last_regime": last_regime,
        "last_technical_signal": last_technical,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

async fn sse_stream(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let (client_id, mut events) = state.broadcaster.register_sse();
    let snapshot = build_snapshot(&state).await;
    let broadcaster = state.broadcaster.clone();

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    tokio::spawn(async move {
        let heartbeat =
            || Event::default().event("heartbeat").data(json!({"ts": Utc::now().to_rfc3339()}).to_string());

        // Connect sequence: heartbeat first, then the state snapshot.
        if tx.send(Ok(heartbeat())).await.is_err()
            || tx
                .send(Ok(Event::default().event("snapshot").data(snapshot.to_string())))
                .await
                .is_err()
        {
            broadcaster.unregister_sse(client_id);
            return;
        }

        loop {
            match tokio::time::timeout(HEARTBEAT_INTERVAL, events.recv()).await {
                Ok(Some(event)) => {
                    if tx.send(Ok(to_sse(&event))).await.is_err() {
                        break; // client went away
                    }
                }
                // Queue was reaped by the broadcaster.
                Ok(None) => break,
                // Idle: keep the connection alive.
                Err(_) => {
                    if tx.send(Ok(heartbeat())).await.is_err() {
                        break;
                    }
                }
            }
        }
        broadcaster.unregister_sse(client_id);
        debug!("SSE stream closed for {}", client_id);
    });

    Sse::new(ReceiverStream::new(rx))
}

// ==============================================================================
// WebSocket
// ==============================================================================

#[derive(Debug, Deserialize)]
struct ClientMessage {
    op: String,
    #[serde(default)]
    tickers: Vec<String>,
}

async fn ws_prices(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut source) = socket.split();

    // Outbound path: the registry writes into this channel; a dedicated task
    // drains it into the socket so broadcasts never block on a slow client.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = state.broadcaster.register_ws(tx);
    debug!("WS client connected: {}", client_id);

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = source.next().await {
        match message {
            Message::Text(text) => {
                let Ok(msg) = serde_json::from_str::<ClientMessage>(&text) else {
                    warn!("WS {}: unparseable message", client_id);
                    continue;
                };
                match msg.op.as_str() {
                    "subscribe" => state.broadcaster.subscribe(client_id, &msg.tickers),
                    "unsubscribe" => state.broadcaster.unsubscribe(client_id, &msg.tickers),
                    "refresh" => {
                        // On-demand fetch of the client's subscriptions,
                        // delivered through the normal batch path.
                        let tickers: Vec<String> =
                            state.broadcaster.subscriptions_of(client_id).into_iter().collect();
                        if tickers.is_empty() {
                            continue;
                        }
                        let quotes = state.providers.get_quotes_batch(&tickers).await;
                        let now_ts = Utc::now().timestamp();
                        let prices: HashMap<String, PriceTick> = quotes
                            .into_iter()
                            .map(|(ticker, quote)| {
                                (
                                    ticker,
                                    PriceTick {
                                        price: quote.price,
                                        change: quote.change,
                                        change_pct: quote.change_percent,
                                        volume: quote.volume,
                                        ts: now_ts,
                                    },
                                )
                            })
                            .collect();
                        state.broadcaster.broadcast_prices(&prices);
                    }
                    other => warn!("WS {}: unknown op {:?}", client_id, other),
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.broadcaster.unregister_ws(client_id);
    send_task.abort();
    debug!("WS client disconnected: {}", client_id);
}
