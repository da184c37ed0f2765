//! Notification stream sessions
//!
//! Long-lived WebSocket per browser tab. On upgrade the session
//! authenticates, registers with its user's channel, receives a
//! `connected` acknowledgement and an `initial` batch of recent durable
//! notifications, and from then on gets a `notification` event for every
//! broadcast to that user.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::auth::{extract_token_from_header, extract_token_from_query};
use crate::db::schemas::NotificationDoc;
use crate::notify::{ChannelRegistry, InitialBatch};
use crate::server::AppState;

/// Write half of a session's WebSocket
pub type WsSink = Arc<
    Mutex<
        futures_util::stream::SplitSink<
            hyper_tungstenite::WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>,
            Message,
        >,
    >,
>;

/// JSON for a `notification` event
pub fn notification_event(entry: &NotificationDoc) -> String {
    serde_json::json!({ "event": "notification", "notification": entry }).to_string()
}

fn connected_event(session_id: uuid::Uuid) -> String {
    serde_json::json!({ "event": "connected", "session_id": session_id }).to_string()
}

fn initial_event(batch: &InitialBatch) -> String {
    serde_json::json!({
        "event": "initial",
        "notifications": batch.notifications,
        "unread_count": batch.unread_count,
        "page": batch.page,
    })
    .to_string()
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(format!(
            r#"{{"error":"{message}"}}"#
        ))))
        .unwrap()
}

/// Handle WebSocket upgrade for the notification stream
pub async fn handle_stream_upgrade(
    state: Arc<AppState>,
    req: hyper::Request<hyper::body::Incoming>,
) -> Response<Full<Bytes>> {
    // Browsers cannot set headers on WebSocket upgrades, so the token may
    // arrive in the query string instead
    let token = extract_token_from_query(req.uri().query()).or_else(|| {
        let header = req
            .headers()
            .get(hyper::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        extract_token_from_header(header).map(str::to_string)
    });

    let actor = token.and_then(|t| state.jwt.actor(&t));
    let Some(actor) = actor else {
        warn!("stream upgrade rejected: missing or invalid token");
        return json_error(StatusCode::UNAUTHORIZED, "Authentication required");
    };

    if state.registry.is_at_capacity() {
        warn!("stream upgrade rejected: session cap reached");
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "Server at capacity");
    }

    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => handle_session(state, ws, actor.id).await,
                    Err(e) => warn!("stream connection failed: {}", e),
                }
            });

            response.map(|_| Full::new(Bytes::new()))
        }
        Err(e) => {
            warn!("stream upgrade error: {}", e);
            json_error(StatusCode::BAD_REQUEST, "WebSocket upgrade failed")
        }
    }
}

async fn handle_session(
    state: Arc<AppState>,
    ws: hyper_tungstenite::WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>,
    user_id: String,
) {
    let (write, mut read) = ws.split();
    let write: WsSink = Arc::new(Mutex::new(write));

    // Register before emitting anything so no broadcast is missed between
    // the initial batch and the live phase
    let Some(session_id) = state.registry.subscribe(&user_id, Arc::clone(&write)) else {
        // Capacity was consumed between the upgrade check and now
        let _ = write.lock().await.close().await;
        return;
    };

    info!(%user_id, %session_id, "stream session opened");

    if send_text(&write, connected_event(session_id)).await.is_err() {
        state.registry.unsubscribe(&user_id, session_id);
        return;
    }

    match state
        .notifier
        .initial_batch(
            &user_id,
            state.args.initial_notifications,
            state.args.notifications_page_size,
        )
        .await
    {
        Ok(batch) => {
            if send_text(&write, initial_event(&batch)).await.is_err() {
                state.registry.unsubscribe(&user_id, session_id);
                return;
            }
        }
        Err(e) => warn!(%user_id, "initial batch failed: {}", e),
    }

    // The client does not speak; drain control frames until it hangs up
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(data)) => {
                let mut guard = write.lock().await;
                if guard.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    state.registry.unsubscribe(&user_id, session_id);
    let _ = write.lock().await.close().await;
    info!(%user_id, %session_id, "stream session closed");
}

async fn send_text(write: &WsSink, text: String) -> Result<(), ()> {
    let mut guard = write.lock().await;
    guard.send(Message::Text(text)).await.map_err(|_| ())
}

/// Force-deregister every session (process shutdown)
pub async fn disconnect_all(registry: &ChannelRegistry<WsSink>) {
    let sinks = registry.drain_all();
    info!(sessions = sinks.len(), "disconnecting all stream sessions");
    for sink in sinks {
        let mut guard = sink.lock().await;
        let _ = guard.close().await;
    }
}
