//! WebSocket server handler using Axum.

use crate::client::CLIENT_CHANNEL_BUFFER_SIZE;
use crate::protocol::parse_frame;
use crate::router::{EventRouter, RouterState};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Interval between keepalive pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long a closing connection may take to flush queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared application state.
pub struct AppState {
    pub router: Arc<EventRouter>,
    /// Flips to true when the server stops accepting work; open sockets
    /// close themselves.
    pub closing: watch::Receiver<bool>,
}

/// Create the HTTP router: `/` upgrades to WebSocket, `/health` reports state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let router_state = state.router.state();
    let status = if router_state == RouterState::Running {
        "ok"
    } else {
        "unavailable"
    };
    Json(json!({
        "status": status,
        "state": router_state,
        "clients": state.router.client_count(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_CHANNEL_BUFFER_SIZE);

    let client_id = Uuid::new_v4();
    state.router.add_client(client_id, tx.clone());
    counter!("gateway_connections_total").increment(1);
    info!("Client {} connected", client_id);

    // A failed socket write ends the writer quietly; the reader sees the
    // close.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_interval.reset();
    let mut closing = state.closing.clone();

    loop {
        tokio::select! {
            biased;

            _ = server_closing(&mut closing) => {
                debug!("Closing client {} for server shutdown", client_id);
                let _ = tx.try_send(Message::Close(None));
                break;
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        if !handle_message(&state, client_id, &tx, msg).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", client_id, e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(TrySendError::Closed(_)) = tx.try_send(Message::Ping(Vec::new().into())) {
                    break;
                }
            }
        }
    }

    // The registry holds the other sender; once both are gone the writer
    // drains what is queued and exits.
    state.router.remove_client(&client_id);
    drop(tx);
    let abort = send_task.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, send_task).await.is_err() {
        abort.abort();
    }

    counter!("gateway_disconnections_total").increment(1);
    info!("Client {} disconnected", client_id);
}

async fn server_closing(closing: &mut watch::Receiver<bool>) {
    let _ = closing.wait_for(|closing| *closing).await;
}

/// Handle a single WebSocket message. Returns false when the connection
/// should close.
async fn handle_message(
    state: &AppState,
    client_id: Uuid,
    tx: &mpsc::Sender<Message>,
    msg: Message,
) -> bool {
    let frame = match msg {
        Message::Text(text) => parse_frame(text.as_str().as_bytes()),
        Message::Binary(data) => parse_frame(&data),
        Message::Ping(data) => {
            let _ = tx.try_send(Message::Pong(data));
            return true;
        }
        Message::Pong(_) => return true,
        Message::Close(_) => return false,
    };

    match frame {
        Ok(frame) => {
            if let Err(e) = state.router.handle_client_message(client_id, frame).await {
                warn!("Error handling message from {}: {}", client_id, e);
            }
        }
        Err(e) => {
            warn!("Dropping unparsable frame from {}: {}", client_id, e);
            counter!("gateway_invalid_frames_total").increment(1);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ConsumerGroups;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use common::{ClientFrame, ServerMessage, Topic};
    use nats_client::{Broker, MemoryBroker};
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
    use tower::ServiceExt;

    const BTC_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn app_state() -> Arc<AppState> {
        let broker = Arc::new(MemoryBroker::with_all_topics());
        let router = Arc::new(EventRouter::new(broker, ConsumerGroups::generate("test")));
        let (_closing_tx, closing) = watch::channel(false);
        Arc::new(AppState { router, closing })
    }

    async fn health(state: Arc<AppState>) -> serde_json::Value {
        let response = create_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_state() {
        let state = app_state();
        assert_eq!(
            health(state.clone()).await,
            json!({"status": "unavailable", "state": "created", "clients": 0})
        );

        state.router.initialize().await.unwrap();
        let (tx, _rx) = mpsc::channel(1);
        state.router.add_client(Uuid::new_v4(), tx);
        assert_eq!(
            health(state.clone()).await,
            json!({"status": "ok", "state": "running", "clients": 1})
        );

        state.router.shutdown().await;
    }

    #[tokio::test]
    async fn test_plain_get_is_not_upgraded() {
        let response = create_router(app_state())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_live_sessions() {
        let broker = Arc::new(MemoryBroker::with_all_topics());
        let router = Arc::new(EventRouter::new(
            broker.clone(),
            ConsumerGroups::generate("test"),
        ));
        router.initialize().await.unwrap();
        let (closing_tx, closing) = watch::channel(false);
        let app = create_router(Arc::new(AppState {
            router: router.clone(),
            closing,
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let (mut second, _) = connect_async(url.as_str()).await.unwrap();
        wait_until(|| router.client_count() == 2).await;

        // A bad frame is dropped and the session keeps working.
        first
            .send(WsMessage::Text("garbage{".to_string()))
            .await
            .unwrap();
        let setup = serde_json::to_string(&ClientFrame::setup_wallet(BTC_ADDR)).unwrap();
        first.send(WsMessage::Text(setup)).await.unwrap();
        wait_until(|| broker.published(Topic::BalanceRequest).len() == 1).await;
        assert_eq!(broker.published(Topic::BalanceRequest)[0].key, BTC_ADDR);

        broker
            .publish(
                Topic::PriceUpdate,
                "btc",
                Bytes::from_static(br#"{"price":61000}"#),
            )
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), first.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = frame.into_text().unwrap();
        assert_eq!(
            serde_json::from_str::<ServerMessage>(&text).unwrap(),
            ServerMessage::PriceUpdated { price: 61000.0 }
        );

        // Client close unregisters only that session.
        first.close(None).await.unwrap();
        wait_until(|| router.client_count() == 1).await;
        assert_eq!(router.interest_count(), 0);

        // Server shutdown closes the remaining socket.
        closing_tx.send(true).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), second.next())
            .await
            .unwrap();
        assert!(matches!(frame, Some(Ok(WsMessage::Close(_)))));
        wait_until(|| router.client_count() == 0).await;

        router.shutdown().await;
    }
}
