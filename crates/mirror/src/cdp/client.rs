//! CDP Client - one WebSocket to the browser, multiplexed across surfaces
//!
//! Requests are matched to responses by ID. Events go to per-method
//! subscribers; every device surface filters them by its own session ID.

use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::protocol::*;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Request timeout")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Invalid response for request {0}")]
    InvalidResponse(RequestId),

    #[error("Invalid DevTools endpoint {0}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, CDPError>;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(&CDPEvent) + Send + Sync>;

/// Handle for removing an event subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSubscription(u64);

/// Routes decoded messages to waiting requests and event subscribers
#[derive(Default)]
struct Router {
    next_subscription: AtomicU64,
    pending: DashMap<RequestId, oneshot::Sender<CDPResponse>>,
    subscribers: DashMap<String, Vec<(EventSubscription, EventCallback)>>,
}

impl Router {
    fn subscribe(&self, method: String, callback: EventCallback) -> EventSubscription {
        let token = EventSubscription(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .entry(method)
            .or_default()
            .push((token, callback));
        token
    }

    fn unsubscribe(&self, token: EventSubscription) -> bool {
        let mut removed = false;
        for mut entry in self.subscribers.iter_mut() {
            let before = entry.len();
            entry.retain(|(t, _)| *t != token);
            removed |= entry.len() != before;
        }
        removed
    }

    fn route(&self, text: &str) -> Result<()> {
        let msg: CDPMessage = serde_json::from_str(text)?;

        match msg {
            CDPMessage::Response(response) => {
                if let Some((_, tx)) = self.pending.remove(&response.id) {
                    let _ = tx.send(response);
                } else {
                    tracing::warn!("Received response for unknown request: {}", response.id);
                }
            }
            CDPMessage::Event(event) => {
                // Callbacks may subscribe or unsubscribe, so don't hold the shard
                let callbacks: Vec<EventCallback> = match self.subscribers.get(&event.method) {
                    Some(subscribers) => subscribers.iter().map(|(_, cb)| cb.clone()).collect(),
                    None => return Ok(()),
                };
                for callback in callbacks {
                    callback(&event);
                }
            }
        }

        Ok(())
    }
}

pub struct CDPClient {
    next_id: AtomicU64,
    router: Arc<Router>,
    ws_sink: Arc<RwLock<WsSink>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    request_timeout: Duration,
}

impl CDPClient {
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        Self::connect_with_timeout(ws_url, DEFAULT_TIMEOUT).await
    }

    /// Connect to a DevTools endpoint. Requests that get no response within
    /// `request_timeout` fail with `CDPError::Timeout`.
    pub async fn connect_with_timeout(ws_url: &str, request_timeout: Duration) -> Result<Arc<Self>> {
        let endpoint = Url::parse(ws_url).map_err(|_| CDPError::InvalidEndpoint(ws_url.to_string()))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(CDPError::InvalidEndpoint(ws_url.to_string()));
        }

        let (ws_stream, _) = connect_async(endpoint.as_str()).await?;
        let (sink, mut stream) = ws_stream.split();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let router = Arc::new(Router::default());
        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            router: router.clone(),
            ws_sink: Arc::new(RwLock::new(sink)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            request_timeout,
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Err(e) = router.route(&text) {
                                    tracing::error!("[CDPClient] Failed to handle message: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("[CDPClient] WebSocket closed");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("[CDPClient] WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("[CDPClient] Shutdown signal received");
                        break;
                    }
                }
            }

            // Dropping the senders fails every waiting request with Closed
            router.pending.clear();
        });

        tracing::info!("[CDPClient] Connected to {}", ws_url);
        Ok(client)
    }

    /// Send CDP request and wait for response
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CDPRequest {
            id,
            method: method.into(),
            params,
            session_id,
        };

        let (tx, rx) = oneshot::channel();
        self.router.pending.insert(id, tx);

        let json = serde_json::to_string(&request)?;
        let sent = {
            let mut sink = self.ws_sink.write().await;
            sink.send(Message::Text(json)).await
        };
        if let Err(e) = sent {
            self.router.pending.remove(&id);
            return Err(CDPError::WebSocket(e));
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CDPError::Closed),
            Err(_) => {
                self.router.pending.remove(&id);
                tracing::warn!("[CDPClient] {} timed out", request.method);
                return Err(CDPError::Timeout);
            }
        };

        if response.id != id {
            return Err(CDPError::InvalidResponse(id));
        }
        if let Some(error) = response.error {
            return Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) -> EventSubscription {
        self.router.subscribe(method.into(), callback)
    }

    pub fn unsubscribe(&self, token: EventSubscription) -> bool {
        self.router.unsubscribe(token)
    }

    /// Close connection gracefully
    pub async fn close(&self) -> Result<()> {
        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        let mut sink = self.ws_sink.write().await;
        sink.close().await?;
        Ok(())
    }
}
