//! WebSocket push channel
//!
//! A publish-only broadcast surface on its own port. Each accepted socket
//! gets a numeric id and the current status document; inbound text is
//! limited to two reserved commands, everything else goes verbatim to the
//! external push hook.

use crate::config::ConfigStore;
use crate::error::Result;
use crate::status::StatusContext;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default push channel port
pub const DEFAULT_PUSH_PORT: u16 = 81;

/// External push hook: unmatched inbound text plus the connection id
pub type PushHook = Box<dyn Fn(&str, u64) + Send + Sync>;

/// Clonable handle for broadcasting text to every push client
#[derive(Clone)]
pub struct PushHandle {
    tx: broadcast::Sender<String>,
}

impl PushHandle {
    /// Create a handle with its backing channel
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Send `message` verbatim to every connected socket.
    /// A send with no connected clients is a no-op.
    pub fn broadcast<S: Into<String>>(&self, message: S) {
        let _ = self.tx.send(message.into());
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for PushHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state for the push channel
pub struct PushState {
    /// Status document renderer
    pub status: Arc<StatusContext>,
    /// Configuration store (theme toggling)
    pub config: Arc<ConfigStore>,
    /// External command hook
    pub hook: Option<PushHook>,
    /// Broadcast handle
    pub handle: PushHandle,
    next_id: AtomicU64,
}

impl PushState {
    /// Create the push state
    pub fn new(
        status: Arc<StatusContext>,
        config: Arc<ConfigStore>,
        hook: Option<PushHook>,
        handle: PushHandle,
    ) -> Self {
        Self {
            status,
            config,
            hook,
            handle,
            next_id: AtomicU64::new(0),
        }
    }

    /// Broadcast the current status document to every client
    pub async fn broadcast_status(&self) {
        let doc = self.status.push_document().await;
        self.handle.broadcast(doc.to_string());
    }

    async fn handle_text(&self, text: &str, id: u64) {
        match text {
            "getStatus" => self.broadcast_status().await,
            "toggleTheme" => {
                match self.config.toggle_theme().await {
                    Ok(theme) => debug!("Push client {} toggled theme to {}", id, theme),
                    Err(e) => warn!("Theme toggle failed: {}", e),
                }
                self.broadcast_status().await;
            }
            other => match &self.hook {
                Some(hook) => hook(other, id),
                None => debug!("Push client {} sent unhandled message: {}", id, other),
            },
        }
    }
}

/// Build the push channel router
pub fn router(state: Arc<PushState>) -> Router {
    Router::new().route("/", get(ws_upgrade)).with_state(state)
}

/// Serve the push channel on an already-bound listener
pub async fn serve(listener: TcpListener, state: Arc<PushState>) -> Result<()> {
    info!("Push channel listening on {:?}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| crate::error::AgentError::Transport(e.to_string()))
}

async fn ws_upgrade(State(state): State<Arc<PushState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<PushState>) {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    info!("Push client {} connected", id);

    let (mut sink, mut stream) = socket.split();
    let mut rx = state.handle.subscribe();

    // New clients receive the current status immediately
    let doc = state.status.push_document().await;
    if sink.send(Message::Text(doc.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => state.handle_text(text.trim(), id).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Push client {} errored: {}", id, e);
                    break;
                }
            },
            outbound = rx.recv() => match outbound {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Push client {} lagged, {} messages dropped", id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    info!("Push client {} disconnected", id);
}
