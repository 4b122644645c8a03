// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The hub owns one upgrade path, its connection registry and its hooks.
//!
//! Each accepted socket gets its own task running [`Hub::serve`]:
//! 1. Register the connection (`Connecting -> Authing`), run `on_connect`
//! 2. Read frames in arrival order and hand them to the message hook
//!    (or the built-in fallback when none is installed)
//! 3. On read error, peer close or explicit close, remove the connection,
//!    run `on_close` and release the transport exactly once

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::HubOptions;
use crate::connection::{ConnId, ConnStatus, Connection};
use crate::envelope;
use crate::error::HubError;
use crate::registry::{PathClaims, Registry};

/// Boxed future returned by message hooks and route handlers.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Hook invoked with a connection (`on_connect`, `on_close`).
pub type ConnHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Hook invoked when reading from a connection fails.
pub type ErrorHook = Arc<dyn Fn(&Arc<Connection>, &HubError) + Send + Sync>;

/// Custom handling for every inbound frame. Owns all protocol logic,
/// including authentication, when installed.
pub trait MessageHook: Send + Sync {
    fn on_message<'a>(
        &'a self,
        hub: &'a Arc<Hub>,
        conn: &'a Arc<Connection>,
        frame: Bytes,
    ) -> HookFuture<'a>;
}

impl<F, Fut> MessageHook for F
where
    F: Fn(Arc<Hub>, Arc<Connection>, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_message<'a>(
        &'a self,
        hub: &'a Arc<Hub>,
        conn: &'a Arc<Connection>,
        frame: Bytes,
    ) -> HookFuture<'a> {
        Box::pin(self(Arc::clone(hub), Arc::clone(conn), frame))
    }
}

/// Notice sent by the open-auth fallback on the first frame.
pub const LOGIN_SUCCESS_NOTICE: &str = "Login Success!";
/// Prefix of the open-auth fallback echo.
pub const ECHO_PREFIX: &str = "Message From Server : ";

pub struct Hub {
    path: String,
    registry: Registry,
    options: HubOptions,
}

impl Hub {
    /// Build a hub bound to `path`. Fails if another hub already claimed it.
    pub fn new(
        claims: &PathClaims,
        path: impl Into<String>,
        options: HubOptions,
    ) -> Result<Arc<Self>, HubError> {
        let path = path.into();
        claims.claim(&path)?;
        if options.on_message.is_none() && options.insecure_open_auth {
            warn!(path, "hub running in open-auth mode: connections are never verified");
        }
        Ok(Arc::new(Self { path, registry: Registry::new(), options }))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Axum router serving the upgrade endpoint at this hub's path.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new().route(&self.path, get(upgrade_handler)).with_state(Arc::clone(self))
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.registry.get(id).await
    }

    pub async fn len(&self) -> usize {
        self.registry.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.is_empty().await
    }

    pub async fn ids(&self) -> Vec<ConnId> {
        self.registry.ids().await
    }

    /// Push a success envelope to an authenticated connection.
    /// Returns `false` if the connection is unknown, not yet authenticated,
    /// or the write failed.
    pub async fn push(&self, id: &str, router: &str, data: Value) -> bool {
        let Some(conn) = self.registry.get(id).await else {
            return false;
        };
        if conn.status() != ConnStatus::Connected {
            return false;
        }
        conn.ok(router, data).await.is_ok()
    }

    /// Close a connection on request. Safe to call any number of times.
    /// Connections this hub never registered are left untouched.
    pub async fn close(&self, conn: &Arc<Connection>) {
        info!(conn_id = %conn.id(), "manual closing");
        self.close_and_remove(conn).await;
    }

    /// Close every registered connection.
    pub async fn close_all(&self) {
        for id in self.registry.ids().await {
            if let Some(conn) = self.registry.get(id.as_str()).await {
                self.close(&conn).await;
            }
        }
    }

    /// Accept an upgraded socket and run it until it closes.
    pub async fn accept(self: Arc<Self>, socket: WebSocket, query: HashMap<String, String>) {
        let (sink, stream) = socket.split();
        let conn = Arc::new(Connection::new(query, Box::pin(sink)));
        self.serve(conn, stream).await;
    }

    /// Register `conn` and run its read loop over `frames`.
    pub async fn serve<S>(self: Arc<Self>, conn: Arc<Connection>, mut frames: S)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Send + Unpin,
    {
        let registered = self
            .registry
            .insert_with(Arc::clone(&conn), |c| {
                if let Some(hook) = &self.options.on_connect {
                    hook(c);
                }
            })
            .await;
        if let Err(e) = registered {
            error!(conn_id = %conn.id(), err = %e, "failed to register connection");
            conn.release().await;
            return;
        }
        info!(conn_id = %conn.id(), query = ?conn.query(), "connected");

        self.listen(&conn, &mut frames).await;

        info!(conn_id = %conn.id(), "auto closing connection");
        self.close_and_remove(&conn).await;
    }

    async fn listen<S>(self: &Arc<Self>, conn: &Arc<Connection>, frames: &mut S)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Send + Unpin,
    {
        info!(conn_id = %conn.id(), "start listen");
        loop {
            let next = tokio::select! {
                biased;
                _ = conn.closed() => break,
                next = self.next_frame(frames) => next,
            };
            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(conn_id = %conn.id(), "peer closed");
                    break;
                }
                Err(e) => {
                    debug!(conn_id = %conn.id(), err = %e, "on message err");
                    if let Some(hook) = &self.options.on_error {
                        hook(conn, &e);
                    }
                    break;
                }
            };

            debug!(conn_id = %conn.id(), len = frame.len(), "on message");
            match &self.options.on_message {
                Some(hook) => hook.on_message(self, conn, frame).await,
                None => self.fallback(conn, &frame).await,
            }
            if conn.is_closed() {
                break;
            }
        }
    }

    /// Next data frame. `Ok(None)` when the peer closed cleanly.
    async fn next_frame<S>(&self, frames: &mut S) -> Result<Option<Bytes>, HubError>
    where
        S: Stream<Item = Result<Message, axum::Error>> + Send + Unpin,
    {
        loop {
            let item = match self.options.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, frames.next())
                    .await
                    .map_err(|_| HubError::Transport("idle timeout".to_owned()))?,
                None => frames.next().await,
            };
            match item {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::from(text)))
                }
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(HubError::from(e)),
            }
        }
    }

    /// Built-in handling when no message hook is installed.
    async fn fallback(&self, conn: &Arc<Connection>, frame: &[u8]) {
        if !self.options.insecure_open_auth {
            warn!(conn_id = %conn.id(), "no message hook installed, refusing frame");
            let _ = conn.failed("", "unauthorized").await;
            self.close(conn).await;
            return;
        }
        if conn.status() == ConnStatus::Authing {
            if let Err(e) = conn.set_connected() {
                warn!(conn_id = %conn.id(), err = %e, "open-auth promotion failed");
                return;
            }
            let _ = conn.send_text(envelope::notice(LOGIN_SUCCESS_NOTICE)).await;
            return;
        }
        let echo = format!("{ECHO_PREFIX}{}", String::from_utf8_lossy(frame));
        let _ = conn.send_text(envelope::notice(&echo)).await;
    }

    async fn close_and_remove(&self, conn: &Arc<Connection>) {
        let closed_now = self
            .registry
            .remove_with(conn, |c| {
                if let Some(hook) = &self.options.on_close {
                    hook(c);
                }
            })
            .await;
        if !closed_now && !conn.is_closed() {
            debug!(conn_id = %conn.id(), path = %self.path, "close ignored, not held by this hub");
            return;
        }
        let released = conn.release().await;
        if closed_now {
            info!(conn_id = %conn.id(), released, "connection closed");
        }
    }
}

/// `GET <path>`: upgrade to a WebSocket and hand the socket to the hub.
async fn upgrade_handler(
    State(hub): State<Arc<Hub>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !hub.options.upgrade.allows_origin(origin) {
        warn!(origin, "upgrade refused, origin not allowed");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let ws = match hub.options.upgrade.max_message_size {
        Some(limit) => ws.max_message_size(limit),
        None => ws,
    };
    ws.on_upgrade(move |socket| hub.accept(socket, query)).into_response()
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
