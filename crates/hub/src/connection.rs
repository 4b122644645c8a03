// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One live socket: identity, query map, session data, lifecycle status and
//! the serialization lock guarding writes to the transport.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::time::SystemTime;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::envelope::{self, CODE_FAILED, CODE_OK, MSG_OK};
use crate::error::HubError;

/// Write half of a connection's transport.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Process-unique connection identity, generated at accept time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(String);

impl ConnId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ConnId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a connection.
///
/// ```text
/// Connecting -> Authing -> Connected -> Closed
///                  \___________________/
/// ```
///
/// `Closed` is terminal and only reachable from a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnStatus {
    Connecting,
    Authing,
    Connected,
    Closed,
}

impl ConnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authing => "authing",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn allows(self, next: ConnStatus) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Authing)
                | (Self::Authing, Self::Connected)
                | (Self::Authing, Self::Closed)
                | (Self::Connected, Self::Closed)
        )
    }
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection facts stashed by handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Authenticated subject id, set by the auth handler.
    pub uid: Option<i64>,
    pub attrs: HashMap<String, Value>,
}

/// A live socket plus its session state.
pub struct Connection {
    id: ConnId,
    query: HashMap<String, String>,
    created_at: SystemTime,
    status: Mutex<ConnStatus>,
    session: Mutex<Session>,
    /// Serialization lock: every frame written to the socket goes through it.
    /// `None` once the transport has been released.
    sink: tokio::sync::Mutex<Option<FrameSink>>,
    /// Cancelled when the status reaches `Closed`.
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(query: HashMap<String, String>, sink: FrameSink) -> Self {
        Self {
            id: ConnId::generate(),
            query,
            created_at: SystemTime::now(),
            status: Mutex::new(ConnStatus::Connecting),
            session: Mutex::new(Session::default()),
            sink: tokio::sync::Mutex::new(Some(sink)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Query-string parameters captured from the upgrade request.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn status(&self) -> ConnStatus {
        *self.status.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.status() == ConnStatus::Closed
    }

    /// Move to `next`, returning the previous status.
    pub(crate) fn transition(&self, next: ConnStatus) -> Result<ConnStatus, HubError> {
        let mut status = self.status.lock();
        let prev = *status;
        if !prev.allows(next) {
            return Err(HubError::InvalidTransition { from: prev, to: next });
        }
        *status = next;
        drop(status);
        if next == ConnStatus::Closed {
            self.cancel.cancel();
        }
        Ok(prev)
    }

    /// Promote an authing connection. Called by the auth handler on success.
    pub fn set_connected(&self) -> Result<(), HubError> {
        self.transition(ConnStatus::Connected).map(|_| ())
    }

    /// Resolves once the connection has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Snapshot of the session data.
    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    pub fn update_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.session.lock())
    }

    pub fn uid(&self) -> Option<i64> {
        self.session.lock().uid
    }

    /// Write one text frame. Concurrent callers are serialized so frames
    /// never interleave on the wire.
    pub async fn send_text(&self, text: String) -> Result<(), HubError> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| HubError::Transport("connection released".to_owned()))?;
        sink.send(Message::Text(text.into())).await.map_err(HubError::from)
    }

    /// Write a reply envelope, logging any failure.
    pub async fn write_envelope(
        &self,
        router: &str,
        code: i32,
        msg: &str,
        data: Value,
    ) -> Result<(), HubError> {
        let result = self.send_text(envelope::encode(router, code, msg, data)).await;
        if let Err(ref e) = result {
            tracing::error!(conn_id = %self.id, router, err = %e, "websocket write failed");
        }
        result
    }

    pub async fn ok(&self, router: &str, data: Value) -> Result<(), HubError> {
        self.write_envelope(router, CODE_OK, MSG_OK, data).await
    }

    pub async fn failed(&self, router: &str, msg: &str) -> Result<(), HubError> {
        self.write_envelope(router, CODE_FAILED, msg, serde_json::json!({})).await
    }

    /// Release the transport: send a close frame and shut the sink.
    /// Returns `false` when it was already released.
    pub(crate) async fn release(&self) -> bool {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return false;
        };
        let _ = sink.send(Message::Close(None)).await;
        if let Err(e) = sink.close().await {
            tracing::debug!(conn_id = %self.id, err = %e, "transport close failed");
        }
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
