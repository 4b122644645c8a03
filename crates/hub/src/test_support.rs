// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::SinkExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

use crate::config::HubOptions;
use crate::connection::{Connection, FrameSink};
use crate::envelope::Response;
use crate::hub::Hub;

/// Frames the hub reads from an in-memory connection.
pub type MemoryFrames = ReceiverStream<Result<Message, axum::Error>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    /// Frames written by the hub.
    pub outbound: mpsc::Receiver<Message>,
    /// Frames for the hub to read.
    pub inbound: mpsc::Sender<Result<Message, axum::Error>>,
}

impl MemoryPeer {
    pub async fn send_json(&self, value: &serde_json::Value) -> anyhow::Result<()> {
        self.send_text(&value.to_string()).await
    }

    pub async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.inbound
            .send(Ok(Message::Text(text.to_owned().into())))
            .await
            .map_err(|_| anyhow::anyhow!("hub stopped reading"))
    }

    /// Inject a transport error into the hub's read side.
    pub async fn send_error(&self, detail: &str) -> anyhow::Result<()> {
        let err = axum::Error::new(std::io::Error::other(detail.to_owned()));
        self.inbound.send(Err(err)).await.map_err(|_| anyhow::anyhow!("hub stopped reading"))
    }

    /// Next frame written by the hub, or `None` once the transport is released.
    pub async fn recv(&mut self) -> anyhow::Result<Option<Message>> {
        tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .map_err(|_| anyhow::anyhow!("recv timeout"))
    }

    /// Next frame written by the hub, parsed as JSON.
    pub async fn recv_json(&mut self) -> anyhow::Result<serde_json::Value> {
        match self.recv().await? {
            Some(Message::Text(text)) => Ok(serde_json::from_str(text.as_str())?),
            Some(other) => anyhow::bail!("expected Text message, got {other:?}"),
            None => anyhow::bail!("transport released"),
        }
    }

    /// Next frame written by the hub, parsed as a reply envelope.
    pub async fn recv_response(&mut self) -> anyhow::Result<Response> {
        Ok(serde_json::from_value(self.recv_json().await?)?)
    }

    /// Drain until the transport is released, returning every frame seen.
    pub async fn drain(&mut self) -> anyhow::Result<Vec<Message>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.recv().await? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// Build a connection backed by channels instead of a socket.
pub fn memory_connection(
    query: HashMap<String, String>,
) -> (Arc<Connection>, MemoryFrames, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::channel(64);
    let (in_tx, in_rx) = mpsc::channel(64);
    let sink: FrameSink = Box::pin(PollSender::new(out_tx).sink_map_err(|_| {
        axum::Error::new(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
    }));
    let conn = Arc::new(Connection::new(query, sink));
    (conn, ReceiverStream::new(in_rx), MemoryPeer { outbound: out_rx, inbound: in_tx })
}

/// Register an in-memory connection with `hub` and run its read loop in a task.
pub fn spawn_memory_client(
    hub: &Arc<Hub>,
) -> (Arc<Connection>, MemoryPeer, tokio::task::JoinHandle<()>) {
    let (conn, frames, peer) = memory_connection(HashMap::new());
    let handle = tokio::spawn(Arc::clone(hub).serve(Arc::clone(&conn), frames));
    (conn, peer, handle)
}

/// Wait until `conn` shows up in the hub's registry.
pub async fn wait_registered(hub: &Hub, conn: &Connection) -> anyhow::Result<()> {
    tokio::time::timeout(RECV_TIMEOUT, async {
        while !hub.registry().contains(conn.id().as_str()).await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("connection {} never registered", conn.id()))
}

/// Spawn the hub's HTTP server on a random local port.
pub async fn spawn_http_server(
    hub: &Arc<Hub>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = hub.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Counts hook invocations and records their order.
#[derive(Clone, Default)]
pub struct HookLog {
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub errors: Arc<AtomicUsize>,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach counting `on_connect`, `on_close` and `on_error` hooks.
    pub fn attach(&self, options: HubOptions) -> HubOptions {
        let (connects, closes, errors) =
            (Arc::clone(&self.connects), Arc::clone(&self.closes), Arc::clone(&self.errors));
        let (on_connect_events, on_close_events, on_error_events) =
            (Arc::clone(&self.events), Arc::clone(&self.events), Arc::clone(&self.events));
        options
            .with_on_connect(move |conn| {
                connects.fetch_add(1, Ordering::SeqCst);
                on_connect_events.lock().push(format!("connect:{}", conn.status()));
            })
            .with_on_close(move |conn| {
                closes.fetch_add(1, Ordering::SeqCst);
                on_close_events.lock().push(format!("close:{}", conn.status()));
            })
            .with_on_error(move |_, err| {
                errors.fetch_add(1, Ordering::SeqCst);
                on_error_events.lock().push(format!("error:{}", err.as_str()));
            })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

/// Assert that an expression is `Err` and its message contains `$substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
