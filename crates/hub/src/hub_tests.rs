// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use serde_json::json;

use super::{Hub, ECHO_PREFIX, LOGIN_SUCCESS_NOTICE};
use crate::config::HubOptions;
use crate::connection::{ConnStatus, Connection};
use crate::registry::PathClaims;
use crate::test_support::{
    memory_connection, spawn_memory_client, wait_registered, HookLog, RECV_TIMEOUT,
};

fn open_hub(log: &HookLog) -> anyhow::Result<Arc<Hub>> {
    let options = log.attach(HubOptions::new().insecure_open_auth(true));
    Ok(Hub::new(&PathClaims::new(), "/", options)?)
}

fn closed_hub(log: &HookLog) -> anyhow::Result<Arc<Hub>> {
    Ok(Hub::new(&PathClaims::new(), "/", log.attach(HubOptions::new()))?)
}

async fn join(handle: tokio::task::JoinHandle<()>) -> anyhow::Result<()> {
    tokio::time::timeout(RECV_TIMEOUT, handle).await??;
    Ok(())
}

fn close_frames(frames: &[Message]) -> usize {
    frames.iter().filter(|m| matches!(m, Message::Close(_))).count()
}

#[tokio::test]
async fn open_auth_promotes_then_echoes() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let (conn, mut peer, _handle) = spawn_memory_client(&hub);

    peer.send_text("hello").await?;
    assert_eq!(peer.recv_json().await?, json!({ "msg": LOGIN_SUCCESS_NOTICE }));
    assert_eq!(conn.status(), ConnStatus::Connected);

    peer.send_text("ping").await?;
    assert_eq!(peer.recv_json().await?, json!({ "msg": format!("{ECHO_PREFIX}ping") }));
    assert!(hub.registry().contains(conn.id().as_str()).await);
    Ok(())
}

#[tokio::test]
async fn control_frames_are_not_messages() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let (conn, mut peer, _handle) = spawn_memory_client(&hub);

    peer.inbound.send(Ok(Message::Ping(Bytes::from_static(b"hb")))).await?;
    peer.inbound.send(Ok(Message::Binary(Bytes::from_static(b"first")))).await?;
    assert_eq!(peer.recv_json().await?, json!({ "msg": LOGIN_SUCCESS_NOTICE }));
    assert_eq!(conn.status(), ConnStatus::Connected);
    Ok(())
}

#[tokio::test]
async fn no_hook_without_open_auth_refuses_and_closes() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = closed_hub(&log)?;
    let (conn, mut peer, handle) = spawn_memory_client(&hub);

    peer.send_text("hello").await?;
    assert_eq!(
        peer.recv_json().await?,
        json!({ "router": "", "code": -1, "msg": "unauthorized", "data": {} })
    );
    let rest = peer.drain().await?;
    assert_eq!(close_frames(&rest), 1);
    join(handle).await?;

    assert!(conn.is_closed());
    assert!(hub.is_empty().await);
    assert_eq!(log.events(), vec!["connect:authing", "close:authing"]);
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let (conn, mut peer, handle) = spawn_memory_client(&hub);
    wait_registered(&hub, &conn).await?;

    hub.close(&conn).await;
    hub.close(&conn).await;
    join(handle).await?;
    hub.close(&conn).await;

    let frames = peer.drain().await?;
    assert_eq!(close_frames(&frames), 1);
    assert_eq!(frames.len(), 1);
    assert_eq!(log.closes(), 1);
    assert_eq!(conn.status(), ConnStatus::Closed);
    assert!(hub.get(conn.id().as_str()).await.is_none());
    Ok(())
}

#[tokio::test]
async fn close_leaves_unregistered_connection_alone() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let (conn, _frames, mut peer) = memory_connection(HashMap::new());

    hub.close(&conn).await;

    assert_eq!(conn.status(), ConnStatus::Connecting);
    assert_eq!(log.connects(), 0);
    assert_eq!(log.closes(), 0);
    conn.ok("still/open", json!({})).await?;
    assert_eq!(peer.recv_json().await?["router"], "still/open");
    Ok(())
}

#[tokio::test]
async fn close_through_other_hub_is_ignored() -> anyhow::Result<()> {
    let (log_a, log_b) = (HookLog::new(), HookLog::new());
    let claims = PathClaims::new();
    let hub_a = Hub::new(&claims, "/a", log_a.attach(HubOptions::new().insecure_open_auth(true)))?;
    let hub_b = Hub::new(&claims, "/b", log_b.attach(HubOptions::new().insecure_open_auth(true)))?;
    let (conn, mut peer, handle) = spawn_memory_client(&hub_b);
    wait_registered(&hub_b, &conn).await?;

    hub_a.close(&conn).await;

    assert_eq!(conn.status(), ConnStatus::Authing);
    assert_eq!(log_a.closes(), 0);
    assert!(hub_b.registry().contains(conn.id().as_str()).await);

    peer.send_text("hello").await?;
    assert_eq!(peer.recv_json().await?, json!({ "msg": LOGIN_SUCCESS_NOTICE }));

    hub_b.close(&conn).await;
    join(handle).await?;
    assert_eq!(log_b.closes(), 1);
    assert!(hub_b.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn concurrent_closes_fire_on_close_once() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let (conn, mut peer, handle) = spawn_memory_client(&hub);
    wait_registered(&hub, &conn).await?;

    let closers: Vec<_> = (0..8)
        .map(|_| {
            let hub = Arc::clone(&hub);
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { hub.close(&conn).await })
        })
        .collect();
    for closer in closers {
        closer.await?;
    }
    join(handle).await?;

    assert_eq!(log.closes(), 1);
    assert_eq!(close_frames(&peer.drain().await?), 1);
    Ok(())
}

#[tokio::test]
async fn read_error_reports_and_closes() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let (conn, mut peer, handle) = spawn_memory_client(&hub);

    peer.send_error("connection reset").await?;
    join(handle).await?;

    assert_eq!(log.errors(), 1);
    assert_eq!(log.closes(), 1);
    assert!(conn.is_closed());
    assert!(log.events().contains(&"error:TRANSPORT_ERROR".to_owned()));
    assert_eq!(close_frames(&peer.drain().await?), 1);
    Ok(())
}

#[tokio::test]
async fn peer_close_is_not_an_error() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let (conn, peer, handle) = spawn_memory_client(&hub);

    peer.inbound.send(Ok(Message::Close(None))).await?;
    join(handle).await?;

    assert_eq!(log.errors(), 0);
    assert_eq!(log.closes(), 1);
    assert!(conn.is_closed());
    Ok(())
}

#[tokio::test]
async fn idle_timeout_closes_silent_connection() -> anyhow::Result<()> {
    let log = HookLog::new();
    let options = log.attach(
        HubOptions::new()
            .insecure_open_auth(true)
            .with_idle_timeout(Some(Duration::from_millis(50))),
    );
    let hub = Hub::new(&PathClaims::new(), "/", options)?;
    let (conn, _peer, handle) = spawn_memory_client(&hub);

    join(handle).await?;
    assert!(conn.is_closed());
    assert_eq!(log.errors(), 1);
    assert!(hub.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn duplicate_path_leaves_first_hub_working() -> anyhow::Result<()> {
    let claims = PathClaims::new();
    let first = Hub::new(&claims, "/game", HubOptions::new().insecure_open_auth(true))?;
    crate::assert_err_contains!(
        Hub::new(&claims, "/game", HubOptions::new()).map(|_| ()),
        "upgrade path already claimed: /game"
    );
    assert!(Hub::new(&claims, "/chat", HubOptions::new()).is_ok());

    let (_conn, mut peer, _handle) = spawn_memory_client(&first);
    peer.send_text("hi").await?;
    assert_eq!(peer.recv_json().await?, json!({ "msg": LOGIN_SUCCESS_NOTICE }));
    assert_eq!(first.path(), "/game");
    Ok(())
}

#[tokio::test]
async fn push_reaches_connected_only() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let (conn, mut peer, _handle) = spawn_memory_client(&hub);
    wait_registered(&hub, &conn).await?;

    assert!(!hub.push(conn.id().as_str(), "game/tick", json!({ "n": 1 })).await);
    assert!(!hub.push("no-such-connection", "game/tick", json!({})).await);

    peer.send_text("login").await?;
    assert_eq!(peer.recv_json().await?, json!({ "msg": LOGIN_SUCCESS_NOTICE }));

    assert!(hub.push(conn.id().as_str(), "game/tick", json!({ "n": 2 })).await);
    assert_eq!(
        peer.recv_json().await?,
        json!({ "router": "game/tick", "code": 0, "msg": "OK", "data": { "n": 2 } })
    );
    Ok(())
}

#[tokio::test]
async fn close_all_empties_registry() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = open_hub(&log)?;
    let mut clients = Vec::new();
    for _ in 0..3 {
        let client = spawn_memory_client(&hub);
        wait_registered(&hub, &client.0).await?;
        clients.push(client);
    }
    assert_eq!(hub.len().await, 3);
    assert_eq!(log.connects(), 3);

    hub.close_all().await;

    assert!(hub.is_empty().await);
    assert_eq!(log.closes(), 3);
    for (conn, mut peer, handle) in clients {
        join(handle).await?;
        assert!(conn.is_closed());
        assert_eq!(close_frames(&peer.drain().await?), 1);
    }
    Ok(())
}

#[tokio::test]
async fn message_hook_replaces_fallback() -> anyhow::Result<()> {
    let options = HubOptions::new().insecure_open_auth(true).with_message_hook(
        |_hub: Arc<Hub>, conn: Arc<Connection>, frame: Bytes| async move {
            let _ = conn.send_text(format!("got {} bytes", frame.len())).await;
        },
    );
    let hub = Hub::new(&PathClaims::new(), "/", options)?;
    let (conn, mut peer, _handle) = spawn_memory_client(&hub);

    peer.send_text("abc").await?;
    match peer.recv().await? {
        Some(Message::Text(text)) => assert_eq!(text.as_str(), "got 3 bytes"),
        other => anyhow::bail!("unexpected frame {other:?}"),
    }
    assert_eq!(conn.status(), ConnStatus::Authing);
    Ok(())
}
