// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::{routes, USER_INFO_ROUTER};
use crate::auth::{issue_token, JwtVerifier, TokenVerifier};
use crate::config::HubOptions;
use crate::connection::ConnStatus;
use crate::error::HubError;
use crate::hub::Hub;
use crate::registry::PathClaims;
use crate::router::AUTH_ROUTER;
use crate::test_support::{spawn_memory_client, HookLog, RECV_TIMEOUT};

fn fixed_token(token: &str) -> Result<i64, HubError> {
    match token {
        "T" => Ok(42),
        other => Err(HubError::Auth(format!("unknown token {other}"))),
    }
}

fn game_hub(verifier: Arc<dyn TokenVerifier>, log: &HookLog) -> anyhow::Result<Arc<Hub>> {
    let options = log.attach(HubOptions::new().with_message_hook(routes(verifier)?));
    Ok(Hub::new(&PathClaims::new(), "/", options)?)
}

async fn join(handle: tokio::task::JoinHandle<()>) -> anyhow::Result<()> {
    tokio::time::timeout(RECV_TIMEOUT, handle).await??;
    Ok(())
}

#[tokio::test]
async fn good_token_connects_and_info_echoes() -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = game_hub(Arc::new(fixed_token), &log)?;
    let (conn, mut peer, _handle) = spawn_memory_client(&hub);

    peer.send_json(&json!({ "router": AUTH_ROUTER, "params": { "token": "T" } })).await?;
    assert_eq!(
        peer.recv_json().await?,
        json!({ "router": AUTH_ROUTER, "code": 0, "msg": "OK", "data": { "uid": 42 } })
    );
    assert_eq!(conn.status(), ConnStatus::Connected);
    assert_eq!(conn.uid(), Some(42));

    peer.send_json(&json!({ "router": USER_INFO_ROUTER, "params": { "x": 1 } })).await?;
    assert_eq!(
        peer.recv_json().await?,
        json!({
            "router": USER_INFO_ROUTER,
            "code": 0,
            "msg": "OK",
            "data": { "router": USER_INFO_ROUTER, "params": { "x": 1 } }
        })
    );
    Ok(())
}

async fn assert_rejected(params: serde_json::Value, msg: &str) -> anyhow::Result<()> {
    let log = HookLog::new();
    let hub = game_hub(Arc::new(fixed_token), &log)?;
    let (conn, mut peer, handle) = spawn_memory_client(&hub);

    peer.send_json(&json!({ "router": AUTH_ROUTER, "params": params })).await?;
    assert_eq!(
        peer.recv_json().await?,
        json!({ "router": AUTH_ROUTER, "code": -1, "msg": msg, "data": {} })
    );
    join(handle).await?;

    assert!(conn.is_closed());
    assert_eq!(conn.uid(), None);
    assert_eq!(log.closes(), 1);
    assert!(hub.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn incorrect_token_closes() -> anyhow::Result<()> {
    assert_rejected(json!({ "token": "bad" }), "incorrect token").await
}

#[tokio::test]
async fn missing_token_closes() -> anyhow::Result<()> {
    assert_rejected(json!({}), "parse token failed").await
}

#[tokio::test]
async fn non_string_token_closes() -> anyhow::Result<()> {
    assert_rejected(json!({ "token": 12 }), "parse token failed").await
}

#[tokio::test]
async fn info_before_auth_is_refused() -> anyhow::Result<()> {
    let hub = game_hub(Arc::new(fixed_token), &HookLog::new())?;
    let (conn, mut peer, handle) = spawn_memory_client(&hub);

    peer.send_json(&json!({ "router": USER_INFO_ROUTER, "params": {} })).await?;
    assert_eq!(peer.recv_json().await?["msg"], "auth failed");
    join(handle).await?;
    assert!(conn.is_closed());
    Ok(())
}

#[tokio::test]
async fn jwt_round_trip_through_hub() -> anyhow::Result<()> {
    let secret = b"hub-secret";
    let hub = game_hub(Arc::new(JwtVerifier::new(secret)), &HookLog::new())?;
    let (conn, mut peer, _handle) = spawn_memory_client(&hub);

    let token = issue_token(secret, 77, Duration::from_secs(3600))?;
    peer.send_json(&json!({ "router": AUTH_ROUTER, "params": { "token": token } })).await?;
    assert_eq!(peer.recv_json().await?["data"]["uid"], 77);
    assert_eq!(conn.uid(), Some(77));
    Ok(())
}
