// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gamehub: authenticated WebSocket connection hub for the game backend.

pub mod auth;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod game;
pub mod hub;
pub mod registry;
pub mod router;
pub mod test_support;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::hub::Hub;
use crate::registry::PathClaims;

/// Run the hub server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let claims = PathClaims::new();

    let mut options = config
        .hub_options()
        .with_on_connect(|conn| tracing::debug!(conn_id = %conn.id(), "on connect"))
        .with_on_close(|conn| {
            tracing::debug!(conn_id = %conn.id(), uid = ?conn.uid(), "on close");
        })
        .with_on_error(|conn, err| {
            tracing::warn!(conn_id = %conn.id(), err = %err, "connection error");
        });

    match config.ws_secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => {
            if config.insecure_open_auth {
                tracing::warn!("--insecure-open-auth ignored: a secret is configured");
            }
            let verifier = Arc::new(JwtVerifier::new(secret.as_bytes()));
            options = options.with_message_hook(game::routes(verifier)?);
        }
        None => tracing::warn!("no --ws-secret configured, serving in open-auth mode"),
    }

    let hub = Hub::new(&claims, config.path.clone(), options)?;
    let router = hub.router().layer(TraceLayer::new_for_http());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("gamehub listening on {addr}{}", config.path);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    hub.close_all().await;
    Ok(())
}
