// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router-keyed dispatch with auth gating, installed as a hub's message hook.
//!
//! While a connection is `Authing`, only the reserved [`AUTH_ROUTER`] is
//! accepted and it goes to the single auth handler; anything else fails the
//! handshake and closes the connection. Once `Connected`, frames fan out to
//! every handler registered for their router key, in registration order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, warn};

use crate::connection::{ConnStatus, Connection};
use crate::envelope::{self, Request};
use crate::error::HubError;
use crate::hub::{HookFuture, Hub, MessageHook};

/// Router key reserved for the authentication step.
pub const AUTH_ROUTER: &str = "user/auth";

/// Failure message for an unknown router key.
pub const UNDEFINED_ROUTER_MSG: &str = "undefined router";
/// Failure message when the handshake cannot be attempted.
pub const AUTH_FAILED_MSG: &str = "auth failed";
/// Failure message for a frame that does not decode.
pub const INVALID_MESSAGE_MSG: &str = "invalid message";

/// Handler for one router key.
///
/// The hub ignores whatever a handler does or doesn't do: an auth handler
/// promotes the connection itself via [`Connection::set_connected`], and any
/// handler may reply, push, or close.
pub trait RouteHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        hub: &'a Arc<Hub>,
        conn: &'a Arc<Connection>,
        req: Request,
    ) -> HookFuture<'a>;
}

impl<F, Fut> RouteHandler for F
where
    F: Fn(Arc<Hub>, Arc<Connection>, Request) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        hub: &'a Arc<Hub>,
        conn: &'a Arc<Connection>,
        req: Request,
    ) -> HookFuture<'a> {
        Box::pin(self(Arc::clone(hub), Arc::clone(conn), req))
    }
}

#[derive(Default)]
pub struct RouteTable {
    auth: Option<Arc<dyn RouteHandler>>,
    routes: HashMap<String, Vec<Arc<dyn RouteHandler>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handler for [`AUTH_ROUTER`], replacing any previous one.
    pub fn register_auth_handler(&mut self, handler: impl RouteHandler + 'static) -> &mut Self {
        if self.auth.replace(Arc::new(handler)).is_some() {
            warn!("auth handler replaced");
        }
        self
    }

    /// Append a handler for `router`. The auth router is rejected.
    pub fn register_route(
        &mut self,
        router: impl Into<String>,
        handler: impl RouteHandler + 'static,
    ) -> Result<&mut Self, HubError> {
        let router = router.into();
        if router == AUTH_ROUTER {
            warn!(router, "refusing to register the auth router as an ordinary route");
            return Err(HubError::ReservedRouter(router));
        }
        self.routes.entry(router).or_default().push(Arc::new(handler));
        Ok(self)
    }

    pub fn has_auth_handler(&self) -> bool {
        self.auth.is_some()
    }

    pub fn handler_count(&self, router: &str) -> usize {
        self.routes.get(router).map_or(0, Vec::len)
    }

    /// Decode one frame and route it according to the connection's status.
    pub async fn dispatch(&self, hub: &Arc<Hub>, conn: &Arc<Connection>, frame: Bytes) {
        let req = match envelope::decode(&frame) {
            Ok(req) => req,
            Err(e) => {
                error!(conn_id = %conn.id(), err = %e, "on message err");
                let _ = conn.failed("", INVALID_MESSAGE_MSG).await;
                if e.is_fatal() {
                    hub.close(conn).await;
                }
                return;
            }
        };

        if conn.status() == ConnStatus::Authing {
            self.dispatch_auth(hub, conn, req).await;
            return;
        }

        match self.routes.get(&req.router) {
            Some(handlers) => {
                for handler in handlers {
                    handler.handle(hub, conn, req.clone()).await;
                }
            }
            None => {
                warn!(conn_id = %conn.id(), router = %req.router, "undefined router, please check");
                let _ = conn.failed(&req.router, UNDEFINED_ROUTER_MSG).await;
            }
        }
    }

    async fn dispatch_auth(&self, hub: &Arc<Hub>, conn: &Arc<Connection>, req: Request) {
        match &self.auth {
            Some(handler) if req.router == AUTH_ROUTER => handler.handle(hub, conn, req).await,
            _ => {
                let err = if self.auth.is_none() {
                    HubError::Auth("auth handler undefined".to_owned())
                } else {
                    HubError::Auth(format!("expected {AUTH_ROUTER}, got {}", req.router))
                };
                error!(conn_id = %conn.id(), err = %err, "websocket handshake rejected");
                let _ = conn.failed(&req.router, AUTH_FAILED_MSG).await;
                hub.close(conn).await;
            }
        }
    }
}

impl MessageHook for RouteTable {
    fn on_message<'a>(
        &'a self,
        hub: &'a Arc<Hub>,
        conn: &'a Arc<Connection>,
        frame: Bytes,
    ) -> HookFuture<'a> {
        Box::pin(self.dispatch(hub, conn, frame))
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
