// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Websocket routes of the game module.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};

use crate::auth::TokenVerifier;
use crate::connection::Connection;
use crate::envelope::Request;
use crate::error::HubError;
use crate::hub::{HookFuture, Hub};
use crate::router::{RouteHandler, RouteTable};

pub const USER_INFO_ROUTER: &str = "user/info";

/// `user/auth`: verify the `token` param and promote the connection.
pub struct UserAuth {
    verifier: Arc<dyn TokenVerifier>,
}

impl UserAuth {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }

    async fn authenticate(&self, hub: &Arc<Hub>, conn: &Arc<Connection>, req: Request) {
        let token = match req.get_str("token") {
            Ok(token) => token,
            Err(e) => {
                error!(conn_id = %conn.id(), err = %e, "user auth failed, parse token failed");
                let _ = conn.failed(&req.router, "parse token failed").await;
                hub.close(conn).await;
                return;
            }
        };
        let uid = match self.verifier.verify(token) {
            Ok(uid) => uid,
            Err(e) => {
                error!(conn_id = %conn.id(), err = %e, "user auth failed, token is incorrect");
                let _ = conn.failed(&req.router, "incorrect token").await;
                hub.close(conn).await;
                return;
            }
        };

        conn.update_session(|s| s.uid = Some(uid));
        if let Err(e) = conn.set_connected() {
            error!(conn_id = %conn.id(), err = %e, "user auth succeeded on a dead connection");
            return;
        }
        info!(conn_id = %conn.id(), uid, "connection auth success");
        let _ = conn.ok(&req.router, json!({ "uid": uid })).await;
    }
}

impl RouteHandler for UserAuth {
    fn handle<'a>(
        &'a self,
        hub: &'a Arc<Hub>,
        conn: &'a Arc<Connection>,
        req: Request,
    ) -> HookFuture<'a> {
        Box::pin(self.authenticate(hub, conn, req))
    }
}

/// `user/info`: echo the request back.
pub async fn user_info(_hub: Arc<Hub>, conn: Arc<Connection>, req: Request) {
    let _ = conn.ok(&req.router, req.to_value()).await;
}

/// Route table with the game module's handlers registered.
pub fn routes(verifier: Arc<dyn TokenVerifier>) -> Result<RouteTable, HubError> {
    let mut table = RouteTable::new();
    table.register_auth_handler(UserAuth::new(verifier));
    table.register_route(USER_INFO_ROUTER, user_info)?;
    Ok(table)
}

#[cfg(test)]
#[path = "game_tests.rs"]
mod tests;
