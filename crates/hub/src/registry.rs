// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry and the coordinator of claimed upgrade paths.
//!
//! A connection is present in the registry iff its status is `Authing` or
//! `Connected`. Insert and remove both run under the write lock together
//! with the status change and the caller's hook, so no reader ever sees a
//! half-registered or half-removed connection. Hooks run inside that
//! critical section and must not touch the registry again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;

use crate::connection::{ConnId, ConnStatus, Connection};
use crate::error::HubError;

/// Live connections of one hub, keyed by identity.
///
/// Backed by tokio's fair `RwLock`: queued writers are served before later
/// readers, so lookups never starve connect/close events.
#[derive(Default)]
pub struct Registry {
    conns: RwLock<HashMap<ConnId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        self.insert_with(conn, |_| {}).await
    }

    /// Register a connection and move it to `Authing`, running `on_insert`
    /// before the write lock is released.
    pub async fn insert_with(
        &self,
        conn: Arc<Connection>,
        on_insert: impl FnOnce(&Arc<Connection>),
    ) -> Result<(), HubError> {
        let mut conns = self.conns.write().await;
        conn.transition(ConnStatus::Authing)?;
        conns.insert(conn.id().clone(), Arc::clone(&conn));
        on_insert(&conn);
        Ok(())
    }

    pub async fn remove(&self, conn: &Arc<Connection>) -> bool {
        self.remove_with(conn, |_| {}).await
    }

    /// Mark a connection `Closed` and drop it from the registry, running
    /// `on_remove` first. Returns `false` (and skips the hook) when this
    /// registry does not hold the connection, including when it was already
    /// closed.
    pub async fn remove_with(
        &self,
        conn: &Arc<Connection>,
        on_remove: impl FnOnce(&Arc<Connection>),
    ) -> bool {
        let mut conns = self.conns.write().await;
        let member = conns.get(conn.id()).is_some_and(|held| Arc::ptr_eq(held, conn));
        if !member {
            return false;
        }
        if conn.is_closed() {
            conns.remove(conn.id());
            return false;
        }
        on_remove(conn);
        if let Err(e) = conn.transition(ConnStatus::Closed) {
            tracing::warn!(conn_id = %conn.id(), err = %e, "close transition rejected");
        }
        conns.remove(conn.id());
        true
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.conns.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.conns.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conns.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<ConnId> {
        self.conns.read().await.keys().cloned().collect()
    }
}

/// Upgrade paths claimed by hubs in this process.
///
/// Owned by whoever builds the hubs and passed to [`crate::hub::Hub::new`];
/// claiming is an atomic check-and-insert.
#[derive(Debug, Default)]
pub struct PathClaims {
    claimed: Mutex<HashSet<String>>,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, path: &str) -> Result<(), HubError> {
        if self.claimed.lock().insert(path.to_owned()) {
            Ok(())
        } else {
            Err(HubError::DuplicatePath(path.to_owned()))
        }
    }

    pub fn is_claimed(&self, path: &str) -> bool {
        self.claimed.lock().contains(path)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
