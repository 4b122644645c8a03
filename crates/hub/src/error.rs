// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use crate::connection::ConnStatus;

/// Errors raised by the hub, its connections and the router table.
///
/// Every variant maps to a stable machine-readable code via [`HubError::as_str`].
/// Clients never see these directly: anything observable on the wire arrives
/// as a failure envelope (`code = -1`) with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Inbound frame is not a valid request envelope.
    Decode(String),
    /// Auth handler missing, wrong router while authing, or rejected credentials.
    Auth(String),
    /// No handler registered for the router key of a connected client.
    UndefinedRouter(String),
    /// Read or write failure on the underlying socket.
    Transport(String),
    /// A second hub tried to claim an upgrade path that is already taken.
    DuplicatePath(String),
    /// The reserved auth router cannot be registered as an ordinary route.
    ReservedRouter(String),
    /// Connection status would move backwards or skip a state.
    InvalidTransition { from: ConnStatus, to: ConnStatus },
    /// Request parameter absent or of the wrong type.
    MissingParam(String),
}

impl HubError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DECODE_ERROR",
            Self::Auth(_) => "AUTH_FAILED",
            Self::UndefinedRouter(_) => "UNDEFINED_ROUTER",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::DuplicatePath(_) => "DUPLICATE_PATH",
            Self::ReservedRouter(_) => "RESERVED_ROUTER",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::MissingParam(_) => "MISSING_PARAM",
        }
    }

    /// Whether this error ends the connection it was raised on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Auth(_) | Self::Transport(_))
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(detail) => write!(f, "malformed frame: {detail}"),
            Self::Auth(detail) => write!(f, "auth failed: {detail}"),
            Self::UndefinedRouter(router) => write!(f, "undefined router: {router}"),
            Self::Transport(detail) => write!(f, "transport error: {detail}"),
            Self::DuplicatePath(path) => write!(f, "upgrade path already claimed: {path}"),
            Self::ReservedRouter(router) => {
                write!(f, "router {router} is reserved for authentication")
            }
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid status transition {from} -> {to}")
            }
            Self::MissingParam(key) => write!(f, "missing or invalid param: {key}"),
        }
    }
}

impl std::error::Error for HubError {}

impl From<axum::Error> for HubError {
    fn from(err: axum::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
