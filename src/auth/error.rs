// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! A rejected application token never appears here: the broker absorbs it
//! by refreshing once, and a second rejection is reported as
//! [`AuthError::UpstreamUnavailable`].

use crate::transport::TransportError;

/// Coarse classification of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// User-facing credential rejection. Never retried.
    InvalidCredentials,
    /// Identity server unreachable, timed out, or faulting.
    UpstreamUnavailable,
    /// No such principal or session.
    NotFound,
    /// Principal authenticated but is not allowed to log in here.
    Forbidden,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Identity server unavailable: {message}")]
    UpstreamUnavailable {
        /// Remote fault code, when the server produced one.
        code: Option<String>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Principal {principal} is not a member of required group {group}")]
    Forbidden { principal: String, group: String },
}

impl AuthError {
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthError::InvalidCredentials => AuthKind::InvalidCredentials,
            AuthError::UpstreamUnavailable { .. } => AuthKind::UpstreamUnavailable,
            AuthError::NotFound(_) => AuthKind::NotFound,
            AuthError::Forbidden { .. } => AuthKind::Forbidden,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::UpstreamUnavailable { .. } => "upstream_unavailable",
            AuthError::NotFound(_) => "not_found",
            AuthError::Forbidden { .. } => "forbidden",
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        AuthError::UpstreamUnavailable {
            code: None,
            message: message.into(),
        }
    }
}

impl From<TransportError> for AuthError {
    /// Any transport failure not handled explicitly by the caller.
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Fault(fault) => AuthError::UpstreamUnavailable {
                message: fault.to_string(),
                code: Some(fault.code),
            },
            other => AuthError::upstream(other.to_string()),
        }
    }
}
