// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Values exchanged with the identity server.
//!
//! Tokens are opaque strings. Their `Debug` output never contains the raw
//! value: application tokens are fully redacted and principal tokens show a
//! short SHA-256 fingerprint so log lines can still be correlated.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Remote fault code: the application token is unknown or expired.
pub const FAULT_INVALID_AUTHORIZATION_TOKEN: &str = "InvalidAuthorizationTokenException";
/// Remote fault code: the name/credential pair was rejected.
pub const FAULT_INVALID_AUTHENTICATION: &str = "InvalidAuthenticationException";
/// Remote fault code: the principal exists but is disabled.
pub const FAULT_INACTIVE_ACCOUNT: &str = "InactiveAccountException";
/// Remote fault code: the principal's credential has expired.
pub const FAULT_EXPIRED_CREDENTIAL: &str = "ExpiredCredentialException";
/// Remote fault code: no such principal, group or session.
pub const FAULT_OBJECT_NOT_FOUND: &str = "ObjectNotFoundException";
/// Remote fault code: the principal token is unknown.
pub const FAULT_INVALID_TOKEN: &str = "InvalidTokenException";

/// Number of digest bytes shown in a token fingerprint.
const FINGERPRINT_BYTES: usize = 6;

fn fingerprint(value: &str) -> String {
    Sha256::digest(value.as_bytes())
        .iter()
        .take(FINGERPRINT_BYTES)
        .map(|b| format!("{b:02x}"))
        .collect()
}

// =============================================================================
// Tokens
// =============================================================================

/// Token identifying this service to the identity server.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApplicationToken(String);

impl ApplicationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the server handed back an empty or whitespace-only token.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for ApplicationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApplicationToken(***)")
    }
}

/// Session token of an authenticated principal.
///
/// Owned by the caller (typically stored in a cookie); the broker never
/// persists it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PrincipalToken(String);

impl PrincipalToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short hex digest of the token, safe to log.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl std::fmt::Debug for PrincipalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrincipalToken({})", self.fingerprint())
    }
}

// =============================================================================
// Validation Factors
// =============================================================================

/// Factor name carrying the client network address.
pub const FACTOR_REMOTE_ADDRESS: &str = "remote_address";
/// Factor name carrying the client user agent.
pub const FACTOR_USER_AGENT: &str = "User-Agent";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFactor {
    pub name: String,
    pub value: String,
}

/// Ordered set of request attributes bound to a principal session.
///
/// Names are unique; inserting an existing name replaces its value in place
/// so the original order is preserved. The broker forwards factors verbatim
/// and never compares them itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationFactors(Vec<ValidationFactor>);

impl ValidationFactors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ValidationFactors::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|factor| factor.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(ValidationFactor { name, value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|factor| factor.name == name)
            .map(|factor| factor.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationFactor> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Directory Records
// =============================================================================

/// Directory record for a principal. Read-only to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// First value of an attribute, if any.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

// =============================================================================
// Faults & Transport Errors
// =============================================================================

/// Fault reported by the identity server in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl RemoteFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self.code.as_str() {
            FAULT_INVALID_AUTHORIZATION_TOKEN => FaultKind::ApplicationTokenRejected,
            FAULT_INVALID_AUTHENTICATION | FAULT_INACTIVE_ACCOUNT | FAULT_EXPIRED_CREDENTIAL => {
                FaultKind::InvalidCredentials
            }
            FAULT_OBJECT_NOT_FOUND | FAULT_INVALID_TOKEN => FaultKind::NotFound,
            _ => FaultKind::Other,
        }
    }
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

/// Classification of a remote fault code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The application token itself was refused; refresh and retry.
    ApplicationTokenRejected,
    InvalidCredentials,
    NotFound,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("identity server fault {0}")]
    Fault(RemoteFault),

    #[error("identity server unreachable: {0}")]
    Network(String),

    #[error("identity server call timed out after {0:?}")]
    Timeout(Duration),

    #[error("identity server response was invalid: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    pub fn fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError::Fault(RemoteFault::new(code, message))
    }

    /// Fault classification, `None` for failures that never reached the server logic.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            TransportError::Fault(fault) => Some(fault.kind()),
            _ => None,
        }
    }

    pub fn is_application_token_rejection(&self) -> bool {
        self.fault_kind() == Some(FaultKind::ApplicationTokenRejected)
    }

    pub fn remote_fault(&self) -> Option<&RemoteFault> {
        match self {
            TransportError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}
