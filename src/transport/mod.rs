// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Server Transport
//!
//! The broker talks to the remote identity server only through
//! [`IdentityTransport`]. Each call is atomic and reports a remote fault
//! (code + message) distinctly from a valid negative result: an invalid
//! principal token is `Ok(false)`, never a fault.
//!
//! ## Implementations
//!
//! - [`HttpIdentityTransport`] - JSON-over-HTTP binding (`reqwest`)
//! - [`InMemoryIdentityServer`] - in-process server for tests and local runs

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

pub mod http;
pub mod memory;
pub mod types;

pub use http::HttpIdentityTransport;
pub use memory::InMemoryIdentityServer;
pub use types::{
    ApplicationToken, FaultKind, Principal, PrincipalToken, RemoteFault, TransportError,
    ValidationFactor, ValidationFactors,
};

/// RPC surface of the remote identity server.
///
/// Every principal-facing method takes the current application token; the
/// server answers `InvalidAuthorizationTokenException` when that token is no
/// longer trusted.
#[async_trait]
pub trait IdentityTransport: Send + Sync {
    /// Authenticate this service. `Ok(None)` means the server answered without a token.
    async fn authenticate_application(
        &self,
        application_name: &str,
        credential: &str,
    ) -> Result<Option<ApplicationToken>, TransportError>;

    async fn authenticate_principal(
        &self,
        application: &ApplicationToken,
        name: &str,
        credential: &str,
        factors: &ValidationFactors,
    ) -> Result<PrincipalToken, TransportError>;

    async fn is_valid_principal_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
        factors: &ValidationFactors,
    ) -> Result<bool, TransportError>;

    async fn invalidate_principal_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
    ) -> Result<(), TransportError>;

    async fn find_principal_by_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
    ) -> Result<Principal, TransportError>;

    async fn find_group_memberships(
        &self,
        application: &ApplicationToken,
        principal_name: &str,
    ) -> Result<BTreeSet<String>, TransportError>;
}

/// Run a transport call with an upper bound on its duration.
///
/// Dropping the inner future on expiry cancels the in-flight call.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(limit)),
    }
}
