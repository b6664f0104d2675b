// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Principal-facing identity server operations.
//!
//! ## Retry State Machine
//!
//! Every operation runs through [`PrincipalSessionBroker::call`]:
//!
//! ```text
//! BEGIN -> CALL(current token) -> SUCCESS | REMOTE_FAULT | TOKEN_REJECTED
//! TOKEN_REJECTED -> REFRESH -> CALL(final) -> SUCCESS | FAILURE
//! ```
//!
//! Only a rejected application token triggers the retry. Any other fault is
//! a credential or server problem and is surfaced immediately. A second
//! rejection right after a refresh means the application itself is
//! misconfigured, so it is reported as upstream unavailability.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::app_token::ApplicationTokenManager;
use super::error::AuthError;
use crate::transport::types::FAULT_INVALID_AUTHORIZATION_TOKEN;
use crate::transport::{
    with_timeout, ApplicationToken, FaultKind, IdentityTransport, Principal, PrincipalToken,
    TransportError, ValidationFactors,
};

/// Failure of a brokered call, before per-operation mapping.
#[derive(Debug)]
enum CallError {
    /// Already an auth error (token acquisition failed, or retry exhausted).
    Auth(AuthError),
    /// Transport failure on the final attempt.
    Transport(TransportError),
}

impl CallError {
    fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            CallError::Transport(err) => err.fault_kind(),
            CallError::Auth(_) => None,
        }
    }
}

impl From<CallError> for AuthError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Auth(err) => err,
            CallError::Transport(err) => err.into(),
        }
    }
}

pub struct PrincipalSessionBroker {
    transport: Arc<dyn IdentityTransport>,
    tokens: Arc<ApplicationTokenManager>,
    call_timeout: Duration,
}

impl PrincipalSessionBroker {
    pub fn new(
        transport: Arc<dyn IdentityTransport>,
        tokens: Arc<ApplicationTokenManager>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            tokens,
            call_timeout,
        }
    }

    /// Run `op` with the current application token, refreshing and retrying once on rejection.
    async fn call<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, CallError>
    where
        F: Fn(ApplicationToken) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let token = self.tokens.token().await.map_err(application_failure)?;

        let err = match with_timeout(self.call_timeout, op(token.clone())).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_application_token_rejection() => err,
            Err(err) => {
                log_failure(operation, &err);
                return Err(CallError::Transport(err));
            }
        };

        info!(operation, error = %err, "Application token rejected, refreshing");
        let fresh = self.tokens.refresh(&token).await.map_err(application_failure)?;

        match with_timeout(self.call_timeout, op(fresh)).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_application_token_rejection() => {
                error!(
                    operation,
                    application = %self.tokens.application_name(),
                    error = %err,
                    "Application token rejected again after refresh"
                );
                Err(CallError::Auth(AuthError::UpstreamUnavailable {
                    code: Some(FAULT_INVALID_AUTHORIZATION_TOKEN.to_string()),
                    message: "application token rejected after refresh".to_string(),
                }))
            }
            Err(err) => {
                log_failure(operation, &err);
                Err(CallError::Transport(err))
            }
        }
    }

    /// Authenticate a principal and open a session for it.
    pub async fn authenticate_principal(
        &self,
        name: &str,
        credential: &str,
        factors: &ValidationFactors,
    ) -> Result<PrincipalToken, AuthError> {
        let transport = self.transport.as_ref();
        let result = self
            .call("authenticatePrincipal", |app| async move {
                transport
                    .authenticate_principal(&app, name, credential, factors)
                    .await
            })
            .await;

        match result {
            Ok(token) if token.is_blank() => Err(AuthError::upstream(
                "identity server returned an empty principal token",
            )),
            Ok(token) => {
                debug!(principal = %name, session = %token.fingerprint(), "Principal authenticated");
                Ok(token)
            }
            Err(err) if err.fault_kind() == Some(FaultKind::InvalidCredentials) => {
                Err(AuthError::InvalidCredentials)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Check a principal token against the server. `false` is a normal answer, not an error.
    pub async fn is_valid_principal_token(
        &self,
        token: &PrincipalToken,
        factors: &ValidationFactors,
    ) -> Result<bool, AuthError> {
        let transport = self.transport.as_ref();
        let result = self
            .call("isValidPrincipalToken", |app| async move {
                transport.is_valid_principal_token(&app, token, factors).await
            })
            .await;

        match result {
            Ok(valid) => Ok(valid),
            Err(err) if err.fault_kind() == Some(FaultKind::NotFound) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// End a principal session. Invalidating an unknown token is not an error.
    pub async fn invalidate_principal_token(&self, token: &PrincipalToken) -> Result<(), AuthError> {
        let transport = self.transport.as_ref();
        let result = self
            .call("invalidatePrincipalToken", |app| async move {
                transport.invalidate_principal_token(&app, token).await
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.fault_kind() == Some(FaultKind::NotFound) => {
                warn!(
                    session = %token.fingerprint(),
                    "Principal token already invalid, nothing to invalidate"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_principal_by_token(&self, token: &PrincipalToken) -> Result<Principal, AuthError> {
        let transport = self.transport.as_ref();
        let result = self
            .call("findPrincipalByToken", |app| async move {
                transport.find_principal_by_token(&app, token).await
            })
            .await;

        match result {
            Ok(principal) => Ok(principal),
            Err(err) if err.fault_kind() == Some(FaultKind::NotFound) => Err(AuthError::NotFound(
                format!("no principal for session {}", token.fingerprint()),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Group names the principal belongs to. Empty for a principal without groups.
    pub async fn find_group_memberships(
        &self,
        principal_name: &str,
    ) -> Result<BTreeSet<String>, AuthError> {
        let transport = self.transport.as_ref();
        let result = self
            .call("findGroupMemberships", |app| async move {
                transport.find_group_memberships(&app, principal_name).await
            })
            .await;

        match result {
            Ok(groups) => Ok(groups),
            Err(err) if err.fault_kind() == Some(FaultKind::NotFound) => Err(AuthError::NotFound(
                format!("principal {principal_name}"),
            )),
            Err(err) => Err(err.into()),
        }
    }
}

/// Failure to obtain an application token is never the principal's fault.
fn application_failure(err: AuthError) -> CallError {
    match err {
        AuthError::InvalidCredentials => CallError::Auth(AuthError::upstream(
            "identity server issued no application token",
        )),
        other => CallError::Auth(other),
    }
}

fn log_failure(operation: &'static str, err: &TransportError) {
    match err.remote_fault() {
        Some(fault) => warn!(
            operation,
            fault_code = %fault.code,
            fault_message = %fault.message,
            "Identity server fault"
        ),
        None => warn!(operation, error = %err, "Identity server call failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::transport::types::FACTOR_REMOTE_ADDRESS;
    use crate::transport::InMemoryIdentityServer;

    fn server() -> Arc<InMemoryIdentityServer> {
        Arc::new(
            InMemoryIdentityServer::new()
                .with_application("svc", "s3cr3t")
                .with_principal("alice", "pw1")
                .with_principal("bob", "pw2")
                .with_group_membership("alice", "staff")
                .with_group_membership("alice", "wiki-users")
                .with_attribute("alice", "mail", &["alice@example.com"]),
        )
    }

    fn broker_with(server: &Arc<InMemoryIdentityServer>, config: BrokerConfig) -> PrincipalSessionBroker {
        let tokens = Arc::new(ApplicationTokenManager::new(server.clone(), &config));
        PrincipalSessionBroker::new(server.clone(), tokens, config.call_timeout)
    }

    fn broker(server: &Arc<InMemoryIdentityServer>) -> PrincipalSessionBroker {
        broker_with(
            server,
            BrokerConfig::new("https://id.example", "svc", "s3cr3t").unwrap(),
        )
    }

    fn ctx() -> ValidationFactors {
        ValidationFactors::new().with(FACTOR_REMOTE_ADDRESS, "10.0.0.1")
    }

    #[tokio::test]
    async fn first_call_acquires_application_token_lazily() {
        let server = server();
        let broker = broker(&server);
        assert_eq!(server.application_auth_count(), 0);

        let token = broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();
        assert_eq!(token.as_str(), "T1");
        assert_eq!(server.application_auth_count(), 1);
    }

    #[tokio::test]
    async fn rejected_credentials_do_not_refresh() {
        let server = server();
        let broker = broker(&server);

        let err = broker
            .authenticate_principal("alice", "wrong", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(server.application_auth_count(), 1);
        assert_eq!(server.principal_auth_count(), 1);
    }

    #[tokio::test]
    async fn single_rejection_refreshes_and_retries_once() {
        let server = server();
        let broker = broker(&server);
        broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        server.expire_application_tokens();
        let token = broker.authenticate_principal("bob", "pw2", &ctx()).await.unwrap();

        assert_eq!(token.as_str(), "T2");
        assert_eq!(server.application_auth_count(), 2);
        assert_eq!(server.principal_auth_count(), 3);
    }

    #[tokio::test]
    async fn repeated_rejection_is_upstream_unavailable() {
        let server = server();
        let broker = broker(&server);
        server.set_reject_application_tokens(true);

        let err = broker
            .authenticate_principal("alice", "pw1", &ctx())
            .await
            .unwrap_err();
        match err {
            AuthError::UpstreamUnavailable { code, .. } => {
                assert_eq!(code.as_deref(), Some(FAULT_INVALID_AUTHORIZATION_TOKEN));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(server.application_auth_count(), 2);
        assert_eq!(server.principal_auth_count(), 2);
    }

    #[tokio::test]
    async fn refresh_applies_to_every_principal_operation() {
        let server = server();
        let broker = broker(&server);
        let token = broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        server.expire_application_tokens();
        assert!(broker.is_valid_principal_token(&token, &ctx()).await.unwrap());
        server.expire_application_tokens();
        let groups = broker.find_group_memberships("alice").await.unwrap();
        assert!(groups.contains("staff"));
        assert_eq!(server.application_auth_count(), 3);
    }

    #[tokio::test]
    async fn invalidated_token_is_not_valid() {
        let server = server();
        let broker = broker(&server);
        let token = broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        broker.invalidate_principal_token(&token).await.unwrap();
        assert!(!broker.is_valid_principal_token(&token, &ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn double_invalidate_is_not_fatal() {
        let server = server();
        let broker = broker(&server);
        let token = broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        broker.invalidate_principal_token(&token).await.unwrap();
        broker.invalidate_principal_token(&token).await.unwrap();
        assert_eq!(server.invalidation_count(), 2);
        assert_eq!(server.active_session_count(), 0);
    }

    #[tokio::test]
    async fn factors_are_forwarded_verbatim() {
        let server = server();
        let broker = broker(&server);
        let token = broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        let moved = ValidationFactors::new().with(FACTOR_REMOTE_ADDRESS, "192.168.1.9");
        assert!(!broker.is_valid_principal_token(&token, &moved).await.unwrap());
    }

    #[tokio::test]
    async fn principal_lookup_by_token() {
        let server = server();
        let broker = broker(&server);
        let token = broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        let principal = broker.find_principal_by_token(&token).await.unwrap();
        assert_eq!(principal.name, "alice");
        assert_eq!(principal.attribute("mail"), Some("alice@example.com"));

        let err = broker
            .find_principal_by_token(&PrincipalToken::new("T99"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn group_lookup_distinguishes_unknown_from_empty() {
        let server = server();
        let broker = broker(&server);

        assert!(broker.find_group_memberships("bob").await.unwrap().is_empty());
        let err = broker.find_group_memberships("mallory").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_upstream_unavailable() {
        let server = server();
        let broker = broker(&server);
        broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        server.set_unavailable(true);
        let err = broker
            .is_valid_principal_token(&PrincipalToken::new("T1"), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { .. }));
        assert_eq!(server.application_auth_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_principal_call_times_out_without_refresh() {
        let server = server();
        let config = BrokerConfig::new("https://id.example", "svc", "s3cr3t")
            .unwrap()
            .with_call_timeout(Duration::from_secs(1));
        let broker = broker_with(&server, config);
        broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        server.set_latency(Duration::from_secs(60));
        let err = broker
            .authenticate_principal("alice", "pw1", &ctx())
            .await
            .unwrap_err();
        match err {
            AuthError::UpstreamUnavailable { code: None, message } => {
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(server.application_auth_count(), 1);
    }

    /// Issues one real application token, then only blank answers.
    struct BlankAfterFirstToken {
        server: Arc<InMemoryIdentityServer>,
        issued: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl IdentityTransport for BlankAfterFirstToken {
        async fn authenticate_application(
            &self,
            name: &str,
            credential: &str,
        ) -> Result<Option<ApplicationToken>, TransportError> {
            if self.issued.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Ok(Some(ApplicationToken::new("")));
            }
            self.server.authenticate_application(name, credential).await
        }

        async fn authenticate_principal(
            &self,
            app: &ApplicationToken,
            name: &str,
            credential: &str,
            factors: &ValidationFactors,
        ) -> Result<PrincipalToken, TransportError> {
            self.server.authenticate_principal(app, name, credential, factors).await
        }

        async fn is_valid_principal_token(
            &self,
            app: &ApplicationToken,
            token: &PrincipalToken,
            factors: &ValidationFactors,
        ) -> Result<bool, TransportError> {
            self.server.is_valid_principal_token(app, token, factors).await
        }

        async fn invalidate_principal_token(
            &self,
            app: &ApplicationToken,
            token: &PrincipalToken,
        ) -> Result<(), TransportError> {
            self.server.invalidate_principal_token(app, token).await
        }

        async fn find_principal_by_token(
            &self,
            app: &ApplicationToken,
            token: &PrincipalToken,
        ) -> Result<Principal, TransportError> {
            self.server.find_principal_by_token(app, token).await
        }

        async fn find_group_memberships(
            &self,
            app: &ApplicationToken,
            principal_name: &str,
        ) -> Result<BTreeSet<String>, TransportError> {
            self.server.find_group_memberships(app, principal_name).await
        }
    }

    #[tokio::test]
    async fn blank_application_token_is_not_a_principal_credential_error() {
        let server = server();
        let transport = Arc::new(BlankAfterFirstToken {
            server: server.clone(),
            issued: std::sync::atomic::AtomicBool::new(true),
        });
        let config = BrokerConfig::new("https://id.example", "svc", "s3cr3t").unwrap();
        let tokens = Arc::new(ApplicationTokenManager::new(transport.clone(), &config));
        let broker = PrincipalSessionBroker::new(transport, tokens, config.call_timeout);

        let err = broker
            .authenticate_principal("alice", "pw1", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { code: None, .. }));
        assert_eq!(server.principal_auth_count(), 0);
    }

    #[tokio::test]
    async fn blank_token_on_refresh_is_upstream_unavailable() {
        let server = server();
        let transport = Arc::new(BlankAfterFirstToken {
            server: server.clone(),
            issued: std::sync::atomic::AtomicBool::new(false),
        });
        let config = BrokerConfig::new("https://id.example", "svc", "s3cr3t").unwrap();
        let tokens = Arc::new(ApplicationTokenManager::new(transport.clone(), &config));
        let broker = PrincipalSessionBroker::new(transport, tokens, config.call_timeout);
        broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();

        server.expire_application_tokens();
        let err = broker
            .authenticate_principal("alice", "pw1", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { code: None, .. }));
        assert_eq!(server.principal_auth_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rejections_refresh_once() {
        let server = Arc::new(
            InMemoryIdentityServer::new()
                .with_application("svc", "s3cr3t")
                .with_principal("alice", "pw1")
                .with_latency(Duration::from_millis(20)),
        );
        let broker = Arc::new(broker(&server));
        broker.authenticate_principal("alice", "pw1", &ctx()).await.unwrap();
        assert_eq!(server.application_auth_count(), 1);

        server.expire_application_tokens();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let broker = broker.clone();
            tasks.spawn(async move { broker.authenticate_principal("alice", "pw1", &ctx()).await });
        }
        while let Some(joined) = tasks.join_next().await {
            assert!(joined.unwrap().is_ok());
        }
        assert_eq!(server.application_auth_count(), 2);
    }
}
