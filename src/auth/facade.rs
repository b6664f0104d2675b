// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single entry point for login handlers and session middleware.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

use super::app_token::ApplicationTokenManager;
use super::broker::PrincipalSessionBroker;
use super::error::AuthError;
use super::roles::{AccessPolicy, Role};
use crate::config::BrokerConfig;
use crate::transport::{IdentityTransport, Principal, PrincipalToken, ValidationFactors};

/// A validated session resolved to its principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub principal: Principal,
    pub groups: BTreeSet<String>,
    pub role: Role,
}

pub struct AuthenticationFacade {
    tokens: Arc<ApplicationTokenManager>,
    broker: PrincipalSessionBroker,
    access: AccessPolicy,
}

impl AuthenticationFacade {
    pub fn new(transport: Arc<dyn IdentityTransport>, config: &BrokerConfig) -> Self {
        let tokens = Arc::new(ApplicationTokenManager::new(transport.clone(), config));
        let broker = PrincipalSessionBroker::new(transport, tokens.clone(), config.call_timeout);
        Self {
            tokens,
            broker,
            access: config.access.clone(),
        }
    }

    pub fn tokens(&self) -> &ApplicationTokenManager {
        &self.tokens
    }

    /// Authenticate a principal and return its session token.
    ///
    /// When a required group is configured, the principal must belong to it;
    /// otherwise the fresh session is invalidated and `Forbidden` returned.
    pub async fn login(
        &self,
        name: &str,
        credential: &str,
        context: &ValidationFactors,
    ) -> Result<PrincipalToken, AuthError> {
        let name = normalize_principal_name(name);
        if name.is_empty() || credential.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let token = self
            .broker
            .authenticate_principal(&name, credential, context)
            .await?;

        if let Some(group) = &self.access.required_group {
            let groups = match self.broker.find_group_memberships(&name).await {
                Ok(groups) => groups,
                Err(err) => {
                    warn!(principal = %name, error = %err, "Login aborted: group lookup failed");
                    self.discard_session(&name, &token).await;
                    return Err(err);
                }
            };
            if !self.access.admits(&groups) {
                warn!(principal = %name, group = %group, "Login refused: not in required group");
                self.discard_session(&name, &token).await;
                return Err(AuthError::Forbidden {
                    principal: name,
                    group: group.clone(),
                });
            }
        }

        info!(principal = %name, session = %token.fingerprint(), "Login succeeded");
        Ok(token)
    }

    /// Best-effort invalidation of a session that login will not hand out.
    async fn discard_session(&self, principal: &str, token: &PrincipalToken) {
        if let Err(err) = self.broker.invalidate_principal_token(token).await {
            warn!(principal = %principal, error = %err, "Failed to invalidate refused session");
        }
    }

    pub async fn logout(&self, token: &PrincipalToken) -> Result<(), AuthError> {
        self.broker.invalidate_principal_token(token).await?;
        info!(session = %token.fingerprint(), "Logout");
        Ok(())
    }

    pub async fn check_session(
        &self,
        token: &PrincipalToken,
        context: &ValidationFactors,
    ) -> Result<bool, AuthError> {
        if token.is_blank() {
            return Ok(false);
        }
        self.broker.is_valid_principal_token(token, context).await
    }

    pub async fn lookup_principal(&self, token: &PrincipalToken) -> Result<Principal, AuthError> {
        self.broker.find_principal_by_token(token).await
    }

    pub async fn lookup_groups(&self, principal_name: &str) -> Result<BTreeSet<String>, AuthError> {
        self.broker
            .find_group_memberships(&normalize_principal_name(principal_name))
            .await
    }

    /// Validate a session and resolve principal, groups and role. `None` for an invalid session.
    pub async fn resolve_session(
        &self,
        token: &PrincipalToken,
        context: &ValidationFactors,
    ) -> Result<Option<SessionIdentity>, AuthError> {
        if !self.check_session(token, context).await? {
            return Ok(None);
        }
        let principal = self.lookup_principal(token).await?;
        let groups = self.broker.find_group_memberships(&principal.name).await?;
        let role = self.access.role_for(&groups);

        Ok(Some(SessionIdentity {
            principal,
            groups,
            role,
        }))
    }

    /// Acquire the application token now instead of on first use.
    pub async fn warm_up(&self) -> Result<(), AuthError> {
        self.tokens.token().await.map(|_| ())
    }
}

/// NFC-normalize and trim a principal name as typed into a login form.
fn normalize_principal_name(name: &str) -> String {
    name.trim().nfc().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::types::{FACTOR_REMOTE_ADDRESS, FACTOR_USER_AGENT};
    use crate::transport::{ApplicationToken, InMemoryIdentityServer, TransportError};

    fn server() -> Arc<InMemoryIdentityServer> {
        Arc::new(
            InMemoryIdentityServer::new()
                .with_application("svc", "s3cr3t")
                .with_principal("alice", "pw1")
                .with_principal("bob", "pw2")
                .with_principal("ren\u{e9}", "pw3")
                .with_group_membership("alice", "wiki-users")
                .with_group_membership("alice", "wiki-admins"),
        )
    }

    fn config() -> BrokerConfig {
        BrokerConfig::new("https://id.example", "svc", "s3cr3t").unwrap()
    }

    fn facade(server: &Arc<InMemoryIdentityServer>, config: BrokerConfig) -> AuthenticationFacade {
        AuthenticationFacade::new(server.clone(), &config)
    }

    fn ctx() -> ValidationFactors {
        ValidationFactors::new()
            .with(FACTOR_REMOTE_ADDRESS, "10.0.0.1")
            .with(FACTOR_USER_AGENT, "Mozilla/5.0")
    }

    #[tokio::test]
    async fn login_check_logout_scenario() {
        let server = server();
        let facade = facade(&server, config());

        let token = facade.login("alice", "pw1", &ctx()).await.unwrap();
        assert_eq!(token.as_str(), "T1");
        assert!(facade.check_session(&token, &ctx()).await.unwrap());

        facade.logout(&token).await.unwrap();
        assert!(!facade.check_session(&token, &ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn application_token_acquired_lazily() {
        let server = server();
        let facade = facade(&server, config());
        assert!(!facade.tokens().is_cached().await);

        facade.login("bob", "pw2", &ctx()).await.unwrap();
        assert!(facade.tokens().is_cached().await);
        assert_eq!(server.application_auth_count(), 1);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_remote_calls() {
        let server = server();
        let facade = facade(&server, config());

        for (name, credential) in [("", "pw1"), ("   ", "pw1"), ("alice", "")] {
            let err = facade.login(name, credential, &ctx()).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        assert_eq!(server.application_auth_count(), 0);
        assert_eq!(server.principal_auth_count(), 0);
    }

    #[tokio::test]
    async fn principal_name_is_normalized() {
        let server = server();
        let facade = facade(&server, config());

        // "e" followed by a combining acute accent, padded with whitespace.
        let token = facade.login("  rene\u{301} ", "pw3", &ctx()).await.unwrap();
        assert!(!token.is_blank());
    }

    #[tokio::test]
    async fn required_group_member_may_log_in() {
        let server = server();
        let config = config().with_access_policy(AccessPolicy {
            required_group: Some("wiki-users".to_string()),
            ..AccessPolicy::default()
        });
        let facade = facade(&server, config);

        assert!(facade.login("alice", "pw1", &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn non_member_is_forbidden_and_session_closed() {
        let server = server();
        let config = config().with_access_policy(AccessPolicy {
            required_group: Some("wiki-users".to_string()),
            ..AccessPolicy::default()
        });
        let facade = facade(&server, config);

        let err = facade.login("bob", "pw2", &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden { ref group, .. } if group == "wiki-users"));
        assert_eq!(server.active_session_count(), 0);
    }

    /// Delegates to the in-memory server but cannot reach the group directory.
    struct GroupDirectoryDown(Arc<InMemoryIdentityServer>);

    #[async_trait::async_trait]
    impl IdentityTransport for GroupDirectoryDown {
        async fn authenticate_application(
            &self,
            name: &str,
            credential: &str,
        ) -> Result<Option<ApplicationToken>, TransportError> {
            self.0.authenticate_application(name, credential).await
        }

        async fn authenticate_principal(
            &self,
            app: &ApplicationToken,
            name: &str,
            credential: &str,
            factors: &ValidationFactors,
        ) -> Result<PrincipalToken, TransportError> {
            self.0.authenticate_principal(app, name, credential, factors).await
        }

        async fn is_valid_principal_token(
            &self,
            app: &ApplicationToken,
            token: &PrincipalToken,
            factors: &ValidationFactors,
        ) -> Result<bool, TransportError> {
            self.0.is_valid_principal_token(app, token, factors).await
        }

        async fn invalidate_principal_token(
            &self,
            app: &ApplicationToken,
            token: &PrincipalToken,
        ) -> Result<(), TransportError> {
            self.0.invalidate_principal_token(app, token).await
        }

        async fn find_principal_by_token(
            &self,
            app: &ApplicationToken,
            token: &PrincipalToken,
        ) -> Result<Principal, TransportError> {
            self.0.find_principal_by_token(app, token).await
        }

        async fn find_group_memberships(
            &self,
            _app: &ApplicationToken,
            _principal_name: &str,
        ) -> Result<BTreeSet<String>, TransportError> {
            Err(TransportError::Network("directory down".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_group_lookup_closes_fresh_session() {
        let server = server();
        let config = config().with_access_policy(AccessPolicy {
            required_group: Some("wiki-users".to_string()),
            ..AccessPolicy::default()
        });
        let facade =
            AuthenticationFacade::new(Arc::new(GroupDirectoryDown(server.clone())), &config);

        let err = facade.login("alice", "pw1", &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { .. }));
        assert_eq!(server.principal_auth_count(), 1);
        assert_eq!(server.invalidation_count(), 1);
        assert_eq!(server.active_session_count(), 0);
    }

    #[tokio::test]
    async fn resolve_session_maps_role() {
        let server = server();
        let config = config().with_access_policy(AccessPolicy {
            admin_groups: vec!["wiki-admins".to_string()],
            ..AccessPolicy::default()
        });
        let facade = facade(&server, config);

        let token = facade.login("alice", "pw1", &ctx()).await.unwrap();
        let identity = facade.resolve_session(&token, &ctx()).await.unwrap().unwrap();
        assert_eq!(identity.principal.name, "alice");
        assert_eq!(identity.role, Role::Admin);
        assert!(identity.groups.contains("wiki-users"));

        facade.logout(&token).await.unwrap();
        assert!(facade.resolve_session(&token, &ctx()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_session_token_is_invalid_without_remote_call() {
        let server = server();
        let facade = facade(&server, config());
        assert!(!facade
            .check_session(&PrincipalToken::new(""), &ctx())
            .await
            .unwrap());
        assert_eq!(server.validation_count(), 0);
    }

    #[tokio::test]
    async fn warm_up_acquires_token() {
        let server = server();
        let facade = facade(&server, config());
        facade.warm_up().await.unwrap();
        assert!(facade.tokens().is_cached().await);
    }

    #[tokio::test]
    async fn logout_twice_is_not_an_error() {
        let server = server();
        let facade = facade(&server, config());
        let token = facade.login("alice", "pw1", &ctx()).await.unwrap();
        facade.logout(&token).await.unwrap();
        facade.logout(&token).await.unwrap();
    }

    #[tokio::test]
    async fn lookup_groups_of_principal_without_groups_is_empty() {
        let server = server();
        let facade = facade(&server, config());
        assert!(facade.lookup_groups("bob").await.unwrap().is_empty());
        assert!(matches!(
            facade.lookup_groups("nobody").await,
            Err(AuthError::NotFound(_))
        ));
    }
}
