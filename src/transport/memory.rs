// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process identity server.
//!
//! Implements [`IdentityTransport`] against in-memory tables of applications,
//! principals and sessions. Tests drive it through its knobs (expiring the
//! application token, failing calls, adding latency) and read its call
//! counters to assert retry and single-flight behaviour.
//!
//! Tokens are issued deterministically: application tokens as `app-N`,
//! principal tokens as `TN`, both counting from 1.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::types::{
    ApplicationToken, Principal, PrincipalToken, TransportError, ValidationFactors,
    FAULT_INVALID_AUTHENTICATION, FAULT_INVALID_AUTHORIZATION_TOKEN, FAULT_INACTIVE_ACCOUNT,
    FAULT_INVALID_TOKEN, FAULT_OBJECT_NOT_FOUND,
};
use super::IdentityTransport;

struct PrincipalRecord {
    credential: String,
    active: bool,
    attributes: BTreeMap<String, Vec<String>>,
    groups: BTreeSet<String>,
}

struct Session {
    principal: String,
    factors: ValidationFactors,
}

#[derive(Default)]
struct ServerState {
    applications: HashMap<String, String>,
    principals: HashMap<String, PrincipalRecord>,
    application_tokens: HashSet<String>,
    sessions: HashMap<String, Session>,
    issued_application_tokens: u64,
    issued_sessions: u64,
}

#[derive(Default)]
struct CallCounts {
    authenticate_application: AtomicUsize,
    authenticate_principal: AtomicUsize,
    is_valid_principal_token: AtomicUsize,
    invalidate_principal_token: AtomicUsize,
    find_principal_by_token: AtomicUsize,
    find_group_memberships: AtomicUsize,
}

#[derive(Default)]
pub struct InMemoryIdentityServer {
    state: Mutex<ServerState>,
    calls: CallCounts,
    latency_ms: AtomicU64,
    reject_application_tokens: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryIdentityServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application allowed to authenticate.
    pub fn with_application(self, name: &str, credential: &str) -> Self {
        self.lock_state()
            .applications
            .insert(name.to_string(), credential.to_string());
        self
    }

    pub fn with_principal(self, name: &str, credential: &str) -> Self {
        self.lock_state().principals.insert(
            name.to_string(),
            PrincipalRecord {
                credential: credential.to_string(),
                active: true,
                attributes: BTreeMap::new(),
                groups: BTreeSet::new(),
            },
        );
        self
    }

    /// Add a group membership to an already registered principal.
    pub fn with_group_membership(self, principal: &str, group: &str) -> Self {
        if let Some(record) = self.lock_state().principals.get_mut(principal) {
            record.groups.insert(group.to_string());
        }
        self
    }

    pub fn with_attribute(self, principal: &str, name: &str, values: &[&str]) -> Self {
        if let Some(record) = self.lock_state().principals.get_mut(principal) {
            record.attributes.insert(
                name.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            );
        }
        self
    }

    pub fn with_inactive_principal(self, name: &str, credential: &str) -> Self {
        let server = self.with_principal(name, credential);
        if let Some(record) = server.lock_state().principals.get_mut(name) {
            record.active = false;
        }
        server
    }

    /// Delay every call by `latency` before it is served.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Forget every issued application token, as a server restart or expiry would.
    pub fn expire_application_tokens(&self) {
        self.lock_state().application_tokens.clear();
    }

    /// Refuse every application token on principal-facing calls.
    pub fn set_reject_application_tokens(&self, reject: bool) {
        self.reject_application_tokens.store(reject, Ordering::SeqCst);
    }

    /// Fail every call with a network error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn application_auth_count(&self) -> usize {
        self.calls.authenticate_application.load(Ordering::SeqCst)
    }

    pub fn principal_auth_count(&self) -> usize {
        self.calls.authenticate_principal.load(Ordering::SeqCst)
    }

    pub fn validation_count(&self) -> usize {
        self.calls.is_valid_principal_token.load(Ordering::SeqCst)
    }

    pub fn invalidation_count(&self) -> usize {
        self.calls.invalidate_principal_token.load(Ordering::SeqCst)
    }

    pub fn active_session_count(&self) -> usize {
        self.lock_state().sessions.len()
    }

    // Used by builders and test knobs only.
    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn serve(&self, counter: &AtomicUsize) -> Result<MutexGuard<'_, ServerState>, TransportError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let latency = Duration::from_millis(self.latency_ms.load(Ordering::SeqCst));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| TransportError::Network("identity server state poisoned".to_string()))
    }

    fn check_application(
        &self,
        state: &ServerState,
        application: &ApplicationToken,
    ) -> Result<(), TransportError> {
        if self.reject_application_tokens.load(Ordering::SeqCst)
            || !state.application_tokens.contains(application.as_str())
        {
            return Err(TransportError::fault(
                FAULT_INVALID_AUTHORIZATION_TOKEN,
                "application token is not valid",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityTransport for InMemoryIdentityServer {
    async fn authenticate_application(
        &self,
        application_name: &str,
        credential: &str,
    ) -> Result<Option<ApplicationToken>, TransportError> {
        let mut state = self.serve(&self.calls.authenticate_application).await?;
        let trusted = state
            .applications
            .get(application_name)
            .is_some_and(|expected| expected == credential);
        if !trusted {
            return Err(TransportError::fault(
                FAULT_INVALID_AUTHENTICATION,
                format!("application {application_name} failed to authenticate"),
            ));
        }

        state.issued_application_tokens += 1;
        let token = format!("app-{}", state.issued_application_tokens);
        state.application_tokens.insert(token.clone());
        Ok(Some(ApplicationToken::new(token)))
    }

    async fn authenticate_principal(
        &self,
        application: &ApplicationToken,
        name: &str,
        credential: &str,
        factors: &ValidationFactors,
    ) -> Result<PrincipalToken, TransportError> {
        let mut state = self.serve(&self.calls.authenticate_principal).await?;
        self.check_application(&state, application)?;

        let active = match state.principals.get(name) {
            Some(record) if record.credential == credential => record.active,
            _ => {
                return Err(TransportError::fault(
                    FAULT_INVALID_AUTHENTICATION,
                    format!("failed to authenticate principal {name}"),
                ))
            }
        };
        if !active {
            return Err(TransportError::fault(
                FAULT_INACTIVE_ACCOUNT,
                format!("{name} is inactive"),
            ));
        }

        state.issued_sessions += 1;
        let token = format!("T{}", state.issued_sessions);
        state.sessions.insert(
            token.clone(),
            Session {
                principal: name.to_string(),
                factors: factors.clone(),
            },
        );
        Ok(PrincipalToken::new(token))
    }

    async fn is_valid_principal_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
        factors: &ValidationFactors,
    ) -> Result<bool, TransportError> {
        let state = self.serve(&self.calls.is_valid_principal_token).await?;
        self.check_application(&state, application)?;

        Ok(state
            .sessions
            .get(token.as_str())
            .is_some_and(|session| &session.factors == factors))
    }

    async fn invalidate_principal_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
    ) -> Result<(), TransportError> {
        let mut state = self.serve(&self.calls.invalidate_principal_token).await?;
        self.check_application(&state, application)?;

        match state.sessions.remove(token.as_str()) {
            Some(_) => Ok(()),
            None => Err(TransportError::fault(
                FAULT_INVALID_TOKEN,
                "principal token is not valid",
            )),
        }
    }

    async fn find_principal_by_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
    ) -> Result<Principal, TransportError> {
        let state = self.serve(&self.calls.find_principal_by_token).await?;
        self.check_application(&state, application)?;

        let not_found =
            || TransportError::fault(FAULT_OBJECT_NOT_FOUND, "no principal for token");
        let session = state.sessions.get(token.as_str()).ok_or_else(not_found)?;
        let record = state
            .principals
            .get(&session.principal)
            .ok_or_else(not_found)?;

        Ok(Principal {
            name: session.principal.clone(),
            attributes: record.attributes.clone(),
        })
    }

    async fn find_group_memberships(
        &self,
        application: &ApplicationToken,
        principal_name: &str,
    ) -> Result<BTreeSet<String>, TransportError> {
        let state = self.serve(&self.calls.find_group_memberships).await?;
        self.check_application(&state, application)?;

        state
            .principals
            .get(principal_name)
            .map(|record| record.groups.clone())
            .ok_or_else(|| {
                TransportError::fault(
                    FAULT_OBJECT_NOT_FOUND,
                    format!("principal {principal_name} does not exist"),
                )
            })
    }
}
