// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the session API. All types derive
//! `ToSchema` for the OpenAPI document.
//!
//! ## Model Categories
//!
//! - **Sessions**: Login requests, session tokens and validity checks
//! - **Principals**: Resolved identities and group memberships

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{Role, SessionIdentity};
use crate::transport::Principal;

// =============================================================================
// Sessions
// =============================================================================

/// Credentials submitted to open a session.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Principal name as typed by the user.
    pub username: String,
    pub password: String,
}

/// A freshly issued session token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionTokenResponse {
    /// Opaque token to send as `Authorization: Bearer <token>`.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionStatusResponse {
    pub valid: bool,
}

// =============================================================================
// Principals
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PrincipalResponse {
    pub name: String,
    /// Directory attributes, multi-valued.
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl From<Principal> for PrincipalResponse {
    fn from(principal: Principal) -> Self {
        Self {
            name: principal.name,
            attributes: principal.attributes,
        }
    }
}

/// Principal behind the current session, with its groups and local role.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionIdentityResponse {
    pub principal: PrincipalResponse,
    pub groups: BTreeSet<String>,
    pub role: Role,
}

impl From<SessionIdentity> for SessionIdentityResponse {
    fn from(identity: SessionIdentity) -> Self {
        Self {
            principal: identity.principal.into(),
            groups: identity.groups,
            role: identity.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupsResponse {
    pub principal: String,
    pub groups: BTreeSet<String>,
}
