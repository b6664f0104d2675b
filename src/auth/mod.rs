// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Login is delegated to a remote identity server. This service never sees
//! a password database; it holds an application trust token and brokers
//! principal sessions on behalf of its users.
//!
//! ## Auth Flow
//!
//! 1. Client posts name and credential to `POST /v1/sessions`
//! 2. The service:
//!    - Acquires (or reuses) its application token
//!    - Authenticates the principal with the identity server
//!    - Enforces the required group, if configured
//! 3. Client sends `Authorization: Bearer <session token>` on later requests
//! 4. Each request validates the session against the same client context
//!    (remote address and user agent) it was created with
//!
//! ## Security
//!
//! - The application credential is never logged
//! - Session tokens are logged only as a short SHA-256 fingerprint
//! - A rejected application token is refreshed at most once per call

pub mod app_token;
pub mod broker;
pub mod error;
pub mod extractor;
pub mod facade;
pub mod roles;

pub use app_token::ApplicationTokenManager;
pub use broker::PrincipalSessionBroker;
pub use error::{AuthError, AuthKind};
pub use extractor::{ClientContext, SessionToken};
pub use facade::{AuthenticationFacade, SessionIdentity};
pub use roles::{AccessPolicy, Role};
