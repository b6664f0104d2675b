// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for session tokens and client context.
//!
//! ```rust,ignore
//! async fn my_handler(
//!     SessionToken(token): SessionToken,
//!     ClientContext(context): ClientContext,
//! ) -> impl IntoResponse {
//!     // token is the caller's PrincipalToken
//! }
//! ```

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, header::USER_AGENT, request::Parts, HeaderMap},
};

use crate::error::ApiError;
use crate::transport::types::{FACTOR_REMOTE_ADDRESS, FACTOR_USER_AGENT};
use crate::transport::{PrincipalToken, ValidationFactors};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Bearer session token from the `Authorization` header.
///
/// Only checks the header shape; validity is up to the identity server.
pub struct SessionToken(pub PrincipalToken);

impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("missing_auth_header", "Missing Authorization header"))?
            .to_str()
            .map_err(|_| invalid_header())?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(invalid_header)?;

        Ok(SessionToken(PrincipalToken::new(token)))
    }
}

fn invalid_header() -> ApiError {
    ApiError::unauthorized("invalid_auth_header", "Invalid Authorization header format")
}

/// Validation factors describing the calling client.
///
/// The remote address is the first `X-Forwarded-For` hop, else `X-Real-IP`.
/// Missing headers simply contribute no factor.
pub struct ClientContext(pub ValidationFactors);

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientContext(factors_from_headers(&parts.headers)))
    }
}

fn factors_from_headers(headers: &HeaderMap) -> ValidationFactors {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let mut factors = ValidationFactors::new();

    let remote = header(X_FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .or_else(|| header(X_REAL_IP));
    if let Some(address) = remote {
        factors.insert(FACTOR_REMOTE_ADDRESS, address);
    }
    if let Some(agent) = header(USER_AGENT.as_str()) {
        factors.insert(FACTOR_USER_AGENT, agent);
    }

    factors
}
