// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints.
//!
//! Every endpoint except login takes the session token as a bearer token and
//! validates it against the caller's client context.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::{ClientContext, SessionToken},
    error::ApiError,
    models::{
        GroupsResponse, LoginRequest, PrincipalResponse, SessionIdentityResponse,
        SessionStatusResponse, SessionTokenResponse,
    },
    state::AppState,
    transport::{PrincipalToken, ValidationFactors},
};

/// Open a session for a principal.
#[utoipa::path(
    post,
    path = "/v1/sessions",
    tag = "Sessions",
    request_body = LoginRequest,
    responses(
        (status = 201, description = "Session created", body = SessionTokenResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Principal not in required group"),
        (status = 503, description = "Identity server unavailable")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientContext(context): ClientContext,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<SessionTokenResponse>), ApiError> {
    let token = state
        .auth
        .login(&request.username, &request.password, &context)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SessionTokenResponse {
            token: token.into_inner(),
        }),
    ))
}

/// Check whether the bearer session is still valid for this client.
#[utoipa::path(
    get,
    path = "/v1/sessions/current",
    tag = "Sessions",
    responses(
        (status = 200, description = "Session validity", body = SessionStatusResponse),
        (status = 401, description = "Missing or malformed bearer token"),
        (status = 503, description = "Identity server unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn session_status(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    ClientContext(context): ClientContext,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let valid = state.auth.check_session(&token, &context).await?;
    Ok(Json(SessionStatusResponse { valid }))
}

/// Close the bearer session. Closing an already closed session succeeds.
#[utoipa::path(
    delete,
    path = "/v1/sessions/current",
    tag = "Sessions",
    responses(
        (status = 204, description = "Session closed"),
        (status = 401, description = "Missing or malformed bearer token"),
        (status = 503, description = "Identity server unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Result<StatusCode, ApiError> {
    state.auth.logout(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Principal, groups and local role behind the bearer session.
#[utoipa::path(
    get,
    path = "/v1/sessions/current/identity",
    tag = "Sessions",
    responses(
        (status = 200, description = "Session identity", body = SessionIdentityResponse),
        (status = 401, description = "Missing, malformed or invalid session"),
        (status = 503, description = "Identity server unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn session_identity(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    ClientContext(context): ClientContext,
) -> Result<Json<SessionIdentityResponse>, ApiError> {
    let identity = state
        .auth
        .resolve_session(&token, &context)
        .await?
        .ok_or_else(invalid_session)?;
    Ok(Json(identity.into()))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/current/principal",
    tag = "Sessions",
    responses(
        (status = 200, description = "Principal of the session", body = PrincipalResponse),
        (status = 401, description = "Missing, malformed or invalid session"),
        (status = 503, description = "Identity server unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn session_principal(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    ClientContext(context): ClientContext,
) -> Result<Json<PrincipalResponse>, ApiError> {
    require_valid_session(&state, &token, &context).await?;
    let principal = state.auth.lookup_principal(&token).await?;
    Ok(Json(principal.into()))
}

/// Group memberships of any principal. Requires a valid session.
#[utoipa::path(
    get,
    path = "/v1/principals/{name}/groups",
    tag = "Principals",
    params(("name" = String, Path, description = "Principal name")),
    responses(
        (status = 200, description = "Group memberships", body = GroupsResponse),
        (status = 401, description = "Missing, malformed or invalid session"),
        (status = 404, description = "Unknown principal"),
        (status = 503, description = "Identity server unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn principal_groups(
    State(state): State<AppState>,
    Path(name): Path<String>,
    SessionToken(token): SessionToken,
    ClientContext(context): ClientContext,
) -> Result<Json<GroupsResponse>, ApiError> {
    require_valid_session(&state, &token, &context).await?;
    let groups = state.auth.lookup_groups(&name).await?;
    Ok(Json(GroupsResponse {
        principal: name,
        groups,
    }))
}

async fn require_valid_session(
    state: &AppState,
    token: &PrincipalToken,
    context: &ValidationFactors,
) -> Result<(), ApiError> {
    if state.auth.check_session(token, context).await? {
        Ok(())
    } else {
        Err(invalid_session())
    }
}

fn invalid_session() -> ApiError {
    ApiError::unauthorized("invalid_session", "Session is invalid or expired")
}
