// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-over-HTTP binding of the identity server RPC surface.
//!
//! Every method is a `POST {server_url}/rpc/{method}` with a JSON params
//! object. A 2xx response carries an envelope holding either `result` or
//! `fault`:
//!
//! ```json
//! { "result": "token-value" }
//! { "fault": { "code": "InvalidAuthenticationException", "message": "bad password" } }
//! ```
//!
//! Non-2xx statuses, unparseable bodies and envelopes with neither field are
//! reported as [`TransportError::InvalidResponse`].

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::types::{
    ApplicationToken, Principal, PrincipalToken, RemoteFault, TransportError, ValidationFactors,
};
use super::IdentityTransport;

const METHOD_AUTHENTICATE_APPLICATION: &str = "authenticateApplication";
const METHOD_AUTHENTICATE_PRINCIPAL: &str = "authenticatePrincipal";
const METHOD_IS_VALID_PRINCIPAL_TOKEN: &str = "isValidPrincipalToken";
const METHOD_INVALIDATE_PRINCIPAL_TOKEN: &str = "invalidatePrincipalToken";
const METHOD_FIND_PRINCIPAL_BY_TOKEN: &str = "findPrincipalByToken";
const METHOD_FIND_GROUP_MEMBERSHIPS: &str = "findGroupMemberships";

/// Identity server client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIdentityTransport {
    base_url: Url,
    timeout: Duration,
    http: Client,
}

impl HttpIdentityTransport {
    /// Create a transport whose every request is bounded by `timeout`.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            timeout,
            http,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/rpc/{}",
            self.base_url.as_str().trim_end_matches('/'),
            method
        )
    }

    /// Issue one RPC and unwrap its envelope. `Ok(None)` means an empty result.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, TransportError> {
        debug!(method, "identity server call");

        let response = self
            .http
            .post(self.endpoint(method))
            .json(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::Network(format!("{method} failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::InvalidResponse(format!(
                "{method} returned {status}: {body}"
            )));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(format!("{method} invalid JSON: {e}")))?;

        decode_envelope(method, envelope)
    }

    async fn call_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TransportError> {
        self.call(method, params).await?.ok_or_else(|| {
            TransportError::InvalidResponse(format!("{method} response carried no result"))
        })
    }
}

/// Unwrap a response envelope.
///
/// A non-null `fault` wins. A present `result` key decodes, with `null`
/// meaning an empty result. An object with neither key is malformed.
fn decode_envelope<T: DeserializeOwned>(
    method: &str,
    envelope: Value,
) -> Result<Option<T>, TransportError> {
    let Value::Object(mut fields) = envelope else {
        return Err(TransportError::InvalidResponse(format!(
            "{method} response is not a JSON object"
        )));
    };

    if let Some(fault) = fields.remove("fault").filter(|f| !f.is_null()) {
        let fault: RemoteFault = serde_json::from_value(fault).map_err(|e| {
            TransportError::InvalidResponse(format!("{method} carried a malformed fault: {e}"))
        })?;
        return Err(TransportError::Fault(fault));
    }

    match fields.remove("result") {
        Some(Value::Null) => {
            debug!(method, "identity server returned an empty result");
            Ok(None)
        }
        Some(result) => serde_json::from_value(result).map(Some).map_err(|e| {
            TransportError::InvalidResponse(format!("{method} result has unexpected shape: {e}"))
        }),
        None => Err(TransportError::InvalidResponse(format!(
            "{method} response carried neither result nor fault"
        ))),
    }
}

fn factors_param(factors: &ValidationFactors) -> Value {
    json!(factors)
}

#[async_trait]
impl IdentityTransport for HttpIdentityTransport {
    async fn authenticate_application(
        &self,
        application_name: &str,
        credential: &str,
    ) -> Result<Option<ApplicationToken>, TransportError> {
        let token: Option<String> = self
            .call(
                METHOD_AUTHENTICATE_APPLICATION,
                json!({
                    "name": application_name,
                    "credential": credential,
                }),
            )
            .await?;
        Ok(token.map(ApplicationToken::new))
    }

    async fn authenticate_principal(
        &self,
        application: &ApplicationToken,
        name: &str,
        credential: &str,
        factors: &ValidationFactors,
    ) -> Result<PrincipalToken, TransportError> {
        let token: String = self
            .call_required(
                METHOD_AUTHENTICATE_PRINCIPAL,
                json!({
                    "application_token": application.as_str(),
                    "name": name,
                    "credential": credential,
                    "validation_factors": factors_param(factors),
                }),
            )
            .await?;
        Ok(PrincipalToken::new(token))
    }

    async fn is_valid_principal_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
        factors: &ValidationFactors,
    ) -> Result<bool, TransportError> {
        self.call_required(
            METHOD_IS_VALID_PRINCIPAL_TOKEN,
            json!({
                "application_token": application.as_str(),
                "token": token.as_str(),
                "validation_factors": factors_param(factors),
            }),
        )
        .await
    }

    async fn invalidate_principal_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
    ) -> Result<(), TransportError> {
        let _: Option<Value> = self
            .call(
                METHOD_INVALIDATE_PRINCIPAL_TOKEN,
                json!({
                    "application_token": application.as_str(),
                    "token": token.as_str(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn find_principal_by_token(
        &self,
        application: &ApplicationToken,
        token: &PrincipalToken,
    ) -> Result<Principal, TransportError> {
        self.call_required(
            METHOD_FIND_PRINCIPAL_BY_TOKEN,
            json!({
                "application_token": application.as_str(),
                "token": token.as_str(),
            }),
        )
        .await
    }

    async fn find_group_memberships(
        &self,
        application: &ApplicationToken,
        principal_name: &str,
    ) -> Result<BTreeSet<String>, TransportError> {
        let groups: Option<Vec<String>> = self
            .call(
                METHOD_FIND_GROUP_MEMBERSHIPS,
                json!({
                    "application_token": application.as_str(),
                    "name": principal_name,
                }),
            )
            .await?;
        Ok(groups.unwrap_or_default().into_iter().collect())
    }
}
