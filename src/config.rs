// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup and passed
//! explicitly to the components that need it.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `IDENTITY_SERVER_URL` | Base URL of the identity server | Required |
//! | `IDENTITY_APP_NAME` | Application name this service authenticates as | Required |
//! | `IDENTITY_APP_CREDENTIAL` | Application credential | Required |
//! | `IDENTITY_CALL_TIMEOUT_SECS` | Upper bound for each remote call | `10` |
//! | `REQUIRED_GROUP` | Only members of this group may log in | Unset (everyone) |
//! | `ADMIN_GROUPS` | Comma-separated groups mapped to the admin role | Unset |
//! | `EDITOR_GROUPS` | Comma-separated groups mapped to the editor role | Unset |
//! | `DEFAULT_ROLE` | Role for principals matching no mapping | `member` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::time::Duration;

use url::Url;

use crate::auth::roles::{AccessPolicy, Role};

pub const IDENTITY_SERVER_URL_ENV: &str = "IDENTITY_SERVER_URL";
pub const IDENTITY_APP_NAME_ENV: &str = "IDENTITY_APP_NAME";
pub const IDENTITY_APP_CREDENTIAL_ENV: &str = "IDENTITY_APP_CREDENTIAL";
pub const IDENTITY_CALL_TIMEOUT_ENV: &str = "IDENTITY_CALL_TIMEOUT_SECS";
pub const REQUIRED_GROUP_ENV: &str = "REQUIRED_GROUP";
pub const ADMIN_GROUPS_ENV: &str = "ADMIN_GROUPS";
pub const EDITOR_GROUPS_ENV: &str = "EDITOR_GROUPS";
pub const DEFAULT_ROLE_ENV: &str = "DEFAULT_ROLE";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default upper bound for a single identity server call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    Missing(&'static str),

    #[error("configuration {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// A credential whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Identity server connection and login policy. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub server_url: Url,
    pub application_name: String,
    pub application_credential: Secret,
    pub call_timeout: Duration,
    pub access: AccessPolicy,
}

impl BrokerConfig {
    pub fn new(
        server_url: &str,
        application_name: impl Into<String>,
        application_credential: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let application_name = application_name.into();
        if application_name.trim().is_empty() {
            return Err(ConfigError::Missing(IDENTITY_APP_NAME_ENV));
        }

        Ok(Self {
            server_url: parse_server_url(server_url)?,
            application_name,
            application_credential: Secret::new(application_credential),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            access: AccessPolicy::default(),
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_access_policy(mut self, access: AccessPolicy) -> Self {
        self.access = access;
        self
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_optional)
    }

    /// Load from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let mut config = Self::new(
            &required(IDENTITY_SERVER_URL_ENV)?,
            required(IDENTITY_APP_NAME_ENV)?,
            required(IDENTITY_APP_CREDENTIAL_ENV)?,
        )?;

        if let Some(raw) = get(IDENTITY_CALL_TIMEOUT_ENV) {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                name: IDENTITY_CALL_TIMEOUT_ENV,
                reason: format!("expected whole seconds, got {raw:?}"),
            })?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    name: IDENTITY_CALL_TIMEOUT_ENV,
                    reason: "timeout must be at least one second".to_string(),
                });
            }
            config.call_timeout = Duration::from_secs(secs);
        }

        let default_role = match get(DEFAULT_ROLE_ENV) {
            Some(raw) => Role::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                name: DEFAULT_ROLE_ENV,
                reason: format!("unknown role {raw:?}"),
            })?,
            None => Role::default(),
        };

        config.access = AccessPolicy {
            required_group: get(REQUIRED_GROUP_ENV),
            admin_groups: split_list(get(ADMIN_GROUPS_ENV)),
            editor_groups: split_list(get(EDITOR_GROUPS_ENV)),
            default_role,
        };

        Ok(config)
    }
}

fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name: IDENTITY_SERVER_URL_ENV,
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid {
            name: IDENTITY_SERVER_URL_ENV,
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Read an environment variable, treating blank values as unset.
pub fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        (IDENTITY_SERVER_URL_ENV, "https://id.example"),
        (IDENTITY_APP_NAME_ENV, "svc"),
        (IDENTITY_APP_CREDENTIAL_ENV, "s3cr3t"),
    ];

    #[test]
    fn loads_required_values_with_defaults() {
        let config = BrokerConfig::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.server_url.as_str(), "https://id.example/");
        assert_eq!(config.application_name, "svc");
        assert_eq!(config.application_credential.expose(), "s3cr3t");
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.access, AccessPolicy::default());
    }

    #[test]
    fn missing_credential_is_reported_by_name() {
        let err = BrokerConfig::from_lookup(lookup(&BASE[..2])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(IDENTITY_APP_CREDENTIAL_ENV)));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let vars = [
            (IDENTITY_SERVER_URL_ENV, "https://id.example"),
            (IDENTITY_APP_NAME_ENV, "   "),
            (IDENTITY_APP_CREDENTIAL_ENV, "s3cr3t"),
        ];
        let err = BrokerConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(IDENTITY_APP_NAME_ENV)));
    }

    #[test]
    fn rejects_non_http_url() {
        let err = BrokerConfig::new("ftp://id.example", "svc", "pw").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: IDENTITY_SERVER_URL_ENV, .. }));
    }

    #[test]
    fn parses_policy_and_timeout() {
        let mut vars = BASE.to_vec();
        vars.extend([
            (IDENTITY_CALL_TIMEOUT_ENV, "3"),
            (REQUIRED_GROUP_ENV, "wiki-users"),
            (ADMIN_GROUPS_ENV, "wiki-admins, ops ,"),
            (DEFAULT_ROLE_ENV, "Editor"),
        ]);
        let config = BrokerConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.call_timeout, Duration::from_secs(3));
        assert_eq!(config.access.required_group.as_deref(), Some("wiki-users"));
        assert_eq!(config.access.admin_groups, vec!["wiki-admins", "ops"]);
        assert!(config.access.editor_groups.is_empty());
        assert_eq!(config.access.default_role, Role::Editor);
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let mut vars = BASE.to_vec();
        vars.push((IDENTITY_CALL_TIMEOUT_ENV, "0"));
        assert!(BrokerConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn debug_output_redacts_credential() {
        let config = BrokerConfig::new("https://id.example", "svc", "s3cr3t").unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("Secret(***)"));
    }
}
