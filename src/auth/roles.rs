// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local roles derived from directory group memberships.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Local roles, ordered by privilege.
///
/// ## Role Hierarchy
///
/// - `Admin` - everything an editor can do, plus administration
/// - `Editor` - may change content
/// - `Member` - authenticated principal with no elevated rights
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Editor,
    Admin,
}

impl Role {
    /// Parse role from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "editor" => Some(Role::Editor),
            "member" => Some(Role::Member),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Editor => write!(f, "editor"),
            Role::Member => write!(f, "member"),
        }
    }
}

/// Who may log in, and with which role.
///
/// Group names compare case-insensitively, matching how directory servers
/// treat them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Only members of this group may log in. `None` admits everyone.
    pub required_group: Option<String>,
    pub admin_groups: Vec<String>,
    pub editor_groups: Vec<String>,
    pub default_role: Role,
}

impl AccessPolicy {
    pub fn admits(&self, groups: &BTreeSet<String>) -> bool {
        match &self.required_group {
            Some(required) => contains_group(groups, required),
            None => true,
        }
    }

    /// Highest role granted by any membership, else the default role.
    pub fn role_for(&self, groups: &BTreeSet<String>) -> Role {
        let granted = |mapped: &[String]| mapped.iter().any(|g| contains_group(groups, g));

        let role = if granted(&self.admin_groups) {
            Role::Admin
        } else if granted(&self.editor_groups) {
            Role::Editor
        } else {
            Role::Member
        };
        role.max(self.default_role)
    }
}

fn contains_group(groups: &BTreeSet<String>, wanted: &str) -> bool {
    groups.iter().any(|g| g.eq_ignore_ascii_case(wanted))
}
