// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SSO Token Broker - Login Delegation to a Remote Identity Server
//!
//! This crate authenticates users against a remote single-sign-on identity
//! server. The service holds an application trust token, brokers principal
//! sessions on behalf of its users, and exposes them over a small HTTP API.
//!
//! ## Modules
//!
//! - `transport` - RPC surface of the identity server (HTTP and in-memory)
//! - `auth` - Application token cache, session broker and login facade
//! - `api` - HTTP API handlers (Axum)
//! - `config` - Environment configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod state;
pub mod telemetry;
pub mod transport;
