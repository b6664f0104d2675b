// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::AuthenticationFacade;
use crate::config::BrokerConfig;
use crate::transport::IdentityTransport;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthenticationFacade>,
}

impl AppState {
    pub fn new(transport: Arc<dyn IdentityTransport>, config: &BrokerConfig) -> Self {
        Self {
            auth: Arc::new(AuthenticationFacade::new(transport, config)),
        }
    }
}
