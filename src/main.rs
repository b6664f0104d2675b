// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{error::Error, net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sso_token_broker::{
    api::router,
    config::{env_optional, BrokerConfig, HOST_ENV, PORT_ENV},
    state::AppState,
    telemetry::init_tracing,
    transport::HttpIdentityTransport,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing()?;

    let config = BrokerConfig::from_env().inspect_err(|e| error!(error = %e, "Invalid configuration"))?;
    let transport = HttpIdentityTransport::new(config.server_url.clone(), config.call_timeout)?;
    info!(
        server = %config.server_url,
        application = %config.application_name,
        timeout_secs = config.call_timeout.as_secs(),
        "Identity server configured"
    );

    let state = AppState::new(Arc::new(transport), &config);

    // Not fatal: the token is acquired on first use and readiness reports the failure.
    if let Err(e) = state.auth.warm_up().await {
        warn!(error = %e, "Could not acquire application token at startup");
    }

    let app = router(state);

    // Parse bind address
    let host = env_optional(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string());
    let port: u16 = env_optional(PORT_ENV)
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(8080);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "SSO token broker listening (docs at /docs)");

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Cancel `token` on Ctrl-C or, on Unix, SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    token.cancel();
}
