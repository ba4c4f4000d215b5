//! HTTP server for provider webhooks

mod error;
mod routes;

pub use routes::create_router;

use anyhow::{Context, Result};
use axum::http::{HeaderMap, Uri};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::calling::CallCoordinator;
use crate::config::Config;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: Arc<CallCoordinator>,
}

impl AppState {
    pub fn new(config: Arc<Config>, coordinator: Arc<CallCoordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    /// Scheme and authority the provider used to reach us.
    ///
    /// The configured public URL wins; otherwise it is rebuilt from the
    /// forwarded protocol and `Host` headers.
    fn origin(&self, headers: &HeaderMap) -> String {
        if let Some(ref public) = self.config.server.public_url {
            return public.trim_end_matches('/').to_string();
        }
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let scheme = header("x-forwarded-proto").unwrap_or("http");
        let host = header("host").unwrap_or("localhost");
        format!("{}://{}", scheme, host)
    }

    /// Full URL of this request as the provider signed it.
    fn request_url(&self, headers: &HeaderMap, uri: &Uri) -> String {
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        format!("{}{}", self.origin(headers), path)
    }
}

/// Router with request tracing attached.
pub fn create_app(state: AppState) -> axum::Router {
    create_router(state).layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped.
pub async fn run_server(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .context("Invalid listen address")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Webhook server listening on {}", addr);

    axum::serve(listener, create_app(state))
        .await
        .context("Server error")?;
    Ok(())
}
