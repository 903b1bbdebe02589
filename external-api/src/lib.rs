//! # PXE Responder & metrics
//!
//! This crate provides the server's independent HTTP port. It exposes:
//!
//! - `GET /pxe/{name}` — the raw `data` field of a BootScript
//! - `GET /metrics` — the Prometheus text exposition
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, bail};
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing,
};
use dhcp_core::store::LeaseStore;
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// The HTTP server task runner for the PXE responder.
#[derive(Debug)]
pub struct ExternalApiGuard {
    task_handle: JoinHandle<()>,
}

impl Drop for ExternalApiGuard {
    fn drop(&mut self) {
        self.task_handle.abort();
    }
}

/// Serves `/pxe/{name}` and `/metrics` on an independently configured
/// port (spec §4.7).
#[derive(Debug)]
pub struct ExternalApi<S> {
    addr: SocketAddr,
    store: Arc<S>,
}

impl<S: LeaseStore> ExternalApi<S> {
    /// build a new PXE/metrics server bound to `addr`
    pub fn new(addr: SocketAddr, store: Arc<S>) -> Self {
        Self { addr, store }
    }

    fn router(store: Arc<S>) -> Router {
        Router::new()
            .route("/pxe/{name}", routing::get(handlers::pxe::<S>))
            .route("/metrics", routing::get(handlers::metrics))
            .with_state(store)
            .layer(TraceLayer::new_for_http())
    }

    async fn run(addr: SocketAddr, store: Arc<S>) -> Result<()> {
        let tcp = TcpListener::bind(&addr).await?;
        debug!(%addr, "external API listening");
        axum::serve(tcp, Self::router(store)).await?;
        bail!("external API returned-- should not happen")
    }

    /// start the server as a background task
    pub fn serve(self) -> ExternalApiGuard {
        let addr = self.addr;
        let store = self.store;
        let task_handle = tokio::spawn(async move {
            if let Err(err) = Self::run(addr, store).await {
                error!(%err, "external API task exited");
            }
        });
        ExternalApiGuard { task_handle }
    }
}

mod handlers {
    use super::*;

    pub(crate) async fn pxe<S: LeaseStore>(
        State(store): State<Arc<S>>,
        Path(name): Path<String>,
    ) -> impl IntoResponse {
        match store.get_boot_script(&name).await {
            Ok(Some(script)) => (StatusCode::OK, script.spec.data).into_response(),
            Ok(None) => (StatusCode::INTERNAL_SERVER_ERROR, "boot script not found").into_response(),
            Err(err) => {
                error!(%err, name, "store error serving pxe boot script");
                (StatusCode::INTERNAL_SERVER_ERROR, "store error").into_response()
            }
        }
    }

    pub(crate) async fn metrics() -> impl IntoResponse {
        use prometheus::{Encoder, TextEncoder};

        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buf = Vec::new();
        match encoder.encode(&families, &mut buf) {
            Ok(()) => (StatusCode::OK, buf).into_response(),
            Err(err) => {
                error!(%err, "error encoding prometheus metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcp_core::store::MemoryGateway;
    use std::time::Duration;

    #[tokio::test]
    async fn pxe_returns_boot_script_data() {
        let store = Arc::new(
            MemoryGateway::new().with_boot_script("ipxe.cfg", "#!ipxe\nboot\n"),
        );
        let api = ExternalApi::new("127.0.0.1:18080".parse().unwrap(), store);
        let _guard = api.serve();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let body = reqwest::get("http://127.0.0.1:18080/pxe/ipxe.cfg")
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert_eq!(body, "#!ipxe\nboot\n");
    }

    #[tokio::test]
    async fn pxe_returns_500_for_unknown_name() {
        let store = Arc::new(MemoryGateway::new());
        let api = ExternalApi::new("127.0.0.1:18081".parse().unwrap(), store);
        let _guard = api.serve();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = reqwest::get("http://127.0.0.1:18081/pxe/missing")
            .await
            .expect("request")
            .status();
        assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_exposition() {
        let store = Arc::new(MemoryGateway::new());
        let api = ExternalApi::new("127.0.0.1:18082".parse().unwrap(), store);
        let _guard = api.serve();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let resp = reqwest::get("http://127.0.0.1:18082/metrics")
            .await
            .expect("request");
        assert!(resp.status().is_success());
    }
}
