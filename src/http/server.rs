//! HTTP server hosting the protected routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{enforce, AdmissionState};
use crate::error::Result;
use crate::ratelimit::{
    AdmissionController, PolicySet, ANALYSIS_POLICY, GLOBAL_POLICY, UPLOAD_POLICY,
};

/// Build the router with its admission layers.
///
/// Every route is counted under the global policy; the upload and analysis
/// routes are additionally counted under their own, stricter policies.
pub fn build_router(controller: Arc<AdmissionController>, policies: &PolicySet) -> Result<Router> {
    let global = AdmissionState::new(controller.clone(), policies.require(GLOBAL_POLICY)?);
    let upload = AdmissionState::new(controller.clone(), policies.require(UPLOAD_POLICY)?);
    let analysis = AdmissionState::new(controller, policies.require(ANALYSIS_POLICY)?);

    let uploads = Router::new()
        .route("/uploads", post(accepted))
        .route_layer(from_fn_with_state(upload, enforce));

    let analyses = Router::new()
        .route("/uploads/analyze", post(accepted))
        .route_layer(from_fn_with_state(analysis, enforce));

    Ok(Router::new()
        .route("/health", get(health))
        .merge(uploads)
        .merge(analyses)
        .layer(from_fn_with_state(global, enforce)))
}

async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

async fn accepted() -> Json<Value> {
    Json(json!({ "success": true }))
}

/// HTTP server for the protected routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
