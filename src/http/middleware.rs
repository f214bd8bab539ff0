//! Admission middleware for axum routers.
//!
//! Attach with `axum::middleware::from_fn_with_state`:
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/uploads", post(upload))
//!     .route_layer(from_fn_with_state(AdmissionState::new(controller, policy), enforce));
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, instrument};

use super::identity::client_identity;
use crate::ratelimit::{AdmissionController, AdmissionPolicy};

/// Message returned to rejected clients.
pub const REJECTION_MESSAGE: &str = "Too many requests";

/// Middleware state: the shared controller and the policy for this route.
#[derive(Clone)]
pub struct AdmissionState {
    controller: Arc<AdmissionController>,
    policy: Arc<AdmissionPolicy>,
}

impl AdmissionState {
    pub fn new(controller: Arc<AdmissionController>, policy: Arc<AdmissionPolicy>) -> Self {
        Self { controller, policy }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }
}

#[derive(Debug, Serialize)]
struct RejectionBody {
    success: bool,
    message: &'static str,
}

/// Response sent when a request is over its policy's limit.
pub fn rejection(retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RejectionBody {
            success: false,
            message: REJECTION_MESSAGE,
        }),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

/// Admit or reject a request under the state's policy.
///
/// Denied requests get a 429 with `Retry-After`; everything else, including
/// a limiter that panics while deciding, is forwarded unchanged.
#[instrument(skip_all, fields(policy = %state.policy.name()))]
pub async fn enforce(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = client_identity(&request);

    let outcome = AssertUnwindSafe(state.controller.admit(&state.policy, &identity))
        .catch_unwind()
        .await;

    match outcome {
        Ok(decision) if !decision.allowed() => {
            debug!(
                identity = %identity,
                retry_after_secs = decision.retry_after_secs,
                "Rejecting request"
            );
            rejection(decision.retry_after_secs)
        }
        Ok(_) => next.run(request).await,
        Err(_) => {
            error!(identity = %identity, "Admission check panicked, forwarding request");
            next.run(request).await
        }
    }
}
