//! Health check endpoint.

use axum::Json;
use serde::{Deserialize, Serialize};

/// Health status reported to load balancers and orchestrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

/// Report that the service is up.
pub async fn healthz() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "UP".to_string(),
    })
}
