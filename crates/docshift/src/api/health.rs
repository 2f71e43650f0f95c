use axum::extract::State;
use serde::Serialize;

use super::envelope::Success;
use super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    status: &'static str,
    version: &'static str,
    environment: &'static str,
    uptime_seconds: u64,
}

pub async fn health(State(state): State<AppState>) -> Success<HealthStatus> {
    let environment = if state.config.environment.is_development() {
        "development"
    } else {
        "production"
    };
    Success::ok(
        "Server is running",
        HealthStatus {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            environment,
            uptime_seconds: state.started_at.elapsed().as_secs(),
        },
    )
}
