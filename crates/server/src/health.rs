use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use pingpong_core::WebsiteRegistry;
use pingpong_crisp::socket::ConnectionState;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub connection: ConnectionState,
    pub registry: WebsiteRegistry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryCheck {
    pub websites: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub event_stream: HealthCheck,
    pub registry: RegistryCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let event_stream = event_stream_check(&state.connection);
    let ready = event_stream.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        event_stream,
        registry: RegistryCheck { websites: state.registry.len() },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn event_stream_check(connection: &ConnectionState) -> HealthCheck {
    if connection.is_connected() {
        HealthCheck { status: "ready", detail: "rtm socket connected".to_string() }
    } else {
        HealthCheck { status: "degraded", detail: "rtm socket disconnected".to_string() }
    }
}
