use axum::Json;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub(crate) struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

/// Liveness only, the engines are not probed.
#[axum_macros::debug_handler]
pub(crate) async fn handle_health_request() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        message: "Server is running",
    })
}
