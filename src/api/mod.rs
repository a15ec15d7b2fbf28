use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::inference::convert::AudioConverter;
use crate::inference::engine_chain::EngineChain;

pub(crate) mod health;
pub(crate) mod transcribe;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) converter: Arc<AudioConverter>,
    pub(crate) engines: Arc<EngineChain>,
    /// Parent of the per-request scratch directories, system temp dir when `None`
    pub(crate) scratch_dir: Option<PathBuf>,
}

pub(crate) fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let transcribe_router = Router::new()
        .route("/transcribe", post(transcribe::handle_transcribe_request))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .route("/health", get(health::handle_health_request))
        .merge(transcribe_router)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::inference::convert::ConversionStrategy;
    use crate::inference::engines::SpeechEngine;

    pub(crate) const BOUNDARY: &str = "transcriber-test-boundary";

    pub(crate) enum Part<'a> {
        File {
            name: &'a str,
            file_name: &'a str,
            data: Vec<u8>,
        },
        Text {
            name: &'a str,
            value: &'a str,
        },
    }

    pub(crate) fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File {
                    name,
                    file_name,
                    data,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
                Part::Text { name, value } => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    pub(crate) fn test_router(engines: Vec<Arc<dyn SpeechEngine>>, max_upload_bytes: usize) -> Router {
        let state = AppState {
            converter: Arc::new(AudioConverter::new(ConversionStrategy::InProcess)),
            engines: Arc::new(EngineChain::new(engines)),
            scratch_dir: None,
        };
        router(state, max_upload_bytes)
    }

    pub(crate) async fn post_transcribe(router: Router, parts: &[Part<'_>]) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri("/transcribe")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        router.oneshot(request).await.unwrap()
    }

    pub(crate) async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_liveness() {
        let router = test_router(vec![], 1024);

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "status": "OK", "message": "Server is running" })
        );
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected() {
        let router = test_router(vec![], 1024);

        let response = post_transcribe(
            router,
            &[Part::File {
                name: "audio_file",
                file_name: "big.wav",
                data: vec![0u8; 4096],
            }],
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "success": false, "error": "File too large" })
        );
    }

    #[tokio::test]
    async fn non_multipart_body_gets_the_failure_envelope() {
        let router = test_router(vec![], 1024);

        let response = router
            .oneshot(
                Request::post("/transcribe")
                    .body(Body::from("audio_file=voice.wav"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "success": false, "error": "Invalid upload" })
        );
    }
}
