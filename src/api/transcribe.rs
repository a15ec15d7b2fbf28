use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::api::AppState;
use crate::bail_transcriber;
use crate::error::{ApiResult, TranscriberError};
use crate::inference::engine_chain::PipelineError;
use crate::inference::task::transcribe::TranscriptionRequest;

/// Upload extensions accepted by `/transcribe`.
pub(crate) static ALLOWED_EXTENSIONS: [&str; 7] = ["mp3", "wav", "ogg", "m4a", "flac", "aac", "wma"];

#[derive(Serialize, Debug, PartialEq, Eq)]
pub(crate) struct TranscribeResponse {
    success: bool,
    text: String,
    word_count: usize,
    char_count: usize,
}

impl TranscribeResponse {
    fn from_text(text: String) -> Self {
        TranscribeResponse {
            success: true,
            word_count: text.split_whitespace().count(),
            char_count: text.chars().count(),
            text,
        }
    }
}

/// Lower-cased extension if `file_name` has one on the allow-list.
pub(crate) fn allowed_extension(file_name: &str) -> Option<String> {
    let (_, extension) = file_name.rsplit_once('.')?;
    let extension = extension.to_lowercase();
    ALLOWED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

struct Upload {
    file_name: String,
    data: Bytes,
}

#[axum_macros::debug_handler]
pub(crate) async fn handle_transcribe_request(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<TranscribeResponse>> {
    let mut multipart = multipart.map_err(TranscriberError::from_rejection)?;
    let mut upload = None;
    let mut language = None;
    let mut model = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(TranscriberError::from_multipart)?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio_file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(TranscriberError::from_multipart)?;
                upload = Some(Upload { file_name, data });
            }
            "language" => {
                language = Some(field.text().await.map_err(TranscriberError::from_multipart)?);
            }
            "model" => {
                model = Some(field.text().await.map_err(TranscriberError::from_multipart)?);
            }
            _ => debug!("Ignoring unknown multipart field {name}"),
        }
    }

    let Some(upload) = upload else {
        bail_transcriber!("No audio file provided")
    };
    if upload.file_name.is_empty() {
        bail_transcriber!("No file selected")
    }
    let Some(extension) = allowed_extension(&upload.file_name) else {
        bail_transcriber!("Unsupported file type")
    };
    if state.engines.is_empty() {
        return Err(TranscriberError::failure(PipelineError::NoBackend.to_string()));
    }

    // Removed on drop, whichever way this handler returns.
    let scratch = match &state.scratch_dir {
        Some(parent) => tempfile::Builder::new()
            .prefix("transcribe-")
            .tempdir_in(parent)?,
        None => tempfile::Builder::new().prefix("transcribe-").tempdir()?,
    };
    let input = scratch.path().join(format!("input.{extension}"));
    tokio::fs::write(&input, &upload.data).await?;
    info!(
        file_name = %upload.file_name,
        bytes = upload.data.len(),
        "Received audio upload"
    );

    let converted = scratch.path().join("converted.wav");
    if let Err(err) = state.converter.convert(&input, &converted).await {
        error!(error = %err, "Audio conversion failed");
        bail_transcriber!("Failed to process audio file")
    }

    let request = TranscriptionRequest::new(&converted, language.as_deref(), model.as_deref());
    let text = state
        .engines
        .transcribe(&request)
        .await
        .map_err(|err: PipelineError| TranscriberError::failure(err.to_string()))?;

    info!(chars = text.chars().count(), "Transcription successful");
    Ok(Json(TranscribeResponse::from_text(text)))
}
