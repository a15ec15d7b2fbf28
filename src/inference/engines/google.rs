use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::inference::convert::TARGET_SAMPLE_RATE;
use crate::inference::engines::{EngineError, EngineResult, SpeechEngine};
use crate::inference::language::cloud_locale;
use crate::inference::task::transcribe::TranscriptionRequest;

pub const DEFAULT_ENDPOINT: &str = "https://speech.googleapis.com/v1/speech:recognize";

/// Google Cloud Speech-to-Text, synchronous `recognize` call.
pub struct GoogleSpeechEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    default_locale: String,
    timeout: Duration,
}

impl GoogleSpeechEngine {
    pub fn new(
        endpoint: &str,
        api_key: Option<&str>,
        default_locale: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.map(str::to_string),
            default_locale: default_locale.to_string(),
            timeout,
        })
    }
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: RecognitionAudio,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    encoding: &'static str,
    sample_rate_hertz: u32,
    audio_channel_count: u32,
    language_code: &'a str,
}

#[derive(Serialize)]
struct RecognitionAudio {
    content: String,
}

#[derive(Deserialize, Default)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<RecognitionAlternative>,
}

#[derive(Deserialize)]
struct RecognitionAlternative {
    #[serde(default)]
    transcript: String,
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

impl RecognizeResponse {
    /// Best alternative of every result, in order.
    fn transcript(&self) -> String {
        self.results
            .iter()
            .filter_map(|result| result.alternatives.first())
            .map(|alternative| alternative.transcript.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl SpeechEngine for GoogleSpeechEngine {
    fn name(&self) -> &str {
        "google"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    #[tracing::instrument(level = "info", skip(self), fields(engine = "google"))]
    async fn transcribe(&self, request: &TranscriptionRequest) -> EngineResult {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EngineError::Service("no API key configured".into()));
        };
        let audio = tokio::fs::read(&request.audio)
            .await
            .map_err(|e| EngineError::Io(e.to_string()))?;
        let language_code = cloud_locale(&request.language, &self.default_locale);

        let body = RecognizeRequest {
            config: RecognitionConfig {
                encoding: "LINEAR16",
                sample_rate_hertz: TARGET_SAMPLE_RATE,
                audio_channel_count: 1,
                language_code: &language_code,
            },
            audio: RecognitionAudio {
                content: Base64::encode_string(&audio),
            },
        };

        debug!(endpoint = %self.endpoint, %language_code, bytes = audio.len(), "Sending audio to Google Speech-to-Text");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Service(format!("request timed out after {:?}", self.timeout))
                } else {
                    EngineError::Service(format!("request: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GoogleErrorBody>(&body)
                .map(|body| body.error.message)
                .unwrap_or(body);
            return Err(EngineError::Service(format!("status {status}: {message}")));
        }

        let result: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Service(format!("parse response: {e}")))?;
        let transcript = result.transcript();
        if transcript.is_empty() {
            return Err(EngineError::NoSpeech);
        }

        info!(
            chars = transcript.chars().count(),
            "Google Speech-to-Text transcription completed"
        );
        Ok(transcript)
    }
}
