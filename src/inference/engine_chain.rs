use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::inference::engines::{EngineError, SpeechEngine};
use crate::inference::task::transcribe::TranscriptionRequest;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("No transcription backend available")]
    NoBackend,
    /// Carries the error of the last engine that was tried.
    #[error(transparent)]
    Exhausted(EngineError),
}

/// Engines in priority order. The first one to produce text wins.
pub struct EngineChain {
    engines: Vec<Arc<dyn SpeechEngine>>,
}

impl EngineChain {
    /// Drops engines that report themselves unavailable, keeping the given order.
    pub fn new(ranked: Vec<Arc<dyn SpeechEngine>>) -> Self {
        let engines = ranked
            .into_iter()
            .filter(|engine| {
                let available = engine.is_available();
                info!(engine = engine.name(), available, "Transcription engine");
                available
            })
            .collect();
        Self { engines }
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.iter().map(|engine| engine.name()).collect()
    }

    /// Tries each engine at most once and stops at the first non-empty transcript.
    pub async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String, PipelineError> {
        if self.engines.is_empty() {
            warn!("No transcription engine is available");
            return Err(PipelineError::NoBackend);
        }

        let started = Instant::now();
        let mut last_error = None;
        for engine in &self.engines {
            match engine.transcribe(request).await {
                Ok(text) if !text.trim().is_empty() => {
                    info!(
                        monotonic_counter.transcriptions = 1u64,
                        histogram.transcription_seconds = started.elapsed().as_secs_f64(),
                        engine = engine.name(),
                        outcome = "success",
                        "Transcription succeeded"
                    );
                    return Ok(text.trim().to_string());
                }
                Ok(_) => {
                    warn!(engine = engine.name(), "Engine returned an empty transcript");
                    last_error = Some(EngineError::NoSpeech);
                }
                Err(err) => {
                    warn!(engine = engine.name(), error = %err, "Engine failed, trying the next one");
                    last_error = Some(err);
                }
            }
        }

        info!(
            monotonic_counter.transcriptions = 1u64,
            histogram.transcription_seconds = started.elapsed().as_secs_f64(),
            outcome = "failure",
            "All transcription engines failed"
        );
        Err(last_error.map_or(PipelineError::NoBackend, PipelineError::Exhausted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::{write_tone_wav, FakeEngine};

    fn request() -> TranscriptionRequest {
        TranscriptionRequest::new("/tmp/converted.wav", Some("uz-UZ"), Some("base"))
    }

    fn chain(engines: &[&Arc<FakeEngine>]) -> EngineChain {
        EngineChain::new(
            engines
                .iter()
                .map(|engine| Arc::clone(engine) as Arc<dyn SpeechEngine>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn primary_success_never_touches_the_fallback() {
        let primary = Arc::new(FakeEngine::succeeding("whisper", "salom dunyo"));
        let fallback = Arc::new(FakeEngine::succeeding("google", "other"));

        let text = chain(&[&primary, &fallback]).transcribe(&request()).await;

        assert_eq!(text, Ok("salom dunyo".to_string()));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn failing_primary_falls_back_to_the_exact_fallback_text() {
        let primary = Arc::new(FakeEngine::failing(
            "whisper",
            EngineError::ModelLoad("out of memory".into()),
        ));
        let fallback = Arc::new(FakeEngine::succeeding("google", "privet mir"));

        let text = chain(&[&primary, &fallback]).transcribe(&request()).await;

        assert_eq!(text, Ok("privet mir".to_string()));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(fallback.seen(), vec![request()]);
    }

    #[tokio::test]
    async fn unavailable_primary_is_skipped() {
        let primary = Arc::new(FakeEngine::unavailable("whisper"));
        let fallback = Arc::new(FakeEngine::succeeding("google", "hello"));

        let chain = chain(&[&primary, &fallback]);
        let text = chain.transcribe(&request()).await;

        assert_eq!(chain.engine_names(), vec!["google"]);
        assert_eq!(text, Ok("hello".to_string()));
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test]
    async fn empty_primary_text_counts_as_failure() {
        let primary = Arc::new(FakeEngine::succeeding("whisper", "  "));
        let fallback = Arc::new(FakeEngine::succeeding("google", "hello"));

        let text = chain(&[&primary, &fallback]).transcribe(&request()).await;

        assert_eq!(text, Ok("hello".to_string()));
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_the_last_engine_error() {
        let primary = Arc::new(FakeEngine::failing(
            "whisper",
            EngineError::Inference("tensor shape mismatch".into()),
        ));
        let fallback = Arc::new(FakeEngine::failing(
            "google",
            EngineError::Service("status 403 Forbidden: API key not valid".into()),
        ));

        let result = chain(&[&primary, &fallback]).transcribe(&request()).await;

        let err = result.unwrap_err();
        assert_eq!(
            err,
            PipelineError::Exhausted(EngineError::Service(
                "status 403 Forbidden: API key not valid".into()
            ))
        );
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn single_failing_engine_reports_its_own_error() {
        let primary = Arc::new(FakeEngine::failing("whisper", EngineError::NoSpeech));
        let fallback = Arc::new(FakeEngine::unavailable("google"));

        let result = chain(&[&primary, &fallback]).transcribe(&request()).await;

        assert_eq!(result, Err(PipelineError::Exhausted(EngineError::NoSpeech)));
    }

    #[tokio::test]
    async fn no_available_engine_short_circuits() {
        let primary = Arc::new(FakeEngine::unavailable("whisper"));
        let fallback = Arc::new(FakeEngine::unavailable("google"));

        let chain = chain(&[&primary, &fallback]);
        let result = chain.transcribe(&request()).await;

        assert_eq!(result, Err(PipelineError::NoBackend));
        assert!(chain.is_empty());
        assert_eq!(
            PipelineError::NoBackend.to_string(),
            "No transcription backend available"
        );
        assert_eq!(primary.calls() + fallback.calls(), 0);
    }

    #[tokio::test]
    async fn silent_tone_fails_gracefully_when_no_engine_hears_speech() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone_wav(&audio, 16_000, 1, 5.0, 440.0);
        let primary = Arc::new(FakeEngine::failing("whisper", EngineError::NoSpeech));
        let fallback = Arc::new(FakeEngine::failing("google", EngineError::NoSpeech));

        let result = chain(&[&primary, &fallback])
            .transcribe(&TranscriptionRequest::new(audio, None, None))
            .await;

        assert_eq!(result, Err(PipelineError::Exhausted(EngineError::NoSpeech)));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }
}
