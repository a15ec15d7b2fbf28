use async_trait::async_trait;
use thiserror::Error;

use crate::inference::task::transcribe::TranscriptionRequest;

pub mod google;
pub mod whisper;

/// Why a single engine did not produce text. Every variant sends the chain to the next engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Failed to load the transcription model: {0}")]
    ModelLoad(String),
    #[error("Transcription error: {0}")]
    Inference(String),
    #[error("No speech detected in the audio")]
    NoSpeech,
    #[error("Speech recognition service error: {0}")]
    Service(String),
    #[error("Failed to read the audio: {0}")]
    Io(String),
}

/// Text on success, the reason otherwise. Never both.
pub type EngineResult = Result<String, EngineError>;

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the engine can run at all in this process. Checked once at startup.
    fn is_available(&self) -> bool;

    async fn transcribe(&self, request: &TranscriptionRequest) -> EngineResult;
}
