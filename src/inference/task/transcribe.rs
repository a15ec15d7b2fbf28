use std::path::PathBuf;

use crate::inference::language::AUTO;

pub const DEFAULT_MODEL_SIZE: &str = "base";

/// One transcription job, alive for a single HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionRequest {
    /// Normalized 16 kHz mono waveform
    pub audio: PathBuf,
    /// Loose language tag such as `uz-UZ`, or `auto`
    pub language: String,
    /// Whisper model size name such as `base`
    pub model: String,
}

impl TranscriptionRequest {
    /// Blank hints fall back to `auto` and `base`.
    pub fn new(audio: impl Into<PathBuf>, language: Option<&str>, model: Option<&str>) -> Self {
        Self {
            audio: audio.into(),
            language: or_default(language, AUTO),
            model: or_default(model, DEFAULT_MODEL_SIZE),
        }
    }
}

fn or_default(value: Option<&str>, default: &str) -> String {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => default.to_string(),
    }
}
