use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::inference::engines::{EngineError, EngineResult, SpeechEngine};
use crate::inference::language::whisper_language;
use crate::inference::model_cache::{ModelCache, ModelLoader};
use crate::inference::models::whisper::LocalTranscriber;
use crate::inference::task::transcribe::TranscriptionRequest;

/// Local neural engine. Model loading and inference run on the blocking pool.
pub struct WhisperEngine<L: ModelLoader> {
    cache: Arc<ModelCache<L>>,
    enabled: bool,
}

impl<L> WhisperEngine<L>
where
    L: ModelLoader,
    L::Model: LocalTranscriber,
{
    pub fn new(cache: Arc<ModelCache<L>>, enabled: bool) -> Self {
        Self { cache, enabled }
    }
}

#[async_trait]
impl<L> SpeechEngine for WhisperEngine<L>
where
    L: ModelLoader,
    L::Model: LocalTranscriber,
{
    fn name(&self) -> &str {
        "whisper"
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    #[tracing::instrument(level = "info", skip(self), fields(engine = "whisper"))]
    async fn transcribe(&self, request: &TranscriptionRequest) -> EngineResult {
        let cache = self.cache.clone();
        let size = request.model.clone();
        let audio = request.audio.clone();
        let language = whisper_language(&request.language);

        tokio::task::spawn_blocking(move || {
            debug!(
                ?language,
                requested = %size,
                resident = ?cache.resident_size(),
                "Mapped language hint for Whisper"
            );
            let model = cache
                .get_or_load(&size)
                .map_err(|e| EngineError::ModelLoad(format!("{e:#}")))?;
            let mut model = model
                .lock()
                .map_err(|_| EngineError::Inference("model lock poisoned".into()))?;
            let text = model
                .transcribe_file(&audio, language.as_deref())
                .map_err(|e| EngineError::Inference(format!("{e:#}")))?;

            let text = text.trim();
            if text.is_empty() {
                return Err(EngineError::NoSpeech);
            }
            info!(chars = text.chars().count(), "Whisper transcription completed");
            Ok(text.to_string())
        })
        .await
        .map_err(|e| EngineError::Inference(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use anyhow::{bail, Result};

    use super::*;

    type Calls = Arc<Mutex<Vec<(PathBuf, Option<String>)>>>;

    struct ScriptedModel {
        output: Result<String, String>,
        calls: Calls,
    }

    impl LocalTranscriber for ScriptedModel {
        fn transcribe_file(&mut self, audio: &Path, language: Option<&str>) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((audio.to_path_buf(), language.map(str::to_string)));
            match &self.output {
                Ok(text) => Ok(text.clone()),
                Err(message) => bail!("{message}"),
            }
        }
    }

    struct ScriptedLoader {
        output: Result<String, String>,
        calls: Calls,
    }

    impl ModelLoader for ScriptedLoader {
        type Model = ScriptedModel;

        fn load(&self, size: &str) -> Result<ScriptedModel> {
            if size == "huge" {
                bail!("Unknown Whisper model size huge");
            }
            Ok(ScriptedModel {
                output: self.output.clone(),
                calls: self.calls.clone(),
            })
        }
    }

    fn engine(output: Result<&str, &str>) -> (WhisperEngine<ScriptedLoader>, Calls) {
        let calls = Calls::default();
        let loader = ScriptedLoader {
            output: output.map(str::to_string).map_err(str::to_string),
            calls: calls.clone(),
        };
        let engine = WhisperEngine::new(Arc::new(ModelCache::new(loader)), true);
        (engine, calls)
    }

    fn request(language: &str, model: &str) -> TranscriptionRequest {
        TranscriptionRequest::new("/tmp/converted.wav", Some(language), Some(model))
    }

    #[tokio::test]
    async fn locale_hint_is_reduced_to_iso_code() {
        let (engine, calls) = engine(Ok(" salom dunyo "));

        let text = engine.transcribe(&request("uz-UZ", "base")).await;

        assert_eq!(text, Ok("salom dunyo".to_string()));
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            [(PathBuf::from("/tmp/converted.wav"), Some("uz".to_string()))]
        );
    }

    #[tokio::test]
    async fn auto_hint_lets_the_model_detect_the_language() {
        let (engine, calls) = engine(Ok("hello"));

        engine.transcribe(&request("auto", "base")).await.unwrap();

        assert_eq!(calls.lock().unwrap()[0].1, None);
    }

    #[tokio::test]
    async fn empty_transcript_is_no_speech() {
        let (engine, _) = engine(Ok("   "));

        assert_eq!(
            engine.transcribe(&request("auto", "base")).await,
            Err(EngineError::NoSpeech)
        );
    }

    #[tokio::test]
    async fn unknown_model_size_is_a_load_failure_not_a_panic() {
        let (engine, calls) = engine(Ok("hello"));

        let result = engine.transcribe(&request("auto", "huge")).await;

        assert!(matches!(result, Err(EngineError::ModelLoad(message)) if message.contains("huge")));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inference_errors_are_reported() {
        let (engine, _) = engine(Err("language xx is not supported"));

        let result = engine.transcribe(&request("xx", "base")).await;

        assert_eq!(
            result,
            Err(EngineError::Inference("language xx is not supported".into()))
        );
    }
}
