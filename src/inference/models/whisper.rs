use std::path::Path;

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use rand::SeedableRng;
use tracing::info;

use crate::inference::audio_pipeline::AudioGeneratorPipeline;
use crate::inference::model_cache::ModelLoader;
use crate::inference::models::model::{ModelBase, WhisperSize};

/// Something that turns a normalized waveform into text, `None` language means auto-detect.
pub trait LocalTranscriber: Send + 'static {
    fn transcribe_file(&mut self, audio: &Path, language: Option<&str>) -> Result<String>;
}

// Taken from https://github.com/huggingface/candle/blob/main/candle-examples/examples/whisper/main.rs
pub struct WhisperModel {
    generator_pipeline: AudioGeneratorPipeline,
}

impl WhisperModel {
    #[tracing::instrument(level = "info", skip(api))]
    pub fn new(api: &Api, base: &ModelBase, mel_filters_path: &Path) -> Result<Self> {
        let repo = api.repo(Repo::with_revision(
            base.repo_id.clone(),
            RepoType::Model,
            base.repo_revision.clone(),
        ));
        let generator_pipeline = AudioGeneratorPipeline::with_safetensors_model(
            &repo,
            mel_filters_path,
            rand::rngs::StdRng::from_seed([0; 32]),
        )?;

        Ok(Self { generator_pipeline })
    }
}

impl LocalTranscriber for WhisperModel {
    #[tracing::instrument(level = "info", skip(self))]
    fn transcribe_file(&mut self, audio: &Path, language: Option<&str>) -> Result<String> {
        self.generator_pipeline.transcribe_file(audio, language)
    }
}

/// Fetches Whisper checkpoints from the Hugging Face hub by size name.
pub struct WhisperLoader {
    api: Api,
    revision: String,
    mel_filters_repo: String,
}

impl WhisperLoader {
    pub fn new(revision: &str, mel_filters_repo: &str) -> Result<Self> {
        Ok(Self {
            api: Api::new().context("Failed to create Hugging Face API client")?,
            revision: revision.into(),
            mel_filters_repo: mel_filters_repo.into(),
        })
    }
}

impl ModelLoader for WhisperLoader {
    type Model = WhisperModel;

    fn load(&self, size: &str) -> Result<WhisperModel> {
        let size: WhisperSize = size.parse()?;
        let base = size.model_base(&self.revision);
        info!(model = %base.name, repo = %base.repo_id, license = %base.license, "Loading Whisper model");

        let mel_filters_path = self
            .api
            .model(self.mel_filters_repo.clone())
            .get("melfilters.bytes")
            .context("Failed to fetch mel filters")?;
        let model = WhisperModel::new(&self.api, &base, &mel_filters_path)
            .with_context(|| format!("Failed to load {}", base.name))?;

        info!(model = %base.name, "Whisper model loaded");
        Ok(model)
    }
}
