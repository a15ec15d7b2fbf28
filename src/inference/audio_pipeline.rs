#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::model::Whisper;
use candle_transformers::models::whisper::{
    self as whisper, audio, Config, COMPRESSION_RATIO_THRESHOLD, EOT_TOKEN, HOP_LENGTH,
    LOGPROB_THRESHOLD, NO_SPEECH_THRESHOLD, NO_SPEECH_TOKENS, NO_TIMESTAMPS_TOKEN, SAMPLE_RATE,
    SOT_TOKEN, TEMPERATURES, TRANSCRIBE_TOKEN,
};
use hf_hub::api::sync::ApiRepo;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use tokenizers::Tokenizer;
use tracing::{debug, error};

use crate::inference::language::WHISPER_LANGUAGES;
use crate::inference::pcm_decode::pcm_decode;

// Taken from https://github.com/huggingface/candle/blob/main/candle-examples/examples/whisper/main.rs
pub struct AudioGeneratorPipeline {
    model: Whisper,
    tokenizer: Tokenizer,
    config: Config,
    mel_filters: Vec<f32>,
    suppress_tokens: Tensor,
    sot_token: u32,
    transcribe_token: u32,
    eot_token: u32,
    no_speech_token: u32,
    no_timestamps_token: u32,
    /// Token ids of `WHISPER_LANGUAGES`, empty for English-only checkpoints
    language_tokens: Vec<u32>,
    seed: StdRng,
}

impl AudioGeneratorPipeline {
    pub fn with_safetensors_model(
        repo: &ApiRepo,
        mel_filters_path: &Path,
        seed: StdRng,
    ) -> Result<Self> {
        let config_path = repo.get("config.json")?;
        let tokenizer_path = repo.get("tokenizer.json")?;
        let weights_path = repo.get("model.safetensors")?;

        let config: Config = serde_json::from_str(&std::fs::read_to_string(config_path)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(anyhow::Error::msg)?;

        // SAFETY: the weights file is memory-mapped read-only and owned by the hub cache
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], whisper::DTYPE, &Device::Cpu)?
        };
        let model = Whisper::load(&vb, config.clone())?;

        let mel_filters = read_mel_filters(mel_filters_path, &config)?;

        let no_timestamps_token = token_id(&tokenizer, NO_TIMESTAMPS_TOKEN)?;
        let suppress_tokens: Vec<f32> = (0..model.config.vocab_size as u32)
            .map(|i| {
                if model.config.suppress_tokens.contains(&i) {
                    f32::NEG_INFINITY
                } else {
                    0f32
                }
            })
            .collect();
        let suppress_tokens = Tensor::new(suppress_tokens.as_slice(), &Device::Cpu)?;
        let sot_token = token_id(&tokenizer, SOT_TOKEN)?;
        let transcribe_token = token_id(&tokenizer, TRANSCRIBE_TOKEN)?;
        let eot_token = token_id(&tokenizer, EOT_TOKEN)?;
        let Some(no_speech_token) = NO_SPEECH_TOKENS
            .iter()
            .find_map(|token| token_id(&tokenizer, token).ok())
        else {
            bail!("Unable to find any non-speech token")
        };
        let language_tokens = WHISPER_LANGUAGES
            .iter()
            .map(|code| token_id(&tokenizer, &format!("<|{code}|>")))
            .collect::<Result<Vec<_>>>()
            .unwrap_or_default();

        Ok(Self {
            model,
            tokenizer,
            config,
            mel_filters,
            suppress_tokens,
            sot_token,
            transcribe_token,
            eot_token,
            no_speech_token,
            no_timestamps_token,
            language_tokens,
            seed,
        })
    }

    /// Transcribes a 16 kHz waveform file into a single trimmed string.
    /// An empty string means no segment contained speech.
    pub fn transcribe_file(&mut self, path: &Path, language: Option<&str>) -> Result<String> {
        let decoded = pcm_decode(path)?;
        if decoded.sample_rate != u32::try_from(SAMPLE_RATE)? {
            bail!("Input file must have a {} sampling rate", SAMPLE_RATE)
        }
        debug!("pcm data loaded {}", decoded.samples.len());

        let segments = self.transcribe(&decoded.samples, language)?;
        let text = segments
            .iter()
            .map(|segment| segment.dr.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(text)
    }

    pub fn transcribe(&mut self, pcm: &[f32], language: Option<&str>) -> Result<Vec<Segment>> {
        let mel = self.load_mel(pcm)?;
        let (_, _, content_frames) = mel.dims3()?;
        let language_token = match language {
            Some(code) => {
                let Ok(token) = token_id(&self.tokenizer, &format!("<|{code}|>")) else {
                    bail!("language {code} is not supported")
                };
                Some(token)
            }
            None => self.detect_language(&mel)?,
        };

        let mut seek = 0;
        let mut segments = vec![];
        while seek < content_frames {
            let time_offset = (seek * HOP_LENGTH) as f64 / SAMPLE_RATE as f64;
            let segment_size = usize::min(content_frames - seek, whisper::N_FRAMES);
            let mel_segment = mel.narrow(2, seek, segment_size)?;
            let segment_duration = (segment_size * HOP_LENGTH) as f64 / SAMPLE_RATE as f64;
            let dr = self.decode_with_fallback(&mel_segment, language_token)?;
            seek += segment_size;
            if dr.no_speech_prob > NO_SPEECH_THRESHOLD && dr.avg_logprob < LOGPROB_THRESHOLD {
                debug!("no speech detected, skipping {seek} {dr:?}");
                continue;
            }
            let segment = Segment {
                start: time_offset,
                duration: segment_duration,
                dr,
            };
            debug!(
                "{:.1}s -- {:.1}s (t={}): {}",
                segment.start,
                segment.start + segment.duration,
                segment.dr.temperature,
                segment.dr.text,
            );
            segments.push(segment);
        }
        Ok(segments)
    }

    /// Picks the most likely language token from the first 30 seconds.
    fn detect_language(&mut self, mel: &Tensor) -> Result<Option<u32>> {
        if self.language_tokens.is_empty() {
            return Ok(None);
        }
        let (_, _, frames) = mel.dims3()?;
        let mel = mel.narrow(2, 0, usize::min(frames, whisper::N_FRAMES))?;
        let device = mel.device();

        let audio_features = self.model.encoder.forward(&mel, true)?;
        let tokens = Tensor::new(&[[self.sot_token]], device)?;
        let ys = self.model.decoder.forward(&tokens, &audio_features, true)?;
        let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
        let candidates = Tensor::new(self.language_tokens.as_slice(), device)?;
        let logits = logits.index_select(&candidates, 0)?;
        let probs: Vec<f32> = softmax(&logits, D::Minus1)?.to_vec1()?;

        let (index, probability) = probs
            .iter()
            .enumerate()
            .max_by(|(_, u), (_, v)| u.total_cmp(v))
            .ok_or_else(|| anyhow!("No language probabilities computed"))?;
        debug!(
            language = WHISPER_LANGUAGES[index],
            probability, "Detected language"
        );
        Ok(Some(self.language_tokens[index]))
    }

    fn decode_with_fallback(
        &mut self,
        segment: &Tensor,
        language_token: Option<u32>,
    ) -> Result<DecodingResult> {
        for (i, &t) in TEMPERATURES.iter().enumerate() {
            let dr: Result<DecodingResult> = self.decode(segment, t, language_token);
            if i == TEMPERATURES.len() - 1 {
                return dr;
            }
            // On errors, we try again with a different temperature.
            match dr {
                Ok(dr) => {
                    let needs_fallback = dr.compression_ratio > COMPRESSION_RATIO_THRESHOLD
                        || dr.avg_logprob < LOGPROB_THRESHOLD;
                    if !needs_fallback || dr.no_speech_prob > NO_SPEECH_THRESHOLD {
                        return Ok(dr);
                    }
                }
                Err(err) => {
                    error!("Error running at {t}: {err}");
                }
            }
        }
        bail!("No decoding temperatures configured")
    }

    fn decode(
        &mut self,
        mel: &Tensor,
        t: f64,
        language_token: Option<u32>,
    ) -> Result<DecodingResult> {
        let model = &mut self.model;
        let audio_features = model.encoder.forward(mel, true)?;
        debug!("audio features: {:?}", audio_features.dims());

        let sample_len = model.config.max_target_positions / 2;
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = f64::NAN;
        let mut tokens = vec![self.sot_token];
        if let Some(language_token) = language_token {
            tokens.push(language_token);
        }
        tokens.push(self.transcribe_token);
        tokens.push(self.no_timestamps_token);

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), mel.device())?;

            // The model expects a batch dim but this inference loop does not handle
            // it so we add it at this point.
            let tokens_t = tokens_t.unsqueeze(0)?;
            let ys = model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            // Extract the no speech probability on the first iteration by looking at the first
            // token logits and the probability for the according token.
            if i == 0 {
                let logits = model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                no_speech_prob = f64::from(
                    softmax(&logits, 0)?
                        .i(self.no_speech_token as usize)?
                        .to_scalar::<f32>()?,
                );
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress_tokens)?;
            let next_token = if t > 0f64 {
                let prs = softmax(&(&logits / t)?, 0)?;
                let logits_v: Vec<f32> = prs.to_vec1()?;
                let distr = rand::distributions::WeightedIndex::new(&logits_v)?;
                u32::try_from(distr.sample(&mut self.seed))?
            } else {
                let logits_v: Vec<f32> = logits.to_vec1()?;
                logits_v
                    .iter()
                    .enumerate()
                    .max_by(|(_, u), (_, v)| u.total_cmp(v))
                    .map(|(i, _)| i as u32)
                    .ok_or_else(|| anyhow!("Decoder produced no logits"))?
            };
            tokens.push(next_token);
            let prob = f64::from(
                softmax(&logits, D::Minus1)?
                    .i(next_token as usize)?
                    .to_scalar::<f32>()?,
            );
            if next_token == self.eot_token || tokens.len() > model.config.max_target_positions {
                break;
            }
            sum_logprob += prob.ln();
        }
        let text = self
            .tokenizer
            .decode(&tokens, true)
            .map_err(anyhow::Error::msg)?;
        let avg_logprob = sum_logprob / tokens.len() as f64;

        Ok(DecodingResult {
            text,
            avg_logprob,
            no_speech_prob,
            temperature: t,
            compression_ratio: f64::NAN,
        })
    }

    fn load_mel(&self, pcm: &[f32]) -> Result<Tensor> {
        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let mel_len = mel.len();
        let mel = Tensor::from_vec(
            mel,
            (
                1,
                self.config.num_mel_bins,
                mel_len / self.config.num_mel_bins,
            ),
            &Device::Cpu,
        )?;
        debug!("loaded mel: {:?}", mel.dims());
        Ok(mel)
    }
}

fn read_mel_filters(path: &Path, config: &Config) -> Result<Vec<f32>> {
    let mel_bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read mel filters from {}", path.display()))?;
    let expected = config.num_mel_bins * (whisper::N_FFT / 2 + 1);
    if mel_bytes.len() != expected * 4 {
        bail!(
            "Mel filter bank has {} bytes, the model needs {} bins",
            mel_bytes.len(),
            config.num_mel_bins
        );
    }
    let mut mel_filters = vec![0f32; expected];
    <byteorder::LittleEndian as byteorder::ByteOrder>::read_f32_into(&mel_bytes, &mut mel_filters);
    Ok(mel_filters)
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub start: f64,
    pub duration: f64,
    pub dr: DecodingResult,
}

#[derive(Debug, Clone)]
pub struct DecodingResult {
    pub text: String,
    pub avg_logprob: f64,
    pub no_speech_prob: f64,
    pub temperature: f64,
    pub compression_ratio: f64,
}

pub fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    match tokenizer.token_to_id(token) {
        None => bail!("no token-id for {token}"),
        Some(id) => Ok(id),
    }
}
