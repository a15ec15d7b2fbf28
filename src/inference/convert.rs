use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Result};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::inference::pcm_decode::pcm_decode;

/// Sample rate every engine receives.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("decoding failed: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How uploads are normalized. Picked once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionStrategy {
    Ffmpeg { program: PathBuf },
    InProcess,
}

impl ConversionStrategy {
    /// `auto` uses ffmpeg when the program answers `-version`, otherwise decodes in-process.
    pub fn from_config(mode: &str, ffmpeg_program: &str) -> Result<Self> {
        match mode.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::detect(ffmpeg_program)),
            "ffmpeg" => Ok(Self::Ffmpeg {
                program: ffmpeg_program.into(),
            }),
            "in-process" | "inprocess" => Ok(Self::InProcess),
            other => bail!("Unknown converter strategy {other}, expected auto, ffmpeg or in-process"),
        }
    }

    pub fn detect(ffmpeg_program: &str) -> Self {
        let found = std::process::Command::new(ffmpeg_program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if found {
            Self::Ffmpeg {
                program: ffmpeg_program.into(),
            }
        } else {
            warn!("{ffmpeg_program} not found, audio will be converted in-process");
            Self::InProcess
        }
    }
}

pub struct AudioConverter {
    strategy: ConversionStrategy,
}

impl AudioConverter {
    pub fn new(strategy: ConversionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &ConversionStrategy {
        &self.strategy
    }

    /// Writes a mono 16 kHz WAV to `output`. Either the whole file appears or nothing does.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let staging = output.with_extension("partial.wav");
        let result = match &self.strategy {
            ConversionStrategy::Ffmpeg { program } => run_ffmpeg(program, input, &staging).await,
            ConversionStrategy::InProcess => {
                let input = input.to_path_buf();
                let staging = staging.clone();
                tokio::task::spawn_blocking(move || convert_in_process(&input, &staging))
                    .await
                    .map_err(|e| ConversionError::Decode(e.to_string()))?
            }
        };

        match result {
            Ok(()) => {
                tokio::fs::rename(&staging, output).await?;
                info!(strategy = ?self.strategy, "Audio converted to 16kHz mono wav");
                Ok(())
            }
            Err(err) => {
                // The staging file may not exist if the failure happened early.
                let _ = tokio::fs::remove_file(&staging).await;
                Err(err)
            }
        }
    }
}

async fn run_ffmpeg(program: &Path, input: &Path, output: &Path) -> Result<(), ConversionError> {
    let out = Command::new(program)
        .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
        .arg(input)
        .args(["-ac", "1", "-ar"])
        .arg(TARGET_SAMPLE_RATE.to_string())
        .args(["-c:a", "pcm_s16le", "-f", "wav"])
        .arg(output)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(ConversionError::Ffmpeg(format!(
            "{}: {}",
            out.status,
            stderr.trim()
        )));
    }
    Ok(())
}

fn convert_in_process(input: &Path, output: &Path) -> Result<(), ConversionError> {
    let decoded = pcm_decode(input).map_err(|e| ConversionError::Decode(format!("{e:#}")))?;
    let samples = if decoded.sample_rate == TARGET_SAMPLE_RATE {
        decoded.samples
    } else {
        resample(&decoded.samples, decoded.sample_rate, TARGET_SAMPLE_RATE)?
    };
    write_wav(output, &samples)
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, ConversionError> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| ConversionError::Decode(format!("resampler init: {e}")))?;

    let resample_err = |e: rubato::ResampleError| ConversionError::Decode(format!("resample: {e}"));
    let delay = resampler.output_delay();
    let expected_len = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let mut output = Vec::with_capacity(delay + expected_len + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in chunks.by_ref() {
        let result = resampler.process(&[chunk], None).map_err(resample_err)?;
        output.extend(result.into_iter().flatten());
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let result = resampler
            .process_partial(Some(&[remainder]), None)
            .map_err(resample_err)?;
        output.extend(result.into_iter().flatten());
    }
    // Drain the filter so the tail covers the delay skipped at the front.
    while output.len() < delay + expected_len {
        let result = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(resample_err)?;
        let before = output.len();
        output.extend(result.into_iter().flatten());
        if output.len() == before {
            break;
        }
    }

    let mut output = output.split_off(delay.min(output.len()));
    output.truncate(expected_len);

    debug!(
        from_rate,
        to_rate,
        samples = output.len(),
        "Resampled audio"
    );
    Ok(output)
}

fn write_wav(path: &Path, samples: &[f32]) -> Result<(), ConversionError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let encode = |e: hound::Error| ConversionError::Encode(e.to_string());
    let mut writer = hound::WavWriter::create(path, spec).map_err(encode)?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(value).map_err(encode)?;
    }
    writer.finalize().map_err(encode)
}
