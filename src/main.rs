use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::api::AppState;
use crate::config::Config;
use crate::inference::convert::{AudioConverter, ConversionStrategy};
use crate::inference::engine_chain::EngineChain;
use crate::inference::engines::google::GoogleSpeechEngine;
use crate::inference::engines::whisper::WhisperEngine;
use crate::inference::engines::SpeechEngine;
use crate::inference::model_cache::ModelCache;
use crate::inference::models::whisper::WhisperLoader;
use crate::telemetry::{init_telemetry, shutdown_telemetry};

mod api;
mod config;
mod error;
mod inference;
mod telemetry;

#[macro_export]
macro_rules! exit_err {
    ($code:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        {
            tracing::error!($fmt $(, $arg)*);
            std::process::exit($code);
        }
    };
}

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_CONFIG_FILE: &str = "AudioTranscriber.toml";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();
    let config_result = Config::from_toml(&args.config_file);
    let missing_default = args.config_file == DEFAULT_CONFIG_FILE
        && !std::path::Path::new(DEFAULT_CONFIG_FILE).exists();
    let config = match config_result {
        Ok(conf) => conf.merge(&mut args.opt_config),
        Err(_) if missing_default => Config::from(&mut args.opt_config),
        Err(err) => {
            eprintln!(
                "Failed to read configuration file {} with error: {err:#}",
                args.config_file
            );
            std::process::exit(1);
        }
    };

    init_telemetry(config.otlp_endpoint(), config.console)?;
    debug!(
        address = %config.address,
        port = config.port,
        converter = %config.converter,
        whisper_enabled = config.whisper_enabled,
        "Resolved configuration"
    );

    let strategy = match ConversionStrategy::from_config(&config.converter, &config.ffmpeg_path) {
        Ok(strategy) => strategy,
        Err(err) => exit_err!(1, "{err:#}"),
    };
    let converter = AudioConverter::new(strategy);
    info!(strategy = ?converter.strategy(), "Audio conversion strategy");

    let engines = EngineChain::new(build_engines(&config)?);
    if engines.is_empty() {
        warn!("No transcription engine is available, every request will fail");
    } else {
        info!(engines = ?engines.engine_names(), "Transcription engines in priority order");
    }

    let state = AppState {
        converter: Arc::new(converter),
        engines: Arc::new(engines),
        scratch_dir: config.scratch_dir(),
    };

    let router = api::router(state, config.max_upload_bytes);
    let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    info!(
        "Supported features: avx: {}, neon: {}, simd128: {}, f16c: {}",
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    shutdown_telemetry();
    Ok(())
}

/// Engines in priority order: local Whisper first, Google second.
fn build_engines(config: &Config) -> Result<Vec<Arc<dyn SpeechEngine>>> {
    let mut engines: Vec<Arc<dyn SpeechEngine>> = Vec::new();

    match WhisperLoader::new(&config.whisper_revision, &config.mel_filters_repo) {
        Ok(loader) => engines.push(Arc::new(WhisperEngine::new(
            Arc::new(ModelCache::new(loader)),
            config.whisper_enabled,
        ))),
        Err(err) => warn!("Whisper engine disabled: {err:#}"),
    }

    engines.push(Arc::new(GoogleSpeechEngine::new(
        &config.google_endpoint,
        config.google_api_key(),
        &config.default_locale,
        config.google_timeout(),
    )?));

    Ok(engines)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
