use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap_serde_derive::ClapSerde;

#[derive(ClapSerde, Debug, Clone)]
pub struct Config {
    /// The address the listener binds to
    #[default("0.0.0.0".to_string())]
    #[arg(short, long, env)]
    pub(crate) address: String,

    /// The port the listener binds to
    #[default(5000)]
    #[arg(short, long, env)]
    pub(crate) port: u16,

    /// Maximum accepted request body size in bytes
    #[default(100 * 1024 * 1024)]
    #[arg(long, env)]
    pub(crate) max_upload_bytes: usize,

    /// OTLP collector endpoint, traces and metrics are only exported when set
    #[arg(long, env)]
    pub(crate) otlp_endpoint: String,

    /// Always log to the console, even when exporting over OTLP
    #[arg(long, env)]
    pub(crate) console: bool,

    /// Conversion strategy: auto, ffmpeg or in-process
    #[default("auto".to_string())]
    #[arg(long, env)]
    pub(crate) converter: String,

    /// Program used by the ffmpeg conversion strategy
    #[default("ffmpeg".to_string())]
    #[arg(long, env)]
    pub(crate) ffmpeg_path: String,

    /// Enables the local Whisper engine
    #[default(true)]
    #[arg(long, env)]
    pub(crate) whisper_enabled: bool,

    /// Revision of the Whisper model repositories
    #[default("main".to_string())]
    #[arg(long, env)]
    pub(crate) whisper_revision: String,

    /// Repository holding the mel filter bank
    #[default("FL33TW00D-HF/whisper-base".to_string())]
    #[arg(long, env)]
    pub(crate) mel_filters_repo: String,

    /// API key for Google Speech-to-Text, the cloud engine is disabled when empty
    #[arg(long, env)]
    pub(crate) google_api_key: String,

    /// Google Speech-to-Text recognize endpoint
    #[default(crate::inference::engines::google::DEFAULT_ENDPOINT.to_string())]
    #[arg(long, env)]
    pub(crate) google_endpoint: String,

    /// Timeout for a single cloud recognition request in seconds
    #[default(30)]
    #[arg(long, env)]
    pub(crate) google_timeout_secs: u64,

    /// Locale sent to the cloud engine when the request asks for auto-detection
    #[default("uz-UZ".to_string())]
    #[arg(long, env)]
    pub(crate) default_locale: String,

    /// Directory for per-request scratch files, defaults to the system temp dir
    #[arg(long, env)]
    pub(crate) scratch_dir: String,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<Self> {
        let str = std::fs::read_to_string(path)?;
        let opt: <Config as ClapSerde>::Opt = toml::from_str(&str)?;
        Ok(Config::from(opt))
    }

    pub fn otlp_endpoint(&self) -> Option<&str> {
        non_empty(&self.otlp_endpoint)
    }

    pub fn google_api_key(&self) -> Option<&str> {
        non_empty(&self.google_api_key)
    }

    pub fn google_timeout(&self) -> Duration {
        Duration::from_secs(self.google_timeout_secs)
    }

    pub fn scratch_dir(&self) -> Option<PathBuf> {
        non_empty(&self.scratch_dir).map(PathBuf::from)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let config = Config::default();

        assert_eq!(config.port, 5000);
        assert_eq!(config.max_upload_bytes, 104_857_600);
        assert_eq!(config.converter, "auto");
        assert_eq!(config.default_locale, "uz-UZ");
        assert_eq!(
            config.google_endpoint,
            "https://speech.googleapis.com/v1/speech:recognize"
        );
        assert!(config.whisper_enabled);
        assert!(config.google_api_key().is_none());
        assert!(config.otlp_endpoint().is_none());
        assert!(config.scratch_dir().is_none());
    }

    #[test]
    fn toml_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = 8080\ngoogle_api_key = \"secret\"\nconverter = \"in-process\""
        )
        .unwrap();

        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.google_api_key(), Some("secret"));
        assert_eq!(config.converter, "in-process");
        assert_eq!(config.address, "0.0.0.0");
    }

    #[test]
    fn blank_strings_are_treated_as_unset() {
        let config = Config {
            google_api_key: "   ".into(),
            ..Config::default()
        };

        assert!(config.google_api_key().is_none());
    }
}
