use std::fmt::Display;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ModelBase {
    /// The name of the model
    pub name: String,

    /// The license of the model
    pub license: String,

    /// The id of the model repository
    pub repo_id: String,

    /// The revision of the model repository
    pub repo_revision: String,
}

/// Whisper checkpoint sizes that can be requested per upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhisperSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl WhisperSize {
    pub fn repo_id(self) -> &'static str {
        match self {
            WhisperSize::Tiny => "openai/whisper-tiny",
            WhisperSize::Base => "openai/whisper-base",
            WhisperSize::Small => "openai/whisper-small",
            WhisperSize::Medium => "openai/whisper-medium",
            // large-v3 needs a 128 bin filter bank, v2 shares the 80 bin one
            WhisperSize::Large => "openai/whisper-large-v2",
        }
    }

    pub fn model_base(self, revision: &str) -> ModelBase {
        ModelBase {
            name: format!("Candle Whisper {self}"),
            license: "MIT".into(),
            repo_id: self.repo_id().into(),
            repo_revision: revision.into(),
        }
    }
}

impl FromStr for WhisperSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Ok(WhisperSize::Tiny),
            "base" => Ok(WhisperSize::Base),
            "small" => Ok(WhisperSize::Small),
            "medium" => Ok(WhisperSize::Medium),
            "large" | "large-v2" => Ok(WhisperSize::Large),
            other => bail!("Unknown Whisper model size {other}"),
        }
    }
}

impl Display for WhisperSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhisperSize::Tiny => write!(f, "tiny"),
            WhisperSize::Base => write!(f, "base"),
            WhisperSize::Small => write!(f, "small"),
            WhisperSize::Medium => write!(f, "medium"),
            WhisperSize::Large => write!(f, "large"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_parse_case_insensitively() {
        assert_eq!("Base".parse::<WhisperSize>().unwrap(), WhisperSize::Base);
        assert_eq!("large-v2".parse::<WhisperSize>().unwrap(), WhisperSize::Large);
        assert!("huge".parse::<WhisperSize>().is_err());
    }

    #[test]
    fn sizes_map_to_openai_checkpoints() {
        let base = WhisperSize::Small.model_base("main");

        assert_eq!(base.repo_id, "openai/whisper-small");
        assert_eq!(base.name, "Candle Whisper small");
    }
}
