use crate::error::InvalidArgument;
use crate::segments::SegmentPartition;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_SEGMENTS: usize = 16;
pub const DEFAULT_SEGMENT_LENGTH: usize = 32;
pub const DEFAULT_CONTRIBUTIONS: usize = 20_000;
pub const DEFAULT_MAX_SPAN: usize = 3;
pub const DEFAULT_SEED: u64 = 0x5eed;

/// Matrix storage used for an assembly run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Ndarray,
    Faer,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ndarray => "ndarray",
            Self::Faer => "faer",
        })
    }
}

/// Locking strategy for an assembly run. `None` forces a serial run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locking {
    Mutex,
    None,
}

impl Default for Locking {
    fn default() -> Self {
        if cfg!(feature = "parallel") {
            Self::Mutex
        } else {
            Self::None
        }
    }
}

impl fmt::Display for Locking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mutex => "mutex",
            Self::None => "none",
        })
    }
}

/// Everything an assembly run needs. Stored as TOML.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Explicit segment lengths; when present they replace the uniform split.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_lengths: Option<Vec<usize>>,
    pub segments: usize,
    pub segment_length: usize,
    /// Requested lock count; absent means one lock per segment pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locks: Option<usize>,
    pub contributions: usize,
    /// Most consecutive segments a single contribution may touch.
    pub max_span: usize,
    /// Worker threads; absent means one per logical CPU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    pub seed: u64,
    pub backend: Backend,
    pub locking: Locking,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            segment_lengths: None,
            segments: DEFAULT_SEGMENTS,
            segment_length: DEFAULT_SEGMENT_LENGTH,
            locks: None,
            contributions: DEFAULT_CONTRIBUTIONS,
            max_span: DEFAULT_MAX_SPAN,
            threads: None,
            seed: DEFAULT_SEED,
            backend: Backend::default(),
            locking: Locking::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid segment layout: {0}")]
    Partition(#[from] InvalidArgument),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl AssemblyConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn partition(&self) -> Result<SegmentPartition, InvalidArgument> {
        match &self.segment_lengths {
            Some(lengths) => SegmentPartition::from_lengths(lengths),
            None => SegmentPartition::uniform(self.segments, self.segment_length),
        }
    }

    pub fn worker_threads(&self) -> usize {
        match self.locking {
            Locking::None => 1,
            Locking::Mutex => self.threads.unwrap_or_else(num_cpus::get),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let partition = self.partition()?;
        if partition.dim() == 0 {
            return Err(ConfigError::Invalid(
                "the segments must cover at least one index".into(),
            ));
        }
        if self.max_span == 0 {
            return Err(ConfigError::Invalid("max_span must be at least 1".into()));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.locking == Locking::Mutex && !cfg!(feature = "parallel") {
            return Err(ConfigError::Invalid(
                "mutex locking needs a build with the `parallel` feature".into(),
            ));
        }
        Ok(())
    }
}
