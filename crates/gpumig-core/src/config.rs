//! Configuration system for gpumig.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GPUMIG_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gpumig/config.toml
//!   3. ~/.config/gpumig/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub chunking: ChunkingConfig,
    pub memory: MemoryConfig,
    pub protocol: ProtocolConfig,
}

/// Chunk capacities for chunkable resource types.
///
/// Chunking is invisible on the wire, so source and destination may use
/// different values. Larger chunks mean fewer device round trips and more
/// resident buffer memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Max bytes of local memory staged per save/load call.
    pub lmem_chunk_bytes: u64,
    /// Max bytes of CCS metadata staged per save/load call.
    pub ccs_chunk_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Cap on live transfer buffer bytes. 0 = unlimited.
    pub buffer_budget_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Reject device state that arrives before a validated descriptor.
    pub require_descriptor_first: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Default local-memory chunk: 4 MiB.
pub const DEFAULT_LMEM_CHUNK_BYTES: u64 = 4 * 1024 * 1024;

/// Default CCS metadata chunk: 16 KiB, describing 4 MiB of data.
pub const DEFAULT_CCS_CHUNK_BYTES: u64 = 16 * 1024;

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            lmem_chunk_bytes: DEFAULT_LMEM_CHUNK_BYTES,
            ccs_chunk_bytes: DEFAULT_CCS_CHUNK_BYTES,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            require_descriptor_first: true,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("gpumig")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MigrationConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MigrationConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GPUMIG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MigrationConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the stream cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.lmem_chunk_bytes == 0 {
            return Err(ConfigError::Invalid("chunking.lmem_chunk_bytes must be non-zero"));
        }
        if self.chunking.ccs_chunk_bytes == 0 {
            return Err(ConfigError::Invalid("chunking.ccs_chunk_bytes must be non-zero"));
        }
        Ok(())
    }

    /// Apply GPUMIG_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("GPUMIG_CHUNKING__LMEM_CHUNK_BYTES") {
            if let Ok(n) = v.parse() {
                self.chunking.lmem_chunk_bytes = n;
            }
        }
        if let Some(v) = var("GPUMIG_CHUNKING__CCS_CHUNK_BYTES") {
            if let Ok(n) = v.parse() {
                self.chunking.ccs_chunk_bytes = n;
            }
        }
        if let Some(v) = var("GPUMIG_MEMORY__BUFFER_BUDGET_BYTES") {
            if let Ok(n) = v.parse() {
                self.memory.buffer_budget_bytes = n;
            }
        }
        if let Some(v) = var("GPUMIG_PROTOCOL__REQUIRE_DESCRIPTOR_FIRST") {
            self.protocol.require_descriptor_first = v == "true" || v == "1";
        }
    }
}
