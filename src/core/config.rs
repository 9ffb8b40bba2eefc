//! Store configuration loaded from `harbor.toml` in the store root.
//!
//! A missing file is not an error: every field has a default. The batch
//! policies make the incremental construction behavior explicit instead of
//! leaving it to individual call sites.

use crate::core::error::HarborError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "harbor.toml";

/// One 1232-byte transaction packet.
pub const DEFAULT_MAX_WRITE_BYTES: usize = 1232;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarborConfig {
    pub limits: LimitsConfig,
    pub construction: ConstructionConfig,
    pub agreement: AgreementConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_write_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_write_bytes: DEFAULT_MAX_WRITE_BYTES,
        }
    }
}

/// What the construction protocol does with chains missing from the allow-list.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvalidChainPolicy {
    /// Exclude the chain from every phase and record a diagnostic.
    Drop,
    /// Refuse to plan the construction at all.
    Fail,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConstructionConfig {
    pub chain_batch_size: usize,
    pub account_batch_size: usize,
    pub max_skeleton_chains: usize,
    pub invalid_chains: InvalidChainPolicy,
    pub chain_batch_failure: BatchFailurePolicy,
    pub account_batch_failure: BatchFailurePolicy,
}

impl Default for ConstructionConfig {
    fn default() -> Self {
        Self {
            chain_batch_size: 4,
            account_batch_size: 5,
            max_skeleton_chains: 8,
            invalid_chains: InvalidChainPolicy::Drop,
            chain_batch_failure: BatchFailurePolicy::Continue,
            account_batch_failure: BatchFailurePolicy::Abort,
        }
    }
}

/// Whether an agreement that is still somebody's current adoption may be closed.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloseAdoptedPolicy {
    Blocked,
    AllowDangling,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgreementConfig {
    pub close_adopted: CloseAdoptedPolicy,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            close_adopted: CloseAdoptedPolicy::Blocked,
        }
    }
}

impl HarborConfig {
    pub fn validate(&self) -> Result<(), HarborError> {
        if self.limits.max_write_bytes == 0 {
            return Err(HarborError::Config(
                "limits.max_write_bytes must be greater than zero".to_string(),
            ));
        }
        let c = &self.construction;
        if c.chain_batch_size == 0 || c.account_batch_size == 0 {
            return Err(HarborError::Config(
                "construction batch sizes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

/// Load `harbor.toml` from the store root, falling back to defaults.
pub fn load_config(root: &Path) -> Result<HarborConfig, HarborError> {
    let path = config_path(root);
    if !path.exists() {
        return Ok(HarborConfig::default());
    }
    let content = fs::read_to_string(&path).map_err(HarborError::IoError)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<HarborConfig, HarborError> {
    let config: HarborConfig =
        toml::from_str(content).map_err(|e| HarborError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
