//! Lattice engine configuration
//!
//! Loaded from TOML, with defaults matching the built-in constants.

use crate::constants::{kernel, lattice};
use crate::error::{DeformError, DeformResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine-wide settings for the dispatcher and devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    /// Capacity of the shared upload buffer, in control points
    pub max_handles: u32,
    /// Group size reported by the host reference device
    pub workgroup_size: u32,
    /// Sampling quality given to newly created targets
    pub default_high_quality: bool,
    /// Emit a debug summary after every dispatch stage
    pub log_frame_stats: bool,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            max_handles: lattice::DEFAULT_MAX_HANDLES,
            workgroup_size: kernel::DEFAULT_WORKGROUP_SIZE,
            default_high_quality: false,
            log_frame_stats: false,
        }
    }
}

impl LatticeConfig {
    /// Parse and validate a config from TOML text
    pub fn from_toml_str(source: &str) -> DeformResult<Self> {
        let config: LatticeConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> DeformResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        log::debug!(
            "[Lattice Config] Loading config from {}",
            path.as_ref().display()
        );
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> DeformResult<()> {
        let min_handles = (lattice::MIN_RESOLUTION as u32).pow(3);
        if self.max_handles < min_handles {
            return Err(DeformError::InvalidConfig {
                field: "max_handles".to_string(),
                reason: format!(
                    "{} cannot hold a single {}x{}x{} lattice",
                    self.max_handles,
                    lattice::MIN_RESOLUTION,
                    lattice::MIN_RESOLUTION,
                    lattice::MIN_RESOLUTION
                ),
            });
        }
        if self.workgroup_size == 0 {
            return Err(DeformError::InvalidConfig {
                field: "workgroup_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Size in bytes of the shared upload buffer
    pub fn upload_buffer_size(&self) -> u64 {
        self.max_handles as u64 * lattice::HANDLE_STRIDE_BYTES
    }
}
