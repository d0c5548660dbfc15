//! SPL profile - which FEL writes make up the SPL image.
//!
//! The chunk table and SoC identity depend on the boot ROM and the FEL
//! tool version that produced the capture, so they are loaded from TOML
//! rather than baked into the decoder. [`SplProfile::default`] matches the
//! sun5i boot ROM.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::constants::{DEFAULT_SPL_CHUNKS, DEFAULT_SPL_SOC_ID, DEFAULT_SPL_THUNK_ADDR};

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("cannot access profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse profile: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize profile: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// One tracked write: where it lands and how large it may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplChunk {
    pub address: u32,
    pub max_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplProfile {
    /// SoC id the FEL version reply must report.
    pub soc_id: u32,
    /// Address of the thunk whose execution ends the upload.
    pub thunk_address: u32,
    /// Tracked writes, in upload order.
    pub chunks: Vec<SplChunk>,
}

impl Default for SplProfile {
    fn default() -> Self {
        Self {
            soc_id: DEFAULT_SPL_SOC_ID,
            thunk_address: DEFAULT_SPL_THUNK_ADDR,
            chunks: DEFAULT_SPL_CHUNKS
                .iter()
                .map(|&(address, max_length)| SplChunk {
                    address,
                    max_length,
                })
                .collect(),
        }
    }
}

impl SplProfile {
    /// Load a profile from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save the profile to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ProfileError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ProfileError> {
        let profile: SplProfile = toml::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn to_toml_string(&self) -> Result<String, ProfileError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.chunks.is_empty() {
            return Err(ProfileError::Invalid("chunk table is empty".into()));
        }
        if let Some(i) = self.chunks.iter().position(|c| c.max_length == 0) {
            let message = format!("chunk {i} has zero max_length");
            return Err(ProfileError::Invalid(message));
        }
        Ok(())
    }
}
