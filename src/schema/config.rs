//! Configuration for checkpoint sessions.

use serde::{Deserialize, Serialize};

use crate::container::CompressionType;

/// Characters that may not appear in a configured file suffix.
const FORBIDDEN_SUFFIX_CHARS: [char; 3] = ['.', '/', ':'];

/// Checkpoint session configuration.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Suffix of the per-frame binary container files (without the dot).
    pub binary_suffix: String,
    /// Suffix of the XDMF mirror documents (without the dot).
    pub mirror_suffix: String,
    /// Compression applied to every dataset.
    pub compression: CompressionType,
    /// Write `<base>_<NNNN>.<mirror>` next to every binary frame.
    pub standalone_mirror: bool,
    /// Append every saved frame to the running `<base>.<mirror>` collection.
    pub temporal_collection: bool,
    /// Close the collection document with its wrapper elements. Turn off to
    /// leave it open-ended for a later resumed run.
    pub emit_collection_terminator: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            binary_suffix: "pcf".to_string(),
            mirror_suffix: "xdmf".to_string(),
            compression: CompressionType::default_for_build(),
            standalone_mirror: true,
            temporal_collection: true,
            emit_collection_terminator: true,
        }
    }
}

impl CheckpointConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for suffix in [&self.binary_suffix, &self.mirror_suffix] {
            if suffix.is_empty() || suffix.contains(FORBIDDEN_SUFFIX_CHARS) {
                return Err(ConfigError::InvalidSuffix {
                    suffix: suffix.clone(),
                });
            }
        }
        if self.binary_suffix == self.mirror_suffix {
            return Err(ConfigError::SuffixCollision(self.binary_suffix.clone()));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File suffix {suffix:?} must be non-empty and contain no '.', '/' or ':'")]
    InvalidSuffix { suffix: String },
    #[error("Binary and mirror files would share the suffix {0:?}")]
    SuffixCollision(String),
}
