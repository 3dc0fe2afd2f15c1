//! JSON configuration for the correction pipelines.

use std::{fs, path::Path};

use lenscorrect_align::{AlignParams, BlockMatcherParams};
use lenscorrect_core::{Interpolation, DEFAULT_MESH_RESOLUTION};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn default_mesh_resolution() -> usize {
    DEFAULT_MESH_RESOLUTION
}

/// Settings shared by `apply-split` and `apply-channels`.
///
/// Every field has a default, so `{}` is a valid config file. Command-line
/// flags override what is loaded here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Mesh cells across the source width.
    #[serde(default = "default_mesh_resolution")]
    pub mesh_resolution: usize,
    #[serde(default)]
    pub interpolation: Interpolation,
    /// Fit a residual correction per channel after applying calibrations.
    #[serde(default)]
    pub align: bool,
    /// Border removed from every side of an `apply-channels` rendering.
    #[serde(default)]
    pub crop_width: usize,
    #[serde(default)]
    pub alignment: AlignParams,
    #[serde(default)]
    pub block_matcher: BlockMatcherParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mesh_resolution: default_mesh_resolution(),
            interpolation: Interpolation::default(),
            align: false,
            crop_width: 0,
            alignment: AlignParams::default(),
            block_matcher: BlockMatcherParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lenscorrect_align::CorrectionModel;

    #[test]
    fn empty_object_is_default() {
        let cfg: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.mesh_resolution, 128);
        assert_eq!(cfg.interpolation, Interpolation::Bilinear);
        assert_eq!(cfg.alignment.ransac.min_num_inliers, 10);
        assert_eq!(cfg.alignment.matching.rod, 0.92);
    }

    #[test]
    fn nested_overrides() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{
                "interpolation": "cubic",
                "align": true,
                "alignment": { "model": "rigid", "ransac": { "max_epsilon": 2.0 } },
                "block_matcher": { "step": 24 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.interpolation, Interpolation::Bicubic);
        assert!(cfg.align);
        assert_eq!(cfg.alignment.model, CorrectionModel::Rigid);
        assert_eq!(cfg.alignment.ransac.max_epsilon, 2.0);
        assert_eq!(cfg.alignment.ransac.iterations, 1000);
        assert_eq!(cfg.block_matcher.step, 24);
        assert_eq!(cfg.block_matcher.patch_radius, 8);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let cfg = PipelineConfig {
            crop_width: 6,
            mesh_resolution: 32,
            ..PipelineConfig::default()
        };
        cfg.write_json(&path).unwrap();
        assert_eq!(PipelineConfig::load_json(&path).unwrap(), cfg);
    }

    #[test]
    fn unreadable_file_is_io_error() {
        let err = PipelineConfig::load_json("/nonexistent/pipeline.json").unwrap_err();
        assert!(matches!(err, ConfigIoError::Io(_)));
    }
}
