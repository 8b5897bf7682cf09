//! Run configuration and job files.

use std::path::{Path, PathBuf};

use common::SerdeFormat;
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::features::PatchExtractorConfig;
use crate::fusion::{BlendFuser, BlendMethod};
use crate::matching::FitParams;
use crate::model::ModelKind;
use crate::orientation::StitchingAxis;

/// How the overlap depth is searched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapStrategy {
    /// Score every slice inside the search window.
    #[default]
    Exhaustive,
    /// Coarse-to-fine over projected groups of slices.
    Recursive,
}

/// Options of one stitching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub stitching_axis: StitchingAxis,
    pub overlap_strategy: OverlapStrategy,
    /// Groups per level of the recursive search.
    pub branch_factor: usize,
    /// Upper bound of the exhaustive search window, in slices.
    pub exhaustive_window: usize,
    /// Passes of the Z, X, Y registration loop.
    pub iterations: usize,
    /// Slices per maximum-intensity projection in cross-section registration.
    pub projection_step: usize,
    pub model_kind: ModelKind,
    /// Nearest / second-nearest descriptor distance ratio.
    pub ratio: f64,
    pub ransac_max_epsilon: f64,
    pub ransac_min_inlier_ratio: f64,
    pub ransac_max_iterations: usize,
    pub ransac_seed: Option<u64>,
    /// Run the iterative rotation loop. When off only the final z fit runs.
    pub register_3d: bool,
    /// Half-width of the final overlap search around the iterative estimate.
    pub refine_radius: usize,
    pub blend: BlendMethod,
    pub blend_alpha: f64,
    pub extractor: PatchExtractorConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stitching_axis: StitchingAxis::FrontBack,
            overlap_strategy: OverlapStrategy::Exhaustive,
            branch_factor: 5,
            exhaustive_window: 100,
            iterations: 2,
            projection_step: 50,
            model_kind: ModelKind::Affine,
            ratio: 0.92,
            ransac_max_epsilon: 25.0,
            ransac_min_inlier_ratio: 0.05,
            ransac_max_iterations: 1000,
            ransac_seed: None,
            register_3d: true,
            refine_radius: 250,
            blend: BlendMethod::Linear,
            blend_alpha: 1.5,
            extractor: PatchExtractorConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("iterations", self.iterations),
            ("branch_factor", self.branch_factor),
            ("exhaustive_window", self.exhaustive_window),
            ("projection_step", self.projection_step),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if !(self.ratio > 0.0 && self.ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "ratio must be in (0, 1], got {}",
                self.ratio
            )));
        }
        self.fit_params().validate()?;
        if !(self.blend_alpha >= 0.0 && self.blend_alpha.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "blend_alpha must be non-negative, got {}",
                self.blend_alpha
            )));
        }
        self.extractor.validate()
    }

    pub fn fit_params(&self) -> FitParams {
        FitParams {
            kind: self.model_kind,
            max_iterations: self.ransac_max_iterations,
            max_epsilon: self.ransac_max_epsilon,
            min_inlier_ratio: self.ransac_min_inlier_ratio,
            seed: self.ransac_seed,
        }
    }

    pub fn fuser(&self) -> BlendFuser {
        BlendFuser::new(self.blend, self.blend_alpha)
    }
}

/// Extra channel fused with the final model of the primary pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPaths {
    pub front: PathBuf,
    pub back: PathBuf,
    pub output: PathBuf,
}

/// Input and output files plus run options, read from YAML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchJob {
    pub front: PathBuf,
    pub back: PathBuf,
    pub output: PathBuf,
    /// Volumes used for registration in place of `front` / `back`.
    #[serde(default)]
    pub guide_front: Option<PathBuf>,
    #[serde(default)]
    pub guide_back: Option<PathBuf>,
    #[serde(default)]
    pub channels: Vec<ChannelPaths>,
    /// Physical voxel size `[x, y, z]` of every input.
    #[serde(default = "unit_spacing")]
    pub spacing: [f64; 3],
    /// Where to write the run diagnostics, format chosen by extension.
    #[serde(default)]
    pub diagnostics: Option<PathBuf>,
    #[serde(default)]
    pub config: RunConfig,
}

fn unit_spacing() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

impl StitchJob {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let format = SerdeFormat::from_file_name(&path.to_string_lossy())?;
        let job: StitchJob = format.deserialize(&text)?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<()> {
        if self.guide_front.is_some() != self.guide_back.is_some() {
            return Err(Error::InvalidConfig(
                "guide_front and guide_back must be given together".into(),
            ));
        }
        if !self.spacing.iter().all(|s| *s > 0.0 && s.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "spacing must be positive, got {:?}",
                self.spacing
            )));
        }
        self.config.validate()
    }

    pub fn spacing(&self) -> DVec3 {
        DVec3::from_array(self.spacing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::test_output_path;

    #[test]
    fn test_defaults_validate() {
        let c = RunConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.iterations, 2);
        assert_eq!(c.projection_step, 50);
        assert_eq!(c.fit_params().max_iterations, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_and_ratios() {
        let bad = [
            RunConfig {
                iterations: 0,
                ..Default::default()
            },
            RunConfig {
                branch_factor: 0,
                ..Default::default()
            },
            RunConfig {
                ratio: 1.5,
                ..Default::default()
            },
            RunConfig {
                ransac_min_inlier_ratio: 0.0,
                ..Default::default()
            },
            RunConfig {
                ransac_max_iterations: 0,
                ..Default::default()
            },
            RunConfig {
                ransac_max_epsilon: 0.0,
                ..Default::default()
            },
        ];
        for c in bad {
            assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))), "{c:?}");
        }
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "
front: a.tif
back: b.tif
output: out.tif
spacing: [0.5, 0.5, 2.0]
config:
  iterations: 1
  overlap_strategy: recursive
  stitching_axis: left_right
";
        let job: StitchJob = SerdeFormat::Yaml.deserialize(yaml).unwrap();
        assert_eq!(job.config.iterations, 1);
        assert_eq!(job.config.overlap_strategy, OverlapStrategy::Recursive);
        assert_eq!(job.config.stitching_axis, StitchingAxis::LeftRight);
        assert_eq!(job.config.branch_factor, 5);
        assert_eq!(job.spacing(), DVec3::new(0.5, 0.5, 2.0));
        assert!(job.channels.is_empty());
    }

    #[test]
    fn test_load_json_job() {
        let job = StitchJob {
            front: "f.tif".into(),
            back: "b.tif".into(),
            output: "o.tif".into(),
            guide_front: None,
            guide_back: None,
            channels: vec![],
            spacing: unit_spacing(),
            diagnostics: None,
            config: RunConfig::default(),
        };
        let path = test_output_path("job.json");
        std::fs::write(&path, SerdeFormat::Json.serialize(&job).unwrap()).unwrap();
        assert_eq!(StitchJob::load(&path).unwrap(), job);
    }

    #[test]
    fn test_unpaired_guide_is_rejected() {
        let yaml = "
front: a.tif
back: b.tif
output: out.tif
guide_front: g.tif
";
        let job: StitchJob = SerdeFormat::Yaml.deserialize(yaml).unwrap();
        assert!(job.validate().is_err());
    }
}
