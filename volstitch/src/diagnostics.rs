//! Per-run record of overlap curves, accepted models and matrix snapshots.

use std::path::Path;
use std::time::Duration;

use common::SerdeFormat;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::matching::RobustFitResult;
use crate::model::AffineModel3D;
use crate::overlap::ScoreCurve;
use crate::volume::Axis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub accepted: bool,
    pub rotation_degrees: f64,
    pub translation: [f64; 2],
    pub inliers: usize,
    pub candidates: usize,
    pub rejection: Option<String>,
}

impl From<&RobustFitResult> for FitSummary {
    fn from(fit: &RobustFitResult) -> Self {
        let t = fit.model.translation_components();
        Self {
            accepted: fit.accepted,
            rotation_degrees: fit.model.rotation_degrees(),
            translation: [t.x, t.y],
            inliers: fit.inlier_count(),
            candidates: fit.candidates,
            rejection: fit.rejection.map(|r| r.to_string()),
        }
    }
}

/// One axis registration inside the iterative loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisStep {
    /// 1-based pass number.
    pub iteration: usize,
    pub axis: Axis,
    pub overlap: usize,
    /// `(candidate, inliers)` of the pass's overlap search; empty on the X and
    /// Y steps, which reuse the Z step's estimate.
    pub curve: Vec<(usize, usize)>,
    pub fit: FitSummary,
    /// Cumulative model after this step.
    pub matrix: [[f64; 4]; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub steps: Vec<AxisStep>,
    pub final_overlap: usize,
    pub final_curve: Vec<(usize, usize)>,
    pub final_fit: Option<FitSummary>,
    pub final_matrix: Option<[[f64; 4]; 3]>,
    pub duration_secs: f64,
}

impl Diagnostics {
    pub(crate) fn record_step(
        &mut self,
        iteration: usize,
        axis: Axis,
        overlap: usize,
        curve: &ScoreCurve,
        fit: &RobustFitResult,
        model: &AffineModel3D,
    ) {
        self.steps.push(AxisStep {
            iteration,
            axis,
            overlap,
            curve: curve.points().to_vec(),
            fit: fit.into(),
            matrix: model.rows(),
        });
    }

    pub(crate) fn record_final(
        &mut self,
        overlap: usize,
        curve: &ScoreCurve,
        fit: &RobustFitResult,
        model: &AffineModel3D,
    ) {
        self.final_overlap = overlap;
        self.final_curve = curve.points().to_vec();
        self.final_fit = Some(fit.into());
        self.final_matrix = Some(model.rows());
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    pub fn accepted_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.fit.accepted).count()
    }

    /// Write as YAML or JSON, chosen by the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let format = SerdeFormat::from_file_name(&path.to_string_lossy())?;
        let text = format.serialize(self)?;
        std::fs::write(path, text).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::FitRejection;
    use common::test_utils::test_output_path;

    #[test]
    fn test_record_and_save() {
        let mut d = Diagnostics::default();
        let curve = ScoreCurve::new(vec![(1, 3), (2, 8)]);
        let rejected = RobustFitResult::rejected(FitRejection::NoModelFound, 12);
        d.record_step(1, Axis::X, 2, &curve, &rejected, &AffineModel3D::identity());
        d.set_duration(Duration::from_millis(1500));

        assert_eq!(d.accepted_steps(), 0);
        assert_eq!(d.steps[0].fit.candidates, 12);
        assert!(d.steps[0].fit.rejection.is_some());
        assert_eq!(d.duration_secs, 1.5);

        let path = test_output_path("diagnostics.yaml");
        d.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let back: Diagnostics = SerdeFormat::Yaml.deserialize(&text).unwrap();
        assert_eq!(back, d);
    }
}
