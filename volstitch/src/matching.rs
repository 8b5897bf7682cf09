//! Feature correspondence and robust model fitting.
//!
//! [`match_features`] pairs descriptors by the nearest / second-nearest
//! ratio test without any geometric check. [`fit`] then runs RANSAC over the
//! candidate pairs. A fit that cannot be established is reported as
//! `accepted = false` with an empty inlier list, never as an error.

use std::collections::HashMap;

use common::Buffer2;
use glam::DVec2;
use rayon::prelude::*;

use crate::error::Result;
use crate::features::{FeatureExtractor, FeatureSet};
use crate::model::{AffineModel2D, ModelKind};
use crate::ransac::{RansacConfig, RansacEstimator};

/// A pair of locations asserted to show the same structure.
///
/// `source` lies in the moving (back) image, `target` in the reference
/// (front) image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub source: DVec2,
    pub target: DVec2,
}

/// Why a robust fit was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitRejection {
    /// Fewer candidate correspondences than the model needs.
    TooFewCorrespondences,
    /// No random sample produced a usable model.
    NoModelFound,
    /// The best model did not reach the minimum inlier ratio.
    InsufficientInliers,
    /// The best model is singular or not finite.
    Degenerate,
    /// The fit parameters do not describe a usable RANSAC run.
    InvalidParameters,
}

impl std::fmt::Display for FitRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FitRejection::TooFewCorrespondences => "too few correspondences",
            FitRejection::NoModelFound => "no model found",
            FitRejection::InsufficientInliers => "insufficient inliers",
            FitRejection::Degenerate => "degenerate model",
            FitRejection::InvalidParameters => "invalid fit parameters",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct RobustFitResult {
    pub accepted: bool,
    pub model: AffineModel2D,
    pub inliers: Vec<Correspondence>,
    /// Number of candidate correspondences the fit started from.
    pub candidates: usize,
    pub rejection: Option<FitRejection>,
}

impl RobustFitResult {
    pub fn rejected(reason: FitRejection, candidates: usize) -> Self {
        Self {
            accepted: false,
            model: AffineModel2D::identity(),
            inliers: Vec::new(),
            candidates,
            rejection: Some(reason),
        }
    }

    pub fn inlier_count(&self) -> usize {
        self.inliers.len()
    }

    pub fn inlier_ratio(&self) -> f64 {
        if self.candidates == 0 {
            0.0
        } else {
            self.inliers.len() as f64 / self.candidates as f64
        }
    }
}

/// Parameters of one robust fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitParams {
    pub kind: ModelKind,
    pub max_iterations: usize,
    pub max_epsilon: f64,
    pub min_inlier_ratio: f64,
    pub seed: Option<u64>,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            kind: ModelKind::Affine,
            max_iterations: 1000,
            max_epsilon: 25.0,
            min_inlier_ratio: 0.05,
            seed: None,
        }
    }
}

impl FitParams {
    pub fn validate(&self) -> Result<()> {
        self.ransac_config().validate()
    }

    pub(crate) fn ransac_config(&self) -> RansacConfig {
        RansacConfig {
            max_iterations: self.max_iterations,
            max_epsilon: self.max_epsilon,
            min_inlier_ratio: self.min_inlier_ratio,
            seed: self.seed,
            ..Default::default()
        }
    }
}

/// Nearest / second-nearest ratio test from `a` (source) into `b` (target).
///
/// A pair is kept when `d1 < ratio * d2`. When several features of `a`
/// claim the same feature of `b`, all of those pairs are dropped.
pub fn match_features(a: &FeatureSet, b: &FeatureSet, ratio: f64) -> Vec<Correspondence> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let ratio_sq = (ratio * ratio) as f32;
    let targets = b.as_slice();

    let nearest: Vec<Option<(usize, usize)>> = a
        .as_slice()
        .par_iter()
        .enumerate()
        .map(|(ia, fa)| {
            let mut best = f32::INFINITY;
            let mut second = f32::INFINITY;
            let mut best_idx = 0;
            for (ib, fb) in targets.iter().enumerate() {
                let d = fa.distance_squared(fb);
                if d < best {
                    second = best;
                    best = d;
                    best_idx = ib;
                } else if d < second {
                    second = d;
                }
            }
            // squared distances, so compare against ratio^2
            (best < ratio_sq * second || second == f32::INFINITY).then_some((ia, best_idx))
        })
        .collect();

    let mut claims: HashMap<usize, usize> = HashMap::new();
    for &(_, ib) in nearest.iter().flatten() {
        *claims.entry(ib).or_insert(0) += 1;
    }

    let sources = a.as_slice();
    nearest
        .into_iter()
        .flatten()
        .filter(|(_, ib)| claims.get(ib).copied() == Some(1))
        .map(|(ia, ib)| Correspondence {
            source: sources[ia].location,
            target: targets[ib].location,
        })
        .collect()
}

/// Robustly fit a model to `correspondences`.
pub fn fit(correspondences: &[Correspondence], params: &FitParams) -> RobustFitResult {
    let candidates = correspondences.len();
    if candidates < params.kind.min_points() {
        return RobustFitResult::rejected(FitRejection::TooFewCorrespondences, candidates);
    }

    let source: Vec<DVec2> = correspondences.iter().map(|c| c.source).collect();
    let target: Vec<DVec2> = correspondences.iter().map(|c| c.target).collect();

    let config = params.ransac_config();
    if config.validate().is_err() {
        return RobustFitResult::rejected(FitRejection::InvalidParameters, candidates);
    }
    let estimator = RansacEstimator::new(config);

    let Some(result) = estimator.estimate(&source, &target, params.kind) else {
        return RobustFitResult::rejected(FitRejection::NoModelFound, candidates);
    };

    if !result.model.is_valid() {
        return RobustFitResult::rejected(FitRejection::Degenerate, candidates);
    }

    if result.inliers.len() < params.kind.min_points()
        || result.inlier_ratio < params.min_inlier_ratio
    {
        return RobustFitResult::rejected(FitRejection::InsufficientInliers, candidates);
    }

    RobustFitResult {
        accepted: true,
        model: result.model,
        inliers: result.inliers.iter().map(|&i| correspondences[i]).collect(),
        candidates,
        rejection: None,
    }
}

/// Extraction, matching and fitting bundled with their parameters.
pub struct FeatureMatchService {
    extractor: Box<dyn FeatureExtractor>,
    ratio: f64,
    params: FitParams,
}

impl FeatureMatchService {
    pub fn new(extractor: Box<dyn FeatureExtractor>, ratio: f64, params: FitParams) -> Self {
        Self {
            extractor,
            ratio,
            params,
        }
    }

    pub fn params(&self) -> &FitParams {
        &self.params
    }

    pub fn extract(&self, image: &Buffer2<f32>) -> FeatureSet {
        self.extractor.extract(image)
    }

    /// Features of all `images` accumulated into one set.
    pub fn extract_all(&self, images: &[Buffer2<f32>]) -> FeatureSet {
        let sets: Vec<FeatureSet> = images.par_iter().map(|img| self.extract(img)).collect();
        let mut all = FeatureSet::new();
        for set in sets {
            all.append(set);
        }
        all
    }

    pub fn match_sets(&self, source: &FeatureSet, target: &FeatureSet) -> Vec<Correspondence> {
        match_features(source, target, self.ratio)
    }

    pub fn fit(&self, correspondences: &[Correspondence]) -> RobustFitResult {
        fit(correspondences, &self.params)
    }

    /// Match `source` into `target` and fit.
    pub fn register(&self, source: &FeatureSet, target: &FeatureSet) -> RobustFitResult {
        let correspondences = self.match_sets(source, target);
        self.fit(&correspondences)
    }
}
