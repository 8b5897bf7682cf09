//! RANSAC (Random Sample Consensus) for robust cross-section model fitting.
//!
//! 1. Randomly sample minimal point sets
//! 2. Estimate a candidate model from the sample
//! 3. Count inliers (points within `max_epsilon`)
//! 4. Locally refine promising hypotheses on their inliers (LO-RANSAC)
//! 5. Refine the best model with least squares on all its inliers


mod estimators;

use glam::DVec2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};
use crate::model::{AffineModel2D, ModelKind};

pub(crate) use estimators::estimate_model;

/// RANSAC configuration.
#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Inlier distance threshold in pixels.
    pub max_epsilon: f64,
    /// Target confidence for early termination.
    pub confidence: f64,
    /// Minimum inlier ratio for adaptive early termination.
    pub min_inlier_ratio: f64,
    /// Random seed for reproducibility (None for random).
    pub seed: Option<u64>,
    /// Enable Local Optimization (LO-RANSAC).
    pub use_local_optimization: bool,
    /// Maximum iterations for local optimization step.
    pub lo_max_iterations: usize,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            max_epsilon: 25.0,
            confidence: 0.995,
            min_inlier_ratio: 0.05,
            seed: None,
            use_local_optimization: true,
            lo_max_iterations: 10,
        }
    }
}

impl RansacConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "RANSAC max_iterations must be positive".into(),
            ));
        }
        if !(self.max_epsilon > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "RANSAC max_epsilon must be positive, got {}",
                self.max_epsilon
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidConfig(format!(
                "RANSAC confidence must be in [0, 1], got {}",
                self.confidence
            )));
        }
        if !(self.min_inlier_ratio > 0.0 && self.min_inlier_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "RANSAC min_inlier_ratio must be in (0, 1], got {}",
                self.min_inlier_ratio
            )));
        }
        Ok(())
    }
}

/// Result of RANSAC estimation.
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Best model found.
    pub model: AffineModel2D,
    /// Indices of inlier correspondences.
    pub inliers: Vec<usize>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Final inlier ratio.
    pub inlier_ratio: f64,
}

/// RANSAC estimator for robust model fitting.
pub struct RansacEstimator {
    config: RansacConfig,
}

impl RansacEstimator {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    /// Estimate a model mapping `source` points onto `target` points.
    ///
    /// Returns `None` if there are fewer points than the model needs or no
    /// sample produced a non-degenerate model.
    pub fn estimate(
        &self,
        source: &[DVec2],
        target: &[DVec2],
        kind: ModelKind,
    ) -> Option<RansacResult> {
        debug_assert_eq!(source.len(), target.len());
        let n = source.len();
        let min_samples = kind.min_points();

        if n < min_samples {
            return None;
        }

        let mut rng: ChaCha8Rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };

        let mut best_model: Option<AffineModel2D> = None;
        let mut best_inliers: Vec<usize> = Vec::new();

        let mut sample_indices: Vec<usize> = Vec::with_capacity(min_samples);
        let mut sample_source: Vec<DVec2> = Vec::with_capacity(min_samples);
        let mut sample_target: Vec<DVec2> = Vec::with_capacity(min_samples);

        let mut iterations = 0;
        let max_iter = self.config.max_iterations;

        while iterations < max_iter {
            iterations += 1;

            random_sample_into(&mut rng, n, min_samples, &mut sample_indices);

            sample_source.clear();
            sample_target.clear();
            for &i in &sample_indices {
                sample_source.push(source[i]);
                sample_target.push(target[i]);
            }

            let model = match estimate_model(&sample_source, &sample_target, kind) {
                Some(m) => m,
                None => continue,
            };

            let mut inliers = count_inliers(source, target, &model, self.config.max_epsilon);
            let mut current = model;

            if self.config.use_local_optimization && inliers.len() >= min_samples {
                let (lo_model, lo_inliers) =
                    self.local_optimization(source, target, &current, inliers, kind);
                current = lo_model;
                inliers = lo_inliers;
            }

            if inliers.len() > best_inliers.len() {
                best_inliers = inliers;
                best_model = Some(current);

                let inlier_ratio = best_inliers.len() as f64 / n as f64;
                if inlier_ratio >= self.config.min_inlier_ratio {
                    let adaptive_max =
                        adaptive_iterations(inlier_ratio, min_samples, self.config.confidence);
                    if iterations >= adaptive_max {
                        break;
                    }
                }
            }
        }

        let model = best_model?;
        if best_inliers.len() < min_samples {
            return None;
        }

        let inlier_source: Vec<DVec2> = best_inliers.iter().map(|&i| source[i]).collect();
        let inlier_target: Vec<DVec2> = best_inliers.iter().map(|&i| target[i]).collect();
        let refined = estimate_model(&inlier_source, &inlier_target, kind).unwrap_or(model);

        // Keep the refined model only if it does not lose support.
        let refined_inliers = count_inliers(source, target, &refined, self.config.max_epsilon);
        let (model, inliers) = if refined_inliers.len() >= best_inliers.len() {
            (refined, refined_inliers)
        } else {
            (model, best_inliers)
        };

        let inlier_ratio = inliers.len() as f64 / n as f64;
        Some(RansacResult {
            model,
            inliers,
            iterations,
            inlier_ratio,
        })
    }

    /// Re-estimate on the current inliers until the inlier set stops growing.
    fn local_optimization(
        &self,
        source: &[DVec2],
        target: &[DVec2],
        initial_model: &AffineModel2D,
        initial_inliers: Vec<usize>,
        kind: ModelKind,
    ) -> (AffineModel2D, Vec<usize>) {
        let min_samples = kind.min_points();
        let mut current_model = *initial_model;
        let mut current_inliers = initial_inliers;

        for _ in 0..self.config.lo_max_iterations {
            if current_inliers.len() < min_samples {
                break;
            }

            let inlier_source: Vec<DVec2> = current_inliers.iter().map(|&i| source[i]).collect();
            let inlier_target: Vec<DVec2> = current_inliers.iter().map(|&i| target[i]).collect();

            let refined = match estimate_model(&inlier_source, &inlier_target, kind) {
                Some(m) => m,
                None => break,
            };

            let new_inliers = count_inliers(source, target, &refined, self.config.max_epsilon);
            if new_inliers.len() <= current_inliers.len() {
                break;
            }

            current_model = refined;
            current_inliers = new_inliers;
        }

        (current_model, current_inliers)
    }
}

/// Draw `k` distinct indices from `0..n` into `buffer`.
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    buffer.clear();

    if k <= n / 2 {
        // Floyd's algorithm for sampling without replacement
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}

/// Indices of correspondences whose residual is below `threshold`.
fn count_inliers(
    source: &[DVec2],
    target: &[DVec2],
    model: &AffineModel2D,
    threshold: f64,
) -> Vec<usize> {
    let threshold_sq = threshold * threshold;
    source
        .iter()
        .zip(target)
        .enumerate()
        .filter(|(_, (s, t))| (model.apply(**s) - **t).length_squared() < threshold_sq)
        .map(|(i, _)| i)
        .collect()
}

/// Iteration count after which a model with this inlier ratio is found
/// with probability `confidence`.
pub(crate) fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 || inlier_ratio >= 1.0 {
        return 1;
    }

    // N = log(1 - confidence) / log(1 - w^n)
    let w_n = inlier_ratio.powi(sample_size as i32);
    if w_n >= 1.0 {
        return 1;
    }

    let log_conf = (1.0 - confidence).ln();
    let log_outlier = (1.0 - w_n).ln();

    if log_outlier >= 0.0 {
        return 1000;
    }

    (log_conf / log_outlier).ceil() as usize
}
