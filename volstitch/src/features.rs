//! Feature extraction from 2D cross-sections.
//!
//! Registration only needs located descriptors that can be compared by
//! Euclidean distance. [`FeatureExtractor`] is the seam; [`PatchExtractor`]
//! is the built-in implementation: intensity peaks found by non-maximum
//! suppression, described by their normalized surrounding patch.

use common::Buffer2;
use glam::DVec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A located descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub location: DVec2,
    pub descriptor: Vec<f32>,
}

impl Feature {
    #[inline]
    pub fn distance_squared(&self, other: &Feature) -> f32 {
        self.descriptor
            .iter()
            .zip(&other.descriptor)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

/// Features of one comparison unit, produced fresh for every comparison.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Append all features of `other`.
    pub fn append(&mut self, other: FeatureSet) {
        self.features.extend(other.features);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn as_slice(&self) -> &[Feature] {
        &self.features
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

/// Extracts located descriptors from a 2D image.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &Buffer2<f32>) -> FeatureSet;
}

/// Configuration for [`PatchExtractor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchExtractorConfig {
    /// Descriptor patch is `(2r + 1)^2` pixels.
    pub patch_radius: usize,
    /// Peaks must be strict maxima within this radius.
    pub nms_radius: usize,
    /// Peaks below `mean + min_contrast * stddev` are ignored.
    pub min_contrast: f32,
    /// Strongest peaks kept per image.
    pub max_features: usize,
}

impl Default for PatchExtractorConfig {
    fn default() -> Self {
        Self {
            patch_radius: 3,
            nms_radius: 2,
            min_contrast: 0.5,
            max_features: 4000,
        }
    }
}

impl PatchExtractorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.patch_radius == 0 {
            return Err(Error::InvalidConfig(
                "extractor patch_radius must be positive".into(),
            ));
        }
        if self.nms_radius == 0 {
            return Err(Error::InvalidConfig(
                "extractor nms_radius must be positive".into(),
            ));
        }
        if self.max_features == 0 {
            return Err(Error::InvalidConfig(
                "extractor max_features must be positive".into(),
            ));
        }
        if !self.min_contrast.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "extractor min_contrast must be finite, got {}",
                self.min_contrast
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatchExtractor {
    config: PatchExtractorConfig,
}

impl PatchExtractor {
    pub fn new(config: PatchExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatchExtractorConfig {
        &self.config
    }

    fn is_peak(&self, image: &Buffer2<f32>, x: usize, y: usize, v: f32) -> bool {
        let r = self.config.nms_radius;
        for ny in y - r..=y + r {
            let row = image.row(ny);
            for (nx, &n) in row.iter().enumerate().take(x + r + 1).skip(x - r) {
                if (nx != x || ny != y) && n >= v {
                    return false;
                }
            }
        }
        true
    }

    fn describe(&self, image: &Buffer2<f32>, x: usize, y: usize) -> Option<Vec<f32>> {
        let r = self.config.patch_radius;
        let mut patch = Vec::with_capacity((2 * r + 1) * (2 * r + 1));
        for ny in y - r..=y + r {
            patch.extend_from_slice(&image.row(ny)[x - r..=x + r]);
        }
        let mean = patch.iter().sum::<f32>() / patch.len() as f32;
        let mut norm = 0.0f32;
        for v in patch.iter_mut() {
            *v -= mean;
            norm += *v * *v;
        }
        let norm = norm.sqrt();
        if norm < 1e-12 {
            return None;
        }
        patch.iter_mut().for_each(|v| *v /= norm);
        Some(patch)
    }
}

impl FeatureExtractor for PatchExtractor {
    fn extract(&self, image: &Buffer2<f32>) -> FeatureSet {
        let border = self.config.patch_radius.max(self.config.nms_radius);
        let (width, height) = (image.width(), image.height());
        if width <= 2 * border || height <= 2 * border {
            return FeatureSet::new();
        }

        let n = image.len() as f64;
        let mean = image.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = image
            .iter()
            .map(|&v| (v as f64 - mean) * (v as f64 - mean))
            .sum::<f64>()
            / n;
        if var <= 0.0 {
            return FeatureSet::new();
        }
        let threshold = (mean + self.config.min_contrast as f64 * var.sqrt()) as f32;

        let mut peaks: Vec<(f32, usize, usize)> = (border..height - border)
            .into_par_iter()
            .flat_map_iter(|y| {
                let row = image.row(y);
                (border..width - border).filter_map(move |x| {
                    let v = row[x];
                    (v >= threshold && self.is_peak(image, x, y, v)).then_some((v, x, y))
                })
            })
            .collect();

        peaks.sort_by(|a, b| b.0.total_cmp(&a.0));
        peaks.truncate(self.config.max_features);

        peaks
            .into_iter()
            .filter_map(|(_, x, y)| {
                self.describe(image, x, y).map(|descriptor| Feature {
                    location: DVec2::new(x as f64, y as f64),
                    descriptor,
                })
            })
            .collect()
    }
}
