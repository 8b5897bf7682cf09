//! Registration of two overlapping sub-volumes through their cross-sections.

use tracing::{debug, info};

use crate::matching::{FeatureMatchService, RobustFitResult};
use crate::volume::Volume;

/// Fit the 2D model mapping `back` cross-sections onto `front` ones.
///
/// With `projection_step > 1` each sub-volume is first reduced to
/// `ceil(depth / step)` maximum-intensity projections. Features from all
/// projected slices of a side are pooled, so correspondences are sought
/// across the whole region at once. A step larger than the sub-volume depth
/// collapses it into a single projection.
pub fn register_cross_section(
    service: &FeatureMatchService,
    front: &Volume,
    back: &Volume,
    projection_step: usize,
) -> RobustFitResult {
    let front_sections = project(front, projection_step);
    let back_sections = project(back, projection_step);

    let front_features = service.extract_all(&front_sections);
    let back_features = service.extract_all(&back_sections);
    debug!(
        front_sections = front_sections.len(),
        back_sections = back_sections.len(),
        front_features = front_features.len(),
        back_features = back_features.len(),
        "Extracted cross-section features"
    );

    let correspondences = service.match_sets(&back_features, &front_features);
    info!("{} matching features", correspondences.len());

    let result = service.fit(&correspondences);
    if result.accepted {
        let t = result.model.translation_components();
        info!(
            inliers = result.inlier_count(),
            "Rotation {:.3}°, translation ({:.2}, {:.2})",
            result.model.rotation_degrees(),
            t.x,
            t.y
        );
    }
    result
}

fn project(volume: &Volume, step: usize) -> Vec<common::Buffer2<f32>> {
    if volume.depth() == 0 {
        return Vec::new();
    }
    let step = step.clamp(1, volume.depth());
    volume.project(step)
}
