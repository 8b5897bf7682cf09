//! Closed-form model estimation from point correspondences.

use glam::DVec2;

use crate::model::{AffineModel2D, ModelKind};

/// Estimate a model of `kind` mapping `source` onto `target` (least squares).
pub(crate) fn estimate_model(
    source: &[DVec2],
    target: &[DVec2],
    kind: ModelKind,
) -> Option<AffineModel2D> {
    let model = match kind {
        ModelKind::Translation => estimate_translation(source, target),
        ModelKind::Rigid => estimate_rigid(source, target),
        ModelKind::Similarity => estimate_similarity(source, target),
        ModelKind::Affine => estimate_affine(source, target),
    }?;
    model.is_valid().then_some(model)
}

/// Average displacement.
fn estimate_translation(source: &[DVec2], target: &[DVec2]) -> Option<AffineModel2D> {
    if source.is_empty() {
        return None;
    }

    let mut d_sum = DVec2::ZERO;
    for (s, t) in source.iter().zip(target) {
        d_sum += *t - *s;
    }

    Some(AffineModel2D::translation(d_sum / source.len() as f64))
}

/// Rotation from the cross-covariance of centered points, scale fixed at 1.
fn estimate_rigid(source: &[DVec2], target: &[DVec2]) -> Option<AffineModel2D> {
    if source.len() < 2 {
        return None;
    }

    let src_centroid = centroid(source);
    let tar_centroid = centroid(target);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syx = 0.0;
    let mut syy = 0.0;
    for (s, t) in source.iter().zip(target) {
        let sc = *s - src_centroid;
        let tc = *t - tar_centroid;
        sxx += sc.x * tc.x;
        sxy += sc.x * tc.y;
        syx += sc.y * tc.x;
        syy += sc.y * tc.y;
    }

    let angle = (sxy - syx).atan2(sxx + syy);
    let (sin_a, cos_a) = angle.sin_cos();

    let t = DVec2::new(
        tar_centroid.x - (cos_a * src_centroid.x - sin_a * src_centroid.y),
        tar_centroid.y - (sin_a * src_centroid.x + cos_a * src_centroid.y),
    );

    Some(AffineModel2D::rigid(t, angle))
}

/// Translation + rotation + uniform scale.
fn estimate_similarity(source: &[DVec2], target: &[DVec2]) -> Option<AffineModel2D> {
    if source.len() < 2 {
        return None;
    }

    let src_centroid = centroid(source);
    let tar_centroid = centroid(target);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syx = 0.0;
    let mut syy = 0.0;
    let mut src_var = 0.0;

    for (s, t) in source.iter().zip(target) {
        let sc = *s - src_centroid;
        let tc = *t - tar_centroid;
        sxx += sc.x * tc.x;
        sxy += sc.x * tc.y;
        syx += sc.y * tc.x;
        syy += sc.y * tc.y;
        src_var += sc.length_squared();
    }

    if src_var < 1e-10 {
        return None;
    }

    let angle = (sxy - syx).atan2(sxx + syy);
    let (sin_a, cos_a) = angle.sin_cos();
    let scale = ((sxx + syy) * cos_a + (sxy - syx) * sin_a) / src_var;

    if scale <= 0.0 {
        return None;
    }

    let t = DVec2::new(
        tar_centroid.x - scale * (cos_a * src_centroid.x - sin_a * src_centroid.y),
        tar_centroid.y - scale * (sin_a * src_centroid.x + cos_a * src_centroid.y),
    );

    Some(AffineModel2D::similarity(t, angle, scale))
}

/// Full affine by least squares on the normal equations.
fn estimate_affine(source: &[DVec2], target: &[DVec2]) -> Option<AffineModel2D> {
    if source.len() < 3 {
        return None;
    }

    // Solve target = A * source + b for each target coordinate:
    // [sum_xx  sum_xy  sum_x ] [a]   [sum_x_tx]
    // [sum_xy  sum_yy  sum_y ] [b] = [sum_y_tx]
    // [sum_x   sum_y   n     ] [e]   [sum_tx  ]
    //
    // Points are centered first to keep the system well conditioned.
    let src_centroid = centroid(source);
    let tar_centroid = centroid(target);

    let n = source.len() as f64;
    let mut sum_xx = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_yy = 0.0;
    let mut sum_x_tx = 0.0;
    let mut sum_y_tx = 0.0;
    let mut sum_x_ty = 0.0;
    let mut sum_y_ty = 0.0;

    for (s, t) in source.iter().zip(target) {
        let s = *s - src_centroid;
        let t = *t - tar_centroid;
        sum_xx += s.x * s.x;
        sum_xy += s.x * s.y;
        sum_yy += s.y * s.y;
        sum_x_tx += s.x * t.x;
        sum_y_tx += s.y * t.x;
        sum_x_ty += s.x * t.y;
        sum_y_ty += s.y * t.y;
    }

    // With centered points sum_x = sum_y = 0 and the system decouples.
    let det = sum_xx * sum_yy - sum_xy * sum_xy;
    if det.abs() < 1e-10 * n * n {
        return None;
    }
    let inv_det = 1.0 / det;

    let a = (sum_yy * sum_x_tx - sum_xy * sum_y_tx) * inv_det;
    let b = (sum_xx * sum_y_tx - sum_xy * sum_x_tx) * inv_det;
    let c = (sum_yy * sum_x_ty - sum_xy * sum_y_ty) * inv_det;
    let d = (sum_xx * sum_y_ty - sum_xy * sum_x_ty) * inv_det;

    let e = tar_centroid.x - (a * src_centroid.x + b * src_centroid.y);
    let f = tar_centroid.y - (c * src_centroid.x + d * src_centroid.y);

    Some(AffineModel2D::from_rows([[a, b, e], [c, d, f]]))
}

pub(crate) fn centroid(points: &[DVec2]) -> DVec2 {
    if points.is_empty() {
        return DVec2::ZERO;
    }
    points.iter().copied().sum::<DVec2>() / points.len() as f64
}
