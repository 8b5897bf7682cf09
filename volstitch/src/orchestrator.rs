//! The iterative Z/X/Y registration loop and the final fusion.

use std::time::Instant;

use glam::DVec2;
use tracing::{debug, info, warn};

use crate::composer::{Model3DComposer, X_VIEW, Y_VIEW};
use crate::config::{OverlapStrategy, RunConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::features::{FeatureExtractor, PatchExtractor};
use crate::fusion::{Fuser, PositionedVolume};
use crate::matching::{FeatureMatchService, RobustFitResult};
use crate::model::{AffineModel2D, AffineModel3D};
use crate::overlap::{
    find_overlap_exhaustive, find_overlap_recursive, OverlapEstimate, ScoreCurve,
};
use crate::registrar::register_cross_section;
use crate::resample::resample_affine;
use crate::volume::rotate::DiscreteRotation;
use crate::volume::{Axis, Volume};

/// Final overlap searches starting below this slice start at the first one.
const MIN_REFINE_START: usize = 10;

const AXIS_ORDER: [Axis; 3] = [Axis::Z, Axis::X, Axis::Y];

/// Volumes of one run. Front and back are required.
#[derive(Debug, Clone, Default)]
pub struct StitchInputs {
    pub front: Option<Volume>,
    pub back: Option<Volume>,
    /// Registration runs on these instead of front / back when present.
    pub guide: Option<(Volume, Volume)>,
    /// Extra `(front, back)` pairs fused with the final model.
    pub channels: Vec<(Volume, Volume)>,
}

impl StitchInputs {
    pub fn new(front: Volume, back: Volume) -> Self {
        Self {
            front: Some(front),
            back: Some(back),
            ..Default::default()
        }
    }

    pub fn with_guide(mut self, front: Volume, back: Volume) -> Self {
        self.guide = Some((front, back));
        self
    }

    pub fn with_channel(mut self, front: Volume, back: Volume) -> Self {
        self.channels.push((front, back));
        self
    }
}

#[derive(Debug, Clone)]
pub struct StitchOutput {
    pub fused: Volume,
    pub channels: Vec<Volume>,
    /// Maps back coordinates onto front coordinates, in the stitching frame.
    pub model: AffineModel3D,
    pub overlap: usize,
    pub diagnostics: Diagnostics,
}

/// Result of registering a back volume against a front volume.
#[derive(Debug, Clone)]
pub struct Registration {
    pub model: AffineModel3D,
    pub overlap: usize,
}

pub struct Stitcher {
    config: RunConfig,
    service: FeatureMatchService,
    fuser: Box<dyn Fuser>,
}

impl Stitcher {
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let service = FeatureMatchService::new(
            Box::new(PatchExtractor::new(config.extractor.clone())),
            config.ratio,
            config.fit_params(),
        );
        let fuser = Box::new(config.fuser());
        Ok(Self {
            config,
            service,
            fuser,
        })
    }

    pub fn with_extractor(mut self, extractor: Box<dyn FeatureExtractor>) -> Self {
        self.service = FeatureMatchService::new(extractor, self.config.ratio, self.config.fit_params());
        self
    }

    pub fn with_fuser(mut self, fuser: Box<dyn Fuser>) -> Self {
        self.fuser = fuser;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Register, resample and fuse. Inputs are given in their acquisition
    /// orientation; outputs are returned in the same orientation.
    pub fn run(&self, inputs: StitchInputs) -> Result<StitchOutput> {
        let started = Instant::now();
        let StitchInputs {
            front,
            back,
            guide,
            channels,
        } = inputs;

        let front = front
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingVolume { role: "front" })?;
        let back = back
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingVolume { role: "back" })?;
        if let Some((gf, gb)) = &guide {
            check_dims(&front, gf)?;
            check_dims(&back, gb)?;
        }
        for (cf, cb) in &channels {
            check_dims(&front, cf)?;
            check_dims(&back, cb)?;
        }

        let axis = self.config.stitching_axis;
        let front = axis.orient(&front)?;
        let back = axis.orient(&back)?;
        let guide = match &guide {
            Some((gf, gb)) => Some((axis.orient(gf)?, axis.orient(gb)?)),
            None => None,
        };
        let (reg_front, reg_back) = match &guide {
            Some((gf, gb)) => (gf, gb),
            None => (&front, &back),
        };
        info!(
            front = ?front.dims(),
            back = ?back.dims(),
            ?axis,
            guided = guide.is_some(),
            "Starting stitching run"
        );

        let mut diagnostics = Diagnostics::default();
        let Registration { model, overlap } = self.register(reg_front, reg_back, &mut diagnostics)?;
        let offset = [0, 0, front.depth() - overlap];

        let fused = self.fuse_pair(&front, &back, &model, offset)?;
        let fused = axis.restore(&fused)?.clamp_to_kind();

        let mut fused_channels = Vec::with_capacity(channels.len());
        for (i, (cf, cb)) in channels.iter().enumerate() {
            debug!(channel = i, "Fusing channel");
            let cf = axis.orient(cf)?;
            let cb = axis.orient(cb)?;
            let f = self.fuse_pair(&cf, &cb, &model, offset)?;
            fused_channels.push(axis.restore(&f)?.clamp_to_kind());
        }

        diagnostics.set_duration(started.elapsed());
        info!(
            overlap,
            "Stitching finished in {:.2}s", diagnostics.duration_secs
        );

        Ok(StitchOutput {
            fused,
            channels: fused_channels,
            model,
            overlap,
            diagnostics,
        })
    }

    /// Estimate the cumulative model and the final overlap of `back` against
    /// `front`, both already oriented so that `back` continues along +z.
    pub fn register(
        &self,
        front: &Volume,
        back: &Volume,
        diagnostics: &mut Diagnostics,
    ) -> Result<Registration> {
        let limit = front.depth().min(back.depth());
        if limit == 0 {
            return Err(Error::MissingVolume {
                role: if front.depth() == 0 { "front" } else { "back" },
            });
        }
        if self.config.register_3d
            && self.config.overlap_strategy == OverlapStrategy::Exhaustive
            && self.config.exhaustive_window > limit
        {
            return Err(Error::OverlapExceedsDepth {
                overlap: self.config.exhaustive_window,
                depth: limit,
            });
        }

        let composer = Model3DComposer::for_volume(back)?;
        let mut model = AffineModel3D::identity();
        let mut estimate = limit;

        if self.config.register_3d {
            for iteration in 1..=self.config.iterations {
                // One overlap estimate per pass, shared by the Z, X and Y fits.
                let mut moved = resample_affine(back, &model)?;
                let est = self.estimate_overlap(front, &moved)?;
                estimate = est.overlap;
                info!(overlap = estimate, "STEP {iteration}: overlap size");

                for axis in AXIS_ORDER {
                    info!("STEP {iteration}: BEST {axis} ROTATION");
                    if axis != Axis::Z {
                        moved = resample_affine(back, &model)?;
                    }
                    let fit = self.fit_axis(axis, front, &moved, estimate)?;
                    model = self.fold(&composer, &model, axis, &fit, back);
                    info!("Cumulative model after {axis}:\n{model}");

                    let curve = match axis {
                        Axis::Z => est.curve.clone(),
                        _ => ScoreCurve::default(),
                    };
                    diagnostics.record_step(iteration, axis, estimate, &curve, &fit, &model);
                }
            }
        }

        // Final z refinement around the iterative estimate.
        let (start, end) = if self.config.register_3d {
            let r = self.config.refine_radius;
            let mut start = estimate.saturating_sub(r).max(1);
            if start < MIN_REFINE_START {
                start = 1;
            }
            (start, (estimate + r).min(limit))
        } else {
            (1, limit)
        };
        info!("FINAL STEP: overlap search in [{start}, {end}]");
        let moved = resample_affine(back, &model)?;
        let est = find_overlap_exhaustive(&self.service, front, &moved, start, end)?;
        let overlap = est.overlap;
        if est.curve.is_ambiguous() {
            warn!(overlap, "Final overlap curve has a tied maximum");
        }

        let step = self.config.projection_step.min(overlap);
        let fit = register_cross_section(
            &self.service,
            &front.trailing(overlap),
            &moved.leading(overlap),
            step,
        );
        model = self.fold(&composer, &model, Axis::Z, &fit, back);
        info!(overlap, "Final model:\n{model}");
        diagnostics.record_final(overlap, &est.curve, &fit, &model);

        Ok(Registration { model, overlap })
    }

    fn estimate_overlap(&self, front: &Volume, back: &Volume) -> Result<OverlapEstimate> {
        match self.config.overlap_strategy {
            OverlapStrategy::Exhaustive => {
                let end = self.config.exhaustive_window.min(back.depth());
                find_overlap_exhaustive(&self.service, front, back, 1, end)
            }
            OverlapStrategy::Recursive => {
                let mut est = find_overlap_recursive(&self.service, front, back, self.config.branch_factor)?;
                est.overlap = est.overlap.min(front.depth());
                Ok(est)
            }
        }
    }

    /// Cross-section fit of the overlap region in the view belonging to `axis`.
    fn fit_axis(
        &self,
        axis: Axis,
        front: &Volume,
        moved: &Volume,
        overlap: usize,
    ) -> Result<RobustFitResult> {
        let front_sub = front.trailing(overlap);
        let back_sub = moved.leading(overlap);
        let step = self.config.projection_step;
        let fit = match view_rotation(axis)? {
            Some(rotation) => register_cross_section(
                &self.service,
                &rotation.apply(&front_sub),
                &rotation.apply(&back_sub),
                step,
            ),
            None => register_cross_section(&self.service, &front_sub, &back_sub, step),
        };
        Ok(fit)
    }

    /// Fold an accepted fit into `model`; a rejected fit leaves it unchanged.
    fn fold(
        &self,
        composer: &Model3DComposer,
        model: &AffineModel3D,
        axis: Axis,
        fit: &RobustFitResult,
        back: &Volume,
    ) -> AffineModel3D {
        if !fit.accepted {
            let reason = fit
                .rejection
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".into());
            warn!(axis = %axis, candidates = fit.candidates, "Fit rejected: {reason}; axis skipped");
            return *model;
        }
        let m = fit.model.rescaled(view_pitch(axis, back));
        let (z, x, y): (Option<&AffineModel2D>, Option<&AffineModel2D>, Option<&AffineModel2D>) =
            match axis {
                Axis::Z => (Some(&m), None, None),
                Axis::X => (None, Some(&m), None),
                Axis::Y => (None, None, Some(&m)),
            };
        composer.compose(model, z, x, y)
    }

    fn fuse_pair(
        &self,
        front: &Volume,
        back: &Volume,
        model: &AffineModel3D,
        offset: [usize; 3],
    ) -> Result<Volume> {
        let moved = resample_affine(back, model)?;
        self.fuser.fuse(&[
            PositionedVolume::new(front, [0, 0, 0]),
            PositionedVolume::new(&moved, offset),
        ])
    }
}

fn check_dims(primary: &Volume, other: &Volume) -> Result<()> {
    if primary.dims() != other.dims() {
        return Err(Error::DimensionMismatch {
            expected: primary.dims(),
            actual: other.dims(),
        });
    }
    Ok(())
}

fn view_rotation(axis: Axis) -> Result<Option<DiscreteRotation>> {
    let (about, degrees) = match axis {
        Axis::Z => return Ok(None),
        Axis::X => X_VIEW,
        Axis::Y => Y_VIEW,
    };
    Ok(Some(DiscreteRotation::new(about, degrees)?))
}

/// Pixel pitch of the view's x and y axes, in units of the volume's x pitch.
fn view_pitch(axis: Axis, volume: &Volume) -> DVec2 {
    let rel = volume.relative_spacing();
    match axis {
        Axis::Z => DVec2::new(rel.x, rel.y),
        Axis::X => DVec2::new(rel.z, rel.y),
        Axis::Y => DVec2::new(rel.x, rel.z),
    }
}
