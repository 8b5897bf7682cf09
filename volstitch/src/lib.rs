//! Volstitch - stitching of overlapping 3D image volumes.
//!
//! Two volumes that continue each other along one axis are aligned and fused:
//! - overlap depth search (exhaustive sweep or coarse-to-fine)
//! - per-axis cross-section registration by feature matching and RANSAC
//! - composition of the per-axis estimates into one 3D affine model
//! - affine resampling of the back volume and blended fusion
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use volstitch::{load_tiff_volume, RunConfig, StitchInputs, Stitcher};
//!
//! let front = load_tiff_volume("front.tif")?;
//! let back = load_tiff_volume("back.tif")?;
//!
//! let stitcher = Stitcher::new(RunConfig::default())?;
//! let output = stitcher.run(StitchInputs::new(front, back))?;
//!
//! println!("Overlap: {} slices", output.overlap);
//! ```

pub mod composer;
pub mod config;
pub mod diagnostics;
mod error;
pub mod features;
pub mod fusion;
pub mod io;
pub mod matching;
pub mod model;
pub mod orchestrator;
pub mod orientation;
pub mod overlap;
pub(crate) mod ransac;
pub mod registrar;
pub mod resample;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Volumes and models
// ============================================================================

pub use model::{AffineModel2D, AffineModel3D, ModelKind};
pub use resample::resample_affine;
pub use volume::rotate::DiscreteRotation;
pub use volume::{rotate_discrete, Axis, Volume, VoxelKind};

// ============================================================================
// Registration
// ============================================================================

pub use composer::Model3DComposer;
pub use features::{Feature, FeatureExtractor, FeatureSet, PatchExtractor, PatchExtractorConfig};
pub use matching::{
    match_features, Correspondence, FeatureMatchService, FitParams, FitRejection, RobustFitResult,
};
pub use overlap::{
    find_overlap_exhaustive, find_overlap_recursive, pick_best, OverlapEstimate, ScoreCurve,
};
pub use registrar::register_cross_section;

// ============================================================================
// Pipeline
// ============================================================================

pub use config::{ChannelPaths, OverlapStrategy, RunConfig, StitchJob};
pub use diagnostics::{AxisStep, Diagnostics, FitSummary};
pub use error::{Error, Result};
pub use fusion::{BlendFuser, BlendMethod, Fuser, PositionedVolume};
pub use io::{load_tiff_volume, save_tiff_volume};
pub use orchestrator::{Registration, StitchInputs, StitchOutput, Stitcher};
pub use orientation::StitchingAxis;
