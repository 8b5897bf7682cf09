//! Fusion of positioned volumes into one output volume.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::volume::Volume;

/// How overlapping voxels are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMethod {
    /// Plain mean of all covering voxels.
    Average,
    /// Brightest covering voxel.
    Max,
    /// Darkest covering voxel.
    Min,
    /// Mean weighted by distance to each volume's border, raised to `alpha`.
    #[default]
    Linear,
    /// Later volumes replace earlier ones.
    Overwrite,
}

/// A volume placed at a non-negative voxel offset in the output frame.
#[derive(Debug, Clone, Copy)]
pub struct PositionedVolume<'a> {
    pub volume: &'a Volume,
    pub offset: [usize; 3],
}

impl<'a> PositionedVolume<'a> {
    pub fn new(volume: &'a Volume, offset: [usize; 3]) -> Self {
        Self { volume, offset }
    }

    fn end(&self) -> [usize; 3] {
        let (w, h, d) = self.volume.dims();
        [self.offset[0] + w, self.offset[1] + h, self.offset[2] + d]
    }

    /// Local coordinate of output position `p`, if covered.
    #[inline]
    fn local(&self, p: [usize; 3]) -> Option<[usize; 3]> {
        let end = self.end();
        let mut local = [0; 3];
        for d in 0..3 {
            if p[d] < self.offset[d] || p[d] >= end[d] {
                return None;
            }
            local[d] = p[d] - self.offset[d];
        }
        Some(local)
    }
}

/// Combines positioned volumes into the volume spanning all of them.
pub trait Fuser: Send + Sync {
    fn fuse(&self, inputs: &[PositionedVolume<'_>]) -> Result<Volume>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendFuser {
    pub method: BlendMethod,
    pub alpha: f64,
}

impl Default for BlendFuser {
    fn default() -> Self {
        Self {
            method: BlendMethod::Linear,
            alpha: 1.5,
        }
    }
}

impl BlendFuser {
    pub fn new(method: BlendMethod, alpha: f64) -> Self {
        Self { method, alpha }
    }

    fn border_weight(&self, local: [usize; 3], dims: (usize, usize, usize)) -> f64 {
        let ext = [dims.0, dims.1, dims.2];
        let mut w = 1.0;
        for d in 0..3 {
            let to_border = local[d].min(ext[d] - 1 - local[d]) + 1;
            w *= (to_border as f64).powf(self.alpha);
        }
        w
    }

    fn blend_voxel(&self, inputs: &[PositionedVolume<'_>], p: [usize; 3]) -> f32 {
        let covering = inputs.iter().filter_map(|pv| {
            pv.local(p)
                .map(|l| (pv, l, pv.volume.get(l[0], l[1], l[2])))
        });

        match self.method {
            BlendMethod::Average => {
                let (sum, n) = covering.fold((0.0f64, 0usize), |(s, n), (_, _, v)| (s + v as f64, n + 1));
                if n == 0 {
                    0.0
                } else {
                    (sum / n as f64) as f32
                }
            }
            BlendMethod::Max => covering.map(|(_, _, v)| v).reduce(f32::max).unwrap_or(0.0),
            BlendMethod::Min => covering.map(|(_, _, v)| v).reduce(f32::min).unwrap_or(0.0),
            BlendMethod::Overwrite => covering.last().map(|(_, _, v)| v).unwrap_or(0.0),
            BlendMethod::Linear => {
                let (sum, weight) = covering.fold((0.0f64, 0.0f64), |(s, ws), (pv, l, v)| {
                    let w = self.border_weight(l, pv.volume.dims());
                    (s + w * v as f64, ws + w)
                });
                if weight > 0.0 {
                    (sum / weight) as f32
                } else {
                    0.0
                }
            }
        }
    }
}

impl Fuser for BlendFuser {
    fn fuse(&self, inputs: &[PositionedVolume<'_>]) -> Result<Volume> {
        let first = inputs.first().ok_or(Error::MissingVolume {
            role: "fusion input",
        })?;

        let mut extent = [0usize; 3];
        for pv in inputs {
            let end = pv.end();
            for d in 0..3 {
                extent[d] = extent[d].max(end[d]);
            }
        }
        let [w, h, d] = extent;

        let mut out = Volume::zeros(w, h, d, first.volume.kind(), first.volume.spacing());
        if !out.is_empty() {
            out.data_mut()
                .par_chunks_mut(w * h)
                .enumerate()
                .for_each(|(z, slice)| {
                    for y in 0..h {
                        for x in 0..w {
                            slice[y * w + x] = self.blend_voxel(inputs, [x, y, z]);
                        }
                    }
                });
        }
        Ok(out)
    }
}
