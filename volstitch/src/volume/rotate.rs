//! Discrete 90° reorientation of volumes.
//!
//! A quarter-turn rotation is a signed axis permutation, so reorienting a
//! volume is a pure relabeling of voxels without interpolation. Where a row
//! of the rotation flips an axis, the new index is offset by `extent - 1`
//! so that all indices stay non-negative.

use glam::DVec3;
use rayon::prelude::*;

use super::Volume;
use crate::error::{Error, Result};
use crate::model::AffineModel3D;
use crate::volume::Axis;

/// Right-handed rotation by a multiple of 90° about one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscreteRotation {
    /// Row-major signed permutation matrix.
    matrix: [[i32; 3]; 3],
}

impl DiscreteRotation {
    pub fn identity() -> Self {
        Self {
            matrix: [[1, 0, 0], [0, 1, 0], [0, 0, 1]],
        }
    }

    pub fn new(axis: Axis, degrees: i32) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(Error::InvalidConfig(format!(
                "discrete rotation must be a multiple of 90 degrees, got {degrees}"
            )));
        }
        let (s, c) = match degrees.rem_euclid(360) / 90 {
            0 => (0, 1),
            1 => (1, 0),
            2 => (0, -1),
            _ => (-1, 0),
        };
        let matrix = match axis {
            Axis::X => [[1, 0, 0], [0, c, -s], [0, s, c]],
            Axis::Y => [[c, 0, s], [0, 1, 0], [-s, 0, c]],
            Axis::Z => [[c, -s, 0], [s, c, 0], [0, 0, 1]],
        };
        Ok(Self { matrix })
    }

    pub fn inverse(&self) -> Self {
        let m = self.matrix;
        Self {
            matrix: [
                [m[0][0], m[1][0], m[2][0]],
                [m[0][1], m[1][1], m[2][1]],
                [m[0][2], m[1][2], m[2][2]],
            ],
        }
    }

    /// Source axis feeding output axis `row`, and whether it is flipped.
    #[inline]
    fn source_of(&self, row: usize) -> (usize, bool) {
        let r = self.matrix[row];
        let col = r.iter().position(|&v| v != 0).unwrap_or(row);
        (col, r[col] < 0)
    }

    pub fn output_dims(&self, dims: (usize, usize, usize)) -> (usize, usize, usize) {
        let ext = [dims.0, dims.1, dims.2];
        let (a, _) = self.source_of(0);
        let (b, _) = self.source_of(1);
        let (c, _) = self.source_of(2);
        (ext[a], ext[b], ext[c])
    }

    /// Calibration follows the same permutation, with magnitudes kept positive.
    pub fn output_spacing(&self, spacing: DVec3) -> DVec3 {
        let s = spacing.to_array();
        let (a, _) = self.source_of(0);
        let (b, _) = self.source_of(1);
        let (c, _) = self.source_of(2);
        DVec3::new(s[a], s[b], s[c])
    }

    /// Index offsets that keep flipped axes non-negative.
    fn offsets(&self, dims: (usize, usize, usize)) -> [i64; 3] {
        let ext = [dims.0 as i64, dims.1 as i64, dims.2 as i64];
        let mut off = [0i64; 3];
        for (row, o) in off.iter_mut().enumerate() {
            let (col, flipped) = self.source_of(row);
            if flipped {
                *o = (ext[col] - 1).max(0);
            }
        }
        off
    }

    /// The voxel relabeling as a continuous map, in units of the x pitch.
    ///
    /// `relative_spacing` is the source volume's spacing divided by its x pitch.
    pub fn to_model(&self, dims: (usize, usize, usize), relative_spacing: DVec3) -> AffineModel3D {
        let off = self.offsets(dims);
        let pitch = relative_spacing.to_array();
        let mut rows = [[0.0f64; 4]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for j in 0..3 {
                row[j] = self.matrix[i][j] as f64;
            }
            let (col, _) = self.source_of(i);
            row[3] = off[i] as f64 * pitch[col];
        }
        AffineModel3D::from_rows(rows)
    }

    pub fn apply(&self, volume: &Volume) -> Volume {
        let dims = volume.dims();
        let (ow, oh, od) = self.output_dims(dims);
        let off = self.offsets(dims);
        let m = self.matrix;
        let mut data = vec![0.0f32; ow * oh * od];

        if !data.is_empty() {
            data.par_chunks_mut(ow * oh)
                .enumerate()
                .for_each(|(z, chunk): (usize, &mut [f32])| {
                    let qz = z as i64 - off[2];
                    for y in 0..oh {
                        let qy = y as i64 - off[1];
                        for x in 0..ow {
                            let qx = x as i64 - off[0];
                            // transpose maps output back to source
                            let sx = m[0][0] as i64 * qx + m[1][0] as i64 * qy + m[2][0] as i64 * qz;
                            let sy = m[0][1] as i64 * qx + m[1][1] as i64 * qy + m[2][1] as i64 * qz;
                            let sz = m[0][2] as i64 * qx + m[1][2] as i64 * qy + m[2][2] as i64 * qz;
                            chunk[y * ow + x] = volume.get(sx as usize, sy as usize, sz as usize);
                        }
                    }
                });
        }

        Volume::new(
            ow,
            oh,
            od,
            volume.kind(),
            self.output_spacing(volume.spacing()),
            data,
        )
    }
}

/// Rotate `volume` by `degrees` (a multiple of 90) about `axis`.
pub fn rotate_discrete(volume: &Volume, axis: Axis, degrees: i32) -> Result<Volume> {
    Ok(DiscreteRotation::new(axis, degrees)?.apply(volume))
}
