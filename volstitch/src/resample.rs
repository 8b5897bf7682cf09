//! Continuous affine resampling of volumes.

use glam::DVec3;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::model::AffineModel3D;
use crate::volume::Volume;

/// Sample offsets closer than this to an integer are snapped onto the grid.
const GRID_SNAP: f64 = 1e-9;

/// Resample `volume` through `model` into a volume of the same dimensions.
///
/// `model` is expressed in units of the x pitch. It is conjugated with the
/// z-unscale `U = diag(1, sy/sx, sz/sx)` to voxel indices (`U^-1 * M * U`),
/// then every output voxel is filled by sampling the source at the inverse
/// image of its position. Samples outside the source read as zero.
pub fn resample_affine(volume: &Volume, model: &AffineModel3D) -> Result<Volume> {
    let unscale = AffineModel3D::scale(volume.relative_spacing());
    let rescale = unscale.inverse().ok_or(Error::SingularModel)?;
    let forward = rescale.concatenate(model).concatenate(&unscale);
    let inverse = forward.inverse().ok_or(Error::SingularModel)?;

    let (width, height, depth) = volume.dims();
    let mut data = vec![0.0f32; width * height * depth];
    if data.is_empty() {
        return Ok(volume.clone());
    }

    data.par_chunks_mut(width * height)
        .enumerate()
        .for_each(|(z, chunk): (usize, &mut [f32])| {
            for y in 0..height {
                for x in 0..width {
                    let src = inverse.apply(DVec3::new(x as f64, y as f64, z as f64));
                    chunk[y * width + x] = sample_trilinear(volume, src);
                }
            }
        });

    Ok(Volume::new(
        width,
        height,
        depth,
        volume.kind(),
        volume.spacing(),
        data,
    ))
}

#[inline]
fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < GRID_SNAP {
        r
    } else {
        v
    }
}

#[inline]
fn sample_voxel(volume: &Volume, x: i64, y: i64, z: i64) -> f32 {
    let (w, h, d) = volume.dims();
    if x < 0 || y < 0 || z < 0 || x >= w as i64 || y >= h as i64 || z >= d as i64 {
        0.0
    } else {
        volume.get(x as usize, y as usize, z as usize)
    }
}

/// Trilinear interpolation with a zero border.
pub fn sample_trilinear(volume: &Volume, p: DVec3) -> f32 {
    if !p.is_finite() {
        return 0.0;
    }
    let (px, py, pz) = (snap(p.x), snap(p.y), snap(p.z));
    let x0 = px.floor();
    let y0 = py.floor();
    let z0 = pz.floor();
    let fx = (px - x0) as f32;
    let fy = (py - y0) as f32;
    let fz = (pz - z0) as f32;
    let (x0, y0, z0) = (x0 as i64, y0 as i64, z0 as i64);

    let mut sum = 0.0f32;
    for (dz, wz) in [(0, 1.0 - fz), (1, fz)] {
        if wz == 0.0 {
            continue;
        }
        for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
            if wy == 0.0 {
                continue;
            }
            for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
                if wx == 0.0 {
                    continue;
                }
                sum += sample_voxel(volume, x0 + dx, y0 + dy, z0 + dz) * wx * wy * wz;
            }
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::noise_volume;

    #[test]
    fn test_identity_is_exact() {
        let v = noise_volume(7, 6, 5, 1).with_spacing(DVec3::new(0.4, 0.4, 2.0));
        let r = resample_affine(&v, &AffineModel3D::identity()).unwrap();
        assert_eq!(r.dims(), v.dims());
        for (a, b) in r.data().iter().zip(v.data()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_integer_translation_shifts_voxels() {
        let v = noise_volume(6, 5, 4, 2);
        let model = AffineModel3D::translation(DVec3::new(2.0, 1.0, 0.0));
        let r = resample_affine(&v, &model).unwrap();
        assert_eq!(r.get(4, 3, 2), v.get(2, 2, 2));
        // uncovered region is background
        assert_eq!(r.get(0, 0, 0), 0.0);
        assert_eq!(r.get(1, 4, 3), 0.0);
    }

    #[test]
    fn test_translation_in_x_pitch_units_respects_z_spacing() {
        // z voxels are 4x coarser; a shift of 4 x-pitch units is one z slice
        let v = noise_volume(3, 3, 4, 3).with_spacing(DVec3::new(1.0, 1.0, 4.0));
        let model = AffineModel3D::translation(DVec3::new(0.0, 0.0, 4.0));
        let r = resample_affine(&v, &model).unwrap();
        assert_eq!(r.slice_data(2), v.slice_data(1));
        assert!(r.slice_data(0).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_half_voxel_shift_interpolates() {
        let v = Volume::from_fn(4, 1, 1, |x, _, _| x as f32 * 2.0);
        let model = AffineModel3D::translation(DVec3::new(0.5, 0.0, 0.0));
        let r = resample_affine(&v, &model).unwrap();
        assert!((r.get(1, 0, 0) - 1.0).abs() < 1e-6);
        assert!((r.get(2, 0, 0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_singular_model_is_error() {
        let v = noise_volume(2, 2, 2, 4);
        let flat = AffineModel3D::scale(DVec3::new(1.0, 1.0, 0.0));
        assert!(matches!(
            resample_affine(&v, &flat),
            Err(Error::SingularModel)
        ));
    }
}
