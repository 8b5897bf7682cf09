//! Affine models for cross-section and volume registration.

use std::fmt;

use glam::{DAffine2, DAffine3, DMat2, DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// Geometric model fitted to cross-section correspondences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Translation only (2 DOF)
    Translation,
    /// Translation + rotation (3 DOF)
    Rigid,
    /// Translation + rotation + uniform scale (4 DOF)
    Similarity,
    /// Full affine (6 DOF)
    #[default]
    Affine,
}

impl ModelKind {
    /// Minimum number of correspondences required to estimate this model.
    pub fn min_points(&self) -> usize {
        match self {
            ModelKind::Translation => 1,
            ModelKind::Rigid => 2,
            ModelKind::Similarity => 2,
            ModelKind::Affine => 3,
        }
    }
}

/// 2x3 affine map over a plane.
///
/// ```text
/// | m00  m01  tx |
/// | m10  m11  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineModel2D {
    affine: DAffine2,
}

impl Default for AffineModel2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineModel2D {
    pub fn identity() -> Self {
        Self {
            affine: DAffine2::IDENTITY,
        }
    }

    pub fn translation(t: DVec2) -> Self {
        Self {
            affine: DAffine2::from_translation(t),
        }
    }

    pub fn rigid(t: DVec2, angle: f64) -> Self {
        Self::similarity(t, angle, 1.0)
    }

    pub fn similarity(t: DVec2, angle: f64, scale: f64) -> Self {
        let (sin_a, cos_a) = angle.sin_cos();
        Self::from_rows([
            [scale * cos_a, -scale * sin_a, t.x],
            [scale * sin_a, scale * cos_a, t.y],
        ])
    }

    /// Build from the two matrix rows `[[m00, m01, tx], [m10, m11, ty]]`.
    pub fn from_rows(rows: [[f64; 3]; 2]) -> Self {
        let matrix2 = DMat2::from_cols(
            DVec2::new(rows[0][0], rows[1][0]),
            DVec2::new(rows[0][1], rows[1][1]),
        );
        Self {
            affine: DAffine2::from_mat2_translation(matrix2, DVec2::new(rows[0][2], rows[1][2])),
        }
    }

    pub fn rows(&self) -> [[f64; 3]; 2] {
        let m = self.affine.matrix2;
        let t = self.affine.translation;
        [[m.x_axis.x, m.y_axis.x, t.x], [m.x_axis.y, m.y_axis.y, t.y]]
    }

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        self.affine.transform_point2(p)
    }

    /// `self * other`: apply `other` first, then `self`.
    pub fn concatenate(&self, other: &Self) -> Self {
        Self {
            affine: self.affine * other.affine,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.affine.matrix2.determinant()
    }

    pub fn is_valid(&self) -> bool {
        let det = self.determinant();
        det.abs() > 1e-10 && det.is_finite() && self.affine.translation.is_finite()
    }

    pub fn inverse(&self) -> Option<Self> {
        if !self.is_valid() {
            return None;
        }
        Some(Self {
            affine: self.affine.inverse(),
        })
    }

    pub fn translation_components(&self) -> DVec2 {
        self.affine.translation
    }

    /// Rotation reported to operators: `acos(m00)` in degrees.
    pub fn rotation_degrees(&self) -> f64 {
        self.affine.matrix2.x_axis.x.clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Re-express the model in a frame scaled per axis by `scale`: `S * M * S^-1`.
    ///
    /// Used to move a model fitted in pixels of one pitch into units of another.
    pub fn rescaled(&self, scale: DVec2) -> Self {
        let s = DAffine2::from_scale(scale);
        let s_inv = DAffine2::from_scale(DVec2::ONE / scale);
        Self {
            affine: s * self.affine * s_inv,
        }
    }

    /// Largest absolute difference of any matrix entry from identity.
    pub fn deviation_from_identity(&self) -> f64 {
        let rows = self.rows();
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        rows.iter()
            .flatten()
            .zip(identity.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for AffineModel2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.translation_components();
        write!(
            f,
            "Affine2D(rot={:.3}°, dx={:.2}, dy={:.2})",
            self.rotation_degrees(),
            t.x,
            t.y
        )
    }
}

/// 3x4 affine map over a volume.
///
/// Coordinates are in voxels of the x pitch along all three axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineModel3D {
    affine: DAffine3,
}

impl Default for AffineModel3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineModel3D {
    pub fn identity() -> Self {
        Self {
            affine: DAffine3::IDENTITY,
        }
    }

    pub fn translation(t: DVec3) -> Self {
        Self {
            affine: DAffine3::from_translation(t),
        }
    }

    pub fn scale(s: DVec3) -> Self {
        Self {
            affine: DAffine3::from_scale(s),
        }
    }

    /// Build from the three matrix rows `[m_r0, m_r1, m_r2, t_r]`.
    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        let matrix3 = DMat3::from_cols(
            DVec3::new(rows[0][0], rows[1][0], rows[2][0]),
            DVec3::new(rows[0][1], rows[1][1], rows[2][1]),
            DVec3::new(rows[0][2], rows[1][2], rows[2][2]),
        );
        let translation = DVec3::new(rows[0][3], rows[1][3], rows[2][3]);
        Self {
            affine: DAffine3::from_mat3_translation(matrix3, translation),
        }
    }

    pub fn rows(&self) -> [[f64; 4]; 3] {
        let m = self.affine.matrix3;
        let t = self.affine.translation;
        [
            [m.x_axis.x, m.y_axis.x, m.z_axis.x, t.x],
            [m.x_axis.y, m.y_axis.y, m.z_axis.y, t.y],
            [m.x_axis.z, m.y_axis.z, m.z_axis.z, t.z],
        ]
    }

    #[inline]
    pub fn apply(&self, p: DVec3) -> DVec3 {
        self.affine.transform_point3(p)
    }

    /// `self * other`: apply `other` first, then `self`.
    pub fn concatenate(&self, other: &Self) -> Self {
        Self {
            affine: self.affine * other.affine,
        }
    }

    /// `other * self`: apply `self` first, then `other`.
    pub fn pre_concatenate(&self, other: &Self) -> Self {
        other.concatenate(self)
    }

    pub fn determinant(&self) -> f64 {
        self.affine.matrix3.determinant()
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() <= 1e-12 || !det.is_finite() {
            return None;
        }
        Some(Self {
            affine: self.affine.inverse(),
        })
    }

    pub fn deviation_from_identity(&self) -> f64 {
        let rows = self.rows();
        let mut max = 0.0f64;
        for (r, row) in rows.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                let expected = if r == c { 1.0 } else { 0.0 };
                max = max.max((v - expected).abs());
            }
        }
        max
    }

    pub fn approx_eq(&self, other: &Self, eps: f64) -> bool {
        self.rows()
            .iter()
            .flatten()
            .zip(other.rows().iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }
}

impl fmt::Display for AffineModel3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.rows().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "[{:10.5} {:10.5} {:10.5} {:10.3}]",
                row[0], row[1], row[2], row[3]
            )?;
        }
        Ok(())
    }
}
