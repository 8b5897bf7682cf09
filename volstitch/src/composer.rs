//! Folding per-axis 2D estimates into the cumulative 3D model.
//!
//! Each 2D model is estimated in a reoriented view of the back volume. It is
//! lifted into 3D by conjugating with the view transform `V` used to build
//! that view: `E = V⁻¹ · E_view · V`, where `E_view` acts on the view's x/y
//! plane and leaves its z untouched. The flip offsets carried by `V` are the
//! shift-to-origin and shift-back pair that keep the embedded rotation about
//! the right center.

use crate::error::{Error, Result};
use crate::model::{AffineModel2D, AffineModel3D};
use crate::volume::rotate::DiscreteRotation;
use crate::volume::{Axis, Volume};

/// View used to estimate the X-axis model: 90° about Y (view x = volume z).
pub const X_VIEW: (Axis, i32) = (Axis::Y, 90);
/// View used to estimate the Y-axis model: -90° about X (view y = volume z).
pub const Y_VIEW: (Axis, i32) = (Axis::X, -90);

#[derive(Debug, Clone, Copy)]
struct ViewFrame {
    to_view: AffineModel3D,
    from_view: AffineModel3D,
}

impl ViewFrame {
    fn new(
        rotation: DiscreteRotation,
        dims: (usize, usize, usize),
        relative_spacing: glam::DVec3,
    ) -> Result<Self> {
        let to_view = rotation.to_model(dims, relative_spacing);
        let from_view = to_view.inverse().ok_or(Error::SingularModel)?;
        Ok(Self { to_view, from_view })
    }

    fn embed(&self, model: &AffineModel2D) -> AffineModel3D {
        self.from_view
            .concatenate(&lift_planar(model))
            .concatenate(&self.to_view)
    }
}

/// Embeds 2D models estimated in the Z, X and Y views of one volume.
#[derive(Debug, Clone, Copy)]
pub struct Model3DComposer {
    x_view: ViewFrame,
    y_view: ViewFrame,
}

impl Model3DComposer {
    /// `dims` and `relative_spacing` describe the volume the views were cut
    /// from.
    pub fn new(dims: (usize, usize, usize), relative_spacing: glam::DVec3) -> Result<Self> {
        let (axis, degrees) = X_VIEW;
        let x_view = ViewFrame::new(DiscreteRotation::new(axis, degrees)?, dims, relative_spacing)?;
        let (axis, degrees) = Y_VIEW;
        let y_view = ViewFrame::new(DiscreteRotation::new(axis, degrees)?, dims, relative_spacing)?;
        Ok(Self { x_view, y_view })
    }

    pub fn for_volume(volume: &Volume) -> Result<Self> {
        Self::new(volume.dims(), volume.relative_spacing())
    }

    /// 3D form of a model estimated in the view belonging to `axis`.
    ///
    /// The model must be in units of the x pitch of the unrotated volume.
    pub fn embed(&self, axis: Axis, model: &AffineModel2D) -> AffineModel3D {
        match axis {
            Axis::Z => lift_planar(model),
            Axis::X => self.x_view.embed(model),
            Axis::Y => self.y_view.embed(model),
        }
    }

    /// Concatenate the supplied axis models onto `existing`, in the order
    /// Z, X, Y. A missing model contributes nothing.
    pub fn compose(
        &self,
        existing: &AffineModel3D,
        z: Option<&AffineModel2D>,
        x: Option<&AffineModel2D>,
        y: Option<&AffineModel2D>,
    ) -> AffineModel3D {
        [(Axis::Z, z), (Axis::X, x), (Axis::Y, y)]
            .into_iter()
            .fold(*existing, |acc, (axis, model)| match model {
                Some(m) => self.embed(axis, m).concatenate(&acc),
                None => acc,
            })
    }
}

/// `[a b 0 tx; c d 0 ty; 0 0 1 0]`
fn lift_planar(model: &AffineModel2D) -> AffineModel3D {
    let [[a, b, tx], [c, d, ty]] = model.rows();
    AffineModel3D::from_rows([
        [a, b, 0.0, tx],
        [c, d, 0.0, ty],
        [0.0, 0.0, 1.0, 0.0],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DVec2, DVec3};

    const EPS: f64 = 1e-9;

    fn composer() -> Model3DComposer {
        Model3DComposer::new((20, 16, 12), DVec3::new(1.0, 1.0, 2.0)).unwrap()
    }

    #[test]
    fn test_z_model_stays_in_xy_plane() {
        let m = AffineModel2D::from_rows([[0.9, 0.1, 2.0], [-0.1, 1.1, 3.0]]);
        let e = composer().embed(Axis::Z, &m);
        assert_eq!(
            e.rows(),
            [[0.9, 0.1, 0.0, 2.0], [-0.1, 1.1, 0.0, 3.0], [0.0, 0.0, 1.0, 0.0]]
        );
    }

    #[test]
    fn test_x_model_moves_z_and_y() {
        let e = composer().embed(Axis::X, &AffineModel2D::translation(DVec2::new(2.0, 3.0)));
        let p = e.apply(DVec3::new(1.0, 1.0, 1.0));
        assert!((p - DVec3::new(1.0, 4.0, 3.0)).length() < EPS);
    }

    #[test]
    fn test_y_model_moves_x_and_z() {
        let e = composer().embed(Axis::Y, &AffineModel2D::translation(DVec2::new(2.0, 3.0)));
        let p = e.apply(DVec3::new(1.0, 1.0, 1.0));
        assert!((p - DVec3::new(3.0, 1.0, 4.0)).length() < EPS);
    }

    #[test]
    fn test_x_model_linear_part() {
        // view x is volume z, view y is volume y
        let m = AffineModel2D::from_rows([[1.0, 0.2, 0.0], [0.3, 1.0, 0.0]]);
        let e = composer().embed(Axis::X, &m);
        let expected = AffineModel3D::from_rows([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.3, 0.0],
            [0.0, 0.2, 1.0, 0.0],
        ]);
        assert!(e.approx_eq(&expected, EPS), "{e}");
    }

    #[test]
    fn test_y_model_rotation_about_view_origin() {
        // view x is volume x, view y is volume z
        let m = AffineModel2D::rigid(DVec2::ZERO, std::f64::consts::FRAC_PI_2);
        let e = composer().embed(Axis::Y, &m);
        // view (x, z) -> (-z, x), y untouched
        let p = e.apply(DVec3::new(2.0, 5.0, 3.0));
        assert!((p - DVec3::new(-3.0, 5.0, 2.0)).length() < EPS, "{p}");
    }

    #[test]
    fn test_missing_models_leave_existing_untouched() {
        let existing = AffineModel3D::translation(DVec3::new(1.0, -2.0, 0.5));
        let c = composer();
        assert_eq!(c.compose(&existing, None, None, None), existing);
    }

    #[test]
    fn test_compose_order_is_z_x_y() {
        let c = composer();
        let z = AffineModel2D::rigid(DVec2::new(1.0, 0.0), 0.2);
        let x = AffineModel2D::from_rows([[1.0, 0.0, 4.0], [0.3, 1.0, 0.0]]);
        let y = AffineModel2D::similarity(DVec2::new(0.0, 2.0), -0.1, 1.05);
        let existing = AffineModel3D::translation(DVec3::new(0.0, 0.0, 7.0));

        let composed = c.compose(&existing, Some(&z), Some(&x), Some(&y));
        let expected = c
            .embed(Axis::Y, &y)
            .concatenate(&c.embed(Axis::X, &x))
            .concatenate(&c.embed(Axis::Z, &z))
            .concatenate(&existing);
        assert!(composed.approx_eq(&expected, EPS));

        let swapped = c
            .embed(Axis::Z, &z)
            .concatenate(&c.embed(Axis::X, &x))
            .concatenate(&existing);
        let zx = c.compose(&existing, Some(&z), Some(&x), None);
        assert!(!zx.approx_eq(&swapped, 1e-6));
    }

    #[test]
    fn test_stepwise_compose_equals_single_call() {
        let c = composer();
        let z = AffineModel2D::rigid(DVec2::new(1.0, 0.0), 0.2);
        let x = AffineModel2D::from_rows([[1.0, 0.0, 4.0], [0.3, 1.0, 0.0]]);
        let y = AffineModel2D::similarity(DVec2::new(0.0, 2.0), -0.1, 1.05);
        let existing = AffineModel3D::translation(DVec3::new(0.0, 0.0, 7.0));

        let after_z = c.compose(&existing, Some(&z), None, None);
        let stepwise = c.compose(&after_z, None, Some(&x), None);
        let single = c.compose(&existing, Some(&z), Some(&x), None);
        assert!(stepwise.approx_eq(&single, EPS), "{stepwise}\n{single}");

        let stepwise = c.compose(&stepwise, None, None, Some(&y));
        let single = c.compose(&existing, Some(&z), Some(&x), Some(&y));
        assert!(stepwise.approx_eq(&single, EPS));
    }

    #[test]
    fn test_skipped_axis_is_identity_contribution() {
        let c = composer();
        let z = AffineModel2D::translation(DVec2::new(1.0, 2.0));
        let y = AffineModel2D::translation(DVec2::new(3.0, 4.0));
        let with_gap = c.compose(&AffineModel3D::identity(), Some(&z), None, Some(&y));
        let with_identity = c.compose(
            &AffineModel3D::identity(),
            Some(&z),
            Some(&AffineModel2D::identity()),
            Some(&y),
        );
        assert!(with_gap.approx_eq(&with_identity, EPS));
    }
}
