//! Reorientation of inputs so that the stitching direction becomes +z.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::volume::{rotate_discrete, Axis, Volume};

/// Direction in which the back volume continues the front volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StitchingAxis {
    #[default]
    FrontBack,
    BackFront,
    LeftRight,
    RightLeft,
    TopBottom,
    BottomTop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reorientation {
    Identity,
    ReverseZ,
    Rotate(Axis, i32),
}

impl StitchingAxis {
    fn reorientation(self) -> Reorientation {
        match self {
            StitchingAxis::FrontBack => Reorientation::Identity,
            StitchingAxis::BackFront => Reorientation::ReverseZ,
            StitchingAxis::LeftRight => Reorientation::Rotate(Axis::Y, -90),
            StitchingAxis::RightLeft => Reorientation::Rotate(Axis::Y, 90),
            StitchingAxis::TopBottom => Reorientation::Rotate(Axis::X, 90),
            StitchingAxis::BottomTop => Reorientation::Rotate(Axis::X, -90),
        }
    }

    /// Reorient `volume` so this direction points along +z.
    pub fn orient(self, volume: &Volume) -> Result<Volume> {
        match self.reorientation() {
            Reorientation::Identity => Ok(volume.clone()),
            Reorientation::ReverseZ => Ok(volume.reverse_z()),
            Reorientation::Rotate(axis, degrees) => rotate_discrete(volume, axis, degrees),
        }
    }

    /// Undo [`StitchingAxis::orient`].
    pub fn restore(self, volume: &Volume) -> Result<Volume> {
        match self.reorientation() {
            Reorientation::Identity => Ok(volume.clone()),
            Reorientation::ReverseZ => Ok(volume.reverse_z()),
            Reorientation::Rotate(axis, degrees) => rotate_discrete(volume, axis, -degrees),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [StitchingAxis; 6] = [
        StitchingAxis::FrontBack,
        StitchingAxis::BackFront,
        StitchingAxis::LeftRight,
        StitchingAxis::RightLeft,
        StitchingAxis::TopBottom,
        StitchingAxis::BottomTop,
    ];

    fn sample() -> Volume {
        Volume::from_fn(5, 4, 3, |x, y, z| (x + 10 * y + 100 * z) as f32)
    }

    #[test]
    fn test_restore_undoes_orient() {
        let v = sample();
        for axis in ALL {
            let back = axis.restore(&axis.orient(&v).unwrap()).unwrap();
            assert_eq!(back, v, "{axis:?}");
        }
    }

    #[test]
    fn test_left_right_puts_x_along_z() {
        let o = StitchingAxis::LeftRight.orient(&sample()).unwrap();
        assert_eq!(o.depth(), 5);
        assert_eq!(o.height(), 4);
    }

    #[test]
    fn test_top_bottom_puts_y_along_z() {
        let o = StitchingAxis::TopBottom.orient(&sample()).unwrap();
        assert_eq!(o.depth(), 4);
        assert_eq!(o.width(), 5);
    }

    #[test]
    fn test_back_front_reverses_stack() {
        let v = sample();
        let o = StitchingAxis::BackFront.orient(&v).unwrap();
        assert_eq!(o.slice_data(0), v.slice_data(2));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&StitchingAxis::TopBottom).unwrap();
        assert_eq!(json, "\"top_bottom\"");
    }
}
