//! 3D voxel volume and the structural operations used by registration.
//!
//! Voxels are stored as `f32` regardless of the source bit depth; the
//! original sample kind is tracked in [`VoxelKind`] so that output can be
//! written back in the same format. Index order is `x` fastest, then `y`,
//! then `z`.


pub mod rotate;

use common::Buffer2;
use glam::DVec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use rotate::rotate_discrete;

/// Sample format a volume was loaded from (and will be saved as).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoxelKind {
    U8,
    #[default]
    U16,
    F32,
}

impl VoxelKind {
    /// Clamp a value into the representable range of this kind.
    #[inline]
    pub fn clamp(&self, v: f32) -> f32 {
        match self {
            VoxelKind::U8 => v.round().clamp(0.0, u8::MAX as f32),
            VoxelKind::U16 => v.round().clamp(0.0, u16::MAX as f32),
            VoxelKind::F32 => v,
        }
    }
}

/// Spatial axis of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    width: usize,
    height: usize,
    depth: usize,
    kind: VoxelKind,
    /// Physical voxel size along x, y, z.
    spacing: DVec3,
    data: Vec<f32>,
}

impl Volume {
    pub fn new(
        width: usize,
        height: usize,
        depth: usize,
        kind: VoxelKind,
        spacing: DVec3,
        data: Vec<f32>,
    ) -> Self {
        assert_eq!(
            data.len(),
            width * height * depth,
            "data length must equal width * height * depth"
        );
        Self {
            width,
            height,
            depth,
            kind,
            spacing,
            data,
        }
    }

    pub fn zeros(width: usize, height: usize, depth: usize, kind: VoxelKind, spacing: DVec3) -> Self {
        Self::new(
            width,
            height,
            depth,
            kind,
            spacing,
            vec![0.0; width * height * depth],
        )
    }

    pub fn from_fn<F>(width: usize, height: usize, depth: usize, f: F) -> Self
    where
        F: Fn(usize, usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(width * height * depth);
        for z in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    data.push(f(x, y, z));
                }
            }
        }
        Self::new(width, height, depth, VoxelKind::F32, DVec3::ONE, data)
    }

    /// Build a volume by stacking equally sized 2D slices.
    pub fn from_slices(slices: Vec<Buffer2<f32>>, kind: VoxelKind, spacing: DVec3) -> Self {
        let (width, height) = slices
            .first()
            .map(|s| (s.width(), s.height()))
            .unwrap_or((0, 0));
        let depth = slices.len();
        let mut data = Vec::with_capacity(width * height * depth);
        for slice in slices {
            assert_eq!(
                (slice.width(), slice.height()),
                (width, height),
                "slice size mismatch"
            );
            data.extend(slice.into_vec());
        }
        Self::new(width, height, depth, kind, spacing, data)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }

    #[inline]
    pub fn kind(&self) -> VoxelKind {
        self.kind
    }

    #[inline]
    pub fn spacing(&self) -> DVec3 {
        self.spacing
    }

    pub fn with_spacing(mut self, spacing: DVec3) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_kind(mut self, kind: VoxelKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pitch of each axis relative to the x pitch.
    pub fn relative_spacing(&self) -> DVec3 {
        self.spacing / self.spacing.x
    }

    #[inline]
    pub fn slice_len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.height + y) * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[self.index(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        let i = self.index(x, y, z);
        self.data[i] = value;
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn slice_data(&self, z: usize) -> &[f32] {
        let n = self.slice_len();
        &self.data[z * n..(z + 1) * n]
    }

    /// Copy of slice `z` as a 2D image.
    pub fn slice(&self, z: usize) -> Buffer2<f32> {
        Buffer2::new(self.width, self.height, self.slice_data(z).to_vec())
    }

    /// Slices `[start, end)` along z as a new volume.
    pub fn sub_stack(&self, start: usize, end: usize) -> Volume {
        assert!(
            start <= end && end <= self.depth,
            "sub-stack [{start}, {end}) outside depth {}",
            self.depth
        );
        let n = self.slice_len();
        Volume::new(
            self.width,
            self.height,
            end - start,
            self.kind,
            self.spacing,
            self.data[start * n..end * n].to_vec(),
        )
    }

    /// The last `count` slices.
    pub fn trailing(&self, count: usize) -> Volume {
        let count = count.min(self.depth);
        self.sub_stack(self.depth - count, self.depth)
    }

    /// The first `count` slices.
    pub fn leading(&self, count: usize) -> Volume {
        self.sub_stack(0, count.min(self.depth))
    }

    /// Maximum-intensity projection of slices `[start, end)`.
    pub fn max_projection(&self, start: usize, end: usize) -> Buffer2<f32> {
        assert!(
            start < end && end <= self.depth,
            "projection range [{start}, {end}) outside depth {}",
            self.depth
        );
        let mut out = self.slice(start);
        for z in start + 1..end {
            out.max_assign(&self.slice(z));
        }
        out
    }

    /// Collapse consecutive groups of `step` slices into one MIP each.
    ///
    /// Produces `ceil(depth / step)` images; the last group may be shorter.
    pub fn project(&self, step: usize) -> Vec<Buffer2<f32>> {
        assert!(step > 0, "projection step must be > 0");
        let groups = self.depth.div_ceil(step);
        (0..groups)
            .into_par_iter()
            .map(|g| {
                let start = g * step;
                let end = (start + step).min(self.depth);
                self.max_projection(start, end)
            })
            .collect()
    }

    /// Same volume with the slice order reversed.
    pub fn reverse_z(&self) -> Volume {
        let n = self.slice_len();
        let mut data = Vec::with_capacity(self.data.len());
        for z in (0..self.depth).rev() {
            data.extend_from_slice(&self.data[z * n..(z + 1) * n]);
        }
        Volume::new(
            self.width,
            self.height,
            self.depth,
            self.kind,
            self.spacing,
            data,
        )
    }

    /// Clamp every voxel into the range of the volume's [`VoxelKind`].
    pub fn clamp_to_kind(mut self) -> Self {
        let kind = self.kind;
        self.data.par_iter_mut().for_each(|v| *v = kind.clamp(*v));
        self
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}
