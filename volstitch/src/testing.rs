//! Testing utilities for volstitch.

#![allow(dead_code)]

use glam::DVec3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::volume::{Volume, VoxelKind};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
pub fn init_tracing() {
    common::log_setup::init_test_logging();
}

/// Uniform noise in `[0, 1)`, reproducible from `seed`.
pub fn noise_volume(width: usize, height: usize, depth: usize, seed: u64) -> Volume {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data: Vec<f32> = (0..width * height * depth).map(|_| rng.random()).collect();
    Volume::new(width, height, depth, VoxelKind::F32, DVec3::ONE, data)
}

/// A front/back pair whose last `overlap` front slices equal the first
/// `overlap` back slices exactly. Everything else is independent noise.
pub fn overlapping_pair(
    width: usize,
    height: usize,
    front_depth: usize,
    back_depth: usize,
    overlap: usize,
    seed: u64,
) -> (Volume, Volume) {
    assert!(overlap <= front_depth && overlap <= back_depth);
    let front = noise_volume(width, height, front_depth, seed);
    let mut back = noise_volume(width, height, back_depth, seed.wrapping_add(1));
    let n = width * height;
    let shared = &front.data()[(front_depth - overlap) * n..];
    back.data_mut()[..overlap * n].copy_from_slice(shared);
    (front, back)
}

pub fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() < eps
}
