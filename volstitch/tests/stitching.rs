use glam::DVec3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use volstitch::{
    find_overlap_exhaustive, register_cross_section, FeatureMatchService, FitParams,
    OverlapStrategy, PatchExtractor, RunConfig, StitchInputs, Stitcher, StitchingAxis, Volume,
    VoxelKind,
};

fn noise(width: usize, height: usize, depth: usize, seed: u64) -> Volume {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data = (0..width * height * depth).map(|_| rng.random()).collect();
    Volume::new(width, height, depth, VoxelKind::F32, DVec3::ONE, data)
}

/// Front is `base[..front_end)`, back is `base[back_start..)`.
fn split(base: &Volume, front_end: usize, back_start: usize) -> (Volume, Volume) {
    (
        base.sub_stack(0, front_end),
        base.sub_stack(back_start, base.depth()),
    )
}

fn service() -> FeatureMatchService {
    FeatureMatchService::new(
        Box::new(PatchExtractor::default()),
        0.92,
        FitParams {
            seed: Some(1),
            ..Default::default()
        },
    )
}

fn small_run_config() -> RunConfig {
    RunConfig {
        iterations: 1,
        exhaustive_window: 20,
        projection_step: 5,
        ransac_max_epsilon: 2.0,
        ransac_seed: Some(3),
        ..Default::default()
    }
}

#[test]
fn engineered_overlap_of_thirty_slices() {
    common::log_setup::init_test_logging();

    let front = noise(50, 50, 200, 100);
    let mut back = noise(50, 50, 200, 101);
    let n = 50 * 50;
    back.data_mut()[..30 * n].copy_from_slice(&front.data()[170 * n..]);

    let service = service();
    let est = find_overlap_exhaustive(&service, &front, &back, 1, 50).unwrap();
    assert_eq!(est.overlap, 30);
    assert_eq!(est.curve.points().len(), 50);

    let fit = register_cross_section(&service, &front.trailing(30), &back.leading(30), 50);
    assert!(fit.accepted);
    assert_eq!(fit.inlier_ratio(), 1.0);
    assert!(fit.model.rotation_degrees().abs() < 1e-3);
    assert!(fit.model.translation_components().length() < 1e-6);
    assert!(fit.model.deviation_from_identity() < 1e-9);
}

#[test]
fn left_right_run_reassembles_the_volume() {
    common::log_setup::init_test_logging();

    let base = noise(40, 40, 50, 7);
    let (front_z, back_z) = split(&base, 30, 20);
    let axis = StitchingAxis::LeftRight;
    let front = axis.restore(&front_z).unwrap();
    let back = axis.restore(&back_z).unwrap();
    assert_eq!(front.width(), 30);

    let config = RunConfig {
        stitching_axis: axis,
        ..small_run_config()
    };
    let out = Stitcher::new(config)
        .unwrap()
        .run(StitchInputs::new(front, back))
        .unwrap();

    assert_eq!(out.overlap, 10);
    let expected = axis.restore(&base).unwrap();
    assert_eq!(out.fused.dims(), expected.dims());
    let max_err = out
        .fused
        .data()
        .iter()
        .zip(expected.data())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(max_err < 1e-4, "max error {max_err}");
}

#[test]
fn recursive_strategy_finds_unaligned_overlap() {
    let base = noise(40, 40, 96, 12);
    let (front, back) = split(&base, 64, 35);

    let config = RunConfig {
        overlap_strategy: OverlapStrategy::Recursive,
        branch_factor: 4,
        refine_radius: 4,
        ..small_run_config()
    };
    let out = Stitcher::new(config)
        .unwrap()
        .run(StitchInputs::new(front, back))
        .unwrap();

    assert_eq!(out.overlap, 29);
    assert_eq!(out.fused.depth(), 96);
    assert!(out.diagnostics.steps.iter().all(|s| s.overlap == 29));
    assert!(out.model.deviation_from_identity() < 1e-6);
}
