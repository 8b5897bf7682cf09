//! Overlap depth estimation between a front and a back volume along z.
//!
//! The overlap is the number of trailing front slices that coincide with
//! leading back slices. Candidates are scored by the inlier count of a
//! match + fit against the front side; the best candidate wins, with ties
//! going to the later candidate. An estimate is always returned; an
//! ambiguous result shows up as a flat [`ScoreCurve`], not as an error.

use common::parallel::{default_concurrency, par_map_limited};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::matching::FeatureMatchService;
use crate::volume::Volume;

/// Inlier counts by candidate slice index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreCurve {
    points: Vec<(usize, usize)>,
}

impl ScoreCurve {
    pub fn new(points: Vec<(usize, usize)>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(usize, usize)] {
        &self.points
    }

    pub fn extend(&mut self, points: &[(usize, usize)]) {
        self.points.extend_from_slice(points);
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn best(&self) -> Option<(usize, usize)> {
        pick_best(&self.points)
    }

    /// True when the best score is shared by more than one candidate.
    pub fn is_ambiguous(&self) -> bool {
        match self.best() {
            Some((_, best)) => self.points.iter().filter(|(_, s)| *s == best).count() > 1,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapEstimate {
    /// Overlap depth in slices, `1..=depth(back)`.
    pub overlap: usize,
    pub curve: ScoreCurve,
}

/// Highest-scoring `(candidate, score)`; an equal later score replaces the
/// current best, so ties resolve to the larger index.
pub fn pick_best(scores: &[(usize, usize)]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for &(candidate, score) in scores {
        match best {
            Some((_, best_score)) if score < best_score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best
}

/// Score every candidate overlap in `[start, end]` (1-based).
///
/// Features of the last front slice are extracted once; candidate `i` is
/// scored against back slice `i - 1`.
pub fn find_overlap_exhaustive(
    service: &FeatureMatchService,
    front: &Volume,
    back: &Volume,
    start: usize,
    end: usize,
) -> Result<OverlapEstimate> {
    if front.depth() == 0 {
        return Err(Error::MissingVolume { role: "front" });
    }
    if start == 0 || start > end || end > back.depth() {
        return Err(Error::InvalidSearchWindow {
            start,
            end,
            depth: back.depth(),
        });
    }

    let front_features = service.extract(&front.slice(front.depth() - 1));
    let candidates: Vec<usize> = (start..=end).collect();

    let scores = par_map_limited(&candidates, default_concurrency(), |&i| {
        let back_features = service.extract(&back.slice(i - 1));
        let score = service.register(&back_features, &front_features).inlier_count();
        (i, score)
    });

    let curve = ScoreCurve::new(scores);
    for (i, score) in curve.points() {
        debug!("overlap candidate {i}: {score} inliers");
    }
    let (overlap, score) = curve.best().unwrap_or((end, 0));
    info!(overlap, score, "Exhaustive overlap search [{start}, {end}]");

    Ok(OverlapEstimate { overlap, curve })
}

/// Coarse-to-fine search over candidate overlaps `[1, depth(back)]`.
///
/// Each level splits the candidate range into `branch_factor` groups and
/// scores the projection of the back slices ending at each group end against
/// the projection of an equally long trailing front window. Shared slices
/// peak where the group end equals the overlap, so the search continues on
/// half a group either side of the winning end. Once the range is at most
/// twice `branch_factor` long, every remaining candidate is scored slice by
/// slice against the last front slice, as in the exhaustive sweep.
pub fn find_overlap_recursive(
    service: &FeatureMatchService,
    front: &Volume,
    back: &Volume,
    branch_factor: usize,
) -> Result<OverlapEstimate> {
    if front.depth() == 0 {
        return Err(Error::MissingVolume { role: "front" });
    }
    if back.depth() == 0 {
        return Err(Error::MissingVolume { role: "back" });
    }
    if branch_factor == 0 {
        return Err(Error::InvalidConfig(
            "branch_factor must be positive".into(),
        ));
    }

    let mut curve = ScoreCurve::default();
    let (mut lo, mut hi) = (1, back.depth());

    while branch_factor > 1 && hi - lo + 1 > 2 * branch_factor {
        let len = hi - lo + 1;
        let group = len.div_ceil(branch_factor);
        let ends: Vec<usize> = (1..=len.div_ceil(group))
            .map(|g| lo - 1 + (g * group).min(len))
            .collect();

        let scores = score_group_ends(service, front, back, &ends, group);
        for (end, score) in &scores {
            debug!("overlap group ending at {end}: {score} inliers");
        }
        curve.extend(&scores);

        let (best_end, best_score) = pick_best(&scores).unwrap_or((hi, 0));
        let half = group.div_ceil(2);
        let next = (best_end.saturating_sub(half).max(lo), (best_end + half).min(hi));
        debug!(
            range_start = next.0,
            range_end = next.1,
            score = best_score,
            "Narrowing overlap search"
        );
        if next.1 - next.0 + 1 >= len {
            break;
        }
        (lo, hi) = next;
    }

    let front_features = service.extract(&front.slice(front.depth() - 1));
    let candidates: Vec<usize> = (lo..=hi).collect();
    let scores: Vec<(usize, usize)> = candidates
        .par_iter()
        .map(|&i| {
            let back_features = service.extract(&back.slice(i - 1));
            (i, service.register(&back_features, &front_features).inlier_count())
        })
        .collect();
    for (i, score) in &scores {
        debug!("overlap candidate {i}: {score} inliers");
    }
    curve.extend(&scores);

    let (overlap, score) = pick_best(&scores).unwrap_or((hi, 0));
    info!(overlap, score, "Recursive overlap search");
    Ok(OverlapEstimate { overlap, curve })
}

/// Score candidate overlaps `ends` by comparing the MIP of the `window` back
/// slices ending at each candidate with the MIP of the trailing front slices.
fn score_group_ends(
    service: &FeatureMatchService,
    front: &Volume,
    back: &Volume,
    ends: &[usize],
    window: usize,
) -> Vec<(usize, usize)> {
    let front_mip = |w: usize| {
        service.extract(&front.max_projection(front.depth() - w, front.depth()))
    };
    let full = window.min(front.depth());
    let full_features = front_mip(full);

    ends.par_iter()
        .map(|&end| {
            let w = full.min(end);
            let back_features = service.extract(&back.max_projection(end - w, end));
            let score = if w == full {
                service.register(&back_features, &full_features)
            } else {
                service.register(&back_features, &front_mip(w))
            };
            (end, score.inlier_count())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureExtractor, FeatureSet, PatchExtractor};
    use crate::matching::FitParams;
    use crate::testing::{init_tracing, noise_volume, overlapping_pair};
    use common::Buffer2;

    struct NoFeatures;

    impl FeatureExtractor for NoFeatures {
        fn extract(&self, _image: &Buffer2<f32>) -> FeatureSet {
            FeatureSet::new()
        }
    }

    fn service() -> FeatureMatchService {
        FeatureMatchService::new(
            Box::new(PatchExtractor::default()),
            0.92,
            FitParams {
                seed: Some(11),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_pick_best_tie_goes_to_larger_index() {
        let scores = [(1, 5), (2, 9), (3, 9), (4, 2)];
        assert_eq!(pick_best(&scores), Some((3, 9)));
        assert_eq!(pick_best(&[(7, 0), (8, 0)]), Some((8, 0)));
        assert_eq!(pick_best(&[]), None);
    }

    #[test]
    fn test_score_curve_ambiguity() {
        assert!(ScoreCurve::new(vec![(1, 4), (2, 4)]).is_ambiguous());
        assert!(!ScoreCurve::new(vec![(1, 4), (2, 3)]).is_ambiguous());
    }

    #[test]
    fn test_exhaustive_finds_engineered_overlap() {
        init_tracing();
        let (front, back) = overlapping_pair(40, 40, 60, 50, 12, 5);
        let est = find_overlap_exhaustive(&service(), &front, &back, 1, 20).unwrap();
        assert_eq!(est.overlap, 12);
        assert_eq!(est.curve.points().len(), 20);
        assert_eq!(est.curve.points()[0].0, 1);
        assert!(!est.curve.is_ambiguous());
    }

    #[test]
    fn test_exhaustive_flat_curve_returns_window_end() {
        let (front, back) = overlapping_pair(20, 20, 10, 10, 3, 1);
        let blind = FeatureMatchService::new(Box::new(NoFeatures), 0.92, FitParams::default());
        let est = find_overlap_exhaustive(&blind, &front, &back, 2, 7).unwrap();
        assert_eq!(est.overlap, 7);
        assert!(est.curve.points().iter().all(|&(_, s)| s == 0));
    }

    #[test]
    fn test_exhaustive_rejects_bad_window() {
        let v = noise_volume(10, 10, 5, 1);
        for (start, end) in [(0, 3), (4, 2), (1, 6)] {
            assert!(matches!(
                find_overlap_exhaustive(&service(), &v, &v, start, end),
                Err(Error::InvalidSearchWindow { .. })
            ));
        }
    }

    #[test]
    fn test_recursive_matches_exhaustive() {
        let (front, back) = overlapping_pair(40, 40, 64, 64, 32, 9);
        let recursive = find_overlap_recursive(&service(), &front, &back, 4).unwrap();
        let exhaustive = find_overlap_exhaustive(&service(), &front, &back, 1, 64).unwrap();
        assert_eq!(recursive.overlap, 32);
        assert_eq!(exhaustive.overlap, 32);
        // two coarse levels of four groups, then seven single slices
        assert_eq!(recursive.curve.points().len(), 15);
    }

    #[test]
    fn test_recursive_resolves_overlaps_between_group_ends() {
        init_tracing();
        for overlap in [29, 30, 31] {
            let (front, back) = overlapping_pair(40, 40, 64, 64, overlap, 9);
            let recursive = find_overlap_recursive(&service(), &front, &back, 4).unwrap();
            let exhaustive = find_overlap_exhaustive(&service(), &front, &back, 1, 64).unwrap();
            assert_eq!(recursive.overlap, overlap);
            assert_eq!(exhaustive.overlap, overlap);
        }
    }

    #[test]
    fn test_recursive_scores_every_slice_of_shallow_back() {
        let (front, back) = overlapping_pair(40, 40, 20, 3, 2, 4);
        let est = find_overlap_recursive(&service(), &front, &back, 5).unwrap();
        assert_eq!(est.overlap, 2);
        assert_eq!(est.curve.points().len(), 3);

        let est = find_overlap_recursive(&service(), &front, &back, 1).unwrap();
        assert_eq!(est.overlap, 2);
    }

    #[test]
    fn test_recursive_rejects_zero_branch() {
        let v = noise_volume(10, 10, 3, 2);
        assert!(matches!(
            find_overlap_recursive(&service(), &v, &v, 0),
            Err(Error::InvalidConfig(_))
        ));
    }
}
