//! Robust model estimation: random-sample consensus plus an iterative
//! median trust filter on the consensus set.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::model::{Model2D, PointMatch};
use crate::AlignError;

/// Residual threshold floor so exact fits are not emptied by round-off.
const TRUST_FLOOR: f64 = 1e-6;

fn default_iterations() -> usize {
    1000
}

fn default_max_epsilon() -> f64 {
    5.0
}

fn default_min_num_inliers() -> usize {
    10
}

fn default_max_trust() -> f64 {
    3.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RansacParams {
    /// Number of minimal samples drawn.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Inlier tolerance in pixels.
    #[serde(default = "default_max_epsilon")]
    pub max_epsilon: f64,
    #[serde(default)]
    pub min_inlier_ratio: f64,
    #[serde(default = "default_min_num_inliers")]
    pub min_num_inliers: usize,
    /// Matches with residual above `max_trust * median` are dropped.
    #[serde(default = "default_max_trust")]
    pub max_trust: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            max_epsilon: default_max_epsilon(),
            min_inlier_ratio: 0.0,
            min_num_inliers: default_min_num_inliers(),
            max_trust: default_max_trust(),
            seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RansacResult<M> {
    pub model: M,
    pub inliers: Vec<PointMatch>,
}

/// Sample `k` distinct indices from `0..n` using Fisher–Yates partial shuffle.
fn sample_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k <= n);
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}

fn consensus<M: Model2D>(
    model: &M,
    candidates: &[PointMatch],
    epsilon: f64,
) -> (Vec<bool>, usize, f64) {
    let mut mask = vec![false; candidates.len()];
    let mut count = 0;
    let mut cost = 0.0;
    for (m, flag) in candidates.iter().zip(mask.iter_mut()) {
        let r = model.residual(m);
        if r < epsilon {
            *flag = true;
            count += 1;
            cost += r;
        }
    }
    (mask, count, cost)
}

/// Fit `M` to `candidates`, rejecting outliers.
///
/// Draws `iterations` minimal samples and keeps the consensus set with the
/// most inliers (lower summed residual breaks ties) that meets both support
/// thresholds. The set is then refined with [`filter_by_trust`] and the
/// support threshold checked again.
pub fn filter_ransac<M: Model2D>(
    candidates: &[PointMatch],
    params: &RansacParams,
) -> Result<RansacResult<M>, AlignError> {
    let n = candidates.len();
    if n < M::MIN_MATCHES {
        return Err(AlignError::NotEnoughDataPoints {
            needed: M::MIN_MATCHES,
            got: n,
        });
    }
    let no_alignment = |inliers: usize| AlignError::NoAlignmentFound {
        inliers,
        needed: params.min_num_inliers,
        candidates: n,
    };

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Vec<bool>, usize, f64)> = None;
    let mut most_seen = 0usize;

    for _ in 0..params.iterations {
        let sample: Vec<PointMatch> = sample_indices(&mut rng, n, M::MIN_MATCHES)
            .into_iter()
            .map(|i| candidates[i])
            .collect();
        let Ok(model) = M::fit(&sample) else {
            continue;
        };

        let (mask, count, cost) = consensus(&model, candidates, params.max_epsilon);
        most_seen = most_seen.max(count);
        if count < params.min_num_inliers
            || (count as f64) < params.min_inlier_ratio * n as f64
        {
            continue;
        }
        let better = match &best {
            None => true,
            Some((_, c, k)) => count > *c || (count == *c && cost < *k),
        };
        if better {
            let all = count == n;
            best = Some((mask, count, cost));
            if all && cost == 0.0 {
                break;
            }
        }
    }

    let Some((mask, _, _)) = best else {
        log::debug!("ransac: best consensus {most_seen} of {n}, need {}", params.min_num_inliers);
        return Err(no_alignment(most_seen));
    };
    let consensus_set: Vec<PointMatch> = candidates
        .iter()
        .zip(&mask)
        .filter(|(_, &keep)| keep)
        .map(|(m, _)| *m)
        .collect();

    let (model, inliers) = filter_by_trust::<M>(consensus_set, params.max_trust)?;
    if inliers.len() < params.min_num_inliers {
        return Err(no_alignment(inliers.len()));
    }
    Ok(RansacResult { model, inliers })
}

/// Refit and drop matches whose residual exceeds `max_trust` times the
/// median residual, until no match is dropped.
pub fn filter_by_trust<M: Model2D>(
    mut matches: Vec<PointMatch>,
    max_trust: f64,
) -> Result<(M, Vec<PointMatch>), AlignError> {
    loop {
        let model = M::fit(&matches)?;
        let residuals: Vec<f64> = matches.iter().map(|m| model.residual(m)).collect();
        let threshold = (max_trust * median(&residuals)).max(TRUST_FLOOR);

        let before = matches.len();
        let kept: Vec<PointMatch> = matches
            .iter()
            .zip(&residuals)
            .filter(|(_, &r)| r <= threshold)
            .map(|(m, _)| *m)
            .collect();
        if kept.len() == before {
            return Ok((model, matches));
        }
        matches = kept;
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        0.5 * (v[mid - 1] + v[mid])
    } else {
        v[mid]
    }
}
