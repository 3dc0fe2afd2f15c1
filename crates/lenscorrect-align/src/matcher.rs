//! Candidate correspondences between two rendered planes.

use lenscorrect_core::{ImagePlane, Point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::PointMatch;

fn default_min_scale() -> f64 {
    0.2
}

fn default_max_scale() -> f64 {
    1.0
}

fn default_fd_size() -> usize {
    4
}

fn default_rod() -> f64 {
    0.92
}

/// Parameters handed to every [`FeatureMatcher`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    /// Smallest octave scale considered by scale-space matchers.
    #[serde(default = "default_min_scale")]
    pub min_scale: f64,
    #[serde(default = "default_max_scale")]
    pub max_scale: f64,
    /// Descriptor grid size for scale-space matchers.
    #[serde(default = "default_fd_size")]
    pub fd_size: usize,
    /// Ratio of best to second-best match distance below which a match is kept.
    #[serde(default = "default_rod")]
    pub rod: f64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
            fd_size: default_fd_size(),
            rod: default_rod(),
        }
    }
}

/// Produces candidate matches from `subject` (`p1`) to `reference` (`p2`).
pub trait FeatureMatcher: Send + Sync {
    fn match_planes(
        &self,
        subject: &ImagePlane<f32>,
        reference: &ImagePlane<f32>,
        params: &MatchParams,
    ) -> Vec<PointMatch>;
}

fn default_patch_radius() -> usize {
    8
}

fn default_search_radius() -> usize {
    12
}

fn default_step() -> usize {
    16
}

fn default_min_std() -> f32 {
    2.0
}

fn default_min_separation() -> usize {
    2
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockMatcherParams {
    #[serde(default = "default_patch_radius")]
    pub patch_radius: usize,
    /// Largest displacement searched, per axis.
    #[serde(default = "default_search_radius")]
    pub search_radius: usize,
    /// Spacing of patch centers on the subject.
    #[serde(default = "default_step")]
    pub step: usize,
    /// Patches flatter than this are skipped.
    #[serde(default = "default_min_std")]
    pub min_std: f32,
    /// Chebyshev distance between the best and the runner-up displacement.
    #[serde(default = "default_min_separation")]
    pub min_separation: usize,
}

impl Default for BlockMatcherParams {
    fn default() -> Self {
        Self {
            patch_radius: default_patch_radius(),
            search_radius: default_search_radius(),
            step: default_step(),
            min_std: default_min_std(),
            min_separation: default_min_separation(),
        }
    }
}

/// Normalized cross-correlation of square patches at integer displacements.
///
/// Ignores the scale range in [`MatchParams`]; only `rod` applies.
#[derive(Clone, Debug, Default)]
pub struct BlockMatcher {
    pub params: BlockMatcherParams,
}

struct PatchStats {
    values: Vec<f32>,
    std: f32,
}

impl BlockMatcher {
    pub fn new(params: BlockMatcherParams) -> Self {
        Self { params }
    }

    fn centers(&self, width: usize, height: usize) -> Vec<(usize, usize)> {
        let margin = self.params.patch_radius + self.params.search_radius;
        let step = self.params.step.max(1);
        if width <= 2 * margin || height <= 2 * margin {
            return Vec::new();
        }
        let mut out = Vec::new();
        for cy in (margin..height - margin).step_by(step) {
            for cx in (margin..width - margin).step_by(step) {
                out.push((cx, cy));
            }
        }
        out
    }

    /// Zero-mean patch around `(cx, cy)`.
    fn patch(&self, plane: &ImagePlane<f32>, cx: usize, cy: usize) -> PatchStats {
        let r = self.params.patch_radius;
        let side = 2 * r + 1;
        let mut values = Vec::with_capacity(side * side);
        let row_len = plane.width();
        let data = plane.data();
        for y in cy - r..=cy + r {
            let start = y * row_len + cx - r;
            values.extend_from_slice(&data[start..start + side]);
        }
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let mut var = 0.0f32;
        for v in values.iter_mut() {
            *v -= mean;
            var += *v * *v;
        }
        PatchStats {
            values,
            std: (var / n).sqrt(),
        }
    }

    fn ncc(a: &PatchStats, b: &PatchStats) -> f32 {
        if b.std <= f32::EPSILON {
            return -1.0;
        }
        let n = a.values.len() as f32;
        let dot: f32 = a.values.iter().zip(&b.values).map(|(x, y)| x * y).sum();
        dot / (n * a.std * b.std)
    }

    fn match_patch(
        &self,
        subject: &ImagePlane<f32>,
        reference: &ImagePlane<f32>,
        cx: usize,
        cy: usize,
        rod: f64,
    ) -> Option<PointMatch> {
        let p = self.patch(subject, cx, cy);
        if p.std < self.params.min_std {
            return None;
        }

        let s = self.params.search_radius as i64;
        let side = 2 * s + 1;
        let mut scores = Vec::with_capacity((side * side) as usize);
        for dy in -s..=s {
            for dx in -s..=s {
                let q = self.patch(
                    reference,
                    (cx as i64 + dx) as usize,
                    (cy as i64 + dy) as usize,
                );
                scores.push((dx, dy, Self::ncc(&p, &q)));
            }
        }

        // strict comparison keeps the first maximum in scan order
        let (bx, by, best) = scores
            .iter()
            .copied()
            .fold((0, 0, f32::NEG_INFINITY), |acc, s| if s.2 > acc.2 { s } else { acc });
        let sep = self.params.min_separation as i64;
        let second = scores
            .iter()
            .filter(|(dx, dy, _)| (dx - bx).abs().max((dy - by).abs()) >= sep)
            .map(|s| s.2)
            .fold(f32::NEG_INFINITY, f32::max);

        let best_d = (1.0 - best as f64).max(0.0);
        let second_d = (1.0 - second as f64).max(0.0);
        if !(best_d < rod * second_d) {
            return None;
        }

        let p1 = Point::new(cx as f64 + 0.5, cy as f64 + 0.5);
        let p2 = Point::new(p1.x + bx as f64, p1.y + by as f64);
        Some(PointMatch::new(p1, p2))
    }
}

impl FeatureMatcher for BlockMatcher {
    fn match_planes(
        &self,
        subject: &ImagePlane<f32>,
        reference: &ImagePlane<f32>,
        params: &MatchParams,
    ) -> Vec<PointMatch> {
        let width = subject.width().min(reference.width());
        let height = subject.height().min(reference.height());
        let centers = self.centers(width, height);
        let matches: Vec<PointMatch> = centers
            .par_iter()
            .filter_map(|&(cx, cy)| self.match_patch(subject, reference, cx, cy, params.rod))
            .collect();
        log::debug!(
            "block matcher: {} candidates from {} patches",
            matches.len(),
            centers.len()
        );
        matches
    }
}
