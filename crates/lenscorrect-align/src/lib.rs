//! Residual alignment of rendered channels.
//!
//! Candidate matches come from a [`FeatureMatcher`] (by default the
//! [`BlockMatcher`]), are filtered with [`filter_ransac`] and fitted with a
//! translation or rigid model. [`AlignmentRefiner::refine`] aligns every
//! plane against the first; [`append_corrections`] folds the results into
//! the calibration chains.

mod matcher;
mod model;
mod ransac;
mod refine;

pub use matcher::{BlockMatcher, BlockMatcherParams, FeatureMatcher, MatchParams};
pub use model::{CorrectionModel, Model2D, PointMatch};
pub use ransac::{filter_by_trust, filter_ransac, RansacParams, RansacResult};
pub use refine::{append_corrections, AlignParams, AlignmentRefiner, Correction};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AlignError {
    #[error("need at least {needed} matches, got {got}")]
    NotEnoughDataPoints { needed: usize, got: usize },
    #[error("no alignment found: {inliers} inliers of {candidates} candidates, need {needed}")]
    NoAlignmentFound {
        inliers: usize,
        needed: usize,
        candidates: usize,
    },
    #[error("model fit is ill-defined for the given matches")]
    FitFailed,
}
