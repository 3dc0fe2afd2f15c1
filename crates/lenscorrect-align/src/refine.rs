use lenscorrect_core::{CompositeTransform, ImagePlane, Rigid2D, Transform, Translation2D};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::matcher::{BlockMatcher, FeatureMatcher, MatchParams};
use crate::model::{CorrectionModel, Model2D, PointMatch};
use crate::ransac::{filter_ransac, RansacParams};
use crate::AlignError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignParams {
    #[serde(default)]
    pub model: CorrectionModel,
    #[serde(default)]
    pub matching: MatchParams,
    #[serde(default)]
    pub ransac: RansacParams,
}

/// A fitted correction, ready to append to a subject chain.
#[derive(Clone, Debug)]
pub struct Correction {
    pub transform: Transform,
    pub inliers: Vec<PointMatch>,
    pub candidates: usize,
}

impl Correction {
    fn identity(model: CorrectionModel) -> Self {
        Self {
            transform: identity_transform(model),
            inliers: Vec::new(),
            candidates: 0,
        }
    }
}

fn identity_transform(model: CorrectionModel) -> Transform {
    match model {
        CorrectionModel::Translation => Translation2D::identity().to_transform(),
        CorrectionModel::Rigid => Rigid2D::identity().to_transform(),
    }
}

/// Fits residual corrections of each rendering against the first one.
#[derive(Clone, Debug)]
pub struct AlignmentRefiner<F = BlockMatcher> {
    pub params: AlignParams,
    matcher: F,
}

impl AlignmentRefiner<BlockMatcher> {
    pub fn new(params: AlignParams) -> Self {
        Self::with_matcher(params, BlockMatcher::default())
    }
}

impl<F: FeatureMatcher> AlignmentRefiner<F> {
    pub fn with_matcher(params: AlignParams, matcher: F) -> Self {
        Self { params, matcher }
    }

    pub fn matcher(&self) -> &F {
        &self.matcher
    }

    /// Correction mapping `subject` coordinates onto `reference` coordinates.
    pub fn align_pair(
        &self,
        subject: &ImagePlane<f32>,
        reference: &ImagePlane<f32>,
    ) -> Result<Correction, AlignError> {
        let candidates = self
            .matcher
            .match_planes(subject, reference, &self.params.matching);
        match self.params.model {
            CorrectionModel::Translation => self.fit::<Translation2D>(&candidates),
            CorrectionModel::Rigid => self.fit::<Rigid2D>(&candidates),
        }
    }

    fn fit<M: Model2D>(&self, candidates: &[PointMatch]) -> Result<Correction, AlignError> {
        let result = filter_ransac::<M>(candidates, &self.params.ransac).map_err(|e| match e {
            AlignError::NotEnoughDataPoints { .. } => AlignError::NoAlignmentFound {
                inliers: 0,
                needed: self.params.ransac.min_num_inliers,
                candidates: candidates.len(),
            },
            other => other,
        })?;
        log::info!(
            "{} of {} matches found; correction {:?}",
            result.inliers.len(),
            candidates.len(),
            result.model
        );
        Ok(Correction {
            transform: result.model.to_transform(),
            inliers: result.inliers,
            candidates: candidates.len(),
        })
    }

    /// Corrections for every plane against `planes[0]`.
    ///
    /// The first entry is always the identity. Subjects are aligned in
    /// parallel and fail independently.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, planes), fields(planes = planes.len()))
    )]
    pub fn refine(&self, planes: &[ImagePlane<f32>]) -> Vec<Result<Correction, AlignError>> {
        let Some((reference, subjects)) = planes.split_first() else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(planes.len());
        out.push(Ok(Correction::identity(self.params.model)));
        out.par_extend(
            subjects
                .par_iter()
                .map(|subject| self.align_pair(subject, reference)),
        );
        out
    }
}

/// Append each successful correction to its chain.
///
/// A failed subject keeps its chain unchanged and is logged; returns the
/// number of failures.
pub fn append_corrections(
    chains: &mut [CompositeTransform],
    corrections: &[Result<Correction, AlignError>],
) -> usize {
    let mut failed = 0;
    for (i, (chain, correction)) in chains.iter_mut().zip(corrections).enumerate() {
        match correction {
            Ok(c) => chain.append(c.transform.clone()),
            Err(e) => {
                failed += 1;
                log::warn!("channel {i}: {e}; keeping its chain without correction");
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lenscorrect_core::{Point, TRANSLATION_TAG};

    /// Returns a fixed match list regardless of input.
    struct Canned(Vec<PointMatch>);

    impl FeatureMatcher for Canned {
        fn match_planes(
            &self,
            _: &ImagePlane<f32>,
            _: &ImagePlane<f32>,
            _: &MatchParams,
        ) -> Vec<PointMatch> {
            self.0.clone()
        }
    }

    fn canned(n: usize, dx: f64) -> Canned {
        Canned(
            (0..n)
                .map(|i| {
                    let p = Point::new(10.0 * i as f64, 3.0 * i as f64);
                    PointMatch::new(p, Point::new(p.x + dx, p.y))
                })
                .collect(),
        )
    }

    fn planes(n: usize) -> Vec<ImagePlane<f32>> {
        (0..n).map(|_| ImagePlane::zeros(8, 8)).collect()
    }

    #[test]
    fn reference_gets_identity() {
        let r = AlignmentRefiner::with_matcher(AlignParams::default(), canned(20, 2.0));
        let out = r.refine(&planes(3));
        assert_eq!(out.len(), 3);
        let first = out[0].as_ref().unwrap();
        assert_eq!(first.transform.tag(), TRANSLATION_TAG);
        assert_eq!(first.transform.apply(Point::new(4.0, 5.0)), Point::new(4.0, 5.0));
        let second = out[1].as_ref().unwrap();
        let shifted = second.transform.apply(Point::new(0.0, 0.0));
        assert!((shifted - Point::new(2.0, 0.0)).norm() < 1e-9);
        assert_eq!(second.candidates, 20);
    }

    #[test]
    fn failed_subject_keeps_chain() {
        let r = AlignmentRefiner::with_matcher(AlignParams::default(), canned(5, 1.0));
        let out = r.refine(&planes(2));
        assert!(matches!(
            out[1],
            Err(AlignError::NoAlignmentFound { needed: 10, .. })
        ));

        let base = CompositeTransform::new().with(Translation2D::new(1.0, 1.0));
        let mut chains = vec![base.clone(), base.clone()];
        let failed = append_corrections(&mut chains, &out);
        assert_eq!(failed, 1);
        assert_eq!(chains[0].len(), 2);
        assert_eq!(chains[1], base);
    }

    #[test]
    fn no_candidates_is_no_alignment() {
        let r = AlignmentRefiner::with_matcher(AlignParams::default(), Canned(Vec::new()));
        assert_eq!(
            r.align_pair(&planes(1)[0], &planes(1)[0]).unwrap_err(),
            AlignError::NoAlignmentFound {
                inliers: 0,
                needed: 10,
                candidates: 0
            }
        );
    }

    #[test]
    fn empty_input_yields_nothing() {
        let r = AlignmentRefiner::new(AlignParams::default());
        assert!(r.refine(&[]).is_empty());
    }
}
