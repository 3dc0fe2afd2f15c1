//! Correction model classes and their closed-form least-squares fits.

use std::fmt;
use std::str::FromStr;

use lenscorrect_core::{Point, PointMapping, Rigid2D, Transform, Translation2D};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::AlignError;

/// Correspondence between a subject point `p1` and a reference point `p2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointMatch {
    pub p1: Point,
    pub p2: Point,
}

impl PointMatch {
    pub fn new(p1: Point, p2: Point) -> Self {
        Self { p1, p2 }
    }
}

/// A model class that can be fitted to matches mapping `p1` onto `p2`.
pub trait Model2D: Clone + fmt::Debug + Send + Sync + Sized {
    /// Smallest sample that determines a model.
    const MIN_MATCHES: usize;

    fn identity() -> Self;

    fn fit(matches: &[PointMatch]) -> Result<Self, AlignError>;

    fn map(&self, p: Point) -> Point;

    fn to_transform(&self) -> Transform;

    /// Distance between the mapped subject point and its reference point.
    #[inline]
    fn residual(&self, m: &PointMatch) -> f64 {
        (self.map(m.p1) - m.p2).norm()
    }
}

fn require(matches: &[PointMatch], needed: usize) -> Result<(), AlignError> {
    if matches.len() < needed {
        return Err(AlignError::NotEnoughDataPoints {
            needed,
            got: matches.len(),
        });
    }
    Ok(())
}

fn centroids(matches: &[PointMatch]) -> (Vector2<f64>, Vector2<f64>) {
    let n = matches.len() as f64;
    let (mut pc, mut qc) = (Vector2::zeros(), Vector2::zeros());
    for m in matches {
        pc += m.p1.coords;
        qc += m.p2.coords;
    }
    (pc / n, qc / n)
}

impl Model2D for Translation2D {
    const MIN_MATCHES: usize = 1;

    fn identity() -> Self {
        Translation2D::new(0.0, 0.0)
    }

    /// Mean displacement.
    fn fit(matches: &[PointMatch]) -> Result<Self, AlignError> {
        require(matches, Self::MIN_MATCHES)?;
        let (pc, qc) = centroids(matches);
        let d = qc - pc;
        Ok(Translation2D::new(d.x, d.y))
    }

    #[inline]
    fn map(&self, p: Point) -> Point {
        self.apply(p)
    }

    fn to_transform(&self) -> Transform {
        (*self).into_transform()
    }
}

impl Model2D for Rigid2D {
    const MIN_MATCHES: usize = 2;

    fn identity() -> Self {
        Rigid2D::new(0.0, 0.0, 0.0)
    }

    /// Rotation from the summed cross/dot products of centered points,
    /// translation from the centroids.
    fn fit(matches: &[PointMatch]) -> Result<Self, AlignError> {
        require(matches, Self::MIN_MATCHES)?;
        let (pc, qc) = centroids(matches);

        let (mut sind, mut cosd) = (0.0f64, 0.0f64);
        for m in matches {
            let a = m.p1.coords - pc;
            let b = m.p2.coords - qc;
            sind += a.x * b.y - a.y * b.x;
            cosd += a.x * b.x + a.y * b.y;
        }
        let norm = sind.hypot(cosd);
        if norm <= f64::EPSILON {
            return Err(AlignError::FitFailed);
        }
        let (s, c) = (sind / norm, cosd / norm);
        let tx = qc.x - c * pc.x + s * pc.y;
        let ty = qc.y - s * pc.x - c * pc.y;
        Ok(Rigid2D::new(s.atan2(c), tx, ty))
    }

    #[inline]
    fn map(&self, p: Point) -> Point {
        self.apply(p)
    }

    fn to_transform(&self) -> Transform {
        (*self).into_transform()
    }
}

/// Which model class to fit for a correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionModel {
    #[default]
    Translation,
    Rigid,
}

impl FromStr for CorrectionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "translation" => Ok(CorrectionModel::Translation),
            "rigid" => Ok(CorrectionModel::Rigid),
            other => Err(format!(
                "unknown correction model `{other}` (expected translation or rigid)"
            )),
        }
    }
}

impl fmt::Display for CorrectionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CorrectionModel::Translation => "translation",
            CorrectionModel::Rigid => "rigid",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_matches(model: &impl Model2D) -> Vec<PointMatch> {
        let mut out = Vec::new();
        for j in 0..4 {
            for i in 0..5 {
                let p = Point::new(10.0 + 20.0 * i as f64, 5.0 + 17.0 * j as f64);
                out.push(PointMatch::new(p, model.map(p)));
            }
        }
        out
    }

    #[test]
    fn translation_fit_is_mean_offset() {
        let truth = Translation2D::new(3.5, -2.0);
        let fitted = Translation2D::fit(&grid_matches(&truth)).unwrap();
        assert_relative_eq!(fitted.tx, 3.5, epsilon = 1e-12);
        assert_relative_eq!(fitted.ty, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn rigid_fit_recovers_rotation() {
        let truth = Rigid2D::new(0.07, -4.0, 9.5);
        let fitted = Rigid2D::fit(&grid_matches(&truth)).unwrap();
        assert_relative_eq!(fitted.theta, 0.07, epsilon = 1e-10);
        assert_relative_eq!(fitted.tx, -4.0, epsilon = 1e-8);
        assert_relative_eq!(fitted.ty, 9.5, epsilon = 1e-8);
    }

    #[test]
    fn identical_points_fit_identity_exactly() {
        let m = grid_matches(&Translation2D::identity());
        let r = Rigid2D::fit(&m).unwrap();
        assert_eq!(r.theta, 0.0);
        assert_relative_eq!(r.tx, 0.0, epsilon = 1e-12);
        assert_relative_eq!(r.ty, 0.0, epsilon = 1e-12);
        assert_eq!(Translation2D::fit(&m).unwrap(), Translation2D::identity());
    }

    #[test]
    fn too_few_or_degenerate_matches() {
        assert!(matches!(
            Translation2D::fit(&[]),
            Err(AlignError::NotEnoughDataPoints { needed: 1, got: 0 })
        ));
        let p = Point::new(1.0, 1.0);
        let same = [PointMatch::new(p, p), PointMatch::new(p, p)];
        assert!(matches!(Rigid2D::fit(&same), Err(AlignError::FitFailed)));
    }

    #[test]
    fn correction_model_names() {
        assert_eq!("Rigid".parse::<CorrectionModel>(), Ok(CorrectionModel::Rigid));
        assert!("affine".parse::<CorrectionModel>().is_err());
        assert_eq!(CorrectionModel::default().to_string(), "translation");
    }
}
