//! Built-in primitive model classes.
//!
//! The tags and parameter layouts match the calibration files written by the
//! TrakEM2 / mpicbg tool chain, so existing calibrations load unchanged.

use std::sync::Arc;

use crate::transform::{Point, PointMapping, PrimitiveTransform, Transform};

pub const COMPOSITE_TAG: &str = "mpicbg.trakem2.transform.CoordinateTransformList";
pub const TRANSLATION_TAG: &str = "mpicbg.trakem2.transform.TranslationModel2D";
pub const RIGID_TAG: &str = "mpicbg.trakem2.transform.RigidModel2D";
pub const AFFINE_TAG: &str = "mpicbg.trakem2.transform.AffineModel2D";
pub const NON_LINEAR_TAG: &str = "lenscorrection.NonLinearTransform";

/// Malformed model parameter text.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ModelParseError {
    #[error("expected {expected} parameters, got {got}")]
    ParameterCount { expected: usize, got: usize },
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("inconsistent parameter layout: {0}")]
    InvalidLayout(String),
}

fn parse_numbers(data: &str) -> Result<Vec<f64>, ModelParseError> {
    data.split_whitespace()
        .map(|f| {
            f.parse::<f64>()
                .map_err(|_| ModelParseError::InvalidNumber(f.to_string()))
        })
        .collect()
}

fn parse_exact<const N: usize>(data: &str) -> Result<[f64; N], ModelParseError> {
    let values = parse_numbers(data)?;
    let got = values.len();
    values
        .try_into()
        .map_err(|_| ModelParseError::ParameterCount { expected: N, got })
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn primitive<M: PointMapping + 'static>(tag: &str, model: M) -> Transform {
    Transform::Primitive(PrimitiveTransform::new(tag, Arc::new(model)))
}

/// Pure translation, parameters `"tx ty"`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Translation2D {
    pub tx: f64,
    pub ty: f64,
}

impl Translation2D {
    pub fn new(tx: f64, ty: f64) -> Self {
        Self { tx, ty }
    }

    pub fn parse(data: &str) -> Result<Self, ModelParseError> {
        let [tx, ty] = parse_exact::<2>(data)?;
        Ok(Self { tx, ty })
    }

    pub fn into_transform(self) -> Transform {
        primitive(TRANSLATION_TAG, self)
    }
}

impl PointMapping for Translation2D {
    #[inline]
    fn apply(&self, p: Point) -> Point {
        Point::new(p.x + self.tx, p.y + self.ty)
    }

    fn to_data_string(&self) -> String {
        join(&[self.tx, self.ty])
    }
}

impl From<Translation2D> for Transform {
    fn from(t: Translation2D) -> Self {
        t.into_transform()
    }
}

/// Rotation by `theta` (radians) followed by translation, parameters `"theta tx ty"`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rigid2D {
    pub theta: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Rigid2D {
    pub fn new(theta: f64, tx: f64, ty: f64) -> Self {
        Self { theta, tx, ty }
    }

    pub fn parse(data: &str) -> Result<Self, ModelParseError> {
        let [theta, tx, ty] = parse_exact::<3>(data)?;
        Ok(Self { theta, tx, ty })
    }

    pub fn into_transform(self) -> Transform {
        primitive(RIGID_TAG, self)
    }
}

impl PointMapping for Rigid2D {
    #[inline]
    fn apply(&self, p: Point) -> Point {
        let (s, c) = self.theta.sin_cos();
        Point::new(c * p.x - s * p.y + self.tx, s * p.x + c * p.y + self.ty)
    }

    fn to_data_string(&self) -> String {
        join(&[self.theta, self.tx, self.ty])
    }
}

impl From<Rigid2D> for Transform {
    fn from(t: Rigid2D) -> Self {
        t.into_transform()
    }
}

/// General affine map, parameters in column-major order `"m00 m10 m01 m11 m02 m12"`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine2D {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m11: f64,
    pub m02: f64,
    pub m12: f64,
}

impl Affine2D {
    pub fn new(m00: f64, m10: f64, m01: f64, m11: f64, m02: f64, m12: f64) -> Self {
        Self {
            m00,
            m10,
            m01,
            m11,
            m02,
            m12,
        }
    }

    pub fn parse(data: &str) -> Result<Self, ModelParseError> {
        let [m00, m10, m01, m11, m02, m12] = parse_exact::<6>(data)?;
        Ok(Self::new(m00, m10, m01, m11, m02, m12))
    }

    pub fn into_transform(self) -> Transform {
        primitive(AFFINE_TAG, self)
    }
}

impl PointMapping for Affine2D {
    #[inline]
    fn apply(&self, p: Point) -> Point {
        Point::new(
            self.m00 * p.x + self.m01 * p.y + self.m02,
            self.m10 * p.x + self.m11 * p.y + self.m12,
        )
    }

    fn to_data_string(&self) -> String {
        join(&[self.m00, self.m10, self.m01, self.m11, self.m02, self.m12])
    }
}

/// Polynomial lens-distortion model.
///
/// The point is expanded into all monomials `x^j * y^(i-j)` up to
/// `dimension`, each normalized by `(f - mean) / var`, with a constant `100`
/// as the last feature. The output is the feature vector projected onto the
/// two columns of `beta`.
///
/// Parameters: `dimension length beta(length x 2, row-major) mean(length)
/// var(length) width height`.
#[derive(Clone, Debug, PartialEq)]
pub struct NonLinear2D {
    dimension: usize,
    beta: Vec<[f64; 2]>,
    norm_mean: Vec<f64>,
    norm_var: Vec<f64>,
    width: u32,
    height: u32,
}

impl NonLinear2D {
    /// Highest polynomial degree accepted from parameter text.
    pub const MAX_DIMENSION: usize = 32;

    /// Number of features for a polynomial of the given degree, `None` on
    /// overflow.
    pub fn feature_len(dimension: usize) -> Option<usize> {
        let a = dimension.checked_add(1)?;
        let b = dimension.checked_add(2)?;
        Some(a.checked_mul(b)? / 2)
    }

    fn checked_len(dimension: usize) -> Result<usize, ModelParseError> {
        if dimension > Self::MAX_DIMENSION {
            return Err(ModelParseError::InvalidLayout(format!(
                "dimension {dimension} exceeds {}",
                Self::MAX_DIMENSION
            )));
        }
        Self::feature_len(dimension).ok_or_else(|| {
            ModelParseError::InvalidLayout(format!("dimension {dimension} overflows"))
        })
    }

    pub fn new(
        dimension: usize,
        beta: Vec<[f64; 2]>,
        norm_mean: Vec<f64>,
        norm_var: Vec<f64>,
        width: u32,
        height: u32,
    ) -> Result<Self, ModelParseError> {
        let len = Self::checked_len(dimension)?;
        if beta.len() != len || norm_mean.len() != len || norm_var.len() != len {
            return Err(ModelParseError::InvalidLayout(format!(
                "dimension {dimension} needs {len} coefficients per table"
            )));
        }
        Ok(Self {
            dimension,
            beta,
            norm_mean,
            norm_var,
            width,
            height,
        })
    }

    /// Model that reproduces its input: `beta` picks the normalized `x` and
    /// `y` features back out.
    ///
    /// `dimension` is clamped to `1..=MAX_DIMENSION`.
    pub fn identity(dimension: usize, width: u32, height: u32) -> Self {
        let dimension = dimension.clamp(1, Self::MAX_DIMENSION);
        let len = (dimension + 1) * (dimension + 2) / 2;
        let mut beta = vec![[0.0, 0.0]; len];
        // degree-1 features are [x, y]
        beta[0] = [1.0, 0.0];
        beta[1] = [0.0, 1.0];
        Self {
            dimension,
            beta,
            norm_mean: vec![0.0; len],
            norm_var: vec![1.0; len],
            width,
            height,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn parse(data: &str) -> Result<Self, ModelParseError> {
        let values = parse_numbers(data)?;
        if values.len() < 2 {
            return Err(ModelParseError::ParameterCount {
                expected: 2,
                got: values.len(),
            });
        }
        let dimension = as_count(values[0])?;
        let length = as_count(values[1])?;
        if length != Self::checked_len(dimension)? {
            return Err(ModelParseError::InvalidLayout(format!(
                "length {length} does not match dimension {dimension}"
            )));
        }

        let expected = 2 + 4 * length + 2;
        if values.len() != expected {
            return Err(ModelParseError::ParameterCount {
                expected,
                got: values.len(),
            });
        }

        let mut rest = values[2..].iter().copied();
        let beta: Vec<[f64; 2]> = (0..length)
            .map(|_| [rest.next().unwrap_or(0.0), rest.next().unwrap_or(0.0)])
            .collect();
        let norm_mean: Vec<f64> = rest.by_ref().take(length).collect();
        let norm_var: Vec<f64> = rest.by_ref().take(length).collect();
        let width = as_u32(rest.next().unwrap_or(0.0))?;
        let height = as_u32(rest.next().unwrap_or(0.0))?;

        Self::new(dimension, beta, norm_mean, norm_var, width, height)
    }

    pub fn into_transform(self) -> Transform {
        primitive(NON_LINEAR_TAG, self)
    }

    fn features(&self, p: Point) -> Vec<f64> {
        let len = self.beta.len();
        let mut out = Vec::with_capacity(len);
        for i in 1..=self.dimension as i32 {
            for j in (0..=i).rev() {
                out.push(p.x.powi(j) * p.y.powi(i - j));
            }
        }
        out.push(0.0);
        for k in 0..len - 1 {
            out[k] = (out[k] - self.norm_mean[k]) / self.norm_var[k];
        }
        out[len - 1] = 100.0;
        out
    }
}

fn as_count(v: f64) -> Result<usize, ModelParseError> {
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 {
        Ok(v as usize)
    } else {
        Err(ModelParseError::InvalidNumber(v.to_string()))
    }
}

fn as_u32(v: f64) -> Result<u32, ModelParseError> {
    u32::try_from(as_count(v)?).map_err(|_| ModelParseError::InvalidNumber(v.to_string()))
}

impl PointMapping for NonLinear2D {
    fn apply(&self, p: Point) -> Point {
        let f = self.features(p);
        let (mut x, mut y) = (0.0, 0.0);
        for (fk, b) in f.iter().zip(&self.beta) {
            x += fk * b[0];
            y += fk * b[1];
        }
        Point::new(x, y)
    }

    fn to_data_string(&self) -> String {
        let mut values = Vec::with_capacity(4 * self.beta.len() + 4);
        values.push(self.dimension as f64);
        values.push(self.beta.len() as f64);
        values.extend(self.beta.iter().flatten());
        values.extend(&self.norm_mean);
        values.extend(&self.norm_var);
        values.push(self.width as f64);
        values.push(self.height as f64);
        join(&values)
    }
}
