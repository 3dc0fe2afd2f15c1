//! Single-channel pixel planes and interpolation kernels.
//!
//! Sampling coordinates are index coordinates: sample `(i, j)` sits exactly
//! on pixel `(i, j)`. Reads outside the plane clamp to the nearest border
//! pixel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coordinates closer than this to an integer are snapped onto it, so
/// round-off from the mesh inverse never bleeds a neighbour into the result.
const SNAP_EPS: f64 = 1e-9;

/// Scalar pixel type stored in an [`ImagePlane`].
pub trait Pixel: Copy + Default + Send + Sync + fmt::Debug + 'static {
    fn to_f32(self) -> f32;

    /// Convert back, clamping to the type's range.
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, u8::MAX as f32) as u8
    }
}

impl Pixel for u16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, u16::MAX as f32) as u16
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaneError {
    #[error("plane {width}x{height} does not match {len} samples")]
    DataLength {
        width: usize,
        height: usize,
        len: usize,
    },
}

/// Row-major single-channel image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImagePlane<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Pixel> ImagePlane<T> {
    pub fn new(width: usize, height: usize, data: Vec<T>) -> Result<Self, PlaneError> {
        if data.len() != width * height {
            return Err(PlaneError::DataLength {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Plane filled with `T::default()`.
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![T::default(); width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x < self.width && y < self.height {
            Some(self.data[y * self.width + x])
        } else {
            None
        }
    }

    /// Read with coordinates clamped to the border.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> T {
        let xi = x.clamp(0, self.width as i64 - 1) as usize;
        let yi = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[yi * self.width + xi]
    }

    pub fn to_f32(&self) -> ImagePlane<f32> {
        ImagePlane {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|v| v.to_f32()).collect(),
        }
    }

    /// Copy out the rectangle `[x, x + width) x [y, y + height)`, clamped to the plane.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Self {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let w = width.min(self.width - x0);
        let h = height.min(self.height - y0);
        let mut data = Vec::with_capacity(w * h);
        for row in y0..y0 + h {
            let start = row * self.width + x0;
            data.extend_from_slice(&self.data[start..start + w]);
        }
        Self {
            width: w,
            height: h,
            data,
        }
    }
}

/// Interpolation kernel used when resampling.
///
/// Deserializes through [`FromStr`], so config files accept the same names
/// as the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported interpolation `{0}` (expected nearest, bilinear or bicubic)")]
pub struct UnsupportedInterpolation(pub String);

impl FromStr for Interpolation {
    type Err = UnsupportedInterpolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" | "nearest_neighbor" | "nn" => Ok(Interpolation::Nearest),
            "bilinear" | "linear" => Ok(Interpolation::Bilinear),
            "bicubic" | "cubic" => Ok(Interpolation::Bicubic),
            _ => Err(UnsupportedInterpolation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Interpolation {
    type Error = UnsupportedInterpolation;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Bilinear => "bilinear",
            Interpolation::Bicubic => "bicubic",
        })
    }
}

#[inline]
fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPS {
        r
    } else {
        v
    }
}

/// Sample `plane` at index coordinates `(x, y)`.
#[inline]
pub fn sample<T: Pixel>(plane: &ImagePlane<T>, x: f64, y: f64, interp: Interpolation) -> f32 {
    let (x, y) = (snap(x), snap(y));
    match interp {
        Interpolation::Nearest => sample_nearest(plane, x, y),
        Interpolation::Bilinear => sample_bilinear(plane, x, y),
        Interpolation::Bicubic => sample_bicubic(plane, x, y),
    }
}

#[inline]
fn sample_nearest<T: Pixel>(plane: &ImagePlane<T>, x: f64, y: f64) -> f32 {
    plane.get_clamped(x.round() as i64, y.round() as i64).to_f32()
}

#[inline]
fn sample_bilinear<T: Pixel>(plane: &ImagePlane<T>, x: f64, y: f64) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let p00 = plane.get_clamped(x0, y0).to_f32();
    let p10 = plane.get_clamped(x0 + 1, y0).to_f32();
    let p01 = plane.get_clamped(x0, y0 + 1).to_f32();
    let p11 = plane.get_clamped(x0 + 1, y0 + 1).to_f32();

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Keys cubic convolution weight with `a = -0.5`.
#[inline]
fn cubic_weight(t: f32) -> f32 {
    const A: f32 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        ((A + 2.0) * t - (A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((A * t - 5.0 * A) * t + 8.0 * A) * t - 4.0 * A
    } else {
        0.0
    }
}

fn sample_bicubic<T: Pixel>(plane: &ImagePlane<T>, x: f64, y: f64) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let wx = [
        cubic_weight(1.0 + fx),
        cubic_weight(fx),
        cubic_weight(1.0 - fx),
        cubic_weight(2.0 - fx),
    ];
    let wy = [
        cubic_weight(1.0 + fy),
        cubic_weight(fy),
        cubic_weight(1.0 - fy),
        cubic_weight(2.0 - fy),
    ];

    let mut acc = 0.0f32;
    for (j, wyj) in wy.iter().enumerate() {
        let yy = y0 - 1 + j as i64;
        let mut row = 0.0f32;
        for (i, wxi) in wx.iter().enumerate() {
            row += wxi * plane.get_clamped(x0 - 1 + i as i64, yy).to_f32();
        }
        acc += wyj * row;
    }
    acc
}
