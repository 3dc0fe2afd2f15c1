//! Transform footprints and their intersection.

use serde::{Deserialize, Serialize};

use crate::grid::SampleGrid;
use crate::models::Translation2D;
use crate::transform::{Point, Transform};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Tolerance for snapping sampled coordinates to integer pixel edges.
const EDGE_EPS: f64 = 1e-6;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("nothing to bound: no boxes or points given")]
    EmptyInput,
    #[error("mesh resolution must be at least 1")]
    InvalidMeshResolution,
    #[error("image extent {width}x{height} is empty")]
    InvalidExtent { width: usize, height: usize },
    #[error("bounding boxes do not overlap (intersection {0:?})")]
    NoOverlap(BoundingBox),
    #[error("transform maps the sample grid to non-finite coordinates")]
    NonFinite,
    #[error("footprint [{min_x}, {max_x}] x [{min_y}, {max_y}] exceeds the i32 pixel range")]
    ExtentOverflow {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },
}

/// Integer rectangle `[x, x + width) x [y, y + height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Overlap of two rectangles; empty overlaps keep a zero width/height.
    pub fn intersection(&self, other: &BoundingBox) -> BoundingBox {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        let extent = |lo: i32, hi: i64| (hi - lo as i64).clamp(0, i32::MAX as i64) as i32;
        BoundingBox::new(x0, y0, extent(x0, x1), extent(y0, y1))
    }

    /// Exclusive right edge, widened so it cannot overflow.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge, widened so it cannot overflow.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Smallest integer rectangle enclosing every point.
    ///
    /// Fails on an empty set, non-finite coordinates, or an extent that does
    /// not fit `i32` pixel coordinates.
    pub fn enclosing(
        points: impl IntoIterator<Item = Point>,
    ) -> Result<BoundingBox, BoundsError> {
        let mut min = Point::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(BoundsError::NonFinite);
            }
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        if min.x > max.x {
            return Err(BoundsError::EmptyInput);
        }
        let x = (min.x + EDGE_EPS).floor();
        let y = (min.y + EDGE_EPS).floor();
        let x1 = (max.x - EDGE_EPS).ceil().max(x);
        let y1 = (max.y - EDGE_EPS).ceil().max(y);
        let fits = |v: f64| v >= i32::MIN as f64 && v <= i32::MAX as f64;
        if ![x, y, x1, y1, x1 - x, y1 - y].into_iter().all(fits) {
            return Err(BoundsError::ExtentOverflow {
                min_x: min.x,
                min_y: min.y,
                max_x: max.x,
                max_y: max.y,
            });
        }
        Ok(BoundingBox::new(
            x as i32,
            y as i32,
            (x1 - x) as i32,
            (y1 - y) as i32,
        ))
    }
}

/// Footprint of `transform` applied to a `width x height` image, sampled on
/// a grid with `resolution` cells across the width.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(transform), fields(tag = transform.tag()))
)]
pub fn footprint(
    transform: &Transform,
    width: usize,
    height: usize,
    resolution: usize,
) -> Result<BoundingBox, BoundsError> {
    let grid = SampleGrid::new(width, height, resolution)?;
    let bbox = BoundingBox::enclosing(grid.vertices().map(|p| transform.apply(p)))?;
    log::debug!("footprint of {width}x{height} at resolution {resolution}: {bbox:?}");
    Ok(bbox)
}

/// Fold the boxes left to right with [`BoundingBox::intersection`].
///
/// An empty result is returned as-is; use [`common_canvas`] to reject it.
pub fn intersect(boxes: &[BoundingBox]) -> Result<BoundingBox, BoundsError> {
    let (first, rest) = boxes.split_first().ok_or(BoundsError::EmptyInput)?;
    Ok(rest.iter().fold(*first, |acc, b| acc.intersection(b)))
}

/// Intersection that must have positive area.
pub fn common_canvas(boxes: &[BoundingBox]) -> Result<BoundingBox, BoundsError> {
    let canvas = intersect(boxes)?;
    if canvas.is_empty() {
        return Err(BoundsError::NoOverlap(canvas));
    }
    Ok(canvas)
}

/// Translation mapping the box's top-left corner to the origin.
pub fn offset_to_origin(bbox: &BoundingBox) -> Transform {
    Translation2D::new(-(bbox.x as f64), -(bbox.y as f64)).into_transform()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Affine2D, Rigid2D};
    use crate::transform::CompositeTransform;

    #[test]
    fn identity_footprint_is_image_extent() {
        let b = footprint(&Transform::identity(), 100, 100, 128).unwrap();
        assert_eq!(b, BoundingBox::new(0, 0, 100, 100));
    }

    #[test]
    fn translation_shifts_origin_only() {
        let t: Transform = CompositeTransform::new()
            .with(Translation2D::new(10.0, -5.0))
            .into();
        let b = footprint(&t, 100, 100, 128).unwrap();
        assert_eq!(b, BoundingBox::new(10, -5, 100, 100));
    }

    #[test]
    fn fractional_extent_rounds_outward() {
        let t = Affine2D::new(1.0, 0.0, 0.0, 1.0, 0.5, 0.25).into_transform();
        let b = footprint(&t, 10, 10, 4).unwrap();
        assert_eq!(b, BoundingBox::new(0, 0, 11, 11));
    }

    #[test]
    fn rotation_grows_footprint() {
        let t = Rigid2D::new(0.1, 0.0, 0.0).into_transform();
        let b = footprint(&t, 200, 100, 32).unwrap();
        assert!(b.width > 190 && b.height > 100);
    }

    #[test]
    fn single_box_is_unchanged() {
        let b = BoundingBox::new(-3, 7, 40, 12);
        assert_eq!(intersect(&[b]).unwrap(), b);
        assert_eq!(intersect(&[]), Err(BoundsError::EmptyInput));
    }

    #[test]
    fn intersection_commutes() {
        let a = BoundingBox::new(0, 0, 100, 80);
        let b = BoundingBox::new(10, -5, 100, 100);
        let ab = intersect(&[a, b]).unwrap();
        assert_eq!(ab, intersect(&[b, a]).unwrap());
        assert_eq!(ab, BoundingBox::new(10, 0, 90, 80));
    }

    #[test]
    fn disjoint_boxes_yield_empty_then_no_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 0, 10, 10);
        let i = intersect(&[a, b]).unwrap();
        assert!(i.is_empty());
        assert_eq!(i.area(), 0);
        assert!(matches!(
            common_canvas(&[a, b]),
            Err(BoundsError::NoOverlap(_))
        ));
    }

    #[test]
    fn offset_maps_corner_to_origin() {
        let b = BoundingBox::new(12, -7, 30, 30);
        let t = offset_to_origin(&b);
        assert_eq!(t.apply(Point::new(12.0, -7.0)), Point::new(0.0, 0.0));
    }

    #[test]
    fn non_finite_mapping_is_reported() {
        let t = Affine2D::new(f64::NAN, 0.0, 0.0, 1.0, 0.0, 0.0).into_transform();
        assert_eq!(footprint(&t, 10, 10, 2), Err(BoundsError::NonFinite));
    }

    #[test]
    fn intersection_near_i32_limit_does_not_overflow() {
        let far = BoundingBox::new(i32::MAX - 10, 0, 100, 10);
        let near = BoundingBox::new(0, 0, 10, 10);
        let i = far.intersection(&near);
        assert!(i.is_empty());
        assert_eq!(far.right(), i32::MAX as i64 + 90);

        let overlap = far.intersection(&BoundingBox::new(i32::MAX - 20, 0, 15, 10));
        assert_eq!(overlap, BoundingBox::new(i32::MAX - 10, 0, 5, 10));
    }

    #[test]
    fn far_out_footprint_is_an_overflow_error() {
        let t = Affine2D::new(1e12, 0.0, 0.0, 1.0, 0.0, 0.0).into_transform();
        assert!(matches!(
            footprint(&t, 10, 10, 2),
            Err(BoundsError::ExtentOverflow { .. })
        ));
        assert_eq!(
            BoundingBox::enclosing(std::iter::empty()),
            Err(BoundsError::EmptyInput)
        );
    }
}
