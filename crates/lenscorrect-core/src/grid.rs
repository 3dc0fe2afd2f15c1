//! Regular sample grid over an image extent.

use crate::bounds::BoundsError;
use crate::transform::Point;

/// Default number of subdivisions across the image width.
pub const DEFAULT_MESH_RESOLUTION: usize = 128;

/// `cols x rows` cells over `[0, width] x [0, height]`.
///
/// `cols` is the requested resolution; `rows` keeps the cells as close to
/// square as the aspect ratio allows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleGrid {
    width: f64,
    height: f64,
    cols: usize,
    rows: usize,
}

impl SampleGrid {
    pub fn new(width: usize, height: usize, resolution: usize) -> Result<Self, BoundsError> {
        if resolution == 0 {
            return Err(BoundsError::InvalidMeshResolution);
        }
        if width == 0 || height == 0 {
            return Err(BoundsError::InvalidExtent { width, height });
        }
        let (w, h) = (width as f64, height as f64);
        let cell = w / resolution as f64;
        let rows = ((h / cell).round() as usize).max(1);
        Ok(Self {
            width: w,
            height: h,
            cols: resolution,
            rows,
        })
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn vertex_count(&self) -> usize {
        (self.cols + 1) * (self.rows + 1)
    }

    /// Vertex `(i, j)` with `i <= cols`, `j <= rows`. Edge vertices land
    /// exactly on the extent.
    #[inline]
    pub fn vertex(&self, i: usize, j: usize) -> Point {
        Point::new(
            self.width * i as f64 / self.cols as f64,
            self.height * j as f64 / self.rows as f64,
        )
    }

    /// Row-major vertex index.
    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * (self.cols + 1) + i
    }

    /// All vertices, row-major.
    pub fn vertices(&self) -> impl Iterator<Item = Point> + '_ {
        (0..=self.rows).flat_map(move |j| (0..=self.cols).map(move |i| self.vertex(i, j)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_follow_aspect_ratio() {
        let g = SampleGrid::new(1024, 512, 128).unwrap();
        assert_eq!((g.cols(), g.rows()), (128, 64));
        let g = SampleGrid::new(100, 1, 128).unwrap();
        assert_eq!(g.rows(), 1);
    }

    #[test]
    fn corners_hit_extent() {
        let g = SampleGrid::new(300, 200, 7).unwrap();
        assert_eq!(g.vertex(0, 0), Point::new(0.0, 0.0));
        assert_eq!(g.vertex(g.cols(), g.rows()), Point::new(300.0, 200.0));
        assert_eq!(g.vertices().count(), g.vertex_count());
        let last = g.vertices().last().unwrap();
        assert_eq!(last, Point::new(300.0, 200.0));
    }

    #[test]
    fn zero_resolution_rejected() {
        assert_eq!(
            SampleGrid::new(10, 10, 0),
            Err(BoundsError::InvalidMeshResolution)
        );
        assert!(SampleGrid::new(0, 10, 4).is_err());
    }
}
