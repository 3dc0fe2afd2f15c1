use lenscorrect_core::{BoundsError, Point, SampleGrid};

use crate::WarpError;

/// Regular triangulation of `[0, width] x [0, height]`.
///
/// Each grid cell is split along its main diagonal into
/// `[v00, v10, v11]` and `[v00, v11, v01]`. Triangle indices are row-major
/// over cells, two per cell.
#[derive(Clone, Debug)]
pub struct Mesh {
    width: usize,
    height: usize,
    grid: SampleGrid,
    vertices: Vec<Point>,
    triangles: Vec<[usize; 3]>,
}

impl Mesh {
    pub fn build(width: usize, height: usize, resolution: usize) -> Result<Self, WarpError> {
        let grid = SampleGrid::new(width, height, resolution).map_err(|e| match e {
            BoundsError::InvalidMeshResolution => WarpError::InvalidMeshResolution,
            _ => WarpError::EmptyCanvas { width, height },
        })?;

        let vertices: Vec<Point> = grid.vertices().collect();
        let mut triangles = Vec::with_capacity(2 * grid.cols() * grid.rows());
        for j in 0..grid.rows() {
            for i in 0..grid.cols() {
                let v00 = grid.index(i, j);
                let v10 = grid.index(i + 1, j);
                let v01 = grid.index(i, j + 1);
                let v11 = grid.index(i + 1, j + 1);
                triangles.push([v00, v10, v11]);
                triangles.push([v00, v11, v01]);
            }
        }

        log::debug!(
            "mesh {}x{}: {}x{} cells, {} triangles",
            width,
            height,
            grid.cols(),
            grid.rows(),
            triangles.len()
        );

        Ok(Self {
            width,
            height,
            grid,
            vertices,
            triangles,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn grid(&self) -> &SampleGrid {
        &self.grid
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn triangle(&self, idx: usize) -> Option<[Point; 3]> {
        let [a, b, c] = *self.triangles.get(idx)?;
        Some([self.vertices[a], self.vertices[b], self.vertices[c]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_area(t: [Point; 3]) -> f64 {
        0.5 * ((t[1] - t[0]).perp(&(t[2] - t[0])))
    }

    #[test]
    fn triangles_tile_the_extent() {
        let m = Mesh::build(120, 45, 8).unwrap();
        assert_eq!(m.grid().cols(), 8);
        assert_eq!(m.grid().rows(), 3);
        assert_eq!(m.triangles().len(), 2 * 8 * 3);

        let total: f64 = (0..m.triangles().len())
            .map(|i| signed_area(m.triangle(i).unwrap()).abs())
            .sum();
        assert!((total - 120.0 * 45.0).abs() < 1e-9);
    }

    #[test]
    fn consistent_winding() {
        let m = Mesh::build(64, 64, 4).unwrap();
        for i in 0..m.triangles().len() {
            assert!(signed_area(m.triangle(i).unwrap()) > 0.0);
        }
    }

    #[test]
    fn invalid_inputs() {
        assert!(matches!(
            Mesh::build(10, 10, 0),
            Err(WarpError::InvalidMeshResolution)
        ));
        assert!(matches!(
            Mesh::build(0, 10, 4),
            Err(WarpError::EmptyCanvas { .. })
        ));
    }
}
