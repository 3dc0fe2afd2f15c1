//! Piecewise-affine resampling through a forward-mapped triangle mesh.
//!
//! Pixel `(x, y)` of a plane covers `[x, x + 1) x [y, y + 1)`; its center is
//! `(x + 0.5, y + 0.5)`. Mesh and transform coordinates use the same
//! convention, so an identity transform reproduces the source exactly.

use lenscorrect_core::{sample, ImagePlane, Interpolation, Pixel, Point, Transform};
use nalgebra::{Matrix2x3, Matrix3, Vector3};
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Mesh, WarpError};

/// Barycentric slack for edge pixels.
const INSIDE_EPS: f64 = 1e-9;

/// Source mesh vertex and its image under the transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshVertex {
    pub source: Point,
    pub target: Point,
}

/// Destination validity flags, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl Mask {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[bool] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.data[y * self.width + x]
    }

    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }
}

/// A rendered plane together with its validity mask.
#[derive(Clone, Debug)]
pub struct Warped<T> {
    pub image: ImagePlane<T>,
    pub mask: Mask,
}

#[derive(Clone, Copy, Debug)]
struct Facet {
    /// Inverse of the target vertex matrix `[t0 t1 t2; 1 1 1]`.
    t_inv: Matrix3<f64>,
    /// Source vertices as columns.
    source: Matrix2x3<f64>,
    /// Destination columns `x0..x1` whose centers may fall inside.
    x0: usize,
    x1: usize,
}

impl Facet {
    #[inline]
    fn pre_image(&self, cx: f64, cy: f64) -> Option<Point> {
        let l = self.t_inv * Vector3::new(cx, cy, 1.0);
        if l.x < -INSIDE_EPS || l.y < -INSIDE_EPS || l.z < -INSIDE_EPS {
            return None;
        }
        let s = self.source * l;
        Some(Point::new(s.x, s.y))
    }
}

/// Forward-mapped mesh ready to render onto a `width x height` canvas.
///
/// Immutable after construction and shared freely between threads. When a
/// destination pixel lies on an edge shared by two triangles, the triangle
/// with the lower index wins.
#[derive(Clone, Debug)]
pub struct MeshWarper {
    src_width: usize,
    src_height: usize,
    width: usize,
    height: usize,
    vertices: Vec<MeshVertex>,
    facets: Vec<Facet>,
    /// Facet indices per destination row, ascending.
    rows: Vec<Vec<u32>>,
    skipped: usize,
}

impl MeshWarper {
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(mesh, transform),
            fields(triangles = mesh.triangles().len())
        )
    )]
    pub fn new(
        mesh: &Mesh,
        transform: &Transform,
        width: usize,
        height: usize,
    ) -> Result<Self, WarpError> {
        if width == 0 || height == 0 {
            return Err(WarpError::EmptyCanvas { width, height });
        }
        let oversized = || WarpError::BufferAllocation { width, height };
        width.checked_mul(height).ok_or_else(oversized)?;

        let vertices: Vec<MeshVertex> = mesh
            .vertices()
            .par_iter()
            .map(|&source| MeshVertex {
                source,
                target: transform.apply(source),
            })
            .collect();

        let mut facets = Vec::with_capacity(mesh.triangles().len());
        let mut rows: Vec<Vec<u32>> = Vec::new();
        rows.try_reserve_exact(height).map_err(|_| oversized())?;
        rows.resize_with(height, Vec::new);
        let mut skipped = 0usize;

        for tri in mesh.triangles() {
            let [a, b, c] = [vertices[tri[0]], vertices[tri[1]], vertices[tri[2]]];
            let Some((facet, y0, y1)) = build_facet(a, b, c, width, height) else {
                skipped += 1;
                continue;
            };
            let idx = facets.len() as u32;
            for row in &mut rows[y0..y1] {
                row.try_reserve(1).map_err(|_| oversized())?;
                row.push(idx);
            }
            facets.push(facet);
        }

        if skipped > 0 {
            log::debug!("{skipped} mesh triangles are degenerate or off-canvas");
        }

        Ok(Self {
            src_width: mesh.width(),
            src_height: mesh.height(),
            width,
            height,
            vertices,
            facets,
            rows,
            skipped,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    /// Triangles that can contribute to the canvas.
    pub fn facet_count(&self) -> usize {
        self.facets.len()
    }

    /// Triangles dropped as degenerate, non-finite or fully off-canvas.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Pre-image of `p` under the lowest-index on-canvas triangle covering it.
    pub fn pre_image(&self, p: Point) -> Option<Point> {
        self.facets.iter().find_map(|f| f.pre_image(p.x, p.y))
    }

    /// Render `src` onto the canvas.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, src), fields(width = self.width, height = self.height))
    )]
    pub fn warp<T: Pixel>(
        &self,
        src: &ImagePlane<T>,
        interpolation: Interpolation,
    ) -> Result<Warped<T>, WarpError> {
        if src.width() != self.src_width || src.height() != self.src_height {
            return Err(WarpError::SizeMismatch {
                expected: (self.src_width, self.src_height),
                got: (src.width(), src.height()),
            });
        }

        let len = self
            .width
            .checked_mul(self.height)
            .ok_or(WarpError::BufferAllocation {
                width: self.width,
                height: self.height,
            })?;
        let mut out: Vec<T> = alloc(len, T::default(), self.width, self.height)?;
        let mut mask: Vec<bool> = alloc(len, false, self.width, self.height)?;

        let (sw, sh) = (src.width() as f64, src.height() as f64);
        out.par_chunks_mut(self.width)
            .zip(mask.par_chunks_mut(self.width))
            .enumerate()
            .for_each_init(
                || vec![false; self.width],
                |covered, (y, (row, valid))| {
                    covered.fill(false);
                    let cy = y as f64 + 0.5;
                    for &fi in &self.rows[y] {
                        let facet = &self.facets[fi as usize];
                        for x in facet.x0..facet.x1 {
                            if covered[x] {
                                continue;
                            }
                            let Some(s) = facet.pre_image(x as f64 + 0.5, cy) else {
                                continue;
                            };
                            covered[x] = true;
                            if s.x >= 0.0 && s.x < sw && s.y >= 0.0 && s.y < sh {
                                let v = sample(src, s.x - 0.5, s.y - 0.5, interpolation);
                                row[x] = T::from_f32(v);
                                valid[x] = true;
                            }
                        }
                    }
                },
            );

        let image = ImagePlane::new(self.width, self.height, out).map_err(|_| {
            WarpError::BufferAllocation {
                width: self.width,
                height: self.height,
            }
        })?;
        Ok(Warped {
            image,
            mask: Mask {
                width: self.width,
                height: self.height,
                data: mask,
            },
        })
    }
}

fn build_facet(
    a: MeshVertex,
    b: MeshVertex,
    c: MeshVertex,
    width: usize,
    height: usize,
) -> Option<(Facet, usize, usize)> {
    let t = Matrix3::new(
        a.target.x, b.target.x, c.target.x, //
        a.target.y, b.target.y, c.target.y, //
        1.0, 1.0, 1.0,
    );
    if !t.iter().all(|v| v.is_finite()) {
        return None;
    }
    let t_inv = t.try_inverse()?;
    let source = Matrix2x3::new(
        a.source.x, b.source.x, c.source.x, //
        a.source.y, b.source.y, c.source.y,
    );

    let xs = [a.target.x, b.target.x, c.target.x];
    let ys = [a.target.y, b.target.y, c.target.y];
    let (x0, x1) = center_span(&xs, width)?;
    let (y0, y1) = center_span(&ys, height)?;
    Some((Facet { t_inv, source, x0, x1 }, y0, y1))
}

/// Half-open range of pixel indices whose centers lie within `coords`' extent.
fn center_span(coords: &[f64; 3], len: usize) -> Option<(usize, usize)> {
    let lo = coords.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = coords.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let first = (lo - 0.5 - INSIDE_EPS).ceil().max(0.0);
    let last = (hi - 0.5 + INSIDE_EPS).floor().min(len as f64 - 1.0);
    if last < first {
        return None;
    }
    Some((first as usize, last as usize + 1))
}

fn alloc<V: Clone>(len: usize, fill: V, width: usize, height: usize) -> Result<Vec<V>, WarpError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| WarpError::BufferAllocation { width, height })?;
    buf.resize(len, fill);
    Ok(buf)
}

/// Resolve an interpolation name before any pixel work.
pub fn parse_interpolation(name: &str) -> Result<Interpolation, WarpError> {
    Ok(name.parse()?)
}

/// Render `src` through `transform` onto a `width x height` canvas.
pub fn warp<T: Pixel>(
    src: &ImagePlane<T>,
    transform: &Transform,
    mesh: &Mesh,
    interpolation: Interpolation,
    width: usize,
    height: usize,
) -> Result<Warped<T>, WarpError> {
    MeshWarper::new(mesh, transform, width, height)?.warp(src, interpolation)
}
