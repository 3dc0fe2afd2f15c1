//! Triangle-mesh warping of image planes.
//!
//! A [`Mesh`] triangulates the source extent. [`MeshWarper`] maps its
//! vertices through a [`Transform`](lenscorrect_core::Transform), inverts
//! each triangle's affine map, and fills a destination canvas row by row.
//! Each destination pixel gets a validity flag in the returned [`Mask`].
//!
//! ```no_run
//! use lenscorrect_core::{ImagePlane, Interpolation, Transform};
//! use lenscorrect_mesh::{warp, Mesh};
//!
//! let src = ImagePlane::<u16>::zeros(512, 512);
//! let mesh = Mesh::build(512, 512, 128)?;
//! let out = warp(&src, &Transform::identity(), &mesh, Interpolation::Bilinear, 512, 512)?;
//! assert_eq!(out.mask.count_valid(), 512 * 512);
//! # Ok::<(), lenscorrect_mesh::WarpError>(())
//! ```

mod mesh;
mod warp;

use lenscorrect_core::UnsupportedInterpolation;

pub use mesh::Mesh;
pub use warp::{parse_interpolation, warp, Mask, MeshVertex, MeshWarper, Warped};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WarpError {
    #[error("unsupported interpolation `{0}`")]
    UnsupportedInterpolation(String),
    #[error("cannot allocate a {width}x{height} destination buffer")]
    BufferAllocation { width: usize, height: usize },
    #[error("source plane is {got:?}, mesh was built for {expected:?}")]
    SizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("refusing to render onto an empty {width}x{height} canvas")]
    EmptyCanvas { width: usize, height: usize },
    #[error("mesh resolution must be at least 1")]
    InvalidMeshResolution,
}

impl From<UnsupportedInterpolation> for WarpError {
    fn from(e: UnsupportedInterpolation) -> Self {
        WarpError::UnsupportedInterpolation(e.0)
    }
}
