//! High-level facade for the `lenscorrect-*` workspace.
//!
//! This crate provides:
//! - re-exports of the transform model, mesh warper and alignment crates
//! - the `apply-split` and `apply-channels` pipelines over decoded planes
//! - (feature `image`) plane loading and saving through the `image` crate
//! - (feature `cli`) the `lens-correct` binary
//!
//! ## Quickstart
//!
//! ```no_run
//! use lenscorrect::{load_transforms, render_split, ImagePlane, ModelRegistry, PipelineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ModelRegistry::builtin();
//! let calibrations = load_transforms("transforms.json", &registry)?;
//! let slices = vec![ImagePlane::<u16>::zeros(1024, 1024)];
//! let out = render_split(&slices, &calibrations, &PipelineConfig::default())?;
//! println!("canvas {:?}, {} planes", out.canvas, out.planes.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `lenscorrect::core`: transforms, codec, calibration files, bounding boxes, planes.
//! - `lenscorrect::mesh`: triangle mesh and [`MeshWarper`].
//! - `lenscorrect::align`: block matching, RANSAC and [`AlignmentRefiner`].
//! - `lenscorrect::io` (feature `image`): plane files.

pub use lenscorrect_align as align;
pub use lenscorrect_core as core;
pub use lenscorrect_mesh as mesh;

pub use lenscorrect_align::{AlignParams, AlignmentRefiner, CorrectionModel};
pub use lenscorrect_core::{
    BoundingBox, Calibration, CompositeTransform, ImagePlane, Interpolation, ModelRegistry,
    Transform, TransformCodec,
};
pub use lenscorrect_mesh::{Mesh, MeshWarper};

mod config;
mod pipeline;

pub use config::{ConfigIoError, PipelineConfig};
pub use pipeline::{
    load_transforms, plan_split, render_channels, render_split, render_split_with,
    z_average_projection, PipelineError, SplitOutput,
};

#[cfg(feature = "image")]
pub mod io;
