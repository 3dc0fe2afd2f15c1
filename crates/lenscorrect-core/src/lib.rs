//! Core geometry for lens and channel calibration.
//!
//! This crate holds the composite transform model, its tagged JSON codec,
//! calibration files, footprint/bounding-box resolution and the pixel plane
//! type shared by the warping and alignment crates. It does not decode image
//! files.

mod bounds;
mod calibration;
mod codec;
mod grid;
mod image;
mod logger;
mod models;
mod registry;
mod transform;

pub use bounds::{common_canvas, footprint, intersect, offset_to_origin, BoundingBox, BoundsError};
pub use calibration::{
    decode_calibrations, encode_calibrations, load_calibrations, parse_calibrations,
    write_calibrations, Calibration, CalibrationError, CalibrationIoError,
};
pub use codec::{
    encode_children, encode_transform, CodecError, TransformCodec, TransformDecodeError,
    CLASS_NAME_KEY, DATA_STRING_KEY, TRANSFORMS_KEY,
};
pub use grid::{SampleGrid, DEFAULT_MESH_RESOLUTION};
pub use image::{sample, ImagePlane, Interpolation, Pixel, PlaneError, UnsupportedInterpolation};
pub use models::{
    Affine2D, ModelParseError, NonLinear2D, Rigid2D, Translation2D, AFFINE_TAG, COMPOSITE_TAG,
    NON_LINEAR_TAG, RIGID_TAG, TRANSLATION_TAG,
};
pub use registry::{ModelFactory, ModelRegistry, RegistryError};
pub use transform::{CompositeTransform, Point, PointMapping, PrimitiveTransform, Transform};

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, tracing_filter};

pub use logger::{init_with_level, init_with_verbosity, level_from_verbosity, LogFormat};
