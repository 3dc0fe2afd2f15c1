//! Reading and writing single grayscale planes with the `image` crate.

use std::path::{Path, PathBuf};

use ::image::error::{ImageError, ParameterError, ParameterErrorKind};
use ::image::{DynamicImage, ImageBuffer, Luma};
use lenscorrect_core::{ImagePlane, Pixel, PlaneError};

use crate::pipeline::PipelineError;

fn image_err(path: &Path, source: ImageError) -> PipelineError {
    PipelineError::ImageIo {
        path: path.to_path_buf(),
        source,
    }
}

fn layout_err(path: &Path, source: PlaneError) -> PipelineError {
    PipelineError::PlaneLayout {
        path: path.to_path_buf(),
        source,
    }
}

fn size_mismatch(path: &Path) -> PipelineError {
    image_err(
        path,
        ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        )),
    )
}

/// A decoded plane at its native bit depth.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyPlane {
    Gray8(ImagePlane<u8>),
    Gray16(ImagePlane<u16>),
}

impl AnyPlane {
    pub fn width(&self) -> usize {
        match self {
            AnyPlane::Gray8(p) => p.width(),
            AnyPlane::Gray16(p) => p.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            AnyPlane::Gray8(p) => p.height(),
            AnyPlane::Gray16(p) => p.height(),
        }
    }

    /// Widen to 16 bit, keeping sample values.
    pub fn into_u16(self) -> ImagePlane<u16> {
        match self {
            AnyPlane::Gray16(p) => p,
            AnyPlane::Gray8(p) => ImagePlane::from_fn(p.width(), p.height(), |x, y| {
                p.get(x, y).map_or(0, u16::from)
            }),
        }
    }
}

/// Planes of one run at a common bit depth.
#[derive(Clone, Debug)]
pub enum PlaneStack {
    Gray8(Vec<ImagePlane<u8>>),
    Gray16(Vec<ImagePlane<u16>>),
}

impl PlaneStack {
    /// Stay at 8 bit only if every plane is 8 bit.
    pub fn from_planes(planes: Vec<AnyPlane>) -> Self {
        if planes.iter().all(|p| matches!(p, AnyPlane::Gray8(_))) {
            PlaneStack::Gray8(
                planes
                    .into_iter()
                    .filter_map(|p| match p {
                        AnyPlane::Gray8(p) => Some(p),
                        AnyPlane::Gray16(_) => None,
                    })
                    .collect(),
            )
        } else {
            PlaneStack::Gray16(planes.into_iter().map(AnyPlane::into_u16).collect())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PlaneStack::Gray8(v) => v.len(),
            PlaneStack::Gray16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode `path` to one grayscale plane. Color input is converted to luma;
/// anything deeper than 8 bit per channel becomes 16 bit.
pub fn load_plane(path: impl AsRef<Path>) -> Result<AnyPlane, PipelineError> {
    let path = path.as_ref();
    let img = ::image::open(path).map_err(|e| image_err(path, e))?;
    let color = img.color();
    let deep = color.bytes_per_pixel() > color.channel_count();
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = match img {
        DynamicImage::ImageLuma8(buf) => AnyPlane::Gray8(
            ImagePlane::new(width, height, buf.into_raw()).map_err(|e| layout_err(path, e))?,
        ),
        other if deep => AnyPlane::Gray16(
            ImagePlane::new(width, height, other.to_luma16().into_raw())
                .map_err(|e| layout_err(path, e))?,
        ),
        other => AnyPlane::Gray8(
            ImagePlane::new(width, height, other.to_luma8().into_raw())
                .map_err(|e| layout_err(path, e))?,
        ),
    };
    log::debug!("loaded {} ({width}x{height}, {color:?})", path.display());
    Ok(plane)
}

pub fn load_stack(paths: &[PathBuf]) -> Result<PlaneStack, PipelineError> {
    let planes = paths
        .iter()
        .map(load_plane)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PlaneStack::from_planes(planes))
}

/// Pixel types that can be written as a grayscale image.
pub trait SavePlane: Pixel {
    fn save(plane: &ImagePlane<Self>, path: &Path) -> Result<(), PipelineError>;
}

impl SavePlane for u8 {
    fn save(plane: &ImagePlane<u8>, path: &Path) -> Result<(), PipelineError> {
        let (w, h) = (plane.width() as u32, plane.height() as u32);
        let buf: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_raw(w, h, plane.data().to_vec())
                .ok_or_else(|| size_mismatch(path))?;
        buf.save(path).map_err(|e| image_err(path, e))
    }
}

impl SavePlane for u16 {
    fn save(plane: &ImagePlane<u16>, path: &Path) -> Result<(), PipelineError> {
        let (w, h) = (plane.width() as u32, plane.height() as u32);
        let buf: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(w, h, plane.data().to_vec())
                .ok_or_else(|| size_mismatch(path))?;
        buf.save(path).map_err(|e| image_err(path, e))
    }
}

/// Write `plane`; the format follows the file extension.
pub fn save_plane<T: SavePlane>(
    plane: &ImagePlane<T>,
    path: impl AsRef<Path>,
) -> Result<(), PipelineError> {
    let path = path.as_ref();
    T::save(plane, path)?;
    log::debug!("wrote {}", path.display());
    Ok(())
}

/// `<dir>/<stem of input>-c<channel>.tif`
pub fn output_path(dir: &Path, input: &Path, channel: usize) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "plane".to_string());
    dir.join(format!("{stem}-c{channel}.tif"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_round_trip_through_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.tif");
        let plane = ImagePlane::from_fn(7, 5, |x, y| (x * 1000 + y * 7) as u16);
        save_plane(&plane, &path).unwrap();
        assert_eq!(load_plane(&path).unwrap(), AnyPlane::Gray16(plane));
    }

    #[test]
    fn u8_round_trip_through_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.png");
        let plane = ImagePlane::from_fn(6, 4, |x, y| (x * 40 + y) as u8);
        save_plane(&plane, &path).unwrap();
        assert_eq!(load_plane(&path).unwrap(), AnyPlane::Gray8(plane));
    }

    #[test]
    fn mixed_depths_widen() {
        let a = AnyPlane::Gray8(ImagePlane::from_fn(2, 2, |x, _| x as u8 + 200));
        let b = AnyPlane::Gray16(ImagePlane::zeros(2, 2));
        match PlaneStack::from_planes(vec![a, b]) {
            PlaneStack::Gray16(v) => assert_eq!(v[0].get(1, 0), Some(201)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn output_names() {
        let p = output_path(Path::new("/out"), Path::new("/in/stack-03.lsm"), 2);
        assert_eq!(p, PathBuf::from("/out/stack-03-c2.tif"));
    }

    #[test]
    fn unreadable_image_is_reported() {
        let err = load_plane("/nonexistent/plane.tif").unwrap_err();
        assert!(matches!(err, PipelineError::ImageIo { .. }));
        let source = std::error::Error::source(&err).expect("decoder error is kept");
        assert!(source.downcast_ref::<ImageError>().is_some());
    }
}
