//! End-to-end correction of channel stacks.
//!
//! `apply-split` renders every slice of one stack through every calibration
//! onto the canvas all calibrations share. `apply-channels` renders channel
//! `k` through calibration `k` onto its own footprint.

use std::path::{Path, PathBuf};

use lenscorrect_align::{append_corrections, AlignmentRefiner, BlockMatcher, FeatureMatcher};
use lenscorrect_core::{
    common_canvas, footprint, offset_to_origin, parse_calibrations, BoundingBox, BoundsError,
    Calibration, CalibrationError, CalibrationIoError, CompositeTransform, ImagePlane,
    intersect, ModelRegistry, Pixel, PlaneError, Transform, TransformCodec,
};
use lenscorrect_mesh::{Mesh, MeshWarper, WarpError};
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::config::{ConfigIoError, PipelineConfig};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Bounds(#[from] BoundsError),
    #[error(transparent)]
    Warp(#[from] WarpError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("reading calibrations from {path}: {source}")]
    CalibrationIo {
        path: PathBuf,
        #[source]
        source: CalibrationIoError,
    },
    #[error(transparent)]
    Config(#[from] ConfigIoError),
    #[error("no transforms found in {0}")]
    NoTransforms(PathBuf),
    #[error("{channels} channels but {calibrations} calibrations")]
    ChannelCountMismatch { channels: usize, calibrations: usize },
    #[error("no input planes")]
    NoPlanes,
    #[error("input plane {index} is {got:?}, expected {expected:?}")]
    PlaneSizeMismatch {
        index: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("crop width {crop} leaves nothing of a {width}x{height} rendering")]
    CropTooLarge {
        crop: usize,
        width: usize,
        height: usize,
    },
    #[cfg(feature = "image")]
    #[error("image {path}: {source}")]
    ImageIo {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {path}: {source}")]
    PlaneLayout {
        path: PathBuf,
        #[source]
        source: PlaneError,
    },
}

/// Load a calibration file where every entry must decode.
///
/// All failing entries are logged; the first one is returned.
pub fn load_transforms(
    path: impl AsRef<Path>,
    registry: &ModelRegistry,
) -> Result<Vec<Calibration>, PipelineError> {
    let path = path.as_ref();
    let io_err = |source: CalibrationIoError| PipelineError::CalibrationIo {
        path: path.to_path_buf(),
        source,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| io_err(e.into()))?;
    let codec = TransformCodec::new(registry);

    let mut calibrations = Vec::new();
    let mut first_err = None;
    for entry in parse_calibrations(&raw, &codec).map_err(io_err)? {
        match entry {
            Ok(c) => calibrations.push(c),
            Err(e) => {
                log::error!("{e}");
                first_err.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e.into());
    }
    if calibrations.is_empty() {
        return Err(PipelineError::NoTransforms(path.to_path_buf()));
    }
    log::info!("{} calibrations loaded from {}", calibrations.len(), path.display());
    Ok(calibrations)
}

fn common_size<T: Pixel>(planes: &[ImagePlane<T>]) -> Result<(usize, usize), PipelineError> {
    let first = planes.first().ok_or(PipelineError::NoPlanes)?;
    let expected = (first.width(), first.height());
    for (index, p) in planes.iter().enumerate().skip(1) {
        let got = (p.width(), p.height());
        if got != expected {
            return Err(PipelineError::PlaneSizeMismatch {
                index,
                expected,
                got,
            });
        }
    }
    Ok(expected)
}

fn extent(bbox: &BoundingBox) -> (usize, usize) {
    (bbox.width.max(0) as usize, bbox.height.max(0) as usize)
}

/// Per-pixel mean of equally sized planes.
pub fn z_average_projection<T: Pixel>(
    planes: &[ImagePlane<T>],
) -> Result<ImagePlane<f32>, PipelineError> {
    let (width, height) = common_size(planes)?;
    let mut acc = vec![0.0f64; width * height];
    for p in planes {
        for (a, &v) in acc.iter_mut().zip(p.data()) {
            *a += v.to_f32() as f64;
        }
    }
    let n = planes.len() as f64;
    Ok(ImagePlane::from_fn(width, height, |x, y| {
        (acc[y * width + x] / n) as f32
    }))
}

/// Resolve the shared canvas and move it to the origin.
///
/// Every chain's footprint over a `width x height` source is intersected;
/// the offset to the intersection's corner is appended to each chain.
pub fn plan_split(
    chains: &mut [CompositeTransform],
    width: usize,
    height: usize,
    resolution: usize,
) -> Result<BoundingBox, PipelineError> {
    let boxes: Vec<BoundingBox> = chains
        .par_iter()
        .map(|c| footprint(&Transform::from(c.clone()), width, height, resolution))
        .collect::<Result<_, _>>()?;
    for (k, b) in boxes.iter().enumerate() {
        log::debug!("channel {k} footprint {b:?}");
    }
    let canvas = common_canvas(&boxes)?;
    let offset = offset_to_origin(&canvas);
    for c in chains.iter_mut() {
        c.append(offset.clone());
    }
    log::info!("common canvas {canvas:?}");
    Ok(canvas)
}

fn warpers(
    chains: &[CompositeTransform],
    mesh: &Mesh,
    width: usize,
    height: usize,
) -> Result<Vec<MeshWarper>, WarpError> {
    chains
        .par_iter()
        .map(|c| MeshWarper::new(mesh, &Transform::from(c.clone()), width, height))
        .collect()
}

/// Renderings of one stack through several calibrations.
#[derive(Clone, Debug)]
pub struct SplitOutput<T> {
    pub canvas: BoundingBox,
    pub channels: usize,
    /// Slice-major, channel-minor.
    pub planes: Vec<ImagePlane<T>>,
    /// Final chains including the canvas offset and any correction.
    pub chains: Vec<CompositeTransform>,
    pub alignment_failures: usize,
    /// Overlap of the corrected chains' footprints in canvas coordinates;
    /// `None` without alignment.
    pub aligned_coverage: Option<BoundingBox>,
}

impl<T> SplitOutput<T> {
    pub fn plane(&self, slice: usize, channel: usize) -> Option<&ImagePlane<T>> {
        if channel >= self.channels {
            return None;
        }
        self.planes.get(slice * self.channels + channel)
    }

    pub fn slices(&self) -> usize {
        self.planes.len().checked_div(self.channels).unwrap_or(0)
    }
}

/// [`render_split_with`] using the [`BlockMatcher`] configured in `config`.
pub fn render_split<T: Pixel>(
    slices: &[ImagePlane<T>],
    calibrations: &[Calibration],
    config: &PipelineConfig,
) -> Result<SplitOutput<T>, PipelineError> {
    let matcher = BlockMatcher::new(config.block_matcher.clone());
    render_split_with(slices, calibrations, config, matcher)
}

/// Render every slice through every calibration onto their common canvas.
///
/// With `config.align` set, the z-average projection is rendered through
/// each chain first and a residual correction against the first chain is
/// appended. Channels whose alignment fails keep their chain.
///
/// The canvas is planned once, before alignment. Footprints of the corrected
/// chains are recomputed into [`SplitOutput::aligned_coverage`]; canvas
/// pixels outside it stay masked at zero.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(slices, calibrations, config, matcher),
        fields(slices = slices.len(), channels = calibrations.len())
    )
)]
pub fn render_split_with<T: Pixel, F: FeatureMatcher>(
    slices: &[ImagePlane<T>],
    calibrations: &[Calibration],
    config: &PipelineConfig,
    matcher: F,
) -> Result<SplitOutput<T>, PipelineError> {
    let (width, height) = common_size(slices)?;
    let interpolation = config.interpolation;
    let mesh = Mesh::build(width, height, config.mesh_resolution)?;

    let mut chains: Vec<CompositeTransform> =
        calibrations.iter().map(|c| c.transform.clone()).collect();
    let canvas = plan_split(&mut chains, width, height, config.mesh_resolution)?;
    let (cw, ch) = extent(&canvas);

    let mut alignment_failures = 0;
    let mut aligned_coverage = None;
    if config.align {
        let projection = z_average_projection(slices)?;
        let rendered: Vec<ImagePlane<f32>> = warpers(&chains, &mesh, cw, ch)?
            .par_iter()
            .map(|w| w.warp(&projection, interpolation).map(|out| out.image))
            .collect::<Result<_, _>>()?;
        let refiner = AlignmentRefiner::with_matcher(config.alignment.clone(), matcher);
        let corrections = refiner.refine(&rendered);
        alignment_failures = append_corrections(&mut chains, &corrections);
        aligned_coverage = Some(corrected_coverage(
            &chains,
            &canvas,
            (width, height),
            config.mesh_resolution,
        )?);
    }

    let warpers = warpers(&chains, &mesh, cw, ch)?;
    let mut planes = Vec::with_capacity(slices.len() * warpers.len());
    for (s, slice) in slices.iter().enumerate() {
        let rendered: Vec<ImagePlane<T>> = warpers
            .par_iter()
            .map(|w| w.warp(slice, interpolation).map(|out| out.image))
            .collect::<Result<_, _>>()?;
        log::debug!("slice {s}: {} channels rendered", rendered.len());
        planes.extend(rendered);
    }

    Ok(SplitOutput {
        canvas,
        channels: chains.len(),
        planes,
        chains,
        alignment_failures,
        aligned_coverage,
    })
}

fn corrected_coverage(
    chains: &[CompositeTransform],
    canvas: &BoundingBox,
    (width, height): (usize, usize),
    resolution: usize,
) -> Result<BoundingBox, PipelineError> {
    let boxes: Vec<BoundingBox> = chains
        .par_iter()
        .map(|c| footprint(&Transform::from(c.clone()), width, height, resolution))
        .collect::<Result<_, _>>()?;
    let coverage = intersect(&boxes)?;
    let full = BoundingBox::new(0, 0, canvas.width, canvas.height);
    if coverage.intersection(&full) != full {
        log::warn!(
            "corrected chains cover {coverage:?} of the {}x{} canvas; the rest stays masked",
            canvas.width,
            canvas.height
        );
    } else {
        log::debug!("corrected chains cover {coverage:?}");
    }
    Ok(coverage)
}

fn render_channel<T: Pixel>(
    plane: &ImagePlane<T>,
    chain: &CompositeTransform,
    config: &PipelineConfig,
) -> Result<ImagePlane<T>, PipelineError> {
    let (width, height) = (plane.width(), plane.height());
    let mesh = Mesh::build(width, height, config.mesh_resolution)?;
    let mut chain = chain.clone();
    let bbox = footprint(
        &Transform::from(chain.clone()),
        width,
        height,
        config.mesh_resolution,
    )?;
    if bbox.is_empty() {
        return Err(BoundsError::NoOverlap(bbox).into());
    }
    chain.append(offset_to_origin(&bbox));

    let (bw, bh) = extent(&bbox);
    let crop = config.crop_width;
    if 2 * crop >= bw || 2 * crop >= bh {
        return Err(PipelineError::CropTooLarge {
            crop,
            width: bw,
            height: bh,
        });
    }
    let warped = MeshWarper::new(&mesh, &Transform::from(chain), bw, bh)?
        .warp(plane, config.interpolation)?;
    Ok(warped
        .image
        .crop(crop, crop, bw - 2 * crop, bh - 2 * crop))
}

/// Render channel `k` through calibration `k` onto its own footprint and
/// crop `config.crop_width` from every side.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(channels, calibrations, config), fields(channels = channels.len()))
)]
pub fn render_channels<T: Pixel>(
    channels: &[ImagePlane<T>],
    calibrations: &[Calibration],
    config: &PipelineConfig,
) -> Result<Vec<ImagePlane<T>>, PipelineError> {
    if channels.len() != calibrations.len() {
        return Err(PipelineError::ChannelCountMismatch {
            channels: channels.len(),
            calibrations: calibrations.len(),
        });
    }
    channels
        .par_iter()
        .zip(calibrations)
        .map(|(plane, cal)| {
            let out = render_channel(plane, &cal.transform, config)?;
            log::debug!(
                "channel `{}` rendered at {}x{}",
                cal.name,
                out.width(),
                out.height()
            );
            Ok(out)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lenscorrect_core::{encode_calibrations, Translation2D};

    fn hash_plane(width: usize, height: usize, seed: u64) -> ImagePlane<u8> {
        ImagePlane::from_fn(width, height, |x, y| {
            let mut h = seed ^ ((x as u64) << 32 | y as u64);
            h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            ((h ^ (h >> 31)) & 0xff) as u8
        })
    }

    fn shifted(name: &str, dx: f64, dy: f64) -> Calibration {
        Calibration::new(name, CompositeTransform::new().with(Translation2D::new(dx, dy)))
    }

    #[test]
    fn projection_is_mean() {
        let a = ImagePlane::from_fn(3, 2, |x, _| x as u16);
        let b = ImagePlane::from_fn(3, 2, |_, y| 10 * y as u16);
        let p = z_average_projection(&[a, b]).unwrap();
        assert_eq!(p.get(2, 1), Some(6.0));
        assert_eq!(p.get(0, 0), Some(0.0));
    }

    #[test]
    fn projection_rejects_mixed_sizes() {
        let err = z_average_projection(&[ImagePlane::<u8>::zeros(4, 4), ImagePlane::zeros(4, 5)])
            .unwrap_err();
        assert!(matches!(err, PipelineError::PlaneSizeMismatch { index: 1, .. }));
        assert!(matches!(
            z_average_projection::<u8>(&[]),
            Err(PipelineError::NoPlanes)
        ));
    }

    #[test]
    fn plan_split_offsets_to_common_canvas() {
        let mut chains = vec![
            CompositeTransform::new(),
            CompositeTransform::new().with(Translation2D::new(3.0, -2.0)),
        ];
        let canvas = plan_split(&mut chains, 64, 48, 16).unwrap();
        assert_eq!(canvas, BoundingBox::new(3, 0, 61, 46));
        assert_eq!(chains[0].len(), 1);
        assert_eq!(chains[1].len(), 2);
        let corner = chains[0].apply(lenscorrect_core::Point::new(3.0, 0.0));
        assert_eq!(corner, lenscorrect_core::Point::new(0.0, 0.0));
    }

    #[test]
    fn disjoint_footprints_have_no_canvas() {
        let mut chains = vec![
            CompositeTransform::new(),
            CompositeTransform::new().with(Translation2D::new(500.0, 0.0)),
        ];
        assert!(matches!(
            plan_split(&mut chains, 64, 48, 16),
            Err(PipelineError::Bounds(BoundsError::NoOverlap(_)))
        ));
    }

    #[test]
    fn split_output_is_slice_major() {
        let slices = [hash_plane(40, 30, 1), hash_plane(40, 30, 2)];
        let cals = [shifted("a", 0.0, 0.0), shifted("b", 2.0, 1.0)];
        let out = render_split(&slices, &cals, &PipelineConfig::default()).unwrap();
        assert_eq!(out.canvas, BoundingBox::new(2, 1, 38, 29));
        assert_eq!(out.channels, 2);
        assert_eq!(out.slices(), 2);

        // channel 0 shows the source shifted by the canvas corner
        let p = out.plane(1, 0).unwrap();
        assert_eq!((p.width(), p.height()), (38, 29));
        assert_eq!(p.get(0, 0), slices[1].get(2, 1));
        // channel 1 was already moved onto the corner
        let q = out.plane(0, 1).unwrap();
        assert_eq!(q.get(5, 7), slices[0].get(5, 7));
        assert!(out.plane(0, 2).is_none());
    }

    #[test]
    fn alignment_undoes_a_residual_shift() {
        let slices = [hash_plane(96, 96, 7)];
        let cals = [shifted("ref", 0.0, 0.0), shifted("drifted", 3.0, -2.0)];
        let config = PipelineConfig {
            align: true,
            ..PipelineConfig::default()
        };
        let out = render_split(&slices, &cals, &config).unwrap();
        assert_eq!(out.alignment_failures, 0);
        assert_eq!(out.chains[1].len(), 3);
        assert_eq!(out.plane(0, 1), out.plane(0, 0));
        // both chains now land on the reference footprint
        assert_eq!(out.aligned_coverage, Some(BoundingBox::new(-3, 0, 96, 96)));
    }

    #[test]
    fn alignment_failure_keeps_chain() {
        let flat = [ImagePlane::from_fn(96, 96, |_, _| 9u8)];
        let cals = [shifted("a", 0.0, 0.0), shifted("b", 1.0, 0.0)];
        let config = PipelineConfig {
            align: true,
            ..PipelineConfig::default()
        };
        let out = render_split(&flat, &cals, &config).unwrap();
        assert_eq!(out.alignment_failures, 1);
        assert_eq!(out.chains[0].len(), 3);
        assert_eq!(out.chains[1].len(), 2);
        assert_eq!(out.aligned_coverage, Some(BoundingBox::new(0, 0, 95, 96)));
    }

    #[test]
    fn channels_render_on_own_footprint_and_crop() {
        let channels = [hash_plane(40, 30, 3), hash_plane(40, 30, 4)];
        let cals = [shifted("a", 0.0, 0.0), shifted("b", -7.0, 4.0)];
        let config = PipelineConfig {
            crop_width: 2,
            ..PipelineConfig::default()
        };
        let out = render_channels(&channels, &cals, &config).unwrap();
        assert_eq!((out[0].width(), out[0].height()), (36, 26));
        assert_eq!(out[0].get(0, 0), channels[0].get(2, 2));
        assert_eq!(out[1].get(3, 3), channels[1].get(5, 5));
    }

    #[test]
    fn channel_count_and_crop_are_checked() {
        let channels = [hash_plane(20, 20, 5)];
        let err = render_channels(&channels, &[], &PipelineConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ChannelCountMismatch {
                channels: 1,
                calibrations: 0
            }
        ));

        let config = PipelineConfig {
            crop_width: 10,
            ..PipelineConfig::default()
        };
        let err = render_channels(&channels, &[shifted("a", 0.0, 0.0)], &config).unwrap_err();
        assert!(matches!(err, PipelineError::CropTooLarge { crop: 10, .. }));
    }

    #[test]
    fn transforms_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::builtin();

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "[]").unwrap();
        assert!(matches!(
            load_transforms(&empty, &registry),
            Err(PipelineError::NoTransforms(_))
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(
            &bad,
            r#"[{ "name": "x", "transform": [{ "className": "no.such.Model", "dataString": "" }] }]"#,
        )
        .unwrap();
        assert!(matches!(
            load_transforms(&bad, &registry),
            Err(PipelineError::Calibration(_))
        ));

        assert!(matches!(
            load_transforms(dir.path().join("missing.json"), &registry),
            Err(PipelineError::CalibrationIo { .. })
        ));

        let good = dir.path().join("good.json");
        let cals = vec![shifted("a", 1.0, 2.0)];
        std::fs::write(&good, encode_calibrations(&cals).to_string()).unwrap();
        assert_eq!(load_transforms(&good, &registry).unwrap(), cals);
    }
}
