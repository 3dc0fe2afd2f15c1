//! lens-correct: apply lens calibrations to microscopy planes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use lenscorrect::io::{load_stack, output_path, save_plane, PlaneStack, SavePlane};
use lenscorrect::core::{AFFINE_TAG, NON_LINEAR_TAG, RIGID_TAG, TRANSLATION_TAG};
use lenscorrect::mesh::parse_interpolation;
use lenscorrect::{
    load_transforms, render_channels, render_split, Calibration, CorrectionModel, ModelRegistry,
    PipelineConfig, PipelineError, SplitOutput,
};

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "lens-correct")]
#[command(about = "Apply wavelength-dependent lens-distortion correction and channel alignment")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every input slice through every calibration onto a common canvas.
    ApplySplit(SplitArgs),

    /// Render input k through calibration k and crop the borders.
    ApplyChannels(ChannelArgs),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// Input image planes (repeat or comma-separate).
    #[arg(short, long = "inputs", required = true, num_args = 1.., value_delimiter = ',')]
    inputs: Vec<PathBuf>,

    /// Output directory.
    #[arg(short, long)]
    output: PathBuf,

    /// JSON file with one calibration per channel.
    #[arg(short, long)]
    transforms: PathBuf,

    /// Mesh cells across the image width.
    #[arg(short = 'r', long)]
    mesh_resolution: Option<usize>,

    /// nearest, bilinear or bicubic.
    #[arg(long)]
    interpolation: Option<String>,

    /// Pipeline config (JSON); flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Args)]
struct SplitArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Fit a residual correction per channel against the first.
    #[arg(short, long)]
    align: bool,

    /// Correction model: translation or rigid.
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ChannelArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Border removed from every side of each rendering.
    #[arg(short, long)]
    crop: Option<usize>,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = lenscorrect::core::level_from_verbosity(verbose, quiet);
    #[cfg(feature = "tracing")]
    {
        let _ = LogTracer::init();
        lenscorrect::core::init_tracing(level, lenscorrect::core::LogFormat::Plain);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = lenscorrect::core::init_with_level(level);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let common = match &cli.command {
        Commands::ApplySplit(a) => &a.common,
        Commands::ApplyChannels(a) => &a.common,
    };
    init_logging(common.verbose, common.quiet);

    let result = match &cli.command {
        Commands::ApplySplit(args) => run_split(args),
        Commands::ApplyChannels(args) => run_channels(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(1)
        }
    }
}

/// Config file first, then flags on top.
fn resolve_config(common: &CommonArgs) -> CliResult<PipelineConfig> {
    let mut config = match &common.config {
        Some(path) => PipelineConfig::load_json(path).map_err(PipelineError::from)?,
        None => PipelineConfig::default(),
    };
    if let Some(r) = common.mesh_resolution {
        config.mesh_resolution = r;
    }
    if let Some(name) = &common.interpolation {
        config.interpolation = parse_interpolation(name)?;
    }
    Ok(config)
}

struct Prepared {
    config: PipelineConfig,
    calibrations: Vec<Calibration>,
    stack: PlaneStack,
}

fn prepare(common: &CommonArgs, config: PipelineConfig) -> CliResult<Prepared> {
    let registry = ModelRegistry::builtin();
    registry.ensure_registered(&[TRANSLATION_TAG, RIGID_TAG, AFFINE_TAG, NON_LINEAR_TAG])?;
    let calibrations = load_transforms(&common.transforms, &registry)?;
    let stack = load_stack(&common.inputs)?;
    fs::create_dir_all(&common.output).map_err(|e| -> CliError {
        format!(
            "could not create output directory {}: {e}",
            common.output.display()
        )
        .into()
    })?;
    Ok(Prepared {
        config,
        calibrations,
        stack,
    })
}

// ── apply-split ────────────────────────────────────────────────────────

fn run_split(args: &SplitArgs) -> CliResult<()> {
    let mut config = resolve_config(&args.common)?;
    if args.align {
        config.align = true;
    }
    if let Some(model) = &args.model {
        config.alignment.model = model.parse::<CorrectionModel>()?;
    }
    let p = prepare(&args.common, config)?;
    log::info!(
        "apply-split: {} slices, {} calibrations, resolution {}, {}",
        p.stack.len(),
        p.calibrations.len(),
        p.config.mesh_resolution,
        p.config.interpolation
    );

    match &p.stack {
        PlaneStack::Gray8(slices) => {
            let out = render_split(slices, &p.calibrations, &p.config)?;
            write_split(&out, &args.common.inputs, &args.common.output)
        }
        PlaneStack::Gray16(slices) => {
            let out = render_split(slices, &p.calibrations, &p.config)?;
            write_split(&out, &args.common.inputs, &args.common.output)
        }
    }
}

fn write_split<T: SavePlane>(
    out: &SplitOutput<T>,
    inputs: &[PathBuf],
    dir: &Path,
) -> CliResult<()> {
    if out.alignment_failures > 0 {
        log::warn!(
            "{} of {} channels rendered without alignment correction",
            out.alignment_failures,
            out.channels
        );
    }
    for (s, input) in inputs.iter().enumerate() {
        for k in 0..out.channels {
            if let Some(plane) = out.plane(s, k) {
                save_plane(plane, output_path(dir, input, k))?;
            }
        }
    }
    log::info!(
        "wrote {} planes ({}x{}) to {}",
        out.planes.len(),
        out.canvas.width,
        out.canvas.height,
        dir.display()
    );
    Ok(())
}

// ── apply-channels ─────────────────────────────────────────────────────

fn run_channels(args: &ChannelArgs) -> CliResult<()> {
    let mut config = resolve_config(&args.common)?;
    if let Some(crop) = args.crop {
        config.crop_width = crop;
    }
    let p = prepare(&args.common, config)?;
    log::info!(
        "apply-channels: {} channels, crop {}",
        p.stack.len(),
        p.config.crop_width
    );

    match &p.stack {
        PlaneStack::Gray8(channels) => {
            let out = render_channels(channels, &p.calibrations, &p.config)?;
            write_channels(&out, &args.common.inputs, &args.common.output)
        }
        PlaneStack::Gray16(channels) => {
            let out = render_channels(channels, &p.calibrations, &p.config)?;
            write_channels(&out, &args.common.inputs, &args.common.output)
        }
    }
}

fn write_channels<T: SavePlane>(
    planes: &[lenscorrect::ImagePlane<T>],
    inputs: &[PathBuf],
    dir: &Path,
) -> CliResult<()> {
    for (k, (plane, input)) in planes.iter().zip(inputs).enumerate() {
        save_plane(plane, output_path(dir, input, k))?;
    }
    log::info!("wrote {} channels to {}", planes.len(), dir.display());
    Ok(())
}
