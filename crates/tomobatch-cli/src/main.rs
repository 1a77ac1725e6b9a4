mod progress;
mod summary;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tomobatch_core::aretomo::{AlignRequest, AretomoConfig};
use tomobatch_core::catalog::{Catalog, CatalogConfig};
use tomobatch_core::context::RunContext;
use tomobatch_core::gpu::detect_gpus;
use tomobatch_core::pipeline::{run_pipeline, PipelineOptions, ProcessingStep, StepPlan};
use tomobatch_core::topaz::{validate_model, TopazConfig};

/// Run AreTomo in batch on data preprocessed in warp.
///
/// Needs to run after the imod stacks were generated; assumes the default
/// warp directory structure.
#[derive(Parser)]
#[command(name = "tomobatch", version)]
struct Cli {
    /// Warp project directory, with generated imod stacks
    warp_dir: PathBuf,

    /// Directory containing mdoc files [default: WARP_DIR]
    #[arg(short, long)]
    mdoc_dir: Option<PathBuf>,

    /// Output directory for all the processing
    /// [default: WARP_DIR/tomobatch_processing]
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Only print some info, without running the commands
    #[arg(short, long)]
    dry_run: bool,

    /// Level of verbosity; can be passed multiple times
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Reconstruct just this tilt series (can be passed multiple times)
    #[arg(short, long)]
    just: Vec<String>,

    /// Exclude this tilt series from the run (can be passed multiple times)
    #[arg(short, long)]
    exclude: Vec<String>,

    /// Unbinned thickness of the SAMPLE (ice or lamella) used for alignment
    #[arg(short = 't', long, default_value_t = 400)]
    sample_thickness: u32,

    /// Unbinned thickness of the RECONSTRUCTION
    #[arg(short, long, default_value_t = 1200)]
    z_thickness: u32,

    /// Binning for the reconstruction, relative to the warp-preprocessed
    /// binning
    #[arg(short, long, default_value_t = 4)]
    binning: u32,

    /// Exposure dose (e/A^2/tilt_image); if not passed, guessed from the
    /// mdocs
    #[arg(long)]
    dose: Option<f64>,

    /// Starting tilt axis for AreTomo, if any
    #[arg(short = 'a', long)]
    tilt_axis: Option<f64>,

    /// Number of patches for local alignment in AreTomo (NxN), if any
    #[arg(short, long)]
    patches: Option<u32>,

    /// Directory containing ROI files, named like the tilt series
    #[arg(short, long)]
    roi_dir: Option<PathBuf>,

    /// Overwrite any previous existing run
    #[arg(short = 'f', long)]
    overwrite: bool,

    /// Train a new denoising model
    #[arg(long)]
    train: bool,

    /// Tile size for training the denoising model
    #[arg(long, default_value_t = 64)]
    topaz_tile_size: u32,

    /// Patch size for denoising in topaz
    #[arg(long, default_value_t = 64)]
    topaz_patch_size: u32,

    /// Topaz model for denoising: a pretrained name, the path of a
    /// previously generated model, or (with --train) a new name saved
    /// under OUTPUT_DIR/trained_models/
    #[arg(long, default_value = "unet-3d-10a")]
    topaz_model: String,

    /// Use outputs from a previous run, starting processing at this step
    #[arg(long, value_enum, default_value_t = StepArg::Align)]
    start_from: StepArg,

    /// Terminate processing after this step
    #[arg(long, value_enum, default_value_t = StepArg::Denoise)]
    stop_at: StepArg,

    /// AreTomo executable
    #[arg(long, default_value = "AreTomo")]
    aretomo: String,

    /// Topaz executable
    #[arg(long, default_value = "topaz")]
    topaz: String,

    /// Comma separated list of GPUs to use for AreTomo [default: all]
    #[arg(long)]
    gpus: Option<String>,

    /// Do not correct sample tilt
    #[arg(long)]
    no_tiltcorr: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StepArg {
    #[value(name = "align")]
    Align,
    #[value(name = "tilt_mdocs")]
    TiltMdocs,
    #[value(name = "reconstruct")]
    Reconstruct,
    #[value(name = "stack_halves")]
    StackHalves,
    #[value(name = "reconstruct_halves")]
    ReconstructHalves,
    #[value(name = "denoise")]
    Denoise,
}

impl From<StepArg> for ProcessingStep {
    fn from(arg: StepArg) -> Self {
        match arg {
            StepArg::Align => ProcessingStep::Align,
            StepArg::TiltMdocs => ProcessingStep::TiltMdocs,
            StepArg::Reconstruct => ProcessingStep::Reconstruct,
            StepArg::StackHalves => ProcessingStep::StackHalves,
            StepArg::ReconstructHalves => ProcessingStep::ReconstructHalves,
            StepArg::Denoise => ProcessingStep::Denoise,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    let warp_dir = cli
        .warp_dir
        .canonicalize()
        .with_context(|| format!("warp directory {} not found", cli.warp_dir.display()))?;
    let mdoc_dir = match &cli.mdoc_dir {
        Some(dir) => dir
            .canonicalize()
            .with_context(|| format!("mdoc directory {} not found", dir.display()))?,
        None => warp_dir.clone(),
    };
    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| warp_dir.join("tomobatch_processing"));
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("could not create {}", output_dir.display()))?;
    let output_dir = output_dir.canonicalize()?;
    let roi_dir = cli
        .roi_dir
        .as_ref()
        .map(|dir| {
            dir.canonicalize()
                .with_context(|| format!("ROI directory {} not found", dir.display()))
        })
        .transpose()?;

    validate_model(&cli.topaz_model, cli.train)?;

    let gpus: Vec<u32> = match &cli.gpus {
        Some(list) => list
            .split(',')
            .map(|id| id.trim().parse().context("invalid GPU id"))
            .collect::<Result<_>>()?,
        None => detect_gpus(),
    };

    let reporter = progress::BatchProgress::new();

    let catalog_config = CatalogConfig {
        warp_dir: warp_dir.clone(),
        mdoc_dir: mdoc_dir.clone(),
        output_dir: output_dir.clone(),
        roi_dir,
        just: cli.just.clone(),
        exclude: cli.exclude.clone(),
        train: cli.train,
        dose_override: cli.dose,
    };
    let catalog = Catalog::build(&catalog_config, &reporter)?;
    if catalog.ready.is_empty() {
        bail!("no tilt series are ready for processing");
    }
    info!(
        "{} series ready, {} excluded, {} not ready",
        catalog.ready.len(),
        catalog.excluded.len(),
        catalog.unprocessed.len()
    );

    let plan = StepPlan::new(cli.start_from.into(), cli.stop_at.into(), cli.train);
    let options = PipelineOptions {
        plan,
        aretomo: AretomoConfig {
            cmd: cli.aretomo.clone(),
            binning: cli.binning,
        },
        align: AlignRequest {
            tilt_axis: cli.tilt_axis,
            patches: cli.patches,
            thickness_align: cli.sample_thickness,
            tilt_corr: !cli.no_tiltcorr,
        },
        thickness_recon: cli.z_thickness,
        topaz: TopazConfig {
            cmd: cli.topaz.clone(),
            model: cli.topaz_model.clone(),
            train: cli.train,
            tile_size: cli.topaz_tile_size,
            patch_size: cli.topaz_patch_size,
            device: gpus.first().map_or(-2, |&id| i64::from(id)),
        },
        mdoc_dir,
        gpus,
    };

    // The full plan and every resolved option go on screen before
    // anything destructive happens.
    let plain_summary = summary::print_run_summary(&catalog, &options, &warp_dir, &cli);

    let ctx = RunContext::new(output_dir, cli.overwrite, cli.dry_run)?;
    ctx.log_block(&format!(
        "Command: {}\n{plain_summary}",
        std::env::args().collect::<Vec<_>>().join(" ")
    ));

    run_pipeline(&ctx, &catalog, &options, &reporter)?;
    Ok(())
}
