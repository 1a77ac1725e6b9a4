use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;

use crate::aretomo::{run_aretomo, AlignRequest, AretomoConfig, ReconstructRequest, ToolRequest};
use crate::catalog::Catalog;
use crate::context::RunContext;
use crate::error::{Result, TomoError};
use crate::gpu::GpuPool;
use crate::halves::stack_half;
use crate::mdoc_tilt::tilt_mdoc;
use crate::paths::tool_available;
use crate::runner::{default_workers, run_batch, ProgressReporter};
use crate::series::Half;
use crate::topaz::{denoise_batch, TopazConfig};

/// The fixed, ordered list of pipeline stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessingStep {
    Align,
    TiltMdocs,
    Reconstruct,
    StackHalves,
    ReconstructHalves,
    Denoise,
}

impl ProcessingStep {
    pub const ALL: [ProcessingStep; 6] = [
        ProcessingStep::Align,
        ProcessingStep::TiltMdocs,
        ProcessingStep::Reconstruct,
        ProcessingStep::StackHalves,
        ProcessingStep::ReconstructHalves,
        ProcessingStep::Denoise,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProcessingStep::Align => "align",
            ProcessingStep::TiltMdocs => "tilt_mdocs",
            ProcessingStep::Reconstruct => "reconstruct",
            ProcessingStep::StackHalves => "stack_halves",
            ProcessingStep::ReconstructHalves => "reconstruct_halves",
            ProcessingStep::Denoise => "denoise",
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcessingStep {
    type Err = TomoError;

    fn from_str(s: &str) -> Result<Self> {
        ProcessingStep::ALL
            .into_iter()
            .find(|step| step.name() == s)
            .ok_or_else(|| TomoError::Config(format!("invalid step name `{s}`")))
    }
}

/// Which stages run: the closed `[start, stop]` window over the fixed
/// order, with the half stages additionally gated on training mode.
#[derive(Clone, Copy, Debug)]
pub struct StepPlan {
    enabled: [bool; 6],
}

impl StepPlan {
    pub fn new(start: ProcessingStep, stop: ProcessingStep, train: bool) -> Self {
        let mut enabled = [false; 6];
        for (slot, step) in ProcessingStep::ALL.into_iter().enumerate() {
            enabled[slot] = start <= step && step <= stop;
        }
        if !train {
            enabled[ProcessingStep::StackHalves as usize] = false;
            enabled[ProcessingStep::ReconstructHalves as usize] = false;
        }
        StepPlan { enabled }
    }

    pub fn runs(&self, step: ProcessingStep) -> bool {
        self.enabled[step as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProcessingStep, bool)> + '_ {
        ProcessingStep::ALL
            .into_iter()
            .map(move |step| (step, self.runs(step)))
    }
}

/// Everything a run needs beyond the catalog itself.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub plan: StepPlan,
    pub aretomo: AretomoConfig,
    pub align: AlignRequest,
    /// Unbinned thickness of the reconstructed volume.
    pub thickness_recon: u32,
    pub topaz: TopazConfig,
    pub mdoc_dir: PathBuf,
    /// GPUs to spread invocations over.
    pub gpus: Vec<u32>,
}

/// Run every enabled stage, strictly in order, each one completing (and
/// reporting) before the next begins. Concurrency exists only within a
/// stage.
pub fn run_pipeline(
    ctx: &RunContext,
    catalog: &Catalog,
    opts: &PipelineOptions,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let series = &catalog.ready;
    let plan = &opts.plan;

    let needs_gpus = plan.runs(ProcessingStep::Align)
        || plan.runs(ProcessingStep::Reconstruct)
        || plan.runs(ProcessingStep::ReconstructHalves);

    // Resource and tool checks happen once, before any stage runs.
    let pool = if needs_gpus && !ctx.dry_run {
        if !tool_available(&opts.aretomo.cmd) {
            return Err(TomoError::ToolNotFound(opts.aretomo.cmd.clone()));
        }
        Some(GpuPool::new(opts.gpus.clone())?)
    } else {
        None
    };
    if plan.runs(ProcessingStep::Denoise) && !ctx.dry_run && !tool_available(&opts.topaz.cmd) {
        return Err(TomoError::ToolNotFound(opts.topaz.cmd.clone()));
    }

    let gpu_workers = pool.as_ref().map_or_else(default_workers, GpuPool::len);

    if plan.runs(ProcessingStep::Align) {
        info!("Aligning with AreTomo on {gpu_workers} workers...");
        let request = ToolRequest::Align(opts.align.clone());
        run_batch(
            series,
            gpu_workers,
            "Aligning",
            reporter,
            |ts| ts.name.as_str(),
            |ts| run_aretomo(ts, &request, &opts.aretomo, pool.as_ref(), ctx),
        )?;
    }

    if plan.runs(ProcessingStep::TiltMdocs) {
        if !opts.align.tilt_corr {
            info!("No need to tilt mdocs!");
        } else {
            info!("Tilting mdocs...");
            let tilted_dir = opts.mdoc_dir.join("mdoc_tilted");
            fs::create_dir_all(&tilted_dir)?;
            run_batch(
                series,
                default_workers(),
                "Tilting mdocs",
                reporter,
                |ts| ts.name.as_str(),
                |ts| tilt_mdoc(ts, &tilted_dir, ctx),
            )?;
        }
    }

    if plan.runs(ProcessingStep::Reconstruct) {
        info!("Reconstructing with AreTomo...");
        let request = ToolRequest::Reconstruct(ReconstructRequest {
            thickness_recon: opts.thickness_recon,
            half: None,
        });
        run_batch(
            series,
            gpu_workers,
            "Reconstructing",
            reporter,
            |ts| ts.name.as_str(),
            |ts| run_aretomo(ts, &request, &opts.aretomo, pool.as_ref(), ctx),
        )?;
    }

    if plan.runs(ProcessingStep::StackHalves) {
        for half in Half::BOTH {
            info!("Preparing {half} stacks for denoising...");
            run_batch(
                series,
                default_workers(),
                &format!("Stacking {half}"),
                reporter,
                |ts| ts.name.as_str(),
                |ts| stack_half(ts, half, ctx),
            )?;
        }
    }

    if plan.runs(ProcessingStep::ReconstructHalves) {
        for half in Half::BOTH {
            info!("Reconstructing {half} tomograms for denoising...");
            let half_dir = ctx.output_dir.join(half.name());
            fs::create_dir_all(&half_dir)?;
            let request = ToolRequest::Reconstruct(ReconstructRequest {
                thickness_recon: opts.thickness_recon,
                half: Some(half),
            });
            run_batch(
                series,
                gpu_workers,
                &format!("Reconstructing {half} halves"),
                reporter,
                |ts| ts.name.as_str(),
                |ts| run_aretomo(ts, &request, &opts.aretomo, pool.as_ref(), ctx),
            )?;
            if !ctx.dry_run {
                remove_aretomo_leftovers(&half_dir)?;
            }
        }
    }

    if plan.runs(ProcessingStep::Denoise) {
        info!("Denoising tomograms...");
        if !ctx.dry_run {
            fs::create_dir_all(ctx.output_dir.join("denoised"))?;
        }
        denoise_batch(series, &opts.topaz, ctx, reporter)?;
    }

    Ok(())
}

/// AreTomo drops projection previews and capture logs next to the half
/// reconstructions; the denoiser dies on them, so they go.
fn remove_aretomo_leftovers(half_dir: &std::path::Path) -> Result<()> {
    for entry in fs::read_dir(half_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        // the previews are named `<stem>_projX<c>.mrc` with one trailing char
        let is_projection = name
            .strip_suffix(".mrc")
            .and_then(|stem| stem.strip_suffix(|_: char| true))
            .is_some_and(|stem| stem.ends_with("_projX"));
        if is_projection || name.ends_with(".toollog") {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
