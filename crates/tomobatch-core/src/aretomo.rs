use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::context::RunContext;
use crate::error::{Result, TomoError};
use crate::gpu::{GpuGuard, GpuPool};
use crate::paths::relative_to;
use crate::series::{Half, TiltSeries};

/// Options shared by both AreTomo stage kinds.
#[derive(Clone, Debug)]
pub struct AretomoConfig {
    /// Executable name or path.
    pub cmd: String,
    /// Output binning relative to warp's preprocessed binning.
    pub binning: u32,
}

/// Alignment-stage options: what AreTomo needs when producing transforms
/// rather than a volume.
#[derive(Clone, Debug)]
pub struct AlignRequest {
    pub tilt_axis: Option<f64>,
    /// Local-alignment patch grid (NxN), if any.
    pub patches: Option<u32>,
    /// Unbinned sample thickness used for alignment.
    pub thickness_align: u32,
    pub tilt_corr: bool,
}

/// Reconstruction-stage options.
#[derive(Clone, Debug)]
pub struct ReconstructRequest {
    /// Unbinned thickness of the reconstructed volume.
    pub thickness_recon: u32,
    /// Reconstruct one half stack instead of the full stack.
    pub half: Option<Half>,
}

/// A stage request carries exactly the option set its kind understands;
/// an unknown option cannot be smuggled in.
#[derive(Clone, Debug)]
pub enum ToolRequest {
    Align(AlignRequest),
    Reconstruct(ReconstructRequest),
}

/// Outcome of one per-item invocation.
#[derive(Debug)]
pub enum StageOutcome {
    Success,
    /// The target output already exists and overwrite is off; nothing ran.
    AlreadyExists,
    ToolFailure(ToolFailure),
}

/// Everything needed to diagnose a failed invocation without re-running.
#[derive(Clone, Debug)]
pub struct ToolFailure {
    pub command: String,
    pub output: String,
    pub exit_code: Option<i32>,
}

/// Extension of the sidecar file capturing a tool's combined output.
pub const TOOL_LOG_EXT: &str = "toollog";

/// Run one AreTomo invocation for one tilt series.
///
/// The existence check and the invocation form a single step per item:
/// each item owns a distinct output path, so no cross-item race exists.
/// The GPU token is taken only after that check and is returned on every
/// path out, success or not.
pub fn run_aretomo(
    series: &TiltSeries,
    request: &ToolRequest,
    config: &AretomoConfig,
    pool: Option<&GpuPool>,
    ctx: &RunContext,
) -> Result<StageOutcome> {
    let (input, output) = stage_paths(series, request);
    let cwd = output
        .parent()
        .ok_or_else(|| TomoError::Config(format!("output {} has no parent", output.display())))?
        .to_path_buf();

    // AreTomo is path-fragile: run from the output directory and hand it
    // nothing but relative paths, siblings included.
    let input_rel = relative_to(input, &cwd);
    let rawtlt_rel = relative_to(&series.rawtlt, &cwd);
    let aln_rel = relative_to(&series.paths.aln, &cwd);
    let xf_rel = relative_to(&series.paths.xf, &cwd);
    let mut output_rel = relative_to(output, &cwd);
    if matches!(request, ToolRequest::Align(_)) {
        // the aligned stack, not a volume
        let stem = output_rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        output_rel.set_file_name(format!("{stem}_aligned.st"));
    }

    if !ctx.overwrite && cwd.join(&output_rel).exists() {
        return Ok(StageOutcome::AlreadyExists);
    }

    // One job per GPU; waits here until a token frees up.
    let gpu = match pool {
        Some(pool) => pool.acquire(),
        None => GpuGuard::placeholder(),
    };

    let options = build_options(series, request, config, &gpu, Paths {
        input: &input_rel,
        output: &output_rel,
        rawtlt: &rawtlt_rel,
        aln: &aln_rel,
        cwd: &cwd,
    });

    let command_line = format!(
        "{} {}",
        config.cmd,
        options
            .iter()
            .map(|(flag, value)| format!("-{flag} {value}"))
            .collect::<Vec<_>>()
            .join(" ")
    );
    info!("{command_line}");
    if matches!(request, ToolRequest::Align(_)) {
        debug!("mv {} {}.xf", xf_rel.display(), series.mdoc_name);
    }
    ctx.log_block(&command_line);

    if ctx.dry_run {
        thread::sleep(Duration::from_millis(100));
        return Ok(StageOutcome::Success);
    }

    let mut args: Vec<String> = Vec::new();
    for (flag, value) in &options {
        args.push(format!("-{flag}"));
        // multi-valued flags like `-TiltAxis 10 1` become separate args
        args.extend(value.split_whitespace().map(str::to_owned));
    }

    let toollog = cwd.join(&output_rel).with_extension(TOOL_LOG_EXT);
    let run = Command::new(&config.cmd)
        .args(&args)
        .current_dir(&cwd)
        .output();

    let run = match run {
        Ok(run) => run,
        Err(err) => {
            // nothing was captured; persist the spawn error instead
            let _ = fs::write(&toollog, err.to_string());
            return Ok(StageOutcome::ToolFailure(ToolFailure {
                command: command_line,
                output: err.to_string(),
                exit_code: None,
            }));
        }
    };

    // The tool's own log file option is broken, so this capture is the
    // only durable record of the run.
    let mut combined = run.stdout;
    combined.extend_from_slice(&run.stderr);
    fs::write(&toollog, &combined)?;

    if !run.status.success() {
        return Ok(StageOutcome::ToolFailure(ToolFailure {
            command: command_line,
            output: String::from_utf8_lossy(&combined).into_owned(),
            exit_code: run.status.code(),
        }));
    }

    if matches!(request, ToolRequest::Align(_)) {
        // move the transform file where warp expects to find it: the full
        // mdoc stem, not the tool's truncated default
        let target = cwd.join(format!("{}.xf", series.mdoc_name));
        fs::rename(cwd.join(&xf_rel), target)?;
    }

    Ok(StageOutcome::Success)
}

/// Input stack and produced output for one stage kind.
fn stage_paths<'s>(series: &'s TiltSeries, request: &ToolRequest) -> (&'s Path, &'s Path) {
    match request {
        ToolRequest::Align(_) => (&series.stack, &series.paths.recon),
        ToolRequest::Reconstruct(recon) => match recon.half {
            None => (&series.stack, &series.paths.recon),
            Some(half) => (series.half_stack(half), series.half_recon(half)),
        },
    }
}

struct Paths<'p> {
    input: &'p Path,
    output: &'p Path,
    rawtlt: &'p Path,
    aln: &'p Path,
    cwd: &'p Path,
}

/// Fixed mapping of logical parameters to AreTomo flags, in a stable
/// order. Optional flags are omitted when unset.
fn build_options(
    series: &TiltSeries,
    request: &ToolRequest,
    config: &AretomoConfig,
    gpu: &GpuGuard<'_>,
    paths: Paths<'_>,
) -> Vec<(&'static str, String)> {
    let mut options: Vec<(&'static str, String)> = vec![
        ("InMrc", paths.input.display().to_string()),
        ("OutMrc", paths.output.display().to_string()),
        ("OutBin", config.binning.to_string()),
        ("Gpu", gpu.id().to_string()),
        ("DarkTol", "0".to_owned()),
    ];

    match request {
        ToolRequest::Align(align) => {
            options.push(("AngFile", paths.rawtlt.display().to_string()));
            options.push(("AlignZ", align.thickness_align.to_string()));
            options.push(("TiltCor", u8::from(align.tilt_corr).to_string()));
            options.push(("VolZ", "0".to_owned()));
            options.push(("TiltAxis", format!("{} 1", align.tilt_axis.unwrap_or(0.0))));
            options.push(("OutImod", "2".to_owned()));
            if let Some(roi) = &series.roi {
                options.push(("RoiFile", relative_to(roi, paths.cwd).display().to_string()));
            }
            if let Some(patches) = align.patches {
                options.push(("Patch", format!("{patches} {patches}")));
            }
        }
        ToolRequest::Reconstruct(recon) => {
            options.push(("AlnFile", paths.aln.display().to_string()));
            options.push(("VolZ", recon.thickness_recon.to_string()));
            options.push(("PixSize", series.params.px_size.to_string()));
            options.push(("Kv", series.params.kv.to_string()));
            options.push(("Cs", series.params.cs.to_string()));
            options.push(("Defoc", series.params.defocus.to_string()));
            options.push(("FlipVol", "1".to_owned()));
            options.push(("WBP", "1".to_owned()));
            if series.params.dose > 0.0 {
                options.push(("ImgDose", series.params.dose.to_string()));
            }
        }
    }

    options
}
