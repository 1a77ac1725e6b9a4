use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::info;

use crate::aretomo::{StageOutcome, ToolFailure, TOOL_LOG_EXT};
use crate::context::RunContext;
use crate::error::{Result, TomoError};
use crate::runner::{ProgressReporter, StageReport};
use crate::series::TiltSeries;

/// Models shipped with the denoiser; anything else must be a path or a
/// freshly trained name.
pub const PRETRAINED_MODELS: [&str; 2] = ["unet-3d-10a", "unet-3d-20a"];

/// How often the captured output stream is sampled for progress markers.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct TopazConfig {
    /// Executable name or path.
    pub cmd: String,
    /// Pretrained model name, model path, or (with `train`) a new name.
    pub model: String,
    pub train: bool,
    /// Tile size for training.
    pub tile_size: u32,
    /// Patch size for denoising.
    pub patch_size: u32,
    /// Device passed to the denoiser; first configured GPU, or -2 to let
    /// the tool pick.
    pub device: i64,
}

/// Reject model names that cannot work before anything runs.
pub fn validate_model(model: &str, train: bool) -> Result<()> {
    if train {
        if PRETRAINED_MODELS.contains(&model) {
            return Err(TomoError::Config(format!(
                "model '{model}' already exists; provide a new name"
            )));
        }
        if model.contains('/') {
            return Err(TomoError::Config(format!(
                "model '{model}' seems to be a path; only a new name should be given"
            )));
        }
    } else if !Path::new(model).exists() && !PRETRAINED_MODELS.contains(&model) {
        return Err(TomoError::Config(format!(
            "model '{model}' does not exist; provide a path to an existing model \
             or one of {PRETRAINED_MODELS:?}"
        )));
    }
    Ok(())
}

/// Denoise every reconstruction, optionally training a model first from
/// the even/odd half reconstructions.
///
/// Training failure aborts the stage (there is no model left to apply);
/// per-volume failures are isolated and aggregated like any other stage.
pub fn denoise_batch(
    series: &[TiltSeries],
    config: &TopazConfig,
    ctx: &RunContext,
    reporter: &dyn ProgressReporter,
) -> Result<StageReport> {
    let even_dir = ctx.output_dir.join("even");
    let odd_dir = ctx.output_dir.join("odd");
    let denoised_dir = ctx.output_dir.join("denoised");

    let inputs: Vec<&Path> = series.iter().map(|ts| ts.paths.recon.as_path()).collect();
    if config.train {
        info!(
            "training model '{}' with inputs '{}' and '{}'",
            config.model,
            even_dir.display(),
            odd_dir.display()
        );
    }
    match inputs.as_slice() {
        [] => {}
        [only] => info!("denoising: {}", only.display()),
        [first, .., last] => info!("denoising: [{} [...] {}]", first.display(), last.display()),
    }
    info!("output: {}", denoised_dir.display());

    let mut report = StageReport::default();
    reporter.begin_stage("Denoising", series.len());

    let model = if config.train {
        let prefix = ctx.output_dir.join("trained_models").join(&config.model);
        if !ctx.dry_run {
            fs::create_dir_all(ctx.output_dir.join("trained_models"))?;
        }
        train_model(config, &even_dir, &odd_dir, &prefix, ctx, reporter)?;
        prefix.display().to_string()
    } else {
        config.model.clone()
    };

    for ts in series {
        reporter.item_started(0, &ts.name);
        let outcome = denoise_one(ts, &model, config, &denoised_dir, ctx, reporter)
            .unwrap_or_else(|err| {
                StageOutcome::ToolFailure(ToolFailure {
                    command: ts.name.clone(),
                    output: err.to_string(),
                    exit_code: None,
                })
            });
        report.record(outcome);
        reporter.item_finished(0);
        reporter.advance();
    }

    reporter.finish_stage();
    report.log_summary("Denoising");
    Ok(report)
}

fn train_model(
    config: &TopazConfig,
    even_dir: &Path,
    odd_dir: &Path,
    save_prefix: &Path,
    ctx: &RunContext,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let args = vec![
        "denoise3d".to_owned(),
        "--dir-a".to_owned(),
        even_dir.display().to_string(),
        "--dir-b".to_owned(),
        odd_dir.display().to_string(),
        "--save-prefix".to_owned(),
        save_prefix.display().to_string(),
        "--tilesize".to_owned(),
        config.tile_size.to_string(),
        "--device".to_owned(),
        config.device.to_string(),
    ];

    let log = save_prefix.with_extension(TOOL_LOG_EXT);
    match run_polled(config, &args, &log, "training", ctx, reporter)? {
        StageOutcome::ToolFailure(failure) => Err(TomoError::Config(format!(
            "denoiser training failed: {} exited with {:?}:\n{}",
            failure.command, failure.exit_code, failure.output
        ))),
        _ => Ok(()),
    }
}

fn denoise_one(
    ts: &TiltSeries,
    model: &str,
    config: &TopazConfig,
    denoised_dir: &Path,
    ctx: &RunContext,
    reporter: &dyn ProgressReporter,
) -> Result<StageOutcome> {
    let file_name = ts
        .paths
        .recon
        .file_name()
        .ok_or_else(|| TomoError::Config(format!("bad recon path {}", ts.paths.recon.display())))?;
    let produced = denoised_dir.join(file_name);
    if !ctx.overwrite && produced.exists() {
        return Ok(StageOutcome::AlreadyExists);
    }

    let args = vec![
        "denoise3d".to_owned(),
        ts.paths.recon.display().to_string(),
        "--output".to_owned(),
        denoised_dir.display().to_string(),
        "--model".to_owned(),
        model.to_owned(),
        "--patch-size".to_owned(),
        config.patch_size.to_string(),
        "--patch-padding".to_owned(),
        (config.patch_size / 2).to_string(),
        "--device".to_owned(),
        config.device.to_string(),
    ];

    let log = produced.with_extension(TOOL_LOG_EXT);
    run_polled(config, &args, &log, &ts.name, ctx, reporter)
}

/// Run one denoiser invocation with its combined output captured to `log`,
/// sampling the stream at a bounded rate for `NN.N%` markers. The markers
/// only drive the progress estimate; completion is decided by exit status
/// alone.
fn run_polled(
    config: &TopazConfig,
    args: &[String],
    log: &Path,
    label: &str,
    ctx: &RunContext,
    reporter: &dyn ProgressReporter,
) -> Result<StageOutcome> {
    let command_line = format!("{} {}", config.cmd, args.join(" "));
    info!("{command_line}");
    ctx.log_block(&command_line);

    if ctx.dry_run {
        thread::sleep(Duration::from_millis(100));
        return Ok(StageOutcome::Success);
    }

    let sink = File::create(log)?;
    let child = Command::new(&config.cmd)
        .args(args)
        .stdout(Stdio::from(sink.try_clone()?))
        .stderr(Stdio::from(sink))
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(err) => {
            return Ok(StageOutcome::ToolFailure(ToolFailure {
                command: command_line,
                output: err.to_string(),
                exit_code: None,
            }))
        }
    };

    let percent = Regex::new(r"(\d+(?:\.\d+)?)%").map_err(|e| TomoError::Config(e.to_string()))?;
    let mut tail = File::open(log)?;
    let mut read_pos: u64 = 0;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        thread::sleep(POLL_INTERVAL);

        tail.seek(SeekFrom::Start(read_pos))?;
        let mut chunk = String::new();
        if tail.read_to_string(&mut chunk).is_ok() && !chunk.is_empty() {
            if let Some(caps) = percent.captures_iter(&chunk).last() {
                read_pos += chunk.len() as u64;
                if let Ok(value) = caps[1].parse::<f32>() {
                    reporter.tool_progress(label, value / 100.0);
                }
            }
        }
    };

    if status.success() {
        Ok(StageOutcome::Success)
    } else {
        let output = fs::read_to_string(log).unwrap_or_default();
        Ok(StageOutcome::ToolFailure(ToolFailure {
            command: command_line,
            output,
            exit_code: status.code(),
        }))
    }
}
