use std::thread;
use std::time::Duration;

use crate::aretomo::StageOutcome;
use crate::context::RunContext;
use crate::error::Result;
use crate::mrc;
use crate::series::{Half, TiltSeries};

/// Build one even/odd half stack for a series by stacking its per-frame
/// average images in acquisition order (skipped frames are already
/// excluded from the frame lists).
pub fn stack_half(series: &TiltSeries, half: Half, ctx: &RunContext) -> Result<StageOutcome> {
    let dest = series.half_stack(half);
    if !ctx.overwrite && dest.exists() {
        return Ok(StageOutcome::AlreadyExists);
    }
    if ctx.dry_run {
        thread::sleep(Duration::from_millis(50));
        return Ok(StageOutcome::Success);
    }
    mrc::stack_images(series.half_frames(half), dest)?;
    Ok(StageOutcome::Success)
}
