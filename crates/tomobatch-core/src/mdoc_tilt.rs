use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::aretomo::StageOutcome;
use crate::context::RunContext;
use crate::error::{Result, TomoError};
use crate::series::TiltSeries;
use crate::warp::Mdoc;

/// Rewrite a series' mdoc with the tilt angles the aligner settled on
/// after tilt correction, so downstream tools see the corrected geometry.
///
/// The `.aln` rows cover the sections the aligner kept; they are mapped
/// back onto the mdoc sections that survived ingestion. Skipped sections
/// keep their original angle.
pub fn tilt_mdoc(series: &TiltSeries, tilted_dir: &Path, ctx: &RunContext) -> Result<StageOutcome> {
    let file_name = series
        .mdoc
        .file_name()
        .ok_or_else(|| TomoError::Config(format!("bad mdoc path {}", series.mdoc.display())))?;
    let dest = tilted_dir.join(file_name);

    if !ctx.overwrite && dest.exists() {
        return Ok(StageOutcome::AlreadyExists);
    }
    if ctx.dry_run {
        thread::sleep(Duration::from_millis(50));
        return Ok(StageOutcome::Success);
    }

    let angles = read_aln_tilts(&series.paths.aln)?;
    let mdoc = Mdoc::from_file(&series.mdoc)?;
    let kept: Vec<usize> = (0..mdoc.sections.len())
        .filter(|index| !series.skipped_frames.contains(index))
        .collect();

    if kept.len() != angles.len() {
        return Err(TomoError::InvalidAln {
            path: series.paths.aln.clone(),
            reason: format!(
                "{} tilt rows for {} kept mdoc sections",
                angles.len(),
                kept.len()
            ),
        });
    }

    let pairs: Vec<(usize, f64)> = kept.into_iter().zip(angles).collect();
    mdoc.write_with_tilt_angles(&pairs, &dest)?;
    Ok(StageOutcome::Success)
}

/// Parse the per-section TILT column (last field of each data row) from an
/// AreTomo `.aln` file. Comment lines lead the file; a comment after the
/// data rows starts the local-alignment block and ends the global table.
pub fn read_aln_tilts(path: &Path) -> Result<Vec<f64>> {
    let text = fs::read_to_string(path)?;
    let mut tilts = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            if tilts.is_empty() {
                continue;
            }
            break;
        }
        let tilt = trimmed
            .split_whitespace()
            .last()
            .and_then(|field| field.parse::<f64>().ok())
            .ok_or_else(|| TomoError::InvalidAln {
                path: path.to_path_buf(),
                reason: format!("unparseable row `{trimmed}`"),
            })?;
        tilts.push(tilt);
    }
    if tilts.is_empty() {
        return Err(TomoError::InvalidAln {
            path: path.to_path_buf(),
            reason: "no tilt rows found".to_owned(),
        });
    }
    Ok(tilts)
}
