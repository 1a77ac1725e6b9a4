use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::error::{Result, TomoError};
use crate::runner::ProgressReporter;
use crate::series::{ReconParams, SeriesPaths, TiltSeries};
use crate::warp::{windows_basename, FrameDescriptor, Mdoc};

/// Where to find warp's outputs and which series to include.
#[derive(Clone, Debug)]
pub struct CatalogConfig {
    pub warp_dir: PathBuf,
    pub mdoc_dir: PathBuf,
    pub output_dir: PathBuf,
    pub roi_dir: Option<PathBuf>,
    /// Explicit subset of series names to process, in user order.
    pub just: Vec<String>,
    /// Name blocklist, matched against mdoc stem and derived name.
    pub exclude: Vec<String>,
    /// Training mode: every even/odd average must exist on disk.
    pub train: bool,
    /// Overrides the dose guessed from the mdocs.
    pub dose_override: Option<f64>,
}

/// The classified work-item catalog: built once per run, immutable after.
/// Every discovered record lands in exactly one of the three lists.
#[derive(Debug, Default)]
pub struct Catalog {
    pub ready: Vec<TiltSeries>,
    pub excluded: Vec<String>,
    pub unprocessed: Vec<String>,
}

enum Record {
    Ready(Box<TiltSeries>),
    Excluded(String),
    Unprocessed(String),
}

impl Catalog {
    /// Discover and classify every mdoc record under the configured
    /// directories. Fails fast on a broken layout (no `imod/`
    /// subdirectory, zero mdocs after filtering) and, in training mode,
    /// on a missing even/odd average; everything else is a per-series
    /// classification, never an abort.
    pub fn build(config: &CatalogConfig, reporter: &dyn ProgressReporter) -> Result<Catalog> {
        let imod_dir = config.warp_dir.join("imod");
        if !imod_dir.is_dir() {
            return Err(TomoError::MissingDirectory(imod_dir));
        }

        let mdocs = find_mdocs(&config.mdoc_dir, &config.just)?;

        let even_dir = config.warp_dir.join("average").join("even");
        let odd_dir = config.warp_dir.join("average").join("odd");

        let mut catalog = Catalog::default();
        reporter.begin_stage("Reading mdocs", mdocs.len());
        for mdoc_file in &mdocs {
            match read_record(config, &imod_dir, &even_dir, &odd_dir, mdoc_file)? {
                Record::Ready(series) => catalog.ready.push(*series),
                Record::Excluded(name) => catalog.excluded.push(name),
                Record::Unprocessed(name) => catalog.unprocessed.push(name),
            }
            reporter.advance();
        }
        reporter.finish_stage();

        Ok(catalog)
    }
}

/// Mdoc files to consider: the user-provided subset in its given order, or
/// every `.mdoc` in lexicographic order. Subset names match the mdoc stem
/// or the derived series name, since the two can differ.
fn find_mdocs(mdoc_dir: &Path, just: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(mdoc_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "mdoc") {
            found.push(path);
        }
    }
    found.sort();

    let mdocs = if just.is_empty() {
        found
    } else {
        let mut picked = Vec::new();
        for wanted in just {
            let matched = found.iter().find(|path| {
                path.file_stem().is_some_and(|stem| stem == wanted.as_str())
                    || Mdoc::from_file(path)
                        .ok()
                        .and_then(|mdoc| mdoc.series_name())
                        .is_some_and(|name| name == *wanted)
            });
            match matched {
                Some(path) => picked.push(path.clone()),
                None => warn!("--just {wanted}: no matching mdoc found"),
            }
        }
        picked
    };

    if mdocs.is_empty() {
        return Err(TomoError::NoMdocs);
    }
    Ok(mdocs)
}

fn read_record(
    config: &CatalogConfig,
    imod_dir: &Path,
    even_dir: &Path,
    odd_dir: &Path,
    mdoc_file: &Path,
) -> Result<Record> {
    let mdoc_name = mdoc_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mdoc = match Mdoc::from_file(mdoc_file) {
        Ok(mdoc) => mdoc,
        Err(err) => {
            error!("{}: unreadable mdoc: {err}", mdoc_file.display());
            return Ok(Record::Unprocessed(mdoc_name));
        }
    };

    // Warp keys its layout on the mdoc name, but the series keeps its own
    // name from the primary image; filters must match either.
    let Some(ts_name) = mdoc.series_name() else {
        error!("{}: mdoc has no ImageFile entry", mdoc_file.display());
        return Ok(Record::Unprocessed(mdoc_name));
    };

    if config.exclude.contains(&ts_name) || config.exclude.contains(&mdoc_name) {
        return Ok(Record::Excluded(ts_name));
    }

    // Not preprocessed in warp yet.
    let stack = imod_dir.join(&mdoc_name).join(format!("{mdoc_name}.st"));
    if !stack.exists() {
        return Ok(Record::Unprocessed(ts_name));
    }

    let mut skipped_frames = Vec::new();
    let mut even_frames = Vec::new();
    let mut odd_frames = Vec::new();
    let mut last_valid: Option<FrameDescriptor> = None;
    let mut bin_values: Vec<f64> = Vec::new();

    for (index, section) in mdoc.sections.iter().enumerate() {
        let Some(sub_frame) = section.sub_frame_path.as_deref() else {
            warn!("{ts_name}: section {index} has no SubFramePath, skipping the tilt");
            skipped_frames.push(index);
            continue;
        };
        let frame = config.warp_dir.join(windows_basename(sub_frame));
        if !frame.exists() {
            warn!(
                "{} is listed in an mdoc file, but the file does not exist; \
                 the tilt will be skipped, but you may want to check your data",
                frame.display()
            );
            skipped_frames.push(index);
            continue;
        }

        let descriptor_path = frame.with_extension("xml");
        let descriptor = match FrameDescriptor::from_file(&descriptor_path) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(
                    "{}: unreadable frame descriptor ({err}), skipping the tilt",
                    descriptor_path.display()
                );
                skipped_frames.push(index);
                continue;
            }
        };

        if descriptor.unselect_manual {
            skipped_frames.push(index);
            continue;
        }

        let stem = frame
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        even_frames.push(even_dir.join(format!("{stem}.mrc")));
        odd_frames.push(odd_dir.join(format!("{stem}.mrc")));
        if let Some(bin) = descriptor.bin_times {
            bin_values.push(bin);
        }
        last_valid = Some(descriptor);
    }

    let Some(descriptor) = last_valid else {
        return Ok(Record::Unprocessed(ts_name));
    };

    // Global optics are read from the last usable descriptor under the
    // assumption that all frames share them; a series violating that is
    // not safe to process.
    if bin_values
        .iter()
        .any(|bin| (bin - bin_values[0]).abs() > 1e-6)
    {
        error!("{ts_name}: frame descriptors disagree on BinTimes ({bin_values:?})");
        return Ok(Record::Unprocessed(ts_name));
    }

    if config.train {
        for image in even_frames.iter().chain(&odd_frames) {
            if !image.exists() {
                return Err(TomoError::MissingHalf(image.clone()));
            }
        }
    }

    let params = extract_params(config, &mdoc, &descriptor, &ts_name);
    let roi = find_roi(config.roi_dir.as_deref(), &ts_name);

    Ok(Record::Ready(Box::new(TiltSeries {
        paths: SeriesPaths::derive(&ts_name, &config.output_dir),
        rawtlt: stack.with_extension("rawtlt"),
        name: ts_name,
        mdoc_name,
        mdoc: mdoc_file.to_path_buf(),
        stack,
        roi,
        skipped_frames,
        even_frames,
        odd_frames,
        params,
    })))
}

/// Missing optional values are reportable but never fatal for the series.
fn extract_params(
    config: &CatalogConfig,
    mdoc: &Mdoc,
    descriptor: &FrameDescriptor,
    ts_name: &str,
) -> ReconParams {
    let bin_times = descriptor.bin_times.unwrap_or_else(|| {
        warn!("{ts_name}: no BinTimes in frame descriptor, assuming unbinned");
        0.0
    });
    let raw_px = mdoc.raw_pixel_spacing().unwrap_or_else(|| {
        warn!("{ts_name}: no pixel spacing in mdoc, using 0");
        0.0
    });
    let dose = config
        .dose_override
        .or_else(|| mdoc.exposure_dose())
        .unwrap_or_else(|| {
            warn!("{ts_name}: no exposure dose in mdoc, using 0");
            0.0
        });

    ReconParams {
        dose,
        px_size: raw_px * 2f64.powf(bin_times),
        cs: descriptor.cs.unwrap_or_default(),
        kv: descriptor.voltage.unwrap_or_default() as u32,
        // warp stores defocus in micrometers, AreTomo wants Angstrom
        defocus: descriptor.defocus.unwrap_or_default() * 1e4,
    }
}

/// A ROI file matches by name prefix; an ambiguous match resolves to none.
fn find_roi(roi_dir: Option<&Path>, ts_name: &str) -> Option<PathBuf> {
    let roi_dir = roi_dir?;
    let mut matches = Vec::new();
    for entry in fs::read_dir(roi_dir).ok()? {
        let path = entry.ok()?.path();
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(ts_name))
        {
            matches.push(path);
        }
    }
    if matches.len() == 1 {
        matches.pop()
    } else {
        None
    }
}
