use std::fmt;
use std::path::{Path, PathBuf};

/// Even/odd half selector for the denoiser-training stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Half {
    Even,
    Odd,
}

impl Half {
    pub const BOTH: [Half; 2] = [Half::Even, Half::Odd];

    pub fn name(self) -> &'static str {
        match self {
            Half::Even => "even",
            Half::Odd => "odd",
        }
    }
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-series acquisition parameters forwarded to the reconstruction tool.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReconParams {
    /// Exposure dose in e/A^2 per tilt image.
    pub dose: f64,
    /// Pixel size in Angstrom after warp's binning (raw * 2^BinTimes).
    pub px_size: f64,
    /// Spherical aberration in mm.
    pub cs: f64,
    /// Acceleration voltage in kV.
    pub kv: u32,
    /// Defocus in Angstrom.
    pub defocus: f64,
}

/// Output contract of one series: every path a stage produces or a later
/// stage reads back, derived once from the series name and the output
/// root. Names mirror AreTomo's own conventions (stem + fixed suffixes)
/// so its outputs are found again downstream.
#[derive(Clone, Debug)]
pub struct SeriesPaths {
    pub aln: PathBuf,
    pub xf: PathBuf,
    pub tlt: PathBuf,
    pub stack_even: PathBuf,
    pub stack_odd: PathBuf,
    pub recon: PathBuf,
    pub recon_even: PathBuf,
    pub recon_odd: PathBuf,
}

impl SeriesPaths {
    pub fn derive(name: &str, output_dir: &Path) -> Self {
        // AreTomo truncates everything after the first dot when naming
        // its alignment outputs.
        let stripped = name.split('.').next().unwrap_or(name);
        let imod_dir = output_dir.join(format!("{stripped}_Imod"));
        SeriesPaths {
            aln: output_dir.join(format!("{stripped}.aln")),
            xf: imod_dir.join(format!("{stripped}.xf")),
            tlt: imod_dir.join(format!("{stripped}.tlt")),
            stack_even: output_dir.join(format!("{name}_even.st")),
            stack_odd: output_dir.join(format!("{name}_odd.st")),
            recon: output_dir.join(format!("{name}.mrc")),
            recon_even: output_dir.join("even").join(format!("{name}.mrc")),
            recon_odd: output_dir.join("odd").join(format!("{name}.mrc")),
        }
    }
}

/// One tilt series ready for processing: identity, inputs discovered from
/// the warp layout, and the derived output paths for every stage. Built
/// once during catalog construction and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct TiltSeries {
    /// Derived from the mdoc's embedded primary-image field.
    pub name: String,
    /// Stem of the mdoc filename; warp keys some outputs on this instead.
    pub mdoc_name: String,
    pub mdoc: PathBuf,
    /// Preprocessed image stack generated by warp.
    pub stack: PathBuf,
    /// Raw tilt angles beside the stack.
    pub rawtlt: PathBuf,
    /// ROI file matched by name prefix, if exactly one matched.
    pub roi: Option<PathBuf>,
    /// Section indices excluded from processing (missing or deselected).
    pub skipped_frames: Vec<usize>,
    /// Per-frame even/odd average images, in acquisition order, skipped
    /// frames excluded.
    pub even_frames: Vec<PathBuf>,
    pub odd_frames: Vec<PathBuf>,
    pub params: ReconParams,
    pub paths: SeriesPaths,
}

impl TiltSeries {
    pub fn half_stack(&self, half: Half) -> &Path {
        match half {
            Half::Even => &self.paths.stack_even,
            Half::Odd => &self.paths.stack_odd,
        }
    }

    pub fn half_recon(&self, half: Half) -> &Path {
        match half {
            Half::Even => &self.paths.recon_even,
            Half::Odd => &self.paths.recon_odd,
        }
    }

    pub fn half_frames(&self, half: Half) -> &[PathBuf] {
        match half {
            Half::Even => &self.even_frames,
            Half::Odd => &self.odd_frames,
        }
    }
}
