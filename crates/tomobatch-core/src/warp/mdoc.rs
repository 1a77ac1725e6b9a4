use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TomoError};

/// Basename of a path that may use Windows separators. SerialEM writes
/// `SubFramePath`/`ImageFile` as Windows paths regardless of where the
/// data ends up.
pub fn windows_basename(raw: &str) -> &str {
    raw.rsplit(['\\', '/']).next().unwrap_or(raw)
}

/// One `[ZValue = n]` section of an mdoc file.
#[derive(Clone, Debug, Default)]
pub struct MdocSection {
    pub z_value: usize,
    pub tilt_angle: Option<f64>,
    pub exposure_dose: Option<f64>,
    pub pixel_spacing: Option<f64>,
    pub sub_frame_path: Option<String>,
    /// Line index of the `TiltAngle` entry, for rewriting.
    tilt_angle_line: Option<usize>,
}

/// An mdoc acquisition record, with the raw lines retained so a corrected
/// copy can be written without disturbing anything we do not model.
#[derive(Clone, Debug)]
pub struct Mdoc {
    pub path: PathBuf,
    pub image_file: Option<String>,
    pub pixel_spacing: Option<f64>,
    pub sections: Vec<MdocSection>,
    lines: Vec<String>,
}

impl Mdoc {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let lines: Vec<String> = text.lines().map(str::to_owned).collect();

        let mut mdoc = Mdoc {
            path: path.to_path_buf(),
            image_file: None,
            pixel_spacing: None,
            sections: Vec::new(),
            lines: Vec::new(),
        };

        for (lineno, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if let Some(header) = trimmed.strip_prefix("[ZValue") {
                let z = header
                    .trim_end_matches(']')
                    .trim()
                    .trim_start_matches('=')
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| TomoError::InvalidMdoc {
                        path: path.to_path_buf(),
                        reason: format!("bad section header `{trimmed}`"),
                    })?;
                mdoc.sections.push(MdocSection {
                    z_value: z,
                    ..MdocSection::default()
                });
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match mdoc.sections.last_mut() {
                None => match key {
                    "ImageFile" => mdoc.image_file = Some(value.to_owned()),
                    "PixelSpacing" => mdoc.pixel_spacing = value.parse().ok(),
                    _ => {}
                },
                Some(section) => match key {
                    "TiltAngle" => {
                        section.tilt_angle = value.parse().ok();
                        section.tilt_angle_line = Some(lineno);
                    }
                    "ExposureDose" => section.exposure_dose = value.parse().ok(),
                    "PixelSpacing" => section.pixel_spacing = value.parse().ok(),
                    "SubFramePath" => section.sub_frame_path = Some(value.to_owned()),
                    _ => {}
                },
            }
        }

        mdoc.lines = lines;
        Ok(mdoc)
    }

    /// Filename stem of the mdoc itself. Warp keys most of its layout on
    /// this, which does not always match the series name.
    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Series name: stem of the primary image file named inside the record.
    pub fn series_name(&self) -> Option<String> {
        let raw = self.image_file.as_deref()?;
        let base = windows_basename(raw);
        let stem = match base.rsplit_once('.') {
            Some((stem, _ext)) => stem,
            None => base,
        };
        Some(stem.to_owned())
    }

    /// Pixel spacing as warp read it: first section if present, else the
    /// global header value.
    pub fn raw_pixel_spacing(&self) -> Option<f64> {
        self.sections
            .first()
            .and_then(|s| s.pixel_spacing)
            .or(self.pixel_spacing)
    }

    /// Exposure dose of the first section.
    pub fn exposure_dose(&self) -> Option<f64> {
        self.sections.first().and_then(|s| s.exposure_dose)
    }

    /// Write a copy of this mdoc to `dest` with the given per-section tilt
    /// angles substituted. `angles` maps section index -> new angle;
    /// sections not listed keep their original entry.
    pub fn write_with_tilt_angles(&self, angles: &[(usize, f64)], dest: &Path) -> Result<()> {
        let mut lines = self.lines.clone();
        for &(section_idx, angle) in angles {
            let Some(section) = self.sections.get(section_idx) else {
                return Err(TomoError::InvalidMdoc {
                    path: self.path.clone(),
                    reason: format!("no section with index {section_idx}"),
                });
            };
            let Some(lineno) = section.tilt_angle_line else {
                return Err(TomoError::InvalidMdoc {
                    path: self.path.clone(),
                    reason: format!("section {section_idx} has no TiltAngle entry"),
                });
            };
            lines[lineno] = format!("TiltAngle = {angle:.4}");
        }
        fs::write(dest, lines.join("\n") + "\n")?;
        Ok(())
    }
}
