use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::Result;

/// The handful of fields the pipeline needs from a warp per-frame XML
/// descriptor. The file format belongs to warp; only named fields are
/// extracted, nothing else is modeled.
#[derive(Clone, Debug, Default)]
pub struct FrameDescriptor {
    /// Frame was deselected by hand in warp.
    pub unselect_manual: bool,
    /// Binning exponent applied during preprocessing (`BinTimes`).
    pub bin_times: Option<f64>,
    /// Acceleration voltage in kV.
    pub voltage: Option<f64>,
    /// Spherical aberration in mm.
    pub cs: Option<f64>,
    /// Fitted defocus in micrometers, as warp stores it.
    pub defocus: Option<f64>,
}

impl FrameDescriptor {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_xml(&text))
    }

    /// Warp writes `<Param Name="..." Value="..."/>` rows in that
    /// attribute order; the extraction relies on it.
    pub fn from_xml(text: &str) -> Self {
        let options_ctf = block(text, "OptionsCTF");
        let ctf = block(text, "CTF");
        FrameDescriptor {
            unselect_manual: root_flag(text, "UnselectManual"),
            bin_times: options_ctf.and_then(|b| param(b, "BinTimes")),
            voltage: options_ctf.and_then(|b| param(b, "Voltage")),
            cs: options_ctf.and_then(|b| param(b, "Cs")),
            defocus: ctf.and_then(|b| param(b, "Defocus")),
        }
    }
}

/// Slice out the contents of `<tag>...</tag>`.
fn block<'t>(text: &'t str, tag: &str) -> Option<&'t str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(&text[start..end])
}

fn param(block: &str, name: &str) -> Option<f64> {
    let pattern = format!(r#"Name="{name}"\s+Value="([^"]*)""#);
    let re = Regex::new(&pattern).ok()?;
    re.captures(block)?.get(1)?.as_str().parse().ok()
}

fn root_flag(text: &str, name: &str) -> bool {
    let pattern = format!(r#"{name}="([^"]*)""#);
    Regex::new(&pattern)
        .ok()
        .and_then(|re| {
            re.captures(text)
                .map(|c| c.get(1).is_some_and(|m| m.as_str().eq_ignore_ascii_case("true")))
        })
        .unwrap_or(false)
}
