#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use tomobatch_core::catalog::CatalogConfig;
use tomobatch_core::mrc::MRC_HEADER_SIZE;
use tomobatch_core::series::{ReconParams, SeriesPaths, TiltSeries};

/// One mdoc section of a synthetic acquisition.
pub struct FrameSpec {
    pub tilt: f64,
    pub sub_frame: String,
}

/// Create an empty warp-style project layout and return (tempdir, warp root).
pub fn warp_project() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let warp = dir.path().join("warp");
    for sub in ["imod", "average/even", "average/odd"] {
        fs::create_dir_all(warp.join(sub)).unwrap();
    }
    (dir, warp)
}

/// Write a synthetic warp per-frame XML descriptor.
pub fn write_frame_xml(
    path: &Path,
    unselect: bool,
    bin_times: f64,
    voltage: f64,
    cs: f64,
    defocus: f64,
) {
    let flag = if unselect { "True" } else { "False" };
    let text = format!(
        r#"<Movie UnselectManual="{flag}">
  <OptionsCTF>
    <Param Name="BinTimes" Value="{bin_times}" />
    <Param Name="Voltage" Value="{voltage}" />
    <Param Name="Cs" Value="{cs}" />
  </OptionsCTF>
  <CTF>
    <Param Name="Defocus" Value="{defocus}" />
  </CTF>
</Movie>
"#
    );
    fs::write(path, text).unwrap();
}

/// Write a SerialEM-style mdoc with one `[ZValue]` section per frame.
pub fn write_mdoc(path: &Path, image_file: &str, px: f64, dose: f64, frames: &[FrameSpec]) {
    let mut text = format!("PixelSpacing = {px}\nImageFile = {image_file}\n\n");
    for (i, frame) in frames.iter().enumerate() {
        text.push_str(&format!(
            "[ZValue = {i}]\nTiltAngle = {}\nExposureDose = {dose}\n\
             PixelSpacing = {px}\nSubFramePath = {}\n\n",
            frame.tilt, frame.sub_frame
        ));
    }
    fs::write(path, text).unwrap();
}

/// Populate a complete, ready-to-process series: the mdoc, the imod stack
/// and one frame + descriptor pair per section, with warp-typical optics
/// (bin 1, 300 kV, Cs 2.7, defocus 3.5 um, px 1.1 A, dose 3 e/A^2).
pub fn add_series(warp: &Path, mdoc_file: &str, image_stem: &str, n_frames: usize) {
    let mdoc_name = Path::new(mdoc_file)
        .file_stem()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    let stack_dir = warp.join("imod").join(&mdoc_name);
    fs::create_dir_all(&stack_dir).unwrap();
    fs::write(stack_dir.join(format!("{mdoc_name}.st")), b"").unwrap();
    fs::write(stack_dir.join(format!("{mdoc_name}.rawtlt")), b"").unwrap();

    let mut frames = Vec::new();
    for i in 0..n_frames {
        let frame = format!("{image_stem}_{i:03}.tif");
        fs::write(warp.join(&frame), b"").unwrap();
        write_frame_xml(
            &warp.join(&frame).with_extension("xml"),
            false,
            1.0,
            300.0,
            2.7,
            3.5,
        );
        frames.push(FrameSpec {
            tilt: -60.0 + 3.0 * i as f64,
            sub_frame: format!("X:\\frames\\{frame}"),
        });
    }
    write_mdoc(
        &warp.join(mdoc_file),
        &format!("X:\\data\\{image_stem}.mrc"),
        1.1,
        3.0,
        &frames,
    );
}

/// Add the even/odd per-frame averages training mode requires.
pub fn add_halves(warp: &Path, image_stem: &str, n_frames: usize) {
    for half in ["even", "odd"] {
        for i in 0..n_frames {
            let image = format!("{image_stem}_{i:03}.mrc");
            fs::write(warp.join("average").join(half).join(image), b"").unwrap();
        }
    }
}

pub fn catalog_config(warp: &Path, output: &Path) -> CatalogConfig {
    CatalogConfig {
        warp_dir: warp.to_path_buf(),
        mdoc_dir: warp.to_path_buf(),
        output_dir: output.to_path_buf(),
        roi_dir: None,
        just: Vec::new(),
        exclude: Vec::new(),
        train: false,
        dose_override: None,
    }
}

/// Minimal MRC image: zeroed header with the fields readers care about,
/// followed by the raw voxel data.
pub fn write_mrc(path: &Path, nx: i32, ny: i32, nz: i32, mode: i32, data: &[u8]) {
    let mut buf = vec![0u8; MRC_HEADER_SIZE];
    LittleEndian::write_i32(&mut buf[0..4], nx);
    LittleEndian::write_i32(&mut buf[4..8], ny);
    LittleEndian::write_i32(&mut buf[8..12], nz);
    LittleEndian::write_i32(&mut buf[12..16], mode);
    LittleEndian::write_i32(&mut buf[36..40], nz);
    buf.extend_from_slice(data);
    fs::write(path, buf).unwrap();
}

/// A series built by hand for invocation tests, bypassing catalog
/// construction.
pub fn bare_series(
    name: &str,
    mdoc_name: &str,
    mdoc: &Path,
    stack: &Path,
    output_dir: &Path,
) -> TiltSeries {
    TiltSeries {
        paths: SeriesPaths::derive(name, output_dir),
        name: name.to_owned(),
        mdoc_name: mdoc_name.to_owned(),
        mdoc: mdoc.to_path_buf(),
        stack: stack.to_path_buf(),
        rawtlt: stack.with_extension("rawtlt"),
        roi: None,
        skipped_frames: Vec::new(),
        even_frames: Vec::new(),
        odd_frames: Vec::new(),
        params: ReconParams::default(),
    }
}

/// Executable stub standing in for an external tool.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}
