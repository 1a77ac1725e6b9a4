use std::fmt::Write as _;
use std::path::Path;

use console::Style;

use tomobatch_core::catalog::Catalog;
use tomobatch_core::paths::relative_to;
use tomobatch_core::pipeline::PipelineOptions;
use tomobatch_core::series::TiltSeries;

use crate::Cli;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    enabled: Style,
    disabled: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            enabled: Style::new().green(),
            disabled: Style::new().red(),
        }
    }
}

/// Print the styled pre-run summary and return the same content as plain
/// text for the run log: directories, the three classified series lists,
/// the resolved step plan and every option block, followed by a
/// double-check panel for the first ready series.
pub fn print_run_summary(
    catalog: &Catalog,
    options: &PipelineOptions,
    warp_dir: &Path,
    cli: &Cli,
) -> String {
    let s = Styles::new();
    let mut plain = String::new();

    println!();
    println!("  {}", s.title.apply_to("Tomobatch Run"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(16)));
    println!();
    let _ = writeln!(plain, "Tomobatch Run");

    kv(&s, &mut plain, "Warp directory", &warp_dir.display().to_string());
    kv(&s, &mut plain, "Mdoc directory", &options.mdoc_dir.display().to_string());
    println!();

    section(&s, &mut plain, "Tilt series - NOT READY");
    for name in &catalog.unprocessed {
        item(&s, &mut plain, name);
    }
    section(&s, &mut plain, "Tilt series - READY");
    for ts in &catalog.ready {
        item(&s, &mut plain, &ts.name);
    }
    section(&s, &mut plain, "Tilt series - EXCLUDED");
    for name in &catalog.excluded {
        item(&s, &mut plain, name);
    }
    println!();

    section(&s, &mut plain, "Processing steps");
    for (step, enabled) in options.plan.iter() {
        let style = if enabled { &s.enabled } else { &s.disabled };
        let state = if enabled { "on" } else { "off" };
        println!("    - {}", style.apply_to(step.name()));
        let _ = writeln!(plain, "    - {}: {state}", step.name());
    }
    println!();

    section(&s, &mut plain, "Run options");
    kv(&s, &mut plain, "dry run", &cli.dry_run.to_string());
    kv(&s, &mut plain, "overwrite", &cli.overwrite.to_string());
    println!();

    section(&s, &mut plain, "AreTomo options");
    kv(&s, &mut plain, "command", &options.aretomo.cmd);
    kv(&s, &mut plain, "binning", &options.aretomo.binning.to_string());
    kv(&s, &mut plain, "sample thickness", &options.align.thickness_align.to_string());
    kv(&s, &mut plain, "z thickness", &options.thickness_recon.to_string());
    kv(&s, &mut plain, "tilt axis", &display_opt(options.align.tilt_axis));
    kv(&s, &mut plain, "patches", &display_opt(options.align.patches));
    kv(&s, &mut plain, "tilt correction", &options.align.tilt_corr.to_string());
    kv(&s, &mut plain, "gpus", &format!("{:?}", options.gpus));
    println!();

    section(&s, &mut plain, "Topaz options");
    kv(&s, &mut plain, "command", &options.topaz.cmd);
    kv(&s, &mut plain, "train", &options.topaz.train.to_string());
    kv(&s, &mut plain, "model", &options.topaz.model);
    kv(&s, &mut plain, "tile size", &options.topaz.tile_size.to_string());
    kv(&s, &mut plain, "patch size", &options.topaz.patch_size.to_string());
    println!();

    if let Some(first) = catalog.ready.first() {
        print_first_series(&s, &mut plain, first, warp_dir);
    }

    plain
}

/// The original habit that has saved many runs: show every derived value
/// for the first series so a wrong directory or a bad mdoc is caught
/// before hours of GPU time are spent.
fn print_first_series(s: &Styles, plain: &mut String, ts: &TiltSeries, warp_dir: &Path) {
    let rel = |path: &Path| relative_to(path, warp_dir).display().to_string();

    println!(
        "  {}",
        s.header
            .apply_to(format!("Double check that these values make sense for {}:", ts.name))
    );
    let _ = writeln!(plain, "Double check that these values make sense for {}:", ts.name);

    kv(s, plain, "mdoc", &rel(&ts.mdoc));
    kv(s, plain, "stack", &rel(&ts.stack));
    kv(s, plain, "rawtlt", &rel(&ts.rawtlt));
    kv(
        s,
        plain,
        "roi",
        &ts.roi.as_deref().map_or_else(|| "none".to_owned(), &rel),
    );
    kv(s, plain, "reconstruction", &rel(&ts.paths.recon));
    kv(s, plain, "skipped tilts", &format!("{:?}", ts.skipped_frames));
    kv(s, plain, "dose", &ts.params.dose.to_string());
    kv(s, plain, "pixel size (A)", &ts.params.px_size.to_string());
    kv(s, plain, "voltage (kV)", &ts.params.kv.to_string());
    kv(s, plain, "Cs (mm)", &ts.params.cs.to_string());
    kv(s, plain, "defocus (A)", &ts.params.defocus.to_string());
    println!();
}

fn section(s: &Styles, plain: &mut String, title: &str) {
    println!("  {}", s.header.apply_to(title));
    let _ = writeln!(plain, "{title}:");
}

fn item(s: &Styles, plain: &mut String, name: &str) {
    println!("    - {}", s.value.apply_to(name));
    let _ = writeln!(plain, "    - {name}");
}

fn kv(s: &Styles, plain: &mut String, label: &str, value: &str) {
    println!("  {:<18}{}", s.label.apply_to(label), s.value.apply_to(value));
    let _ = writeln!(plain, "{label}: {value}");
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "none".to_owned(), |v| v.to_string())
}
