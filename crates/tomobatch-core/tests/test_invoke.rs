#![cfg(unix)]

mod common;

use std::fs;
use std::path::PathBuf;

use common::*;
use tomobatch_core::aretomo::{
    run_aretomo, AlignRequest, AretomoConfig, ReconstructRequest, StageOutcome, ToolRequest,
};
use tomobatch_core::context::RunContext;
use tomobatch_core::series::{ReconParams, TiltSeries};

struct Setup {
    _dir: tempfile::TempDir,
    root: PathBuf,
    out: PathBuf,
    series: TiltSeries,
}

fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let stack_dir = root.join("stack");
    let out = root.join("out");
    fs::create_dir_all(&stack_dir).unwrap();
    fs::create_dir_all(&out).unwrap();

    let stack = stack_dir.join("TS_01.mrc.st");
    fs::write(&stack, b"").unwrap();
    fs::write(stack.with_extension("rawtlt"), b"").unwrap();

    let mdoc = root.join("TS_01.mrc.mdoc");
    fs::write(&mdoc, b"").unwrap();

    let series = bare_series("TS_01", "TS_01.mrc", &mdoc, &stack, &out);
    Setup {
        _dir: dir,
        root,
        out,
        series,
    }
}

fn align_request() -> ToolRequest {
    ToolRequest::Align(AlignRequest {
        tilt_axis: Some(85.0),
        patches: None,
        thickness_align: 400,
        tilt_corr: true,
    })
}

#[test]
fn align_runs_relative_to_the_output_dir() {
    let fixture = setup();
    let tool = fixture.root.join("aretomo_stub");
    // the real tool drops the transforms in an Imod subdirectory
    write_script(
        &tool,
        "echo \"$@\"\nmkdir -p TS_01_Imod\n: > TS_01_Imod/TS_01.xf",
    );

    let config = AretomoConfig {
        cmd: tool.display().to_string(),
        binning: 4,
    };
    let ctx = RunContext::new(fixture.out.clone(), false, false).unwrap();
    let outcome = run_aretomo(&fixture.series, &align_request(), &config, None, &ctx).unwrap();
    assert!(matches!(outcome, StageOutcome::Success));

    // the transforms were renamed to the full mdoc stem
    assert!(fixture.out.join("TS_01.mrc.xf").exists());
    assert!(!fixture.out.join("TS_01_Imod/TS_01.xf").exists());

    let log = fs::read_to_string(fixture.out.join("TS_01_aligned.toollog")).unwrap();
    assert!(log.contains("-InMrc ../stack/TS_01.mrc.st"));
    assert!(log.contains("-OutMrc TS_01_aligned.st"));
    assert!(log.contains("-AngFile ../stack/TS_01.mrc.rawtlt"));
    assert!(log.contains("-TiltAxis 85 1"));
    assert!(log.contains("-OutImod 2"));
    assert!(log.contains("-VolZ 0"));
}

#[test]
fn existing_output_short_circuits_before_launch() {
    let fixture = setup();
    fs::write(fixture.out.join("TS_01_aligned.st"), b"").unwrap();

    // a command that cannot be spawned proves nothing ran
    let config = AretomoConfig {
        cmd: "/nonexistent/aretomo".to_owned(),
        binning: 4,
    };
    let ctx = RunContext::new(fixture.out.clone(), false, false).unwrap();
    let outcome = run_aretomo(&fixture.series, &align_request(), &config, None, &ctx).unwrap();
    assert!(matches!(outcome, StageOutcome::AlreadyExists));
}

#[test]
fn overwrite_launches_despite_existing_output() {
    let fixture = setup();
    fs::write(fixture.out.join("TS_01_aligned.st"), b"").unwrap();
    let tool = fixture.root.join("aretomo_stub");
    write_script(&tool, "mkdir -p TS_01_Imod\n: > TS_01_Imod/TS_01.xf");

    let config = AretomoConfig {
        cmd: tool.display().to_string(),
        binning: 4,
    };
    let ctx = RunContext::new(fixture.out.clone(), true, false).unwrap();
    let outcome = run_aretomo(&fixture.series, &align_request(), &config, None, &ctx).unwrap();
    assert!(matches!(outcome, StageOutcome::Success));
}

#[test]
fn failure_captures_output_and_exit_code() {
    let fixture = setup();
    let tool = fixture.root.join("aretomo_stub");
    write_script(&tool, "echo boom\nexit 3");

    let config = AretomoConfig {
        cmd: tool.display().to_string(),
        binning: 4,
    };
    let ctx = RunContext::new(fixture.out.clone(), false, false).unwrap();
    let outcome = run_aretomo(&fixture.series, &align_request(), &config, None, &ctx).unwrap();
    let StageOutcome::ToolFailure(failure) = outcome else {
        panic!("expected a tool failure");
    };
    assert_eq!(failure.exit_code, Some(3));
    assert!(failure.output.contains("boom"));

    // the capture is persisted next to where the output would be
    let log = fs::read_to_string(fixture.out.join("TS_01_aligned.toollog")).unwrap();
    assert!(log.contains("boom"));
}

#[test]
fn spawn_error_is_a_tool_failure() {
    let fixture = setup();
    let config = AretomoConfig {
        cmd: "/nonexistent/aretomo".to_owned(),
        binning: 4,
    };
    let ctx = RunContext::new(fixture.out.clone(), false, false).unwrap();
    let outcome = run_aretomo(&fixture.series, &align_request(), &config, None, &ctx).unwrap();
    let StageOutcome::ToolFailure(failure) = outcome else {
        panic!("expected a tool failure");
    };
    assert_eq!(failure.exit_code, None);
    assert!(fixture.out.join("TS_01_aligned.toollog").exists());
}

#[test]
fn reconstruct_forwards_the_acquisition_params() {
    let mut fixture = setup();
    fixture.series.params = ReconParams {
        dose: 3.0,
        px_size: 2.2,
        cs: 2.7,
        kv: 300,
        defocus: 35_000.0,
    };
    let tool = fixture.root.join("aretomo_stub");
    write_script(&tool, "echo \"$@\"");

    let config = AretomoConfig {
        cmd: tool.display().to_string(),
        binning: 4,
    };
    let request = ToolRequest::Reconstruct(ReconstructRequest {
        thickness_recon: 1200,
        half: None,
    });
    let ctx = RunContext::new(fixture.out.clone(), false, false).unwrap();
    let outcome = run_aretomo(&fixture.series, &request, &config, None, &ctx).unwrap();
    assert!(matches!(outcome, StageOutcome::Success));

    let log = fs::read_to_string(fixture.out.join("TS_01.toollog")).unwrap();
    assert!(log.contains("-OutMrc TS_01.mrc"));
    assert!(log.contains("-AlnFile TS_01.aln"));
    assert!(log.contains("-VolZ 1200"));
    assert!(log.contains("-PixSize 2.2"));
    assert!(log.contains("-Kv 300"));
    assert!(log.contains("-Defoc 35000"));
    assert!(log.contains("-WBP 1"));
    assert!(log.contains("-ImgDose 3"));
}

#[test]
fn dry_run_never_invokes_the_tool() {
    let fixture = setup();
    let config = AretomoConfig {
        cmd: "/nonexistent/aretomo".to_owned(),
        binning: 4,
    };
    let ctx = RunContext::new(fixture.out.clone(), false, true).unwrap();
    let outcome = run_aretomo(&fixture.series, &align_request(), &config, None, &ctx).unwrap();
    assert!(matches!(outcome, StageOutcome::Success));
    assert!(!fixture.out.join("TS_01_aligned.toollog").exists());
}
