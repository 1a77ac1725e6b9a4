mod common;

use std::fs;

use common::*;
use tomobatch_core::context::RunContext;
use tomobatch_core::runner::NoOpReporter;
use tomobatch_core::topaz::{denoise_batch, validate_model, TopazConfig, PRETRAINED_MODELS};

#[test]
fn pretrained_names_are_accepted() {
    for model in PRETRAINED_MODELS {
        assert!(validate_model(model, false).is_ok());
    }
}

#[test]
fn unknown_model_without_a_file_is_rejected() {
    assert!(validate_model("no-such-model", false).is_err());
}

#[test]
fn model_paths_are_accepted_when_present() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("custom.sav");
    fs::write(&model, b"").unwrap();
    assert!(validate_model(&model.display().to_string(), false).is_ok());
}

#[test]
fn training_rejects_pretrained_names_and_paths() {
    assert!(validate_model("unet-3d-10a", true).is_err());
    assert!(validate_model("models/custom", true).is_err());
    assert!(validate_model("my-new-model", true).is_ok());
}

#[cfg(unix)]
mod invocation {
    use super::*;
    use std::path::PathBuf;
    use tomobatch_core::series::TiltSeries;

    fn fixture() -> (tempfile::TempDir, PathBuf, TiltSeries) {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(out.join("denoised")).unwrap();
        let series = bare_series(
            "TS_01",
            "TS_01.mrc",
            &dir.path().join("TS_01.mrc.mdoc"),
            &dir.path().join("TS_01.mrc.st"),
            &out,
        );
        (dir, out, series)
    }

    fn config(cmd: String, train: bool) -> TopazConfig {
        TopazConfig {
            cmd,
            model: "unet-3d-10a".to_owned(),
            train,
            tile_size: 64,
            patch_size: 64,
            device: -2,
        }
    }

    #[test]
    fn denoises_every_reconstruction() {
        let (dir, out, series) = fixture();
        let tool = dir.path().join("topaz_stub");
        write_script(&tool, "echo '100.0%'");

        let ctx = RunContext::new(out.clone(), false, false).unwrap();
        let report = denoise_batch(
            &[series],
            &config(tool.display().to_string(), false),
            &ctx,
            &NoOpReporter,
        )
        .unwrap();
        assert_eq!(report.completed, 1);
        assert!(report.failures.is_empty());
        assert!(out.join("denoised/TS_01.toollog").exists());
    }

    #[test]
    fn existing_denoised_volume_is_skipped() {
        let (dir, out, series) = fixture();
        fs::write(out.join("denoised/TS_01.mrc"), b"").unwrap();
        let tool = dir.path().join("topaz_stub");
        write_script(&tool, "exit 1");

        let ctx = RunContext::new(out.clone(), false, false).unwrap();
        let report = denoise_batch(
            &[series],
            &config(tool.display().to_string(), false),
            &ctx,
            &NoOpReporter,
        )
        .unwrap();
        assert_eq!(report.skipped_existing, 1);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn per_volume_failure_is_isolated() {
        let (dir, out, series) = fixture();
        let tool = dir.path().join("topaz_stub");
        write_script(&tool, "echo broken\nexit 2");

        let ctx = RunContext::new(out.clone(), false, false).unwrap();
        let report = denoise_batch(
            &[series],
            &config(tool.display().to_string(), false),
            &ctx,
            &NoOpReporter,
        )
        .unwrap();
        assert_eq!(report.completed, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].exit_code, Some(2));
        assert!(report.failures[0].output.contains("broken"));
    }

    #[test]
    fn training_failure_aborts_the_stage() {
        let (dir, out, series) = fixture();
        let tool = dir.path().join("topaz_stub");
        write_script(&tool, "exit 1");

        let mut config = config(tool.display().to_string(), true);
        config.model = "fresh-model".to_owned();
        let ctx = RunContext::new(out.clone(), false, false).unwrap();
        assert!(denoise_batch(&[series], &config, &ctx, &NoOpReporter).is_err());
    }
}
