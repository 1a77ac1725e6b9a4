use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;

use crate::error::Result;

/// Name of the append-only run log under the output directory.
pub const RUN_LOG_NAME: &str = "tomobatch.log";

/// Run-wide state shared by every stage: output location, run-mode flags
/// and the invocation log sink. Passed explicitly instead of living in
/// globals so every component sees the same flags.
pub struct RunContext {
    pub output_dir: PathBuf,
    pub overwrite: bool,
    pub dry_run: bool,
    run_log: Option<Mutex<File>>,
}

impl RunContext {
    /// Dry runs get no log file; nothing destructive happens, nothing is
    /// recorded.
    pub fn new(output_dir: PathBuf, overwrite: bool, dry_run: bool) -> Result<Self> {
        let run_log = if dry_run {
            None
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(output_dir.join(RUN_LOG_NAME))?;
            Some(Mutex::new(file))
        };
        Ok(Self {
            output_dir,
            overwrite,
            dry_run,
            run_log,
        })
    }

    /// Append one timestamped block to the run log. A failing log write
    /// must never take the run down with it.
    pub fn log_block(&self, text: &str) {
        let Some(log) = &self.run_log else { return };
        let mut file = log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = Local::now().format("%d/%m/%Y %H:%M:%S");
        let _ = writeln!(file, "{}\n{stamp}\n{text}", "=".repeat(80));
    }
}
