use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use tomobatch_core::runner::ProgressReporter;

/// Terminal progress for a batch run: one overall bar per stage, a
/// spinner per busy worker slot, and percent bars for tools that report
/// their own progress. All state is behind mutexes so the reporter can be
/// shared across worker threads.
pub struct BatchProgress {
    multi: MultiProgress,
    overall: Mutex<Option<ProgressBar>>,
    slots: Mutex<HashMap<usize, ProgressBar>>,
    tools: Mutex<HashMap<String, ProgressBar>>,
    bar_style: ProgressStyle,
    spinner_style: ProgressStyle,
    percent_style: ProgressStyle,
}

impl BatchProgress {
    pub fn new() -> Self {
        let bar_style = ProgressStyle::default_bar()
            .template("{msg:24} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let spinner_style = ProgressStyle::default_spinner()
            .template("  {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let percent_style = ProgressStyle::default_bar()
            .template("  {msg:22} [{bar:40}] {pos}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        Self {
            multi: MultiProgress::new(),
            overall: Mutex::new(None),
            slots: Mutex::new(HashMap::new()),
            tools: Mutex::new(HashMap::new()),
            bar_style,
            spinner_style,
            percent_style,
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProgressReporter for BatchProgress {
    fn begin_stage(&self, label: &str, total: usize) {
        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(self.bar_style.clone());
        bar.set_message(label.to_owned());
        *Self::lock(&self.overall) = Some(bar);
    }

    fn item_started(&self, slot: usize, name: &str) {
        let mut slots = Self::lock(&self.slots);
        let spinner = slots.entry(slot).or_insert_with(|| {
            let spinner = self.multi.add(ProgressBar::new_spinner());
            spinner.set_style(self.spinner_style.clone());
            spinner.enable_steady_tick(std::time::Duration::from_millis(120));
            spinner
        });
        spinner.set_message(name.to_owned());
    }

    fn item_finished(&self, slot: usize) {
        if let Some(spinner) = Self::lock(&self.slots).get(&slot) {
            spinner.set_message(String::new());
        }
    }

    fn advance(&self) {
        if let Some(bar) = Self::lock(&self.overall).as_ref() {
            bar.inc(1);
        }
    }

    fn finish_stage(&self) {
        for (_, spinner) in Self::lock(&self.slots).drain() {
            spinner.finish_and_clear();
            self.multi.remove(&spinner);
        }
        for (_, bar) in Self::lock(&self.tools).drain() {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        if let Some(bar) = Self::lock(&self.overall).take() {
            bar.finish();
        }
    }

    fn tool_progress(&self, name: &str, fraction: f32) {
        let mut tools = Self::lock(&self.tools);
        let bar = tools.entry(name.to_owned()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(self.percent_style.clone());
            bar.set_message(name.to_owned());
            bar
        });
        bar.set_position((fraction.clamp(0.0, 1.0) * 100.0) as u64);
    }
}
