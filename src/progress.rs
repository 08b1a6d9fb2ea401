//! Progress reporting — an interface over table-processing progress, the
//! same "named external concern behind a trait" shape the crate uses for
//! [`crate::object_store::ObjectStoreHandle`] and
//! [`crate::delta_table::DeltaTableHandle`]. Rendering itself is not part of
//! the processor's contract; `SHOW_TABLE_PROGRESS` only selects which
//! implementation the binary wires in.

use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Observes table-level progress. Implementors must tolerate being called
/// from multiple concurrent table workers.
pub trait ProgressReporter: Send + Sync {
    /// A table has started processing.
    fn start_table(&self, table: &str);

    /// A table finished; `watermark` is the final committed watermark
    /// (`None` if the table was skipped before any commit).
    fn finish_table(&self, table: &str, watermark: Option<i64>, had_errors: bool);
}

/// Renders nothing. Used when `SHOW_TABLE_PROGRESS=0` or in tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn start_table(&self, _table: &str) {}
    fn finish_table(&self, _table: &str, _watermark: Option<i64>, _had_errors: bool) {}
}

/// One spinner per in-flight table, multiplexed onto a shared terminal via
/// `indicatif::MultiProgress` so parallel workers don't clobber each
/// other's lines.
pub struct IndicatifProgress {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        IndicatifProgress {
            multi: MultiProgress::new(),
            style: ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            bars: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for IndicatifProgress {
    fn start_table(&self, table: &str) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(self.style.clone());
        bar.set_message(format!("{table}: processing"));
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        self.bars.lock().unwrap().insert(table.to_string(), bar);
    }

    fn finish_table(&self, table: &str, watermark: Option<i64>, had_errors: bool) {
        let msg = match (had_errors, watermark) {
            (true, _) => format!("{table}: failed"),
            (false, Some(w)) => format!("{table}: done (watermark={w})"),
            (false, None) => format!("{table}: skipped"),
        };
        match self.bars.lock().unwrap().remove(table) {
            Some(bar) => bar.finish_with_message(msg),
            None => self.multi.println(msg).unwrap_or(()),
        }
    }
}
