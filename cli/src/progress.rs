//! Terminal progress rendering for `--progress`.
//!
//! One bar per running job plus an overall bar, drawn with indicatif. The
//! engine calls the sink from its single aggregator thread, so the bar map is
//! only ever contended by `on_drained`.

use std::collections::HashMap;
use std::sync::Mutex;

use gridsync_engine::{JobProgress, JobStatus, ProgressSink, ProgressTotals, ProgressUnit};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub struct TerminalProgress {
    bars: MultiProgress,
    total: ProgressBar,
    jobs: Mutex<HashMap<String, ProgressBar>>,
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl TerminalProgress {
    pub fn new() -> Self {
        let bars = MultiProgress::new();
        let total = bars.add(ProgressBar::new(0));
        total.set_style(style(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ));
        TerminalProgress {
            bars,
            total,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn short_name(key: &str) -> &str {
        key.rsplit('/').next().unwrap_or(key)
    }
}

impl ProgressSink for TerminalProgress {
    fn on_job_started(&self, job: &JobProgress) {
        let bar = self.bars.add(ProgressBar::new(job.total));
        match job.unit {
            ProgressUnit::Bytes => bar.set_style(style("  {msg:30!} [{bar:30}] {bytes}/{total_bytes}")),
            ProgressUnit::Items => bar.set_style(style("  {msg:30!} [{bar:30}] {pos}/{len}")),
        }
        bar.set_message(Self::short_name(&job.key).to_string());
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.insert(job.key.clone(), bar);
        }
    }

    fn on_job_progress(&self, job: &JobProgress, totals: &ProgressTotals) {
        if let Ok(jobs) = self.jobs.lock() {
            if let Some(bar) = jobs.get(&job.key) {
                bar.set_length(job.total);
                bar.set_position(job.processed);
            }
        }
        self.total.set_length(totals.bytes_total);
        self.total.set_position(totals.bytes_processed);
    }

    fn on_job_finished(&self, job: &JobProgress, status: &JobStatus, totals: &ProgressTotals) {
        let bar = self.jobs.lock().ok().and_then(|mut jobs| jobs.remove(&job.key));
        if let Some(bar) = bar {
            match status {
                JobStatus::Done => bar.finish_and_clear(),
                JobStatus::Failed(message) => {
                    let _ = self.bars.println(format!("failed {}: {}", job.key, message));
                    bar.finish_and_clear();
                }
                JobStatus::Cancelled => bar.finish_and_clear(),
            }
        }
        self.total.set_position(totals.bytes_processed);
    }

    fn on_drained(&self, totals: &ProgressTotals) {
        self.total.set_position(totals.bytes_processed);
        self.total.finish();
        if let Ok(mut jobs) = self.jobs.lock() {
            for (_, bar) in jobs.drain() {
                bar.finish_and_clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name() {
        assert_eq!(TerminalProgress::short_name("/zone/home/u/file.bin"), "file.bin");
        assert_eq!(TerminalProgress::short_name("plain"), "plain");
    }
}
