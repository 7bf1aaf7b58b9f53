// file: src/pipeline/progress.rs
// description: progress display for single tasks and batch runs
// reference: uses indicatif for progress bars and tracks generation metrics

use crate::models::{TaskRecord, TaskStatus};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    pub products_completed: usize,
    pub products_failed: usize,
    pub images_generated: usize,
    pub duration_secs: u64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images_per_product(&self) -> f64 {
        if self.products_completed == 0 {
            return 0.0;
        }
        self.images_generated as f64 / self.products_completed as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.products_completed + self.products_failed;
        if total == 0 {
            return 0.0;
        }
        (self.products_completed as f64 / total as f64) * 100.0
    }
}

/// Spinner that mirrors a polled task record.
pub struct TaskProgress {
    bar: ProgressBar,
    colored: bool,
}

impl TaskProgress {
    pub fn new(task_id: &str, colored: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        let template = if colored {
            "{spinner:.green} [{elapsed_precise}] {prefix:.cyan} {msg}"
        } else {
            "{spinner} [{elapsed_precise}] {prefix} {msg}"
        };
        if let Ok(style) = ProgressStyle::default_spinner().template(template) {
            bar.set_style(style);
        }
        bar.set_prefix(task_id.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar, colored }
    }

    pub fn observe(&self, record: &TaskRecord) {
        self.bar.set_message(progress_message(record));
    }

    pub fn finish(&self, record: &TaskRecord) {
        let summary = progress_message(record);
        let message = match (record.status, self.colored) {
            (TaskStatus::Completed, true) => summary.green().to_string(),
            (TaskStatus::Failed, true) => summary.red().to_string(),
            _ => summary,
        };
        self.bar.finish_with_message(message);
    }
}

pub fn progress_message(record: &TaskRecord) -> String {
    let mut message = format!(
        "{} | phrases: {} | images: {}",
        record.status.as_str(),
        record.phrases.len(),
        record.images.len()
    );
    if let Some(error) = &record.error {
        message.push_str(&format!(" | error: {}", error));
    }
    message
}

pub struct BatchProgress {
    main_bar: ProgressBar,
    detail_bar: ProgressBar,
    completed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    images: Arc<AtomicUsize>,
    start_time: Instant,
}

impl BatchProgress {
    pub fn new(total_products: usize, colored: bool) -> Self {
        let multi_progress = MultiProgress::new();

        let main_bar = create_progress_bar(&multi_progress, total_products as u64, colored);
        let detail_bar = create_detail_bar(&multi_progress);

        Self {
            main_bar,
            detail_bar,
            completed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
            images: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, record: &TaskRecord) {
        match record.status {
            TaskStatus::Completed => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                self.images.fetch_add(record.images.len(), Ordering::SeqCst);
            }
            _ => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.main_bar.inc(1);
        self.update_detail_bar();
    }

    /// Counts a product that never got a task, e.g. a missing main image.
    pub fn skip(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.main_bar.inc(1);
        self.update_detail_bar();
    }

    pub fn set_message(&self, message: String) {
        self.detail_bar.set_message(message);
    }

    pub fn finish(&self) {
        self.main_bar.finish_with_message("Batch complete");
        self.detail_bar.finish_and_clear();
    }

    pub fn get_stats(&self) -> BatchStats {
        BatchStats {
            products_completed: self.completed.load(Ordering::SeqCst),
            products_failed: self.failed.load(Ordering::SeqCst),
            images_generated: self.images.load(Ordering::SeqCst),
            duration_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn update_detail_bar(&self) {
        let images = self.images.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        self.detail_bar
            .set_message(format!("Images: {} | Failed: {}", images, failed));
    }
}

fn create_progress_bar(multi_progress: &MultiProgress, total: u64, colored: bool) -> ProgressBar {
    let bar = multi_progress.add(ProgressBar::new(total));
    let style = if colored {
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .map(|s| s.progress_chars("█▓▒░"))
    } else {
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({eta}) {msg}")
            .map(|s| s.progress_chars("=>-"))
    };
    if let Ok(style) = style {
        bar.set_style(style);
    }
    bar
}

fn create_detail_bar(multi_progress: &MultiProgress) -> ProgressBar {
    let bar = multi_progress.add(ProgressBar::new(0));
    if let Ok(style) = ProgressStyle::default_bar().template("{msg}") {
        bar.set_style(style);
    }
    bar
}
