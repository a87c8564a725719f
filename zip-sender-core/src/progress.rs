//! Console progress bars shared by the pipeline and the delivery loop.
//!
//! A [`Progress`] wraps an [`indicatif::MultiProgress`]. Bars created from a hidden instance
//! still count, so tests can assert on positions without drawing to the terminal.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BYTES_TEMPLATE: &str =
    "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} [{elapsed_precise}<{eta}, {bytes_per_sec}]";
const ITEMS_TEMPLATE: &str = "{msg} [{bar:30.green/white}] {pos}/{len}";

#[derive(Clone)]
pub struct Progress {
    multi: MultiProgress,
}

impl Progress {
    /// Progress drawn to stderr.
    pub fn stderr() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
        }
    }

    /// Progress that tracks positions but never draws.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    /// A byte-counting bar with throughput, e.g. for archiving or uploading one file.
    pub fn bytes(&self, label: impl Into<String>, total: u64) -> ProgressBar {
        self.add(label, total, BYTES_TEMPLATE)
    }

    /// An item-counting bar, e.g. parts uploaded or files staged.
    pub fn items(&self, label: impl Into<String>, total: u64) -> ProgressBar {
        self.add(label, total, ITEMS_TEMPLATE)
    }

    fn add(&self, label: impl Into<String>, total: u64, template: &str) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(total));
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(label.into());
        bar
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::stderr()
    }
}
