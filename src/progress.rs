//! 控制台进度条 (stderr)
//!
//! `[███████░░░░░]` 固定 30 格，标签左对齐补齐到 45 列。
//! stderr 不是终端或 `--quiet` 时使用隐藏进度条，输出完全静默。

use std::io::IsTerminal;
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::{ProgressListener, StageOutcome};

pub const BAR_WIDTH: usize = 30;
pub const LABEL_WIDTH: usize = 45;

const TEMPLATE_STAGE: &str = "{msg:45} [{bar:30}] {percent:>3}% ({pos}/{len})";

/// Whether a bar should be drawn at all.
pub fn should_show_progress(quiet: bool) -> bool {
    !quiet && std::io::stderr().is_terminal()
}

pub struct ConsoleProgress {
    visible: bool,
    current: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            visible: should_show_progress(quiet),
            current: Mutex::new(None),
        }
    }

    fn create_bar(&self, label: &str, total: usize) -> ProgressBar {
        if !self.visible {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(total as u64);
        match ProgressStyle::default_bar().template(TEMPLATE_STAGE) {
            Ok(style) => bar.set_style(style.progress_chars("█░")),
            Err(e) => tracing::debug!(error = %e, "invalid progress template, using default style"),
        }
        bar.set_message(label.to_string());
        bar
    }
}

impl ProgressListener for ConsoleProgress {
    fn stage_started(&self, label: &str, total: usize) {
        let bar = self.create_bar(label, total);
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn progress(&self, _label: &str, done: usize, _total: usize) {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = current.as_ref() {
            bar.set_position(done as u64);
        }
    }

    fn stage_finished(&self, _label: &str, outcome: &StageOutcome) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = current.take() {
            bar.set_position(outcome.total as u64);
            bar.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_hides_bar() {
        assert!(!should_show_progress(true));
        let progress = ConsoleProgress::new(true);
        progress.stage_started("Parsing files", 3);
        progress.progress("Parsing files", 2, 3);
        progress.stage_finished("Parsing files", &StageOutcome { total: 3, failed: 0 });
        assert!(progress.current.lock().unwrap().is_none());
    }

    #[test]
    fn test_template_compiles() {
        assert!(ProgressStyle::default_bar().template(TEMPLATE_STAGE).is_ok());
        assert!(TEMPLATE_STAGE.contains(&format!("{{bar:{BAR_WIDTH}}}")));
        assert!(TEMPLATE_STAGE.contains(&format!("{{msg:{LABEL_WIDTH}}}")));
    }
}
