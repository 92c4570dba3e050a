//! Progress Reporter (C10): a per-node six-step tracker and a
//! phase-scoped aggregator, built on the same `indicatif`/`console`
//! combination as the rest of the user-facing output.

use console::{style, Emoji};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");

/// The six ordered steps every node passes through during an upgrade
/// (§4.9's per-node routine).
pub const NODE_STEPS: &[&str] = &["stop", "config backup", "binary swap", "start", "health", "verify"];

pub struct NodeProgress {
    bar: ProgressBar,
    node_id: String,
    started_at: Instant,
    current_step: usize,
}

impl NodeProgress {
    fn new(multi: &MultiProgress, node_id: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        let style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap();
        bar.set_style(style);
        bar.set_prefix(node_id.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            node_id: node_id.to_string(),
            started_at: Instant::now(),
            current_step: 0,
        }
    }

    pub fn start_step(&mut self, step: &str) {
        self.current_step += 1;
        self.bar.set_message(format!(
            "step {}/{}: {}",
            self.current_step,
            NODE_STEPS.len(),
            style(step).cyan()
        ));
    }

    pub fn complete_step(&mut self, step: &str) {
        self.bar.set_message(format!(
            "step {}/{}: {} {}",
            self.current_step,
            NODE_STEPS.len(),
            step,
            style("done").dim()
        ));
    }

    pub fn fail_step(&mut self, step: &str, reason: &str) {
        let elapsed = self.started_at.elapsed().as_secs();
        self.bar.finish_with_message(format!(
            "{}{} failed at {} after {}s: {}",
            CROSS, self.node_id, step, elapsed, reason
        ));
    }

    pub fn complete(&mut self) {
        let elapsed = self.started_at.elapsed().as_secs();
        self.bar
            .finish_with_message(format!("{}{} upgraded in {}s", CHECK, self.node_id, elapsed));
    }
}

/// Aggregates per-node trackers across one phase, and counts completions
/// and failures for the phase-level summary line.
pub struct MultiNodeProgress {
    multi: MultiProgress,
    completed: AtomicU32,
    failed: AtomicU32,
}

impl Default for MultiNodeProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiNodeProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
        }
    }

    pub fn track_node(&self, node_id: &str) -> NodeProgress {
        NodeProgress::new(&self.multi, node_id)
    }

    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn counts(&self) -> (u32, u32) {
        (
            self.completed.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
        )
    }

    pub fn println(&self, message: &str) {
        let _ = self.multi.println(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_steps_has_exactly_six_entries_in_spec_order() {
        assert_eq!(NODE_STEPS.len(), 6);
        assert_eq!(NODE_STEPS[0], "stop");
        assert_eq!(NODE_STEPS[5], "verify");
    }

    #[test]
    fn multi_node_progress_tracks_completions_and_failures_independently() {
        let progress = MultiNodeProgress::new();
        progress.record_completion();
        progress.record_completion();
        progress.record_failure();
        assert_eq!(progress.counts(), (2, 1));
    }
}
