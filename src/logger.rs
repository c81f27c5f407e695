//! Structured logging for training progress.
//!
//! Training output goes through [`TrainingLogger`] so verbosity is controlled
//! in one place and callers never sprinkle `println!` through the loop.

use std::time::Instant;

/// Verbosity level for training output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// No output.
    Silent,
    /// Warnings only (swallowed cleanup failures, degenerate rounds).
    Warning,
    /// Per-iteration metrics and lifecycle messages.
    #[default]
    Info,
    /// Additional diagnostics (histogram strategy decisions, widths).
    Debug,
}

/// Logger used by the boosting loop.
///
/// Writes to stderr so model output on stdout stays clean.
pub struct TrainingLogger {
    verbosity: Verbosity,
    started: Option<Instant>,
}

impl TrainingLogger {
    /// Create a logger with the given verbosity.
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            started: None,
        }
    }

    #[inline]
    fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity >= level
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        if self.enabled(Verbosity::Info) {
            eprintln!("[groveboost] {msg}");
        }
    }

    /// Log a warning.
    pub fn warn(&self, msg: &str) {
        if self.enabled(Verbosity::Warning) {
            eprintln!("[groveboost] warning: {msg}");
        }
    }

    /// Log a debug diagnostic.
    pub fn debug(&self, msg: &str) {
        if self.enabled(Verbosity::Debug) {
            eprintln!("[groveboost] debug: {msg}");
        }
    }

    /// Announce training start.
    pub fn start_training(&mut self, max_iter: usize, num_rows: usize, num_cols: usize) {
        self.started = Some(Instant::now());
        self.info(&format!(
            "training started: {max_iter} iterations, {num_rows} rows, {num_cols} columns"
        ));
    }

    /// Log one iteration's metric values as `name=value` pairs.
    pub fn log_iteration(&self, iteration: usize, metrics: &[(String, f64)]) {
        if !self.enabled(Verbosity::Info) || metrics.is_empty() {
            return;
        }
        let line = metrics
            .iter()
            .map(|(name, value)| format!("{name}={value:.6}"))
            .collect::<Vec<_>>()
            .join("  ");
        self.info(&format!("iter {iteration:>4}  {line}"));
    }

    /// Log an early-stopping decision.
    pub fn log_early_stop(&self, iteration: usize, best_iteration: usize, metric: &str) {
        self.info(&format!(
            "early stopping at iter {iteration} ({metric} best at iter {best_iteration})"
        ));
    }

    /// Announce training end with tree count and wall time.
    pub fn finish_training(&mut self, num_trees: usize) {
        if let Some(started) = self.started.take() {
            self.info(&format!(
                "training finished: {} trees in {:.2}s",
                num_trees,
                started.elapsed().as_secs_f64()
            ));
        } else {
            self.info(&format!("training finished: {num_trees} trees"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_ordering() {
        assert!(Verbosity::Silent < Verbosity::Warning);
        assert!(Verbosity::Warning < Verbosity::Info);
        assert!(Verbosity::Info < Verbosity::Debug);
        assert_eq!(Verbosity::default(), Verbosity::Info);
    }

    #[test]
    fn silent_logger_runs() {
        let mut logger = TrainingLogger::new(Verbosity::Silent);
        logger.start_training(10, 100, 5);
        logger.log_iteration(0, &[("rmse".to_string(), 1.0)]);
        logger.warn("nothing to see");
        logger.finish_training(10);
    }
}
