use crate::search::{SearchRecord, Termination};

/// Injected progress sink for long-running searches.
///
/// Design intent:
/// - Observers cannot steer a search; they only see counters and a short note.
/// - Calls may arrive from worker threads when candidates are fitted in parallel;
///   `current` then counts completions, not pool positions.
pub trait Progress: Sync {
    fn on_progress(&self, current: usize, total: usize, extra: &str);
}

impl<F> Progress for F
where
    F: Fn(usize, usize, &str) + Sync,
{
    fn on_progress(&self, current: usize, total: usize, extra: &str) {
        self(current, total, extra)
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn on_progress(&self, _current: usize, _total: usize, _extra: &str) {}
}

/// A read-only digest of a finished max-min run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    pub source: String,
    pub final_target: String,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    pub first_outer_loss: f64,
    pub final_outer_loss: f64,
    pub termination: Termination,
}

pub struct RecordAdapter<'a> {
    record: &'a SearchRecord,
}

impl<'a> RecordAdapter<'a> {
    pub fn new(record: &'a SearchRecord) -> Self {
        Self { record }
    }

    /// `None` for an empty record.
    pub fn summary(&self) -> Option<SearchSummary> {
        let first = self.record.snapshots.first()?;
        let last = self.record.last()?;
        Some(SearchSummary {
            source: first.source.spec().label(),
            final_target: last.target.spec().label(),
            outer_iterations: self.record.len(),
            inner_iterations: self
                .record
                .snapshots
                .iter()
                .map(|s| s.inner_loss_trace.len())
                .sum(),
            first_outer_loss: first.outer_loss,
            final_outer_loss: last.outer_loss,
            termination: self.record.termination,
        })
    }
}
