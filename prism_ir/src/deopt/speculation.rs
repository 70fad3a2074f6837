use dashmap::DashSet;

use super::SpeculationId;

/// Speculations that failed and must not be attempted again.
///
/// Shared between the deoptimization handler, which records failures, and
/// compilations, which consult it before emitting a speculative guard.
#[derive(Debug, Default)]
pub struct SpeculationLog {
    failed: DashSet<SpeculationId>,
}

impl SpeculationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `speculation` failed. Returns `true` on first failure.
    pub fn record_failure(&self, speculation: SpeculationId) -> bool {
        if speculation.is_none() {
            return false;
        }
        self.failed.insert(speculation)
    }

    /// Whether a compilation may emit a guard for `speculation`.
    pub fn may_speculate(&self, speculation: SpeculationId) -> bool {
        speculation.is_none() || !self.failed.contains(&speculation)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn clear(&self) {
        self.failed.clear();
    }
}
