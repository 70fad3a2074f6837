//! Phase pipeline.
//!
//! Runs registered phases in order, once each, verifying the graph after
//! every phase that reports a change. A phase error aborts the pipeline and
//! is returned unchanged.

use std::time::{Duration, Instant};

use tracing::debug;

use super::Phase;
use crate::error::CompileResult;
use crate::ir::Graph;

// =============================================================================
// Phase Entry
// =============================================================================

struct PhaseEntry<'a> {
    phase: Box<dyn Phase + 'a>,
    enabled: bool,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl<'a> PhaseEntry<'a> {
    fn new<P: Phase + 'a>(phase: P) -> Self {
        PhaseEntry {
            phase: Box::new(phase),
            enabled: true,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct PhasePipeline<'a> {
    phases: Vec<PhaseEntry<'a>>,
    collect_timing: bool,
}

impl<'a> PhasePipeline<'a> {
    pub fn new() -> Self {
        PhasePipeline {
            phases: Vec::new(),
            collect_timing: true,
        }
    }

    pub fn without_timing(mut self) -> Self {
        self.collect_timing = false;
        self
    }

    /// Append `phase`.
    pub fn register<P: Phase + 'a>(&mut self, phase: P) -> &mut Self {
        self.phases.push(PhaseEntry::new(phase));
        self
    }

    /// Enable or disable every phase called `name`.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        for entry in self.phases.iter_mut().filter(|e| e.phase.name() == name) {
            entry.enabled = enabled;
        }
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Run every enabled phase on `graph`.
    pub fn run(&mut self, graph: &mut Graph) -> CompileResult<PipelineStats> {
        let start = Instant::now();
        let mut stats = PipelineStats {
            initial_size: graph.live_node_count(),
            ..PipelineStats::default()
        };

        for entry in &mut self.phases {
            if !entry.enabled {
                continue;
            }
            let started = self.collect_timing.then(Instant::now);
            let changed = entry.phase.run(graph)?;
            if let Some(started) = started {
                entry.time += started.elapsed();
            }
            entry.runs += 1;
            stats.phases_run += 1;
            if changed {
                entry.changes += 1;
                stats.phases_changed += 1;
                graph.verify()?;
            }
            debug!(
                graph = graph.name(),
                phase = entry.phase.name(),
                changed,
                nodes = graph.live_node_count(),
                "phase finished"
            );
        }

        stats.total_time = start.elapsed();
        stats.final_size = graph.live_node_count();
        Ok(stats)
    }

    /// Per-phase statistics accumulated over all runs.
    pub fn phase_stats(&self) -> Vec<PhaseStat> {
        self.phases
            .iter()
            .map(|e| PhaseStat {
                name: e.phase.name(),
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }
}

impl Default for PhasePipeline<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics of a single phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseStat {
    pub name: &'static str,
    pub runs: usize,
    /// Runs that changed the graph.
    pub changes: usize,
    pub time: Duration,
}

/// Statistics of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub phases_run: usize,
    pub phases_changed: usize,
    pub total_time: Duration,
    pub initial_size: usize,
    pub final_size: usize,
}

impl PipelineStats {
    /// Final size relative to the initial size.
    pub fn size_ratio(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}
