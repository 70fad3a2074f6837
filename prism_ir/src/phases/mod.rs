//! Compilation phases.
//!
//! A [`Phase`] transforms a graph in place and reports whether it changed
//! anything. The [`PhasePipeline`] runs phases in order and keeps per-phase
//! statistics. The standard phases wrapping the canonicalizer, the inliner
//! and type-check lowering live here; branch instrumentation provides its
//! own ([`InstrumentBranchesPhase`](crate::instrument::InstrumentBranchesPhase)).

pub mod pipeline;

pub use pipeline::{PhasePipeline, PhaseStat, PipelineStats};

use crate::assume::AssumptionTable;
use crate::canon::{CanonStats, Canonicalizer, CanonicalizerConfig};
use crate::deopt::SpeculationLog;
use crate::error::CompileResult;
use crate::inline::{CalleeProvider, Inliner, InliningPolicy, InliningStats, InliningTrace};
use crate::ir::Graph;
use crate::lower::{lower_type_checks, LoweringStats, LoweringTool};
use crate::types::TypeResolver;

/// A graph transformation.
pub trait Phase {
    /// Name used in statistics and logs.
    fn name(&self) -> &'static str;

    /// Transform `graph`; returns whether anything changed.
    fn run(&mut self, graph: &mut Graph) -> CompileResult<bool>;
}

/// Lets a pipeline borrow a phase whose results are read afterwards.
impl<P: Phase + ?Sized> Phase for &mut P {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn run(&mut self, graph: &mut Graph) -> CompileResult<bool> {
        (**self).run(graph)
    }
}

// =============================================================================
// Canonicalization
// =============================================================================

pub struct CanonicalizePhase<'a> {
    types: &'a dyn TypeResolver,
    table: Option<&'a AssumptionTable>,
    config: CanonicalizerConfig,
    stats: CanonStats,
}

impl<'a> CanonicalizePhase<'a> {
    pub fn new(types: &'a dyn TypeResolver) -> Self {
        CanonicalizePhase {
            types,
            table: None,
            config: CanonicalizerConfig::default(),
            stats: CanonStats::default(),
        }
    }

    pub fn with_table(mut self, table: &'a AssumptionTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_config(mut self, config: CanonicalizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Counters of the last run.
    pub fn stats(&self) -> CanonStats {
        self.stats
    }
}

impl Phase for CanonicalizePhase<'_> {
    fn name(&self) -> &'static str {
        "Canonicalize"
    }

    fn run(&mut self, graph: &mut Graph) -> CompileResult<bool> {
        let mut canon = Canonicalizer::new(self.types).with_config(self.config);
        if let Some(table) = self.table {
            canon = canon.with_table(table);
        }
        let changed = canon.run(graph)?;
        self.stats = canon.stats();
        Ok(changed)
    }
}

// =============================================================================
// Inlining
// =============================================================================

pub struct InliningPhase<'a> {
    provider: &'a dyn CalleeProvider,
    policy: &'a dyn InliningPolicy,
    types: &'a dyn TypeResolver,
    table: Option<&'a AssumptionTable>,
    stats: InliningStats,
    trace: InliningTrace,
}

impl<'a> InliningPhase<'a> {
    pub fn new(provider: &'a dyn CalleeProvider, policy: &'a dyn InliningPolicy, types: &'a dyn TypeResolver) -> Self {
        InliningPhase {
            provider,
            policy,
            types,
            table: None,
            stats: InliningStats::default(),
            trace: InliningTrace::default(),
        }
    }

    pub fn with_table(mut self, table: &'a AssumptionTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn stats(&self) -> InliningStats {
        self.stats
    }

    /// Decision trace of the last run.
    pub fn trace(&self) -> &InliningTrace {
        &self.trace
    }

    pub fn take_trace(&mut self) -> InliningTrace {
        std::mem::take(&mut self.trace)
    }
}

impl Phase for InliningPhase<'_> {
    fn name(&self) -> &'static str {
        "Inlining"
    }

    fn run(&mut self, graph: &mut Graph) -> CompileResult<bool> {
        let mut inliner = Inliner::new(self.provider, self.policy, self.types);
        if let Some(table) = self.table {
            inliner = inliner.with_table(table);
        }
        let result = inliner.run(graph);
        self.trace = inliner.into_trace();
        self.stats = result?;
        Ok(self.stats.inlined > 0)
    }
}

// =============================================================================
// Lowering
// =============================================================================

pub struct LowerTypeChecksPhase<'a> {
    types: &'a dyn TypeResolver,
    speculation_log: Option<&'a SpeculationLog>,
    stats: LoweringStats,
}

impl<'a> LowerTypeChecksPhase<'a> {
    pub fn new(types: &'a dyn TypeResolver) -> Self {
        LowerTypeChecksPhase {
            types,
            speculation_log: None,
            stats: LoweringStats::default(),
        }
    }

    pub fn with_speculation_log(mut self, log: &'a SpeculationLog) -> Self {
        self.speculation_log = Some(log);
        self
    }

    pub fn stats(&self) -> LoweringStats {
        self.stats
    }
}

impl Phase for LowerTypeChecksPhase<'_> {
    fn name(&self) -> &'static str {
        "LowerTypeChecks"
    }

    fn run(&mut self, graph: &mut Graph) -> CompileResult<bool> {
        let mut tool = LoweringTool::new(self.types);
        if let Some(log) = self.speculation_log {
            tool = tool.with_speculation_log(log);
        }
        self.stats = lower_type_checks(graph, &tool)?;
        Ok(self.stats.total() > 0)
    }
}
