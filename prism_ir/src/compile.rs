//! Compilation driver.
//!
//! A compilation takes a method's graph through
//!
//! ```text
//! [instrument] -> canonicalize -> inline -> canonicalize -> lower -> canonicalize -> install
//! ```
//!
//! and either installs the result or falls back. A fallback is not an
//! error for the caller: the method keeps running in the interpreter and
//! the partial graph is dropped.

use std::sync::Arc;

use tracing::{info, warn};

use crate::assume::{AssumptionTable, DeoptRequest, InstalledCode, InvalidationEvent};
use crate::canon::CanonicalizerConfig;
use crate::deopt::{DeoptHandler, DeoptResolution, DeoptSignal, SpeculationLog, DEFAULT_RECOMPILE_THRESHOLD};
use crate::error::{CompileError, CompileResult};
use crate::inline::{CalleeProvider, GreedyInliningPolicy, InliningConfig, InliningTrace};
use crate::instrument::{BranchInstrumentation, InstrumentBranchesPhase, InstrumentationConfig};
use crate::ir::Graph;
use crate::phases::{
    CanonicalizePhase, InliningPhase, LowerTypeChecksPhase, PhasePipeline, PhaseStat, PipelineStats,
};
use crate::profile::ProfileTable;
use crate::types::{MethodId, TypeResolver};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub canonicalizer: CanonicalizerConfig,
    pub inlining: InliningConfig,
    pub enable_inlining: bool,
    /// Branch instrumentation; off when `None`.
    pub instrumentation: Option<InstrumentationConfig>,
    /// Whether compilations may rely on class-hierarchy assumptions.
    pub allow_assumptions: bool,
    /// Deopts a `RecompileIfTooManyDeopts` site tolerates.
    pub deopt_recompile_threshold: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            canonicalizer: CanonicalizerConfig::default(),
            inlining: InliningConfig::default(),
            enable_inlining: true,
            instrumentation: None,
            allow_assumptions: true,
            deopt_recompile_threshold: DEFAULT_RECOMPILE_THRESHOLD,
        }
    }
}

impl CompilerConfig {
    /// Small budgets, no speculation on the class hierarchy.
    pub fn conservative() -> Self {
        CompilerConfig {
            inlining: InliningConfig::conservative(),
            allow_assumptions: false,
            ..Self::default()
        }
    }

    pub fn aggressive() -> Self {
        CompilerConfig {
            inlining: InliningConfig::aggressive(),
            ..Self::default()
        }
    }

    /// No inlining at all.
    pub fn without_inlining() -> Self {
        CompilerConfig {
            enable_inlining: false,
            ..Self::default()
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Result of a successful compilation.
#[derive(Debug)]
pub struct CompiledMethod {
    pub code: Arc<InstalledCode>,
    /// The final graph, as installed.
    pub graph: Graph,
    pub inlining_trace: InliningTrace,
    pub stats: PipelineStats,
    pub phase_stats: Vec<PhaseStat>,
}

#[derive(Debug)]
pub enum CompilationOutcome {
    Installed(CompiledMethod),
    /// The method keeps running in the interpreter.
    Fallback { method: MethodId, error: CompileError },
}

impl CompilationOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, CompilationOutcome::Installed(_))
    }

    pub fn compiled(&self) -> Option<&CompiledMethod> {
        match self {
            CompilationOutcome::Installed(m) => Some(m),
            CompilationOutcome::Fallback { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CompileError> {
        match self {
            CompilationOutcome::Installed(_) => None,
            CompilationOutcome::Fallback { error, .. } => Some(error),
        }
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// Compiles methods against shared runtime state.
///
/// The assumption table, speculation log and profiles are shared with the
/// rest of the runtime and may be used from several compiler threads.
pub struct Compiler {
    config: CompilerConfig,
    types: Arc<dyn TypeResolver>,
    provider: Arc<dyn CalleeProvider>,
    table: Arc<AssumptionTable>,
    speculation_log: Arc<SpeculationLog>,
    profiles: Arc<ProfileTable>,
    instrumentation: Arc<BranchInstrumentation>,
    deopt: DeoptHandler,
}

impl Compiler {
    pub fn new(types: Arc<dyn TypeResolver>, provider: Arc<dyn CalleeProvider>) -> Self {
        let config = CompilerConfig::default();
        let speculation_log = Arc::new(SpeculationLog::new());
        let profiles = Arc::new(ProfileTable::new());
        let deopt = DeoptHandler::new(Arc::clone(&speculation_log), Arc::clone(&profiles))
            .with_recompile_threshold(config.deopt_recompile_threshold);
        Compiler {
            config,
            types,
            provider,
            table: Arc::new(AssumptionTable::new()),
            speculation_log,
            profiles,
            instrumentation: Arc::new(BranchInstrumentation::default()),
            deopt,
        }
    }

    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        if let Some(inst) = &config.instrumentation {
            self.instrumentation = Arc::new(BranchInstrumentation::new(inst.table_size));
        }
        self.config = config;
        self.rebuild_deopt_handler();
        self
    }

    pub fn with_assumption_table(mut self, table: Arc<AssumptionTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<ProfileTable>) -> Self {
        self.profiles = profiles;
        self.rebuild_deopt_handler();
        self
    }

    pub fn with_instrumentation(mut self, instrumentation: Arc<BranchInstrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    fn rebuild_deopt_handler(&mut self) {
        self.deopt = DeoptHandler::new(Arc::clone(&self.speculation_log), Arc::clone(&self.profiles))
            .with_recompile_threshold(self.config.deopt_recompile_threshold);
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn assumption_table(&self) -> &Arc<AssumptionTable> {
        &self.table
    }

    pub fn speculation_log(&self) -> &Arc<SpeculationLog> {
        &self.speculation_log
    }

    pub fn profiles(&self) -> &Arc<ProfileTable> {
        &self.profiles
    }

    pub fn instrumentation(&self) -> &Arc<BranchInstrumentation> {
        &self.instrumentation
    }

    pub fn deopt_handler(&self) -> &DeoptHandler {
        &self.deopt
    }

    /// Compile the graph the provider holds for `method`.
    pub fn compile_method(&self, method: MethodId) -> CompilationOutcome {
        match self.provider.callee(method) {
            Some(callee) => self.compile_graph(callee.graph.clone()),
            None => self.fallback(method, CompileError::UnknownMethod(method)),
        }
    }

    /// Compile `graph` and install the result.
    pub fn compile_graph(&self, graph: Graph) -> CompilationOutcome {
        let method = graph.method();
        match self.try_compile(graph) {
            Ok(compiled) => {
                info!(
                    %method,
                    code = %compiled.code.id(),
                    nodes = compiled.graph.live_node_count(),
                    assumptions = compiled.code.assumptions().len(),
                    "method compiled"
                );
                CompilationOutcome::Installed(compiled)
            }
            Err(error) => self.fallback(method, error),
        }
    }

    fn fallback(&self, method: MethodId, error: CompileError) -> CompilationOutcome {
        warn!(%method, %error, "compilation failed, method stays interpreted");
        CompilationOutcome::Fallback { method, error }
    }

    fn try_compile(&self, mut graph: Graph) -> CompileResult<CompiledMethod> {
        let method = graph.method();
        if !self.deopt.is_compilable(method) {
            return Err(CompileError::NotCompilable(method));
        }
        graph.assumptions_mut().set_allowed(self.config.allow_assumptions);
        graph.verify()?;

        let types = &*self.types;
        let table = &*self.table;
        let policy = GreedyInliningPolicy::new(self.config.inlining.clone());
        let mut inlining = InliningPhase::new(&*self.provider, &policy, types).with_table(table);

        let (stats, phase_stats) = {
            let mut pipeline = PhasePipeline::new();
            if let Some(config) = &self.config.instrumentation {
                pipeline.register(InstrumentBranchesPhase::new(config.clone(), Arc::clone(&self.instrumentation)));
            }
            pipeline.register(self.canonicalize_phase());
            if self.config.enable_inlining {
                pipeline.register(&mut inlining);
                pipeline.register(self.canonicalize_phase());
            }
            pipeline.register(LowerTypeChecksPhase::new(types).with_speculation_log(&self.speculation_log));
            pipeline.register(self.canonicalize_phase());
            let stats = pipeline.run(&mut graph)?;
            (stats, pipeline.phase_stats())
        };

        let code = self.table.install(method, graph.assumptions(), types)?;
        Ok(CompiledMethod {
            code,
            graph,
            inlining_trace: inlining.take_trace(),
            stats,
            phase_stats,
        })
    }

    fn canonicalize_phase(&self) -> CanonicalizePhase<'_> {
        CanonicalizePhase::new(&*self.types)
            .with_table(&self.table)
            .with_config(self.config.canonicalizer)
    }

    /// React to a deoptimization raised by installed code.
    pub fn handle_deopt(&self, code: &InstalledCode, signal: DeoptSignal) -> DeoptResolution {
        self.deopt.handle(code, signal)
    }

    /// Forward a class-hierarchy event to the assumption table.
    pub fn notify(&self, event: InvalidationEvent) -> Vec<DeoptRequest> {
        self.table.notify(event, &*self.types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deopt::{DeoptAction, DeoptReason, SpeculationId};
    use crate::inline::{CalleeGraph, CalleeRegistry};
    use crate::ir::{GraphBuilder, NodeKind};
    use crate::stamp::Stamp;
    use crate::types::TypeHierarchy;

    const CALLER: MethodId = MethodId::new(1);
    const CALLEE: MethodId = MethodId::new(2);

    fn setup() -> (Arc<TypeHierarchy>, Arc<CalleeRegistry>) {
        let types = Arc::new(TypeHierarchy::new());
        let registry = Arc::new(CalleeRegistry::new());

        let mut cb = GraphBuilder::new(CALLEE, "inc", &*types);
        let p = cb.parameter(0, Stamp::int(32));
        let one = cb.int(1);
        let s = cb.add(p, one);
        cb.ret(Some(s));
        registry.register(CalleeGraph::new(cb.finish().expect("valid")));

        let mut b = GraphBuilder::new(CALLER, "caller", &*types);
        let x = b.parameter(0, Stamp::int(32));
        let r = b.invoke(CALLEE, &[x], Stamp::int(32), 4);
        b.ret(Some(r));
        registry.register(CalleeGraph::new(b.finish().expect("valid")));
        (types, registry)
    }

    #[test]
    fn test_compile_inlines_and_installs() {
        let (types, registry) = setup();
        let compiler = Compiler::new(types, registry);
        let outcome = compiler.compile_method(CALLER);
        let compiled = outcome.compiled().expect("installed");

        assert!(compiled.code.is_valid());
        assert_eq!(compiled.graph.count(|k| matches!(k, NodeKind::Invoke { .. })), 0);
        assert_eq!(compiled.inlining_trace.inlined().count(), 1);
        assert!(compiled.phase_stats.iter().any(|s| s.name == "Inlining" && s.changes == 1));
    }

    #[test]
    fn test_without_inlining_keeps_call() {
        let (types, registry) = setup();
        let compiler = Compiler::new(types, registry).with_config(CompilerConfig::without_inlining());
        let outcome = compiler.compile_method(CALLER);
        let compiled = outcome.compiled().expect("installed");
        assert_eq!(compiled.graph.count(|k| matches!(k, NodeKind::Invoke { .. })), 1);
        assert!(compiled.inlining_trace.is_empty());
    }

    #[test]
    fn test_unknown_method_falls_back() {
        let (types, registry) = setup();
        let compiler = Compiler::new(types, registry);
        let outcome = compiler.compile_method(MethodId::new(99));
        assert!(!outcome.is_installed());
        assert_eq!(outcome.error(), Some(&CompileError::UnknownMethod(MethodId::new(99))));
    }

    #[test]
    fn test_stop_compiling_deopt_blocks_recompilation() {
        let (types, registry) = setup();
        let compiler = Compiler::new(types, registry);
        let outcome = compiler.compile_method(CALLEE);
        let code = Arc::clone(&outcome.compiled().expect("installed").code);

        let signal = DeoptSignal::new(
            DeoptReason::RuntimeConstraint,
            DeoptAction::InvalidateStopCompiling,
            SpeculationId::NONE,
        );
        let resolution = compiler.handle_deopt(&code, signal);
        assert!(resolution.invalidated && resolution.stop_compiling);
        assert!(!code.is_valid());

        let again = compiler.compile_method(CALLEE);
        assert_eq!(again.error(), Some(&CompileError::NotCompilable(CALLEE)));
    }
}
