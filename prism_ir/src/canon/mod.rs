//! Worklist canonicalizer.
//!
//! The canonicalizer rewrites nodes into simpler or more precise equivalents
//! until nothing changes. Each visit of a node:
//!
//! 1. re-infers its stamp from its inputs' stamps,
//! 2. merges it into an equal pure node (global value numbering),
//! 3. replaces a pure node whose stamp admits a single value by a constant,
//! 4. applies the rule for its kind (see the submodules).
//!
//! Every graph edit is recorded by the graph's change tracking and the
//! touched nodes are re-enqueued, so rewrites enabled by other rewrites are
//! always found. Rules only ever shrink the graph or move it towards a
//! normal form (constants right, lower ids first), which makes the fixpoint
//! unique regardless of visiting order.

mod arith;
mod control;
mod guard;
mod logic;
mod type_check;

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::assume::{AssumptionResult, AssumptionTable};
use crate::deopt::DeoptSignal;
use crate::error::{CompileError, CompileResult};
use crate::ir::{BitSet, Graph, NodeId, NodeKind};
use crate::stamp::{fold_stamp, Stamp};
use crate::types::TypeResolver;

// =============================================================================
// Configuration
// =============================================================================

/// Order in which the initial worklist is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedOrder {
    /// Creation order.
    #[default]
    Forward,
    /// Reverse creation order.
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalizerConfig {
    /// Worklist pops allowed per live node before giving up.
    pub max_iterations_per_node: usize,
    /// Lower bound for the total pop budget.
    pub min_iterations: usize,
    pub order: SeedOrder,
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        CanonicalizerConfig {
            max_iterations_per_node: 32,
            min_iterations: 1024,
            order: SeedOrder::Forward,
        }
    }
}

impl CanonicalizerConfig {
    pub fn reverse() -> Self {
        CanonicalizerConfig {
            order: SeedOrder::Reverse,
            ..Self::default()
        }
    }
}

/// Counters of one canonicalizer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonStats {
    pub iterations: usize,
    pub stamps_improved: usize,
    pub value_numbered: usize,
    pub constants_folded: usize,
    pub replaced: usize,
    pub removed: usize,
    pub deoptimized: usize,
    pub branches_folded: usize,
    pub rewritten: usize,
}

impl CanonStats {
    /// Whether the run changed the graph at all.
    pub fn changed(&self) -> bool {
        self.value_numbered
            + self.constants_folded
            + self.replaced
            + self.removed
            + self.deoptimized
            + self.branches_folded
            + self.rewritten
            + self.stamps_improved
            > 0
    }
}

// =============================================================================
// Rule Interface
// =============================================================================

/// What a kind-specific rule decided for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    /// Nothing to do.
    Keep,
    /// All usages move to the given value and the node is deleted. Fixed
    /// nodes are unlinked from their chain first.
    Replace(NodeId),
    /// Delete a fixed node that produces no value; anchored usages move to
    /// the start node.
    Remove,
    /// The fixed node always fails: cut the chain with a deoptimization.
    Deoptimize(DeoptSignal),
    /// The `If` always takes the given branch.
    FoldBranch(bool),
    /// The rule edited the node in place.
    Changed,
}

/// Services available to rules.
pub struct CanonicalizerTool<'a> {
    pub types: &'a dyn TypeResolver,
    /// Process-wide assumption table, consulted before speculating.
    pub table: Option<&'a AssumptionTable>,
}

impl<'a> CanonicalizerTool<'a> {
    /// Whether `result` may be relied on by `graph`: its assumptions must be
    /// permitted for the graph and not already invalidated.
    pub fn can_use<T: Copy>(&self, graph: &Graph, result: &AssumptionResult<T>) -> bool {
        result.can_record_to(Some(graph.assumptions()))
            && !result
                .assumptions()
                .iter()
                .any(|a| self.table.is_some_and(|t| t.is_invalidated(a)))
    }

    /// Record the assumptions of an answer the graph now depends on.
    pub fn record<T: Copy>(&self, graph: &mut Graph, result: &AssumptionResult<T>) {
        for assumption in result.assumptions() {
            if graph.assumptions_mut().record(assumption.clone()) {
                trace!(graph = graph.name(), %assumption, "assumption recorded");
            }
        }
    }
}

// =============================================================================
// Worklist
// =============================================================================

struct Worklist {
    queue: VecDeque<NodeId>,
    queued: BitSet,
}

impl Worklist {
    fn new(capacity: usize) -> Self {
        Worklist {
            queue: VecDeque::with_capacity(capacity),
            queued: BitSet::with_capacity(capacity),
        }
    }

    fn push(&mut self, id: NodeId) {
        if self.queued.insert(id.as_usize()) {
            self.queue.push_back(id);
        }
    }

    fn extend(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            self.push(id);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(id.as_usize());
        Some(id)
    }
}

// =============================================================================
// Canonicalizer
// =============================================================================

/// Drives the rewrite rules to a fixpoint.
pub struct Canonicalizer<'a> {
    tool: CanonicalizerTool<'a>,
    config: CanonicalizerConfig,
    stats: CanonStats,
}

impl<'a> Canonicalizer<'a> {
    pub fn new(types: &'a dyn TypeResolver) -> Self {
        Canonicalizer {
            tool: CanonicalizerTool { types, table: None },
            config: CanonicalizerConfig::default(),
            stats: CanonStats::default(),
        }
    }

    pub fn with_table(mut self, table: &'a AssumptionTable) -> Self {
        self.tool.table = Some(table);
        self
    }

    pub fn with_config(mut self, config: CanonicalizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Counters accumulated over all runs.
    pub fn stats(&self) -> CanonStats {
        self.stats
    }

    /// Canonicalize the whole graph. Returns `true` if anything changed.
    pub fn run(&mut self, graph: &mut Graph) -> CompileResult<bool> {
        let mut seeds = graph.live_ids();
        if self.config.order == SeedOrder::Reverse {
            seeds.reverse();
        }
        self.run_on(graph, &seeds)
    }

    /// Canonicalize starting from `seeds` (used after local edits such as
    /// inlining). Returns `true` if anything changed.
    pub fn run_on(&mut self, graph: &mut Graph, seeds: &[NodeId]) -> CompileResult<bool> {
        let before = self.stats;
        let budget = self
            .config
            .min_iterations
            .max(graph.live_node_count().saturating_mul(self.config.max_iterations_per_node));
        let mut worklist = Worklist::new(graph.id_bound());
        worklist.extend(seeds.iter().copied());

        graph.track_changes(true);
        let mut iterations = 0usize;
        while let Some(id) = worklist.pop() {
            if !graph.is_alive(id) {
                continue;
            }
            iterations += 1;
            if iterations > budget {
                graph.track_changes(false);
                warn!(graph = graph.name(), iterations, "canonicalizer did not converge");
                return Err(CompileError::CanonicalizationDiverged { iterations });
            }
            self.visit(graph, id, &mut worklist);
            worklist.extend(graph.take_changes());
        }
        graph.track_changes(false);
        self.stats.iterations += iterations;

        let changed = CanonStats {
            iterations: 0,
            ..self.stats
        } != CanonStats {
            iterations: 0,
            ..before
        };
        Ok(changed)
    }

    fn visit(&mut self, graph: &mut Graph, id: NodeId, worklist: &mut Worklist) {
        if !graph.node(id).is_fixed()
            && !matches!(graph.kind(id), NodeKind::Parameter { .. })
            && graph.users(id).is_empty()
        {
            graph.kill(id);
            self.stats.removed += 1;
            return;
        }

        if self.infer_stamp(graph, id) {
            self.stats.stamps_improved += 1;
            worklist.extend(graph.users(id).iter().copied());
            // A narrower stamp may resolve a branch or guard further down.
            worklist.push(id);
        }

        if let Some(existing) = graph.find_duplicate(id) {
            trace!(node = %id, into = %existing, "value numbered");
            graph.replace_at_usages(id, existing);
            graph.kill(id);
            self.stats.value_numbered += 1;
            return;
        }

        if self.fold_constant(graph, id) {
            return;
        }

        let outcome = match graph.kind(id) {
            NodeKind::Binary(_) | NodeKind::Negate | NodeKind::Compare(_) => arith::canonical(graph, &self.tool, id),
            NodeKind::IntegerRem | NodeKind::IntegerDiv => arith::canonical_division(graph, id),
            NodeKind::LogicNot | NodeKind::ShortCircuitOr { .. } => logic::canonical(graph, &self.tool, id),
            NodeKind::InstanceOf { .. }
            | NodeKind::CheckCast { .. }
            | NodeKind::CheckCastDynamic
            | NodeKind::Pi { .. }
            | NodeKind::GuardedValue { .. } => type_check::canonical(graph, &self.tool, id),
            NodeKind::Guard { .. } | NodeKind::FixedGuard { .. } => guard::canonical(graph, id),
            NodeKind::If | NodeKind::Phi | NodeKind::Begin => control::canonical(graph, id),
            _ => Canonical::Keep,
        };
        self.apply(graph, id, outcome, worklist);
    }

    /// Recompute the stamp of `id`. Returns `true` if it changed.
    fn infer_stamp(&self, graph: &mut Graph, id: NodeId) -> bool {
        let current = graph.stamp(id);
        if matches!(current, Stamp::Void) {
            return false;
        }
        let inputs: SmallVec<[Stamp; 4]> = graph.inputs(id).iter().map(|&i| graph.stamp(i).clone()).collect();
        let refs: SmallVec<[&Stamp; 4]> = inputs.iter().collect();
        let inferred = fold_stamp(graph.kind(id), &refs, current, self.tool.types);
        if matches!(inferred, Stamp::Void) {
            return false;
        }
        graph.set_stamp(id, inferred)
    }

    /// Replace a pure non-constant node whose stamp pins a single value.
    fn fold_constant(&mut self, graph: &mut Graph, id: NodeId) -> bool {
        let kind = graph.kind(id);
        if !kind.is_pure() || matches!(kind, NodeKind::Constant(_)) {
            return false;
        }
        let Some(constant) = graph.stamp(id).as_constant() else {
            return false;
        };
        graph.resolve_type_check(id, crate::ir::TypeCheckResolution::ResolvedStatic);
        let folded = graph.constant(constant);
        trace!(node = %id, %constant, "folded to constant");
        graph.replace_at_usages(id, folded);
        graph.kill(id);
        self.stats.constants_folded += 1;
        true
    }

    fn apply(&mut self, graph: &mut Graph, id: NodeId, outcome: Canonical, worklist: &mut Worklist) {
        match outcome {
            Canonical::Keep => {}
            Canonical::Replace(value) if value == id => {}
            Canonical::Replace(value) => {
                trace!(node = %id, kind = graph.kind(id).mnemonic(), into = %value, "replaced");
                if graph.node(id).is_fixed() {
                    graph.replace_fixed_with_floating(id, value);
                } else {
                    graph.replace_at_usages(id, value);
                    graph.kill(id);
                }
                worklist.push(value);
                self.stats.replaced += 1;
            }
            Canonical::Remove => {
                trace!(node = %id, kind = graph.kind(id).mnemonic(), "removed");
                let start = graph.start();
                graph.replace_at_usages(id, start);
                graph.unlink_fixed(id);
                graph.kill(id);
                self.stats.removed += 1;
            }
            Canonical::Deoptimize(signal) => {
                trace!(node = %id, %signal, "always deoptimizes");
                let sink = graph.add_node(
                    NodeKind::Deoptimize {
                        reason: signal.reason,
                        action: signal.action,
                        speculation: signal.speculation,
                    },
                    &[],
                    Stamp::Void,
                );
                graph.replace_with_sink(id, sink);
                self.stats.deoptimized += 1;
            }
            Canonical::FoldBranch(taken) => {
                trace!(node = %id, taken, "branch folded");
                graph.simplify_if(id, taken);
                self.stats.branches_folded += 1;
            }
            Canonical::Changed => {
                worklist.push(id);
                self.stats.rewritten += 1;
            }
        }
    }
}

/// Canonicalize `graph` with default settings.
pub fn canonicalize(graph: &mut Graph, types: &dyn TypeResolver) -> CompileResult<bool> {
    Canonicalizer::new(types).run(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, CompareOp, Constant, GraphBuilder};
    use crate::stamp::IntegerStamp;
    use crate::types::{MethodId, TypeHierarchy};

    #[test]
    fn test_duplicate_pure_nodes_merge() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "gvn", &types);
        let x = b.parameter(0, Stamp::int(32));
        let y = b.parameter(1, Stamp::int(32));
        let a = b.add(x, y);
        let c = b.add(y, x);
        let sum = b.binary(BinaryOp::Mul, a, c);
        b.ret(Some(sum));
        let mut g = b.finish().expect("valid");

        assert!(canonicalize(&mut g, &types).expect("converges"));
        assert_eq!(g.count(|k| matches!(k, NodeKind::Binary(BinaryOp::Add))), 1);
        g.verify().expect("still valid");
    }

    #[test]
    fn test_constant_branch_is_folded() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "fold", &types);
        let x = b.parameter(0, Stamp::Integer(IntegerStamp::range(32, 0, 10)));
        let hundred = b.int(100);
        let cond = b.compare(CompareOp::LessThan, x, hundred);
        let (t, f) = b.branch(cond);
        b.set_cursor(t);
        let te = b.end();
        b.set_cursor(f);
        let fe = b.end();
        let merge = b.merge(&[te, fe]);
        let minus = b.int(-1);
        let phi = b.phi(merge, &[x, minus]);
        b.ret(Some(phi));
        let mut g = b.finish().expect("valid");

        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.count(|k| matches!(k, NodeKind::If | NodeKind::Merge | NodeKind::Phi)), 0);
        let ret = g.returns()[0];
        assert_eq!(g.inputs(ret), &[x]);
        g.verify().expect("still valid");
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "idem", &types);
        let x = b.parameter(0, Stamp::int(32));
        let zero = b.int(0);
        let sum = b.add(zero, x);
        b.ret(Some(sum));
        let mut g = b.finish().expect("valid");

        let mut canon = Canonicalizer::new(&types);
        assert!(canon.run(&mut g).expect("converges"));
        assert!(!canon.run(&mut g).expect("converges"));
        assert_eq!(g.inputs(g.returns()[0]), &[x]);
    }

    #[test]
    fn test_iteration_cap_reports_divergence() {
        let types = TypeHierarchy::new();
        let mut g = Graph::new(MethodId::new(0), "cap");
        let mut last = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::int(32));
        let one = g.constant(Constant::int(1));
        for _ in 0..64 {
            last = g.add_node(NodeKind::Binary(BinaryOp::Mul), &[last, one], Stamp::int(32));
        }
        let ret = g.add_node(NodeKind::Return, &[last], Stamp::Void);
        g.set_next(g.start(), ret);

        let config = CanonicalizerConfig {
            max_iterations_per_node: 0,
            min_iterations: 3,
            order: SeedOrder::Forward,
        };
        let result = Canonicalizer::new(&types).with_config(config).run(&mut g);
        assert!(matches!(result, Err(CompileError::CanonicalizationDiverged { .. })));
    }
}
