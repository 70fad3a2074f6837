//! Profile-driven inlining.
//!
//! The [`Inliner`] keeps a frontier of call sites and repeatedly picks the
//! most relevant one (ties broken by node id, so runs are reproducible).
//! Each candidate is evaluated twice by the [`InliningPolicy`]:
//!
//! 1. before exploring the callee, on its raw node count,
//! 2. after exploring it (a canonicalized copy), when rules that look at
//!    the callee's own call sites apply.
//!
//! Admitted callees are spliced in by [`inline_invoke`], their call sites
//! join the frontier one level deeper, and the canonicalizer runs over the
//! new nodes. The run stops when the frontier is empty or the policy says
//! the graph has grown large enough.

mod callee;
mod policy;
mod trace;
mod transform;

pub use callee::{invoke_probability, CalleeGraph, CalleeProvider, CalleeRegistry, InlineHint};
pub use policy::{
    GreedyInliningPolicy, InliningConfig, InliningDecision, InliningPolicy, InliningRule, Invocation,
};
pub use trace::{InliningDecisionRecord, InliningTrace};
pub use transform::{inline_invoke, InlineInfo};

use smallvec::SmallVec;
use tracing::debug;

use crate::assume::AssumptionTable;
use crate::canon::Canonicalizer;
use crate::error::CompileResult;
use crate::ir::{Graph, NodeId, NodeKind};
use crate::types::{MethodId, TypeResolver};

/// A call site on the frontier.
#[derive(Debug, Clone)]
pub struct InliningCandidate {
    pub invoke: NodeId,
    pub target: MethodId,
    /// Nesting level: 1 for call sites of the root method.
    pub depth: usize,
    pub probability: f64,
    pub relevance: f64,
    /// Methods on the inlining path to this site, root first.
    pub chain: SmallVec<[MethodId; 8]>,
}

/// Counters of one inlining run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InliningStats {
    pub evaluated: usize,
    pub inlined: usize,
    pub nodes_added: usize,
}

/// Greedy inliner over one graph.
pub struct Inliner<'a> {
    provider: &'a dyn CalleeProvider,
    policy: &'a dyn InliningPolicy,
    types: &'a dyn TypeResolver,
    table: Option<&'a AssumptionTable>,
    trace: InliningTrace,
}

impl<'a> Inliner<'a> {
    pub fn new(provider: &'a dyn CalleeProvider, policy: &'a dyn InliningPolicy, types: &'a dyn TypeResolver) -> Self {
        Inliner {
            provider,
            policy,
            types,
            table: None,
            trace: InliningTrace::new(),
        }
    }

    pub fn with_table(mut self, table: &'a AssumptionTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn trace(&self) -> &InliningTrace {
        &self.trace
    }

    pub fn into_trace(self) -> InliningTrace {
        self.trace
    }

    fn canonicalizer(&self) -> Canonicalizer<'a> {
        let canon = Canonicalizer::new(self.types);
        match self.table {
            Some(table) => canon.with_table(table),
            None => canon,
        }
    }

    fn candidate(&self, graph: &Graph, invoke: NodeId, depth: usize, chain: &[MethodId]) -> Option<InliningCandidate> {
        let NodeKind::Invoke { target, .. } = *graph.kind(invoke) else {
            return None;
        };
        let profile = graph.call_profile(invoke).unwrap_or_default();
        Some(InliningCandidate {
            invoke,
            target,
            depth,
            probability: profile.probability,
            relevance: self.policy.config().relevance(profile.probability, profile.loop_depth),
            chain: chain.iter().copied().collect(),
        })
    }

    /// Inline into `graph` until the frontier is exhausted or the size cap
    /// is reached.
    pub fn run(&mut self, graph: &mut Graph) -> CompileResult<InliningStats> {
        let mut stats = InliningStats::default();
        let root_chain = [graph.method()];
        let mut frontier: Vec<InliningCandidate> = graph
            .invokes()
            .into_iter()
            .filter_map(|invoke| self.candidate(graph, invoke, 1, &root_chain))
            .collect();

        while let Some(index) = pick(&frontier) {
            if !self.policy.continue_inlining(graph) {
                debug!(graph = graph.name(), nodes = graph.live_node_count(), "inlining cut off");
                self.trace.mark_cut_off();
                break;
            }
            let candidate = frontier.swap_remove(index);
            if !graph.is_alive(candidate.invoke) {
                continue;
            }
            stats.evaluated += 1;
            let Some(info) = self.try_inline(graph, &candidate)? else {
                continue;
            };
            stats.inlined += 1;
            stats.nodes_added += info.nodes_added;

            let mut chain = candidate.chain.clone();
            chain.push(candidate.target);
            for &invoke in &info.new_invokes {
                if let Some(next) = self.candidate(graph, invoke, candidate.depth + 1, &chain) {
                    frontier.push(next);
                }
            }
            self.canonicalizer().run_on(graph, &info.seeds())?;
        }
        Ok(stats)
    }

    /// Evaluate one candidate and inline it if admitted.
    fn try_inline(&mut self, graph: &mut Graph, candidate: &InliningCandidate) -> CompileResult<Option<InlineInfo>> {
        let policy = self.policy;
        let config = policy.config();
        let Some(callee) = self.provider.callee(candidate.target) else {
            self.reject(candidate, "?", InliningRule::CalleeNotFound, 0);
            return Ok(None);
        };
        let name = callee.graph.name().to_string();
        if candidate.depth > config.max_inlining_depth {
            self.reject(candidate, &name, InliningRule::DepthLimit, callee.node_count());
            return Ok(None);
        }
        let recursion = candidate.chain.iter().filter(|&&m| m == candidate.target).count();
        if recursion >= config.maximum_recursive_inlining {
            self.reject(candidate, &name, InliningRule::RecursionLimit, callee.node_count());
            return Ok(None);
        }
        if !callee.graph.assumptions().is_empty() && !graph.assumptions().allows() {
            self.reject(candidate, &name, InliningRule::AssumptionsNotAllowed, callee.node_count());
            return Ok(None);
        }

        let mut invocation = Invocation {
            invoke: candidate.invoke,
            callee: &callee,
            nodes: callee.node_count(),
            invoke_probability: invoke_probability(&callee.graph),
            probability: candidate.probability,
            relevance: candidate.relevance,
        };
        let first = policy.is_worth_inlining(&invocation, candidate.depth, false);
        if !first.inline {
            self.record(candidate, &name, false, &first, invocation.nodes);
            return Ok(None);
        }

        let mut body = callee.graph.clone();
        self.canonicalizer().run(&mut body)?;
        invocation.nodes = body.live_node_count();
        invocation.invoke_probability = invoke_probability(&body);
        let second = policy.is_worth_inlining(&invocation, candidate.depth, true);
        self.record(candidate, &name, true, &second, invocation.nodes);
        if !second.inline {
            return Ok(None);
        }
        if graph.live_node_count() + invocation.nodes > config.maximum_desired_size {
            self.reject(candidate, &name, InliningRule::MaximumDesiredSize, invocation.nodes);
            return Ok(None);
        }

        inline_invoke(graph, candidate.invoke, &body, self.types).map(Some)
    }

    fn record(&mut self, candidate: &InliningCandidate, name: &str, explored: bool, decision: &InliningDecision, nodes: usize) {
        self.trace.push(InliningDecisionRecord::from_decision(
            candidate.target,
            name,
            candidate.depth,
            explored,
            decision,
            candidate.relevance,
            candidate.probability,
            nodes,
        ));
    }

    fn reject(&mut self, candidate: &InliningCandidate, name: &str, rule: InliningRule, nodes: usize) {
        let decision = InliningDecision::new(false, rule, 1.0, None);
        self.record(candidate, name, false, &decision, nodes);
    }
}

/// Index of the most relevant candidate; the lower node id wins ties.
fn pick(frontier: &[InliningCandidate]) -> Option<usize> {
    frontier
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.relevance
                .total_cmp(&b.relevance)
                .then_with(|| b.invoke.cmp(&a.invoke))
        })
        .map(|(i, _)| i)
}
