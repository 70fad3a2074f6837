//! Inlining policy.
//!
//! [`GreedyInliningPolicy`] decides per call site with an ordered cascade of
//! rules; the first rule that matches decides. Size limits are scaled by an
//! inlining bonus (a per-site hint, `1.0` by default) and by the site's
//! relevance, so hot sites tolerate larger callees.

use rustc_hash::FxHashMap;

use super::callee::{CalleeGraph, InlineHint};
use crate::ir::{Graph, NodeId};

// =============================================================================
// Configuration
// =============================================================================

/// Size thresholds of the inlining policy.
#[derive(Debug, Clone, PartialEq)]
pub struct InliningConfig {
    /// Admit every candidate.
    pub inline_everything: bool,
    /// Callees below this node count (times the bonus) are always admitted.
    pub trivial_inlining_size: usize,
    /// Node budget of a fully relevant site (times the bonus).
    pub maximum_inlining_size: usize,
    /// Reject callees whose previous low-level compilation was larger than
    /// this (times the bonus). `0` disables the rule.
    pub small_compiled_low_level_graph_size: usize,
    /// Reject explored callees that make more calls per execution than this
    /// (times the bonus). `0.0` disables the rule.
    pub limit_inlined_invokes: f64,
    /// Inlining stops once the caller graph reaches this size.
    pub maximum_desired_size: usize,
    /// How many times one method may appear in an inlining chain.
    pub maximum_recursive_inlining: usize,
    pub max_inlining_depth: usize,
    /// Upper bound of the relevance used to scale the budget.
    pub relevance_cap: f64,
    /// Relevance multiplier per enclosing loop.
    pub loop_relevance_factor: f64,
}

impl Default for InliningConfig {
    fn default() -> Self {
        InliningConfig {
            inline_everything: false,
            trivial_inlining_size: 10,
            maximum_inlining_size: 300,
            small_compiled_low_level_graph_size: 300,
            limit_inlined_invokes: 5.0,
            maximum_desired_size: 20000,
            maximum_recursive_inlining: 5,
            max_inlining_depth: 10,
            relevance_cap: 1.0,
            loop_relevance_factor: 10.0,
        }
    }
}

impl InliningConfig {
    /// Smaller budgets for faster compiles.
    pub fn conservative() -> Self {
        InliningConfig {
            trivial_inlining_size: 6,
            maximum_inlining_size: 100,
            maximum_desired_size: 5000,
            maximum_recursive_inlining: 2,
            max_inlining_depth: 4,
            ..Self::default()
        }
    }

    /// Larger budgets for peak performance.
    pub fn aggressive() -> Self {
        InliningConfig {
            trivial_inlining_size: 20,
            maximum_inlining_size: 600,
            small_compiled_low_level_graph_size: 1000,
            limit_inlined_invokes: 10.0,
            maximum_desired_size: 50000,
            max_inlining_depth: 16,
            relevance_cap: 2.0,
            ..Self::default()
        }
    }

    /// `probability × loop_relevance_factor^loop_depth`.
    pub fn relevance(&self, probability: f64, loop_depth: u32) -> f64 {
        probability * self.loop_relevance_factor.powi(loop_depth as i32)
    }

    /// Node budget of a site with the given relevance.
    pub fn compute_maximum_size(&self, relevance: f64, configured: f64) -> f64 {
        configured * self.relevance_cap.min(relevance)
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// The rule that decided a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InliningRule {
    InlineEverything,
    Intrinsic,
    ForcedInlining,
    NeverInline,
    TooLargeLowLevelGraph,
    Trivial,
    InvokeProbabilityTooHigh,
    RelevanceBased,
    CalleeNotFound,
    RecursionLimit,
    DepthLimit,
    AssumptionsNotAllowed,
    MaximumDesiredSize,
}

impl InliningRule {
    pub const fn description(self) -> &'static str {
        match self {
            InliningRule::InlineEverything => "inline everything",
            InliningRule::Intrinsic => "intrinsic",
            InliningRule::ForcedInlining => "forced inlining",
            InliningRule::NeverInline => "never inline",
            InliningRule::TooLargeLowLevelGraph => "too large previous low-level graph",
            InliningRule::Trivial => "trivial",
            InliningRule::InvokeProbabilityTooHigh => "callee invoke probability is too high",
            InliningRule::RelevanceBased => "relevance-based",
            InliningRule::CalleeNotFound => "callee not found",
            InliningRule::RecursionLimit => "recursive inlining limit exceeded",
            InliningRule::DepthLimit => "inlining depth limit exceeded",
            InliningRule::AssumptionsNotAllowed => "callee assumptions not allowed in caller",
            InliningRule::MaximumDesiredSize => "inlining is cut off by maximum desired size",
        }
    }
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InliningDecision {
    pub inline: bool,
    pub rule: InliningRule,
    pub bonus: f64,
    /// The rule-specific quantity compared against its limit (low-level
    /// size, invoke probability or node budget), if the rule has one.
    pub value: Option<f64>,
}

impl InliningDecision {
    pub const fn new(inline: bool, rule: InliningRule, bonus: f64, value: Option<f64>) -> Self {
        InliningDecision {
            inline,
            rule,
            bonus,
            value,
        }
    }
}

/// A call site under evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub invoke: NodeId,
    pub callee: &'a CalleeGraph,
    /// Node count of the callee as it would be inlined.
    pub nodes: usize,
    /// Expected calls per execution of the callee.
    pub invoke_probability: f64,
    pub probability: f64,
    pub relevance: f64,
}

// =============================================================================
// Policy
// =============================================================================

/// Decides which call sites get inlined.
pub trait InliningPolicy {
    /// Whether inlining into `graph` may go on at all.
    fn continue_inlining(&self, graph: &Graph) -> bool;

    /// Whether `invocation` is worth inlining. `fully_processed` is set once
    /// the callee has been explored, which enables rules that look at its
    /// body.
    fn is_worth_inlining(&self, invocation: &Invocation<'_>, depth: usize, fully_processed: bool) -> InliningDecision;

    fn config(&self) -> &InliningConfig;
}

/// Greedy size-and-relevance policy.
#[derive(Debug, Clone, Default)]
pub struct GreedyInliningPolicy {
    config: InliningConfig,
    hints: FxHashMap<NodeId, f64>,
}

impl GreedyInliningPolicy {
    pub fn new(config: InliningConfig) -> Self {
        GreedyInliningPolicy {
            config,
            hints: FxHashMap::default(),
        }
    }

    /// Per-invoke inlining bonuses.
    pub fn with_hints(mut self, hints: FxHashMap<NodeId, f64>) -> Self {
        self.hints = hints;
        self
    }

    fn inlining_bonus(&self, invoke: NodeId) -> f64 {
        self.hints.get(&invoke).copied().unwrap_or(1.0)
    }
}

impl InliningPolicy for GreedyInliningPolicy {
    fn continue_inlining(&self, graph: &Graph) -> bool {
        graph.live_node_count() < self.config.maximum_desired_size
    }

    fn is_worth_inlining(&self, inv: &Invocation<'_>, _depth: usize, fully_processed: bool) -> InliningDecision {
        let config = &self.config;
        let bonus = self.inlining_bonus(inv.invoke);
        let admit = |rule, value| InliningDecision::new(true, rule, bonus, value);
        let reject = |rule, value| InliningDecision::new(false, rule, bonus, value);

        if config.inline_everything {
            return admit(InliningRule::InlineEverything, None);
        }
        if inv.callee.intrinsic {
            return admit(InliningRule::Intrinsic, None);
        }
        match inv.callee.hint {
            InlineHint::Always => return admit(InliningRule::ForcedInlining, None),
            InlineHint::Never => return reject(InliningRule::NeverInline, None),
            InlineHint::Default => {}
        }

        let nodes = inv.nodes as f64;
        let low_level = inv.callee.compiled_size.unwrap_or(0) as f64;
        let small_low_level = config.small_compiled_low_level_graph_size as f64;
        if small_low_level > 0.0 && low_level > small_low_level * bonus {
            return reject(InliningRule::TooLargeLowLevelGraph, Some(low_level));
        }

        if nodes < config.trivial_inlining_size as f64 * bonus {
            return admit(InliningRule::Trivial, None);
        }

        if config.limit_inlined_invokes > 0.0
            && fully_processed
            && inv.invoke_probability > config.limit_inlined_invokes * bonus
        {
            return reject(InliningRule::InvokeProbabilityTooHigh, Some(inv.invoke_probability));
        }

        // The budget is truncated to whole nodes before relevance scaling.
        let configured = (config.maximum_inlining_size as f64 * bonus).trunc();
        let maximum = config.compute_maximum_size(inv.relevance, configured);
        if nodes <= maximum {
            admit(InliningRule::RelevanceBased, Some(maximum))
        } else {
            reject(InliningRule::RelevanceBased, Some(maximum))
        }
    }

    fn config(&self) -> &InliningConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Graph, Id};
    use crate::types::MethodId;

    fn callee() -> CalleeGraph {
        CalleeGraph::new(Graph::new(MethodId::new(1), "callee"))
    }

    fn invocation(callee: &CalleeGraph, nodes: usize, relevance: f64) -> Invocation<'_> {
        Invocation {
            invoke: Id::new(5),
            callee,
            nodes,
            invoke_probability: 0.0,
            probability: relevance,
            relevance,
        }
    }

    #[test]
    fn test_trivial_callee_always_admitted() {
        let policy = GreedyInliningPolicy::default();
        let c = callee();
        let d = policy.is_worth_inlining(&invocation(&c, 9, 0.0), 1, false);
        assert!(d.inline);
        assert_eq!(d.rule, InliningRule::Trivial);
    }

    #[test]
    fn test_forced_beats_size_limits() {
        let policy = GreedyInliningPolicy::default();
        let c = callee().with_hint(InlineHint::Always).with_compiled_size(100_000);
        let d = policy.is_worth_inlining(&invocation(&c, 100_000, 0.0), 1, true);
        assert!(d.inline);
        assert_eq!(d.rule, InliningRule::ForcedInlining);
    }

    #[test]
    fn test_large_low_level_graph_rejected() {
        let policy = GreedyInliningPolicy::default();
        let c = callee().with_compiled_size(301);
        let d = policy.is_worth_inlining(&invocation(&c, 5, 1.0), 1, false);
        assert!(!d.inline);
        assert_eq!(d.rule, InliningRule::TooLargeLowLevelGraph);
    }

    #[test]
    fn test_invoke_density_only_checked_when_explored() {
        let policy = GreedyInliningPolicy::default();
        let c = callee();
        let mut inv = invocation(&c, 50, 1.0);
        inv.invoke_probability = 6.0;
        assert!(policy.is_worth_inlining(&inv, 1, false).inline);
        let d = policy.is_worth_inlining(&inv, 1, true);
        assert!(!d.inline);
        assert_eq!(d.rule, InliningRule::InvokeProbabilityTooHigh);
    }

    #[test]
    fn test_relevance_scales_budget() {
        let policy = GreedyInliningPolicy::default();
        let c = callee();
        assert!(policy.is_worth_inlining(&invocation(&c, 150, 0.5), 1, true).inline);
        let d = policy.is_worth_inlining(&invocation(&c, 151, 0.5), 1, true);
        assert!(!d.inline);
        assert_eq!(d.value, Some(150.0));
        // Relevance above the cap does not grow the budget.
        assert!(!policy.is_worth_inlining(&invocation(&c, 301, 50.0), 1, true).inline);
    }

    #[test]
    fn test_hint_bonus_scales_thresholds() {
        let mut hints = FxHashMap::default();
        hints.insert(Id::new(5), 2.0);
        let policy = GreedyInliningPolicy::default().with_hints(hints);
        let c = callee();
        let d = policy.is_worth_inlining(&invocation(&c, 19, 0.0), 1, false);
        assert_eq!(d.rule, InliningRule::Trivial);
        assert_eq!(d.bonus, 2.0);
    }

    #[test]
    fn test_relevance_grows_with_loop_depth() {
        let config = InliningConfig::default();
        assert_eq!(config.relevance(0.5, 0), 0.5);
        assert_eq!(config.relevance(0.5, 2), 50.0);
    }
}
