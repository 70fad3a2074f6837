//! Guard rules.
//!
//! A guard whose condition is known to hold disappears and its dependents
//! are re-anchored at the start node. A fixed guard known to fail turns the
//! rest of its block into a deoptimization. Negated conditions are folded
//! into the guard's `negated` flag.

use super::Canonical;
use crate::deopt::DeoptSignal;
use crate::ir::{Graph, NodeId, NodeKind};
use crate::stamp::TriState;

pub(super) fn canonical(graph: &mut Graph, id: NodeId) -> Canonical {
    let kind = graph.kind(id).clone();
    let condition = graph.inputs(id)[0];
    let negated = match kind {
        NodeKind::Guard { negated, .. } | NodeKind::FixedGuard { negated, .. } => negated,
        _ => return Canonical::Keep,
    };

    if let NodeKind::LogicNot = graph.kind(condition) {
        let inner = graph.inputs(condition)[0];
        graph.set_kind(id, flip(kind));
        graph.replace_input(id, 0, inner);
        return Canonical::Changed;
    }

    match (graph.stamp(condition).as_logic().negate_if(negated), kind) {
        (TriState::True, NodeKind::Guard { .. }) => Canonical::Replace(graph.start()),
        (TriState::True, NodeKind::FixedGuard { .. }) => Canonical::Remove,
        (
            TriState::False,
            NodeKind::FixedGuard {
                reason,
                action,
                speculation,
                ..
            },
        ) => Canonical::Deoptimize(DeoptSignal::new(reason, action, speculation)),
        // A floating guard that always fails stays until it is fixed in
        // place; there is no block to cut yet.
        _ => Canonical::Keep,
    }
}

fn flip(kind: NodeKind) -> NodeKind {
    match kind {
        NodeKind::Guard {
            reason,
            action,
            speculation,
            negated,
        } => NodeKind::Guard {
            reason,
            action,
            speculation,
            negated: !negated,
        },
        NodeKind::FixedGuard {
            reason,
            action,
            speculation,
            negated,
        } => NodeKind::FixedGuard {
            reason,
            action,
            speculation,
            negated: !negated,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use crate::canon::canonicalize;
    use crate::deopt::{DeoptAction, DeoptReason};
    use crate::ir::{CompareOp, GraphBuilder, NodeKind};
    use crate::stamp::{IntegerStamp, ObjectStamp, Stamp};
    use crate::types::{MethodId, TypeHierarchy};

    #[test]
    fn test_satisfied_fixed_guard_is_removed() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "guard", &types);
        let x = b.parameter(0, Stamp::Integer(IntegerStamp::range(32, 0, 9)));
        let ten = b.int(10);
        let in_range = b.compare(CompareOp::LessThan, x, ten);
        b.fixed_guard(in_range, DeoptReason::BoundsCheckException, DeoptAction::InvalidateReprofile, false);
        b.ret(Some(x));
        let mut g = b.finish().expect("valid");

        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.count(|k| matches!(k, NodeKind::FixedGuard { .. })), 0);
        assert_eq!(g.next(g.start()), Some(g.returns()[0]));
    }

    #[test]
    fn test_failing_fixed_guard_deoptimizes() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "guard", &types);
        let x = b.parameter(0, Stamp::Integer(IntegerStamp::range(32, 20, 30)));
        let ten = b.int(10);
        let in_range = b.compare(CompareOp::LessThan, x, ten);
        b.fixed_guard(in_range, DeoptReason::BoundsCheckException, DeoptAction::InvalidateReprofile, false);
        b.ret(Some(x));
        let mut g = b.finish().expect("valid");

        canonicalize(&mut g, &types).expect("converges");
        assert!(g.returns().is_empty());
        let sink = g.next(g.start()).expect("chain");
        assert!(matches!(
            g.kind(sink),
            NodeKind::Deoptimize {
                reason: DeoptReason::BoundsCheckException,
                ..
            }
        ));
        g.verify().expect("valid");
    }

    #[test]
    fn test_negated_condition_flips_guard() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "guard", &types);
        let o = b.parameter(0, Stamp::Object(ObjectStamp::unrestricted()));
        let is_null = b.is_null(o);
        let not_null = b.not(is_null);
        let guard = b.guard(not_null, DeoptReason::NullCheckException, DeoptAction::InvalidateReprofile, false);
        let narrowed = b.guarded_value(o, ObjectStamp::declared_non_null(TypeHierarchy::ROOT), Some(guard));
        b.ret(Some(narrowed));
        let mut g = b.finish().expect("valid");

        canonicalize(&mut g, &types).expect("converges");
        let guard = g.find_all(|k| matches!(k, NodeKind::Guard { .. }))[0];
        assert!(matches!(g.kind(guard), NodeKind::Guard { negated: true, .. }));
        assert_eq!(g.inputs(guard)[0], is_null);
        assert_eq!(g.count(|k| matches!(k, NodeKind::LogicNot)), 0);
    }
}
