//! Logic rules: negation and short-circuit disjunction.

use super::{Canonical, CanonicalizerTool};
use crate::ir::{Constant, Graph, NodeId, NodeKind};
use crate::stamp::TriState;

pub(super) fn canonical(graph: &mut Graph, tool: &CanonicalizerTool<'_>, id: NodeId) -> Canonical {
    match *graph.kind(id) {
        NodeKind::LogicNot => {
            let c = graph.inputs(id)[0];
            match graph.kind(c) {
                NodeKind::LogicNot => Canonical::Replace(graph.inputs(c)[0]),
                _ => Canonical::Keep,
            }
        }
        NodeKind::ShortCircuitOr { x_negated, y_negated } => short_circuit_or(graph, tool, id, x_negated, y_negated),
        _ => Canonical::Keep,
    }
}

/// `x` (negated if `negated`) as a standalone condition node.
fn maybe_negate(graph: &mut Graph, tool: &CanonicalizerTool<'_>, x: NodeId, negated: bool) -> NodeId {
    if negated {
        graph.unique(NodeKind::LogicNot, &[x], tool.types)
    } else {
        x
    }
}

fn short_circuit_or(
    graph: &mut Graph,
    tool: &CanonicalizerTool<'_>,
    id: NodeId,
    x_negated: bool,
    y_negated: bool,
) -> Canonical {
    let (x, y) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    let x_value = graph.stamp(x).as_logic().negate_if(x_negated);
    let y_value = graph.stamp(y).as_logic().negate_if(y_negated);

    match x_value {
        TriState::True => return Canonical::Replace(graph.constant(Constant::Bool(true))),
        TriState::False => return Canonical::Replace(maybe_negate(graph, tool, y, y_negated)),
        TriState::Unknown => {}
    }
    // Both sides are side-effect free, so a constant right side decides
    // just as well as a constant left side.
    match y_value {
        TriState::True => return Canonical::Replace(graph.constant(Constant::Bool(true))),
        TriState::False => return Canonical::Replace(maybe_negate(graph, tool, x, x_negated)),
        TriState::Unknown => {}
    }

    if x == y {
        return if x_negated == y_negated {
            Canonical::Replace(maybe_negate(graph, tool, x, x_negated))
        } else {
            Canonical::Replace(graph.constant(Constant::Bool(true)))
        };
    }

    // Absorb negations into the node's flags.
    if let NodeKind::LogicNot = graph.kind(x) {
        let inner = graph.inputs(x)[0];
        graph.set_kind(
            id,
            NodeKind::ShortCircuitOr {
                x_negated: !x_negated,
                y_negated,
            },
        );
        graph.replace_input(id, 0, inner);
        return Canonical::Changed;
    }
    if let NodeKind::LogicNot = graph.kind(y) {
        let inner = graph.inputs(y)[0];
        graph.set_kind(
            id,
            NodeKind::ShortCircuitOr {
                x_negated,
                y_negated: !y_negated,
            },
        );
        graph.replace_input(id, 1, inner);
        return Canonical::Changed;
    }
    Canonical::Keep
}

#[cfg(test)]
mod tests {
    use crate::canon::canonicalize;
    use crate::ir::{CompareOp, GraphBuilder, NodeKind};
    use crate::stamp::{IntegerStamp, Stamp};
    use crate::types::{MethodId, TypeHierarchy};

    #[test]
    fn test_or_with_false_side_reduces_to_other_side() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "or", &types);
        let x = b.parameter(0, Stamp::Integer(IntegerStamp::range(32, 0, 5)));
        let y = b.parameter(1, Stamp::int(32));
        let ten = b.int(10);
        let never = b.compare(CompareOp::Equals, x, ten);
        let maybe = b.compare(CompareOp::LessThan, y, ten);
        let or = b.short_circuit_or(never, false, maybe, false);
        let (t, f) = b.branch(or);
        b.set_cursor(t);
        let one = b.int(1);
        b.ret(Some(one));
        b.set_cursor(f);
        let zero = b.int(0);
        b.ret(Some(zero));
        let mut g = b.finish().expect("valid");

        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.count(|k| matches!(k, NodeKind::ShortCircuitOr { .. })), 0);
        let split = g.find_all(|k| matches!(k, NodeKind::If))[0];
        assert_eq!(g.inputs(split), &[maybe]);
    }

    #[test]
    fn test_negations_are_absorbed() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "not", &types);
        let x = b.parameter(0, Stamp::int(32));
        let y = b.parameter(1, Stamp::int(32));
        let c1 = b.compare(CompareOp::LessThan, x, y);
        let c2 = b.compare(CompareOp::LessThan, y, x);
        let n1 = b.not(c1);
        let or = b.short_circuit_or(n1, false, c2, false);
        let (t, f) = b.branch(or);
        b.set_cursor(t);
        b.ret(None);
        b.set_cursor(f);
        b.ret(None);
        let mut g = b.finish().expect("valid");

        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.count(|k| matches!(k, NodeKind::LogicNot)), 0);
        let or = g.find_all(|k| matches!(k, NodeKind::ShortCircuitOr { .. }))[0];
        assert_eq!(
            g.kind(or),
            &NodeKind::ShortCircuitOr {
                x_negated: true,
                y_negated: false
            }
        );
        g.verify().expect("valid");
    }
}
