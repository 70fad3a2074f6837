//! Control-flow rules: constant branches, redundant phis and begins.

use super::Canonical;
use crate::ir::{Graph, NodeId, NodeKind};

pub(super) fn canonical(graph: &mut Graph, id: NodeId) -> Canonical {
    match graph.kind(id) {
        NodeKind::If => if_node(graph, id),
        NodeKind::Phi => phi(graph, id),
        NodeKind::Begin => begin(graph, id),
        _ => Canonical::Keep,
    }
}

fn if_node(graph: &mut Graph, id: NodeId) -> Canonical {
    let condition = graph.inputs(id)[0];
    if let Some(taken) = graph.stamp(condition).as_logic().to_bool() {
        return Canonical::FoldBranch(taken);
    }
    if let NodeKind::LogicNot = graph.kind(condition) {
        let inner = graph.inputs(condition)[0];
        graph.replace_input(id, 0, inner);
        graph.swap_branches(id);
        return Canonical::Changed;
    }
    Canonical::Keep
}

/// A phi whose values are all the same node (ignoring itself) is that node.
fn phi(graph: &mut Graph, id: NodeId) -> Canonical {
    let mut unique = None;
    for &value in &graph.inputs(id)[1..] {
        if value == id || Some(value) == unique {
            continue;
        }
        if unique.is_some() {
            return Canonical::Keep;
        }
        unique = Some(value);
    }
    match unique {
        Some(value) => Canonical::Replace(value),
        None => Canonical::Keep,
    }
}

fn begin(graph: &mut Graph, id: NodeId) -> Canonical {
    let after_split = graph
        .predecessor(id)
        .is_some_and(|p| matches!(graph.kind(p), NodeKind::If));
    if after_split || !graph.users(id).is_empty() {
        return Canonical::Keep;
    }
    Canonical::Remove
}

#[cfg(test)]
mod tests {
    use crate::canon::canonicalize;
    use crate::ir::{CompareOp, GraphBuilder, NodeKind};
    use crate::stamp::Stamp;
    use crate::types::{MethodId, TypeHierarchy};

    #[test]
    fn test_negated_if_swaps_arms() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "if", &types);
        let x = b.parameter(0, Stamp::int(32));
        let y = b.parameter(1, Stamp::int(32));
        let lt = b.compare(CompareOp::LessThan, x, y);
        let not = b.not(lt);
        let (t, f) = b.branch(not);
        b.set_cursor(t);
        let ret_t = b.ret(Some(x));
        b.set_cursor(f);
        let ret_f = b.ret(Some(y));
        let mut g = b.finish().expect("valid");

        canonicalize(&mut g, &types).expect("converges");
        let split = g.find_all(|k| matches!(k, NodeKind::If))[0];
        assert_eq!(g.inputs(split), &[lt]);
        let arms = g.successors(split).to_vec();
        assert_eq!(g.next(arms[0]), Some(ret_f));
        assert_eq!(g.next(arms[1]), Some(ret_t));
        g.verify().expect("valid");
    }

    #[test]
    fn test_phi_of_same_value_collapses() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "phi", &types);
        let x = b.parameter(0, Stamp::int(32));
        let c = b.parameter(1, Stamp::logic());
        let (t, f) = b.branch(c);
        b.set_cursor(t);
        let e1 = b.end();
        b.set_cursor(f);
        let e2 = b.end();
        let merge = b.merge(&[e1, e2]);
        let phi = b.phi(merge, &[x, x]);
        b.ret(Some(phi));
        let mut g = b.finish().expect("valid");

        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.count(|k| matches!(k, NodeKind::Phi)), 0);
        assert_eq!(g.inputs(g.returns()[0]), &[x]);
    }
}
