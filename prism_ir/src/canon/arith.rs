//! Integer arithmetic rules.

use super::{Canonical, CanonicalizerTool};
use crate::ir::{BinaryOp, CompareOp, Constant, Graph, NodeId, NodeKind};
use crate::stamp::{binary_constant, div_constant, mask, rem_constant};

fn int_constant(graph: &Graph, id: NodeId) -> Option<i64> {
    match graph.kind(id) {
        NodeKind::Constant(Constant::Int { value, .. }) => Some(*value),
        _ => None,
    }
}

fn bits_of(graph: &Graph, id: NodeId) -> u8 {
    graph.stamp(id).as_integer().map_or(32, |s| s.bits())
}

/// Commutative inputs are ordered constant-last, then by ascending id.
fn should_swap(graph: &Graph, x: NodeId, y: NodeId) -> bool {
    let x_const = matches!(graph.kind(x), NodeKind::Constant(_));
    let y_const = matches!(graph.kind(y), NodeKind::Constant(_));
    match (x_const, y_const) {
        (true, false) => true,
        (false, true) => false,
        _ => x > y,
    }
}

pub(super) fn canonical(graph: &mut Graph, tool: &CanonicalizerTool<'_>, id: NodeId) -> Canonical {
    match graph.kind(id).clone() {
        NodeKind::Binary(op) => binary(graph, tool, id, op),
        NodeKind::Negate => negate(graph, id),
        NodeKind::Compare(op) => compare(graph, id, op),
        _ => Canonical::Keep,
    }
}

fn binary(graph: &mut Graph, tool: &CanonicalizerTool<'_>, id: NodeId, op: BinaryOp) -> Canonical {
    let (x, y) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    let bits = bits_of(graph, id);

    if let (Some(a), Some(b)) = (int_constant(graph, x), int_constant(graph, y)) {
        return Canonical::Replace(graph.int_constant(bits, binary_constant(op, bits, a, b)));
    }
    if op.is_commutative() && should_swap(graph, x, y) {
        graph.swap_inputs(id);
        return Canonical::Changed;
    }

    let all_ones = mask(bits) as i64;
    if x == y {
        return match op {
            BinaryOp::Sub | BinaryOp::Xor => Canonical::Replace(graph.int_constant(bits, 0)),
            BinaryOp::And | BinaryOp::Or => Canonical::Replace(x),
            _ => Canonical::Keep,
        };
    }

    let Some(c) = int_constant(graph, y) else {
        return Canonical::Keep;
    };
    let c_bits = (c as u64) & mask(bits);
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Or | BinaryOp::Xor if c == 0 => Canonical::Replace(x),
        BinaryOp::Sub => {
            // x - c  =>  x + (-c)
            let negated = graph.int_constant(bits, binary_constant(BinaryOp::Sub, bits, 0, c));
            let add = graph.unique(NodeKind::Binary(BinaryOp::Add), &[x, negated], tool.types);
            Canonical::Replace(add)
        }
        BinaryOp::Mul if c == 1 => Canonical::Replace(x),
        BinaryOp::Mul | BinaryOp::And if c == 0 => Canonical::Replace(y),
        BinaryOp::Mul if c_bits == mask(bits) => {
            let neg = graph.unique(NodeKind::Negate, &[x], tool.types);
            Canonical::Replace(neg)
        }
        BinaryOp::And if c_bits == mask(bits) => Canonical::Replace(x),
        BinaryOp::And => {
            // Masking off bits that are already clear changes nothing.
            let may = graph.stamp(x).as_integer().map_or(mask(bits), |s| s.may_be_set());
            if may & !c_bits & mask(bits) == 0 {
                Canonical::Replace(x)
            } else {
                Canonical::Keep
            }
        }
        BinaryOp::Or if c_bits == mask(bits) => Canonical::Replace(graph.int_constant(bits, all_ones)),
        _ => Canonical::Keep,
    }
}

fn negate(graph: &mut Graph, id: NodeId) -> Canonical {
    let x = graph.inputs(id)[0];
    let bits = bits_of(graph, id);
    if let Some(a) = int_constant(graph, x) {
        return Canonical::Replace(graph.int_constant(bits, binary_constant(BinaryOp::Sub, bits, 0, a)));
    }
    match graph.kind(x) {
        NodeKind::Negate => Canonical::Replace(graph.inputs(x)[0]),
        _ => Canonical::Keep,
    }
}

fn compare(graph: &mut Graph, id: NodeId, op: CompareOp) -> Canonical {
    let (x, y) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    if x == y {
        return Canonical::Replace(graph.constant(Constant::Bool(op == CompareOp::Equals)));
    }
    if let (Some(a), Some(b)) = (int_constant(graph, x), int_constant(graph, y)) {
        let result = match op {
            CompareOp::Equals => a == b,
            CompareOp::LessThan => a < b,
        };
        return Canonical::Replace(graph.constant(Constant::Bool(result)));
    }
    if op.is_commutative() && should_swap(graph, x, y) {
        graph.swap_inputs(id);
        return Canonical::Changed;
    }
    Canonical::Keep
}

/// Rules for the trapping division and remainder nodes.
///
/// A divisor that may be zero is never folded away: the node stays and
/// traps at run time.
pub(super) fn canonical_division(graph: &mut Graph, id: NodeId) -> Canonical {
    let (x, y) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    let bits = bits_of(graph, id);
    let is_rem = matches!(graph.kind(id), NodeKind::IntegerRem);
    let divisor = int_constant(graph, y);

    if let (Some(a), Some(b)) = (int_constant(graph, x), divisor) {
        let folded = if is_rem {
            rem_constant(bits, a, b)
        } else {
            div_constant(bits, a, b)
        };
        return match folded {
            Some(v) => Canonical::Replace(graph.int_constant(bits, v)),
            None => Canonical::Keep,
        };
    }

    let Some(c) = divisor else {
        return Canonical::Keep;
    };
    if is_rem {
        if c == 1 || c == -1 {
            return Canonical::Replace(graph.int_constant(bits, 0));
        }
        let dividend_non_negative = graph.stamp(x).as_integer().is_some_and(|s| s.is_non_negative());
        if c > 0 && (c & (c - 1)) == 0 && dividend_non_negative {
            let low_bits = graph.int_constant(bits, c - 1);
            let stamp = graph.stamp(id).clone();
            let and = graph.add_node(NodeKind::Binary(BinaryOp::And), &[x, low_bits], stamp);
            return Canonical::Replace(and);
        }
    } else {
        match c {
            1 => return Canonical::Replace(x),
            -1 => {
                let stamp = graph.stamp(id).clone();
                let neg = graph.add_node(NodeKind::Negate, &[x], stamp);
                return Canonical::Replace(neg);
            }
            _ => {}
        }
    }
    Canonical::Keep
}

#[cfg(test)]
mod tests {
    use crate::canon::canonicalize;
    use crate::ir::{BinaryOp, Constant, GraphBuilder, NodeKind};
    use crate::stamp::{IntegerStamp, Stamp};
    use crate::types::{MethodId, TypeHierarchy};

    fn rem_graph(types: &TypeHierarchy, dividend: Stamp, divisor: i32) -> crate::ir::Graph {
        let mut b = GraphBuilder::new(MethodId::new(0), "rem", types);
        let x = b.parameter(0, dividend);
        let c = b.int(divisor);
        let r = b.rem(x, c);
        b.ret(Some(r));
        b.finish().expect("valid")
    }

    #[test]
    fn test_rem_by_one_is_zero() {
        let types = TypeHierarchy::new();
        for divisor in [1, -1] {
            let mut g = rem_graph(&types, Stamp::int(32), divisor);
            canonicalize(&mut g, &types).expect("converges");
            let ret = g.returns()[0];
            let value = g.inputs(ret)[0];
            assert_eq!(g.kind(value), &NodeKind::Constant(Constant::int(0)));
            assert_eq!(g.count(|k| matches!(k, NodeKind::IntegerRem)), 0);
        }
    }

    #[test]
    fn test_rem_by_power_of_two_becomes_mask() {
        let types = TypeHierarchy::new();
        let mut g = rem_graph(&types, Stamp::Integer(IntegerStamp::range(32, 0, 1000)), 8);
        canonicalize(&mut g, &types).expect("converges");
        let value = g.inputs(g.returns()[0])[0];
        assert_eq!(g.kind(value), &NodeKind::Binary(BinaryOp::And));
        let mask = g.inputs(value)[1];
        assert_eq!(g.kind(mask), &NodeKind::Constant(Constant::int(7)));
        g.verify().expect("valid");
    }

    #[test]
    fn test_rem_with_signed_dividend_is_kept() {
        let types = TypeHierarchy::new();
        let mut g = rem_graph(&types, Stamp::int(32), 8);
        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.count(|k| matches!(k, NodeKind::IntegerRem)), 1);
    }

    #[test]
    fn test_rem_by_constant_zero_stays_trapping() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "trap", &types);
        let x = b.int(7);
        let zero = b.int(0);
        let r = b.rem(x, zero);
        b.ret(Some(r));
        let mut g = b.finish().expect("valid");
        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.count(|k| matches!(k, NodeKind::IntegerRem)), 1);
        assert!(g.may_deoptimize(r));
    }

    #[test]
    fn test_add_zero_and_commuted_constant() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "add", &types);
        let x = b.parameter(0, Stamp::int(32));
        let zero = b.int(0);
        let sum = b.add(zero, x);
        b.ret(Some(sum));
        let mut g = b.finish().expect("valid");
        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.inputs(g.returns()[0]), &[x]);
    }

    #[test]
    fn test_double_negation() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "neg", &types);
        let x = b.parameter(0, Stamp::int(64));
        let n = b.negate(x);
        let nn = b.negate(n);
        b.ret(Some(nn));
        let mut g = b.finish().expect("valid");
        canonicalize(&mut g, &types).expect("converges");
        assert_eq!(g.inputs(g.returns()[0]), &[x]);
        assert_eq!(g.count(|k| matches!(k, NodeKind::Negate)), 0);
    }
}
