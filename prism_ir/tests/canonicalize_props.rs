//! Property tests for arithmetic canonicalization and the stamp lattice.

use prism_ir::canon::{canonicalize, Canonicalizer, CanonicalizerConfig};
use prism_ir::interp::{Heap, Interpreter, Value};
use prism_ir::ir::{Constant, Graph, GraphBuilder, NodeKind};
use prism_ir::stamp::{IntegerStamp, Stamp};
use prism_ir::types::{MethodId, TypeHierarchy};
use proptest::prelude::*;

fn const_rem(types: &TypeHierarchy, a: i32, b: i32) -> Graph {
    let mut builder = GraphBuilder::new(MethodId::new(0), "const_rem", types);
    let x = builder.int(a);
    let y = builder.int(b);
    let r = builder.rem(x, y);
    builder.ret(Some(r));
    builder.finish().expect("valid graph")
}

fn param_rem(types: &TypeHierarchy, dividend: IntegerStamp, divisor: i32) -> Graph {
    let mut builder = GraphBuilder::new(MethodId::new(0), "param_rem", types);
    let x = builder.parameter(0, Stamp::Integer(dividend));
    let c = builder.int(divisor);
    let r = builder.rem(x, c);
    builder.ret(Some(r));
    builder.finish().expect("valid graph")
}

fn returned(graph: &Graph) -> &NodeKind {
    let ret = graph.returns()[0];
    graph.kind(graph.inputs(ret)[0])
}

fn range() -> impl Strategy<Value = IntegerStamp> {
    (any::<i32>(), any::<i32>()).prop_map(|(a, b)| IntegerStamp::range(32, a.min(b) as i64, a.max(b) as i64))
}

proptest! {
    #[test]
    fn prop_constant_remainder_folds_to_truncating_remainder(a in any::<i32>(), b in any::<i32>()) {
        prop_assume!(b != 0);
        let types = TypeHierarchy::new();
        let mut graph = const_rem(&types, a, b);
        canonicalize(&mut graph, &types).expect("converges");
        prop_assert_eq!(returned(&graph), &NodeKind::Constant(Constant::int(a.wrapping_rem(b))));
        prop_assert_eq!(graph.count(|k| matches!(k, NodeKind::IntegerRem)), 0);
    }

    #[test]
    fn prop_remainder_by_zero_is_never_folded(a in any::<i32>()) {
        let types = TypeHierarchy::new();
        let mut graph = const_rem(&types, a, 0);
        let before = graph.shape();
        canonicalize(&mut graph, &types).expect("converges");
        prop_assert_eq!(graph.count(|k| matches!(k, NodeKind::IntegerRem)), 1);
        prop_assert_eq!(graph.shape(), before);
    }

    #[test]
    fn prop_remainder_by_unit_is_zero(stamp in range(), negative in any::<bool>()) {
        let types = TypeHierarchy::new();
        let mut graph = param_rem(&types, stamp, if negative { -1 } else { 1 });
        canonicalize(&mut graph, &types).expect("converges");
        prop_assert_eq!(returned(&graph), &NodeKind::Constant(Constant::int(0)));
    }

    #[test]
    fn prop_power_of_two_remainder_matches_direct_remainder(
        shift in 1u32..31,
        upper in 0i32..=i32::MAX,
        samples in proptest::collection::vec(0i32..=i32::MAX, 1000),
    ) {
        let types = TypeHierarchy::new();
        let divisor = 1i32 << shift;
        let mut graph = param_rem(&types, IntegerStamp::range(32, 0, upper as i64), divisor);
        canonicalize(&mut graph, &types).expect("converges");
        prop_assert_eq!(graph.count(|k| matches!(k, NodeKind::IntegerRem)), 0);

        let heap = Heap::new();
        let interp = Interpreter::new(&types, &heap);
        for x in samples {
            let x = x.min(upper);
            let got = interp.execute(&graph, &[Value::Int(x as i64)]).expect("runs").value();
            prop_assert_eq!(got, Some(Value::Int((x % divisor) as i64)));
        }
    }

    #[test]
    fn prop_seed_order_does_not_change_the_fixpoint(a in any::<i32>(), b in 1i32..64, stamp in range()) {
        let types = TypeHierarchy::new();
        let build = || {
            let mut builder = GraphBuilder::new(MethodId::new(0), "order", &types);
            let x = builder.parameter(0, Stamp::Integer(stamp));
            let ca = builder.int(a);
            let zero = builder.int(0);
            let s = builder.add(ca, x);
            let t = builder.add(s, zero);
            let cb = builder.int(b);
            let r = builder.rem(t, cb);
            builder.ret(Some(r));
            builder.finish().expect("valid graph")
        };
        let mut forward = build();
        let mut reverse = build();
        Canonicalizer::new(&types).run(&mut forward).expect("converges");
        Canonicalizer::new(&types)
            .with_config(CanonicalizerConfig::reverse())
            .run(&mut reverse)
            .expect("converges");
        prop_assert_eq!(forward.shape(), reverse.shape());
    }

    #[test]
    fn prop_meet_is_commutative_associative_idempotent(a in range(), b in range(), c in range()) {
        prop_assert_eq!(a.meet(&b), b.meet(&a));
        prop_assert_eq!(a.meet(&b).meet(&c), a.meet(&b.meet(&c)));
        prop_assert_eq!(a.meet(&a), a);
        prop_assert!(a.is_within(&a.meet(&b)));
    }

    #[test]
    fn prop_improve_with_never_widens(a in range(), b in range()) {
        let improved = a.improve_with(&b);
        prop_assert!(improved.is_within(&a));
        prop_assert!(improved.is_within(&b));
    }
}
