//! Static resolution, narrowing and lowering of type checks.

use std::sync::Arc;

use prism_ir::assume::{AssumptionTable, Assumptions};
use prism_ir::canon::canonicalize;
use prism_ir::deopt::{DeoptAction, DeoptHandler, DeoptReason, SpeculationId, SpeculationLog};
use prism_ir::inline::{CalleeGraph, CalleeRegistry, GreedyInliningPolicy, Inliner};
use prism_ir::interp::{Heap, Interpreter, Outcome, Value};
use prism_ir::ir::{Constant, Graph, GraphBuilder, NodeKind};
use prism_ir::lower::checkcast::cast_speculation;
use prism_ir::lower::{lower_type_checks, LoweringTool};
use prism_ir::profile::{ProfileTable, TypeProfile};
use prism_ir::stamp::{ObjectStamp, Stamp};
use prism_ir::types::{ClassFlags, MethodId, TypeHierarchy, TypeId, TypeResolver};

/// `Object > Shape (abstract, Drawable) > {Circle, Square > Cube}`, plus an
/// unrelated `Text` that also implements `Drawable`.
struct Universe {
    types: TypeHierarchy,
    drawable: TypeId,
    shape: TypeId,
    circle: TypeId,
    square: TypeId,
    cube: TypeId,
    text: TypeId,
}

fn universe() -> Universe {
    let types = TypeHierarchy::new();
    let drawable = types.define_interface("Drawable", &[]);
    let shape = types.define_class("Shape", TypeHierarchy::ROOT, &[drawable], ClassFlags::ABSTRACT);
    let circle = types.define_class("Circle", shape, &[], ClassFlags::FINAL);
    let square = types.define_class("Square", shape, &[], ClassFlags::empty());
    let cube = types.define_class("Cube", square, &[], ClassFlags::empty());
    let text = types.define_class("Text", TypeHierarchy::ROOT, &[drawable], ClassFlags::FINAL);
    Universe {
        types,
        drawable,
        shape,
        circle,
        square,
        cube,
        text,
    }
}

impl Universe {
    fn all(&self) -> [TypeId; 7] {
        [
            TypeHierarchy::ROOT,
            self.drawable,
            self.shape,
            self.circle,
            self.square,
            self.cube,
            self.text,
        ]
    }

    fn concrete(&self) -> [TypeId; 5] {
        [TypeHierarchy::ROOT, self.circle, self.square, self.cube, self.text]
    }
}

fn instance_test(types: &TypeHierarchy, input: ObjectStamp, ty: TypeId, allow_null: bool) -> Graph {
    let mut b = GraphBuilder::new(MethodId::new(1), "test", types);
    let obj = b.parameter(0, Stamp::Object(input));
    let test = b.instance_of(obj, ty, allow_null);
    b.ret(Some(test));
    b.finish().expect("valid graph")
}

fn returned(graph: &Graph) -> &NodeKind {
    let ret = graph.returns()[0];
    graph.kind(graph.inputs(ret)[0])
}

#[test]
fn test_assignable_input_is_constant_true() {
    let u = universe();
    for input in u.all() {
        for ty in u.all() {
            if !u.types.is_assignable_from(ty, input) {
                continue;
            }
            for allow_null in [false, true] {
                let mut g = instance_test(&u.types, ObjectStamp::declared_non_null(input), ty, allow_null);
                canonicalize(&mut g, &u.types).expect("converges");
                assert_eq!(
                    returned(&g),
                    &NodeKind::Constant(Constant::Bool(true)),
                    "{} instanceof {}",
                    u.types.name(input),
                    u.types.name(ty)
                );
            }
        }
    }
}

#[test]
fn test_nullable_assignable_input_or_null_is_true() {
    let u = universe();
    let mut g = instance_test(&u.types, ObjectStamp::declared(u.cube), u.shape, true);
    canonicalize(&mut g, &u.types).expect("converges");
    assert_eq!(returned(&g), &NodeKind::Constant(Constant::Bool(true)));

    // Without the or-null variant only the null check is left.
    let mut g = instance_test(&u.types, ObjectStamp::declared(u.cube), u.shape, false);
    canonicalize(&mut g, &u.types).expect("converges");
    assert_eq!(returned(&g), &NodeKind::LogicNot);
}

#[test]
fn test_exact_disjoint_input_reduces_to_null_check() {
    let u = universe();
    for input in u.concrete() {
        for ty in u.all() {
            if u.types.is_assignable_from(ty, input) {
                continue;
            }
            let mut g = instance_test(&u.types, ObjectStamp::exact(input), ty, true);
            canonicalize(&mut g, &u.types).expect("converges");
            assert_eq!(returned(&g), &NodeKind::IsNull, "{} vs {}", u.types.name(input), u.types.name(ty));

            let mut g = instance_test(&u.types, ObjectStamp::exact(input), ty, false);
            canonicalize(&mut g, &u.types).expect("converges");
            assert_eq!(returned(&g), &NodeKind::Constant(Constant::Bool(false)));
        }
    }
}

#[test]
fn test_undecidable_test_is_kept() {
    let u = universe();
    let mut g = instance_test(&u.types, ObjectStamp::declared(u.drawable), u.square, false);
    canonicalize(&mut g, &u.types).expect("converges");
    assert!(matches!(returned(&g), NodeKind::InstanceOf { .. }));
    assert!(g.assumptions().is_empty());
}

#[test]
fn test_removed_narrowing_preserves_behavior() {
    let u = universe();
    let build = || {
        let mut b = GraphBuilder::new(MethodId::new(2), "narrow", &u.types);
        let obj = b.parameter(0, Stamp::Object(ObjectStamp::declared_non_null(u.shape)));
        let is_null = b.is_null(obj);
        let guard = b.guard(is_null, DeoptReason::NullCheckException, DeoptAction::InvalidateReprofile, true);
        let narrowed = b.guarded_value(obj, ObjectStamp::declared_non_null(u.square), Some(guard));
        let plain = b.pi(narrowed, ObjectStamp::declared(u.shape));
        let test = b.instance_of(plain, u.cube, false);
        b.ret(Some(test));
        b.finish().expect("valid graph")
    };
    let original = build();
    let mut optimized = build();
    canonicalize(&mut optimized, &u.types).expect("converges");
    assert_eq!(optimized.count(|k| matches!(k, NodeKind::GuardedValue { .. } | NodeKind::Guard { .. })), 0);

    let mut heap = Heap::new();
    let objects = [heap.allocate(u.square), heap.allocate(u.cube)];
    let interp = Interpreter::new(&u.types, &heap);
    for obj in objects {
        let before = interp.execute(&original, &[obj]).expect("runs");
        let after = interp.execute(&optimized, &[obj]).expect("runs");
        assert!(before.is_equivalent(&after), "{obj}: {before:?} vs {after:?}");
    }
}

#[test]
fn test_lowered_instance_test_matches_unlowered() {
    let u = universe();
    for ty in [u.drawable, u.shape, u.square, u.text] {
        for allow_null in [false, true] {
            let original = instance_test(&u.types, ObjectStamp::unrestricted(), ty, allow_null);
            let mut lowered = original.clone();
            canonicalize(&mut lowered, &u.types).expect("converges");
            lower_type_checks(&mut lowered, &LoweringTool::new(&u.types)).expect("lowers");
            canonicalize(&mut lowered, &u.types).expect("converges");
            assert_eq!(lowered.count(|k| matches!(k, NodeKind::InstanceOf { .. })), 0);

            let mut heap = Heap::new();
            let mut inputs = vec![Value::Null];
            for concrete in u.concrete() {
                inputs.push(heap.allocate(concrete));
            }
            let interp = Interpreter::new(&u.types, &heap);
            for input in inputs {
                let want = interp.execute(&original, &[input]).expect("runs");
                let got = interp.execute(&lowered, &[input]).expect("runs");
                assert_eq!(want, got, "{input} instanceof {}", u.types.name(ty));
            }
        }
    }
}

fn profiled_cast(u: &Universe, profiles: &ProfileTable) -> Graph {
    let mut b = GraphBuilder::new(MethodId::new(3), "cast", &u.types).with_profiles(profiles);
    let obj = b.parameter(0, Stamp::object());
    let cast = b.check_cast(obj, u.drawable, 5);
    b.ret(Some(cast));
    b.finish().expect("valid graph")
}

#[test]
fn test_failed_cast_speculation_is_not_repeated() {
    let u = universe();
    let profiles = Arc::new(ProfileTable::new());
    profiles.set_type_profile(MethodId::new(3), 5, TypeProfile::monomorphic_of(u.circle));
    let log = Arc::new(SpeculationLog::new());
    let handler = DeoptHandler::new(Arc::clone(&log), Arc::clone(&profiles));
    let table = AssumptionTable::new();

    let mut speculative = profiled_cast(&u, &profiles);
    canonicalize(&mut speculative, &u.types).expect("converges");
    let stats = lower_type_checks(&mut speculative, &LoweringTool::new(&u.types).with_speculation_log(&log))
        .expect("lowers");
    assert_eq!(stats.casts_speculated, 1);

    let mut heap = Heap::new();
    let circle = heap.allocate(u.circle);
    let text = heap.allocate(u.text);
    let plain = heap.allocate(TypeHierarchy::ROOT);
    let interp = Interpreter::new(&u.types, &heap);
    assert_eq!(interp.execute(&speculative, &[circle]).expect("runs"), Outcome::Returned(Some(circle)));
    assert_eq!(interp.execute(&speculative, &[Value::Null]).expect("runs"), Outcome::Returned(Some(Value::Null)));

    let Outcome::Deoptimized(signal) = interp.execute(&speculative, &[text]).expect("runs") else {
        panic!("speculation on a Text receiver must deoptimize");
    };
    assert_eq!(signal.reason, DeoptReason::OptimizedTypeCheckViolated);
    assert_eq!(signal.action, DeoptAction::InvalidateRecompile);
    assert!(!signal.speculation.is_none());

    let code = table.install(MethodId::new(3), &Assumptions::new(true), &u.types).expect("installs");
    let resolution = handler.handle(&code, signal);
    assert!(resolution.invalidated);
    assert!(resolution.speculation_logged);
    assert!(resolution.recompile);
    assert!(!code.is_valid());

    let mut recompiled = profiled_cast(&u, &profiles);
    canonicalize(&mut recompiled, &u.types).expect("converges");
    let stats = lower_type_checks(&mut recompiled, &LoweringTool::new(&u.types).with_speculation_log(&log))
        .expect("lowers");
    assert_eq!(stats.casts_speculated, 0);
    assert_eq!(stats.casts_checked, 1);
    assert_eq!(interp.execute(&recompiled, &[text]).expect("runs"), Outcome::Returned(Some(text)));

    let Outcome::Deoptimized(signal) = interp.execute(&recompiled, &[plain]).expect("runs") else {
        panic!("a non-Drawable receiver must fail the cast");
    };
    assert_eq!(signal.reason, DeoptReason::ClassCastException);
}

#[test]
fn test_inlined_cast_shares_its_callee_speculation() {
    let u = universe();
    let profiles = ProfileTable::new();
    profiles.set_type_profile(MethodId::new(3), 5, TypeProfile::monomorphic_of(u.circle));
    let registry = CalleeRegistry::new();
    registry.register(CalleeGraph::new(profiled_cast(&u, &profiles)));

    let mut b = GraphBuilder::new(MethodId::new(4), "caller", &u.types);
    let x = b.parameter(0, Stamp::object());
    let r = b.invoke(MethodId::new(3), &[x], Stamp::object(), 0);
    b.ret(Some(r));
    let mut caller = b.finish().expect("valid graph");
    let policy = GreedyInliningPolicy::default();
    let mut inliner = Inliner::new(&registry, &policy, &u.types);
    assert_eq!(inliner.run(&mut caller).expect("runs").inlined, 1);

    // The cast keeps the site it was profiled at, not the caller's.
    let casts = caller.find_all(|k| matches!(k, NodeKind::CheckCast { .. }));
    assert_eq!(casts.len(), 1);
    let speculation = SpeculationId::new(MethodId::new(3), 5);
    assert_eq!(cast_speculation(&caller, casts[0]), Some(speculation));

    // A failure seen in the callee's own compiled code stops the inlined
    // copy from speculating too.
    let log = SpeculationLog::new();
    log.record_failure(speculation);
    let stats = lower_type_checks(&mut caller, &LoweringTool::new(&u.types).with_speculation_log(&log))
        .expect("lowers");
    assert_eq!(stats.casts_speculated, 0);
    assert_eq!(stats.casts_checked, 1);
}
