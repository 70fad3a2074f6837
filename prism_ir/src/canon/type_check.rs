//! Type-check rules: instance tests, casts and value narrowing.
//!
//! A type test against `T` on a value whose stamp says `U` is decided
//! statically where possible:
//!
//! - `U <: T`: the test passes (for non-null values),
//! - `U` and `T` provably share no instances: the test only depends on
//!   whether the value is null,
//! - `T` is a leaf type and the value is non-null: the test is a single
//!   exact type comparison.
//!
//! Failing that, the rule speculates that the hierarchy stays closed: if `U`
//! (or `T`) has exactly one concrete subtype, the test is decided under a
//! recorded leaf-concrete-subtype assumption.

use tracing::trace;

use super::{Canonical, CanonicalizerTool};
use crate::deopt::{DeoptAction, DeoptReason, DeoptSignal, SpeculationId};
use crate::ir::{Constant, Graph, NodeId, NodeKind, TypeCheckResolution};
use crate::stamp::{ObjectStamp, Stamp};
use crate::types::{TypeId, TypeResolver};

/// A cheaper equivalent of a type test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Synonym {
    /// The test has a fixed outcome.
    Value(bool),
    /// The outcome is `value == null` (`null_passes`) or `value != null`.
    NullCheck { null_passes: bool },
    /// The outcome is "non-null and runtime type is exactly this".
    ExactType(TypeId),
}

/// Decide `value instanceof ty` for a value of declared type `input`.
///
/// `allow_null` selects instance-of-or-null semantics (null passes).
pub(crate) fn find_synonym(
    types: &dyn TypeResolver,
    ty: TypeId,
    allow_null: bool,
    input: TypeId,
    non_null: bool,
    exact: bool,
) -> Option<Synonym> {
    if types.is_assignable_from(ty, input) {
        return Some(if allow_null || non_null {
            Synonym::Value(true)
        } else {
            Synonym::NullCheck { null_passes: false }
        });
    }
    // A failed subtype test on an exact type can never pass at run time.
    // For declared types it only proves disjointness when no interface could
    // be implemented by a common subclass.
    let disjoint = exact
        || (!types.is_assignable_from(input, ty)
            && (types.as_exact_type(ty).is_some() || !types.may_share_runtime_instances(input, ty)));
    if disjoint {
        return Some(if allow_null && !non_null {
            Synonym::NullCheck { null_passes: true }
        } else {
            Synonym::Value(false)
        });
    }
    if non_null && types.is_leaf(ty) {
        return Some(Synonym::ExactType(ty));
    }
    None
}

fn materialize(graph: &mut Graph, tool: &CanonicalizerTool<'_>, object: NodeId, synonym: Synonym) -> NodeId {
    match synonym {
        Synonym::Value(b) => graph.constant(Constant::Bool(b)),
        Synonym::NullCheck { null_passes } => {
            let is_null = graph.unique(NodeKind::IsNull, &[object], tool.types);
            if null_passes {
                is_null
            } else {
                graph.unique(NodeKind::LogicNot, &[is_null], tool.types)
            }
        }
        Synonym::ExactType(ty) => graph.unique(NodeKind::TypeCheck { ty }, &[object], tool.types),
    }
}

pub(super) fn canonical(graph: &mut Graph, tool: &CanonicalizerTool<'_>, id: NodeId) -> Canonical {
    match graph.kind(id).clone() {
        NodeKind::InstanceOf { ty, allow_null } => instance_of(graph, tool, id, ty, allow_null),
        NodeKind::CheckCast { ty } => check_cast(graph, tool, id, ty),
        NodeKind::CheckCastDynamic => check_cast_dynamic(graph, id),
        NodeKind::Pi { stamp } => pi(graph, tool, id, &stamp),
        NodeKind::GuardedValue { stamp } => guarded_value(graph, tool, id, &stamp),
        _ => Canonical::Keep,
    }
}

fn object_stamp(graph: &Graph, id: NodeId) -> Option<ObjectStamp> {
    graph.stamp(id).as_object().copied().filter(|s| !s.is_empty())
}

fn instance_of(graph: &mut Graph, tool: &CanonicalizerTool<'_>, id: NodeId, ty: TypeId, allow_null: bool) -> Canonical {
    let object = graph.inputs(id)[0];
    let Some(stamp) = object_stamp(graph, object) else {
        return Canonical::Keep;
    };
    if stamp.is_always_null() {
        graph.resolve_type_check(id, TypeCheckResolution::ResolvedStatic);
        return Canonical::Replace(graph.constant(Constant::Bool(allow_null)));
    }

    let input = stamp.ty().unwrap_or_else(|| tool.types.root());
    let non_null = stamp.is_non_null();
    if let Some(synonym) = find_synonym(tool.types, ty, allow_null, input, non_null, stamp.is_exact()) {
        graph.resolve_type_check(id, TypeCheckResolution::ResolvedStatic);
        return Canonical::Replace(materialize(graph, tool, object, synonym));
    }

    // Speculate that the value's declared type has a single implementation.
    if !stamp.is_exact() {
        if let Some(leaf) = tool.types.find_leaf_concrete_subtype(input) {
            if tool.can_use(graph, &leaf) {
                if let Some(synonym) = find_synonym(tool.types, ty, allow_null, leaf.result(), non_null, true) {
                    tool.record(graph, &leaf);
                    let resolution = if leaf.is_assumption_free() {
                        TypeCheckResolution::ResolvedStatic
                    } else {
                        TypeCheckResolution::ResolvedSpeculative
                    };
                    graph.resolve_type_check(id, resolution);
                    let sub = leaf.result();
                    trace!(node = %id, leaf = %sub, "instance test decided by leaf subtype of input");
                    return Canonical::Replace(materialize(graph, tool, object, synonym));
                }
            }
        }
    }

    // Speculate that the tested type has a single implementation.
    if non_null {
        if let Some(leaf) = tool.types.find_leaf_concrete_subtype(ty) {
            if !leaf.is_assumption_free() && tool.can_use(graph, &leaf) {
                tool.record(graph, &leaf);
                graph.resolve_type_check(id, TypeCheckResolution::ResolvedSpeculative);
                let sub = leaf.result();
                trace!(node = %id, leaf = %sub, "instance test decided by leaf subtype of tested type");
                return Canonical::Replace(materialize(graph, tool, object, Synonym::ExactType(sub)));
            }
        }
    }
    Canonical::Keep
}

fn class_cast_failure() -> DeoptSignal {
    DeoptSignal::new(
        DeoptReason::ClassCastException,
        DeoptAction::InvalidateReprofile,
        SpeculationId::NONE,
    )
}

fn check_cast(graph: &mut Graph, tool: &CanonicalizerTool<'_>, id: NodeId, ty: TypeId) -> Canonical {
    let object = graph.inputs(id)[0];
    let Some(stamp) = object_stamp(graph, object) else {
        return Canonical::Keep;
    };
    if stamp.is_always_null() {
        graph.resolve_type_check(id, TypeCheckResolution::ResolvedStatic);
        return Canonical::Replace(object);
    }
    let input = stamp.ty().unwrap_or_else(|| tool.types.root());
    // Casts let null through, which is instance-of-or-null.
    match find_synonym(tool.types, ty, true, input, stamp.is_non_null(), stamp.is_exact()) {
        Some(Synonym::Value(true)) => {
            graph.resolve_type_check(id, TypeCheckResolution::ResolvedStatic);
            return Canonical::Replace(object);
        }
        Some(Synonym::Value(false)) => {
            graph.resolve_type_check(id, TypeCheckResolution::ResolvedStatic);
            return Canonical::Deoptimize(class_cast_failure());
        }
        _ => {}
    }

    if !stamp.is_exact() {
        if let Some(leaf) = tool.types.find_leaf_concrete_subtype(input) {
            let sub = leaf.result();
            if !leaf.is_assumption_free() && tool.types.is_assignable_from(ty, sub) && tool.can_use(graph, &leaf) {
                tool.record(graph, &leaf);
                graph.resolve_type_check(id, TypeCheckResolution::ResolvedSpeculative);
                let narrowed = graph.unique(
                    NodeKind::Pi {
                        stamp: Stamp::Object(ObjectStamp::declared(ty)),
                    },
                    &[object],
                    tool.types,
                );
                return Canonical::Replace(narrowed);
            }
        }
    }
    Canonical::Keep
}

/// A dynamic cast whose hub became a constant is an ordinary cast.
fn check_cast_dynamic(graph: &mut Graph, id: NodeId) -> Canonical {
    let (hub, object) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    let NodeKind::Constant(Constant::Hub(ty)) = *graph.kind(hub) else {
        return Canonical::Keep;
    };
    let stamp = graph.stamp(id).clone();
    let cast = graph.add_node(NodeKind::CheckCast { ty }, &[object], stamp);
    graph.replace_fixed(id, cast);
    graph.transfer_type_check(id, cast);
    Canonical::Changed
}

fn pi(graph: &mut Graph, tool: &CanonicalizerTool<'_>, id: NodeId, stamp: &Stamp) -> Canonical {
    let object = graph.inputs(id)[0];
    if graph.stamp(object).is_within(stamp, tool.types) {
        return Canonical::Replace(object);
    }
    Canonical::Keep
}

/// A guarded value whose guard is gone (or always holds) is just its
/// input, or a `Pi` if the refinement still says more than the input does.
fn guarded_value(graph: &mut Graph, tool: &CanonicalizerTool<'_>, id: NodeId, stamp: &Stamp) -> Canonical {
    let object = graph.inputs(id)[0];
    let guard_gone = match graph.input(id, 1) {
        None => true,
        Some(g) => matches!(graph.kind(g), NodeKind::Start),
    };
    if !guard_gone {
        return Canonical::Keep;
    }
    if graph.stamp(object).is_within(stamp, tool.types) {
        return Canonical::Replace(object);
    }
    let pi = graph.unique(NodeKind::Pi { stamp: stamp.clone() }, &[object], tool.types);
    Canonical::Replace(pi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassFlags, TypeHierarchy};

    #[test]
    fn test_assignable_input_passes() {
        let types = TypeHierarchy::new();
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let b = types.define_class("B", a, &[], ClassFlags::empty());
        assert_eq!(find_synonym(&types, a, false, b, true, false), Some(Synonym::Value(true)));
        assert_eq!(
            find_synonym(&types, a, false, b, false, false),
            Some(Synonym::NullCheck { null_passes: false })
        );
    }

    #[test]
    fn test_exact_disjoint_is_null_check() {
        let types = TypeHierarchy::new();
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let b = types.define_class("B", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        assert_eq!(find_synonym(&types, a, false, b, false, true), Some(Synonym::Value(false)));
        assert_eq!(
            find_synonym(&types, a, true, b, false, true),
            Some(Synonym::NullCheck { null_passes: true })
        );
    }

    #[test]
    fn test_interfaces_block_disjointness() {
        let types = TypeHierarchy::new();
        let i = types.define_interface("I", &[]);
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let c = types.define_class("C", a, &[i], ClassFlags::empty());
        let _ = c;
        assert_eq!(find_synonym(&types, i, false, a, true, false), None);

        let ia = types.array_of(i);
        let aa = types.array_of(a);
        assert_eq!(find_synonym(&types, ia, false, aa, true, false), None);
    }

    #[test]
    fn test_unrelated_classes_are_disjoint() {
        let types = TypeHierarchy::new();
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let b = types.define_class("B", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        assert_eq!(find_synonym(&types, a, false, b, true, false), Some(Synonym::Value(false)));
    }

    #[test]
    fn test_leaf_type_becomes_exact_check() {
        let types = TypeHierarchy::new();
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::ABSTRACT);
        let f = types.define_class("F", a, &[], ClassFlags::FINAL);
        assert_eq!(find_synonym(&types, f, false, a, true, false), Some(Synonym::ExactType(f)));
        assert_eq!(find_synonym(&types, f, false, a, false, false), None);
    }
}
