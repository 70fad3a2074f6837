//! Checked-cast lowering.
//!
//! A cast `(T) x` lets null through and deoptimizes on any other value that
//! is not a `T`. Two shapes are emitted:
//!
//! ```text
//! profiled, monomorphic C <: T:   FixedGuard(x == null || exact(x) == C)   OptimizedTypeCheckViolated / InvalidateRecompile
//! otherwise:                      FixedGuard(x == null || T :> hub(x))     ClassCastException / InvalidateReprofile
//! ```
//!
//! followed by a `GuardedValue` anchored on the guard, which every user of
//! the cast now reads. The speculative shape carries a [`SpeculationId`] so
//! that a failure is remembered and the next compilation emits the full
//! test instead.

use tracing::debug;

use super::{subtype_test, LoweringTool};
use crate::deopt::{DeoptAction, DeoptReason, SpeculationId};
use crate::ir::{Graph, NodeId, NodeKind, TypeCheckResolution};
use crate::stamp::{ObjectStamp, Stamp};
use crate::types::TypeId;

/// How a cast was lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastLowering {
    /// Exact type guard on the single profiled receiver type.
    Speculated { ty: TypeId, speculation: SpeculationId },
    /// Full subtype test.
    Checked,
}

/// The speculation id of the profile-based guard for `cast`: the bytecode
/// position its profile was collected at, so it is stable across
/// compilations and inlining contexts. `None` for unprofiled casts.
pub fn cast_speculation(graph: &Graph, cast: NodeId) -> Option<SpeculationId> {
    graph
        .type_profile_site(cast)
        .map(|site| SpeculationId::new(site.method, site.bci))
}

/// Replace the `CheckCast`/`CheckCastDynamic` node `cast` by a guard and a
/// guarded value.
pub fn lower_check_cast(graph: &mut Graph, tool: &LoweringTool<'_>, cast: NodeId) -> CastLowering {
    let (object, hub, target) = match *graph.kind(cast) {
        NodeKind::CheckCast { ty } => (graph.inputs(cast)[0], None, Some(ty)),
        _ => (graph.inputs(cast)[1], Some(graph.inputs(cast)[0]), None),
    };

    let profiled = target.and_then(|ty| {
        let profile = graph.type_profile(cast)?;
        let seen = profile.monomorphic()?;
        (!profile.null_seen() && tool.types.is_assignable_from(ty, seen)).then_some(seen)
    });
    let speculation = cast_speculation(graph, cast)
        .filter(|&s| tool.speculation_log.map_or(true, |log| log.may_speculate(s)));

    let is_null = graph.unique(NodeKind::IsNull, &[object], tool.types);
    let (test, reason, action, guard_speculation, stamp, outcome) = match (profiled, speculation, target) {
        (Some(seen), Some(speculation), _) => {
            let exact = graph.unique(NodeKind::TypeCheck { ty: seen }, &[object], tool.types);
            (
                exact,
                DeoptReason::OptimizedTypeCheckViolated,
                DeoptAction::InvalidateRecompile,
                speculation,
                Stamp::Object(ObjectStamp::exact(seen)),
                CastLowering::Speculated { ty: seen, speculation },
            )
        }
        (_, _, Some(ty)) => (
            subtype_test(graph, tool, hub, ty, object),
            DeoptReason::ClassCastException,
            DeoptAction::InvalidateReprofile,
            SpeculationId::NONE,
            Stamp::Object(ObjectStamp::declared(ty)),
            CastLowering::Checked,
        ),
        (_, _, None) => {
            // The hub input carries the type; the constant is never read.
            let root = tool.types.root();
            (
                subtype_test(graph, tool, hub, root, object),
                DeoptReason::ClassCastException,
                DeoptAction::InvalidateReprofile,
                SpeculationId::NONE,
                graph.stamp(object).clone(),
                CastLowering::Checked,
            )
        }
    };

    let condition = graph.unique(
        NodeKind::ShortCircuitOr {
            x_negated: false,
            y_negated: false,
        },
        &[is_null, test],
        tool.types,
    );
    let guard = graph.add_node(
        NodeKind::FixedGuard {
            reason,
            action,
            speculation: guard_speculation,
            negated: false,
        },
        &[condition],
        Stamp::Void,
    );
    graph.insert_before(cast, guard);
    let value = graph.unique(NodeKind::GuardedValue { stamp }, &[object, guard], tool.types);

    graph.track_type_check(cast);
    graph.resolve_type_check(cast, TypeCheckResolution::RuntimeChecked);
    graph.replace_fixed_with_floating(cast, value);
    debug!(graph = graph.name(), node = %cast, ?outcome, "cast lowered");
    outcome
}
