//! Lowering of type checks that survived canonicalization.
//!
//! Canonicalization decides whatever it can statically or under recorded
//! assumptions. Every check still standing afterwards is expanded here into
//! explicit run-time tests:
//!
//! - checked casts become a fixed guard plus a guard-anchored
//!   [`GuardedValue`](NodeKind::GuardedValue) carrying the verified type
//!   (see [`checkcast`]),
//! - instance tests become a null test short-circuited with a hub subtype
//!   test.
//!
//! Every lowered site is marked [`TypeCheckResolution::RuntimeChecked`].

pub mod checkcast;

use tracing::debug;

use crate::deopt::SpeculationLog;
use crate::error::CompileResult;
use crate::ir::{Capabilities, Constant, Graph, NodeId, NodeKind, TypeCheckResolution};
use crate::types::{TypeId, TypeResolver};

pub use checkcast::CastLowering;

/// Services available while lowering.
pub struct LoweringTool<'a> {
    pub types: &'a dyn TypeResolver,
    /// Failed speculations; `None` permits every speculation.
    pub speculation_log: Option<&'a SpeculationLog>,
}

impl<'a> LoweringTool<'a> {
    pub fn new(types: &'a dyn TypeResolver) -> Self {
        LoweringTool {
            types,
            speculation_log: None,
        }
    }

    pub fn with_speculation_log(mut self, log: &'a SpeculationLog) -> Self {
        self.speculation_log = Some(log);
        self
    }
}

/// What one lowering run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoweringStats {
    /// Casts lowered to a profile-based exact type guard.
    pub casts_speculated: usize,
    /// Casts lowered to a full subtype test.
    pub casts_checked: usize,
    pub instance_tests: usize,
}

impl LoweringStats {
    pub fn total(&self) -> usize {
        self.casts_speculated + self.casts_checked + self.instance_tests
    }
}

/// Lower every remaining type check in `graph`.
pub fn lower_type_checks(graph: &mut Graph, tool: &LoweringTool<'_>) -> CompileResult<LoweringStats> {
    let mut stats = LoweringStats::default();
    let lowerable = graph.find_all(|k| k.capabilities().contains(Capabilities::LOWERABLE));
    for id in lowerable {
        if !graph.is_alive(id) {
            continue;
        }
        match graph.kind(id).clone() {
            NodeKind::CheckCast { .. } | NodeKind::CheckCastDynamic => {
                match checkcast::lower_check_cast(graph, tool, id) {
                    CastLowering::Speculated { .. } => stats.casts_speculated += 1,
                    CastLowering::Checked => stats.casts_checked += 1,
                }
            }
            NodeKind::InstanceOf { ty, allow_null } => {
                lower_instance_of(graph, tool, id, ty, allow_null);
                stats.instance_tests += 1;
            }
            _ => {}
        }
    }
    if stats.total() > 0 {
        debug!(graph = graph.name(), ?stats, "type checks lowered");
    }
    graph.verify()?;
    Ok(stats)
}

/// `x instanceof T` is `!(x == null || !subtype(T, hub(x)))`; the or-null
/// variant drops both negations.
fn lower_instance_of(graph: &mut Graph, tool: &LoweringTool<'_>, id: NodeId, ty: TypeId, allow_null: bool) {
    let object = graph.inputs(id)[0];
    let subtype = subtype_test(graph, tool, None, ty, object);
    let is_null = graph.unique(NodeKind::IsNull, &[object], tool.types);
    let lowered = if allow_null {
        graph.unique(
            NodeKind::ShortCircuitOr {
                x_negated: false,
                y_negated: false,
            },
            &[is_null, subtype],
            tool.types,
        )
    } else {
        let fails = graph.unique(
            NodeKind::ShortCircuitOr {
                x_negated: false,
                y_negated: true,
            },
            &[is_null, subtype],
            tool.types,
        );
        graph.unique(NodeKind::LogicNot, &[fails], tool.types)
    };
    graph.resolve_type_check(id, TypeCheckResolution::RuntimeChecked);
    graph.replace_at_usages(id, lowered);
    graph.kill(id);
}

/// `SubtypeCheck(hub(T), LoadHub(object))`, with `hub` overriding the
/// constant hub of `ty` for dynamic checks.
pub(crate) fn subtype_test(
    graph: &mut Graph,
    tool: &LoweringTool<'_>,
    hub: Option<NodeId>,
    ty: TypeId,
    object: NodeId,
) -> NodeId {
    let hub = hub.unwrap_or_else(|| graph.constant(Constant::Hub(ty)));
    let object_hub = graph.unique(NodeKind::LoadHub, &[object], tool.types);
    graph.unique(NodeKind::SubtypeCheck, &[hub, object_hub], tool.types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphBuilder;
    use crate::stamp::{ObjectStamp, Stamp};
    use crate::types::{ClassFlags, MethodId, TypeHierarchy};

    #[test]
    fn test_instance_of_lowers_to_null_and_subtype_test() {
        let types = TypeHierarchy::new();
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let mut b = GraphBuilder::new(MethodId::new(0), "instance", &types);
        let o = b.parameter(0, Stamp::Object(ObjectStamp::unrestricted()));
        let test = b.instance_of(o, a, false);
        let (t, f) = b.branch(test);
        b.set_cursor(t);
        b.ret(None);
        b.set_cursor(f);
        b.ret(None);
        let mut g = b.finish().expect("valid");

        let stats = lower_type_checks(&mut g, &LoweringTool::new(&types)).expect("lowered");
        assert_eq!(stats.instance_tests, 1);
        assert_eq!(g.count(|k| matches!(k, NodeKind::InstanceOf { .. })), 0);
        assert_eq!(g.count(|k| matches!(k, NodeKind::SubtypeCheck)), 1);
        assert_eq!(g.type_check_resolution(test), Some(TypeCheckResolution::RuntimeChecked));
        let split = g.find_all(|k| matches!(k, NodeKind::If))[0];
        assert_eq!(g.kind(g.inputs(split)[0]), &NodeKind::LogicNot);
    }
}
