//! Graph builder.
//!
//! A front end drives [`GraphBuilder`] the way it walks its bytecode: a
//! cursor tracks the last fixed node, every fixed node is appended after it,
//! and floating nodes are created through the hash-consing path. Profile
//! entries for the method are attached to call and cast sites by bytecode
//! index as the sites are created.
//!
//! ```text
//!   Start ─▶ CheckCast ─▶ If ─┬─▶ Begin ─▶ End ─┐
//!                             └─▶ Begin ─▶ End ─┴─▶ Merge ─▶ Return(phi)
//! ```

use super::graph::Graph;
use super::node::{BinaryOp, Capabilities, CompareOp, Constant, NodeId, NodeKind};
use crate::deopt::{DeoptAction, DeoptReason, SpeculationId};
use crate::error::{CompileError, CompileResult};
use crate::profile::{ProfileSite, ProfileTable};
use crate::stamp::{ObjectStamp, Stamp};
use crate::types::{MethodId, TypeId, TypeResolver};

/// Incremental construction of a [`Graph`].
pub struct GraphBuilder<'a> {
    graph: Graph,
    types: &'a dyn TypeResolver,
    profiles: Option<&'a ProfileTable>,
    /// Last fixed node on the current path, `None` after a control sink.
    cursor: Option<NodeId>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(method: MethodId, name: &str, types: &'a dyn TypeResolver) -> Self {
        let graph = Graph::new(method, name);
        let cursor = Some(graph.start());
        GraphBuilder {
            graph,
            types,
            profiles: None,
            cursor,
        }
    }

    /// Attach call-site and type profiles recorded for this method.
    pub fn with_profiles(mut self, profiles: &'a ProfileTable) -> Self {
        self.profiles = Some(profiles);
        self
    }

    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[inline]
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// The last fixed node of the current path.
    #[inline]
    pub fn cursor(&self) -> Option<NodeId> {
        self.cursor
    }

    /// Continue building after `node`.
    #[inline]
    pub fn set_cursor(&mut self, node: NodeId) {
        self.cursor = Some(node);
    }

    /// Verify and return the graph.
    pub fn finish(self) -> CompileResult<Graph> {
        if let Some(open) = self.cursor {
            return Err(CompileError::malformed(open, "path not terminated"));
        }
        self.graph.verify()?;
        Ok(self.graph)
    }

    fn append(&mut self, node: NodeId) -> NodeId {
        match self.cursor {
            Some(prev) => self.graph.set_next(prev, node),
            None => tracing::warn!(node = %node, "fixed node appended on an unreachable path"),
        }
        let caps = self.graph.node(node).capabilities();
        self.cursor = caps.contains(Capabilities::SINGLE_SUCCESSOR).then_some(node);
        node
    }

    fn append_kind(&mut self, kind: NodeKind, inputs: &[NodeId]) -> NodeId {
        let node = self.graph.unique(kind, inputs, self.types);
        self.append(node)
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// The parameter at `index`, created on first use.
    pub fn parameter(&mut self, index: u16, stamp: Stamp) -> NodeId {
        let existing = self
            .graph
            .parameters()
            .into_iter()
            .find(|&p| matches!(self.graph.kind(p), NodeKind::Parameter { index: i } if *i == index));
        match existing {
            Some(p) => p,
            None => self.graph.add_node(NodeKind::Parameter { index }, &[], stamp),
        }
    }

    pub fn int(&mut self, value: i32) -> NodeId {
        self.graph.constant(Constant::int(value))
    }

    pub fn long(&mut self, value: i64) -> NodeId {
        self.graph.constant(Constant::long(value))
    }

    pub fn boolean(&mut self, value: bool) -> NodeId {
        self.graph.constant(Constant::Bool(value))
    }

    pub fn null(&mut self) -> NodeId {
        self.graph.constant(Constant::Null)
    }

    pub fn hub(&mut self, ty: TypeId) -> NodeId {
        self.graph.constant(Constant::Hub(ty))
    }

    pub fn binary(&mut self, op: BinaryOp, x: NodeId, y: NodeId) -> NodeId {
        self.graph.unique(NodeKind::Binary(op), &[x, y], self.types)
    }

    pub fn add(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.binary(BinaryOp::Add, x, y)
    }

    pub fn negate(&mut self, x: NodeId) -> NodeId {
        self.graph.unique(NodeKind::Negate, &[x], self.types)
    }

    pub fn compare(&mut self, op: CompareOp, x: NodeId, y: NodeId) -> NodeId {
        self.graph.unique(NodeKind::Compare(op), &[x, y], self.types)
    }

    pub fn not(&mut self, condition: NodeId) -> NodeId {
        self.graph.unique(NodeKind::LogicNot, &[condition], self.types)
    }

    pub fn short_circuit_or(&mut self, x: NodeId, x_negated: bool, y: NodeId, y_negated: bool) -> NodeId {
        self.graph
            .unique(NodeKind::ShortCircuitOr { x_negated, y_negated }, &[x, y], self.types)
    }

    pub fn is_null(&mut self, object: NodeId) -> NodeId {
        self.graph.unique(NodeKind::IsNull, &[object], self.types)
    }

    /// An instance test. `allow_null` makes null pass instead of fail.
    pub fn instance_of(&mut self, object: NodeId, ty: TypeId, allow_null: bool) -> NodeId {
        let node = self
            .graph
            .unique(NodeKind::InstanceOf { ty, allow_null }, &[object], self.types);
        self.graph.track_type_check(node);
        node
    }

    pub fn pi(&mut self, object: NodeId, stamp: ObjectStamp) -> NodeId {
        self.graph.unique(
            NodeKind::Pi {
                stamp: Stamp::Object(stamp),
            },
            &[object],
            self.types,
        )
    }

    /// A narrowed view of `object`, valid where `guard` holds.
    pub fn guarded_value(&mut self, object: NodeId, stamp: ObjectStamp, guard: Option<NodeId>) -> NodeId {
        let kind = NodeKind::GuardedValue {
            stamp: Stamp::Object(stamp),
        };
        match guard {
            Some(g) => self.graph.unique(kind, &[object, g], self.types),
            None => self.graph.unique(kind, &[object], self.types),
        }
    }

    /// A floating guard anchored at the current position.
    pub fn guard(&mut self, condition: NodeId, reason: DeoptReason, action: DeoptAction, negated: bool) -> NodeId {
        let anchor = self.cursor.unwrap_or_else(|| self.graph.start());
        self.graph.unique(
            NodeKind::Guard {
                reason,
                action,
                speculation: SpeculationId::NONE,
                negated,
            },
            &[condition, anchor],
            self.types,
        )
    }

    /// Merge-point value. Inputs are in merge-end order.
    pub fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> NodeId {
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(merge);
        inputs.extend_from_slice(values);
        self.graph.unique(NodeKind::Phi, &inputs, self.types)
    }

    // =========================================================================
    // Fixed Nodes
    // =========================================================================

    pub fn rem(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.append_kind(NodeKind::IntegerRem, &[x, y])
    }

    pub fn div(&mut self, x: NodeId, y: NodeId) -> NodeId {
        self.append_kind(NodeKind::IntegerDiv, &[x, y])
    }

    /// A cast site at `bci`; its type profile is attached if one exists.
    pub fn check_cast(&mut self, object: NodeId, ty: TypeId, bci: u32) -> NodeId {
        let node = self.append_kind(NodeKind::CheckCast { ty }, &[object]);
        self.graph.track_type_check(node);
        let method = self.graph.method();
        if let Some(profile) = self.profiles.and_then(|p| p.type_profile(method, bci)) {
            self.graph.set_type_profile(node, ProfileSite::new(method, bci), profile);
        }
        node
    }

    /// A cast against a hub only known at run time.
    pub fn check_cast_dynamic(&mut self, hub: NodeId, object: NodeId) -> NodeId {
        let node = self.append_kind(NodeKind::CheckCastDynamic, &[hub, object]);
        self.graph.track_type_check(node);
        node
    }

    /// A call at `bci` returning a value of `stamp` (`Stamp::Void` for none).
    pub fn invoke(&mut self, target: MethodId, args: &[NodeId], stamp: Stamp, bci: u32) -> NodeId {
        let node = self.graph.add_node(NodeKind::Invoke { target, bci }, args, stamp);
        self.append(node);
        let method = self.graph.method();
        let profile = self
            .profiles
            .and_then(|p| p.call_site(method, bci))
            .unwrap_or_default();
        self.graph.set_call_profile(node, profile);
        node
    }

    pub fn infopoint(&mut self, bci: u32) -> NodeId {
        let node = self.graph.add_node(NodeKind::Infopoint { bci }, &[], Stamp::Void);
        self.append(node)
    }

    pub fn fixed_guard(&mut self, condition: NodeId, reason: DeoptReason, action: DeoptAction, negated: bool) -> NodeId {
        let node = self.graph.add_node(
            NodeKind::FixedGuard {
                reason,
                action,
                speculation: SpeculationId::NONE,
                negated,
            },
            &[condition],
            Stamp::Void,
        );
        self.append(node)
    }

    /// Split on `condition`; returns the `(true, false)` begins. The cursor
    /// is cleared until one of them is entered.
    pub fn branch(&mut self, condition: NodeId) -> (NodeId, NodeId) {
        let split = self.graph.add_node(NodeKind::If, &[condition], Stamp::Void);
        self.append(split);
        let true_begin = self.graph.add_node(NodeKind::Begin, &[], Stamp::Void);
        let false_begin = self.graph.add_node(NodeKind::Begin, &[], Stamp::Void);
        self.graph.set_branches(split, true_begin, false_begin);
        self.cursor = None;
        (true_begin, false_begin)
    }

    /// Close the current path with an `End`.
    pub fn end(&mut self) -> NodeId {
        let end = self.graph.add_node(NodeKind::End, &[], Stamp::Void);
        self.append(end);
        self.cursor = None;
        end
    }

    /// Join `ends` and continue after the merge.
    pub fn merge(&mut self, ends: &[NodeId]) -> NodeId {
        let merge = self.graph.add_node(NodeKind::Merge, ends, Stamp::Void);
        self.cursor = Some(merge);
        merge
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        let ret = match value {
            Some(v) => self.graph.add_node(NodeKind::Return, &[v], Stamp::Void),
            None => self.graph.add_node(NodeKind::Return, &[], Stamp::Void),
        };
        self.append(ret)
    }

    pub fn deoptimize(&mut self, reason: DeoptReason, action: DeoptAction) -> NodeId {
        let node = self.graph.add_node(
            NodeKind::Deoptimize {
                reason,
                action,
                speculation: SpeculationId::NONE,
            },
            &[],
            Stamp::Void,
        );
        self.append(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CallSiteProfile, TypeProfile};
    use crate::types::{ClassFlags, TypeHierarchy};

    #[test]
    fn test_diamond_with_phi() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(3), "diamond", &types);
        let x = b.parameter(0, Stamp::int(32));
        let zero = b.int(0);
        let cond = b.compare(CompareOp::LessThan, x, zero);
        let (t, f) = b.branch(cond);
        b.set_cursor(t);
        let te = b.end();
        b.set_cursor(f);
        let fe = b.end();
        let merge = b.merge(&[te, fe]);
        let neg = b.negate(x);
        let phi = b.phi(merge, &[neg, x]);
        b.ret(Some(phi));

        let g = b.finish().expect("valid graph");
        assert_eq!(g.count(|k| matches!(k, NodeKind::Phi)), 1);
        assert_eq!(g.returns().len(), 1);
    }

    #[test]
    fn test_unterminated_path_is_rejected() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(3), "open", &types);
        b.infopoint(0);
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_profiles_attach_by_bci() {
        let types = TypeHierarchy::new();
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let profiles = ProfileTable::new();
        let method = MethodId::new(9);
        profiles.set_call_site(method, 4, CallSiteProfile::new(0.25, 1));
        profiles.set_type_profile(method, 2, TypeProfile::monomorphic_of(a));

        let mut b = GraphBuilder::new(method, "profiled", &types).with_profiles(&profiles);
        let o = b.parameter(0, Stamp::object());
        let cast = b.check_cast(o, a, 2);
        let call = b.invoke(MethodId::new(10), &[cast], Stamp::Void, 4);
        b.ret(None);
        let g = b.finish().expect("valid graph");

        assert_eq!(g.type_profile(cast).and_then(TypeProfile::monomorphic), Some(a));
        assert_eq!(g.call_profile(call), Some(CallSiteProfile::new(0.25, 1)));
    }
}
