//! Structural verification of a [`Graph`].
//!
//! Run after construction and between phases. Any violation is fatal to the
//! compilation and is reported as a [`CompileError`].

use super::graph::Graph;
use super::node::{Capabilities, NodeId, NodeKind};
use crate::error::{CompileError, CompileResult};
use crate::stamp::Stamp;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Expect {
    Integer,
    Object,
    Logic,
    Any,
}

impl Expect {
    fn accepts(self, stamp: &Stamp) -> bool {
        match (self, stamp) {
            (_, Stamp::Illegal) | (Expect::Any, _) => true,
            (Expect::Integer, Stamp::Integer(_)) => true,
            (Expect::Object, Stamp::Object(_)) => true,
            (Expect::Logic, Stamp::Logic(_)) => true,
            _ => false,
        }
    }
}

/// Allowed input count and the stamp class each value input must have.
fn input_shape(kind: &NodeKind) -> (usize, Option<usize>, &'static [Expect]) {
    use Expect::*;
    match kind {
        NodeKind::Constant(_)
        | NodeKind::Parameter { .. }
        | NodeKind::Start
        | NodeKind::Begin
        | NodeKind::End
        | NodeKind::Infopoint { .. }
        | NodeKind::BranchCounter { .. }
        | NodeKind::Deoptimize { .. } => (0, Some(0), &[]),
        NodeKind::Binary(_) | NodeKind::Compare(_) | NodeKind::IntegerDiv | NodeKind::IntegerRem => {
            (2, Some(2), &[Integer, Integer])
        }
        NodeKind::Negate => (1, Some(1), &[Integer]),
        NodeKind::LogicNot | NodeKind::If | NodeKind::FixedGuard { .. } => (1, Some(1), &[Logic]),
        NodeKind::ShortCircuitOr { .. } => (2, Some(2), &[Logic, Logic]),
        NodeKind::IsNull
        | NodeKind::InstanceOf { .. }
        | NodeKind::TypeCheck { .. }
        | NodeKind::LoadHub
        | NodeKind::Pi { .. }
        | NodeKind::CheckCast { .. } => (1, Some(1), &[Object]),
        NodeKind::SubtypeCheck => (2, Some(2), &[Any, Any]),
        NodeKind::CheckCastDynamic => (2, Some(2), &[Any, Object]),
        NodeKind::GuardedValue { .. } => (1, Some(2), &[Object, Any]),
        NodeKind::Guard { .. } => (2, Some(2), &[Logic, Any]),
        NodeKind::Return => (0, Some(1), &[Any]),
        NodeKind::Phi => (1, None, &[]),
        NodeKind::Merge => (1, None, &[]),
        NodeKind::Invoke { .. } => (0, None, &[]),
    }
}

impl Graph {
    /// Check structural invariants: live inputs, symmetric use lists,
    /// input arity and stamp classes, chain linkage and merge/phi shape.
    pub fn verify(&self) -> CompileResult<()> {
        let start = self.start();
        if !self.is_alive(start) || !matches!(self.kind(start), NodeKind::Start) {
            return Err(CompileError::malformed(start, "start node missing"));
        }
        for id in self.live_ids() {
            self.verify_edges(id)?;
            self.verify_shape(id)?;
            self.verify_control(id)?;
        }
        Ok(())
    }

    fn verify_edges(&self, id: NodeId) -> CompileResult<()> {
        for &input in self.inputs(id) {
            if !self.is_alive(input) {
                return Err(CompileError::malformed(id, format!("dead input {input}")));
            }
            let edges = self.inputs(id).iter().filter(|&&i| i == input).count();
            let recorded = self.users(input).iter().filter(|&&u| u == id).count();
            if edges != recorded {
                return Err(CompileError::malformed(id, format!("use list of {input} out of sync")));
            }
        }
        for &user in self.users(id) {
            if !self.is_alive(user) {
                return Err(CompileError::malformed(id, format!("dead user {user}")));
            }
        }
        Ok(())
    }

    fn verify_shape(&self, id: NodeId) -> CompileResult<()> {
        let kind = self.kind(id);
        let inputs = self.inputs(id);
        let (min, max, expect) = input_shape(kind);
        if inputs.len() < min || max.is_some_and(|m| inputs.len() > m) {
            return Err(CompileError::malformed(id, format!("{} has {} inputs", kind.mnemonic(), inputs.len())));
        }
        for (&input, want) in inputs.iter().zip(expect) {
            if !want.accepts(self.stamp(input)) {
                return Err(CompileError::malformed(
                    id,
                    format!("input {input} has stamp {} in {}", self.stamp(input), kind.mnemonic()),
                ));
            }
        }

        match kind {
            NodeKind::Constant(_) | NodeKind::Parameter { .. } if matches!(self.stamp(id), Stamp::Illegal) => {
                return Err(CompileError::ContradictoryStamp { node: id });
            }
            NodeKind::Phi => {
                let merge = inputs[0];
                if !matches!(self.kind(merge), NodeKind::Merge) {
                    return Err(CompileError::malformed(id, "phi not attached to a merge"));
                }
                if inputs.len() != self.inputs(merge).len() + 1 {
                    return Err(CompileError::malformed(id, "phi arity differs from merge"));
                }
                let mut seen: Option<&Stamp> = None;
                for &v in &inputs[1..] {
                    let s = self.stamp(v);
                    if matches!(s, Stamp::Illegal) {
                        continue;
                    }
                    match seen {
                        Some(prev) if !prev.is_compatible(s) => {
                            return Err(CompileError::ContradictoryStamp { node: id });
                        }
                        _ => seen = Some(s),
                    }
                }
            }
            NodeKind::Merge => {
                if let Some(&bad) = inputs.iter().find(|&&e| !matches!(self.kind(e), NodeKind::End)) {
                    return Err(CompileError::malformed(id, format!("merge input {bad} is not an end")));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn verify_control(&self, id: NodeId) -> CompileResult<()> {
        let node = self.node(id);
        let caps = node.capabilities();
        let successors = node.successors();

        if !caps.contains(Capabilities::FIXED) {
            if !successors.is_empty() || node.predecessor().is_some() {
                return Err(CompileError::malformed(id, "floating node linked into control flow"));
            }
            return Ok(());
        }

        if caps.contains(Capabilities::SINGLE_SUCCESSOR) && successors.len() != 1 {
            return Err(CompileError::malformed(id, "missing successor"));
        }
        if caps.contains(Capabilities::CONTROL_SPLIT) {
            if successors.len() != 2 {
                return Err(CompileError::malformed(id, "split without two successors"));
            }
            if let Some(&arm) = successors.iter().find(|&&s| !matches!(self.kind(s), NodeKind::Begin)) {
                return Err(CompileError::malformed(id, format!("branch target {arm} is not a begin")));
            }
        }
        if caps.contains(Capabilities::CONTROL_SINK) && !successors.is_empty() {
            return Err(CompileError::malformed(id, "control sink with successors"));
        }
        for &s in successors {
            if !self.is_alive(s) || self.predecessor(s) != Some(id) {
                return Err(CompileError::malformed(id, format!("successor {s} does not point back")));
            }
        }

        match node.kind() {
            NodeKind::Start | NodeKind::Merge => {}
            NodeKind::End if self.merge_of(id).is_none() => {
                return Err(CompileError::malformed(id, "end without merge"));
            }
            _ => match node.predecessor() {
                Some(p) if self.is_alive(p) && self.successors(p).contains(&id) => {}
                _ => return Err(CompileError::malformed(id, "fixed node not in a chain")),
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BinaryOp, Graph, NodeKind};
    use crate::stamp::Stamp;
    use crate::types::MethodId;
    use crate::CompileError;

    #[test]
    fn test_valid_straight_line_graph() {
        let mut g = Graph::new(MethodId::new(1), "ok");
        let p = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::int(32));
        let ret = g.add_node(NodeKind::Return, &[p], Stamp::Void);
        g.set_next(g.start(), ret);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_unlinked_fixed_node_is_malformed() {
        let mut g = Graph::new(MethodId::new(1), "bad");
        let ret = g.add_node(NodeKind::Return, &[], Stamp::Void);
        g.set_next(g.start(), ret);
        g.add_node(NodeKind::Infopoint { bci: 0 }, &[], Stamp::Void);
        assert!(matches!(g.verify(), Err(CompileError::MalformedGraph { .. })));
    }

    #[test]
    fn test_object_input_to_arithmetic_is_malformed() {
        let mut g = Graph::new(MethodId::new(1), "bad");
        let o = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::object());
        let one = g.int_constant(32, 1);
        g.add_node(NodeKind::Binary(BinaryOp::Add), &[o, one], Stamp::int(32));
        let ret = g.add_node(NodeKind::Return, &[], Stamp::Void);
        g.set_next(g.start(), ret);
        assert!(matches!(g.verify(), Err(CompileError::MalformedGraph { .. })));
    }
}
