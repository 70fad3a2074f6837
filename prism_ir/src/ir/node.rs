//! Node kinds, capabilities and node storage.
//!
//! Every node is a tagged variant of [`NodeKind`]. Behaviour that differs per
//! kind (hash-consing, lowering, guarding, control flow shape) is described
//! by a [`Capabilities`] set rather than by a type hierarchy.

use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

use super::arena::Id;
use crate::deopt::{DeoptAction, DeoptReason, SpeculationId};
use crate::stamp::Stamp;
use crate::types::{MethodId, TypeId};

/// Handle of a node in a [`Graph`](super::Graph).
pub type NodeId = Id<Node>;

/// Ordered data inputs of a node. Most nodes have at most four.
pub type InputList = SmallVec<[NodeId; 4]>;

/// Control successors: one `next` edge, or the two arms of an `If`.
pub type SuccessorList = SmallVec<[NodeId; 2]>;

// =============================================================================
// Constants
// =============================================================================

/// A compile-time constant value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Integer of the given width, stored sign-extended.
    Int { bits: u8, value: i64 },
    Bool(bool),
    Null,
    /// The type-metadata pointer of a loaded type.
    Hub(TypeId),
}

impl Constant {
    /// 32-bit integer constant.
    #[inline]
    pub const fn int(value: i32) -> Self {
        Constant::Int {
            bits: 32,
            value: value as i64,
        }
    }

    /// 64-bit integer constant.
    #[inline]
    pub const fn long(value: i64) -> Self {
        Constant::Int { bits: 64, value }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match *self {
            Constant::Int { value, .. } => Some(value),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match *self {
            Constant::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { bits, value } => write!(f, "{value}i{bits}"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Null => write!(f, "null"),
            Constant::Hub(ty) => write!(f, "hub({ty})"),
        }
    }
}

// =============================================================================
// Operators
// =============================================================================

/// Two-input integer arithmetic that can never trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        !matches!(self, BinaryOp::Sub)
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
        }
    }
}

/// Integer comparisons producing a logic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equals,
    LessThan,
}

impl CompareOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, CompareOp::Equals)
    }
}

// =============================================================================
// Node Kinds
// =============================================================================

/// The operation a node performs. Input layout is documented per variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // ---- floating values ----
    /// `[]`
    Constant(Constant),
    /// `[]`; the stamp is the declared parameter stamp.
    Parameter { index: u16 },
    /// `[x, y]`
    Binary(BinaryOp),
    /// `[x]`
    Negate,
    /// `[x, y]`
    Compare(CompareOp),
    /// `[condition]`
    LogicNot,
    /// `[x, y]`: `x || y`, each side optionally negated. `y` is only
    /// evaluated when `x` is false.
    ShortCircuitOr { x_negated: bool, y_negated: bool },
    /// `[object]`
    IsNull,
    /// `[object]`: subtype test; `allow_null` turns it into
    /// "instance-of-or-null".
    InstanceOf { ty: TypeId, allow_null: bool },
    /// `[object]`: exact runtime type identity of a non-null object.
    TypeCheck { ty: TypeId },
    /// `[object]`: loads the hub of a non-null object.
    LoadHub,
    /// `[super_hub, object_hub]`: runtime subtype test on hubs.
    SubtypeCheck,
    /// `[object]`: narrows the stamp of `object`.
    Pi { stamp: Stamp },
    /// `[object]` or `[object, guard]`: narrows `object`, valid only where
    /// `guard` has been passed.
    GuardedValue { stamp: Stamp },
    /// `[condition, anchor]`: floating guard; deoptimizes when `condition`
    /// (xor `negated`) does not hold.
    Guard {
        reason: DeoptReason,
        action: DeoptAction,
        speculation: SpeculationId,
        negated: bool,
    },
    /// `[merge, values...]`
    Phi,

    // ---- fixed control ----
    Start,
    /// Entry of a branch arm; anchors floating guards.
    Begin,
    /// Jump to the `Merge` that lists this node among its inputs.
    End,
    /// `[ends...]`
    Merge,
    /// `[condition]`; successors `[true_begin, false_begin]`.
    If,
    /// `[]` or `[value]`
    Return,
    Deoptimize {
        reason: DeoptReason,
        action: DeoptAction,
        speculation: SpeculationId,
    },
    /// `[condition]`
    FixedGuard {
        reason: DeoptReason,
        action: DeoptAction,
        speculation: SpeculationId,
        negated: bool,
    },

    // ---- fixed values ----
    /// `[x, y]`; traps when `y == 0`.
    IntegerDiv,
    /// `[x, y]`; traps when `y == 0`.
    IntegerRem,
    /// `[object]`: checked cast, null passes.
    CheckCast { ty: TypeId },
    /// `[hub, object]`: checked cast against a runtime hub, null passes.
    CheckCastDynamic,
    /// `[arguments...]`
    Invoke { target: MethodId, bci: u32 },
    /// Marks the bytecode position of the following fixed node.
    Infopoint { bci: u32 },
    /// Records that control reached this point.
    BranchCounter { index: u32 },
}

bitflags! {
    /// What a node kind is able to do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u16 {
        /// Part of a fixed control chain.
        const FIXED = 1 << 0;
        /// Fixed node with exactly one `next` successor.
        const SINGLE_SUCCESSOR = 1 << 1;
        /// Ends a chain without a `next` edge.
        const CONTROL_SINK = 1 << 2;
        /// Splits control into several successors.
        const CONTROL_SPLIT = 1 << 3;
        /// Valid anchor for floating guards and guarded values.
        const ANCHOR = 1 << 4;
        /// Floating, side-effect free, eligible for hash-consing.
        const PURE = 1 << 5;
        /// Inputs may be reordered.
        const COMMUTATIVE = 1 << 6;
        /// Acts as a guard that other nodes may depend on.
        const GUARDING = 1 << 7;
        /// Narrows the stamp of its first input.
        const VALUE_PROXY = 1 << 8;
        /// Replaced by a lowered form before code generation.
        const LOWERABLE = 1 << 9;
        /// Can always transfer to the interpreter.
        const DEOPTIMIZES = 1 << 10;
        /// Produces a logic value.
        const LOGIC = 1 << 11;
        /// Calls another method.
        const INVOKE = 1 << 12;
    }
}

impl NodeKind {
    /// Capability set of this kind.
    pub fn capabilities(&self) -> Capabilities {
        use Capabilities as C;
        match self {
            NodeKind::Constant(_) | NodeKind::Negate | NodeKind::LoadHub => C::PURE,
            NodeKind::Parameter { .. } => C::empty(),
            NodeKind::Binary(op) if op.is_commutative() => C::PURE | C::COMMUTATIVE,
            NodeKind::Binary(_) => C::PURE,
            NodeKind::Compare(op) if op.is_commutative() => C::PURE | C::COMMUTATIVE | C::LOGIC,
            NodeKind::Compare(_)
            | NodeKind::LogicNot
            | NodeKind::ShortCircuitOr { .. }
            | NodeKind::IsNull
            | NodeKind::TypeCheck { .. }
            | NodeKind::SubtypeCheck => C::PURE | C::LOGIC,
            NodeKind::InstanceOf { .. } => C::PURE | C::LOGIC | C::LOWERABLE,
            NodeKind::Pi { .. } => C::PURE | C::VALUE_PROXY,
            NodeKind::GuardedValue { .. } => C::PURE | C::VALUE_PROXY,
            NodeKind::Guard { .. } => C::PURE | C::GUARDING | C::DEOPTIMIZES,
            NodeKind::Phi => C::empty(),
            NodeKind::Start => C::FIXED | C::SINGLE_SUCCESSOR | C::ANCHOR,
            NodeKind::Begin => C::FIXED | C::SINGLE_SUCCESSOR | C::ANCHOR,
            NodeKind::Merge => C::FIXED | C::SINGLE_SUCCESSOR | C::ANCHOR,
            NodeKind::End | NodeKind::Return => C::FIXED | C::CONTROL_SINK,
            NodeKind::Deoptimize { .. } => C::FIXED | C::CONTROL_SINK | C::DEOPTIMIZES,
            NodeKind::If => C::FIXED | C::CONTROL_SPLIT,
            NodeKind::FixedGuard { .. } => {
                C::FIXED | C::SINGLE_SUCCESSOR | C::GUARDING | C::DEOPTIMIZES
            }
            NodeKind::IntegerDiv | NodeKind::IntegerRem => C::FIXED | C::SINGLE_SUCCESSOR,
            NodeKind::CheckCast { .. } | NodeKind::CheckCastDynamic => {
                C::FIXED | C::SINGLE_SUCCESSOR | C::LOWERABLE | C::DEOPTIMIZES
            }
            NodeKind::Invoke { .. } => C::FIXED | C::SINGLE_SUCCESSOR | C::INVOKE,
            NodeKind::Infopoint { .. } | NodeKind::BranchCounter { .. } => {
                C::FIXED | C::SINGLE_SUCCESSOR
            }
        }
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.capabilities().contains(Capabilities::FIXED)
    }

    #[inline]
    pub fn is_pure(&self) -> bool {
        self.capabilities().contains(Capabilities::PURE)
    }

    /// Short mnemonic used in dumps and traces.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            NodeKind::Constant(_) => "Constant",
            NodeKind::Parameter { .. } => "Parameter",
            NodeKind::Binary(BinaryOp::Add) => "Add",
            NodeKind::Binary(BinaryOp::Sub) => "Sub",
            NodeKind::Binary(BinaryOp::Mul) => "Mul",
            NodeKind::Binary(BinaryOp::And) => "And",
            NodeKind::Binary(BinaryOp::Or) => "Or",
            NodeKind::Binary(BinaryOp::Xor) => "Xor",
            NodeKind::Negate => "Negate",
            NodeKind::Compare(CompareOp::Equals) => "IntegerEquals",
            NodeKind::Compare(CompareOp::LessThan) => "IntegerLessThan",
            NodeKind::LogicNot => "LogicNot",
            NodeKind::ShortCircuitOr { .. } => "ShortCircuitOr",
            NodeKind::IsNull => "IsNull",
            NodeKind::InstanceOf { allow_null: false, .. } => "InstanceOf",
            NodeKind::InstanceOf { allow_null: true, .. } => "InstanceOfOrNull",
            NodeKind::TypeCheck { .. } => "TypeCheck",
            NodeKind::LoadHub => "LoadHub",
            NodeKind::SubtypeCheck => "SubtypeCheck",
            NodeKind::Pi { .. } => "Pi",
            NodeKind::GuardedValue { .. } => "GuardedValue",
            NodeKind::Guard { .. } => "Guard",
            NodeKind::Phi => "Phi",
            NodeKind::Start => "Start",
            NodeKind::Begin => "Begin",
            NodeKind::End => "End",
            NodeKind::Merge => "Merge",
            NodeKind::If => "If",
            NodeKind::Return => "Return",
            NodeKind::Deoptimize { .. } => "Deoptimize",
            NodeKind::FixedGuard { .. } => "FixedGuard",
            NodeKind::IntegerDiv => "IntegerDiv",
            NodeKind::IntegerRem => "IntegerRem",
            NodeKind::CheckCast { .. } => "CheckCast",
            NodeKind::CheckCastDynamic => "CheckCastDynamic",
            NodeKind::Invoke { .. } => "Invoke",
            NodeKind::Infopoint { .. } => "Infopoint",
            NodeKind::BranchCounter { .. } => "BranchCounter",
        }
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags! {
    /// Per-node state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Removed from the graph; the slot is never reused.
        const DEAD = 1 << 0;
    }
}

// =============================================================================
// Node
// =============================================================================

/// A single node in the sea-of-nodes graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) inputs: InputList,
    pub(crate) successors: SuccessorList,
    pub(crate) predecessor: Option<NodeId>,
    pub(crate) stamp: Stamp,
    pub(crate) flags: NodeFlags,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, inputs: InputList, stamp: Stamp) -> Self {
        Node {
            kind,
            inputs,
            successors: SuccessorList::new(),
            predecessor: None,
            stamp,
            flags: NodeFlags::empty(),
        }
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    #[inline]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index).copied()
    }

    #[inline]
    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    #[inline]
    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor
    }

    #[inline]
    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    #[inline]
    pub fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.kind.is_fixed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commutativity() {
        assert!(BinaryOp::Add.is_commutative());
        assert!(!BinaryOp::Sub.is_commutative());
        assert!(CompareOp::Equals.is_commutative());
        assert!(!CompareOp::LessThan.is_commutative());
    }

    #[test]
    fn test_capabilities_partition() {
        assert!(NodeKind::Binary(BinaryOp::Add).is_pure());
        assert!(!NodeKind::Binary(BinaryOp::Add).is_fixed());
        assert!(NodeKind::IntegerRem.is_fixed());
        assert!(!NodeKind::Phi.is_pure());
        assert!(NodeKind::Begin
            .capabilities()
            .contains(Capabilities::ANCHOR));
        assert!(NodeKind::CheckCast { ty: TypeId::new(1) }
            .capabilities()
            .contains(Capabilities::LOWERABLE));
    }

    #[test]
    fn test_constant_display() {
        assert_eq!(Constant::int(-4).to_string(), "-4i32");
        assert_eq!(Constant::Null.to_string(), "null");
    }
}
