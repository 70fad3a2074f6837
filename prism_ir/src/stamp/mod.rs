//! Stamp lattice.
//!
//! A stamp is a conservative static description of the values a node may
//! produce. Stamps only ever get more precise as optimization proceeds:
//! [`Stamp::improve_with`] never admits a value the receiver rejects.
//!
//! # Lattice
//!
//! ```text
//!              (unrestricted integer / any object / unknown logic)
//!                             |   meet goes up
//!                             |   improve_with goes down
//!                          Illegal (no value)
//! ```
//!
//! `Void` marks nodes without a value (control flow, guards).

mod fold;
mod integer;
mod object;

pub use fold::{binary_constant, div_constant, fold_stamp, rem_constant};
pub use integer::{mask, max_value, min_value, sign_extend, IntegerStamp};
pub use object::ObjectStamp;

use std::fmt;

use crate::ir::Constant;
use crate::types::TypeResolver;

// =============================================================================
// Tri-State
// =============================================================================

/// Three-valued answer of a static test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriState {
    True,
    False,
    Unknown,
}

impl TriState {
    #[inline]
    pub const fn from_bool(value: bool) -> Self {
        if value {
            TriState::True
        } else {
            TriState::False
        }
    }

    #[inline]
    pub const fn to_bool(self) -> Option<bool> {
        match self {
            TriState::True => Some(true),
            TriState::False => Some(false),
            TriState::Unknown => None,
        }
    }

    #[inline]
    pub const fn is_known(self) -> bool {
        !matches!(self, TriState::Unknown)
    }

    #[inline]
    pub const fn negate(self) -> Self {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Unknown => TriState::Unknown,
        }
    }

    /// Negate when `negated` holds.
    #[inline]
    pub const fn negate_if(self, negated: bool) -> Self {
        if negated {
            self.negate()
        } else {
            self
        }
    }

    /// Short-circuit disjunction.
    pub const fn or(self, other: TriState) -> Self {
        match (self, other) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Unknown,
        }
    }

    pub const fn meet(self, other: TriState) -> Self {
        match (self, other) {
            (TriState::True, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Unknown,
        }
    }
}

// =============================================================================
// Stamp
// =============================================================================

/// Static description of a node's possible values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// Fixed-width two's complement integer.
    Integer(IntegerStamp),
    /// Reference to a heap object, or null.
    Object(ObjectStamp),
    /// Result of a condition.
    Logic(TriState),
    /// Type metadata pointer (a loaded hub).
    Hub,
    /// No value.
    Void,
    /// Unreachable: no value can flow here.
    Illegal,
}

impl Stamp {
    #[inline]
    pub fn int(bits: u8) -> Self {
        Stamp::Integer(IntegerStamp::unrestricted(bits))
    }

    #[inline]
    pub fn object() -> Self {
        Stamp::Object(ObjectStamp::unrestricted())
    }

    #[inline]
    pub fn logic() -> Self {
        Stamp::Logic(TriState::Unknown)
    }

    /// Stamp of a single constant.
    pub fn for_constant(constant: &Constant) -> Self {
        match *constant {
            Constant::Int { bits, value } => Stamp::Integer(IntegerStamp::constant(bits, value)),
            Constant::Bool(b) => Stamp::Logic(TriState::from_bool(b)),
            Constant::Null => Stamp::Object(ObjectStamp::always_null()),
            Constant::Hub(_) => Stamp::Hub,
        }
    }

    /// The single value this stamp admits, if there is one.
    ///
    /// Hubs are not recovered from stamps; only hub constants carry a type.
    pub fn as_constant(&self) -> Option<Constant> {
        match self {
            Stamp::Integer(s) => s.as_constant().map(|value| Constant::Int {
                bits: s.bits(),
                value,
            }),
            Stamp::Object(s) if s.is_always_null() && !s.is_empty() => Some(Constant::Null),
            Stamp::Logic(t) => t.to_bool().map(Constant::Bool),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&IntegerStamp> {
        match self {
            Stamp::Integer(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectStamp> {
        match self {
            Stamp::Object(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> TriState {
        match self {
            Stamp::Logic(t) => *t,
            _ => TriState::Unknown,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Stamp::Illegal => true,
            Stamp::Integer(s) => s.is_empty(),
            Stamp::Object(s) => s.is_empty(),
            _ => false,
        }
    }

    /// True if both stamps describe the same kind of value.
    pub fn is_compatible(&self, other: &Stamp) -> bool {
        match (self, other) {
            (Stamp::Illegal, _) | (_, Stamp::Illegal) => true,
            (Stamp::Integer(a), Stamp::Integer(b)) => a.bits() == b.bits(),
            (Stamp::Object(_), Stamp::Object(_))
            | (Stamp::Logic(_), Stamp::Logic(_))
            | (Stamp::Hub, Stamp::Hub)
            | (Stamp::Void, Stamp::Void) => true,
            _ => false,
        }
    }

    /// Least upper bound. Incompatible kinds collapse to `Void`.
    pub fn meet(&self, other: &Stamp, types: &dyn TypeResolver) -> Stamp {
        match (self, other) {
            (Stamp::Illegal, s) | (s, Stamp::Illegal) => s.clone(),
            (Stamp::Integer(a), Stamp::Integer(b)) if a.bits() == b.bits() => {
                Stamp::Integer(a.meet(b))
            }
            (Stamp::Object(a), Stamp::Object(b)) => Stamp::Object(a.meet(b, types)),
            (Stamp::Logic(a), Stamp::Logic(b)) => Stamp::Logic(a.meet(*b)),
            (Stamp::Hub, Stamp::Hub) => Stamp::Hub,
            _ => Stamp::Void,
        }
    }

    /// Greatest lower bound, never wider than `self`.
    ///
    /// Incompatible kinds carry no information for each other, so `self` is
    /// returned unchanged.
    pub fn improve_with(&self, other: &Stamp, types: &dyn TypeResolver) -> Stamp {
        let improved = match (self, other) {
            (Stamp::Illegal, _) | (_, Stamp::Illegal) => Stamp::Illegal,
            (Stamp::Integer(a), Stamp::Integer(b)) if a.bits() == b.bits() => {
                Stamp::Integer(a.improve_with(b))
            }
            (Stamp::Object(a), Stamp::Object(b)) => Stamp::Object(a.improve_with(b, types)),
            (Stamp::Logic(a), Stamp::Logic(b)) => match (a, b) {
                (TriState::Unknown, t) | (t, TriState::Unknown) => Stamp::Logic(*t),
                (x, y) if x == y => Stamp::Logic(*x),
                _ => Stamp::Illegal,
            },
            _ => self.clone(),
        };
        if improved.is_empty() {
            return Stamp::Illegal;
        }
        improved
    }

    /// True if every value admitted by `self` is admitted by `other`.
    pub fn is_within(&self, other: &Stamp, types: &dyn TypeResolver) -> bool {
        match (self, other) {
            (s, _) if s.is_empty() => true,
            (Stamp::Integer(a), Stamp::Integer(b)) => a.bits() == b.bits() && a.is_within(b),
            (Stamp::Object(a), Stamp::Object(b)) => a.is_within(b, types),
            (Stamp::Logic(a), Stamp::Logic(b)) => *b == TriState::Unknown || a == b,
            (Stamp::Hub, Stamp::Hub) | (Stamp::Void, Stamp::Void) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Integer(s) => write!(f, "{s}"),
            Stamp::Object(s) => write!(f, "{s}"),
            Stamp::Logic(TriState::Unknown) => write!(f, "logic"),
            Stamp::Logic(t) => write!(f, "logic {}", t.to_bool().unwrap_or_default()),
            Stamp::Hub => write!(f, "hub"),
            Stamp::Void => write!(f, "void"),
            Stamp::Illegal => write!(f, "illegal"),
        }
    }
}
