//! Assumptions: facts about the loaded type universe that compiled code
//! relies on but that loading further types can break.
//!
//! # Architecture
//!
//! ```text
//! canonicalizer ──records──▶ Assumptions (per graph)
//!                                 │ install
//!                                 ▼
//! type loading ──notify──▶ AssumptionTable (process wide)
//!                                 │ invalidates
//!                                 ▼
//!                          InstalledCode ──▶ DeoptRequest
//! ```

mod table;

pub use table::{
    AssumptionStats, AssumptionTable, CodeState, CompilationId, DeoptRequest, InstalledCode,
    InvalidationEvent,
};

use std::collections::BTreeSet;
use std::fmt;

use smallvec::SmallVec;

use crate::types::{TypeId, TypeResolver};

/// A fact about the current type universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Assumption {
    /// `subtype` is the only concrete type assignable to `context`.
    LeafConcreteSubtype { context: TypeId, subtype: TypeId },
}

impl Assumption {
    /// The type whose subtype set this assumption constrains.
    pub fn context(&self) -> TypeId {
        match *self {
            Assumption::LeafConcreteSubtype { context, .. } => context,
        }
    }

    /// Whether the fact is still true in the universe `types` describes.
    pub fn holds(&self, types: &dyn TypeResolver) -> bool {
        match *self {
            Assumption::LeafConcreteSubtype { context, subtype } => types
                .find_leaf_concrete_subtype(context)
                .is_some_and(|leaf| leaf.result() == subtype),
        }
    }
}

impl fmt::Display for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assumption::LeafConcreteSubtype { context, subtype } => {
                write!(f, "leaf concrete subtype of {context} is {subtype}")
            }
        }
    }
}

/// The set of assumptions one compilation depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assumptions {
    allowed: bool,
    recorded: BTreeSet<Assumption>,
}

impl Assumptions {
    /// Create an empty set. When `allowed` is false nothing may be recorded
    /// and every assumption-dependent optimization must be skipped.
    pub fn new(allowed: bool) -> Self {
        Assumptions {
            allowed,
            recorded: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn allows(&self) -> bool {
        self.allowed
    }

    pub fn set_allowed(&mut self, allowed: bool) {
        self.allowed = allowed;
    }

    /// Record one assumption. Returns `false` if recording is not allowed.
    pub fn record(&mut self, assumption: Assumption) -> bool {
        if !self.allowed {
            return false;
        }
        self.recorded.insert(assumption);
        true
    }

    pub fn record_all(&mut self, assumptions: &[Assumption]) -> bool {
        assumptions.iter().all(|a| self.record(*a))
    }

    /// Fold another compilation's assumptions into this one (inlining).
    pub fn merge(&mut self, other: &Assumptions) -> bool {
        if other.is_empty() {
            return true;
        }
        if !self.allowed {
            return false;
        }
        self.recorded.extend(other.recorded.iter().copied());
        true
    }

    pub fn contains(&self, assumption: &Assumption) -> bool {
        self.recorded.contains(assumption)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Assumption> {
        self.recorded.iter()
    }

    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}

/// A query answer that holds only while its assumptions do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumptionResult<T> {
    result: T,
    assumptions: SmallVec<[Assumption; 1]>,
}

impl<T: Copy> AssumptionResult<T> {
    /// An answer that holds unconditionally.
    pub fn new(result: T) -> Self {
        AssumptionResult {
            result,
            assumptions: SmallVec::new(),
        }
    }

    pub fn with_assumption(result: T, assumption: Assumption) -> Self {
        let mut assumptions = SmallVec::new();
        assumptions.push(assumption);
        AssumptionResult {
            result,
            assumptions,
        }
    }

    #[inline]
    pub fn result(&self) -> T {
        self.result
    }

    #[inline]
    pub fn assumptions(&self) -> &[Assumption] {
        &self.assumptions
    }

    pub fn is_assumption_free(&self) -> bool {
        self.assumptions.is_empty()
    }

    /// Whether this answer may be used by a compilation whose assumption
    /// set is `target` (`None` when the compilation has no set at all).
    pub fn can_record_to(&self, target: Option<&Assumptions>) -> bool {
        self.assumptions.is_empty() || target.is_some_and(Assumptions::allows)
    }
}
