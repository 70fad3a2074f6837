//! Deoptimization vocabulary.
//!
//! Compiled code gives up on a speculation by producing a [`DeoptSignal`]
//! instead of a value. The signal carries why the speculation failed, what
//! the runtime should do about the compiled code, and which speculation to
//! blame. Signals flow as ordinary values ([`Guarded`]); there is no
//! non-local control transfer.

mod handler;
mod speculation;
mod stats;

pub use handler::{DeoptHandler, DeoptResolution, DEFAULT_RECOMPILE_THRESHOLD};
pub use speculation::SpeculationLog;
pub use stats::{DeoptSiteKey, DeoptStats, SiteSnapshot};

use std::fmt;

use crate::types::MethodId;

// =============================================================================
// Deopt Reason
// =============================================================================

/// Why compiled code stopped executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeoptReason {
    /// A checked cast failed.
    ClassCastException = 0,
    /// A null value reached a null-hostile operation.
    NullCheckException = 1,
    /// Integer division by zero.
    ArithmeticException = 2,
    BoundsCheckException = 3,
    /// Code the profile said was never executed was reached.
    UnreachedCode = 4,
    /// A type check protecting inlined code failed.
    TypeCheckedInliningViolated = 5,
    /// A profile-derived type check failed.
    OptimizedTypeCheckViolated = 6,
    TransferToInterpreter = 7,
    RuntimeConstraint = 8,
    Unresolved = 9,
}

impl DeoptReason {
    pub const COUNT: usize = 10;

    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ClassCastException),
            1 => Some(Self::NullCheckException),
            2 => Some(Self::ArithmeticException),
            3 => Some(Self::BoundsCheckException),
            4 => Some(Self::UnreachedCode),
            5 => Some(Self::TypeCheckedInliningViolated),
            6 => Some(Self::OptimizedTypeCheckViolated),
            7 => Some(Self::TransferToInterpreter),
            8 => Some(Self::RuntimeConstraint),
            9 => Some(Self::Unresolved),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ClassCastException => "ClassCastException",
            Self::NullCheckException => "NullCheckException",
            Self::ArithmeticException => "ArithmeticException",
            Self::BoundsCheckException => "BoundsCheckException",
            Self::UnreachedCode => "UnreachedCode",
            Self::TypeCheckedInliningViolated => "TypeCheckedInliningViolated",
            Self::OptimizedTypeCheckViolated => "OptimizedTypeCheckViolated",
            Self::TransferToInterpreter => "TransferToInterpreter",
            Self::RuntimeConstraint => "RuntimeConstraint",
            Self::Unresolved => "Unresolved",
        }
    }
}

impl fmt::Display for DeoptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Deopt Action
// =============================================================================

/// What the runtime does with the compiled code after a deoptimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeoptAction {
    /// Keep the code; just resume in the interpreter.
    None,
    /// Keep the code until this site has deoptimized too often.
    RecompileIfTooManyDeopts,
    /// Discard the code, reset the profile, compile again later.
    InvalidateReprofile,
    /// Discard the code and compile again without the failed speculation.
    InvalidateRecompile,
    /// Discard the code and never compile this method again.
    InvalidateStopCompiling,
}

impl DeoptAction {
    /// Whether the compiled code is discarded immediately.
    #[inline]
    pub const fn invalidates_code(self) -> bool {
        matches!(
            self,
            Self::InvalidateReprofile | Self::InvalidateRecompile | Self::InvalidateStopCompiling
        )
    }

    /// Whether a later compilation may attempt the same speculation again.
    ///
    /// Reprofiling gives the optimization a fresh chance with new data;
    /// recompiling after a failed speculation must not repeat it.
    #[inline]
    pub const fn retries_speculation(self) -> bool {
        matches!(
            self,
            Self::None | Self::RecompileIfTooManyDeopts | Self::InvalidateReprofile
        )
    }
}

impl fmt::Display for DeoptAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::RecompileIfTooManyDeopts => "RecompileIfTooManyDeopts",
            Self::InvalidateReprofile => "InvalidateReprofile",
            Self::InvalidateRecompile => "InvalidateRecompile",
            Self::InvalidateStopCompiling => "InvalidateStopCompiling",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Speculation Id
// =============================================================================

/// Identifies one speculation so its failure can be remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeculationId(u64);

impl SpeculationId {
    /// No speculation is involved.
    pub const NONE: SpeculationId = SpeculationId(0);

    /// The speculation made at `site` of `method`.
    #[inline]
    pub const fn new(method: MethodId, site: u32) -> Self {
        SpeculationId(((method.index() as u64 + 1) << 32) | site as u64)
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpeculationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("none")
        } else {
            write!(f, "s{:x}", self.0)
        }
    }
}

// =============================================================================
// Deopt Signal
// =============================================================================

/// A failed speculation, reported instead of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeoptSignal {
    pub reason: DeoptReason,
    pub action: DeoptAction,
    pub speculation: SpeculationId,
}

impl DeoptSignal {
    pub const fn new(reason: DeoptReason, action: DeoptAction, speculation: SpeculationId) -> Self {
        DeoptSignal {
            reason,
            action,
            speculation,
        }
    }
}

impl fmt::Display for DeoptSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deopt({}, {}", self.reason, self.action)?;
        if !self.speculation.is_none() {
            write!(f, ", {}", self.speculation)?;
        }
        f.write_str(")")
    }
}

/// Either a value or the deoptimization that replaced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Value(T),
    Deopt(DeoptSignal),
}

impl<T> Guarded<T> {
    #[inline]
    pub fn is_deopt(&self) -> bool {
        matches!(self, Guarded::Deopt(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        match self {
            Guarded::Value(v) => Guarded::Value(f(v)),
            Guarded::Deopt(s) => Guarded::Deopt(s),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Guarded<U>) -> Guarded<U> {
        match self {
            Guarded::Value(v) => f(v),
            Guarded::Deopt(s) => Guarded::Deopt(s),
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            Guarded::Value(v) => Some(v),
            Guarded::Deopt(_) => None,
        }
    }

    pub fn signal(&self) -> Option<DeoptSignal> {
        match self {
            Guarded::Value(_) => None,
            Guarded::Deopt(s) => Some(*s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trip() {
        for i in 0..DeoptReason::COUNT as u8 {
            let reason = DeoptReason::from_u8(i).expect("valid discriminant");
            assert_eq!(reason as u8, i);
        }
        assert!(DeoptReason::from_u8(DeoptReason::COUNT as u8).is_none());
    }

    #[test]
    fn test_action_retry_policy() {
        assert!(DeoptAction::InvalidateReprofile.retries_speculation());
        assert!(!DeoptAction::InvalidateRecompile.retries_speculation());
        assert!(!DeoptAction::InvalidateStopCompiling.retries_speculation());
        assert!(!DeoptAction::RecompileIfTooManyDeopts.invalidates_code());
    }

    #[test]
    fn test_speculation_ids_are_distinct() {
        let a = SpeculationId::new(MethodId::new(0), 7);
        let b = SpeculationId::new(MethodId::new(1), 7);
        assert_ne!(a, b);
        assert!(!a.is_none());
        assert!(SpeculationId::NONE.is_none());
    }

    #[test]
    fn test_guarded_short_circuits() {
        let signal = DeoptSignal::new(
            DeoptReason::ClassCastException,
            DeoptAction::InvalidateReprofile,
            SpeculationId::NONE,
        );
        let v: Guarded<i32> = Guarded::Deopt(signal);
        assert_eq!(v.map(|x| x + 1).signal(), Some(signal));
        assert_eq!(Guarded::Value(1).and_then(|x| Guarded::Value(x * 2)).value(), Some(2));
        assert_eq!(signal.to_string(), "deopt(ClassCastException, InvalidateReprofile)");
    }
}
