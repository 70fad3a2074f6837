//! Process-wide assumption table.
//!
//! Installed code registers every assumption it depends on. When an event
//! breaks an assumption, all code depending on it is flagged invalid and a
//! deoptimization request is produced for each piece of code, exactly once.
//!
//! # Protocol
//!
//! - `install`: for each assumption, under its entry lock, check it is not
//!   tombstoned and still holds in the current type universe, then add the
//!   code as a dependent. If any assumption is already broken the
//!   registration is rolled back and the code is never valid. Checking the
//!   universe covers events that fired before anyone depended on the
//!   assumption, when `notify` had no entry to tombstone.
//! - `notify`: mark every violated assumption invalid (a tombstone that is
//!   never revived) and invalidate its dependents.
//!
//! Invalidation of a single piece of code is a compare-and-swap on its
//! state, so concurrent events cannot deoptimize it twice.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{Assumption, Assumptions};
use crate::error::{CompileError, CompileResult};
use crate::types::{MethodId, TypeId, TypeResolver};

// =============================================================================
// Installed Code
// =============================================================================

/// Identifier of one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompilationId(pub u64);

impl std::fmt::Display for CompilationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Validity of installed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodeState {
    Valid = 0,
    Invalidated = 1,
}

/// Handle to a compiled method that depends on assumptions.
#[derive(Debug)]
pub struct InstalledCode {
    id: CompilationId,
    method: MethodId,
    state: AtomicU8,
    assumptions: Vec<Assumption>,
}

impl InstalledCode {
    #[inline]
    pub fn id(&self) -> CompilationId {
        self.id
    }

    #[inline]
    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn assumptions(&self) -> &[Assumption] {
        &self.assumptions
    }

    pub fn state(&self) -> CodeState {
        match self.state.load(Ordering::Acquire) {
            0 => CodeState::Valid,
            _ => CodeState::Invalidated,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state() == CodeState::Valid
    }

    /// Flag the code invalid. Returns `true` only for the caller that
    /// performed the transition.
    pub fn invalidate(&self) -> bool {
        self.state
            .compare_exchange(
                CodeState::Valid as u8,
                CodeState::Invalidated as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

// =============================================================================
// Events
// =============================================================================

/// Something that may break assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// A new type was added to the hierarchy.
    TypeLoaded(TypeId),
    /// A specific assumption is withdrawn.
    Withdrawn(Assumption),
}

/// Request to deoptimize one piece of installed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeoptRequest {
    pub code: CompilationId,
    pub method: MethodId,
    /// The assumption whose failure triggered the request.
    pub assumption: Assumption,
}

/// Counters of the assumption table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssumptionStats {
    pub installs: u64,
    pub rejected_installs: u64,
    pub invalidated_assumptions: u64,
    pub invalidated_code: u64,
}

// =============================================================================
// Table
// =============================================================================

#[derive(Debug, Default)]
struct Entry {
    invalid: bool,
    dependents: Vec<Arc<InstalledCode>>,
}

/// Thread-safe registry from assumption to dependent installed code.
#[derive(Debug)]
pub struct AssumptionTable {
    entries: DashMap<Assumption, Entry>,
    next_id: AtomicU64,
    history: Mutex<Vec<DeoptRequest>>,
    max_history: usize,
    installs: AtomicU64,
    rejected_installs: AtomicU64,
    invalidated_assumptions: AtomicU64,
    invalidated_code: AtomicU64,
}

impl AssumptionTable {
    pub fn new() -> Self {
        Self::with_history_size(1000)
    }

    pub fn with_history_size(max_history: usize) -> Self {
        AssumptionTable {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            history: Mutex::new(Vec::new()),
            max_history,
            installs: AtomicU64::new(0),
            rejected_installs: AtomicU64::new(0),
            invalidated_assumptions: AtomicU64::new(0),
            invalidated_code: AtomicU64::new(0),
        }
    }

    /// `true` once `assumption` has been broken.
    pub fn is_invalidated(&self, assumption: &Assumption) -> bool {
        self.entries.get(assumption).is_some_and(|e| e.invalid)
    }

    /// Install code for `method` depending on `assumptions`.
    ///
    /// Fails with [`CompileError::AssumptionInvalidated`] if any assumption
    /// was broken before registration completed, whether an event
    /// tombstoned it or `types` no longer supports it; no dependent is left
    /// behind in that case.
    pub fn install(
        &self,
        method: MethodId,
        assumptions: &Assumptions,
        types: &dyn TypeResolver,
    ) -> CompileResult<Arc<InstalledCode>> {
        let code = Arc::new(InstalledCode {
            id: CompilationId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            method,
            state: AtomicU8::new(CodeState::Valid as u8),
            assumptions: assumptions.iter().copied().collect(),
        });

        for (registered, assumption) in code.assumptions.iter().enumerate() {
            let mut entry = self.entries.entry(*assumption).or_default();
            // A notify that has not reached this entry yet will find the
            // code registered; one that already passed it left a universe
            // in which the assumption fails here.
            if entry.invalid || !assumption.holds(types) {
                drop(entry);
                code.invalidate();
                self.unregister(&code, &code.assumptions[..registered]);
                self.rejected_installs.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%method, %assumption, "install rejected: assumption no longer holds");
                return Err(CompileError::AssumptionInvalidated(*assumption));
            }
            entry.dependents.push(Arc::clone(&code));
        }

        self.installs.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%method, code = %code.id, assumptions = code.assumptions.len(), "code installed");
        Ok(code)
    }

    fn unregister(&self, code: &Arc<InstalledCode>, assumptions: &[Assumption]) {
        for assumption in assumptions {
            if let Some(mut entry) = self.entries.get_mut(assumption) {
                entry.dependents.retain(|c| !Arc::ptr_eq(c, code));
            }
        }
    }

    /// Process an event, invalidating broken assumptions and their code.
    pub fn notify(&self, event: InvalidationEvent, types: &dyn TypeResolver) -> Vec<DeoptRequest> {
        let mut requests = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.invalid || !violates(&event, entry.key(), types) {
                continue;
            }
            let assumption = *entry.key();
            entry.invalid = true;
            self.invalidated_assumptions.fetch_add(1, Ordering::Relaxed);
            tracing::info!(%assumption, ?event, dependents = entry.dependents.len(), "assumption invalidated");
            for code in std::mem::take(&mut entry.dependents) {
                if code.invalidate() {
                    self.invalidated_code.fetch_add(1, Ordering::Relaxed);
                    requests.push(DeoptRequest {
                        code: code.id,
                        method: code.method,
                        assumption,
                    });
                }
            }
        }

        // Withdrawing an assumption nobody registered still tombstones it.
        if let InvalidationEvent::Withdrawn(assumption) = event {
            let mut entry = self.entries.entry(assumption).or_default();
            if !entry.invalid {
                entry.invalid = true;
                self.invalidated_assumptions.fetch_add(1, Ordering::Relaxed);
            }
        }

        if !requests.is_empty() {
            let mut history = self.history.lock();
            history.extend(requests.iter().cloned());
            let overflow = history.len().saturating_sub(self.max_history);
            history.drain(..overflow);
        }
        requests
    }

    /// Convenience for `notify(TypeLoaded(ty))`.
    pub fn type_loaded(&self, ty: TypeId, types: &dyn TypeResolver) -> Vec<DeoptRequest> {
        self.notify(InvalidationEvent::TypeLoaded(ty), types)
    }

    /// Number of live code objects depending on `assumption`.
    pub fn dependent_count(&self, assumption: &Assumption) -> usize {
        self.entries
            .get(assumption)
            .map_or(0, |e| e.dependents.iter().filter(|c| c.is_valid()).count())
    }

    /// The most recent deoptimization requests, oldest first.
    pub fn recent_requests(&self, count: usize) -> Vec<DeoptRequest> {
        let history = self.history.lock();
        let start = history.len().saturating_sub(count);
        history[start..].to_vec()
    }

    pub fn stats(&self) -> AssumptionStats {
        AssumptionStats {
            installs: self.installs.load(Ordering::Relaxed),
            rejected_installs: self.rejected_installs.load(Ordering::Relaxed),
            invalidated_assumptions: self.invalidated_assumptions.load(Ordering::Relaxed),
            invalidated_code: self.invalidated_code.load(Ordering::Relaxed),
        }
    }
}

impl Default for AssumptionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `event` breaks `assumption`.
fn violates(event: &InvalidationEvent, assumption: &Assumption, types: &dyn TypeResolver) -> bool {
    match (event, assumption) {
        (InvalidationEvent::Withdrawn(a), b) => a == b,
        (InvalidationEvent::TypeLoaded(new), Assumption::LeafConcreteSubtype { context, subtype }) => {
            new != subtype && types.is_assignable_from(*context, *new)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassFlags, TypeHierarchy};

    fn setup() -> (TypeHierarchy, TypeId, TypeId, Assumption) {
        let types = TypeHierarchy::new();
        let shape = types.define_class("Shape", types.root(), &[], ClassFlags::ABSTRACT);
        let circle = types.define_class("Circle", shape, &[], ClassFlags::empty());
        let assumption = Assumption::LeafConcreteSubtype {
            context: shape,
            subtype: circle,
        };
        (types, shape, circle, assumption)
    }

    fn with(assumption: Assumption) -> Assumptions {
        let mut set = Assumptions::new(true);
        set.record(assumption);
        set
    }

    #[test]
    fn test_install_and_invalidate() {
        let (types, shape, _, assumption) = setup();
        let table = AssumptionTable::new();
        let code = table.install(MethodId::new(1), &with(assumption), &types).expect("valid");
        assert!(code.is_valid());
        assert_eq!(table.dependent_count(&assumption), 1);

        let square = types.define_class("Square", shape, &[], ClassFlags::empty());
        let requests = table.type_loaded(square, &types);

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].code, code.id());
        assert!(!code.is_valid());
        assert!(table.is_invalidated(&assumption));
        assert_eq!(table.stats().invalidated_code, 1);
    }

    #[test]
    fn test_unrelated_type_keeps_assumption() {
        let (types, _, _, assumption) = setup();
        let table = AssumptionTable::new();
        let code = table.install(MethodId::new(1), &with(assumption), &types).expect("valid");

        let other = types.define_class("Other", types.root(), &[], ClassFlags::empty());
        assert!(table.type_loaded(other, &types).is_empty());
        assert!(code.is_valid());
    }

    #[test]
    fn test_install_after_invalidation_fails() {
        let (types, shape, _, assumption) = setup();
        let table = AssumptionTable::new();
        table.install(MethodId::new(1), &with(assumption), &types).expect("valid");
        let square = types.define_class("Square", shape, &[], ClassFlags::empty());
        table.type_loaded(square, &types);

        let result = table.install(MethodId::new(2), &with(assumption), &types);
        assert_eq!(result.unwrap_err(), CompileError::AssumptionInvalidated(assumption));
        assert_eq!(table.stats().rejected_installs, 1);
    }

    #[test]
    fn test_install_rechecks_unregistered_assumption() {
        let (types, shape, _, assumption) = setup();
        let table = AssumptionTable::new();
        assert!(assumption.holds(&types));

        // Nothing depends on the assumption yet, so the event has no entry
        // to tombstone.
        let square = types.define_class("Square", shape, &[], ClassFlags::empty());
        assert!(table.type_loaded(square, &types).is_empty());
        assert!(!assumption.holds(&types));

        let result = table.install(MethodId::new(1), &with(assumption), &types);
        assert_eq!(result.unwrap_err(), CompileError::AssumptionInvalidated(assumption));
        assert_eq!(table.dependent_count(&assumption), 0);
        assert_eq!(table.stats().rejected_installs, 1);
        assert_eq!(table.stats().installs, 0);
    }

    #[test]
    fn test_withdrawn_assumption_is_tombstoned() {
        let (types, _, _, assumption) = setup();
        let table = AssumptionTable::new();
        table.notify(InvalidationEvent::Withdrawn(assumption), &types);
        assert!(table.is_invalidated(&assumption));
        assert!(table.install(MethodId::new(1), &with(assumption), &types).is_err());
    }

    #[test]
    fn test_concurrent_invalidation_deopts_once() {
        let (types, shape, _, assumption) = setup();
        let types = Arc::new(types);
        let table = Arc::new(AssumptionTable::new());
        let codes: Vec<_> = (0..16)
            .map(|i| table.install(MethodId::new(i), &with(assumption), &*types).expect("valid"))
            .collect();

        let a = types.define_class("SquareA", shape, &[], ClassFlags::empty());
        let b = types.define_class("SquareB", shape, &[], ClassFlags::empty());

        let handles: Vec<_> = [a, b, a, b]
            .into_iter()
            .map(|ty| {
                let table = Arc::clone(&table);
                let types = Arc::clone(&types);
                std::thread::spawn(move || table.type_loaded(ty, &*types).len())
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().expect("thread")).sum();

        assert_eq!(total, codes.len());
        assert!(codes.iter().all(|c| !c.is_valid()));
    }
}
