//! Execution profiles.
//!
//! The interpreter fills a [`ProfileTable`] while a method runs; the graph
//! builder copies the relevant entries onto the nodes it creates, where the
//! inliner and the lowering phase read them.

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::types::{MethodId, TypeId};

/// How often a call site runs relative to its method's entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallSiteProfile {
    /// Expected executions per method invocation.
    pub probability: f64,
    /// Number of loops enclosing the site.
    pub loop_depth: u32,
}

impl CallSiteProfile {
    pub const fn new(probability: f64, loop_depth: u32) -> Self {
        CallSiteProfile {
            probability,
            loop_depth,
        }
    }

    /// This site's profile as seen from a caller site with `outer` profile.
    pub fn nested_in(&self, outer: &CallSiteProfile) -> Self {
        CallSiteProfile {
            probability: self.probability * outer.probability,
            loop_depth: self.loop_depth + outer.loop_depth,
        }
    }
}

impl Default for CallSiteProfile {
    fn default() -> Self {
        CallSiteProfile::new(1.0, 0)
    }
}

/// The bytecode position a profile entry was collected at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileSite {
    pub method: MethodId,
    pub bci: u32,
}

impl ProfileSite {
    pub const fn new(method: MethodId, bci: u32) -> Self {
        ProfileSite { method, bci }
    }
}

/// Receiver types observed at a type check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeProfile {
    entries: SmallVec<[(TypeId, f64); 4]>,
    null_seen: bool,
    /// Probability mass of types the profile had no room for.
    not_recorded: f64,
}

impl TypeProfile {
    pub fn new(entries: &[(TypeId, f64)], null_seen: bool, not_recorded: f64) -> Self {
        TypeProfile {
            entries: entries.iter().copied().collect(),
            null_seen,
            not_recorded,
        }
    }

    /// A profile that only ever saw `ty`.
    pub fn monomorphic_of(ty: TypeId) -> Self {
        Self::new(&[(ty, 1.0)], false, 0.0)
    }

    pub fn entries(&self) -> &[(TypeId, f64)] {
        &self.entries
    }

    pub fn null_seen(&self) -> bool {
        self.null_seen
    }

    /// The single type seen, if the profile is complete and has one entry.
    pub fn monomorphic(&self) -> Option<TypeId> {
        match self.entries.as_slice() {
            [(ty, _)] if self.not_recorded <= 0.0 => Some(*ty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MethodProfile {
    invocations: u64,
    call_sites: FxHashMap<u32, CallSiteProfile>,
    type_profiles: FxHashMap<u32, TypeProfile>,
}

/// Concurrent per-method profile store, keyed by bytecode index.
#[derive(Debug, Default)]
pub struct ProfileTable {
    methods: DashMap<MethodId, MethodProfile>,
}

impl ProfileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocation(&self, method: MethodId) {
        self.methods.entry(method).or_default().invocations += 1;
    }

    pub fn invocation_count(&self, method: MethodId) -> u64 {
        self.methods.get(&method).map_or(0, |m| m.invocations)
    }

    pub fn set_call_site(&self, method: MethodId, bci: u32, profile: CallSiteProfile) {
        self.methods
            .entry(method)
            .or_default()
            .call_sites
            .insert(bci, profile);
    }

    pub fn call_site(&self, method: MethodId, bci: u32) -> Option<CallSiteProfile> {
        self.methods
            .get(&method)
            .and_then(|m| m.call_sites.get(&bci).copied())
    }

    pub fn set_type_profile(&self, method: MethodId, bci: u32, profile: TypeProfile) {
        self.methods
            .entry(method)
            .or_default()
            .type_profiles
            .insert(bci, profile);
    }

    pub fn type_profile(&self, method: MethodId, bci: u32) -> Option<TypeProfile> {
        self.methods
            .get(&method)
            .and_then(|m| m.type_profiles.get(&bci).cloned())
    }

    /// Throw away everything collected for `method`.
    pub fn reset(&self, method: MethodId) {
        if self.methods.remove(&method).is_some() {
            tracing::debug!(%method, "profile reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monomorphic_requires_complete_profile() {
        let t = TypeId::new(4);
        assert_eq!(TypeProfile::monomorphic_of(t).monomorphic(), Some(t));
        assert_eq!(TypeProfile::new(&[(t, 0.9)], false, 0.1).monomorphic(), None);
        assert_eq!(
            TypeProfile::new(&[(t, 0.5), (TypeId::new(5), 0.5)], false, 0.0).monomorphic(),
            None
        );
    }

    #[test]
    fn test_nested_call_site_profile() {
        let outer = CallSiteProfile::new(0.5, 1);
        let inner = CallSiteProfile::new(0.5, 1);
        let nested = inner.nested_in(&outer);
        assert_eq!(nested.probability, 0.25);
        assert_eq!(nested.loop_depth, 2);
    }

    #[test]
    fn test_table_reset() {
        let table = ProfileTable::new();
        let m = MethodId::new(1);
        table.record_invocation(m);
        table.set_call_site(m, 4, CallSiteProfile::new(0.3, 0));
        assert_eq!(table.invocation_count(m), 1);
        assert_eq!(table.call_site(m, 4).map(|p| p.probability), Some(0.3));

        table.reset(m);
        assert_eq!(table.invocation_count(m), 0);
        assert!(table.call_site(m, 4).is_none());
    }
}
