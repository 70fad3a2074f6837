//! Callee graph provider.
//!
//! The inliner asks a [`CalleeProvider`] for the graph of each call target.
//! Providers are shared between concurrent compilations, so the trait is
//! `Send + Sync` and hands out graphs behind an `Arc`.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::ir::Graph;
use crate::types::MethodId;

/// Inlining annotation of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InlineHint {
    /// Let the policy decide.
    #[default]
    Default,
    /// Always inline.
    Always,
    /// Never inline.
    Never,
}

/// A callee graph with what the policy needs to know about it.
#[derive(Debug, Clone)]
pub struct CalleeGraph {
    pub graph: Graph,
    pub hint: InlineHint,
    /// Recognized compiler intrinsic.
    pub intrinsic: bool,
    /// Node count of the method's last low-level compilation, if any.
    pub compiled_size: Option<usize>,
}

impl CalleeGraph {
    pub fn new(graph: Graph) -> Self {
        CalleeGraph {
            graph,
            hint: InlineHint::Default,
            intrinsic: false,
            compiled_size: None,
        }
    }

    pub fn with_hint(mut self, hint: InlineHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn as_intrinsic(mut self) -> Self {
        self.intrinsic = true;
        self
    }

    pub fn with_compiled_size(mut self, size: usize) -> Self {
        self.compiled_size = Some(size);
        self
    }

    #[inline]
    pub fn method(&self) -> MethodId {
        self.graph.method()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.live_node_count()
    }
}

/// Source of callee graphs.
pub trait CalleeProvider: Send + Sync {
    fn callee(&self, method: MethodId) -> Option<Arc<CalleeGraph>>;

    fn has_callee(&self, method: MethodId) -> bool {
        self.callee(method).is_some()
    }
}

/// Thread-safe map of callee graphs.
#[derive(Debug, Default)]
pub struct CalleeRegistry {
    graphs: RwLock<FxHashMap<MethodId, Arc<CalleeGraph>>>,
}

impl CalleeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callee under its graph's method id, replacing any
    /// previous graph.
    pub fn register(&self, callee: CalleeGraph) {
        self.graphs.write().insert(callee.method(), Arc::new(callee));
    }

    pub fn unregister(&self, method: MethodId) -> Option<Arc<CalleeGraph>> {
        self.graphs.write().remove(&method)
    }

    pub fn len(&self) -> usize {
        self.graphs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.read().is_empty()
    }
}

impl CalleeProvider for CalleeRegistry {
    fn callee(&self, method: MethodId) -> Option<Arc<CalleeGraph>> {
        self.graphs.read().get(&method).cloned()
    }

    fn has_callee(&self, method: MethodId) -> bool {
        self.graphs.read().contains_key(&method)
    }
}

/// Expected number of calls one execution of `graph` makes.
pub fn invoke_probability(graph: &Graph) -> f64 {
    graph
        .invokes()
        .into_iter()
        .map(|invoke| graph.call_profile(invoke).map_or(1.0, |p| p.probability))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphBuilder;
    use crate::profile::{CallSiteProfile, ProfileTable};
    use crate::stamp::Stamp;
    use crate::types::TypeHierarchy;

    #[test]
    fn test_registry_lookup() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(3), "f", &types);
        let one = b.int(1);
        b.ret(Some(one));
        let registry = CalleeRegistry::new();
        registry.register(CalleeGraph::new(b.finish().expect("valid")).with_hint(InlineHint::Always));

        assert!(registry.has_callee(MethodId::new(3)));
        assert!(!registry.has_callee(MethodId::new(4)));
        let callee = registry.callee(MethodId::new(3)).expect("registered");
        assert_eq!(callee.hint, InlineHint::Always);
        assert!(registry.unregister(MethodId::new(3)).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invoke_probability_sums_sites() {
        let types = TypeHierarchy::new();
        let profiles = ProfileTable::new();
        profiles.set_call_site(MethodId::new(1), 0, CallSiteProfile::new(0.5, 0));
        profiles.set_call_site(MethodId::new(1), 1, CallSiteProfile::new(2.0, 1));
        let mut b = GraphBuilder::new(MethodId::new(1), "g", &types).with_profiles(&profiles);
        b.invoke(MethodId::new(2), &[], Stamp::Void, 0);
        b.invoke(MethodId::new(2), &[], Stamp::Void, 1);
        b.ret(None);
        let g = b.finish().expect("valid");
        assert!((invoke_probability(&g) - 2.5).abs() < 1e-9);
    }
}
