//! In-memory class hierarchy.
//!
//! Subtype tests follow the classic display scheme: a class records its
//! whole superclass chain ("primary supers"), so a class-vs-class test is a
//! single indexed load. Interface tests scan the transitive interface list
//! ("secondary supers") and remember the last hit in a one-entry cache.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::{TypeId, TypeResolver};
use crate::assume::{Assumption, AssumptionResult};

bitflags! {
    /// Modifiers of a class definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassFlags: u8 {
        const ABSTRACT = 1 << 0;
        const FINAL = 1 << 1;
    }
}

/// Shape of a loaded type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Array,
}

const NO_CACHED_SUPER: u32 = u32::MAX;

#[derive(Debug)]
struct TypeInfo {
    name: String,
    kind: TypeKind,
    flags: ClassFlags,
    component: Option<TypeId>,
    /// Superclass chain from the root down to this type (classes only).
    primary_supers: Vec<TypeId>,
    /// Every interface this type implements or extends, transitively.
    secondary_supers: SmallVec<[TypeId; 4]>,
    /// Direct subclasses, implementors and extending interfaces.
    direct_subtypes: Vec<TypeId>,
    /// Last secondary super that satisfied a runtime check.
    secondary_cache: AtomicU32,
}

impl TypeInfo {
    fn is_concrete(&self) -> bool {
        self.kind == TypeKind::Class && !self.flags.contains(ClassFlags::ABSTRACT)
    }
}

#[derive(Debug, Default)]
struct Registry {
    types: Vec<TypeInfo>,
    arrays: FxHashMap<TypeId, TypeId>,
    by_name: FxHashMap<String, TypeId>,
}

impl Registry {
    fn info(&self, ty: TypeId) -> &TypeInfo {
        &self.types[ty.index() as usize]
    }

    fn push(&mut self, info: TypeInfo) -> TypeId {
        let id = TypeId::new(self.types.len() as u32);
        self.by_name.insert(info.name.clone(), id);
        self.types.push(info);
        id
    }

    fn assignable(&self, ty: TypeId, other: TypeId) -> bool {
        if ty == other || ty == ROOT {
            return true;
        }
        let target = self.info(ty);
        let source = self.info(other);
        match (target.kind, source.kind) {
            (TypeKind::Array, TypeKind::Array) => match (target.component, source.component) {
                (Some(t), Some(s)) => self.assignable(t, s),
                _ => false,
            },
            (_, TypeKind::Array) | (TypeKind::Array, _) => false,
            (TypeKind::Interface, _) => source.secondary_supers.contains(&ty),
            (TypeKind::Class, TypeKind::Interface) => false,
            (TypeKind::Class, TypeKind::Class) => {
                let depth = target.primary_supers.len() - 1;
                source.primary_supers.get(depth) == Some(&ty)
            }
        }
    }

    fn as_exact(&self, ty: TypeId) -> Option<TypeId> {
        let info = self.info(ty);
        match info.kind {
            TypeKind::Class => (info.flags.contains(ClassFlags::FINAL)
                && !info.flags.contains(ClassFlags::ABSTRACT))
            .then_some(ty),
            TypeKind::Interface => None,
            TypeKind::Array => info
                .component
                .and_then(|c| self.as_exact(c))
                .map(|_| ty),
        }
    }

    /// Every loaded type assignable to `ty`, including `ty`.
    fn transitive_subtypes(&self, ty: TypeId) -> Vec<TypeId> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![ty];
        let mut out = Vec::new();
        while let Some(t) = stack.pop() {
            if !seen.insert(t) {
                continue;
            }
            out.push(t);
            stack.extend(self.info(t).direct_subtypes.iter().copied());
        }
        out
    }
}

const ROOT: TypeId = TypeId::new(0);

/// A thread-safe, growable class hierarchy.
///
/// Types are only ever added. Loading a type while compilations are running
/// is safe; compilations that relied on the hierarchy being closed learn
/// about it through the assumption table.
#[derive(Debug)]
pub struct TypeHierarchy {
    registry: RwLock<Registry>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl TypeHierarchy {
    /// The root class `Object`.
    pub const ROOT: TypeId = ROOT;

    /// Create a hierarchy containing only the root class `Object`.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        registry.push(TypeInfo {
            name: "Object".to_string(),
            kind: TypeKind::Class,
            flags: ClassFlags::empty(),
            component: None,
            primary_supers: vec![ROOT],
            secondary_supers: SmallVec::new(),
            direct_subtypes: Vec::new(),
            secondary_cache: AtomicU32::new(NO_CACHED_SUPER),
        });
        TypeHierarchy {
            registry: RwLock::new(registry),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Load a class extending `superclass` and implementing `interfaces`.
    pub fn define_class(
        &self,
        name: &str,
        superclass: TypeId,
        interfaces: &[TypeId],
        flags: ClassFlags,
    ) -> TypeId {
        let mut registry = self.registry.write();
        debug_assert_eq!(registry.info(superclass).kind, TypeKind::Class);

        let mut primary_supers = registry.info(superclass).primary_supers.clone();
        let mut secondary_supers = registry.info(superclass).secondary_supers.clone();
        for &iface in interfaces {
            for &s in std::iter::once(&iface).chain(registry.info(iface).secondary_supers.iter()) {
                if !secondary_supers.contains(&s) {
                    secondary_supers.push(s);
                }
            }
        }
        let id = registry.push(TypeInfo {
            name: name.to_string(),
            kind: TypeKind::Class,
            flags,
            component: None,
            primary_supers: Vec::new(),
            secondary_supers,
            direct_subtypes: Vec::new(),
            secondary_cache: AtomicU32::new(NO_CACHED_SUPER),
        });
        primary_supers.push(id);
        registry.types[id.index() as usize].primary_supers = primary_supers;
        registry.types[superclass.index() as usize].direct_subtypes.push(id);
        for &iface in interfaces {
            registry.types[iface.index() as usize].direct_subtypes.push(id);
        }
        tracing::trace!(%id, name, "class loaded");
        id
    }

    /// Load an interface extending `supers`.
    pub fn define_interface(&self, name: &str, supers: &[TypeId]) -> TypeId {
        let mut registry = self.registry.write();
        let mut secondary_supers: SmallVec<[TypeId; 4]> = SmallVec::new();
        for &sup in supers {
            for &s in std::iter::once(&sup).chain(registry.info(sup).secondary_supers.iter()) {
                if !secondary_supers.contains(&s) {
                    secondary_supers.push(s);
                }
            }
        }
        let id = registry.push(TypeInfo {
            name: name.to_string(),
            kind: TypeKind::Interface,
            flags: ClassFlags::ABSTRACT,
            component: None,
            primary_supers: vec![ROOT],
            secondary_supers,
            direct_subtypes: Vec::new(),
            secondary_cache: AtomicU32::new(NO_CACHED_SUPER),
        });
        for &sup in supers {
            registry.types[sup.index() as usize].direct_subtypes.push(id);
        }
        tracing::trace!(%id, name, "interface loaded");
        id
    }

    /// The array type with the given component, loading it on first use.
    pub fn array_of(&self, component: TypeId) -> TypeId {
        if let Some(&id) = self.registry.read().arrays.get(&component) {
            return id;
        }
        let mut registry = self.registry.write();
        if let Some(&id) = registry.arrays.get(&component) {
            return id;
        }
        let name = format!("{}[]", registry.info(component).name);
        let id = registry.push(TypeInfo {
            name,
            kind: TypeKind::Array,
            flags: ClassFlags::empty(),
            component: Some(component),
            primary_supers: vec![ROOT],
            secondary_supers: SmallVec::new(),
            direct_subtypes: Vec::new(),
            secondary_cache: AtomicU32::new(NO_CACHED_SUPER),
        });
        registry.arrays.insert(component, id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.registry.read().by_name.get(name).copied()
    }

    pub fn kind(&self, ty: TypeId) -> TypeKind {
        self.registry.read().info(ty).kind
    }

    pub fn is_concrete(&self, ty: TypeId) -> bool {
        self.registry.read().info(ty).is_concrete()
    }

    /// Number of loaded types.
    pub fn len(&self) -> usize {
        self.registry.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// `(hits, misses)` of the secondary-super cache.
    pub fn secondary_cache_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for TypeHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeResolver for TypeHierarchy {
    fn root(&self) -> TypeId {
        ROOT
    }

    fn name(&self, ty: TypeId) -> String {
        self.registry.read().info(ty).name.clone()
    }

    fn is_assignable_from(&self, ty: TypeId, other: TypeId) -> bool {
        self.registry.read().assignable(ty, other)
    }

    fn is_interface(&self, ty: TypeId) -> bool {
        self.registry.read().info(ty).kind == TypeKind::Interface
    }

    fn component_type(&self, ty: TypeId) -> Option<TypeId> {
        self.registry.read().info(ty).component
    }

    fn as_exact_type(&self, ty: TypeId) -> Option<TypeId> {
        self.registry.read().as_exact(ty)
    }

    fn find_leaf_concrete_subtype(&self, ty: TypeId) -> Option<AssumptionResult<TypeId>> {
        let registry = self.registry.read();
        if let Some(exact) = registry.as_exact(ty) {
            return Some(AssumptionResult::new(exact));
        }
        if registry.info(ty).kind == TypeKind::Array {
            return None;
        }
        let mut concrete = registry
            .transitive_subtypes(ty)
            .into_iter()
            .filter(|&t| registry.info(t).is_concrete());
        let leaf = concrete.next()?;
        if concrete.next().is_some() || !registry.info(leaf).direct_subtypes.is_empty() {
            return None;
        }
        Some(AssumptionResult::with_assumption(
            leaf,
            Assumption::LeafConcreteSubtype {
                context: ty,
                subtype: leaf,
            },
        ))
    }

    fn find_least_common_ancestor(&self, a: TypeId, b: TypeId) -> TypeId {
        if a == b {
            return a;
        }
        let registry = self.registry.read();
        let (ia, ib) = (registry.info(a), registry.info(b));
        if ia.kind != TypeKind::Class || ib.kind != TypeKind::Class {
            return ROOT;
        }
        ia.primary_supers
            .iter()
            .zip(ib.primary_supers.iter())
            .take_while(|(x, y)| x == y)
            .last()
            .map_or(ROOT, |(x, _)| *x)
    }

    fn is_subtype_at_runtime(&self, sub: TypeId, sup: TypeId) -> bool {
        let registry = self.registry.read();
        let target = registry.info(sup);
        let source = registry.info(sub);
        if target.kind != TypeKind::Interface || source.kind == TypeKind::Array {
            return registry.assignable(sup, sub);
        }
        if source.secondary_cache.load(Ordering::Acquire) == sup.index() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let found = source.secondary_supers.contains(&sup);
        if found {
            source.secondary_cache.store(sup.index(), Ordering::Release);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_display_check() {
        let h = TypeHierarchy::new();
        let a = h.define_class("A", h.root(), &[], ClassFlags::empty());
        let b = h.define_class("B", a, &[], ClassFlags::empty());
        let c = h.define_class("C", h.root(), &[], ClassFlags::empty());

        assert!(h.is_assignable_from(a, b));
        assert!(!h.is_assignable_from(b, a));
        assert!(!h.is_assignable_from(c, b));
        assert!(h.is_assignable_from(h.root(), c));
        assert_eq!(h.find_least_common_ancestor(b, a), a);
        assert_eq!(h.find_least_common_ancestor(b, c), h.root());
    }

    #[test]
    fn test_interfaces_are_secondary_supers() {
        let h = TypeHierarchy::new();
        let i = h.define_interface("I", &[]);
        let j = h.define_interface("J", &[i]);
        let a = h.define_class("A", h.root(), &[j], ClassFlags::empty());
        let b = h.define_class("B", a, &[], ClassFlags::empty());

        assert!(h.is_assignable_from(i, b));
        assert!(h.is_assignable_from(i, j));
        assert!(!h.is_assignable_from(j, i));
        assert_eq!(h.find_least_common_ancestor(a, i), h.root());
    }

    #[test]
    fn test_secondary_cache_hits_on_repeat() {
        let h = TypeHierarchy::new();
        let i = h.define_interface("I", &[]);
        let a = h.define_class("A", h.root(), &[i], ClassFlags::empty());

        assert!(h.is_subtype_at_runtime(a, i));
        assert!(h.is_subtype_at_runtime(a, i));
        assert_eq!(h.secondary_cache_stats(), (1, 1));
    }

    #[test]
    fn test_arrays_are_covariant() {
        let h = TypeHierarchy::new();
        let a = h.define_class("A", h.root(), &[], ClassFlags::empty());
        let b = h.define_class("B", a, &[], ClassFlags::FINAL);
        let aa = h.array_of(a);
        let ba = h.array_of(b);

        assert_eq!(h.array_of(a), aa);
        assert!(h.is_assignable_from(aa, ba));
        assert!(!h.is_assignable_from(ba, aa));
        assert!(h.is_assignable_from(h.root(), aa));
        assert_eq!(h.as_exact_type(ba), Some(ba));
        assert_eq!(h.as_exact_type(aa), None);
        assert_eq!(h.name(ba), "B[]");
    }

    #[test]
    fn test_leaf_concrete_subtype() {
        let h = TypeHierarchy::new();
        let abs = h.define_class("Shape", h.root(), &[], ClassFlags::ABSTRACT);
        let circle = h.define_class("Circle", abs, &[], ClassFlags::empty());

        let result = h.find_leaf_concrete_subtype(abs).expect("single implementor");
        assert_eq!(result.result(), circle);
        assert_eq!(
            result.assumptions(),
            &[Assumption::LeafConcreteSubtype {
                context: abs,
                subtype: circle
            }]
        );

        h.define_class("Square", abs, &[], ClassFlags::empty());
        assert!(h.find_leaf_concrete_subtype(abs).is_none());
    }

    #[test]
    fn test_exact_type_needs_no_assumption() {
        let h = TypeHierarchy::new();
        let f = h.define_class("F", h.root(), &[], ClassFlags::FINAL);
        let result = h.find_leaf_concrete_subtype(f).expect("final class");
        assert_eq!(result.result(), f);
        assert!(result.assumptions().is_empty());
    }
}
