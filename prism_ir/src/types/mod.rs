//! Type and method symbols, and the resolution service the optimizer queries.
//!
//! The optimizer never inspects type metadata directly. Every subtype,
//! exactness or leaf question goes through [`TypeResolver`], which lets
//! tests run against a small in-memory [`TypeHierarchy`] and lets a runtime
//! plug in its own class model.

mod checked;
mod hierarchy;

pub use checked::CheckedType;
pub use hierarchy::{ClassFlags, TypeHierarchy, TypeKind};

use std::fmt;

use crate::assume::AssumptionResult;

/// Handle of a loaded type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);

impl TypeId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        TypeId(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Handle of a method known to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(u32);

impl MethodId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        MethodId(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Symbol resolution service.
///
/// All queries reflect the set of types loaded at the time of the call.
/// Answers that could be invalidated by loading further types are returned
/// wrapped in an [`AssumptionResult`].
pub trait TypeResolver: Send + Sync {
    /// The root of the class hierarchy.
    fn root(&self) -> TypeId;

    /// Human-readable name.
    fn name(&self, ty: TypeId) -> String;

    /// `true` if every instance of `other` is an instance of `ty`.
    fn is_assignable_from(&self, ty: TypeId, other: TypeId) -> bool;

    fn is_interface(&self, ty: TypeId) -> bool;

    /// Component type if `ty` is an array type.
    fn component_type(&self, ty: TypeId) -> Option<TypeId>;

    /// `Some(ty)` if no instance of `ty` can have a proper subtype as its
    /// runtime type, independent of what gets loaded later.
    fn as_exact_type(&self, ty: TypeId) -> Option<TypeId>;

    /// `true` if `ty` can never have subtypes.
    fn is_leaf(&self, ty: TypeId) -> bool {
        self.as_exact_type(ty).is_some()
    }

    /// The unique concrete subtype of `ty` (possibly `ty` itself), if there
    /// is exactly one among the types loaded so far.
    fn find_leaf_concrete_subtype(&self, ty: TypeId) -> Option<AssumptionResult<TypeId>>;

    /// Most specific common supertype used by stamp meets.
    fn find_least_common_ancestor(&self, a: TypeId, b: TypeId) -> TypeId;

    /// Runtime subtype test, as executed by compiled code.
    fn is_subtype_at_runtime(&self, sub: TypeId, sup: TypeId) -> bool {
        self.is_assignable_from(sup, sub)
    }

    /// Whether a single object could be an instance of both `a` and `b` even
    /// though neither is assignable from the other.
    ///
    /// Interfaces can be implemented by unrelated classes, so any interface
    /// (or array of interfaces) may share instances with anything.
    fn may_share_runtime_instances(&self, a: TypeId, b: TypeId) -> bool {
        self.is_interface_or_array_of_interface(a) || self.is_interface_or_array_of_interface(b)
    }

    fn is_interface_or_array_of_interface(&self, ty: TypeId) -> bool {
        let mut current = ty;
        while let Some(component) = self.component_type(current) {
            current = component;
        }
        self.is_interface(current)
    }
}
