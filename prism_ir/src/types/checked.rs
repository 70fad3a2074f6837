use super::{TypeId, TypeResolver};
use crate::assume::Assumptions;

/// A type paired with whether the compiler may treat it as exact.
///
/// Exactness comes either from the type itself (final classes, arrays of
/// exact components) or, when the graph permits assumptions, from the type
/// currently having a single concrete implementation. The second case
/// records the assumption it depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckedType {
    ty: TypeId,
    exact: bool,
}

impl CheckedType {
    pub fn create(assumptions: &mut Assumptions, types: &dyn TypeResolver, ty: TypeId) -> Self {
        if let Some(exact) = types.as_exact_type(ty) {
            return CheckedType {
                ty: exact,
                exact: true,
            };
        }
        if assumptions.allows() {
            if let Some(leaf) = types.find_leaf_concrete_subtype(ty) {
                if leaf.result() == ty && leaf.can_record_to(Some(assumptions)) {
                    assumptions.record_all(leaf.assumptions());
                    return CheckedType { ty, exact: true };
                }
            }
        }
        CheckedType { ty, exact: false }
    }

    /// A type that is never treated as exact.
    pub const fn inexact(ty: TypeId) -> Self {
        CheckedType { ty, exact: false }
    }

    #[inline]
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    #[inline]
    pub fn is_exact(&self) -> bool {
        self.exact
    }
}
