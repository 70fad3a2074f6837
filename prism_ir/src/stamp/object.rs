//! Object stamps: declared type, exactness and nullness.

use std::fmt;

use super::TriState;
use crate::types::{TypeId, TypeResolver};

/// Facts about a reference value.
///
/// `ty == None` means "any object". `exact` claims the runtime type is `ty`
/// itself rather than a subtype. `non_null` and `always_null` together mean
/// no value can flow here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectStamp {
    ty: Option<TypeId>,
    exact: bool,
    non_null: bool,
    always_null: bool,
}

impl ObjectStamp {
    pub const fn unrestricted() -> Self {
        ObjectStamp {
            ty: None,
            exact: false,
            non_null: false,
            always_null: false,
        }
    }

    /// Stamp of the null constant.
    pub const fn always_null() -> Self {
        ObjectStamp {
            ty: None,
            exact: false,
            non_null: false,
            always_null: true,
        }
    }

    pub const fn empty() -> Self {
        ObjectStamp {
            ty: None,
            exact: false,
            non_null: true,
            always_null: true,
        }
    }

    pub const fn declared(ty: TypeId) -> Self {
        ObjectStamp {
            ty: Some(ty),
            exact: false,
            non_null: false,
            always_null: false,
        }
    }

    pub const fn declared_non_null(ty: TypeId) -> Self {
        ObjectStamp {
            ty: Some(ty),
            exact: false,
            non_null: true,
            always_null: false,
        }
    }

    /// Possibly-null reference whose runtime type is exactly `ty`.
    pub const fn exact(ty: TypeId) -> Self {
        ObjectStamp {
            ty: Some(ty),
            exact: true,
            non_null: false,
            always_null: false,
        }
    }

    pub const fn exact_non_null(ty: TypeId) -> Self {
        ObjectStamp {
            ty: Some(ty),
            exact: true,
            non_null: true,
            always_null: false,
        }
    }

    /// Null-only stamp, or empty when `non_null` also holds.
    const fn null_only(non_null: bool) -> Self {
        if non_null {
            Self::empty()
        } else {
            Self::always_null()
        }
    }

    #[inline]
    pub fn ty(&self) -> Option<TypeId> {
        self.ty
    }

    #[inline]
    pub fn is_exact(&self) -> bool {
        self.exact
    }

    #[inline]
    pub fn is_non_null(&self) -> bool {
        self.non_null
    }

    #[inline]
    pub fn is_always_null(&self) -> bool {
        self.always_null
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.non_null && self.always_null
    }

    /// The same facts without the non-null claim.
    pub fn as_nullable(&self) -> Self {
        if self.is_empty() {
            return Self::always_null();
        }
        ObjectStamp {
            non_null: false,
            ..*self
        }
    }

    /// Least upper bound.
    pub fn meet(&self, other: &ObjectStamp, types: &dyn TypeResolver) -> ObjectStamp {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        if self.always_null {
            return ObjectStamp {
                non_null: false,
                ..*other
            };
        }
        if other.always_null {
            return ObjectStamp {
                non_null: false,
                ..*self
            };
        }
        let (ty, exact) = match (self.ty, other.ty) {
            (Some(a), Some(b)) if a == b => (Some(a), self.exact && other.exact),
            (Some(a), Some(b)) => (Some(types.find_least_common_ancestor(a, b)), false),
            _ => (None, false),
        };
        ObjectStamp {
            ty,
            exact,
            non_null: self.non_null && other.non_null,
            always_null: false,
        }
    }

    /// Greatest lower bound. The result never admits a value `self` rejects.
    pub fn improve_with(&self, other: &ObjectStamp, types: &dyn TypeResolver) -> ObjectStamp {
        if self.is_empty() || other.is_empty() {
            return Self::empty();
        }
        let non_null = self.non_null || other.non_null;
        if self.always_null || other.always_null {
            return Self::null_only(non_null);
        }
        let (ty, exact) = match (self.ty, other.ty) {
            (None, ty) => (ty, other.exact),
            (ty, None) => (ty, self.exact),
            (Some(a), Some(b)) if a == b => (Some(a), self.exact || other.exact),
            (Some(a), Some(b)) if types.is_assignable_from(a, b) => {
                if self.exact {
                    return Self::null_only(non_null);
                }
                (Some(b), other.exact)
            }
            (Some(a), Some(b)) if types.is_assignable_from(b, a) => {
                if other.exact {
                    return Self::null_only(non_null);
                }
                (Some(a), self.exact)
            }
            (Some(a), Some(b)) => {
                if self.exact || other.exact || !types.may_share_runtime_instances(a, b) {
                    return Self::null_only(non_null);
                }
                // No representable intersection; keep our own type.
                (Some(a), self.exact)
            }
        };
        ObjectStamp {
            ty,
            exact,
            non_null,
            always_null: false,
        }
    }

    /// True if every reference admitted by `self` is admitted by `other`.
    pub fn is_within(&self, other: &ObjectStamp, types: &dyn TypeResolver) -> bool {
        if self.is_empty() {
            return true;
        }
        if other.is_empty() {
            return false;
        }
        if self.always_null {
            return !other.non_null;
        }
        if other.always_null || (other.non_null && !self.non_null) {
            return false;
        }
        match (self.ty, other.ty) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(b)) if other.exact => self.exact && a == b,
            (Some(a), Some(b)) => a == b || types.is_assignable_from(b, a),
        }
    }

    /// Static answer to `value instanceof ty` (or `instanceof-or-null` when
    /// `allow_null` holds) for every value of this stamp.
    pub fn test_instance_of(&self, ty: TypeId, allow_null: bool, types: &dyn TypeResolver) -> TriState {
        if self.is_empty() {
            return TriState::Unknown;
        }
        if self.always_null {
            return TriState::from_bool(allow_null);
        }
        let Some(u) = self.ty else {
            return TriState::Unknown;
        };
        if types.is_assignable_from(ty, u) {
            if self.non_null || allow_null {
                return TriState::True;
            }
            return TriState::Unknown;
        }
        let disjoint = self.exact
            || (!types.is_assignable_from(u, ty)
                && (types.as_exact_type(ty).is_some() || !types.may_share_runtime_instances(u, ty)));
        if disjoint && (self.non_null || !allow_null) {
            return TriState::False;
        }
        TriState::Unknown
    }

    /// Static answer to "the runtime type is exactly `ty`" for a non-null
    /// value of this stamp.
    pub fn test_exact_type(&self, ty: TypeId, types: &dyn TypeResolver) -> TriState {
        if self.is_empty() {
            return TriState::Unknown;
        }
        if self.always_null {
            return TriState::False;
        }
        match self.ty {
            Some(u) if self.exact && self.non_null && u == ty => TriState::True,
            Some(u) if self.exact && u != ty => TriState::False,
            Some(u) if !types.is_assignable_from(u, ty) => TriState::False,
            _ => TriState::Unknown,
        }
    }

    /// Static answer to "the value is null".
    pub fn test_null(&self) -> TriState {
        if self.is_empty() {
            TriState::Unknown
        } else if self.always_null {
            TriState::True
        } else if self.non_null {
            TriState::False
        } else {
            TriState::Unknown
        }
    }
}

impl fmt::Display for ObjectStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "object <empty>");
        }
        if self.always_null {
            return write!(f, "object null");
        }
        write!(f, "object")?;
        match self.ty {
            Some(ty) if self.exact => write!(f, " ={ty}")?,
            Some(ty) => write!(f, " <:{ty}")?,
            None => {}
        }
        if self.non_null {
            write!(f, " !")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassFlags, TypeHierarchy};

    struct Fixture {
        types: TypeHierarchy,
        a: TypeId,
        b: TypeId,
        c: TypeId,
        i: TypeId,
        fin: TypeId,
    }

    // Object <- A <- B, Object <- C, interface I, final F.
    fn fixture() -> Fixture {
        let types = TypeHierarchy::new();
        let root = types.root();
        let a = types.define_class("A", root, &[], ClassFlags::empty());
        let b = types.define_class("B", a, &[], ClassFlags::empty());
        let c = types.define_class("C", root, &[], ClassFlags::empty());
        let i = types.define_interface("I", &[]);
        let fin = types.define_class("F", root, &[], ClassFlags::FINAL);
        Fixture {
            types,
            a,
            b,
            c,
            i,
            fin,
        }
    }

    #[test]
    fn test_meet_uses_common_ancestor() {
        let f = fixture();
        let m = ObjectStamp::declared_non_null(f.b).meet(&ObjectStamp::declared(f.a), &f.types);
        assert_eq!(m.ty(), Some(f.a));
        assert!(!m.is_non_null());
        assert!(!m.is_exact());
    }

    #[test]
    fn test_meet_with_null_keeps_type() {
        let f = fixture();
        let m = ObjectStamp::always_null().meet(&ObjectStamp::exact_non_null(f.b), &f.types);
        assert_eq!(m, ObjectStamp::exact(f.b));
    }

    #[test]
    fn test_improve_narrows_to_subtype() {
        let f = fixture();
        let s = ObjectStamp::declared(f.a).improve_with(&ObjectStamp::declared_non_null(f.b), &f.types);
        assert_eq!(s, ObjectStamp::declared_non_null(f.b));
        assert!(s.is_within(&ObjectStamp::declared(f.a), &f.types));
    }

    #[test]
    fn test_improve_unrelated_classes_is_null_only() {
        let f = fixture();
        let s = ObjectStamp::declared(f.a).improve_with(&ObjectStamp::declared(f.c), &f.types);
        assert!(s.is_always_null());
        let s = ObjectStamp::declared_non_null(f.a).improve_with(&ObjectStamp::declared(f.c), &f.types);
        assert!(s.is_empty());
    }

    #[test]
    fn test_improve_with_interface_keeps_own_type() {
        let f = fixture();
        let s = ObjectStamp::declared(f.a).improve_with(&ObjectStamp::declared_non_null(f.i), &f.types);
        assert_eq!(s.ty(), Some(f.a));
        assert!(s.is_non_null());
    }

    #[test]
    fn test_instance_of_static_answers() {
        let f = fixture();
        let nn_b = ObjectStamp::declared_non_null(f.b);
        assert_eq!(nn_b.test_instance_of(f.a, false, &f.types), TriState::True);
        assert_eq!(
            ObjectStamp::declared(f.b).test_instance_of(f.a, false, &f.types),
            TriState::Unknown
        );
        assert_eq!(
            ObjectStamp::declared_non_null(f.a).test_instance_of(f.c, false, &f.types),
            TriState::False
        );
        assert_eq!(
            ObjectStamp::declared_non_null(f.a).test_instance_of(f.i, false, &f.types),
            TriState::Unknown
        );
        assert_eq!(
            ObjectStamp::declared_non_null(f.i).test_instance_of(f.fin, false, &f.types),
            TriState::False
        );
        assert_eq!(
            ObjectStamp::always_null().test_instance_of(f.a, true, &f.types),
            TriState::True
        );
    }

    #[test]
    fn test_exact_type_answers() {
        let f = fixture();
        assert_eq!(
            ObjectStamp::exact_non_null(f.b).test_exact_type(f.b, &f.types),
            TriState::True
        );
        assert_eq!(
            ObjectStamp::declared_non_null(f.b).test_exact_type(f.a, &f.types),
            TriState::False
        );
        assert_eq!(
            ObjectStamp::declared_non_null(f.a).test_exact_type(f.b, &f.types),
            TriState::Unknown
        );
    }
}
