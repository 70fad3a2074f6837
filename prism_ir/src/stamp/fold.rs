//! Stamp inference per node kind.

use super::integer::{mask, max_value, min_value, sign_extend};
use super::{IntegerStamp, ObjectStamp, Stamp, TriState};
use crate::ir::{BinaryOp, CompareOp, NodeKind};
use crate::types::TypeResolver;

// =============================================================================
// Constant Folding
// =============================================================================

/// Evaluate a non-trapping binary operation at width `bits`.
pub fn binary_constant(op: BinaryOp, bits: u8, x: i64, y: i64) -> i64 {
    let raw = match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
    };
    sign_extend(raw, bits)
}

/// Truncating remainder; `None` when the divisor is zero.
pub fn rem_constant(bits: u8, x: i64, y: i64) -> Option<i64> {
    (y != 0).then(|| sign_extend(x.wrapping_rem(y), bits))
}

/// Truncating division; `None` when the divisor is zero.
pub fn div_constant(bits: u8, x: i64, y: i64) -> Option<i64> {
    (y != 0).then(|| sign_extend(x.wrapping_div(y), bits))
}

fn in_range(bits: u8, values: &[Option<i64>]) -> Option<(i64, i64)> {
    let mut lower = i64::MAX;
    let mut upper = i64::MIN;
    for v in values {
        let v = (*v)?;
        if v < min_value(bits) || v > max_value(bits) {
            return None;
        }
        lower = lower.min(v);
        upper = upper.max(v);
    }
    Some((lower, upper))
}

// =============================================================================
// Integer Stamps
// =============================================================================

/// Result stamp of a binary operation.
pub fn binary(op: BinaryOp, x: &IntegerStamp, y: &IntegerStamp) -> IntegerStamp {
    let bits = x.bits();
    if x.is_empty() || y.is_empty() {
        return IntegerStamp::empty(bits);
    }
    if let (Some(a), Some(b)) = (x.as_constant(), y.as_constant()) {
        return IntegerStamp::constant(bits, binary_constant(op, bits, a, b));
    }
    let unrestricted = IntegerStamp::unrestricted(bits);
    match op {
        BinaryOp::Add => in_range(
            bits,
            &[x.lower().checked_add(y.lower()), x.upper().checked_add(y.upper())],
        )
        .map_or(unrestricted, |(lo, hi)| IntegerStamp::range(bits, lo, hi)),
        BinaryOp::Sub => in_range(
            bits,
            &[x.lower().checked_sub(y.upper()), x.upper().checked_sub(y.lower())],
        )
        .map_or(unrestricted, |(lo, hi)| IntegerStamp::range(bits, lo, hi)),
        BinaryOp::Mul => in_range(
            bits,
            &[
                x.lower().checked_mul(y.lower()),
                x.lower().checked_mul(y.upper()),
                x.upper().checked_mul(y.lower()),
                x.upper().checked_mul(y.upper()),
            ],
        )
        .map_or(unrestricted, |(lo, hi)| IntegerStamp::range(bits, lo, hi)),
        BinaryOp::And => IntegerStamp::create(
            bits,
            min_value(bits),
            max_value(bits),
            x.must_be_set() & y.must_be_set(),
            x.may_be_set() & y.may_be_set(),
        ),
        BinaryOp::Or => IntegerStamp::create(
            bits,
            min_value(bits),
            max_value(bits),
            x.must_be_set() | y.must_be_set(),
            x.may_be_set() | y.may_be_set(),
        ),
        BinaryOp::Xor => {
            let m = mask(bits);
            let known = (x.must_be_set() | !x.may_be_set()) & (y.must_be_set() | !y.may_be_set()) & m;
            let value = (x.must_be_set() ^ y.must_be_set()) & known;
            IntegerStamp::create(bits, min_value(bits), max_value(bits), value, (!known & m) | value)
        }
    }
}

pub fn negate(x: &IntegerStamp) -> IntegerStamp {
    let bits = x.bits();
    if x.is_empty() {
        return *x;
    }
    if let Some(v) = x.as_constant() {
        return IntegerStamp::constant(bits, v.wrapping_neg());
    }
    if x.lower() > min_value(bits) {
        return IntegerStamp::range(bits, -x.upper(), -x.lower());
    }
    IntegerStamp::unrestricted(bits)
}

/// Result stamp of a truncating remainder, ignoring the trapping case.
///
/// The result has the sign of the dividend and is strictly smaller in
/// magnitude than the divisor.
pub fn rem(x: &IntegerStamp, y: &IntegerStamp) -> IntegerStamp {
    let bits = x.bits();
    if x.is_empty() || y.is_empty() {
        return IntegerStamp::empty(bits);
    }
    if let (Some(a), Some(b)) = (x.as_constant(), y.as_constant()) {
        if let Some(r) = rem_constant(bits, a, b) {
            return IntegerStamp::constant(bits, r);
        }
    }
    let magnitude = y
        .lower()
        .saturating_abs()
        .max(y.upper().saturating_abs())
        .saturating_sub(1);
    let lower = if x.lower() >= 0 {
        0
    } else {
        x.lower().max(-magnitude)
    };
    let upper = if x.upper() <= 0 {
        0
    } else {
        x.upper().min(magnitude)
    };
    IntegerStamp::range(bits, lower, upper)
}

/// Result stamp of a truncating division, ignoring the trapping case.
pub fn div(x: &IntegerStamp, y: &IntegerStamp) -> IntegerStamp {
    let bits = x.bits();
    if x.is_empty() || y.is_empty() {
        return IntegerStamp::empty(bits);
    }
    if let (Some(a), Some(b)) = (x.as_constant(), y.as_constant()) {
        if let Some(q) = div_constant(bits, a, b) {
            return IntegerStamp::constant(bits, q);
        }
    }
    if x.is_non_negative() && y.lower() > 0 {
        return IntegerStamp::range(bits, 0, x.upper());
    }
    IntegerStamp::unrestricted(bits)
}

pub fn compare(op: CompareOp, x: &IntegerStamp, y: &IntegerStamp) -> TriState {
    if x.is_empty() || y.is_empty() {
        return TriState::Unknown;
    }
    match op {
        CompareOp::Equals => {
            if let (Some(a), Some(b)) = (x.as_constant(), y.as_constant()) {
                return TriState::from_bool(a == b);
            }
            let disjoint_range = x.upper() < y.lower() || y.upper() < x.lower();
            let disjoint_bits = (x.must_be_set() & !y.may_be_set()) | (y.must_be_set() & !x.may_be_set()) != 0;
            if disjoint_range || disjoint_bits {
                TriState::False
            } else {
                TriState::Unknown
            }
        }
        CompareOp::LessThan => {
            if x.upper() < y.lower() {
                TriState::True
            } else if x.lower() >= y.upper() {
                TriState::False
            } else {
                TriState::Unknown
            }
        }
    }
}

// =============================================================================
// Per-Kind Inference
// =============================================================================

/// Infer the stamp of a node from its kind and its inputs' stamps.
///
/// Kinds whose stamp is declared at creation (parameters, invokes) keep
/// `current`.
pub fn fold_stamp(kind: &NodeKind, inputs: &[&Stamp], current: &Stamp, types: &dyn TypeResolver) -> Stamp {
    let input = |i: usize| inputs.get(i).copied().unwrap_or(&Stamp::Illegal);
    let int_pair = || match (input(0), input(1)) {
        (Stamp::Integer(x), Stamp::Integer(y)) if x.bits() == y.bits() => Some((*x, *y)),
        _ => None,
    };
    match kind {
        NodeKind::Constant(c) => Stamp::for_constant(c),
        NodeKind::Parameter { .. } | NodeKind::Invoke { .. } => current.clone(),
        NodeKind::Binary(op) => int_pair().map_or(Stamp::Illegal, |(x, y)| Stamp::Integer(binary(*op, &x, &y))),
        NodeKind::Negate => match input(0) {
            Stamp::Integer(x) => Stamp::Integer(negate(x)),
            _ => Stamp::Illegal,
        },
        NodeKind::IntegerRem => int_pair().map_or(Stamp::Illegal, |(x, y)| Stamp::Integer(rem(&x, &y))),
        NodeKind::IntegerDiv => int_pair().map_or(Stamp::Illegal, |(x, y)| Stamp::Integer(div(&x, &y))),
        NodeKind::Compare(op) => Stamp::Logic(int_pair().map_or(TriState::Unknown, |(x, y)| compare(*op, &x, &y))),
        NodeKind::LogicNot => Stamp::Logic(input(0).as_logic().negate()),
        NodeKind::ShortCircuitOr { x_negated, y_negated } => {
            let x = input(0).as_logic().negate_if(*x_negated);
            let y = input(1).as_logic().negate_if(*y_negated);
            Stamp::Logic(x.or(y))
        }
        NodeKind::IsNull => Stamp::Logic(input(0).as_object().map_or(TriState::Unknown, ObjectStamp::test_null)),
        NodeKind::InstanceOf { ty, allow_null } => Stamp::Logic(
            input(0)
                .as_object()
                .map_or(TriState::Unknown, |s| s.test_instance_of(*ty, *allow_null, types)),
        ),
        NodeKind::TypeCheck { ty } => Stamp::Logic(
            input(0)
                .as_object()
                .map_or(TriState::Unknown, |s| s.test_exact_type(*ty, types)),
        ),
        NodeKind::SubtypeCheck => Stamp::logic(),
        NodeKind::LoadHub => Stamp::Hub,
        NodeKind::Pi { stamp } | NodeKind::GuardedValue { stamp } => stamp.improve_with(input(0), types),
        NodeKind::CheckCast { ty } => match input(0) {
            Stamp::Object(s) => Stamp::Object(s.improve_with(&ObjectStamp::declared(*ty), types)),
            other => other.clone(),
        },
        NodeKind::CheckCastDynamic => input(1).clone(),
        NodeKind::Phi => inputs
            .iter()
            .skip(1)
            .fold(Stamp::Illegal, |acc, s| acc.meet(s, types)),
        NodeKind::Guard { .. }
        | NodeKind::Start
        | NodeKind::Begin
        | NodeKind::End
        | NodeKind::Merge
        | NodeKind::If
        | NodeKind::Return
        | NodeKind::Deoptimize { .. }
        | NodeKind::FixedGuard { .. }
        | NodeKind::Infopoint { .. }
        | NodeKind::BranchCounter { .. } => Stamp::Void,
    }
}
