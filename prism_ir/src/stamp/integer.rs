//! Integer stamps: a signed range plus known-bit masks.

use std::fmt;

/// All bits representable at `bits` width.
#[inline]
pub const fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Smallest signed value at `bits` width.
#[inline]
pub const fn min_value(bits: u8) -> i64 {
    if bits >= 64 {
        i64::MIN
    } else {
        -(1i64 << (bits - 1))
    }
}

/// Largest signed value at `bits` width.
#[inline]
pub const fn max_value(bits: u8) -> i64 {
    if bits >= 64 {
        i64::MAX
    } else {
        (1i64 << (bits - 1)) - 1
    }
}

/// Sign-extend the low `bits` bits of `value`.
#[inline]
pub const fn sign_extend(value: i64, bits: u8) -> i64 {
    if bits >= 64 {
        value
    } else {
        let shift = 64 - bits as u32;
        (value << shift) >> shift
    }
}

/// All bits at or below the highest set bit of `value`.
#[inline]
fn bits_up_to(value: u64) -> u64 {
    if value == 0 {
        0
    } else {
        u64::MAX >> value.leading_zeros()
    }
}

/// Facts about an integer value of a fixed width.
///
/// Values are kept sign-extended to 64 bits; the masks only cover the low
/// `bits` bits. `must_be_set` holds bits known to be one, `may_be_set` holds
/// bits that are not known to be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntegerStamp {
    bits: u8,
    lower: i64,
    upper: i64,
    must_be_set: u64,
    may_be_set: u64,
}

impl IntegerStamp {
    /// Stamp admitting every value of the width.
    pub const fn unrestricted(bits: u8) -> Self {
        IntegerStamp {
            bits,
            lower: min_value(bits),
            upper: max_value(bits),
            must_be_set: 0,
            may_be_set: mask(bits),
        }
    }

    /// Stamp admitting no value at all.
    pub const fn empty(bits: u8) -> Self {
        IntegerStamp {
            bits,
            lower: max_value(bits),
            upper: min_value(bits),
            must_be_set: mask(bits),
            may_be_set: 0,
        }
    }

    /// Stamp of exactly one value.
    pub fn constant(bits: u8, value: i64) -> Self {
        let v = sign_extend(value, bits);
        let m = v as u64 & mask(bits);
        Self::create(bits, v, v, m, m)
    }

    /// Stamp of a closed signed range.
    pub fn range(bits: u8, lower: i64, upper: i64) -> Self {
        Self::create(bits, lower, upper, 0, mask(bits))
    }

    /// Build a stamp, tightening range and masks against each other.
    ///
    /// Contradictory facts produce the empty stamp.
    pub fn create(bits: u8, lower: i64, upper: i64, must_be_set: u64, may_be_set: u64) -> Self {
        let m = mask(bits);
        let must = must_be_set & m;
        let mut may = may_be_set & m;
        let mut lower = lower.max(min_value(bits));
        let mut upper = upper.min(max_value(bits));

        let sign = 1u64 << (bits - 1);
        if may & sign == 0 {
            // Sign bit known clear: the value is the unsigned pattern.
            lower = lower.max(must as i64);
            upper = upper.min(may as i64);
        } else if must & sign != 0 {
            upper = upper.min(-1);
        }
        if lower > upper || must & !may != 0 {
            return Self::empty(bits);
        }
        if lower >= 0 {
            may &= bits_up_to(upper as u64);
            if must & !may != 0 {
                return Self::empty(bits);
            }
        }
        if lower == upper {
            let v = lower as u64 & m;
            if v & must != must || v & !may != 0 {
                return Self::empty(bits);
            }
            return IntegerStamp {
                bits,
                lower,
                upper,
                must_be_set: v,
                may_be_set: v,
            };
        }
        IntegerStamp {
            bits,
            lower,
            upper,
            must_be_set: must,
            may_be_set: may,
        }
    }

    #[inline]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    #[inline]
    pub fn lower(&self) -> i64 {
        self.lower
    }

    #[inline]
    pub fn upper(&self) -> i64 {
        self.upper
    }

    #[inline]
    pub fn must_be_set(&self) -> u64 {
        self.must_be_set
    }

    #[inline]
    pub fn may_be_set(&self) -> u64 {
        self.may_be_set
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    #[inline]
    pub fn is_unrestricted(&self) -> bool {
        *self == Self::unrestricted(self.bits)
    }

    /// True if no admitted value is negative.
    #[inline]
    pub fn is_non_negative(&self) -> bool {
        !self.is_empty() && self.lower >= 0
    }

    pub fn as_constant(&self) -> Option<i64> {
        (!self.is_empty() && self.lower == self.upper).then_some(self.lower)
    }

    /// Membership test for a sign-extended value.
    pub fn contains(&self, value: i64) -> bool {
        if self.is_empty() || value < self.lower || value > self.upper {
            return false;
        }
        let pattern = value as u64 & mask(self.bits);
        pattern & self.must_be_set == self.must_be_set && pattern & !self.may_be_set == 0
    }

    /// Least upper bound.
    ///
    /// Computed component-wise so the operation stays associative.
    pub fn meet(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        debug_assert_eq!(self.bits, other.bits, "meet of mixed-width integer stamps");
        IntegerStamp {
            bits: self.bits,
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
            must_be_set: self.must_be_set & other.must_be_set,
            may_be_set: self.may_be_set | other.may_be_set,
        }
    }

    /// Greatest lower bound. Never admits a value `self` rejects.
    pub fn improve_with(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::empty(self.bits);
        }
        Self::create(
            self.bits,
            self.lower.max(other.lower),
            self.upper.min(other.upper),
            self.must_be_set | other.must_be_set,
            self.may_be_set & other.may_be_set,
        )
    }

    /// True if every value admitted by `self` is admitted by `other`.
    pub fn is_within(&self, other: &IntegerStamp) -> bool {
        if self.is_empty() {
            return true;
        }
        !other.is_empty()
            && self.lower >= other.lower
            && self.upper <= other.upper
            && self.must_be_set & other.must_be_set == other.must_be_set
            && self.may_be_set & !other.may_be_set == 0
    }
}

impl fmt::Display for IntegerStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "i{} <empty>", self.bits);
        }
        write!(f, "i{} [{}, {}]", self.bits, self.lower, self.upper)?;
        if self.must_be_set != 0 || self.may_be_set != mask(self.bits) {
            write!(f, " set={:#x} may={:#x}", self.must_be_set, self.may_be_set)?;
        }
        Ok(())
    }
}
