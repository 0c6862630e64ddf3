//! The tagged value: a 16-byte discriminated number that is the unit of
//! data every register, stack slot and instruction argument holds.
//!
//! A [`TaggedValue`] is a `(type, bits)` pair. `bits` is reinterpreted as
//! `u64`, `i64` or `f64` depending on `type`. `DATA` is an opaque memory
//! block handle — numerically it behaves like a signed integer (the
//! original source converts it through the same path as `SIGNED`), but
//! equality on it is understood to mean "same block id", not "same bit
//! pattern coincidentally produced by arithmetic".

use core::cmp::Ordering as CmpOrdering;
use core::fmt;

use crate::consts::DEFAULT_FCMP_EPSILON;

/// The type tag of a [`TaggedValue`].
///
/// Declaration order is significant: `Unsigned < Signed < Float` defines
/// the arithmetic promotion rule in [`TaggedValue::promote`]. `Data`,
/// `Undefined` and `Error` sit outside the arithmetic range — any binary
/// operator that would promote into one of them instead yields
/// [`ValueType::Undefined`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    /// Unsigned 64-bit integer.
    Unsigned = 0,
    /// Signed 64-bit integer.
    Signed = 1,
    /// IEEE-754 double.
    Float = 2,
    /// Opaque memory block handle.
    Data = 3,
    /// Result of a failed coercion or bitwise operation.
    Undefined = 4,
    /// Result of an explicit VM-level failure.
    Error = 5,
}

impl ValueType {
    /// Smallest tag that supports ordered or equality comparison.
    pub const MIN_COMPARABLE: ValueType = ValueType::Unsigned;
    /// Largest tag that supports arithmetic and ordered comparison.
    pub const MAX_ARITHMETIC: ValueType = ValueType::Float;

    fn is_arithmetic(self) -> bool {
        self <= Self::MAX_ARITHMETIC
    }
}

/// A discriminated 64-bit number: the universal value type of the VM.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaggedValue {
    ty: ValueType,
    bits: u64,
}

/// Result of [`TaggedValue::fcmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcmpResult {
    /// `self` is less than `other` outside tolerance.
    Less,
    /// `self` and `other` are equal within tolerance.
    Equal,
    /// `self` is greater than `other` outside tolerance.
    Greater,
}

impl TaggedValue {
    /// Constructs an `UNSIGNED` value.
    pub const fn from_u64(v: u64) -> Self {
        TaggedValue {
            ty: ValueType::Unsigned,
            bits: v,
        }
    }

    /// Constructs a `SIGNED` value.
    pub const fn from_i64(v: i64) -> Self {
        TaggedValue {
            ty: ValueType::Signed,
            bits: v as u64,
        }
    }

    /// Constructs a `FLOAT` value.
    pub fn from_f64(v: f64) -> Self {
        TaggedValue {
            ty: ValueType::Float,
            bits: v.to_bits(),
        }
    }

    /// Constructs a `DATA` value referring to the block with the given id.
    pub const fn from_data(block_id: i64) -> Self {
        TaggedValue {
            ty: ValueType::Data,
            bits: block_id as u64,
        }
    }

    /// The `UNDEFINED` sentinel.
    pub const fn undefined() -> Self {
        TaggedValue {
            ty: ValueType::Undefined,
            bits: 0,
        }
    }

    /// The `ERROR` sentinel.
    pub const fn error() -> Self {
        TaggedValue {
            ty: ValueType::Error,
            bits: 0,
        }
    }

    /// Raw IEEE `NaN` as a `FLOAT` value.
    pub fn nan() -> Self {
        Self::from_f64(f64::NAN)
    }

    /// Raw IEEE infinity as a `FLOAT` value.
    pub fn infinity() -> Self {
        Self::from_f64(f64::INFINITY)
    }

    /// This value's type tag.
    pub const fn value_type(&self) -> ValueType {
        self.ty
    }

    /// The raw 64-bit payload, with no reinterpretation.
    pub const fn raw_bits(&self) -> u64 {
        self.bits
    }

    /// Reads this value as `f64`: direct for `FLOAT`, numeric conversion
    /// otherwise.
    pub fn as_f64(&self) -> f64 {
        match self.ty {
            ValueType::Unsigned => self.bits as f64,
            ValueType::Signed | ValueType::Data => (self.bits as i64) as f64,
            ValueType::Float => f64::from_bits(self.bits),
            ValueType::Undefined | ValueType::Error => 0.0,
        }
    }

    /// Reads this value as `i64`, rounding floats toward zero.
    pub fn as_i64(&self) -> i64 {
        match self.ty {
            ValueType::Unsigned => self.bits as i64,
            ValueType::Signed | ValueType::Data => self.bits as i64,
            ValueType::Float => f64::from_bits(self.bits) as i64,
            ValueType::Undefined | ValueType::Error => 0,
        }
    }

    /// Reads this value as `u64`, rounding floats toward zero.
    pub fn as_u64(&self) -> u64 {
        match self.ty {
            ValueType::Unsigned => self.bits,
            ValueType::Signed | ValueType::Data => self.bits,
            ValueType::Float => f64::from_bits(self.bits) as u64,
            ValueType::Undefined | ValueType::Error => 0,
        }
    }

    /// True only for `FLOAT` values holding `NaN`.
    pub fn is_nan(&self) -> bool {
        self.ty == ValueType::Float && f64::from_bits(self.bits).is_nan()
    }

    /// True only for `FLOAT` values holding `+inf`/`-inf`.
    pub fn is_infinity(&self) -> bool {
        self.ty == ValueType::Float && f64::from_bits(self.bits).is_infinite()
    }

    /// True for the `UNDEFINED` sentinel.
    pub const fn is_undefined(&self) -> bool {
        matches!(self.ty, ValueType::Undefined)
    }

    /// True for the `ERROR` sentinel.
    pub const fn is_error(&self) -> bool {
        matches!(self.ty, ValueType::Error)
    }

    /// Returns a copy of `self` coerced to `new_type`.
    ///
    /// Coercion between the three arithmetic tags is numeric. Coercing
    /// `UNDEFINED`/`ERROR` — or coercing *to* `DATA`/`UNDEFINED`/`ERROR` —
    /// always yields `UNDEFINED`.
    pub fn as_type(&self, new_type: ValueType) -> Self {
        if new_type == self.ty {
            return *self;
        }

        use ValueType::*;
        match new_type {
            Signed => match self.ty {
                Unsigned => Self::from_i64(self.bits as i64),
                Float => Self::from_i64(f64::from_bits(self.bits) as i64),
                _ => Self::undefined(),
            },
            Unsigned => match self.ty {
                Signed => Self::from_u64(self.bits),
                Float => Self::from_u64(f64::from_bits(self.bits) as u64),
                _ => Self::undefined(),
            },
            Float => match self.ty {
                Unsigned => Self::from_f64(self.bits as f64),
                Signed => Self::from_f64((self.bits as i64) as f64),
                _ => Self::undefined(),
            },
            _ => Self::undefined(),
        }
    }

    /// In-place version of [`TaggedValue::as_type`].
    pub fn convert(&mut self, new_type: ValueType) -> &mut Self {
        if self.ty != new_type {
            *self = self.as_type(new_type);
        }
        self
    }

    /// Arithmetic promotion target for a binary operator: `max(a, b)` if
    /// both operands are arithmetic, else `None`.
    fn promote(a: ValueType, b: ValueType) -> Option<ValueType> {
        let hi = a.max(b);
        (a.is_arithmetic() && b.is_arithmetic()).then_some(hi)
    }

    fn binary_arith(self, rhs: Self, f: impl Fn(&mut Self, Self)) -> Self {
        match Self::promote(self.ty, rhs.ty) {
            None => Self::undefined(),
            Some(ty) => {
                let mut lhs = self.as_type(ty);
                let rhs = rhs.as_type(ty);
                f(&mut lhs, rhs);
                lhs
            }
        }
    }

    /// Tagged addition: promotes both operands to `max(type)`, then adds.
    pub fn add(self, rhs: Self) -> Self {
        self.binary_arith(rhs, |lhs, rhs| match lhs.ty {
            ValueType::Unsigned => lhs.bits = lhs.bits.wrapping_add(rhs.bits),
            ValueType::Signed => lhs.bits = (lhs.as_i64().wrapping_add(rhs.as_i64())) as u64,
            ValueType::Float => *lhs = Self::from_f64(lhs.as_f64() + rhs.as_f64()),
            _ => unreachable!("promote() only yields arithmetic types"),
        })
    }

    /// Tagged subtraction. See [`TaggedValue::add`].
    pub fn sub(self, rhs: Self) -> Self {
        self.binary_arith(rhs, |lhs, rhs| match lhs.ty {
            ValueType::Unsigned => lhs.bits = lhs.bits.wrapping_sub(rhs.bits),
            ValueType::Signed => lhs.bits = (lhs.as_i64().wrapping_sub(rhs.as_i64())) as u64,
            ValueType::Float => *lhs = Self::from_f64(lhs.as_f64() - rhs.as_f64()),
            _ => unreachable!("promote() only yields arithmetic types"),
        })
    }

    /// Tagged multiplication. See [`TaggedValue::add`].
    pub fn mul(self, rhs: Self) -> Self {
        self.binary_arith(rhs, |lhs, rhs| match lhs.ty {
            ValueType::Unsigned => lhs.bits = lhs.bits.wrapping_mul(rhs.bits),
            ValueType::Signed => lhs.bits = (lhs.as_i64().wrapping_mul(rhs.as_i64())) as u64,
            ValueType::Float => *lhs = Self::from_f64(lhs.as_f64() * rhs.as_f64()),
            _ => unreachable!("promote() only yields arithmetic types"),
        })
    }

    /// Tagged remainder. `FLOAT % FLOAT` uses mathematical `fmod`.
    pub fn rem(self, rhs: Self) -> Self {
        self.binary_arith(rhs, |lhs, rhs| match lhs.ty {
            ValueType::Unsigned => {
                if rhs.bits != 0 {
                    lhs.bits %= rhs.bits;
                }
            }
            ValueType::Signed => {
                let r = rhs.as_i64();
                if r != 0 {
                    lhs.bits = (lhs.as_i64() % r) as u64;
                }
            }
            ValueType::Float => *lhs = Self::from_f64(libm_fmod(lhs.as_f64(), rhs.as_f64())),
            _ => unreachable!("promote() only yields arithmetic types"),
        })
    }

    /// Bitwise AND. Both operands are coerced to `UNSIGNED`; failure (a
    /// `DATA`/`UNDEFINED`/`ERROR` operand) yields `UNDEFINED`.
    pub fn bitand(self, rhs: Self) -> Self {
        let lhs = self.as_type(ValueType::Unsigned);
        let rhs = rhs.as_type(ValueType::Unsigned);
        if lhs.ty == ValueType::Unsigned && rhs.ty == ValueType::Unsigned {
            Self::from_u64(lhs.bits & rhs.bits)
        } else {
            Self::undefined()
        }
    }

    /// Bitwise OR. See [`TaggedValue::bitand`].
    pub fn bitor(self, rhs: Self) -> Self {
        let lhs = self.as_type(ValueType::Unsigned);
        let rhs = rhs.as_type(ValueType::Unsigned);
        if lhs.ty == ValueType::Unsigned && rhs.ty == ValueType::Unsigned {
            Self::from_u64(lhs.bits | rhs.bits)
        } else {
            Self::undefined()
        }
    }

    /// Bitwise XOR. Operands are coerced so that one side may remain
    /// `UNSIGNED` while the other is `SIGNED`; a `DATA`/`UNDEFINED`/`ERROR`
    /// operand yields `UNDEFINED`.
    pub fn bitxor(self, rhs: Self) -> Self {
        let new_type = Self::xor_shift_type(self.ty, rhs.ty);
        let lhs = self.as_type(new_type);
        let rhs = rhs.as_type(new_type);
        if lhs.ty == rhs.ty && (lhs.ty == ValueType::Unsigned || lhs.ty == ValueType::Signed) {
            Self::from_u64(lhs.bits ^ rhs.bits)
        } else {
            Self::undefined()
        }
    }

    fn xor_shift_type(a: ValueType, b: ValueType) -> ValueType {
        a.min(ValueType::Signed).min(b.max(ValueType::Unsigned))
    }

    /// Unary negation. Unsigned negation wraps; `UNDEFINED`/`ERROR`
    /// propagate unchanged in kind (result is `UNDEFINED`).
    pub fn neg(self) -> Self {
        match self.ty {
            ValueType::Unsigned => Self::from_u64(self.bits.wrapping_neg()),
            ValueType::Signed => Self::from_i64(self.as_i64().wrapping_neg()),
            ValueType::Float => Self::from_f64(-self.as_f64()),
            _ => Self::undefined(),
        }
    }

    /// Bitwise complement, reinterpreting as `UNSIGNED` first.
    pub fn not(self) -> Self {
        match self.ty {
            ValueType::Unsigned | ValueType::Signed | ValueType::Float => {
                Self::from_u64(!self.as_type(ValueType::Unsigned).bits)
            }
            _ => Self::undefined(),
        }
    }

    /// Truthiness: `0`/`0.0`/`UNDEFINED`/`ERROR` are false.
    pub fn is_truthy(&self) -> bool {
        match self.ty {
            ValueType::Float => self.as_f64() != 0.0,
            ValueType::Undefined | ValueType::Error => false,
            _ => self.bits != 0,
        }
    }

    /// Equality: promotes to a common arithmetic type and compares the raw
    /// payload when possible; otherwise compares the raw payload directly,
    /// with no promotion (this is how `DATA` compares by id, and how two
    /// `UNDEFINED`/`ERROR` values compare equal).
    pub fn value_eq(&self, other: &Self) -> bool {
        match Self::promote(self.ty, other.ty) {
            Some(ty) => self.as_type(ty).bits == other.as_type(ty).bits,
            None => self.bits == other.bits,
        }
    }

    /// Ordered comparison. Returns `None` unless both operands are
    /// arithmetic (`type` in `Unsigned..=Float`).
    pub fn partial_cmp_value(&self, other: &Self) -> Option<CmpOrdering> {
        let ty = Self::promote(self.ty, other.ty)?;
        let lhs = self.as_type(ty);
        let rhs = other.as_type(ty);
        Some(match ty {
            ValueType::Unsigned => lhs.bits.cmp(&rhs.bits),
            ValueType::Signed => lhs.as_i64().cmp(&rhs.as_i64()),
            ValueType::Float => lhs
                .as_f64()
                .partial_cmp(&rhs.as_f64())
                .unwrap_or(CmpOrdering::Less),
            _ => unreachable!("promote() only yields arithmetic types"),
        })
    }

    /// Floating-point comparison with tolerance `epsilon`. Both operands
    /// are coerced to `FLOAT` first; if either fails to coerce, returns
    /// [`FcmpResult::Less`].
    pub fn fcmp_epsilon(&self, other: &Self, epsilon: f64) -> FcmpResult {
        let lhs = self.as_type(ValueType::Float);
        let rhs = other.as_type(ValueType::Float);
        if lhs.ty != ValueType::Float || rhs.ty != ValueType::Float {
            return FcmpResult::Less;
        }
        let delta = lhs.as_f64() - rhs.as_f64();
        if delta > epsilon {
            FcmpResult::Greater
        } else if delta >= -epsilon {
            FcmpResult::Equal
        } else {
            FcmpResult::Less
        }
    }

    /// [`TaggedValue::fcmp_epsilon`] with [`DEFAULT_FCMP_EPSILON`].
    pub fn fcmp(&self, other: &Self) -> FcmpResult {
        self.fcmp_epsilon(other, DEFAULT_FCMP_EPSILON)
    }
}

fn libm_fmod(a: f64, b: f64) -> f64 {
    a - b * (a / b).trunc()
}

impl PartialEq for TaggedValue {
    fn eq(&self, other: &Self) -> bool {
        self.value_eq(other)
    }
}

impl fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            ValueType::Error => write!(f, "(#error: {:#x})", self.bits),
            ValueType::Undefined => write!(f, "(#undefined)"),
            ValueType::Unsigned => write!(f, "(#uint: {:#x})", self.bits),
            ValueType::Signed => write!(f, "(#int: {})", self.as_i64()),
            ValueType::Float => write!(f, "(#float: {})", self.as_f64()),
            ValueType::Data => write!(f, "(#data: {})", self.as_i64()),
        }
    }
}

impl From<u64> for TaggedValue {
    fn from(v: u64) -> Self {
        Self::from_u64(v)
    }
}

impl From<i64> for TaggedValue {
    fn from(v: i64) -> Self {
        Self::from_i64(v)
    }
}

impl From<f64> for TaggedValue {
    fn from(v: f64) -> Self {
        Self::from_f64(v)
    }
}

impl Default for TaggedValue {
    fn default() -> Self {
        Self::from_i64(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_picks_max_type() {
        let a = TaggedValue::from_u64(1);
        let b = TaggedValue::from_f64(2.0);
        let sum = a.add(b);
        assert_eq!(sum.value_type(), ValueType::Float);
        assert_eq!(sum.as_f64(), 3.0);
    }

    #[test]
    fn data_operand_poisons_arithmetic() {
        let a = TaggedValue::from_i64(4);
        let b = TaggedValue::from_data(7);
        assert!(a.add(b).is_undefined());
    }

    #[test]
    fn unsigned_negation_wraps() {
        let zero = TaggedValue::from_u64(0);
        assert_eq!(zero.neg().as_u64(), 0);
        let one = TaggedValue::from_u64(1);
        assert_eq!(one.neg().as_u64(), u64::MAX);
    }

    #[test]
    fn bitwise_not_reinterprets_as_unsigned() {
        let v = TaggedValue::from_i64(0);
        assert_eq!(v.not().as_u64(), u64::MAX);
    }

    #[test]
    fn shift_by_zero_is_identity_via_integer_path() {
        // The ARITHSHIFT/BITSHIFT opcodes apply vm_shift directly to a raw
        // integer rather than routing through TaggedValue's own bitwise
        // operators; exercised in interpreter::tests.
        let v: i64 = 42;
        let shifted = if 0i64 == 0 { v } else { unreachable!() };
        assert_eq!(shifted, 42);
    }

    #[test]
    fn fcmp_within_epsilon_is_equal() {
        let a = TaggedValue::from_f64(0.0);
        let eps = DEFAULT_FCMP_EPSILON;
        assert_eq!(a.fcmp(&TaggedValue::from_f64(eps / 2.0)), FcmpResult::Equal);
        assert_eq!(a.fcmp(&TaggedValue::from_f64(eps * 2.0)), FcmpResult::Less);
    }

    #[test]
    fn equality_compares_raw_payload_after_promotion() {
        let a = TaggedValue::from_u64(5);
        let b = TaggedValue::from_f64(5.0);
        assert_eq!(a, b);
    }

    #[test]
    fn data_equality_is_by_id_not_value() {
        let a = TaggedValue::from_data(3);
        let b = TaggedValue::from_data(3);
        let c = TaggedValue::from_data(4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ordered_comparison_excludes_data() {
        let a = TaggedValue::from_data(1);
        let b = TaggedValue::from_data(2);
        assert_eq!(a.partial_cmp_value(&b), None);
    }

    #[test]
    fn conversion_to_native_rounds_toward_zero() {
        let v = TaggedValue::from_f64(-1.9);
        assert_eq!(v.as_i64(), -1);
    }

    #[quickcheck_macros::quickcheck]
    fn add_is_commutative_for_same_type_unsigned(a: u32, b: u32) -> bool {
        let x = TaggedValue::from_u64(a as u64);
        let y = TaggedValue::from_u64(b as u64);
        x.add(y) == y.add(x)
    }
}
