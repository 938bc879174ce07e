use crate::ErrorCode;
use core::fmt::{self, Display};

/// Type of a scalar numeric value.
///
/// BASIC code manipulates numbers of four widths: unsigned 8-bit bytes,
/// 32-bit and 64-bit signed integers and 64-bit IEEE 754 floating point.
/// Mixed-type operations promote both operands to the wider of the two
/// types, `U8 < I32 < I64 < F64`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    /// Unsigned 8-bit byte (`&`-suffixed variables, `?` indirection).
    U8,
    /// 32-bit signed integer (`%`-suffixed variables).
    I32,
    /// 64-bit signed integer (`%%`-suffixed variables).
    I64,
    /// 64-bit IEEE 754 floating point number (unsuffixed variables).
    F64,
}

impl ValueType {
    /// Returns the wider of two value types under the promotion order.
    #[inline]
    pub fn promoted(self, other: Self) -> Self {
        if self < other {
            other
        } else {
            self
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F64 => write!(f, "f64"),
        }
    }
}

/// Lossless widening conversion along the promotion order.
pub trait ExtendInto<T> {
    /// Convert one type to another by widening.
    fn extend_into(self) -> T;
}

macro_rules! impl_extend_into {
    ($from:ident, $into:ident) => {
        impl ExtendInto<$into> for $from {
            #[inline]
            fn extend_into(self) -> $into {
                self as $into
            }
        }
    };
}

impl_extend_into!(u8, i32);
impl_extend_into!(u8, i64);
impl_extend_into!(u8, f64);
impl_extend_into!(i32, i64);
impl_extend_into!(i32, f64);
impl_extend_into!(i64, f64);

/// Conversion that truncates to the low bits of the target type.
///
/// Byte variables and `?` indirection stores keep only the low 8 bits of
/// whatever is assigned to them.
pub trait WrapInto<T> {
    /// Convert one type to another by wrapping.
    fn wrap_into(self) -> T;
}

macro_rules! impl_wrap_into {
    ($from:ident, $into:ident) => {
        impl WrapInto<$into> for $from {
            #[inline]
            fn wrap_into(self) -> $into {
                self as $into
            }
        }
    };
}

impl_wrap_into!(i32, u8);
impl_wrap_into!(i64, u8);
impl_wrap_into!(i64, i32);

/// Range-checked narrowing conversion.
///
/// # Errors
///
/// Fails with `NumberTooBig` when the value cannot be represented by the
/// target integer, and with `BadConversion` when the input float is NaN.
pub trait TryTruncateInto<T, E> {
    /// Convert one type to another by rounding towards zero.
    fn try_truncate_into(self) -> Result<T, E>;
}

macro_rules! impl_try_truncate_into {
    ($from:ident, $into:ident, $to_primitive:path) => {
        impl TryTruncateInto<$into, ErrorCode> for $from {
            #[inline]
            fn try_truncate_into(self) -> Result<$into, ErrorCode> {
                if self.is_nan() {
                    return Err(ErrorCode::BadConversion);
                }
                num_rational::BigRational::from_float(self)
                    .map(|val| val.to_integer())
                    .and_then(|val| $to_primitive(&val))
                    .ok_or(ErrorCode::NumberTooBig)
            }
        }
    };
}

impl_try_truncate_into!(f64, i32, num_traits::cast::ToPrimitive::to_i32);
impl_try_truncate_into!(f64, i64, num_traits::cast::ToPrimitive::to_i64);

impl TryTruncateInto<i32, ErrorCode> for i64 {
    #[inline]
    fn try_truncate_into(self) -> Result<i32, ErrorCode> {
        i32::try_from(self).map_err(|_| ErrorCode::NumberTooBig)
    }
}

/// Arithmetic operations shared by the numeric widths.
pub trait ArithmeticOps<T>: Copy {
    /// Add two values.
    fn add(self, other: T) -> T;
    /// Subtract two values.
    fn sub(self, other: T) -> T;
    /// Multiply two values.
    fn mul(self, other: T) -> T;
    /// Divide two values.
    fn div(self, other: T) -> Result<T, ErrorCode>;
}

macro_rules! impl_integer_arithmetic_ops {
    ($type:ident) => {
        impl ArithmeticOps<$type> for $type {
            #[inline]
            fn add(self, other: $type) -> $type {
                self.wrapping_add(other)
            }
            #[inline]
            fn sub(self, other: $type) -> $type {
                self.wrapping_sub(other)
            }
            #[inline]
            fn mul(self, other: $type) -> $type {
                self.wrapping_mul(other)
            }
            #[inline]
            fn div(self, other: $type) -> Result<$type, ErrorCode> {
                if other == 0 {
                    Err(ErrorCode::DivisionByZero)
                } else {
                    let (result, overflow) = self.overflowing_div(other);
                    if overflow {
                        Err(ErrorCode::NumberTooBig)
                    } else {
                        Ok(result)
                    }
                }
            }
        }
    };
}

impl_integer_arithmetic_ops!(i32);
impl_integer_arithmetic_ops!(i64);

impl ArithmeticOps<f64> for f64 {
    #[inline]
    fn add(self, other: f64) -> f64 {
        self + other
    }
    #[inline]
    fn sub(self, other: f64) -> f64 {
        self - other
    }
    #[inline]
    fn mul(self, other: f64) -> f64 {
        self * other
    }
    #[inline]
    fn div(self, other: f64) -> Result<f64, ErrorCode> {
        // Unlike IEEE, BASIC treats float division by zero as an error
        // rather than producing an infinity.
        if other == 0.0 {
            Err(ErrorCode::DivisionByZero)
        } else {
            Ok(self / other)
        }
    }
}

/// Integer-only operations.
pub trait IntegerOps<T>: ArithmeticOps<T> {
    /// Get division remainder.
    fn rem(self, other: T) -> Result<T, ErrorCode>;
}

macro_rules! impl_integer_ops {
    ($type:ident) => {
        impl IntegerOps<$type> for $type {
            #[inline]
            fn rem(self, other: $type) -> Result<$type, ErrorCode> {
                if other == 0 {
                    Err(ErrorCode::DivisionByZero)
                } else {
                    Ok(self.wrapping_rem(other))
                }
            }
        }
    };
}

impl_integer_ops!(i32);
impl_integer_ops!(i64);

#[cfg(feature = "std")]
mod fmath {
    #[inline]
    pub fn abs(v: f64) -> f64 {
        v.abs()
    }
    #[inline]
    pub fn floor(v: f64) -> f64 {
        v.floor()
    }
    #[inline]
    pub fn ceil(v: f64) -> f64 {
        v.ceil()
    }
    #[inline]
    pub fn trunc(v: f64) -> f64 {
        v.trunc()
    }
    #[inline]
    pub fn round(v: f64) -> f64 {
        v.round()
    }
    #[inline]
    pub fn sqrt(v: f64) -> f64 {
        v.sqrt()
    }
    #[inline]
    pub fn sin(v: f64) -> f64 {
        v.sin()
    }
    #[inline]
    pub fn cos(v: f64) -> f64 {
        v.cos()
    }
    #[inline]
    pub fn tan(v: f64) -> f64 {
        v.tan()
    }
    #[inline]
    pub fn asin(v: f64) -> f64 {
        v.asin()
    }
    #[inline]
    pub fn acos(v: f64) -> f64 {
        v.acos()
    }
    #[inline]
    pub fn atan(v: f64) -> f64 {
        v.atan()
    }
    #[inline]
    pub fn exp(v: f64) -> f64 {
        v.exp()
    }
    #[inline]
    pub fn ln(v: f64) -> f64 {
        v.ln()
    }
    #[inline]
    pub fn log10(v: f64) -> f64 {
        v.log10()
    }
    #[inline]
    pub fn pow(v: f64, e: f64) -> f64 {
        v.powf(e)
    }
}

// The math functions are not all available in `core`; in no-std builds we
// rely on `libm` instead.
#[cfg(not(feature = "std"))]
mod fmath {
    #[inline]
    pub fn abs(v: f64) -> f64 {
        libm::fabs(v)
    }
    #[inline]
    pub fn floor(v: f64) -> f64 {
        libm::floor(v)
    }
    #[inline]
    pub fn ceil(v: f64) -> f64 {
        libm::ceil(v)
    }
    #[inline]
    pub fn trunc(v: f64) -> f64 {
        libm::trunc(v)
    }
    #[inline]
    pub fn round(v: f64) -> f64 {
        libm::round(v)
    }
    #[inline]
    pub fn sqrt(v: f64) -> f64 {
        libm::sqrt(v)
    }
    #[inline]
    pub fn sin(v: f64) -> f64 {
        libm::sin(v)
    }
    #[inline]
    pub fn cos(v: f64) -> f64 {
        libm::cos(v)
    }
    #[inline]
    pub fn tan(v: f64) -> f64 {
        libm::tan(v)
    }
    #[inline]
    pub fn asin(v: f64) -> f64 {
        libm::asin(v)
    }
    #[inline]
    pub fn acos(v: f64) -> f64 {
        libm::acos(v)
    }
    #[inline]
    pub fn atan(v: f64) -> f64 {
        libm::atan(v)
    }
    #[inline]
    pub fn exp(v: f64) -> f64 {
        libm::exp(v)
    }
    #[inline]
    pub fn ln(v: f64) -> f64 {
        libm::log(v)
    }
    #[inline]
    pub fn log10(v: f64) -> f64 {
        libm::log10(v)
    }
    #[inline]
    pub fn pow(v: f64, e: f64) -> f64 {
        libm::pow(v, e)
    }
}

/// Floating point operations, including the transcendental set exposed by
/// the language.
///
/// The domain-restricted operations return `Result` with the classic error
/// for their failure mode: `SQR` of a negative raises `NegativeRoot`, `LN`
/// and `LOG` of a non-positive raise `LogRange`, `EXP` overflow raises
/// `ExpRange`, and the inverse trigonometric functions raise `AccuracyLost`
/// outside `[-1, 1]`.
pub trait FloatOps: Copy {
    /// Get absolute value.
    fn abs(self) -> Self;
    /// Returns the largest integer less than or equal to a number.
    fn floor(self) -> Self;
    /// Returns the smallest integer greater than or equal to a number.
    fn ceil(self) -> Self;
    /// Returns the integer part of a number.
    fn trunc(self) -> Self;
    /// Returns the nearest integer to a number, half-way cases away from zero.
    fn round(self) -> Self;
    /// Takes the square root of a number.
    fn sqrt(self) -> Result<Self, ErrorCode>;
    /// Sine, argument in radians.
    fn sin(self) -> Self;
    /// Cosine, argument in radians.
    fn cos(self) -> Self;
    /// Tangent, argument in radians.
    fn tan(self) -> Self;
    /// Arc sine.
    fn asin(self) -> Result<Self, ErrorCode>;
    /// Arc cosine.
    fn acos(self) -> Result<Self, ErrorCode>;
    /// Arc tangent.
    fn atan(self) -> Self;
    /// `e` raised to the power of `self`.
    fn exp(self) -> Result<Self, ErrorCode>;
    /// Natural logarithm.
    fn ln(self) -> Result<Self, ErrorCode>;
    /// Base-10 logarithm.
    fn log10(self) -> Result<Self, ErrorCode>;
    /// Raises `self` to the power `exponent`.
    fn powf(self, exponent: Self) -> Result<Self, ErrorCode>;
}

impl FloatOps for f64 {
    #[inline]
    fn abs(self) -> f64 {
        fmath::abs(self)
    }
    #[inline]
    fn floor(self) -> f64 {
        fmath::floor(self)
    }
    #[inline]
    fn ceil(self) -> f64 {
        fmath::ceil(self)
    }
    #[inline]
    fn trunc(self) -> f64 {
        fmath::trunc(self)
    }
    #[inline]
    fn round(self) -> f64 {
        fmath::round(self)
    }
    #[inline]
    fn sqrt(self) -> Result<f64, ErrorCode> {
        if self < 0.0 {
            Err(ErrorCode::NegativeRoot)
        } else {
            Ok(fmath::sqrt(self))
        }
    }
    #[inline]
    fn sin(self) -> f64 {
        fmath::sin(self)
    }
    #[inline]
    fn cos(self) -> f64 {
        fmath::cos(self)
    }
    #[inline]
    fn tan(self) -> f64 {
        fmath::tan(self)
    }
    #[inline]
    fn asin(self) -> Result<f64, ErrorCode> {
        let result = fmath::asin(self);
        if result.is_nan() {
            Err(ErrorCode::AccuracyLost)
        } else {
            Ok(result)
        }
    }
    #[inline]
    fn acos(self) -> Result<f64, ErrorCode> {
        let result = fmath::acos(self);
        if result.is_nan() {
            Err(ErrorCode::AccuracyLost)
        } else {
            Ok(result)
        }
    }
    #[inline]
    fn atan(self) -> f64 {
        fmath::atan(self)
    }
    #[inline]
    fn exp(self) -> Result<f64, ErrorCode> {
        let result = fmath::exp(self);
        if result.is_infinite() {
            Err(ErrorCode::ExpRange)
        } else {
            Ok(result)
        }
    }
    #[inline]
    fn ln(self) -> Result<f64, ErrorCode> {
        if self <= 0.0 {
            Err(ErrorCode::LogRange)
        } else {
            Ok(fmath::ln(self))
        }
    }
    #[inline]
    fn log10(self) -> Result<f64, ErrorCode> {
        if self <= 0.0 {
            Err(ErrorCode::LogRange)
        } else {
            Ok(fmath::log10(self))
        }
    }
    #[inline]
    fn powf(self, exponent: f64) -> Result<f64, ErrorCode> {
        let result = fmath::pow(self, exponent);
        if result.is_nan() {
            Err(ErrorCode::AccuracyLost)
        } else if result.is_infinite() {
            Err(ErrorCode::ExpRange)
        } else {
            Ok(result)
        }
    }
}

/// Types that can be converted from and to little endian bytes.
///
/// The byte window performs all of its unaligned loads and stores through
/// this trait.
pub trait LittleEndianConvert {
    /// The little endian bytes representation.
    type Bytes: Default + AsRef<[u8]> + AsMut<[u8]>;

    /// Converts `self` into little endian bytes.
    fn into_le_bytes(self) -> Self::Bytes;

    /// Converts little endian bytes into `Self`.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_little_endian_convert {
    ( $($primitive:ty),* $(,)? ) => {
        $(
            impl LittleEndianConvert for $primitive {
                type Bytes = [::core::primitive::u8; ::core::mem::size_of::<$primitive>()];

                #[inline]
                fn into_le_bytes(self) -> Self::Bytes {
                    <$primitive>::to_le_bytes(self)
                }

                #[inline]
                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$primitive>::from_le_bytes(bytes)
                }
            }
        )*
    };
}
impl_little_endian_convert!(u8, u16, u32, u64, i8, i16, i32, i64, f64);

#[test]
fn truncation_range_boundaries() {
    assert_eq!(TryTruncateInto::<i32, _>::try_truncate_into(2147483647.0f64), Ok(i32::MAX));
    assert_eq!(
        TryTruncateInto::<i32, _>::try_truncate_into(2147483648.0f64),
        Err(ErrorCode::NumberTooBig)
    );
    assert_eq!(
        TryTruncateInto::<i32, _>::try_truncate_into(-2147483648.0f64),
        Ok(i32::MIN)
    );
    assert_eq!(
        TryTruncateInto::<i32, _>::try_truncate_into(-2147483649.0f64),
        Err(ErrorCode::NumberTooBig)
    );
    // 2^63 as f64 is exactly representable and out of range; the largest
    // in-range float is 2^63 - 1024.
    assert_eq!(
        TryTruncateInto::<i64, _>::try_truncate_into(9223372036854775808.0f64),
        Err(ErrorCode::NumberTooBig)
    );
    assert_eq!(
        TryTruncateInto::<i64, _>::try_truncate_into(-9223372036854775808.0f64),
        Ok(i64::MIN)
    );
    assert_eq!(
        TryTruncateInto::<i64, _>::try_truncate_into(f64::NAN),
        Err(ErrorCode::BadConversion)
    );
}

#[test]
fn truncation_rounds_towards_zero() {
    assert_eq!(TryTruncateInto::<i32, _>::try_truncate_into(1.9f64), Ok(1));
    assert_eq!(TryTruncateInto::<i32, _>::try_truncate_into(-1.9f64), Ok(-1));
}

#[test]
fn division_checks() {
    assert_eq!(ArithmeticOps::div(1i32, 0i32), Err(ErrorCode::DivisionByZero));
    assert_eq!(ArithmeticOps::div(i32::MIN, -1i32), Err(ErrorCode::NumberTooBig));
    assert_eq!(ArithmeticOps::div(1.0f64, 0.0f64), Err(ErrorCode::DivisionByZero));
    assert_eq!(IntegerOps::rem(7i64, 0i64), Err(ErrorCode::DivisionByZero));
    assert_eq!(IntegerOps::rem(7i64, 4i64), Ok(3));
}

#[test]
fn promotion_order() {
    assert_eq!(ValueType::U8.promoted(ValueType::I32), ValueType::I32);
    assert_eq!(ValueType::I64.promoted(ValueType::I32), ValueType::I64);
    assert_eq!(ValueType::F64.promoted(ValueType::U8), ValueType::F64);
    assert_eq!(ValueType::I32.promoted(ValueType::I32), ValueType::I32);
}
