//! Operation descriptors for the transform engine.
//!
//! An operation is a table of per-dtype function pointers plus a unit rule.
//! The engine resolves exactly one slot per call before touching any data:
//! a `None` slot means the dtype combination is unsupported and surfaces as
//! `DTypeError::NoOverload`. Variance-aware operations additionally provide
//! `ValueAndVariance` slots; comparisons provide bool-output slots instead.

use crate::error::UnitError;
use crate::unit::Unit;
use crate::value_and_variance::ValueAndVariance;

type Vv<T> = ValueAndVariance<T>;

/// A two-operand elementwise operation.
pub trait BinaryOp: Sync {
    fn name(&self) -> &'static str;

    /// Output unit, or failure for an invalid combination.
    fn unit(&self, a: Unit, b: Unit) -> Result<Unit, UnitError>;

    fn f64_op(&self) -> Option<fn(f64, f64) -> f64> {
        None
    }
    fn f32_op(&self) -> Option<fn(f32, f32) -> f32> {
        None
    }
    fn i64_op(&self) -> Option<fn(i64, i64) -> i64> {
        None
    }
    fn i32_op(&self) -> Option<fn(i32, i32) -> i32> {
        None
    }
    fn bool_op(&self) -> Option<fn(bool, bool) -> bool> {
        None
    }

    /// Variance-propagating overloads.
    fn f64_vv_op(&self) -> Option<fn(Vv<f64>, Vv<f64>) -> Vv<f64>> {
        None
    }
    fn f32_vv_op(&self) -> Option<fn(Vv<f32>, Vv<f32>) -> Vv<f32>> {
        None
    }

    /// Comparison overloads; presence makes the output dtype `Bool`.
    fn f64_cmp_op(&self) -> Option<fn(f64, f64) -> bool> {
        None
    }
    fn f32_cmp_op(&self) -> Option<fn(f32, f32) -> bool> {
        None
    }
    fn i64_cmp_op(&self) -> Option<fn(i64, i64) -> bool> {
        None
    }
    fn i32_cmp_op(&self) -> Option<fn(i32, i32) -> bool> {
        None
    }
    fn bool_cmp_op(&self) -> Option<fn(bool, bool) -> bool> {
        None
    }

    /// Which arguments must not carry variances.
    fn values_only(&self) -> [bool; 2] {
        [false, false]
    }
}

/// A one-operand elementwise operation.
pub trait UnaryOp: Sync {
    fn name(&self) -> &'static str;

    fn unit(&self, a: Unit) -> Result<Unit, UnitError>;

    fn f64_op(&self) -> Option<fn(f64) -> f64> {
        None
    }
    fn f32_op(&self) -> Option<fn(f32) -> f32> {
        None
    }
    fn i64_op(&self) -> Option<fn(i64) -> i64> {
        None
    }
    fn i32_op(&self) -> Option<fn(i32) -> i32> {
        None
    }

    fn f64_vv_op(&self) -> Option<fn(Vv<f64>) -> Vv<f64>> {
        None
    }
    fn f32_vv_op(&self) -> Option<fn(Vv<f32>) -> Vv<f32>> {
        None
    }

    fn values_only(&self) -> bool {
        false
    }
}

fn add<T: std::ops::Add<Output = T>>(a: T, b: T) -> T {
    a + b
}

fn sub<T: std::ops::Sub<Output = T>>(a: T, b: T) -> T {
    a - b
}

fn mul<T: std::ops::Mul<Output = T>>(a: T, b: T) -> T {
    a * b
}

fn div<T: std::ops::Div<Output = T>>(a: T, b: T) -> T {
    a / b
}

fn less<T: PartialOrd>(a: T, b: T) -> bool {
    a < b
}

fn greater<T: PartialOrd>(a: T, b: T) -> bool {
    a > b
}

fn equal<T: PartialEq>(a: T, b: T) -> bool {
    a == b
}

macro_rules! arithmetic_op {
    ($op:ident, $name:literal, $f:ident, $unit:expr, ints) => {
        pub struct $op;

        impl BinaryOp for $op {
            fn name(&self) -> &'static str {
                $name
            }
            fn unit(&self, a: Unit, b: Unit) -> Result<Unit, UnitError> {
                ($unit)(a, b)
            }
            fn f64_op(&self) -> Option<fn(f64, f64) -> f64> {
                Some($f::<f64>)
            }
            fn f32_op(&self) -> Option<fn(f32, f32) -> f32> {
                Some($f::<f32>)
            }
            fn i64_op(&self) -> Option<fn(i64, i64) -> i64> {
                Some($f::<i64>)
            }
            fn i32_op(&self) -> Option<fn(i32, i32) -> i32> {
                Some($f::<i32>)
            }
            fn f64_vv_op(&self) -> Option<fn(Vv<f64>, Vv<f64>) -> Vv<f64>> {
                Some($f::<Vv<f64>>)
            }
            fn f32_vv_op(&self) -> Option<fn(Vv<f32>, Vv<f32>) -> Vv<f32>> {
                Some($f::<Vv<f32>>)
            }
        }
    };
    ($op:ident, $name:literal, $f:ident, $unit:expr, floats) => {
        pub struct $op;

        impl BinaryOp for $op {
            fn name(&self) -> &'static str {
                $name
            }
            fn unit(&self, a: Unit, b: Unit) -> Result<Unit, UnitError> {
                ($unit)(a, b)
            }
            fn f64_op(&self) -> Option<fn(f64, f64) -> f64> {
                Some($f::<f64>)
            }
            fn f32_op(&self) -> Option<fn(f32, f32) -> f32> {
                Some($f::<f32>)
            }
            fn f64_vv_op(&self) -> Option<fn(Vv<f64>, Vv<f64>) -> Vv<f64>> {
                Some($f::<Vv<f64>>)
            }
            fn f32_vv_op(&self) -> Option<fn(Vv<f32>, Vv<f32>) -> Vv<f32>> {
                Some($f::<Vv<f32>>)
            }
        }
    };
}

arithmetic_op!(Plus, "plus", add, |a: Unit, b: Unit| a.expect_same(b), ints);
arithmetic_op!(Minus, "minus", sub, |a: Unit, b: Unit| a.expect_same(b), ints);
arithmetic_op!(Times, "times", mul, Unit::checked_mul, ints);
// Integer division would panic on a zero divisor; only float overloads are
// provided.
arithmetic_op!(Divide, "divide", div, Unit::checked_div, floats);
arithmetic_op!(
    PlusEquals,
    "plus_equals",
    add,
    |a: Unit, b: Unit| a.expect_same(b),
    ints
);

macro_rules! extremum_op {
    ($op:ident, $name:literal, $f:ident) => {
        pub struct $op;

        impl BinaryOp for $op {
            fn name(&self) -> &'static str {
                $name
            }
            fn unit(&self, a: Unit, b: Unit) -> Result<Unit, UnitError> {
                a.expect_same(b)
            }
            fn f64_op(&self) -> Option<fn(f64, f64) -> f64> {
                Some(f64::$f)
            }
            fn f32_op(&self) -> Option<fn(f32, f32) -> f32> {
                Some(f32::$f)
            }
            fn i64_op(&self) -> Option<fn(i64, i64) -> i64> {
                Some(Ord::$f)
            }
            fn i32_op(&self) -> Option<fn(i32, i32) -> i32> {
                Some(Ord::$f)
            }
            fn f64_vv_op(&self) -> Option<fn(Vv<f64>, Vv<f64>) -> Vv<f64>> {
                Some(Vv::<f64>::$f)
            }
            fn f32_vv_op(&self) -> Option<fn(Vv<f32>, Vv<f32>) -> Vv<f32>> {
                Some(Vv::<f32>::$f)
            }
        }
    };
}

extremum_op!(MaxEquals, "max_equals", max);
extremum_op!(MinEquals, "min_equals", min);

macro_rules! comparison_op {
    ($op:ident, $name:literal, $f:ident $(, $bool_slot:ident)?) => {
        pub struct $op;

        impl BinaryOp for $op {
            fn name(&self) -> &'static str {
                $name
            }
            fn unit(&self, a: Unit, b: Unit) -> Result<Unit, UnitError> {
                a.expect_same(b).map(|_| Unit::NONE)
            }
            fn f64_cmp_op(&self) -> Option<fn(f64, f64) -> bool> {
                Some($f::<f64>)
            }
            fn f32_cmp_op(&self) -> Option<fn(f32, f32) -> bool> {
                Some($f::<f32>)
            }
            fn i64_cmp_op(&self) -> Option<fn(i64, i64) -> bool> {
                Some($f::<i64>)
            }
            fn i32_cmp_op(&self) -> Option<fn(i32, i32) -> bool> {
                Some($f::<i32>)
            }
            $(
                fn $bool_slot(&self) -> Option<fn(bool, bool) -> bool> {
                    Some($f::<bool>)
                }
            )?
            fn values_only(&self) -> [bool; 2] {
                [true, true]
            }
        }
    };
}

comparison_op!(Less, "less", less);
comparison_op!(Greater, "greater", greater);
comparison_op!(Equal, "equal", equal, bool_cmp_op);

pub struct Sqrt;

impl UnaryOp for Sqrt {
    fn name(&self) -> &'static str {
        "sqrt"
    }
    fn unit(&self, a: Unit) -> Result<Unit, UnitError> {
        a.sqrt()
    }
    fn f64_op(&self) -> Option<fn(f64) -> f64> {
        Some(f64::sqrt)
    }
    fn f32_op(&self) -> Option<fn(f32) -> f32> {
        Some(f32::sqrt)
    }
    fn f64_vv_op(&self) -> Option<fn(Vv<f64>) -> Vv<f64>> {
        Some(Vv::<f64>::sqrt)
    }
    fn f32_vv_op(&self) -> Option<fn(Vv<f32>) -> Vv<f32>> {
        Some(Vv::<f32>::sqrt)
    }
}

pub struct Abs;

impl UnaryOp for Abs {
    fn name(&self) -> &'static str {
        "abs"
    }
    fn unit(&self, a: Unit) -> Result<Unit, UnitError> {
        Ok(a)
    }
    fn f64_op(&self) -> Option<fn(f64) -> f64> {
        Some(f64::abs)
    }
    fn f32_op(&self) -> Option<fn(f32) -> f32> {
        Some(f32::abs)
    }
    fn i64_op(&self) -> Option<fn(i64) -> i64> {
        Some(i64::abs)
    }
    fn i32_op(&self) -> Option<fn(i32) -> i32> {
        Some(i32::abs)
    }
    fn f64_vv_op(&self) -> Option<fn(Vv<f64>) -> Vv<f64>> {
        Some(Vv::<f64>::abs)
    }
    fn f32_vv_op(&self) -> Option<fn(Vv<f32>) -> Vv<f32>> {
        Some(Vv::<f32>::abs)
    }
}

pub struct Exp;

impl UnaryOp for Exp {
    fn name(&self) -> &'static str {
        "exp"
    }
    fn unit(&self, a: Unit) -> Result<Unit, UnitError> {
        a.expect_none()
    }
    fn f64_op(&self) -> Option<fn(f64) -> f64> {
        Some(f64::exp)
    }
    fn f32_op(&self) -> Option<fn(f32) -> f32> {
        Some(f32::exp)
    }
    fn f64_vv_op(&self) -> Option<fn(Vv<f64>) -> Vv<f64>> {
        Some(Vv::<f64>::exp)
    }
    fn f32_vv_op(&self) -> Option<fn(Vv<f32>) -> Vv<f32>> {
        Some(Vv::<f32>::exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_requires_same_units() {
        assert_eq!(Plus.unit(Unit::M, Unit::M).unwrap(), Unit::M);
        assert!(Plus.unit(Unit::M, Unit::S).is_err());
    }

    #[test]
    fn times_and_divide_combine_units() {
        assert_eq!(
            Times.unit(Unit::M, Unit::S).unwrap(),
            (Unit::M * Unit::S).unwrap()
        );
        assert_eq!(
            Divide.unit(Unit::M, Unit::S).unwrap(),
            (Unit::M / Unit::S).unwrap()
        );
    }

    #[test]
    fn divide_has_no_integer_overload() {
        assert!(Divide.i64_op().is_none());
        assert!(Divide.i32_op().is_none());
        assert!(Divide.f64_op().is_some());
    }

    #[test]
    fn comparisons_are_values_only_and_unitless() {
        assert_eq!(Less.values_only(), [true, true]);
        assert_eq!(Less.unit(Unit::M, Unit::M).unwrap(), Unit::NONE);
        assert!(Less.unit(Unit::M, Unit::S).is_err());
        let f = Less.f64_cmp_op().unwrap();
        assert!(f(1.0, 2.0));
        assert!(!f(2.0, 1.0));
        // Bool ordering comparisons are not provided; equality is.
        assert!(Less.bool_cmp_op().is_none());
        assert!(Equal.bool_cmp_op().is_some());
    }

    #[test]
    fn extrema_are_idempotent_and_variance_aware() {
        let f = MaxEquals.f64_op().unwrap();
        assert_eq!(f(3.0, 3.0), 3.0);
        assert_eq!(f(1.0, 2.0), 2.0);
        let vv = MinEquals.f64_vv_op().unwrap();
        let a = ValueAndVariance::new(1.0, 9.0);
        let b = ValueAndVariance::new(2.0, 1.0);
        assert_eq!(vv(a, b), a);
    }

    #[test]
    fn sqrt_halves_unit_exponents() {
        let m2 = (Unit::M * Unit::M).unwrap();
        assert_eq!(Sqrt.unit(m2).unwrap(), Unit::M);
        assert!(Sqrt.unit(Unit::M).is_err());
        assert!(Sqrt.i64_op().is_none());
    }

    #[test]
    fn exp_requires_dimensionless() {
        assert!(Exp.unit(Unit::M).is_err());
        assert_eq!(Exp.unit(Unit::NONE).unwrap(), Unit::NONE);
    }
}
