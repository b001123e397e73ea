//! Opaque physical-unit tokens.
//!
//! The engine consumes units as an opaque algebra: multiply, divide, compare,
//! and fail on invalid combinations. This module provides the minimal
//! exponent-vector realization of that interface; conversion tables and unit
//! string parsing are out of scope.

use std::fmt;
use std::ops::{Div, Mul};

use crate::error::UnitError;

const BASE_SYMBOLS: [&str; 4] = ["m", "s", "kg", "counts"];

/// A unit as integer exponents over a small set of base quantities.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Unit {
    powers: [i8; 4],
}

impl Unit {
    /// Dimensionless.
    pub const NONE: Unit = Unit { powers: [0; 4] };
    /// Length in meters.
    pub const M: Unit = Unit {
        powers: [1, 0, 0, 0],
    };
    /// Time in seconds.
    pub const S: Unit = Unit {
        powers: [0, 1, 0, 0],
    };
    /// Mass in kilograms.
    pub const KG: Unit = Unit {
        powers: [0, 0, 1, 0],
    };
    /// Detector counts.
    pub const COUNTS: Unit = Unit {
        powers: [0, 0, 0, 1],
    };

    pub fn is_none(&self) -> bool {
        *self == Unit::NONE
    }

    pub fn checked_mul(self, other: Unit) -> Result<Unit, UnitError> {
        let mut powers = [0i8; 4];
        for i in 0..4 {
            powers[i] = self.powers[i]
                .checked_add(other.powers[i])
                .ok_or(UnitError::ExponentOverflow)?;
        }
        Ok(Unit { powers })
    }

    pub fn checked_div(self, other: Unit) -> Result<Unit, UnitError> {
        let mut powers = [0i8; 4];
        for i in 0..4 {
            powers[i] = self.powers[i]
                .checked_sub(other.powers[i])
                .ok_or(UnitError::ExponentOverflow)?;
        }
        Ok(Unit { powers })
    }

    /// Square root; fails unless every exponent is even.
    pub fn sqrt(self) -> Result<Unit, UnitError> {
        let mut powers = [0i8; 4];
        for i in 0..4 {
            if self.powers[i] % 2 != 0 {
                return Err(UnitError::NonIntegerRoot(self));
            }
            powers[i] = self.powers[i] / 2;
        }
        Ok(Unit { powers })
    }

    /// Both operands of a same-unit operation (add, subtract, compare) must
    /// agree; returns the common unit.
    pub fn expect_same(self, other: Unit) -> Result<Unit, UnitError> {
        if self == other {
            Ok(self)
        } else {
            Err(UnitError::Incompatible { a: self, b: other })
        }
    }

    /// Fails unless dimensionless (for transcendental functions).
    pub fn expect_none(self) -> Result<Unit, UnitError> {
        if self.is_none() {
            Ok(self)
        } else {
            Err(UnitError::NotDimensionless(self))
        }
    }
}

impl Mul for Unit {
    type Output = Result<Unit, UnitError>;

    fn mul(self, rhs: Unit) -> Self::Output {
        self.checked_mul(rhs)
    }
}

impl Div for Unit {
    type Output = Result<Unit, UnitError>;

    fn div(self, rhs: Unit) -> Self::Output {
        self.checked_div(rhs)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("dimensionless");
        }
        let mut first = true;
        for (i, &p) in self.powers.iter().enumerate() {
            if p == 0 {
                continue;
            }
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if p == 1 {
                write!(f, "{}", BASE_SYMBOLS[i])?;
            } else {
                write!(f, "{}^{}", BASE_SYMBOLS[i], p)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_roundtrip() {
        let v = (Unit::M / Unit::S).unwrap();
        assert_eq!((v * Unit::S).unwrap(), Unit::M);
    }

    #[test]
    fn sqrt_requires_even_exponents() {
        let m2 = (Unit::M * Unit::M).unwrap();
        assert_eq!(m2.sqrt().unwrap(), Unit::M);
        assert_eq!(Unit::M.sqrt(), Err(UnitError::NonIntegerRoot(Unit::M)));
    }

    #[test]
    fn same_unit_check() {
        assert_eq!(Unit::M.expect_same(Unit::M).unwrap(), Unit::M);
        assert!(Unit::M.expect_same(Unit::S).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Unit::NONE.to_string(), "dimensionless");
        let a = (Unit::M / Unit::S).unwrap();
        let accel = (a / Unit::S).unwrap();
        assert_eq!(accel.to_string(), "m s^-2");
    }
}
