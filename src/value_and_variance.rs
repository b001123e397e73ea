//! Paired (value, variance) arithmetic.
//!
//! First-order error propagation: an operation applied to values with
//! uncertainties is re-executed on this pair representation, e.g.
//! `var(a * b) = b² var(a) + a² var(b)`. The transform engine substitutes
//! these pairs for plain values whenever an operand carries variances.

use std::ops::{Add, Div, Mul, Sub};

use num_traits::Float;

/// An element's value together with its squared uncertainty.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct ValueAndVariance<T> {
    pub value: T,
    pub variance: T,
}

impl<T> ValueAndVariance<T> {
    pub fn new(value: T, variance: T) -> Self {
        ValueAndVariance { value, variance }
    }
}

impl<T: Float> ValueAndVariance<T> {
    /// `var(√x) = var(x) / (4 x)`.
    pub fn sqrt(self) -> Self {
        let two = T::one() + T::one();
        let four = two + two;
        ValueAndVariance {
            value: self.value.sqrt(),
            variance: self.variance / (four * self.value),
        }
    }

    /// Absolute value; the variance is unchanged.
    pub fn abs(self) -> Self {
        ValueAndVariance {
            value: self.value.abs(),
            variance: self.variance,
        }
    }

    /// `var(eˣ) = e²ˣ var(x)`.
    pub fn exp(self) -> Self {
        let value = self.value.exp();
        ValueAndVariance {
            value,
            variance: value * value * self.variance,
        }
    }

    /// The pair with the larger value; ties keep `self`.
    pub fn max(self, other: Self) -> Self {
        if other.value > self.value {
            other
        } else {
            self
        }
    }

    /// The pair with the smaller value; ties keep `self`.
    pub fn min(self, other: Self) -> Self {
        if other.value < self.value {
            other
        } else {
            self
        }
    }
}

impl<T: Float> Add for ValueAndVariance<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        ValueAndVariance {
            value: self.value + rhs.value,
            variance: self.variance + rhs.variance,
        }
    }
}

impl<T: Float> Sub for ValueAndVariance<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        ValueAndVariance {
            value: self.value - rhs.value,
            variance: self.variance + rhs.variance,
        }
    }
}

impl<T: Float> Mul for ValueAndVariance<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        ValueAndVariance {
            value: self.value * rhs.value,
            variance: rhs.value * rhs.value * self.variance
                + self.value * self.value * rhs.variance,
        }
    }
}

impl<T: Float> Div for ValueAndVariance<T> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let value = self.value / rhs.value;
        let denom = rhs.value * rhs.value;
        ValueAndVariance {
            value,
            variance: self.variance / denom + value * value * rhs.variance / denom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn add_sums_variances() {
        let a = ValueAndVariance::new(1.0, 0.1);
        let b = ValueAndVariance::new(2.0, 0.2);
        let c = a + b;
        assert_relative_eq!(c.value, 3.0);
        assert_relative_eq!(c.variance, 0.3);
    }

    #[test]
    fn sub_sums_variances() {
        let a = ValueAndVariance::new(5.0, 0.1);
        let b = ValueAndVariance::new(2.0, 0.2);
        let c = a - b;
        assert_relative_eq!(c.value, 3.0);
        assert_relative_eq!(c.variance, 0.3);
    }

    #[test]
    fn mul_propagates_first_order() {
        // var(a*b) = b² var(a) + a² var(b)
        let a = ValueAndVariance::new(3.0, 0.5);
        let b = ValueAndVariance::new(4.0, 0.25);
        let c = a * b;
        assert_relative_eq!(c.value, 12.0);
        assert_relative_eq!(c.variance, 16.0 * 0.5 + 9.0 * 0.25);
    }

    #[test]
    fn div_propagates_first_order() {
        let a = ValueAndVariance::new(8.0, 0.4);
        let b = ValueAndVariance::new(2.0, 0.1);
        let c = a / b;
        assert_relative_eq!(c.value, 4.0);
        assert_relative_eq!(c.variance, 0.4 / 4.0 + 16.0 * 0.1 / 4.0);
    }

    #[test]
    fn sqrt_quarter_rule() {
        let a = ValueAndVariance::new(4.0, 0.8);
        let r = a.sqrt();
        assert_relative_eq!(r.value, 2.0);
        assert_relative_eq!(r.variance, 0.8 / 16.0);
    }

    #[test]
    fn max_picks_pair_by_value() {
        let a = ValueAndVariance::new(1.0, 9.0);
        let b = ValueAndVariance::new(2.0, 1.0);
        assert_eq!(a.max(b), b);
        assert_eq!(a.min(b), a);
    }
}
