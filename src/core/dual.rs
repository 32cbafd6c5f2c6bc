//! Forward-mode automatic differentiation.
//!
//! A motif has at most five learnable scalars and two inputs, so carrying a
//! fixed-width tangent vector alongside every value is cheaper than building a
//! tape. The same forward code runs on plain `f64` (sampling), on
//! `Dual<2>` (input gradients) and on `Dual<MAX_PARAMS>` (parameter gradients)
//! through the [`Scalar`] trait.

use core::ops::{Add, Div, Mul, Neg, Sub};

/// Arithmetic surface the motif forward rule is written against.
pub trait Scalar:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    fn from_f64(v: f64) -> Self;
    fn value(&self) -> f64;
    fn tanh(self) -> Self;
    fn sigmoid(self) -> Self;
    fn abs(self) -> Self;

    #[inline]
    fn relu(self) -> Self {
        if self.value() > 0.0 {
            self
        } else {
            Self::from_f64(0.0)
        }
    }

    /// Elementwise max; ties keep `self` so the subgradient is deterministic.
    #[inline]
    fn max(self, other: Self) -> Self {
        if other.value() > self.value() {
            other
        } else {
            self
        }
    }

    #[inline]
    fn min(self, other: Self) -> Self {
        if other.value() < self.value() {
            other
        } else {
            self
        }
    }
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn tanh(self) -> Self {
        f64::tanh(self)
    }

    #[inline]
    fn sigmoid(self) -> Self {
        1.0 / (1.0 + (-self).exp())
    }

    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }
}

/// Value plus `N` partial derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual<const N: usize> {
    pub re: f64,
    pub eps: [f64; N],
}

impl<const N: usize> Dual<N> {
    pub fn constant(re: f64) -> Self {
        Self { re, eps: [0.0; N] }
    }

    /// A free variable: derivative 1 along axis `index`.
    pub fn variable(re: f64, index: usize) -> Self {
        let mut eps = [0.0; N];
        if index < N {
            eps[index] = 1.0;
        }
        Self { re, eps }
    }

    /// Chain rule for a unary function with value `f` and derivative `df`.
    #[inline]
    fn chain(self, f: f64, df: f64) -> Self {
        let mut eps = self.eps;
        for e in &mut eps {
            *e *= df;
        }
        Self { re: f, eps }
    }

    /// Euclidean norm of the tangent vector.
    pub fn gradient_norm(&self) -> f64 {
        self.eps.iter().map(|e| e * e).sum::<f64>().sqrt()
    }
}

impl<const N: usize> Add for Dual<N> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        let mut eps = self.eps;
        for (e, r) in eps.iter_mut().zip(rhs.eps.iter()) {
            *e += r;
        }
        Self {
            re: self.re + rhs.re,
            eps,
        }
    }
}

impl<const N: usize> Sub for Dual<N> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        let mut eps = self.eps;
        for (e, r) in eps.iter_mut().zip(rhs.eps.iter()) {
            *e -= r;
        }
        Self {
            re: self.re - rhs.re,
            eps,
        }
    }
}

impl<const N: usize> Mul for Dual<N> {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let mut eps = [0.0; N];
        for (i, e) in eps.iter_mut().enumerate() {
            *e = self.eps[i] * rhs.re + self.re * rhs.eps[i];
        }
        Self {
            re: self.re * rhs.re,
            eps,
        }
    }
}

impl<const N: usize> Div for Dual<N> {
    type Output = Self;

    #[inline]
    fn div(self, rhs: Self) -> Self {
        let inv = 1.0 / rhs.re;
        let mut eps = [0.0; N];
        for (i, e) in eps.iter_mut().enumerate() {
            *e = (self.eps[i] * rhs.re - self.re * rhs.eps[i]) * inv * inv;
        }
        // Same rounding as plain f64 division.
        Self {
            re: self.re / rhs.re,
            eps,
        }
    }
}

impl<const N: usize> Neg for Dual<N> {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        self.chain(-self.re, -1.0)
    }
}

impl<const N: usize> Scalar for Dual<N> {
    #[inline]
    fn from_f64(v: f64) -> Self {
        Self::constant(v)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.re
    }

    #[inline]
    fn tanh(self) -> Self {
        let t = self.re.tanh();
        self.chain(t, 1.0 - t * t)
    }

    #[inline]
    fn sigmoid(self) -> Self {
        let s = 1.0 / (1.0 + (-self.re).exp());
        self.chain(s, s * (1.0 - s))
    }

    #[inline]
    fn abs(self) -> Self {
        if self.re < 0.0 {
            -self
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn product_rule() {
        let x = Dual::<2>::variable(3.0, 0);
        let y = Dual::<2>::variable(-2.0, 1);
        let z = x * y + x;
        assert!(close(z.re, -3.0));
        assert!(close(z.eps[0], -1.0));
        assert!(close(z.eps[1], 3.0));
    }

    #[test]
    fn division_value_matches_f64_bitwise() {
        for &(a, b) in &[(0.1, 3.0), (0.7, 0.3), (-2.5, 1.7), (1.0, 49.0), (5e-3, 0.987)] {
            let z = Dual::<2>::variable(a, 0) / Dual::<2>::constant(b);
            assert_eq!(z.re.to_bits(), (a / b).to_bits());
        }
    }

    #[test]
    fn quotient_rule() {
        let x = Dual::<1>::variable(2.0, 0);
        let z = Dual::<1>::constant(1.0) / x;
        assert!(close(z.re, 0.5));
        assert!(close(z.eps[0], -0.25));
    }

    #[test]
    fn activations_match_finite_differences() {
        let h = 1e-6;
        for &x0 in &[-1.3, -0.2, 0.4, 2.1] {
            let x = Dual::<1>::variable(x0, 0);

            let fd = (Scalar::tanh(x0 + h) - Scalar::tanh(x0 - h)) / (2.0 * h);
            assert!((x.tanh().eps[0] - fd).abs() < 1e-6);

            let fd = (Scalar::sigmoid(x0 + h) - Scalar::sigmoid(x0 - h)) / (2.0 * h);
            assert!((x.sigmoid().eps[0] - fd).abs() < 1e-6);

            let expected = if x0 > 0.0 { 1.0 } else { 0.0 };
            assert!(close(x.relu().eps[0], expected));
        }
    }

    #[test]
    fn max_carries_winning_tangent() {
        let a = Dual::<2>::variable(1.0, 0);
        let b = Dual::<2>::variable(2.0, 1);
        let m = a.max(b);
        assert_eq!(m.eps, [0.0, 1.0]);
        let m = a.min(b);
        assert_eq!(m.eps, [1.0, 0.0]);
    }

    #[test]
    fn gradient_norm_is_euclidean() {
        let d = Dual::<2> {
            re: 0.0,
            eps: [3.0, 4.0],
        };
        assert!(close(d.gradient_norm(), 5.0));
    }
}
