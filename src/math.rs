use num_traits::Float;

/// Logistic sigmoid, `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid<T: Float>(x: T) -> T {
    T::one() / (T::one() + (-x).exp())
}

/// Hyperbolic tangent computed as `2 * sigmoid(2x) - 1`.
///
/// Used by the unit layers instead of [`Float::tanh`] so that forward and backward agree on the
/// same formula.
#[inline]
pub fn tanh<T: Float>(x: T) -> T {
    let two = T::one() + T::one();
    two * sigmoid(two * x) - T::one()
}

/// Clamps `x` to `[-threshold, threshold]`.
#[inline]
pub fn clip<T: Float>(x: T, threshold: T) -> T {
    x.max(-threshold).min(threshold)
}
