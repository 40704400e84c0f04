//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into `[min, max]`.
///
/// Unlike `f64::clamp` this never panics: if `min > max` the result is `max`, and a NaN value is
/// passed through unchanged.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    let mut ret = value;

    if ret < min {
        ret = min
    }
    if ret > max {
        ret = max
    }

    ret
}

/// Sign of the value as -1, 0 or 1.
pub fn sign<T>(value: T) -> T
where
    T: Float,
{
    if value > T::zero() {
        T::one()
    } else if value < T::zero() {
        -T::one()
    } else {
        T::zero()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clamp_inverted_bounds() {
        assert_eq!(clamp(5.0, 0.0, 1.0), 1.0);
        assert_eq!(clamp(-5.0, 0.0, 1.0), 0.0);
        assert_eq!(clamp(0.5, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_sign() {
        assert_eq!(sign(-0.1), -1.0);
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(3.0), 1.0);
    }
}
