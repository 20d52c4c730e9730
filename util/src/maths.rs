//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    target_range.0
        + ((value - source_range.0)
        * (target_range.1 - target_range.0)
        / (source_range.1 - source_range.0))
}

/// Clamp a value between min and max.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Zero the value if its magnitude does not exceed the deadband.
pub fn deadband<T>(value: T, deadband: T) -> T
where
    T: Float
{
    if value.abs() > deadband {
        value
    }
    else {
        T::zero()
    }
}

/// Scale a set of actuator demands so that none exceeds a magnitude of 1.
///
/// If the largest magnitude is above 1 every element is divided by it,
/// otherwise the demands are left untouched. Signs and the ratios between
/// elements are always preserved.
pub fn normalise<T>(values: &mut [T])
where
    T: Float
{
    let max = values
        .iter()
        .fold(T::zero(), |max, v| if v.abs() > max { v.abs() } else { max });

    if max > T::one() {
        for v in values.iter_mut() {
            *v = *v / max;
        }
    }
}

/// Get the signed angular error `alpha - beta` in degrees, wrapped into the
/// range (-180, 180].
pub fn wrap_deg_err<T>(alpha: T, beta: T) -> T
where
    T: Float
{
    let full_t = T::from(360.0).unwrap();
    let half_t = T::from(180.0).unwrap();

    let r = rem_euclid(alpha - beta, full_t);

    if r > half_t {
        r - full_t
    }
    else {
        r
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()`, violating the mathematical definition, if
/// `self` is much smaller than `rhs.abs()` in magnitude and `self < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}
