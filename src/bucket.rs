//! Deterministic percentage bucketing.
//!
//! The hash is the classic `hash * 31 + code_unit` string hash with signed
//! 32-bit wraparound, computed over UTF-16 code units. The backend assigns
//! cohorts with the same function, so the client must reproduce it bit for
//! bit. Do not replace it with a "better" hash.

/// Hash a key with 32-bit signed wraparound over its UTF-16 code units.
pub fn hash_key(key: &str) -> i32 {
    key.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    })
}

/// Bucket index in `0..100` for a key.
///
/// `i32::MIN` has no positive counterpart in 32 bits, so the absolute value
/// is taken in 64 bits.
pub fn bucket_index(key: &str) -> u8 {
    (i64::from(hash_key(key)).abs() % 100) as u8
}

/// Returns true when `key` falls inside `rate`, a fraction in `0.0..=1.0`.
///
/// A rate at or below zero is always false, at or above one always true.
pub fn bucket(key: &str, rate: f64) -> bool {
    if rate.is_nan() || rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }
    f64::from(bucket_index(key)) < rate * 100.0
}

/// Same as [`bucket`] with `percent` in `0.0..=100.0`.
pub fn bucket_percent(key: &str, percent: f64) -> bool {
    if percent.is_nan() || percent <= 0.0 {
        return false;
    }
    if percent >= 100.0 {
        return true;
    }
    f64::from(bucket_index(key)) < percent
}
