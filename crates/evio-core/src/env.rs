//! Environment variable utilities.
//!
//! Generic `env_get<T>` for parsing environment variables with defaults,
//! used by the `cmd/` binaries for `EVIO_*` overrides.

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Everything else (including unset) returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Get environment variable as string, or return default.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Check if environment variable is set (regardless of value).
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__EVIO_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<usize> = env_get_opt("__EVIO_TEST_UNSET__");
        assert!(val.is_none());
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__EVIO_TEST_NUM__", "123");
        let val: usize = env_get("__EVIO_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__EVIO_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__EVIO_TEST_BAD__", "not_a_number");
        let val: usize = env_get("__EVIO_TEST_BAD__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__EVIO_TEST_BAD__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__EVIO_TEST_BOOL__", "yes");
        assert!(env_get_bool("__EVIO_TEST_BOOL__", false));
        std::env::set_var("__EVIO_TEST_BOOL__", "0");
        assert!(!env_get_bool("__EVIO_TEST_BOOL__", true));
        std::env::remove_var("__EVIO_TEST_BOOL__");
        assert!(env_get_bool("__EVIO_TEST_BOOL__", true));
    }
}
