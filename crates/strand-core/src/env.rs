//! Environment variable utilities
//!
//! Generic `env_get<T>` for parsing environment variables with defaults.

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// Works with any type that implements `FromStr`. Unset or unparseable
/// values fall back to the default.
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

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other set value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_when_unset() {
        let v: usize = env_get("STRAND_TEST_SURELY_UNSET", 17);
        assert_eq!(v, 17);
        assert!(env_get_bool("STRAND_TEST_SURELY_UNSET", true));
    }

    #[test]
    fn test_parse_and_bool() {
        std::env::set_var("STRAND_TEST_ENV_GET", "42");
        let v: u64 = env_get("STRAND_TEST_ENV_GET", 0);
        assert_eq!(v, 42);

        std::env::set_var("STRAND_TEST_ENV_BOOL", "yes");
        assert!(env_get_bool("STRAND_TEST_ENV_BOOL", false));
        std::env::set_var("STRAND_TEST_ENV_BOOL", "off");
        assert!(!env_get_bool("STRAND_TEST_ENV_BOOL", true));
    }
}
