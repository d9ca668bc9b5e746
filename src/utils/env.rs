// src/utils/env.rs
use log::{debug, info};

/// Loads variables from `.env` (or `ENV_FILE` when set). Values already present
/// in the process environment are left untouched.
pub fn load_env() {
    let result = match std::env::var("ENV_FILE") {
        Ok(path) => dotenv::from_filename(&path),
        Err(_) => dotenv::dotenv(),
    };

    match result {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No env file loaded ({}); using process environment", e),
    }
}

/// Reads and parses a variable, falling back to `default` when it is missing
/// or unparseable.
pub fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid value '{}' for {}, using default {}", raw, key, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_parse_env_or_falls_back() {
        env::remove_var("REUNITE_TEST_MISSING");
        assert_eq!(parse_env_or("REUNITE_TEST_MISSING", 7usize), 7);

        env::set_var("REUNITE_TEST_GARBAGE", "not-a-number");
        assert_eq!(parse_env_or("REUNITE_TEST_GARBAGE", 0.5f64), 0.5);
        env::remove_var("REUNITE_TEST_GARBAGE");
    }

    #[test]
    fn test_parse_env_or_reads_value() {
        env::set_var("REUNITE_TEST_PRESENT", " 12 ");
        assert_eq!(parse_env_or("REUNITE_TEST_PRESENT", 3u64), 12);
        env::remove_var("REUNITE_TEST_PRESENT");
    }
}
