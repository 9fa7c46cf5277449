//! Configuration loading helper functions
//! Provides utilities for resolving a value with fallback logic

use std::fmt::Display;
use std::str::FromStr;
use tracing::{info, warn};

/// Get configuration value with priority: config file > ENV > Default
///
/// # Arguments
/// * `file_value` - Value set explicitly in the configuration file
/// * `env_var` - Environment variable name to check
/// * `default` - Default value to use as fallback
pub fn get_config_value<T>(file_value: Option<T>, env_var: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    // Priority 1: configuration file
    if let Some(val) = file_value {
        info!("Using {} from configuration file: {}", env_var, val);
        return val;
    }

    // Priority 2: Environment variable
    if let Ok(env_str) = std::env::var(env_var) {
        match env_str.parse::<T>() {
            Ok(val) => {
                info!("Using {} from environment: {}", env_var, env_str);
                return val;
            },
            Err(e) => {
                warn!("Failed to parse {} from environment: {}", env_var, e);
            },
        }
    }

    // Priority 3: Default value
    info!("Using default value for {}: {}", env_var, default);
    default
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_get_config_value_priority() {
        // File value wins
        let val = get_config_value(Some(8080u16), "OHD_TEST_PORT_UNSET_A", 3080);
        assert_eq!(val, 8080);

        // Default when nothing else is set
        let val = get_config_value(None, "OHD_TEST_PORT_UNSET_B", 3080u16);
        assert_eq!(val, 3080);
    }
}
