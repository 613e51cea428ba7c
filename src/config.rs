use std::env;
use std::fmt::Display;
use std::str::FromStr;

// ============================================================================
// Configuration
// ============================================================================
//
// Everything comes from the environment. DATABASE_URL selects the Postgres
// store when present; without it the binary runs against the in-process
// store, which is what the demo and local development use.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub metrics_port: u16,
}

impl AppConfig {
    pub fn load() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            metrics_port: try_load("METRICS_PORT", "9090"),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        tracing::debug!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().unwrap_or_else(|e| {
        tracing::warn!("invalid {key} value {raw}: {e}; falling back to {default}");
        default
            .parse()
            .ok()
            .expect("built-in default must be parseable")
    })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_uses_default() {
        let port: u16 = try_load("BAKERY_TEST_PORT_THAT_IS_NEVER_SET", "9090");
        assert_eq!(port, 9090);
    }

    #[test]
    fn test_load_produces_a_config() {
        let config = AppConfig::load();
        assert!(config.metrics_port > 0);
    }
}
