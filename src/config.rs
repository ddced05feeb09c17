// Environment-variable configuration, all with documented defaults.
// Mirrors `pythonmatcher/settings.py`'s `environ.get(name, default)` style
// and the teacher binary's own `std::env::var(...).unwrap_or(...)` bootstrap.
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub telemetry_host: String,
    pub telemetry_database: String,
    pub telemetry_enabled: bool,
    pub telemetry_drop_database: bool,
    pub telemetry_write_async: bool,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from the process environment, falling back to
    /// defaults for anything unset. Does not itself read a `.env` file —
    /// call `dotenvy::dotenv()` before this in `main` if one should be honored.
    pub fn from_env() -> Self {
        Self {
            telemetry_host: env::var("TELEMETRY_HOST").unwrap_or_else(|_| "localhost:8086".into()),
            telemetry_database: env::var("TELEMETRY_DATABASE")
                .unwrap_or_else(|_| "powermatcher".into()),
            telemetry_enabled: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_drop_database: parse_bool("TELEMETRY_DROP_DATABASE", false),
            telemetry_write_async: parse_bool("TELEMETRY_WRITE_ASYNC", false),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telemetry_host: "localhost:8086".into(),
            telemetry_database: "powermatcher".into(),
            telemetry_enabled: true,
            telemetry_drop_database: false,
            telemetry_write_async: false,
            log_level: "info".into(),
        }
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => v.eq_ignore_ascii_case("true") || v == "1",
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.telemetry_host, "localhost:8086");
        assert_eq!(config.telemetry_database, "powermatcher");
        assert!(config.telemetry_enabled);
        assert!(!config.telemetry_drop_database);
        assert!(!config.telemetry_write_async);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn parse_bool_accepts_1_and_true_case_insensitively() {
        env::set_var("PM_TEST_FLAG_A", "1");
        env::set_var("PM_TEST_FLAG_B", "TRUE");
        env::set_var("PM_TEST_FLAG_C", "false");
        assert!(parse_bool("PM_TEST_FLAG_A", false));
        assert!(parse_bool("PM_TEST_FLAG_B", false));
        assert!(!parse_bool("PM_TEST_FLAG_C", true));
        env::remove_var("PM_TEST_FLAG_A");
        env::remove_var("PM_TEST_FLAG_B");
        env::remove_var("PM_TEST_FLAG_C");
    }
}
