//! Environment-based configuration, loaded once at process start.
//!
//! Hand-rolled `env::var(...).unwrap_or_else(...)` /
//! `.ok().and_then(|s| s.parse().ok())` style rather than a derive-macro
//! config crate. Required variables fail construction with a named
//! [`ConfigError`] instead of surfacing later as a confusing downstream
//! I/O or DB-connect failure.

mod error;

pub use error::ConfigError;

use std::env;
use std::time::Duration;

/// Gateway configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `MODE` — `"debug"` or `"release"`; only used to pick a default log
    /// verbosity, never branched on elsewhere.
    pub mode: String,

    /// `LISTEN` — TCP port the accept server binds on.
    pub listen_port: u16,

    /// `HOST_ADDRESS` — `host:port` of the upstream payment host.
    pub host_address: String,

    /// `MYSQL_DSN` — connection string for the persistence pool.
    pub mysql_dsn: String,

    /// `HSM_ADDRESS` — `host:port` of the PIN-translation HSM.
    pub hsm_address: String,

    /// `TIMEOUT_TRX` — seconds to wait for a host response before giving
    /// up on a forwarded request (defaults to 60s, configurable per
    /// deployment).
    pub timeout_trx: Duration,

    /// `TIMEOUT_INACTIVITY` — seconds of terminal-link inactivity before
    /// the connection is dropped.
    pub timeout_inactivity: Duration,

    /// `DEBUG_LOG` — when true, raw frame bytes are traced at `debug!`
    /// under the `dl_in`/`dl_out`/`ul_in`/`ul_out` tags.
    pub debug_log: bool,

    /// `LICENSE_KEY` — passed through to the (stubbed) license check.
    pub license_key: String,
}

impl Config {
    /// Load `.env` (if present) then read the environment. Missing
    /// required variables fail fast rather than surfacing later as a
    /// vague connection error.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(?path, "loaded .env"),
            Err(dotenvy::Error::Io(_)) => {} // no .env file present — fine in production
            Err(e) => tracing::warn!(error = %e, "failed to parse .env"),
        }

        let mode = env::var("MODE").unwrap_or_else(|_| "debug".to_string());

        let listen_port = parse_or_default("LISTEN", 88)?;

        let host_address = required("HOST_ADDRESS")?;
        let mysql_dsn = required("MYSQL_DSN")?;
        let hsm_address = required("HSM_ADDRESS")?;

        let timeout_trx = Duration::from_secs(parse_or_default("TIMEOUT_TRX", 60)?);
        let timeout_inactivity = Duration::from_secs(parse_or_default("TIMEOUT_INACTIVITY", 60)?);

        let debug_log = parse_or_default::<u8>("DEBUG_LOG", 0)? != 0;
        let license_key = env::var("LICENSE_KEY").unwrap_or_default();

        Ok(Config {
            mode,
            listen_port,
            host_address,
            mysql_dsn,
            hsm_address,
            timeout_trx,
            timeout_inactivity,
            debug_log,
            license_key,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_or_default<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            reason: "not a valid number",
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_vars() {
        for var in [
            "MODE",
            "LISTEN",
            "HOST_ADDRESS",
            "MYSQL_DSN",
            "HSM_ADDRESS",
            "TIMEOUT_TRX",
            "TIMEOUT_INACTIVITY",
            "DEBUG_LOG",
            "LICENSE_KEY",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_var_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_vars();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("HOST_ADDRESS")));
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_vars();
        env::set_var("HOST_ADDRESS", "127.0.0.1:9000");
        env::set_var("MYSQL_DSN", "mysql://u:p@127.0.0.1/db");
        env::set_var("HSM_ADDRESS", "127.0.0.1:9001");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.listen_port, 88);
        assert_eq!(cfg.timeout_trx, Duration::from_secs(60));
        assert_eq!(cfg.timeout_inactivity, Duration::from_secs(60));
        assert!(!cfg.debug_log);
        clear_vars();
    }

    #[test]
    fn invalid_numeric_var_is_reported_by_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_vars();
        env::set_var("HOST_ADDRESS", "127.0.0.1:9000");
        env::set_var("MYSQL_DSN", "mysql://u:p@127.0.0.1/db");
        env::set_var("HSM_ADDRESS", "127.0.0.1:9001");
        env::set_var("LISTEN", "not-a-port");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LISTEN", .. }));
        clear_vars();
    }
}
