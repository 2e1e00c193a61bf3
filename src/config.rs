//! Environment-driven configuration (C7, §6).
//!
//! Grounded in the teacher's `env.rs` defaulting helper, extended with a
//! fatal-on-missing variant: several of this system's variables have no
//! sane default and must abort startup rather than silently degrade.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;

const LISTEN: (&str, &str) = ("LISTEN", "0.0.0.0:8080");
const COUNTDOWN_DURATION_SEC: &str = "COUNTDOWN_DURATION_SEC";
const QUESTION_DURATION_SEC: &str = "QUESTION_DURATION_SEC";
const QUESTIONS_FILE_PATH: &str = "QUESTIONS_FILE_PATH";
const REPOSITORY_TTL_SEC: (&str, u64) = ("REPOSITORY_TTL_SEC", 300);
const ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required but was not set")]
    Missing(&'static str),
    #[error("{0} could not be parsed: {1}")]
    Invalid(&'static str, String),
    #[error("{0} must be a positive number of seconds, got {1}")]
    NotPositive(&'static str, u64),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub countdown_duration: Duration,
    pub question_duration: Duration,
    pub questions_file_path: String,
    pub repository_ttl: Duration,
    pub allowed_origins: Vec<String>,
}

/// Retrieve and parse an environment variable, falling back to `pair.1` when
/// it is unset (not when it is set but unparseable — that's still a hard
/// error, it means the operator made a typo).
fn from_env_or_default<V: FromStr>(pair: (&'static str, V)) -> Result<V, ConfigError> {
    match std::env::var(pair.0) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid(pair.0, value)),
        Err(_) => Ok(pair.1),
    }
}

fn require_env<V: FromStr>(name: &'static str) -> Result<V, ConfigError> {
    let value = std::env::var(name).map_err(|_| ConfigError::Missing(name))?;
    value.parse().map_err(|_| ConfigError::Invalid(name, value))
}

fn require_positive_seconds(name: &'static str) -> Result<Duration, ConfigError> {
    let seconds: u64 = require_env(name)?;
    if seconds == 0 {
        return Err(ConfigError::NotPositive(name, seconds));
    }
    Ok(Duration::from_secs(seconds))
}

impl Config {
    /// Loads configuration from the environment (after optionally reading a
    /// `.env` file — see `main.rs`). Fatal at startup if a required variable
    /// is missing or invalid, matching §6's "missing required variables are
    /// fatal at startup".
    pub fn load() -> Result<Config, ConfigError> {
        let listen_addr = from_env_or_default(LISTEN)?;
        let countdown_duration = require_positive_seconds(COUNTDOWN_DURATION_SEC)?;
        let question_duration = require_positive_seconds(QUESTION_DURATION_SEC)?;
        let questions_file_path = require_env(QUESTIONS_FILE_PATH)?;
        let repository_ttl_secs: u64 = from_env_or_default(REPOSITORY_TTL_SEC)?;
        let repository_ttl = Duration::from_secs(repository_ttl_secs);
        let allowed_origins = std::env::var(ALLOWED_ORIGINS)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            listen_addr,
            countdown_duration,
            question_duration,
            questions_file_path,
            repository_ttl,
            allowed_origins,
        })
    }

    /// Whether `origin` is on the allow-list (§4.3, §4.9).
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that
    // touch them so they don't stomp on each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "LISTEN",
            COUNTDOWN_DURATION_SEC,
            QUESTION_DURATION_SEC,
            QUESTIONS_FILE_PATH,
            "REPOSITORY_TTL_SEC",
            ALLOWED_ORIGINS,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_variable_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var(COUNTDOWN_DURATION_SEC, "10");
        std::env::set_var(QUESTION_DURATION_SEC, "20");
        // QUESTIONS_FILE_PATH deliberately left unset.
        let result = Config::load();
        assert!(matches!(result, Err(ConfigError::Missing(QUESTIONS_FILE_PATH))));
        clear_all();
    }

    #[test]
    fn zero_duration_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var(COUNTDOWN_DURATION_SEC, "0");
        std::env::set_var(QUESTION_DURATION_SEC, "20");
        std::env::set_var(QUESTIONS_FILE_PATH, "questions.json");
        let result = Config::load();
        assert!(matches!(result, Err(ConfigError::NotPositive(COUNTDOWN_DURATION_SEC, 0))));
        clear_all();
    }

    #[test]
    fn loads_successfully_with_all_required_variables_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var(COUNTDOWN_DURATION_SEC, "5");
        std::env::set_var(QUESTION_DURATION_SEC, "15");
        std::env::set_var(QUESTIONS_FILE_PATH, "questions.json");
        let config = Config::load().unwrap();
        assert_eq!(config.countdown_duration, Duration::from_secs(5));
        assert_eq!(config.question_duration, Duration::from_secs(15));
        assert_eq!(config.repository_ttl, Duration::from_secs(300));
        clear_all();
    }
}
