//! Server configuration loaded from environment variables.

use crate::errors::{IncidentflowError, Result};
use crate::events::BusConfig;
use crate::service::DEFAULT_VOICE;
use crate::stages::RetryConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration.
///
/// Every field except the stage commands has a default suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Where relative submission inputs are resolved (default: `uploads`).
    pub upload_dir: PathBuf,
    /// Root of the per-job artifact directories (default: `results`).
    pub results_dir: PathBuf,
    /// Per-observer backlog and close grace period.
    pub bus: BusConfig,
    /// Idle interval between SSE keepalive comments (default: 1s).
    pub keepalive: Duration,
    /// Stage-local retry policy; `max_attempts == 1` disables retry.
    pub retry: RetryConfig,
    /// Voice applied when a submission has none (default: `Puck`).
    pub default_voice: String,
    /// Command line of the perception stage program.
    pub perception_command: String,
    /// Command line of the de-escalation stage program.
    pub deescalation_command: String,
    /// Command line of the report stage program.
    pub report_command: String,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                     | Default    |
    /// |-----------------------------|------------|
    /// | `HOST`                      | `0.0.0.0`  |
    /// | `PORT`                      | `5000`     |
    /// | `UPLOAD_DIR`                | `uploads`  |
    /// | `RESULTS_DIR`               | `results`  |
    /// | `OBSERVER_BACKLOG`          | `256`      |
    /// | `CLOSE_GRACE_SECS`          | `30`       |
    /// | `KEEPALIVE_SECS`            | `1`        |
    /// | `STAGE_MAX_ATTEMPTS`        | `1`        |
    /// | `STAGE_RETRY_BASE_DELAY_MS` | `500`      |
    /// | `DEFAULT_VOICE`             | `Puck`     |
    /// | `PERCEPTION_COMMAND`        | required   |
    /// | `DEESCALATION_COMMAND`      | required   |
    /// | `REPORT_COMMAND`            | required   |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| IncidentflowError::Config(format!("{key} must be set")))
        };

        let backlog: usize = parse_var(&lookup, "OBSERVER_BACKLOG", 256)?;
        if backlog == 0 {
            return Err(IncidentflowError::Config(
                "OBSERVER_BACKLOG must be at least 1".to_string(),
            ));
        }
        let keepalive_secs: u64 = parse_var(&lookup, "KEEPALIVE_SECS", 1)?;
        if keepalive_secs == 0 {
            return Err(IncidentflowError::Config(
                "KEEPALIVE_SECS must be at least 1".to_string(),
            ));
        }
        let close_grace_secs: u64 = parse_var(&lookup, "CLOSE_GRACE_SECS", 30)?;
        let max_attempts: usize = parse_var(&lookup, "STAGE_MAX_ATTEMPTS", 1)?;
        let base_delay_ms: u64 = parse_var(&lookup, "STAGE_RETRY_BASE_DELAY_MS", 500)?;

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port: parse_var(&lookup, "PORT", 5000)?,
            upload_dir: PathBuf::from(var("UPLOAD_DIR", "uploads")),
            results_dir: PathBuf::from(var("RESULTS_DIR", "results")),
            bus: BusConfig::new()
                .with_backlog(backlog)
                .with_close_grace(Duration::from_secs(close_grace_secs)),
            keepalive: Duration::from_secs(keepalive_secs),
            retry: RetryConfig::new()
                .with_max_attempts(max_attempts)
                .with_base_delay_ms(base_delay_ms),
            default_voice: var("DEFAULT_VOICE", DEFAULT_VOICE),
            perception_command: required("PERCEPTION_COMMAND")?,
            deescalation_command: required("DEESCALATION_COMMAND")?,
            report_command: required("REPORT_COMMAND")?,
        })
    }

    /// `host:port` for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| IncidentflowError::Config(format!("{key} has an invalid value: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const COMMANDS: [(&str, &str); 3] = [
        ("PERCEPTION_COMMAND", "python3 stages/perception.py"),
        ("DEESCALATION_COMMAND", "python3 stages/deescalation.py"),
        ("REPORT_COMMAND", "python3 stages/report.py"),
    ];

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&COMMANDS)).unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.results_dir, PathBuf::from("results"));
        assert_eq!(config.bus.backlog, 256);
        assert_eq!(config.bus.close_grace, Duration::from_secs(30));
        assert_eq!(config.keepalive, Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.default_voice, "Puck");
        assert_eq!(config.report_command, "python3 stages/report.py");
    }

    #[test]
    fn test_overrides() {
        let mut vars = COMMANDS.to_vec();
        vars.extend([
            ("PORT", "8080"),
            ("OBSERVER_BACKLOG", "16"),
            ("STAGE_MAX_ATTEMPTS", "4"),
            ("DEFAULT_VOICE", "Kore"),
        ]);
        let config = ServerConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.bus.backlog, 16);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.default_voice, "Kore");
    }

    #[test]
    fn test_missing_command_is_an_error() {
        let err = ServerConfig::from_lookup(lookup(&COMMANDS[..2])).unwrap_err();
        assert!(matches!(err, IncidentflowError::Config(ref msg) if msg.contains("REPORT_COMMAND")));
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        let mut vars = COMMANDS.to_vec();
        vars.push(("PORT", "http"));
        assert!(ServerConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = COMMANDS.to_vec();
        vars.push(("OBSERVER_BACKLOG", "0"));
        assert!(ServerConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_zero_keepalive_is_rejected() {
        let mut vars = COMMANDS.to_vec();
        vars.push(("KEEPALIVE_SECS", "0"));
        let err = ServerConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, IncidentflowError::Config(ref msg) if msg.contains("KEEPALIVE_SECS")));

        let mut vars = COMMANDS.to_vec();
        vars.push(("KEEPALIVE_SECS", "15"));
        let config = ServerConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.keepalive, Duration::from_secs(15));
    }
}
