//! One immutable configuration record, built once at startup from the
//! environment and passed by `Arc` thereafter (spec §9: "no global mutation
//! after init").

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Guardrail-specific configuration (spec §4.8), loaded as part of the
/// wider `Config` but kept as a distinct struct so `propagate-core`'s
/// `Guardrails` type can be constructed directly in tests without a full
/// `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailConfig {
    pub max_parallel: usize,
    pub protected_paths: Vec<String>,
    pub ci_required: bool,
    pub auto_merge: bool,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            protected_paths: vec![
                "infra/".to_string(),
                ".github/workflows/".to_string(),
                "terraform/".to_string(),
                "k8s/".to_string(),
            ],
            ci_required: true,
            auto_merge: false,
        }
    }
}

/// The single immutable configuration record for the whole process.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub agent_api_key: String,
    pub agent_api_base: String,
    pub github_token: Option<String>,
    pub notification_webhook_url: Option<String>,
    pub guardrails: GuardrailConfig,
    pub poll_interval: Duration,
    pub wave_timeout: Duration,
    pub ci_unknown_max_attempts: u32,
    pub dry_run_seed: u64,
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn env_var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
            reason: "could not parse".to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Build the configuration record once from the process environment.
    /// Per spec §6 the required variables are `DATABASE_URL`,
    /// `AGENT_API_KEY`, `AGENT_API_BASE`; everything else has a documented
    /// default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env_var("DATABASE_URL")?;
        let agent_api_key = env_var("AGENT_API_KEY")?;
        let agent_api_base = std::env::var("AGENT_API_BASE")
            .unwrap_or_else(|_| "https://api.agent.internal/v1".to_string());
        let github_token = env_var_opt("GITHUB_TOKEN");
        let notification_webhook_url = env_var_opt("NOTIFICATION_WEBHOOK_URL");

        let guardrails = GuardrailConfig {
            max_parallel: env_parse("PROPAGATE_MAX_PARALLEL", 3usize)?,
            auto_merge: env_bool("PROPAGATE_AUTO_MERGE", false)?,
            ci_required: env_bool("PROPAGATE_CI_REQUIRED", true)?,
            ..GuardrailConfig::default()
        };

        let poll_interval_secs: u64 = env_parse("PROPAGATE_POLL_INTERVAL_SECS", 45)?;
        let wave_timeout_secs: u64 = env_parse("PROPAGATE_WAVE_TIMEOUT_SECS", 1800)?;
        let ci_unknown_max_attempts = env_parse("PROPAGATE_CI_UNKNOWN_MAX_ATTEMPTS", 5u32)?;
        let dry_run_seed = env_parse("PROPAGATE_DRY_RUN_SEED", 42u64)?;

        if guardrails.max_parallel == 0 {
            return Err(ConfigError::Invalid {
                name: "PROPAGATE_MAX_PARALLEL",
                value: "0".to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }

        Ok(Self {
            database_url,
            agent_api_key,
            agent_api_base,
            github_token,
            notification_webhook_url,
            guardrails,
            poll_interval: Duration::from_secs(poll_interval_secs),
            wave_timeout: Duration::from_secs(wave_timeout_secs),
            ci_unknown_max_attempts,
            dry_run_seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "AGENT_API_KEY",
            "AGENT_API_BASE",
            "GITHUB_TOKEN",
            "NOTIFICATION_WEBHOOK_URL",
            "PROPAGATE_MAX_PARALLEL",
            "PROPAGATE_AUTO_MERGE",
            "PROPAGATE_CI_REQUIRED",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn fails_closed_without_required_vars() {
        clear_env();
        assert!(matches!(Config::from_env(), Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    #[serial]
    fn defaults_match_spec() {
        clear_env();
        std::env::set_var("DATABASE_URL", "sqlite::memory:");
        std::env::set_var("AGENT_API_KEY", "test-key");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.guardrails.max_parallel, 3);
        assert!(!cfg.guardrails.auto_merge);
        assert!(cfg.guardrails.ci_required);
        assert_eq!(
            cfg.guardrails.protected_paths,
            vec!["infra/", ".github/workflows/", "terraform/", "k8s/"]
        );
        clear_env();
    }
}
