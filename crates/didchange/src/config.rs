#![forbid(unsafe_code)]

//! Run-loop configuration with environment overrides.
//!
//! | Variable                   | Meaning                                       |
//! |----------------------------|-----------------------------------------------|
//! | `DIDCHANGE_RUNLOOP_BUDGET` | Max actions per drain, or `unlimited`/`off`.  |
//!
//! Parsing never aborts: a bad value keeps the default and is reported in
//! [`RunLoopConfigParse::errors`].

use std::env;
use std::fmt;

/// Environment variable for [`RunLoopConfig::max_actions_per_drain`].
pub const ENV_RUNLOOP_BUDGET: &str = "DIDCHANGE_RUNLOOP_BUDGET";

const DEFAULT_MAX_ACTIONS_PER_DRAIN: usize = 10_000;

/// Configuration for [`RunLoop`](crate::scheduler::RunLoop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLoopConfig {
    /// Upper bound on actions executed by one `run_until_idle()` call.
    /// Actions that keep rescheduling themselves would otherwise spin
    /// forever. `None` disables the bound. Default: 10 000.
    pub max_actions_per_drain: Option<usize>,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            max_actions_per_drain: Some(DEFAULT_MAX_ACTIONS_PER_DRAIN),
        }
    }
}

/// Config plus the diagnostics collected while reading it.
#[derive(Debug, Clone)]
pub struct RunLoopConfigParse {
    pub config: RunLoopConfig,
    pub errors: Vec<ConfigError>,
}

/// A rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl RunLoopConfig {
    /// No drain budget.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_actions_per_drain: None,
        }
    }

    /// Set the per-drain action budget.
    #[must_use]
    pub fn with_max_actions_per_drain(mut self, budget: Option<usize>) -> Self {
        self.max_actions_per_drain = budget;
        self
    }

    /// Parse config from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with_diagnostics().config
    }

    /// Parse config from environment variables and return diagnostics.
    #[must_use]
    pub fn from_env_with_diagnostics() -> RunLoopConfigParse {
        Self::from_env_with(|key| env::var(key).ok())
    }

    /// Parse config using `get` as the variable lookup.
    pub fn from_env_with<F>(mut get: F) -> RunLoopConfigParse
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut errors = Vec::new();

        if let Some(value) = get(ENV_RUNLOOP_BUDGET) {
            match parse_budget(&value) {
                Some(parsed) => config.max_actions_per_drain = parsed,
                None => errors.push(ConfigError::new(
                    "max_actions_per_drain",
                    value,
                    "expected positive integer or unlimited",
                )),
            }
        }

        if let Err(mut invalid) = config.validate() {
            errors.append(&mut invalid);
            config = Self::default();
        }

        RunLoopConfigParse { config, errors }
    }

    /// Validate config constraints and return all violations.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.max_actions_per_drain == Some(0) {
            errors.push(ConfigError::new(
                "max_actions_per_drain",
                "0",
                "budget must allow at least one action",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// `Some(None)` for unlimited, `Some(Some(n))` for a count, `None` if unparsable.
fn parse_budget(value: &str) -> Option<Option<usize>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "unlimited" | "none" | "off" => Some(None),
        other => other.parse::<usize>().ok().map(Some),
    }
}
