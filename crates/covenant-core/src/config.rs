use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CovenantError, Result};

/// Top-level Covenant configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on nodes dispatched in one wave.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Per-task timeout. 0 disables it.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Back-off while waiting on running nodes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Max characters of output carried in `agent_finish` events.
    #[serde(default = "default_output_preview_chars")]
    pub output_preview_chars: usize,
    /// Sort each ready set by priority (High first) before batching.
    #[serde(default)]
    pub order_by_priority: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            task_timeout_secs: default_task_timeout(),
            poll_interval_ms: default_poll_interval(),
            output_preview_chars: default_output_preview_chars(),
            order_by_priority: false,
        }
    }
}

impl ExecutorConfig {
    /// Default config with a different parallelism bound.
    pub fn with_max_parallel(max_parallel: usize) -> Self {
        Self {
            max_parallel,
            ..Default::default()
        }
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(CovenantError::Config(
                "executor.max_parallel must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_parallel() -> usize { 4 }
fn default_task_timeout() -> u64 { 300 }
fn default_poll_interval() -> u64 { 50 }
fn default_output_preview_chars() -> usize { 500 }

/// Plan builder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Actor assigned to the single-node fallback plan.
    #[serde(default = "default_fallback_actor")]
    pub fallback_actor: String,
    /// Actor ids a generated plan may reference. Empty accepts any id.
    #[serde(default)]
    pub known_actors: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            fallback_actor: default_fallback_actor(),
            known_actors: vec![],
        }
    }
}

fn default_fallback_actor() -> String { "general".to_string() }

/// JSONL event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> String { "logs".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CovenantError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| CovenantError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        self.executor.validate()?;
        if self.planner.fallback_actor.trim().is_empty() {
            return Err(CovenantError::Config(
                "planner.fallback_actor must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.log.dir)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
