//! Process configuration: defaults, an optional TOML file, then
//! environment overrides.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::order::OrderingPolicy;

/// Prefix of the per-queue ceiling variables (`MAX_TASKS_BUILD=1`).
const QUEUE_LIMIT_PREFIX: &str = "MAX_TASKS_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    pub queues: QueueLimits,
    pub build: BuildConfig,
    pub worker: WorkerConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub use_priority_comparison: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            use_priority_comparison: false,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn ordering(&self) -> OrderingPolicy {
        OrderingPolicy::from_priority_flag(self.use_priority_comparison)
    }
}

/// Per-queue concurrency ceilings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueLimits {
    /// Ceiling for queues without an explicit entry.
    pub default_max: usize,
    pub per_queue: BTreeMap<String, usize>,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            default_max: 10,
            per_queue: BTreeMap::new(),
        }
    }
}

impl QueueLimits {
    pub fn max_for(&self, queue: &str) -> usize {
        self.per_queue
            .get(queue)
            .copied()
            .unwrap_or(self.default_max)
    }

    pub fn set(&mut self, queue: impl Into<String>, max: usize) {
        self.per_queue.insert(queue.into(), max);
    }

    /// Queues with an explicit ceiling.
    pub fn configured_queues(&self) -> impl Iterator<Item = &str> {
        self.per_queue.keys().map(String::as_str)
    }
}

/// Build orchestration knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    pub server_image: String,
    pub builder_image: String,
    /// Delay between two streamed commands.
    pub command_delay_ms: u64,
    /// Emit a progress checkpoint every N commands.
    pub log_interval_commands: usize,
    pub export_enabled: bool,
    /// Export a snapshot every N percent of the command sequence.
    pub export_interval_percent: u32,
    pub server_ready_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Bound on one snapshot export (archive plus upload).
    pub export_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Leave both containers running after the build (debug only).
    pub no_cleanup: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            server_image: "mcbench/minecraft-server:latest".to_string(),
            builder_image: "mcbench/builder:latest".to_string(),
            command_delay_ms: 50,
            log_interval_commands: 50,
            export_enabled: false,
            export_interval_percent: 25,
            server_ready_timeout_secs: 120,
            command_timeout_secs: 30,
            export_timeout_secs: 300,
            build_timeout_secs: 3600,
            no_cleanup: false,
        }
    }
}

impl BuildConfig {
    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn server_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.server_ready_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Local gate: simultaneous BuildJobs per worker instance.
    pub max_build_jobs: usize,
    /// How long a claim waits on an empty broker queue.
    pub claim_wait_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_build_jobs: 1,
            claim_wait_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn claim_wait(&self) -> Duration {
        Duration::from_millis(self.claim_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
    pub max_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_after_secs: 300,
            max_attempts: 3,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults, optionally overlaid by a TOML file, then by the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    /// Apply environment-style overrides.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let get = |key: &'static str| vars.get(key).map(|v| (key, v.as_str()));

        if let Some((k, v)) = get("SCHEDULER_INTERVAL") {
            self.scheduler.tick_interval_secs = parse(k, v)?;
        }
        if let Some((k, v)) = get("USE_PRIORITY_COMPARISON") {
            self.scheduler.use_priority_comparison = parse_bool(k, v)?;
        }
        if let Some((k, v)) = get("MAX_TASKS") {
            self.queues.default_max = parse(k, v)?;
        }
        for (key, value) in &vars {
            if let Some(queue) = key.strip_prefix(QUEUE_LIMIT_PREFIX)
                && !queue.is_empty()
            {
                let max = parse(key, value)?;
                self.queues.set(queue.to_ascii_lowercase(), max);
            }
        }

        if let Some((k, v)) = get("SERVER_IMAGE") {
            self.build.server_image = v.to_string();
            debug!(key = k, "server image overridden");
        }
        if let Some((k, v)) = get("BUILDER_IMAGE") {
            self.build.builder_image = v.to_string();
            debug!(key = k, "builder image overridden");
        }
        if let Some((k, v)) = get("BUILD_DELAY_MS") {
            self.build.command_delay_ms = parse(k, v)?;
        }
        if let Some((k, v)) = get("LOG_INTERVAL_COMMANDS") {
            self.build.log_interval_commands = parse(k, v)?;
        }
        if let Some((k, v)) = get("ENABLE_EXPORT") {
            self.build.export_enabled = parse_bool(k, v)?;
        }
        if let Some((k, v)) = get("EXPORT_INTERVAL_PERCENT") {
            self.build.export_interval_percent = parse(k, v)?;
        }
        if let Some((k, v)) = get("SERVER_READY_TIMEOUT_SECS") {
            self.build.server_ready_timeout_secs = parse(k, v)?;
        }
        if let Some((k, v)) = get("COMMAND_TIMEOUT_SECS") {
            self.build.command_timeout_secs = parse(k, v)?;
        }
        if let Some((k, v)) = get("EXPORT_TIMEOUT_SECS") {
            self.build.export_timeout_secs = parse(k, v)?;
        }
        if let Some((k, v)) = get("BUILD_TIMEOUT_SECS") {
            self.build.build_timeout_secs = parse(k, v)?;
        }
        if let Some((k, v)) = get("NO_CLEANUP") {
            self.build.no_cleanup = parse_bool(k, v)?;
        }

        if let Some((k, v)) = get("MAX_BUILD_JOBS") {
            self.worker.max_build_jobs = parse(k, v)?;
        }

        if let Some((k, v)) = get("RECONCILE_INTERVAL") {
            self.reconcile.interval_secs = parse(k, v)?;
        }
        if let Some((k, v)) = get("STALE_AFTER_SECS") {
            self.reconcile.stale_after_secs = parse(k, v)?;
        }
        if let Some((k, v)) = get("MAX_ATTEMPTS") {
            self.reconcile.max_attempts = parse(k, v)?;
        }

        self.validate()
    }

    /// Reject values that would make the scheduler or orchestrator spin
    /// or divide by zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval_secs == 0 {
            return Err(invalid("SCHEDULER_INTERVAL", "0", "must be at least 1"));
        }
        if !(1..=100).contains(&self.build.export_interval_percent) {
            return Err(invalid(
                "EXPORT_INTERVAL_PERCENT",
                &self.build.export_interval_percent.to_string(),
                "must be within 1..=100",
            ));
        }
        if self.build.log_interval_commands == 0 {
            return Err(invalid("LOG_INTERVAL_COMMANDS", "0", "must be at least 1"));
        }
        if self.build.export_timeout_secs == 0 {
            return Err(invalid("EXPORT_TIMEOUT_SECS", "0", "must be at least 1"));
        }
        if self.worker.max_build_jobs == 0 {
            return Err(invalid("MAX_BUILD_JOBS", "0", "must be at least 1"));
        }
        if self.reconcile.max_attempts == 0 {
            return Err(invalid("MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_conservative() {
        let settings = Settings::default();
        assert_eq!(settings.scheduler.tick_interval(), Duration::from_secs(5));
        assert_eq!(settings.scheduler.ordering(), OrderingPolicy::Fifo);
        assert_eq!(settings.worker.max_build_jobs, 1);
        assert_eq!(settings.reconcile.max_attempts, 3);
        assert_eq!(settings.reconcile.stale_after(), Duration::from_secs(300));
        assert!(!settings.build.no_cleanup);
        settings.validate().unwrap();
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = Settings::default();
        settings
            .apply_env(vars(&[
                ("SCHEDULER_INTERVAL", "2"),
                ("USE_PRIORITY_COMPARISON", "true"),
                ("MAX_TASKS", "4"),
                ("MAX_TASKS_BUILD", "1"),
                ("BUILD_DELAY_MS", "10"),
                ("ENABLE_EXPORT", "yes"),
                ("EXPORT_INTERVAL_PERCENT", "50"),
                ("LOG_INTERVAL_COMMANDS", "5"),
                ("MAX_BUILD_JOBS", "2"),
                ("EXPORT_TIMEOUT_SECS", "45"),
                ("NO_CLEANUP", "0"),
                ("UNRELATED", "ignored"),
            ]))
            .unwrap();

        assert_eq!(settings.scheduler.tick_interval_secs, 2);
        assert_eq!(settings.scheduler.ordering(), OrderingPolicy::PriorityFifo);
        assert_eq!(settings.queues.max_for("build"), 1);
        assert_eq!(settings.queues.max_for("render"), 4);
        assert_eq!(settings.build.command_delay(), Duration::from_millis(10));
        assert!(settings.build.export_enabled);
        assert_eq!(settings.build.export_interval_percent, 50);
        assert_eq!(settings.build.log_interval_commands, 5);
        assert_eq!(settings.worker.max_build_jobs, 2);
        assert_eq!(settings.build.export_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(vars(&[("ENABLE_EXPORT", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ENABLE_EXPORT"));

        let mut settings = Settings::default();
        assert!(settings.apply_env(vars(&[("MAX_TASKS", "-1")])).is_err());
    }

    #[test]
    fn out_of_range_export_interval_is_rejected() {
        let mut settings = Settings::default();
        assert!(
            settings
                .apply_env(vars(&[("EXPORT_INTERVAL_PERCENT", "0")]))
                .is_err()
        );
    }

    #[test]
    fn parse_toml_overlay() {
        let toml_str = r#"
[scheduler]
use_priority_comparison = true

[queues]
default_max = 3

[queues.per_queue]
build = 1
render = 8

[build]
export_enabled = true
export_interval_percent = 50
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert!(settings.scheduler.use_priority_comparison);
        assert_eq!(settings.scheduler.tick_interval_secs, 5);
        assert_eq!(settings.queues.max_for("build"), 1);
        assert_eq!(settings.queues.max_for("render"), 8);
        assert_eq!(settings.queues.max_for("prompt"), 3);
        assert!(settings.build.export_enabled);
        assert_eq!(settings.build.command_delay_ms, 50);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Settings::from_file(Path::new("/nonexistent/mcbench.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
