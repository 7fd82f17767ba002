//! Pipeline configuration structures.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::WorkerPoolConfig;
use crate::core::model::scheduled_post::DEFAULT_MAX_RETRIES;
use crate::core::model::BackoffPolicy;
use crate::core::AppResult;

/// Headroom a claim keeps over the platform call timeout.
pub const STALE_CLAIM_MARGIN_SECS: u64 = 60;

/// Scheduled-post engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts allowed after the first failure.
    pub max_retries: u32,
    /// Minimum spacing between two pending posts of one user on one platform.
    pub conflict_window_secs: u64,
    /// Delay tiers between retries.
    pub backoff: BackoffPolicy,
    /// Claims older than this are treated as abandoned.
    pub stale_claim_secs: u64,
    /// Maximum records a publishing job dispatches per run.
    pub batch_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            conflict_window_secs: 30 * 60,
            backoff: BackoffPolicy::default(),
            stale_claim_secs: 15 * 60,
            batch_limit: 100,
        }
    }
}

/// Publishing dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Timeout for one platform call.
    pub call_timeout_secs: u64,
    /// How long a resolved credential is reused.
    pub credential_cache_ttl_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            credential_cache_ttl_secs: 300,
        }
    }
}

/// Recurring job cadences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// `publish-due-posts` interval.
    pub publish_due_posts_secs: u64,
    /// `retry-failed-posts` interval.
    pub retry_failed_posts_secs: u64,
    /// `cleanup` interval.
    pub cleanup_secs: u64,
    /// `analytics` interval.
    pub analytics_secs: u64,
    /// `health-check` interval.
    pub health_check_secs: u64,
    /// Finished job records older than this are pruned by `cleanup`.
    pub job_retention_secs: u64,
    /// How long a publishing job waits for one dispatch result.
    pub result_timeout_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            publish_due_posts_secs: 5 * 60,
            retry_failed_posts_secs: 60 * 60,
            cleanup_secs: 24 * 60 * 60,
            analytics_secs: 60 * 60,
            health_check_secs: 30 * 60,
            job_retention_secs: 7 * 24 * 60 * 60,
            result_timeout_secs: 120,
        }
    }
}

/// Health monitor thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Monitor cadence.
    pub tick_secs: u64,
    /// Critical queue depth that raises a backlog signal.
    pub critical_backlog: u64,
    /// Failed job records that raise a backlog signal.
    pub failed_backlog: usize,
    /// Idle time after which a non-critical job is restarted.
    pub max_idle_secs: u64,
    /// How long shutdown waits for critical jobs.
    pub drain_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            critical_backlog: 100,
            failed_backlog: 50,
            max_idle_secs: 24 * 60 * 60,
            drain_timeout_secs: 30,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Dispatcher settings.
    pub dispatcher: DispatcherConfig,
    /// Job cadences.
    pub jobs: JobsConfig,
    /// Health thresholds.
    pub health: HealthConfig,
    /// Worker pool sizing.
    pub worker_pool: WorkerPoolConfig,
}

impl PipelineConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        if self.engine.backoff.tiers_secs.is_empty() {
            return Err("engine.backoff.tiers_secs must not be empty".into());
        }
        if self.engine.batch_limit == 0 {
            return Err("engine.batch_limit must be greater than 0".into());
        }
        if self.engine.stale_claim_secs == 0 {
            return Err("engine.stale_claim_secs must be greater than 0".into());
        }
        if self.dispatcher.call_timeout_secs == 0 {
            return Err("dispatcher.call_timeout_secs must be greater than 0".into());
        }
        // A claim must outlive the slowest platform call.
        let min_stale = self
            .dispatcher
            .call_timeout_secs
            .saturating_add(STALE_CLAIM_MARGIN_SECS);
        if self.engine.stale_claim_secs <= min_stale {
            return Err(format!(
                "engine.stale_claim_secs ({}) must exceed dispatcher.call_timeout_secs ({}) by more than {STALE_CLAIM_MARGIN_SECS}s",
                self.engine.stale_claim_secs, self.dispatcher.call_timeout_secs
            ));
        }
        let intervals = [
            ("publish_due_posts_secs", self.jobs.publish_due_posts_secs),
            ("retry_failed_posts_secs", self.jobs.retry_failed_posts_secs),
            ("cleanup_secs", self.jobs.cleanup_secs),
            ("analytics_secs", self.jobs.analytics_secs),
            ("health_check_secs", self.jobs.health_check_secs),
            ("result_timeout_secs", self.jobs.result_timeout_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(format!("jobs.{name} must be greater than 0"));
            }
        }
        if self.health.tick_secs == 0 {
            return Err("health.tick_secs must be greater than 0".into());
        }
        self.worker_pool
            .validate()
            .map_err(|e| format!("worker_pool invalid: {e}"))
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// I/O, parse, or validation failures.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&raw).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
    }

    /// Build configuration from the environment.
    ///
    /// Loads `.env` if present, starts from `PIPELINE_CONFIG` (a JSON file) or
    /// the defaults, then applies `PIPELINE_*` overrides.
    ///
    /// # Errors
    ///
    /// Unreadable config file, unparsable override, or invalid result.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var("PIPELINE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Apply `PIPELINE_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// A variable that is set but does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_var(&lookup, "PIPELINE_MAX_RETRIES", &mut self.engine.max_retries)?;
        override_var(
            &lookup,
            "PIPELINE_CONFLICT_WINDOW_SECS",
            &mut self.engine.conflict_window_secs,
        )?;
        override_var(&lookup, "PIPELINE_BATCH_LIMIT", &mut self.engine.batch_limit)?;
        override_var(
            &lookup,
            "PIPELINE_CALL_TIMEOUT_SECS",
            &mut self.dispatcher.call_timeout_secs,
        )?;
        override_var(
            &lookup,
            "PIPELINE_PUBLISH_INTERVAL_SECS",
            &mut self.jobs.publish_due_posts_secs,
        )?;
        override_var(
            &lookup,
            "PIPELINE_RETRY_INTERVAL_SECS",
            &mut self.jobs.retry_failed_posts_secs,
        )?;
        override_var(
            &lookup,
            "PIPELINE_DRAIN_TIMEOUT_SECS",
            &mut self.health.drain_timeout_secs,
        )?;
        override_var(
            &lookup,
            "PIPELINE_WORKER_COUNT",
            &mut self.worker_pool.worker_count,
        )?;
        Ok(())
    }
}

fn override_var<F, T>(lookup: &F, key: &str, slot: &mut T) -> AppResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}"))?;
    }
    Ok(())
}
