//! Configuration module for the relay mixer
//!
//! This module handles configuration loading from TOML files and
//! environment variables, and turns it into the timing, retry and strategy
//! parameters each run is built with.

use crate::relay::{
    DelayStrategy, LegFailurePolicy, RetryPolicy, StrategyKind, StrategyParams, TimingPolicy,
};
use crate::types::Priority;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for any configured wait, one week
const MAX_WAIT_MINS: u64 = 7 * 24 * 60;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Send attempts per hop or leg, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait for a transfer to become spendable, in minutes
    #[serde(default = "default_settle_window_mins")]
    pub settle_window_mins: u64,

    #[serde(default = "default_jitter_min_secs")]
    pub jitter_min_secs: u64,

    #[serde(default = "default_jitter_max_secs")]
    pub jitter_max_secs: u64,

    /// Estimated cost of one fan-in leg, in minutes
    #[serde(default = "default_per_middleman_mins")]
    pub per_middleman_mins: u64,

    /// Fee tier for every send
    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub leg_failure_policy: LegFailurePolicy,

    /// Permit a zero settle window. Only sensible against the in-memory ledger.
    #[serde(default)]
    pub allow_zero_settle: bool,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub path: Option<PathConfig>,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub backoff: BackoffKind,

    /// Delay between sequential relay attempts (base delay when exponential)
    #[serde(default = "default_domino_delay_ms")]
    pub domino_delay_ms: u64,

    /// Delay between fan relay attempts (base delay when exponential)
    #[serde(default = "default_leafway_delay_ms")]
    pub leafway_delay_ms: u64,

    /// Cap for exponential backoff
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Relative jitter applied to exponential backoff, 0.0 to 1.0
    #[serde(default)]
    pub jitter_factor: f64,
}

/// Named accounts for the relay path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathConfig {
    pub source: String,
    #[serde(default)]
    pub middlemen: Vec<String>,
    pub destination: String,
}

/// In-memory ledger setup for the `simulate` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_source_balance")]
    pub source_balance: f64,

    /// Base (low priority) fee per send
    #[serde(default = "default_fee")]
    pub fee: f64,

    /// Middlemen that accept fan-out transfers but never get credited
    #[serde(default)]
    pub drop_fan_out_to: Vec<String>,

    /// Accounts whose sends are always rejected
    #[serde(default)]
    pub fail_sends: Vec<String>,

    /// Middlemen to provision when no `[path]` is configured
    #[serde(default = "default_middlemen_count")]
    pub middlemen_count: usize,

    /// Starting middleman balance. A sequential relay defaults to a fee
    /// reserve for every hop.
    #[serde(default)]
    pub middleman_balance: Option<f64>,
}

// Default value functions
fn default_max_attempts() -> u32 { 5 }
fn default_settle_window_mins() -> u64 { 25 }
fn default_jitter_min_secs() -> u64 { 5 }
fn default_jitter_max_secs() -> u64 { 10 }
fn default_per_middleman_mins() -> u64 { 15 }
fn default_domino_delay_ms() -> u64 { 3000 }
fn default_leafway_delay_ms() -> u64 { 3500 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_source_balance() -> f64 { 10.0 }
fn default_fee() -> f64 { 0.01 }
fn default_middlemen_count() -> usize { 3 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::default(),
            domino_delay_ms: default_domino_delay_ms(),
            leafway_delay_ms: default_leafway_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            source_balance: default_source_balance(),
            fee: default_fee(),
            drop_fan_out_to: Vec::new(),
            fail_sends: Vec::new(),
            middlemen_count: default_middlemen_count(),
            middleman_balance: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            settle_window_mins: default_settle_window_mins(),
            jitter_min_secs: default_jitter_min_secs(),
            jitter_max_secs: default_jitter_max_secs(),
            per_middleman_mins: default_per_middleman_mins(),
            priority: Priority::default(),
            leg_failure_policy: LegFailurePolicy::default(),
            allow_zero_settle: false,
            retry: RetryConfig::default(),
            path: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: RelayConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load `.env`, the TOML file (defaults if it does not exist), apply
    /// `RELAY_*` overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RELAY_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RELAY_MAX_ATTEMPTS") {
            self.max_attempts = v.trim().parse().context("Invalid RELAY_MAX_ATTEMPTS")?;
        }
        if let Some(v) = lookup("RELAY_SETTLE_WINDOW_MINS") {
            self.settle_window_mins = v
                .trim()
                .parse()
                .context("Invalid RELAY_SETTLE_WINDOW_MINS")?;
        }
        if let Some(v) = lookup("RELAY_JITTER_MIN_SECS") {
            self.jitter_min_secs = v.trim().parse().context("Invalid RELAY_JITTER_MIN_SECS")?;
        }
        if let Some(v) = lookup("RELAY_JITTER_MAX_SECS") {
            self.jitter_max_secs = v.trim().parse().context("Invalid RELAY_JITTER_MAX_SECS")?;
        }
        if let Some(v) = lookup("RELAY_RETRY_DELAY_MS") {
            // One knob for both strategies
            let delay: u64 = v.trim().parse().context("Invalid RELAY_RETRY_DELAY_MS")?;
            self.retry.domino_delay_ms = delay;
            self.retry.leafway_delay_ms = delay;
        }
        if let Some(v) = lookup("RELAY_PRIORITY") {
            self.priority = v
                .parse::<Priority>()
                .map_err(anyhow::Error::msg)
                .context("Invalid RELAY_PRIORITY")?;
        }
        if let Some(v) = lookup("RELAY_LEG_FAILURE_POLICY") {
            self.leg_failure_policy = v
                .parse::<LegFailurePolicy>()
                .context("Invalid RELAY_LEG_FAILURE_POLICY")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.settle_window_mins == 0 && !self.allow_zero_settle {
            bail!("settle_window_mins must be positive (set allow_zero_settle for simulations)");
        }
        if self.jitter_min_secs > self.jitter_max_secs {
            bail!(
                "jitter_min_secs ({}) exceeds jitter_max_secs ({})",
                self.jitter_min_secs,
                self.jitter_max_secs
            );
        }
        if self.per_middleman_mins == 0 {
            bail!("per_middleman_mins must be positive");
        }
        for (key, mins) in [
            ("settle_window_mins", self.settle_window_mins),
            ("per_middleman_mins", self.per_middleman_mins),
        ] {
            if mins > MAX_WAIT_MINS {
                bail!("{} ({}) exceeds {} minutes", key, mins, MAX_WAIT_MINS);
            }
        }
        if self.jitter_max_secs > MAX_WAIT_MINS * 60 {
            bail!("jitter_max_secs ({}) is out of range", self.jitter_max_secs);
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            bail!("retry.jitter_factor must be within 0.0 and 1.0");
        }
        if let Some(path) = &self.path {
            if path.source == path.destination {
                bail!("path source and destination are the same account");
            }
        }
        if !(self.simulation.fee.is_finite() && self.simulation.fee >= 0.0) {
            bail!("simulation.fee must be a non-negative number");
        }
        Ok(())
    }

    pub fn timing(&self) -> TimingPolicy {
        TimingPolicy::new(
            Duration::from_secs(self.settle_window_mins.saturating_mul(60)),
            Duration::from_secs(self.jitter_min_secs),
            Duration::from_secs(self.jitter_max_secs),
        )
        .with_per_middleman(Duration::from_secs(self.per_middleman_mins.saturating_mul(60)))
    }

    pub fn retry_policy(&self, kind: StrategyKind) -> RetryPolicy {
        let base_ms = match kind {
            StrategyKind::Domino => self.retry.domino_delay_ms,
            StrategyKind::Leafway => self.retry.leafway_delay_ms,
        };
        let mut policy = RetryPolicy::fixed(self.max_attempts, Duration::from_millis(base_ms));
        if self.retry.backoff == BackoffKind::Exponential {
            policy.delay = DelayStrategy::Exponential {
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(self.retry.max_delay_ms),
                jitter_factor: self.retry.jitter_factor,
            };
        }
        policy
    }

    pub fn strategy_params(&self, kind: StrategyKind) -> StrategyParams {
        StrategyParams {
            retry: self.retry_policy(kind),
            timing: self.timing(),
            priority: self.priority,
            leg_failure_policy: self.leg_failure_policy,
        }
    }
}
