//! Relay strategies
//!
//! A run moves an amount from a source account to a destination through a
//! shuffled set of middlemen. Two strategies are provided:
//!
//! - [`DominoMixer`]: sequential, hop by hop through every middleman.
//! - [`LeafwayMixer`]: fan out to all middlemen, wait, sweep back in.
//!
//! Both share the same building blocks: [`RelayPath`] for the route,
//! [`PreflightValidator`] before every send, [`RetryExecutor`] around every
//! send, and [`TimingPolicy`] for the pauses in between.

pub mod domino;
pub mod errors;
pub mod leafway;
pub mod path;
pub mod preflight;
pub mod report;
pub mod retry;
pub mod timing;

pub use domino::DominoMixer;
pub use errors::{RelayError, RelayResult};
pub use leafway::LeafwayMixer;
pub use path::RelayPath;
pub use preflight::{Preflight, PreflightValidator, Sweep};
pub use report::{RelayOutcome, RelayPhase, RelayReport, SkippedLeg};
pub use retry::{
    Attempt, DelayStrategy, RetryError, RetryExecutor, RetryOutcome, RetryPolicy, SendAttempt,
};
pub use timing::TimingPolicy;

use crate::types::{Priority, TransferRequest};
use crate::wallet::WalletSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Common interface of the relay strategies
#[async_trait]
pub trait RelayStrategy: Send {
    fn name(&self) -> &'static str;

    /// Number of sends a fully successful run makes
    fn total_transfers(&self) -> usize;

    /// User-facing wall-clock estimate, in minutes
    fn approx_minutes(&self) -> u64;

    /// Execute a run moving `amount`.
    ///
    /// Returns the run's report on success. On a fatal error the partial
    /// report stays available through [`RelayStrategy::progress`].
    async fn start(&mut self, amount: f64) -> RelayResult<RelayReport>;

    /// Report of the most recent run, if any
    fn progress(&self) -> Option<&RelayReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Domino,
    Leafway,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Domino => "domino",
            StrategyKind::Leafway => "leafway",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "domino" | "sequential" => Ok(StrategyKind::Domino),
            "leafway" | "fan" => Ok(StrategyKind::Leafway),
            other => Err(RelayError::Configuration(format!(
                "unknown strategy '{}'",
                other
            ))),
        }
    }
}

/// What a fan relay does when one leg exhausts its attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegFailurePolicy {
    /// Record the failed leg and carry on with the rest
    #[default]
    Continue,
    /// Stop the run with [`RelayError::RelayExhausted`]
    Abort,
}

impl FromStr for LegFailurePolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" | "skip" => Ok(LegFailurePolicy::Continue),
            "abort" => Ok(LegFailurePolicy::Abort),
            other => Err(RelayError::Configuration(format!(
                "unknown leg failure policy '{}'",
                other
            ))),
        }
    }
}

/// Knobs threaded into a strategy at construction
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub retry: RetryPolicy,
    pub timing: TimingPolicy,
    pub priority: Priority,
    pub leg_failure_policy: LegFailurePolicy,
}

impl StrategyParams {
    /// Stock parameters for `kind`: 5 attempts, low priority, 25 min settle
    pub fn for_kind(kind: StrategyKind) -> Self {
        let retry = match kind {
            StrategyKind::Domino => RetryPolicy::domino_default(),
            StrategyKind::Leafway => RetryPolicy::leafway_default(),
        };
        Self {
            retry,
            timing: TimingPolicy::default(),
            priority: Priority::Low,
            leg_failure_policy: LegFailurePolicy::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn with_timing(mut self, timing: TimingPolicy) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_leg_failure_policy(mut self, policy: LegFailurePolicy) -> Self {
        self.leg_failure_policy = policy;
        self
    }
}

/// Build the strategy named by `kind` over `path`
pub fn build_strategy(
    kind: StrategyKind,
    path: RelayPath,
    params: StrategyParams,
) -> RelayResult<Box<dyn RelayStrategy>> {
    Ok(match kind {
        StrategyKind::Domino => Box::new(DominoMixer::new(path, params)),
        StrategyKind::Leafway => Box::new(LeafwayMixer::new(path, params)?),
    })
}

/// Reject amounts no ledger could send
pub fn validate_amount(amount: f64) -> RelayResult<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(RelayError::InvalidAmount(amount));
    }
    Ok(())
}

/// Send `request` from `from` through the retry executor.
///
/// Returns the attempts used. Exhaustion becomes
/// [`RelayError::RelayExhausted`]; a permanent failure becomes
/// [`RelayError::Session`].
pub(crate) async fn send_with_retry(
    executor: &RetryExecutor,
    session: &mut dyn WalletSession,
    from: &str,
    request: &TransferRequest,
) -> RelayResult<u32> {
    let operation = format!("{}->{}", from, request.destination_address);
    let mut send = SendAttempt { session, request };

    match executor.execute(&operation, &mut send).await {
        Ok(outcome) => Ok(outcome.attempts),
        Err(RetryError::Exhausted {
            attempts,
            last_error,
        }) => Err(RelayError::RelayExhausted {
            from: from.to_string(),
            to: request.destination_address.clone(),
            amount: request.amount,
            attempts,
            last_error: last_error.to_string(),
        }),
        Err(RetryError::Permanent { error, .. }) => Err(RelayError::from_wallet(from, error)),
    }
}
