//! Fan relay ("leafway")
//!
//! Three phases, strictly in order:
//!
//! 1. Fan-out: the source sends `amount / k` to each of the `k` middlemen,
//!    with a random jitter between legs.
//! 2. Settle: one global wait so every fan-out transfer becomes spendable.
//! 3. Fan-in: each middleman sweeps `balance - fee` to the destination. A
//!    middleman with nothing left after the fee is skipped.
//!
//! A leg that exhausts its attempts is handled per [`LegFailurePolicy`].
//! Session failures always end the run.

use super::errors::{RelayError, RelayResult};
use super::path::RelayPath;
use super::preflight::PreflightValidator;
use super::report::{RelayOutcome, RelayPhase, RelayReport, SkippedLeg};
use super::retry::RetryExecutor;
use super::{
    send_with_retry, validate_amount, LegFailurePolicy, RelayStrategy, StrategyParams,
};
use crate::metrics::{metrics, Timer};
use crate::structured_logging::RelayLogger;
use crate::types::TransferRequest;
use crate::wallet::{AccountRef, SessionGuard};
use async_trait::async_trait;

const NAME: &str = "leafway";

/// One transfer between two holders
#[derive(Debug, Clone, Copy)]
struct Leg<'a> {
    phase: RelayPhase,
    from: &'a str,
    to: &'a str,
    amount: f64,
}

impl Leg<'_> {
    fn outcome(&self, attempts_used: u32, error: Option<String>) -> RelayOutcome {
        RelayOutcome {
            phase: self.phase,
            from: self.from.to_string(),
            to: self.to.to_string(),
            amount: self.amount,
            attempts_used,
            success: error.is_none(),
            error,
        }
    }
}

pub struct LeafwayMixer {
    path: RelayPath,
    params: StrategyParams,
    validator: PreflightValidator,
    executor: RetryExecutor,
    report: Option<RelayReport>,
}

impl LeafwayMixer {
    /// Fails with [`RelayError::InvalidPath`] when the path has no middlemen
    pub fn new(path: RelayPath, params: StrategyParams) -> RelayResult<Self> {
        if path.middlemen().is_empty() {
            return Err(RelayError::InvalidPath(
                "fan relay needs at least one middleman".into(),
            ));
        }
        let validator = PreflightValidator::new(params.priority);
        let executor = RetryExecutor::new(params.retry.clone());
        Ok(Self {
            path,
            params,
            validator,
            executor,
            report: None,
        })
    }

    pub fn path(&self) -> &RelayPath {
        &self.path
    }

    /// Two legs per middleman: one in, one out
    pub fn transfers(&self) -> usize {
        self.path.middlemen().len() * 2
    }

    async fn run(
        &self,
        amount: f64,
        logger: &RelayLogger,
        report: &mut RelayReport,
    ) -> RelayResult<()> {
        self.fan_out(amount, logger, report).await?;
        self.params.timing.settle(logger, "settle").await;
        self.fan_in(logger, report).await
    }

    async fn fan_out(
        &self,
        amount: f64,
        logger: &RelayLogger,
        report: &mut RelayReport,
    ) -> RelayResult<()> {
        let source = self.path.source();
        let mut guard = SessionGuard::open(source.as_ref())
            .await
            .map_err(|e| RelayError::from_wallet(source.address(), e))?;

        let result = self.fan_out_legs(&mut guard, amount, logger, report).await;
        guard.release().await;
        result
    }

    async fn fan_out_legs(
        &self,
        guard: &mut SessionGuard,
        amount: f64,
        logger: &RelayLogger,
        report: &mut RelayReport,
    ) -> RelayResult<()> {
        let from = guard.address().to_string();
        let middlemen = self.path.middlemen();

        let preflight = self
            .validator
            .check(guard.session(), &from, amount, self.transfers())
            .await?;
        logger.log_preflight(&from, preflight.balance, preflight.required, preflight.quote.fee);

        let split = amount / middlemen.len() as f64;

        for (i, middleman) in middlemen.iter().enumerate() {
            logger.log_hop_started(i, &from, middleman.address(), split);
            let timer = Timer::new();
            let request = TransferRequest::new(split, middleman.address(), self.params.priority);
            let result = send_with_retry(&self.executor, guard.session(), &from, &request).await;
            let leg = Leg {
                phase: RelayPhase::FanOut,
                from: &from,
                to: middleman.address(),
                amount: split,
            };
            self.settle_leg(leg, result, timer, logger, report)?;

            if i + 1 < middlemen.len() {
                self.params.timing.jitter(logger).await;
            }
        }
        Ok(())
    }

    async fn fan_in(&self, logger: &RelayLogger, report: &mut RelayReport) -> RelayResult<()> {
        let middlemen = self.path.middlemen();
        let destination = self.path.destination().address();

        for (i, middleman) in middlemen.iter().enumerate() {
            let sent = self.sweep(middleman, destination, logger, report).await?;
            if sent && i + 1 < middlemen.len() {
                self.params.timing.jitter(logger).await;
            }
        }
        Ok(())
    }

    /// Sweep one middleman into the destination. Returns whether a send was
    /// attempted.
    async fn sweep(
        &self,
        middleman: &AccountRef,
        destination: &str,
        logger: &RelayLogger,
        report: &mut RelayReport,
    ) -> RelayResult<bool> {
        let from = middleman.address();
        let timer = Timer::new();
        let mut guard = SessionGuard::open(middleman.as_ref())
            .await
            .map_err(|e| RelayError::from_wallet(from, e))?;

        let sweep = match self.validator.sweepable(guard.session(), from).await {
            Ok(sweep) => sweep,
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        };

        if sweep.is_empty() {
            guard.release().await;
            logger.log_leg_skipped(from, sweep.balance, sweep.quote.fee);
            metrics().legs_skipped.inc();
            report.record_skip(SkippedLeg {
                address: from.to_string(),
                balance: sweep.balance,
                fee: sweep.quote.fee,
            });
            return Ok(false);
        }

        logger.log_hop_started(report.outcomes.len(), from, destination, sweep.remainder);
        let request = TransferRequest::new(sweep.remainder, destination, self.params.priority);
        let result = send_with_retry(&self.executor, guard.session(), from, &request).await;
        guard.release().await;

        let leg = Leg {
            phase: RelayPhase::FanIn,
            from,
            to: destination,
            amount: sweep.remainder,
        };
        self.settle_leg(leg, result, timer, logger, report)?;
        Ok(true)
    }

    /// Record a leg's outcome and decide whether the run goes on
    fn settle_leg(
        &self,
        leg: Leg<'_>,
        result: RelayResult<u32>,
        timer: Timer,
        logger: &RelayLogger,
        report: &mut RelayReport,
    ) -> RelayResult<()> {
        match result {
            Ok(attempts) => {
                metrics().hops_completed.inc();
                timer.finish();
                logger.log_hop_completed(leg.from, leg.to, leg.amount, attempts);
                report.record(leg.outcome(attempts, None));
                Ok(())
            }
            Err(e) => {
                let attempts = e.attempts().unwrap_or(0);
                logger.log_hop_failed(leg.from, leg.to, leg.amount, attempts, &e.to_string());
                report.record(leg.outcome(attempts, Some(e.to_string())));
                match (&e, self.params.leg_failure_policy) {
                    (RelayError::RelayExhausted { .. }, LegFailurePolicy::Continue) => Ok(()),
                    _ => Err(e),
                }
            }
        }
    }
}

#[async_trait]
impl RelayStrategy for LeafwayMixer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn total_transfers(&self) -> usize {
        self.transfers()
    }

    fn approx_minutes(&self) -> u64 {
        self.params
            .timing
            .fan_estimate_minutes(self.path.middlemen().len())
    }

    async fn start(&mut self, amount: f64) -> RelayResult<RelayReport> {
        validate_amount(amount)?;

        let logger = RelayLogger::new(NAME);
        let mut report = RelayReport::new(logger.run_id(), NAME, amount);

        metrics().runs_started.inc();
        metrics().active_runs.inc();
        let _active = scopeguard::guard((), |_| metrics().active_runs.dec());

        logger.log_run_started(amount, self.transfers(), self.approx_minutes());
        let result = self.run(amount, &logger, &mut report).await;
        report.finish();

        match result {
            Ok(()) => {
                logger.log_run_finished(
                    report.completed_count(),
                    report.failed_legs().count(),
                    report.skipped.len(),
                );
                self.report = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                metrics().runs_failed.inc();
                logger.log_run_aborted(&e.to_string());
                self.report = Some(report);
                Err(e)
            }
        }
    }

    fn progress(&self) -> Option<&RelayReport> {
        self.report.as_ref()
    }
}
