//! Sequential relay ("domino")
//!
//! Funds travel `source → m1 → … → mk → destination`, one hop at a time.
//! Hop `i+1` only starts once hop `i`'s send was accepted and the settle
//! window has passed, since its preflight must see the incoming transfer.
//!
//! Any fatal error stops the run where it is. Nothing is rolled back: the
//! amount stays with the last holder that received it, which the run's
//! report names.

use super::errors::{RelayError, RelayResult};
use super::path::RelayPath;
use super::preflight::PreflightValidator;
use super::report::{RelayOutcome, RelayPhase, RelayReport};
use super::retry::RetryExecutor;
use super::{send_with_retry, validate_amount, RelayStrategy, StrategyParams};
use crate::metrics::{metrics, Timer};
use crate::structured_logging::RelayLogger;
use crate::types::TransferRequest;
use crate::wallet::{AccountRef, SessionGuard};
use async_trait::async_trait;

const NAME: &str = "domino";

pub struct DominoMixer {
    path: RelayPath,
    params: StrategyParams,
    validator: PreflightValidator,
    executor: RetryExecutor,
    report: Option<RelayReport>,
}

impl DominoMixer {
    pub fn new(path: RelayPath, params: StrategyParams) -> Self {
        let validator = PreflightValidator::new(params.priority);
        let executor = RetryExecutor::new(params.retry.clone());
        Self {
            path,
            params,
            validator,
            executor,
            report: None,
        }
    }

    pub fn path(&self) -> &RelayPath {
        &self.path
    }

    /// One transfer per path link
    pub fn transfers(&self) -> usize {
        self.path.hop_count()
    }

    async fn run(
        &self,
        amount: f64,
        logger: &RelayLogger,
        report: &mut RelayReport,
    ) -> RelayResult<()> {
        let nodes: Vec<&AccountRef> = self.path.nodes().collect();
        let hops = nodes.len() - 1;

        for (i, pair) in nodes.windows(2).enumerate() {
            let (from, to) = (pair[0], pair[1]);
            logger.log_hop_started(i, from.address(), to.address(), amount);

            // Every fee still ahead is paid out of the same running amount
            let attempts = self
                .hop(from, to.address(), amount, hops - i, logger)
                .await
                .inspect_err(|e| {
                    report.record(RelayOutcome {
                        phase: RelayPhase::Hop,
                        from: from.address().to_string(),
                        to: to.address().to_string(),
                        amount,
                        attempts_used: e.attempts().unwrap_or(0),
                        success: false,
                        error: Some(e.to_string()),
                    });
                })?;

            report.record(RelayOutcome {
                phase: RelayPhase::Hop,
                from: from.address().to_string(),
                to: to.address().to_string(),
                amount,
                attempts_used: attempts,
                success: true,
                error: None,
            });
            logger.log_hop_completed(from.address(), to.address(), amount, attempts);

            if i + 1 < hops {
                self.params.timing.settle(logger, "settle").await;
            }
        }

        Ok(())
    }

    /// Open `from`, preflight, send, release. Returns the attempts used.
    async fn hop(
        &self,
        from: &AccountRef,
        to: &str,
        amount: f64,
        remaining_hops: usize,
        logger: &RelayLogger,
    ) -> RelayResult<u32> {
        let timer = Timer::new();
        let mut guard = SessionGuard::open(from.as_ref())
            .await
            .map_err(|e| RelayError::from_wallet(from.address(), e))?;

        let result = self
            .send_from(&mut guard, to, amount, remaining_hops, logger)
            .await;
        guard.release().await;

        if result.is_ok() {
            metrics().hops_completed.inc();
            timer.finish();
        }
        result
    }

    async fn send_from(
        &self,
        guard: &mut SessionGuard,
        to: &str,
        amount: f64,
        remaining_hops: usize,
        logger: &RelayLogger,
    ) -> RelayResult<u32> {
        let from = guard.address().to_string();
        let preflight = self
            .validator
            .check(guard.session(), &from, amount, remaining_hops)
            .await?;
        logger.log_preflight(&from, preflight.balance, preflight.required, preflight.quote.fee);

        let request = TransferRequest::new(amount, to, self.params.priority);
        send_with_retry(&self.executor, guard.session(), &from, &request).await
    }
}

#[async_trait]
impl RelayStrategy for DominoMixer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn total_transfers(&self) -> usize {
        self.transfers()
    }

    fn approx_minutes(&self) -> u64 {
        self.params
            .timing
            .sequential_estimate_minutes(self.transfers())
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
                logger.log_run_finished(report.completed_count(), 0, 0);
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
