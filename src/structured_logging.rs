//! Structured logging for relay runs

use uuid::Uuid;

/// Per-run structured logger.
///
/// Every event carries the run id so interleaved logs from several runs in
/// one process can be told apart.
#[derive(Debug, Clone)]
pub struct RelayLogger {
    run_id: String,
    strategy: &'static str,
}

impl RelayLogger {
    pub fn new(strategy: &'static str) -> Self {
        Self::with_run_id(strategy, Uuid::new_v4().to_string())
    }

    pub fn with_run_id(strategy: &'static str, run_id: String) -> Self {
        Self { run_id, strategy }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_run_started(&self, amount: f64, transfers: usize, approx_minutes: u64) {
        tracing::info!(
            run_id = %self.run_id,
            strategy = self.strategy,
            amount = %amount,
            transfers = transfers,
            approx_minutes = approx_minutes,
            "Relay run started"
        );
    }

    pub fn log_preflight(&self, address: &str, balance: f64, required: f64, fee: f64) {
        tracing::debug!(
            run_id = %self.run_id,
            address = %address,
            balance = %balance,
            required = %required,
            fee = %fee,
            "Preflight check"
        );
    }

    pub fn log_hop_started(&self, hop: usize, from: &str, to: &str, amount: f64) {
        tracing::info!(
            run_id = %self.run_id,
            hop = hop,
            from = %from,
            to = %to,
            amount = %amount,
            "Relay step started"
        );
    }

    pub fn log_hop_completed(&self, from: &str, to: &str, amount: f64, attempts: u32) {
        tracing::info!(
            run_id = %self.run_id,
            from = %from,
            to = %to,
            amount = %amount,
            attempts = attempts,
            "Transferred"
        );
    }

    pub fn log_hop_failed(&self, from: &str, to: &str, amount: f64, attempts: u32, error: &str) {
        tracing::error!(
            run_id = %self.run_id,
            from = %from,
            to = %to,
            amount = %amount,
            attempts = attempts,
            error = %error,
            "Relay step failed"
        );
    }

    pub fn log_leg_skipped(&self, address: &str, balance: f64, fee: f64) {
        tracing::warn!(
            run_id = %self.run_id,
            address = %address,
            balance = %balance,
            fee = %fee,
            "Nothing to sweep from middleman, skipping"
        );
    }

    pub fn log_wait(&self, reason: &str, secs: u64) {
        tracing::info!(
            run_id = %self.run_id,
            reason = reason,
            wait_secs = secs,
            "Waiting"
        );
    }

    pub fn log_run_finished(&self, completed: usize, failed: usize, skipped: usize) {
        tracing::info!(
            run_id = %self.run_id,
            strategy = self.strategy,
            completed = completed,
            failed = failed,
            skipped = skipped,
            "Relay run finished"
        );
    }

    pub fn log_run_aborted(&self, error: &str) {
        tracing::error!(
            run_id = %self.run_id,
            strategy = self.strategy,
            error = %error,
            "Relay run aborted"
        );
    }
}
