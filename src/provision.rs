//! Bulk account provisioning
//!
//! Creating accounts is slow (each one is a full login/registration round
//! trip on the underlying ledger), so many are created up front with a
//! bounded worker pool. This runs before a relay run, never during one.

use crate::wallet::{AccountRef, WalletError, WalletResult};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Creates fresh accounts
#[async_trait]
pub trait AccountProvisioner: Send + Sync {
    async fn provision(&self) -> WalletResult<AccountRef>;
}

/// A batch that stopped early. `created` holds every account that was
/// provisioned before and alongside the failure.
#[derive(Error)]
#[error("Provisioned {count} account(s) before failing: {error}", count = .created.len())]
pub struct BulkProvisionError {
    pub created: Vec<AccountRef>,
    #[source]
    pub error: WalletError,
}

impl fmt::Debug for BulkProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let created: Vec<&str> = self.created.iter().map(|a| a.address()).collect();
        f.debug_struct("BulkProvisionError")
            .field("created", &created)
            .field("error", &self.error)
            .finish()
    }
}

/// Provision `total` accounts with at most `max_workers` in flight.
///
/// After the first failure no new provisioning starts; calls already in
/// flight are awaited and whatever they created is returned in the error.
pub async fn provision_bulk<P>(
    provisioner: Arc<P>,
    total: usize,
    max_workers: usize,
) -> Result<Vec<AccountRef>, BulkProvisionError>
where
    P: AccountProvisioner + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let stopped = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for index in 0..total {
        let provisioner = Arc::clone(&provisioner);
        let semaphore = Arc::clone(&semaphore);
        let stopped = Arc::clone(&stopped);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| WalletError::Session("provisioning pool closed".into()))?;
            if stopped.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let account = provisioner.provision().await.inspect_err(|_| {
                stopped.store(true, Ordering::SeqCst);
            })?;
            debug!(index, address = %account.address(), "Account provisioned");
            Ok::<_, WalletError>(Some(account))
        });
    }

    let mut accounts = Vec::with_capacity(total);
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| WalletError::Session(format!("provisioning worker failed: {}", e)))
            .and_then(|result| result);
        match outcome {
            Ok(Some(account)) => accounts.push(account),
            Ok(None) => {}
            Err(error) => {
                stopped.store(true, Ordering::SeqCst);
                warn!(error = %error, "Account provisioning failed");
                first_error.get_or_insert(error);
            }
        }
    }

    if let Some(error) = first_error {
        return Err(BulkProvisionError {
            created: accounts,
            error,
        });
    }

    info!(total = accounts.len(), max_workers, "Bulk provisioning complete");
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedLedger;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingProvisioner {
        ledger: SimulatedLedger,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_at: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AccountProvisioner for CountingProvisioner {
        async fn provision(&self) -> WalletResult<AccountRef> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if Some(call) == self.fail_at {
                return Err(WalletError::Session("registration page timed out".into()));
            }
            self.ledger.provision().await
        }
    }

    fn provisioner(fail_at: Option<usize>) -> Arc<CountingProvisioner> {
        Arc::new(CountingProvisioner {
            ledger: SimulatedLedger::new(0.01),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail_at,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_respects_worker_limit() {
        let p = provisioner(None);
        let accounts = provision_bulk(Arc::clone(&p), 12, 3).await.unwrap();

        assert_eq!(accounts.len(), 12);
        let unique: HashSet<_> = accounts.iter().map(|a| a.address().to_string()).collect();
        assert_eq!(unique.len(), 12);
        assert!(p.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_fails_on_first_error() {
        let p = provisioner(Some(4));
        let err = provision_bulk(Arc::clone(&p), 8, 2).await.err().expect("expected provisioning to fail");

        assert!(matches!(err.error, WalletError::Session(_)));
        // nothing new starts once a call has failed
        assert!(p.calls.load(Ordering::SeqCst) < 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_keeps_created_accounts() {
        let p = provisioner(Some(5));
        let err = provision_bulk(Arc::clone(&p), 6, 1).await.err().expect("expected provisioning to fail");

        assert_eq!(err.created.len(), 5);
        let unique: HashSet<_> = err.created.iter().map(|a| a.address().to_string()).collect();
        assert_eq!(unique.len(), 5);
        assert!(err.to_string().contains("5 account(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_workers_still_progresses() {
        let p = provisioner(None);
        let accounts = provision_bulk(p, 2, 0).await.unwrap();
        assert_eq!(accounts.len(), 2);
    }
}
