//! Wallet capability module
//!
//! The relay engine never talks to a ledger directly. It sees accounts through
//! the [`Account`] trait and does all reads and sends through an exclusive
//! [`WalletSession`] opened on that account. How sessions are backed (browser
//! automation, RPC, an in-memory ledger) is up to the implementor.

use crate::types::{Priority, TransferRequest};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported by a wallet session
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WalletError {
    /// The ledger rejected a send (low fee, temporary rejection, balance
    /// observed short by the ledger, malformed address).
    #[error("Transaction rejected: {0}")]
    Transaction(String),

    /// The session itself is broken: it cannot be opened or the channel to
    /// the ledger died.
    #[error("Session error: {0}")]
    Session(String),
}

impl WalletError {
    /// Transaction-level rejections are transient; session failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, WalletError::Transaction(_))
    }
}

pub type WalletResult<T> = Result<T, WalletError>;

/// An authenticated, exclusive handle on one account.
#[async_trait]
pub trait WalletSession: Send {
    /// Current spendable balance
    async fn balance(&mut self) -> WalletResult<f64>;

    /// Fee estimate for a hypothetical send at `priority`
    async fn transfer_fee(&mut self, priority: Priority) -> WalletResult<f64>;

    /// Submit a send. Fails with [`WalletError::Transaction`] on any
    /// ledger-reported rejection.
    async fn send(&mut self, request: &TransferRequest) -> WalletResult<()>;

    /// Log out. Called exactly once by [`SessionGuard::release`].
    async fn close(&mut self) -> WalletResult<()>;

    /// Synchronous last-resort release used when a guard is dropped without
    /// being released (for example when the owning future is cancelled).
    fn abandon(&mut self) {}
}

/// An opaque identity with a stable address that can open sessions.
///
/// The relay engine only reads the address and opens sessions; it never
/// mutates the account.
#[async_trait]
pub trait Account: Send + Sync {
    fn address(&self) -> &str;

    async fn open_session(&self) -> WalletResult<Box<dyn WalletSession>>;
}

/// Shared account handle
pub type AccountRef = Arc<dyn Account>;

/// Scoped acquisition of a wallet session.
///
/// Open with [`SessionGuard::open`], use through [`SessionGuard::session`],
/// and finish with [`SessionGuard::release`]. A guard dropped without release
/// calls [`WalletSession::abandon`] so the account is never left logged in.
pub struct SessionGuard {
    address: String,
    session: Box<dyn WalletSession>,
    released: bool,
}

impl SessionGuard {
    /// Open a session on `account`
    pub async fn open(account: &dyn Account) -> WalletResult<Self> {
        let address = account.address().to_string();
        let session = account.open_session().await?;
        debug!(address = %address, "Wallet session opened");
        Ok(Self {
            address,
            session,
            released: false,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Borrow the live session
    pub fn session(&mut self) -> &mut dyn WalletSession {
        &mut *self.session
    }

    /// Close the session.
    ///
    /// A close failure is logged and swallowed: it must not mask the result
    /// of the step that used the session.
    pub async fn release(mut self) {
        self.released = true;
        match self.session.close().await {
            Ok(()) => debug!(address = %self.address, "Wallet session closed"),
            Err(e) => warn!(
                address = %self.address,
                error = %e,
                "Failed to close wallet session cleanly"
            ),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                address = %self.address,
                "Wallet session dropped without release, abandoning"
            );
            self.session.abandon();
        }
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("address", &self.address)
            .field("released", &self.released)
            .finish()
    }
}
