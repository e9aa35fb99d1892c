//! In-memory ledger
//!
//! Backs [`Account`]/[`WalletSession`] with a shared balance table so relay
//! runs can be exercised end to end without a network: the `simulate`
//! command and the test-suite both drive strategies against it.
//!
//! Failure injection mirrors what a real ledger does to a relay run:
//! transient send rejections, broken sessions, and incoming transfers that
//! never land.

use crate::provision::AccountProvisioner;
use crate::types::{Priority, TransferRequest};
use crate::wallet::{Account, AccountRef, WalletError, WalletResult, WalletSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-address counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountStats {
    pub sessions_opened: u32,
    pub sessions_closed: u32,
    pub sessions_abandoned: u32,
    pub balance_queries: u32,
    pub fee_queries: u32,
    pub send_attempts: u32,
    pub sends_succeeded: u32,
}

/// A send the ledger accepted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedTransfer {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub fee: f64,
    pub priority: Priority,
}

#[derive(Debug, Default)]
struct LedgerEntry {
    balance: f64,
    stats: AccountStats,
    fail_next_sends: u32,
    fail_all_sends: bool,
    broken_sessions: bool,
    drop_incoming: bool,
}

#[derive(Debug)]
struct LedgerState {
    base_fee: f64,
    entries: HashMap<String, LedgerEntry>,
    transfers: Vec<SimulatedTransfer>,
    generated: u64,
}

impl LedgerState {
    fn entry(&mut self, address: &str) -> WalletResult<&mut LedgerEntry> {
        self.entries
            .get_mut(address)
            .ok_or_else(|| WalletError::Session(format!("unknown account {}", address)))
    }

    fn fee_for(&self, priority: Priority) -> f64 {
        let multiplier = match priority {
            Priority::Low => 1.0,
            Priority::Medium => 2.0,
            Priority::High => 4.0,
            Priority::VeryHigh => 8.0,
        };
        self.base_fee * multiplier
    }
}

/// Shared in-memory ledger. Cloning yields another handle on the same state.
#[derive(Debug, Clone)]
pub struct SimulatedLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl SimulatedLedger {
    /// Create an empty ledger charging `base_fee` per low-priority send
    pub fn new(base_fee: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                base_fee,
                entries: HashMap::new(),
                transfers: Vec::new(),
                generated: 0,
            })),
        }
    }

    /// Register (or re-fund) `address` with `balance` and return its account handle
    pub fn account(&self, address: &str, balance: f64) -> AccountRef {
        {
            let mut state = self.state.lock();
            state.entries.entry(address.to_string()).or_default().balance = balance;
        }
        Arc::new(SimulatedAccount {
            address: address.to_string(),
            ledger: self.clone(),
        })
    }

    pub fn balance_of(&self, address: &str) -> f64 {
        self.state
            .lock()
            .entries
            .get(address)
            .map(|e| e.balance)
            .unwrap_or(0.0)
    }

    pub fn stats(&self, address: &str) -> AccountStats {
        self.state
            .lock()
            .entries
            .get(address)
            .map(|e| e.stats.clone())
            .unwrap_or_default()
    }

    /// Every accepted send, in submission order
    pub fn transfers(&self) -> Vec<SimulatedTransfer> {
        self.state.lock().transfers.clone()
    }

    /// Fee charged for a send at `priority`
    pub fn fee(&self, priority: Priority) -> f64 {
        self.state.lock().fee_for(priority)
    }

    pub fn set_base_fee(&self, base_fee: f64) {
        self.state.lock().base_fee = base_fee;
    }

    /// Reject the next `count` sends from `address` with a transaction error
    pub fn fail_next_sends(&self, address: &str, count: u32) {
        self.state.lock().entries.entry(address.to_string()).or_default().fail_next_sends = count;
    }

    /// Reject every send from `address` with a transaction error
    pub fn fail_all_sends(&self, address: &str) {
        self.state.lock().entries.entry(address.to_string()).or_default().fail_all_sends = true;
    }

    /// Make every session operation on `address` fail with a session error
    pub fn break_sessions(&self, address: &str) {
        self.state.lock().entries.entry(address.to_string()).or_default().broken_sessions = true;
    }

    /// Accept sends to `address` but never credit them
    pub fn drop_incoming(&self, address: &str) {
        self.state.lock().entries.entry(address.to_string()).or_default().drop_incoming = true;
    }

    fn check_session(&self, address: &str) -> WalletResult<()> {
        let mut state = self.state.lock();
        let entry = state.entry(address)?;
        if entry.broken_sessions {
            return Err(WalletError::Session(format!(
                "session channel for {} is broken",
                address
            )));
        }
        Ok(())
    }

    fn execute_send(&self, from: &str, request: &TransferRequest) -> WalletResult<()> {
        let mut state = self.state.lock();
        let fee = state.fee_for(request.priority);

        let sender = state.entry(from)?;
        sender.stats.send_attempts += 1;
        if sender.fail_all_sends {
            return Err(WalletError::Transaction("transaction rejected by network".into()));
        }
        if sender.fail_next_sends > 0 {
            sender.fail_next_sends -= 1;
            return Err(WalletError::Transaction("transaction temporarily rejected".into()));
        }
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(WalletError::Transaction(format!(
                "invalid amount {}",
                request.amount
            )));
        }
        if sender.balance < request.amount + fee {
            return Err(WalletError::Transaction(format!(
                "insufficient funds: balance {} < amount {} + fee {}",
                sender.balance, request.amount, fee
            )));
        }

        let drop_incoming = match state.entries.get(&request.destination_address) {
            Some(recipient) => recipient.drop_incoming,
            None => {
                return Err(WalletError::Transaction(format!(
                    "malformed address {}",
                    request.destination_address
                )))
            }
        };

        if let Some(sender) = state.entries.get_mut(from) {
            sender.balance -= request.amount + fee;
            sender.stats.sends_succeeded += 1;
        }
        if !drop_incoming {
            if let Some(recipient) = state.entries.get_mut(&request.destination_address) {
                recipient.balance += request.amount;
            }
        }
        state.transfers.push(SimulatedTransfer {
            from: from.to_string(),
            to: request.destination_address.clone(),
            amount: request.amount,
            fee,
            priority: request.priority,
        });
        Ok(())
    }
}

#[async_trait]
impl AccountProvisioner for SimulatedLedger {
    async fn provision(&self) -> WalletResult<AccountRef> {
        let address = {
            let mut state = self.state.lock();
            state.generated += 1;
            format!("sim-{:04}", state.generated)
        };
        Ok(self.account(&address, 0.0))
    }
}

struct SimulatedAccount {
    address: String,
    ledger: SimulatedLedger,
}

#[async_trait]
impl Account for SimulatedAccount {
    fn address(&self) -> &str {
        &self.address
    }

    async fn open_session(&self) -> WalletResult<Box<dyn WalletSession>> {
        self.ledger.check_session(&self.address)?;
        self.ledger.state.lock().entry(&self.address)?.stats.sessions_opened += 1;
        Ok(Box::new(SimulatedSession {
            address: self.address.clone(),
            ledger: self.ledger.clone(),
        }))
    }
}

struct SimulatedSession {
    address: String,
    ledger: SimulatedLedger,
}

#[async_trait]
impl WalletSession for SimulatedSession {
    async fn balance(&mut self) -> WalletResult<f64> {
        self.ledger.check_session(&self.address)?;
        let mut state = self.ledger.state.lock();
        let entry = state.entry(&self.address)?;
        entry.stats.balance_queries += 1;
        Ok(entry.balance)
    }

    async fn transfer_fee(&mut self, priority: Priority) -> WalletResult<f64> {
        self.ledger.check_session(&self.address)?;
        let mut state = self.ledger.state.lock();
        let fee = state.fee_for(priority);
        state.entry(&self.address)?.stats.fee_queries += 1;
        Ok(fee)
    }

    async fn send(&mut self, request: &TransferRequest) -> WalletResult<()> {
        self.ledger.check_session(&self.address)?;
        self.ledger.execute_send(&self.address, request)
    }

    async fn close(&mut self) -> WalletResult<()> {
        self.ledger.state.lock().entry(&self.address)?.stats.sessions_closed += 1;
        Ok(())
    }

    fn abandon(&mut self) {
        if let Ok(entry) = self.ledger.state.lock().entry(&self.address) {
            entry.stats.sessions_abandoned += 1;
        }
    }
}
