//! Balance and fee sufficiency checks
//!
//! Run immediately before each send, never cached: balances change as
//! confirmations land and fees move with congestion.

use super::errors::{RelayError, RelayResult};
use crate::types::{FeeQuote, Priority};
use crate::wallet::WalletSession;
use tracing::debug;

/// Result of a passed preflight check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preflight {
    pub quote: FeeQuote,
    pub balance: f64,
    pub required: f64,
}

/// What a holder can forward after paying one fee
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {
    pub quote: FeeQuote,
    pub balance: f64,
    pub remainder: f64,
}

impl Sweep {
    /// Nothing worth sending: the transfer never arrived or is dust below the fee
    pub fn is_empty(&self) -> bool {
        self.remainder.is_nan() || self.remainder <= 0.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PreflightValidator {
    priority: Priority,
}

impl PreflightValidator {
    pub fn new(priority: Priority) -> Self {
        Self { priority }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Fresh fee quote at the validator's priority
    pub async fn quote(
        &self,
        session: &mut dyn WalletSession,
        address: &str,
    ) -> RelayResult<FeeQuote> {
        let fee = session
            .transfer_fee(self.priority)
            .await
            .map_err(|e| RelayError::from_wallet(address, e))?;
        if !fee.is_finite() || fee < 0.0 {
            return Err(RelayError::Session {
                address: address.to_string(),
                message: format!("unusable fee quote: {}", fee),
            });
        }
        Ok(FeeQuote {
            priority: self.priority,
            fee,
        })
    }

    async fn balance(&self, session: &mut dyn WalletSession, address: &str) -> RelayResult<f64> {
        let balance = session
            .balance()
            .await
            .map_err(|e| RelayError::from_wallet(address, e))?;
        if !balance.is_finite() {
            return Err(RelayError::Session {
                address: address.to_string(),
                message: format!("unusable balance: {}", balance),
            });
        }
        Ok(balance)
    }

    /// Require `balance >= amount + fee * reserve_transfers`.
    ///
    /// `reserve_transfers` is the number of fees the running amount still has
    /// to cover; the strategy decides it.
    pub async fn check(
        &self,
        session: &mut dyn WalletSession,
        address: &str,
        amount: f64,
        reserve_transfers: usize,
    ) -> RelayResult<Preflight> {
        let quote = self.quote(session, address).await?;
        let balance = self.balance(session, address).await?;
        let required = amount + quote.fee * reserve_transfers as f64;

        debug!(
            address = %address,
            balance = %balance,
            required = %required,
            fee = %quote.fee,
            reserve_transfers,
            "Preflight"
        );

        if required.is_nan() || balance < required {
            return Err(RelayError::InsufficientFunds {
                address: address.to_string(),
                balance,
                required,
                fee: quote.fee,
            });
        }

        Ok(Preflight {
            quote,
            balance,
            required,
        })
    }

    /// Balance minus one fee: what a fan-in leg may forward
    pub async fn sweepable(
        &self,
        session: &mut dyn WalletSession,
        address: &str,
    ) -> RelayResult<Sweep> {
        let quote = self.quote(session, address).await?;
        let balance = self.balance(session, address).await?;
        Ok(Sweep {
            quote,
            balance,
            remainder: balance - quote.fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedLedger;
    use crate::types::TransferRequest;
    use crate::wallet::WalletResult;
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_check_passes_with_reserve() {
        let ledger = SimulatedLedger::new(0.01);
        let src = ledger.account("src", 1.03);
        let mut session = src.open_session().await.unwrap();

        let preflight = PreflightValidator::new(Priority::Low)
            .check(session.as_mut(), "src", 1.0, 3)
            .await
            .unwrap();

        assert!((preflight.required - 1.03).abs() < 1e-9);
        assert_eq!(preflight.quote.priority, Priority::Low);
    }

    #[tokio::test]
    async fn test_check_fails_when_reserve_uncovered() {
        let ledger = SimulatedLedger::new(0.01);
        let src = ledger.account("src", 1.02);
        let mut session = src.open_session().await.unwrap();

        let err = PreflightValidator::new(Priority::Low)
            .check(session.as_mut(), "src", 1.0, 3)
            .await
            .unwrap_err();

        match err {
            RelayError::InsufficientFunds {
                address, balance, ..
            } => {
                assert_eq!(address, "src");
                assert!((balance - 1.02).abs() < 1e-12);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fee_requeried_on_every_check() {
        let ledger = SimulatedLedger::new(0.01);
        let src = ledger.account("src", 10.0);
        let mut session = src.open_session().await.unwrap();
        let validator = PreflightValidator::new(Priority::High);

        let first = validator.check(session.as_mut(), "src", 1.0, 1).await.unwrap();
        ledger.set_base_fee(0.02);
        let second = validator.check(session.as_mut(), "src", 1.0, 1).await.unwrap();

        assert!((first.quote.fee - 0.04).abs() < 1e-12);
        assert!((second.quote.fee - 0.08).abs() < 1e-12);
        assert_eq!(ledger.stats("src").fee_queries, 2);
    }

    #[tokio::test]
    async fn test_sweep_of_empty_holder_is_empty() {
        let ledger = SimulatedLedger::new(0.01);
        let m = ledger.account("m1", 0.0);
        let mut session = m.open_session().await.unwrap();

        let sweep = PreflightValidator::default()
            .sweepable(session.as_mut(), "m1")
            .await
            .unwrap();
        assert!(sweep.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_remainder_is_balance_minus_fee() {
        let ledger = SimulatedLedger::new(0.01);
        let m = ledger.account("m1", 1.0);
        let mut session = m.open_session().await.unwrap();

        let sweep = PreflightValidator::default()
            .sweepable(session.as_mut(), "m1")
            .await
            .unwrap();
        assert!(!sweep.is_empty());
        assert!((sweep.remainder - 0.99).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_broken_session_surfaces_as_session_error() {
        let ledger = SimulatedLedger::new(0.01);
        let m = ledger.account("m1", 1.0);
        let mut session = m.open_session().await.unwrap();
        ledger.break_sessions("m1");

        let err = PreflightValidator::default()
            .check(session.as_mut(), "m1", 0.5, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Session { .. }));
    }

    /// Session that reports whatever numbers it is given
    struct FixedSession {
        balance: f64,
        fee: f64,
    }

    #[async_trait]
    impl WalletSession for FixedSession {
        async fn balance(&mut self) -> WalletResult<f64> {
            Ok(self.balance)
        }

        async fn transfer_fee(&mut self, _priority: Priority) -> WalletResult<f64> {
            Ok(self.fee)
        }

        async fn send(&mut self, _request: &TransferRequest) -> WalletResult<()> {
            panic!("preflight never sends");
        }

        async fn close(&mut self) -> WalletResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_nan_fee_never_passes() {
        let validator = PreflightValidator::default();
        let mut session = FixedSession {
            balance: 0.0,
            fee: f64::NAN,
        };

        let err = validator.check(&mut session, "src", 1.0, 3).await.unwrap_err();
        assert!(matches!(err, RelayError::Session { ref address, .. } if address == "src"));
        assert!(validator.sweepable(&mut session, "src").await.is_err());
    }

    #[tokio::test]
    async fn test_non_finite_balance_never_passes() {
        let validator = PreflightValidator::default();
        for balance in [f64::NAN, f64::INFINITY] {
            let mut session = FixedSession { balance, fee: 0.01 };
            assert!(validator.check(&mut session, "m1", 1.0, 1).await.is_err());
            assert!(validator.sweepable(&mut session, "m1").await.is_err());
        }
    }

    #[test]
    fn test_nan_remainder_is_empty() {
        let sweep = Sweep {
            quote: FeeQuote {
                priority: Priority::Low,
                fee: 0.01,
            },
            balance: 1.0,
            remainder: f64::NAN,
        };
        assert!(sweep.is_empty());
    }
}
