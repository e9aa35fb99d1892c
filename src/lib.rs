//! Relay Mixer - fund relay orchestration library
//!
//! Moves an amount from a source account to a destination through shuffled
//! middlemen accounts, either hop by hop ([`relay::DominoMixer`]) or by
//! fanning out and sweeping back in ([`relay::LeafwayMixer`]).
//!
//! The ledger is reached only through the [`wallet::Account`] and
//! [`wallet::WalletSession`] traits; [`simulation::SimulatedLedger`] is an
//! in-memory implementation for dry runs and tests.

pub mod config;
pub mod metrics;
pub mod provision;
pub mod relay;
pub mod simulation;
pub mod structured_logging;
pub mod types;
pub mod wallet;

pub use config::RelayConfig;
pub use relay::{
    build_strategy, DominoMixer, LeafwayMixer, RelayError, RelayPath, RelayReport,
    RelayStrategy, StrategyKind, StrategyParams,
};
pub use types::{Priority, TransferRequest};
pub use wallet::{Account, AccountRef, SessionGuard, WalletError, WalletSession};

#[cfg(test)]
mod tests;
