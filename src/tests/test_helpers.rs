//! Shared fixtures for scenario tests

use crate::relay::RelayPath;
use crate::simulation::SimulatedLedger;
use crate::wallet::AccountRef;

pub const FEE: f64 = 0.01;

/// Float comparison for ledger balances
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// `src → middlemen → dst` on `ledger`, middlemen funded with `middleman_balance`
pub fn build_path(
    ledger: &SimulatedLedger,
    source_balance: f64,
    middlemen: &[&str],
    middleman_balance: f64,
) -> RelayPath {
    let middlemen: Vec<AccountRef> = middlemen
        .iter()
        .map(|m| ledger.account(m, middleman_balance))
        .collect();
    RelayPath::new(
        ledger.account("src", source_balance),
        &middlemen,
        ledger.account("dst", 0.0),
    )
    .unwrap()
}

/// Execution-order addresses of the path's middlemen
pub fn middleman_order(path: &RelayPath) -> Vec<String> {
    path.middlemen()
        .iter()
        .map(|m| m.address().to_string())
        .collect()
}
