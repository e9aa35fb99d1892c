//! Fan relay scenarios against the in-memory ledger

use super::test_helpers::{approx_eq, build_path, middleman_order, FEE};
use crate::provision::provision_bulk;
use crate::relay::{
    LeafwayMixer, LegFailurePolicy, RelayError, RelayPath, RelayPhase, RelayStrategy,
    StrategyKind, StrategyParams, TimingPolicy,
};
use crate::simulation::SimulatedLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn mixer(path: RelayPath) -> LeafwayMixer {
    LeafwayMixer::new(path, StrategyParams::for_kind(StrategyKind::Leafway)).unwrap()
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_split_sweep_with_one_transfer_lost() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 2.5, &["m1", "m2"], 0.0);
    // m2's incoming transfer never lands
    ledger.drop_incoming("m2");
    let mut mixer = mixer(path);

    let report = mixer.start(2.0).await.unwrap();

    let fan_out: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.phase == RelayPhase::FanOut)
        .collect();
    assert_eq!(fan_out.len(), 2);
    assert!(fan_out.iter().all(|o| o.success && approx_eq(o.amount, 1.0)));

    let fan_in: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.phase == RelayPhase::FanIn)
        .collect();
    assert_eq!(fan_in.len(), 1);
    assert_eq!(fan_in[0].from, "m1");
    assert!(approx_eq(fan_in[0].amount, 0.99));

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].address, "m2");
    assert!(approx_eq(ledger.balance_of("dst"), 0.99));
    assert_eq!(ledger.stats("m2").send_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_legs_use_plain_division() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 5.0, &["m1", "m2", "m3"], 0.0);
    let mut mixer = mixer(path);

    let report = mixer.start(1.0).await.unwrap();

    let legs: Vec<f64> = ledger
        .transfers()
        .iter()
        .filter(|t| t.from == "src")
        .map(|t| t.amount)
        .collect();
    assert_eq!(legs.len(), 3);
    assert!(legs.iter().all(|&a| a == 1.0 / 3.0));
    assert!((legs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    assert!((report.total_sent(RelayPhase::FanOut) - 1.0).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_sends_balance_minus_fee() {
    let ledger = SimulatedLedger::new(FEE);
    // leftovers from earlier runs are swept too
    let path = build_path(&ledger, 3.0, &["m1", "m2"], 0.25);
    let mut mixer = mixer(path);

    mixer.start(2.0).await.unwrap();

    let sweeps: Vec<_> = ledger
        .transfers()
        .into_iter()
        .filter(|t| t.to == "dst")
        .collect();
    assert_eq!(sweeps.len(), 2);
    assert!(sweeps.iter().all(|t| approx_eq(t.amount, 1.25 - FEE)));
    assert!(approx_eq(ledger.balance_of("m1"), 0.0));
    assert!(approx_eq(ledger.balance_of("m2"), 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_dust_below_fee_is_skipped() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 1.0, &["m1"], 0.0);
    let mut mixer = mixer(path);

    // the fan-out lands exactly one fee: nothing left after paying it
    let report = mixer.start(0.01).await.unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert!(approx_eq(report.skipped[0].balance, 0.01));
    assert_eq!(ledger.stats("m1").send_attempts, 0);
}

// ============================================================================
// Phase ordering and timing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fan_in_starts_after_every_fan_out() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 4.0, &["m1", "m2", "m3"], 0.0);
    let order = middleman_order(&path);
    let mut mixer = mixer(path);

    mixer.start(3.0).await.unwrap();

    let transfers = ledger.transfers();
    assert_eq!(transfers.len(), 6);
    assert!(transfers[..3].iter().all(|t| t.from == "src"));
    assert!(transfers[3..].iter().all(|t| t.to == "dst"));

    let fan_out_order: Vec<_> = transfers[..3].iter().map(|t| t.to.clone()).collect();
    let fan_in_order: Vec<_> = transfers[3..].iter().map(|t| t.from.clone()).collect();
    assert_eq!(fan_out_order, order);
    assert_eq!(fan_in_order, order);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_is_settle_plus_jitter() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 4.0, &["m1", "m2", "m3"], 0.0);
    let mut mixer = mixer(path);
    let start = Instant::now();

    mixer.start(3.0).await.unwrap();

    // one settle window, two jitters in each phase
    let elapsed = start.elapsed();
    let settle = Duration::from_secs(25 * 60);
    assert!(elapsed >= settle + Duration::from_secs(4 * 5));
    assert!(elapsed <= settle + Duration::from_secs(4 * 10));
}

#[tokio::test(start_paused = true)]
async fn test_skipped_fan_in_legs_add_no_jitter() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 4.0, &["m1", "m2", "m3"], 0.0);
    for m in ["m1", "m2", "m3"] {
        ledger.drop_incoming(m);
    }
    let timing = TimingPolicy::new(
        Duration::from_secs(600),
        Duration::from_secs(7),
        Duration::from_secs(7),
    );
    let params = StrategyParams::for_kind(StrategyKind::Leafway).with_timing(timing);
    let mut mixer = LeafwayMixer::new(path, params).unwrap();
    let start = Instant::now();

    let report = mixer.start(3.0).await.unwrap();

    assert_eq!(report.skipped.len(), 3);
    // two fan-out jitters and the settle window, nothing during fan-in
    assert_eq!(start.elapsed(), Duration::from_secs(2 * 7 + 600));
}

#[test]
fn test_estimate_is_settle_plus_per_middleman() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 4.0, &["m1", "m2", "m3"], 0.0);

    assert_eq!(mixer(path.clone()).approx_minutes(), 25 + 3 * 15);

    let timing = TimingPolicy::new(
        Duration::from_secs(10 * 60),
        Duration::from_secs(1),
        Duration::from_secs(2),
    )
    .with_per_middleman(Duration::from_secs(5 * 60));
    let custom = LeafwayMixer::new(
        path,
        StrategyParams::for_kind(StrategyKind::Leafway).with_timing(timing),
    )
    .unwrap();
    assert_eq!(custom.approx_minutes(), 10 + 3 * 5);
    assert_eq!(custom.total_transfers(), 6);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_exhausted_fan_in_leg_recorded_and_run_continues() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 3.0, &["m1", "m2"], 0.0);
    ledger.fail_all_sends("m1");
    let mut mixer = mixer(path);

    let report = mixer.start(2.0).await.unwrap();

    let failed: Vec<_> = report.failed_legs().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].phase, RelayPhase::FanIn);
    assert_eq!(failed[0].from, "m1");
    assert_eq!(failed[0].attempts_used, 5);
    assert_eq!(ledger.stats("m1").send_attempts, 5);
    assert!(approx_eq(ledger.balance_of("m1"), 1.0));
    assert!(approx_eq(ledger.balance_of("dst"), 0.99));
}

#[tokio::test(start_paused = true)]
async fn test_abort_policy_stops_at_failed_fan_in_leg() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 3.0, &["m1", "m2"], 0.0);
    let order = middleman_order(&path);
    ledger.fail_all_sends(&order[0]);
    let mut mixer = LeafwayMixer::new(
        path,
        StrategyParams::for_kind(StrategyKind::Leafway)
            .with_leg_failure_policy(LegFailurePolicy::Abort),
    )
    .unwrap();

    let err = mixer.start(2.0).await.unwrap_err();

    assert_eq!(err.hop(), Some((order[0].as_str(), "dst")));
    // the second middleman is never swept
    assert_eq!(ledger.stats(&order[1]).sessions_opened, 0);
    assert!(approx_eq(ledger.balance_of(&order[1]), 1.0));
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_source_rejected_before_any_send() {
    let ledger = SimulatedLedger::new(FEE);
    let path = build_path(&ledger, 2.0, &["m1", "m2"], 0.0);
    let mut mixer = mixer(path);

    let err = mixer.start(2.0).await.unwrap_err();

    assert!(matches!(err, RelayError::InsufficientFunds { .. }));
    assert!(ledger.transfers().is_empty());
    assert_eq!(ledger.stats("m1").sessions_opened, 0);
}

// ============================================================================
// Provisioned middlemen
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_over_provisioned_middlemen() {
    let ledger = SimulatedLedger::new(FEE);
    let middlemen = provision_bulk(Arc::new(ledger.clone()), 4, 2).await.unwrap();
    let path = RelayPath::new(
        ledger.account("src", 5.0),
        &middlemen,
        ledger.account("dst", 0.0),
    )
    .unwrap();
    let mut mixer = mixer(path);

    let report = mixer.start(4.0).await.unwrap();

    assert_eq!(report.completed_count(), 8);
    assert!(approx_eq(ledger.balance_of("dst"), 4.0 - 4.0 * FEE));
}
