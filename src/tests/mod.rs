//! Crate-level scenario tests

mod leafway_scenario_tests;
mod test_helpers;
