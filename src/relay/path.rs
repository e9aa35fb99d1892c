//! Relay path construction
//!
//! A [`RelayPath`] is built once per run. The caller's middleman list is
//! copied and shuffled, so the order funds actually move in is unrelated to
//! the order the caller declared them in, and the caller's list stays
//! untouched and reusable.

use super::errors::{RelayError, RelayResult};
use crate::wallet::AccountRef;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;

/// Immutable source → middlemen → destination route
#[derive(Clone)]
pub struct RelayPath {
    source: AccountRef,
    middlemen: Vec<AccountRef>,
    destination: AccountRef,
}

impl RelayPath {
    /// Build a path with a uniformly random middleman order
    pub fn new(
        source: AccountRef,
        middlemen: &[AccountRef],
        destination: AccountRef,
    ) -> RelayResult<Self> {
        Self::with_rng(source, middlemen, destination, &mut rand::thread_rng())
    }

    /// Build a path shuffling with the supplied RNG
    pub fn with_rng<R: Rng + ?Sized>(
        source: AccountRef,
        middlemen: &[AccountRef],
        destination: AccountRef,
        rng: &mut R,
    ) -> RelayResult<Self> {
        let mut seen = HashSet::with_capacity(middlemen.len());
        for middleman in middlemen {
            let address = middleman.address();
            if address == source.address() || address == destination.address() {
                return Err(RelayError::InvalidPath(format!(
                    "middleman {} is also an endpoint",
                    address
                )));
            }
            if !seen.insert(address) {
                return Err(RelayError::InvalidPath(format!(
                    "middleman {} listed twice",
                    address
                )));
            }
        }

        let mut order = middlemen.to_vec();
        order.shuffle(rng);

        Ok(Self {
            source,
            middlemen: order,
            destination,
        })
    }

    pub fn source(&self) -> &AccountRef {
        &self.source
    }

    /// Middlemen in execution order
    pub fn middlemen(&self) -> &[AccountRef] {
        &self.middlemen
    }

    pub fn destination(&self) -> &AccountRef {
        &self.destination
    }

    /// Every holder in order: source, middlemen, destination
    pub fn nodes(&self) -> impl Iterator<Item = &AccountRef> {
        std::iter::once(&self.source)
            .chain(self.middlemen.iter())
            .chain(std::iter::once(&self.destination))
    }

    /// Number of transfers a sequential relay makes along this path
    pub fn hop_count(&self) -> usize {
        self.middlemen.len() + 1
    }

    pub fn addresses(&self) -> Vec<String> {
        self.nodes().map(|a| a.address().to_string()).collect()
    }
}

impl fmt::Debug for RelayPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.addresses()).finish()
    }
}
