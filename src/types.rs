//! Common types used throughout the relay engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fee tier selector for a send.
///
/// Higher tiers trade cost for confirmation speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Priority {
    /// All tiers, cheapest first
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::VeryHigh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "very_high" => Ok(Priority::VeryHigh),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// A single send attempt. Built fresh for every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: f64,
    pub destination_address: String,
    pub priority: Priority,
}

impl TransferRequest {
    pub fn new(amount: f64, destination_address: impl Into<String>, priority: Priority) -> Self {
        Self {
            amount,
            destination_address: destination_address.into(),
            priority,
        }
    }
}

/// Fee estimate for a hypothetical send.
///
/// Fees move with network conditions, so a quote is only valid for the step
/// that requested it and is never carried over to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub priority: Priority,
    pub fee: f64,
}
