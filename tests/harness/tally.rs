// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Outcome counting for request floods.

use axum::http::StatusCode;
use std::collections::BTreeMap;
use std::fmt;

/// Counts responses by status code.
#[derive(Debug, Default)]
pub struct StatusTally {
    counts: BTreeMap<u16, usize>,
}

impl StatusTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, status: StatusCode) {
        *self.counts.entry(status.as_u16()).or_insert(0) += 1;
    }

    pub fn count(&self, status: StatusCode) -> usize {
        self.counts.get(&status.as_u16()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Share of requests not answered with 200.
    pub fn block_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (total - self.count(StatusCode::OK)) as f64 / total as f64
    }
}

impl fmt::Display for StatusTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Flood Report ===")?;
        writeln!(f, "Total Requests:    {}", self.total())?;
        for (status, count) in &self.counts {
            writeln!(f, "HTTP {}:          {}", status, count)?;
        }
        writeln!(f, "Block Rate:        {:.1}%", self.block_rate() * 100.0)
    }
}
