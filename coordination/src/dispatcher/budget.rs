//! Daily spend ledger for online execution
//!
//! Spend accumulates per UTC calendar day in `<root>/ops/spend.json`. Cost is
//! reserved before an online executor runs and refunded if the run does not
//! succeed, so concurrent jobs cannot jointly overshoot the daily budget.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::persist::{read_json, write_json_atomic};

/// Ledger file name under the ops directory
pub const SPEND_FILE: &str = "spend.json";

/// Online cost limits in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostLimits {
    pub daily: f64,
    pub per_job: f64,
}

impl Default for CostLimits {
    fn default() -> Self {
        Self {
            daily: 2.0,
            per_job: 0.50,
        }
    }
}

/// Outcome of a reservation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SpendCheck {
    Reserved,
    /// Reason the job may not run
    Exceeded(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SpendDays {
    days: BTreeMap<NaiveDate, f64>,
}

/// Persistent per-day spend accumulator
#[derive(Debug)]
pub struct SpendLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SpendLedger {
    /// Open the ledger in an ops directory; a malformed file is `PolicyLoad`
    pub fn open(ops_dir: impl AsRef<Path>) -> DispatchResult<Self> {
        let ops_dir = ops_dir.as_ref();
        std::fs::create_dir_all(ops_dir)?;
        let path = ops_dir.join(SPEND_FILE);
        read_json::<SpendDays>(&path)?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    fn update<R>(&self, f: impl FnOnce(&mut SpendDays) -> (bool, R)) -> DispatchResult<R> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| DispatchError::config("spend ledger lock poisoned"))?;
        let mut days = read_json::<SpendDays>(&self.path)?.unwrap_or_default();
        let (dirty, out) = f(&mut days);
        if dirty {
            write_json_atomic(&self.path, &days)?;
        }
        Ok(out)
    }

    /// Total spend recorded for a day
    pub fn spent_on(&self, day: NaiveDate) -> DispatchResult<f64> {
        self.update(|days| (false, days.days.get(&day).copied().unwrap_or(0.0)))
    }

    /// Add spend to a day unconditionally
    pub fn record(&self, day: NaiveDate, amount: f64) -> DispatchResult<()> {
        self.update(|days| {
            *days.days.entry(day).or_insert(0.0) += amount.max(0.0);
            (true, ())
        })
    }

    /// Reserve `cost` against the limits, or report why it cannot run
    pub fn try_reserve(&self, day: NaiveDate, cost: f64, limits: &CostLimits) -> DispatchResult<SpendCheck> {
        if cost > limits.per_job {
            return Ok(SpendCheck::Exceeded(format!(
                "cost limit exceeded: estimated ${:.4} is over the per-job limit of ${:.2}",
                cost, limits.per_job
            )));
        }
        self.update(|days| {
            let spent = days.days.get(&day).copied().unwrap_or(0.0);
            if spent + cost > limits.daily {
                let reason = format!(
                    "cost limit exceeded: daily budget of ${:.2} exhausted (${:.4} spent on {})",
                    limits.daily, spent, day
                );
                return (false, SpendCheck::Exceeded(reason));
            }
            days.days.insert(day, spent + cost);
            debug!(%day, cost, total = spent + cost, "Spend reserved");
            (true, SpendCheck::Reserved)
        })
    }

    /// Return a reservation that was not used
    pub fn refund(&self, day: NaiveDate, cost: f64) -> DispatchResult<()> {
        self.update(|days| {
            if let Some(spent) = days.days.get_mut(&day) {
                *spent = (*spent - cost).max(0.0);
            }
            (true, ())
        })
    }
}
