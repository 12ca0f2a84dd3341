//! Per-task cost accounting

use crate::task::ContentTask;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Running cost of one task against its optional ceiling
///
/// `spent` only ever grows, and a call is admitted only when it keeps
/// `spent` at or below the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    spent: f64,
    ceiling: Option<f64>,
}

impl CostLedger {
    pub fn new(spent: f64, ceiling: Option<f64>) -> Self {
        Self {
            spent: spent.max(0.0),
            ceiling,
        }
    }

    /// Ledger without a ceiling
    pub fn unlimited() -> Self {
        Self::new(0.0, None)
    }

    /// Ledger seeded from a task, falling back to the configured default ceiling
    pub fn for_task(task: &ContentTask, default_ceiling: Option<f64>) -> Self {
        Self::new(
            task.cost_accumulated,
            task.input.budget_ceiling.or(default_ceiling),
        )
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    pub fn remaining(&self) -> Option<f64> {
        self.ceiling.map(|c| (c - self.spent).max(0.0))
    }

    /// Refuse a call whose estimated cost would push spending past the ceiling
    pub fn check(&self, requested: f64) -> Result<()> {
        if let Some(ceiling) = self.ceiling {
            // Small epsilon so that 0.4 + 0.4 + 0.2 still fits a 1.0 ceiling.
            if self.spent + requested > ceiling + 1e-9 {
                return Err(Error::BudgetExceeded {
                    spent: self.spent,
                    ceiling,
                    requested,
                });
            }
        }
        Ok(())
    }

    pub fn charge(&mut self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.spent += amount;
        }
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_refuses_overspend() {
        let mut ledger = CostLedger::new(0.0, Some(1.0));
        for _ in 0..2 {
            ledger.check(0.4).unwrap();
            ledger.charge(0.4);
        }
        let err = ledger.check(0.4).unwrap_err();
        assert_eq!(err.category(), "budget_exceeded");
        assert!((ledger.spent() - 0.8).abs() < 1e-9);
        assert!((ledger.remaining().unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_exact_fit_is_admitted() {
        let mut ledger = CostLedger::new(0.8, Some(1.0));
        ledger.check(0.2).unwrap();
        ledger.charge(0.2);
        assert!(ledger.check(0.01).is_err());
    }

    #[test]
    fn test_charge_is_monotonic() {
        let mut ledger = CostLedger::unlimited();
        ledger.charge(0.5);
        ledger.charge(-3.0);
        ledger.charge(f64::NAN);
        assert_eq!(ledger.spent(), 0.5);
        assert!(ledger.check(1_000.0).is_ok());
        assert!(ledger.remaining().is_none());
    }
}
