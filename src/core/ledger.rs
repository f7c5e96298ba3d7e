use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Tolerance for all quantity and value comparisons in the ledger.
pub const EPS: Decimal = dec!(0.000001);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("negative balance for {asset}: amount={amount}, value={value}")]
    NegativeBalance {
        asset: String,
        amount: Decimal,
        value: Decimal,
    },
    #[error("lot accounting failed for {asset}: {reason} (amount {amount})")]
    LotAccounting {
        asset: String,
        amount: Decimal,
        reason: &'static str,
    },
    #[error("insufficient {asset}: requested {requested}, short by {shortfall}")]
    InsufficientBalance {
        asset: String,
        requested: Decimal,
        shortfall: Decimal,
    },
    #[error("unsupported accounting method '{0}' (expected FIFO, LIFO or AVG)")]
    UnsupportedMethod(String),
}

impl LedgerError {
    /// True for breaches of the ledger's own invariants, as opposed to failures
    /// caused by the input data or configuration.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            LedgerError::NegativeBalance { .. } | LedgerError::LotAccounting { .. }
        )
    }
}

/// Order in which lots are consumed on withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AccountingMethod {
    /// Oldest lots first
    Fifo,
    /// Newest lots first
    Lifo,
    /// Blended cost across all held lots
    #[default]
    Avg,
}

impl AccountingMethod {
    pub fn display(&self) -> &'static str {
        match self {
            AccountingMethod::Fifo => "FIFO",
            AccountingMethod::Lifo => "LIFO",
            AccountingMethod::Avg => "AVG",
        }
    }
}

impl fmt::Display for AccountingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl FromStr for AccountingMethod {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FIFO" => Ok(AccountingMethod::Fifo),
            "LIFO" => Ok(AccountingMethod::Lifo),
            "AVG" | "AVERAGE" => Ok(AccountingMethod::Avg),
            _ => Err(LedgerError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// One acquisition tranche of an asset, or the consumed fragment of one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lot {
    pub amount: Decimal,
    pub reference_value: Decimal,
    pub unit_cost: Decimal,
}

impl Lot {
    fn new(amount: Decimal, reference_value: Decimal) -> Self {
        Lot {
            amount,
            reference_value,
            unit_cost: reference_value / amount,
        }
    }

    fn fragment(amount: Decimal, unit_cost: Decimal) -> Self {
        Lot {
            amount,
            reference_value: amount * unit_cost,
            unit_cost,
        }
    }
}

impl fmt::Display for Lot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.amount.normalize(), self.unit_cost.round_dp(8).normalize())
    }
}

/// Held lots and running totals for one asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetLedger {
    pub total_amount: Decimal,
    pub total_reference_value: Decimal,
    pub lots: VecDeque<Lot>,
}

impl AssetLedger {
    /// Average cost of the units currently held
    pub fn unit_cost(&self) -> Decimal {
        if self.total_amount.abs() <= EPS {
            Decimal::ZERO
        } else {
            self.total_reference_value / self.total_amount
        }
    }

    fn check_balance(&self, asset: &str) -> Result<(), LedgerError> {
        if self.total_amount < -EPS || self.total_reference_value < -EPS {
            return Err(LedgerError::NegativeBalance {
                asset: asset.to_string(),
                amount: self.total_amount,
                value: self.total_reference_value,
            });
        }
        Ok(())
    }

    /// Rewrites every lot at the blended cost of the whole holding.
    fn blend_costs(&mut self) {
        if self.total_amount <= EPS {
            return;
        }
        let unit_cost = self.total_reference_value / self.total_amount;
        for lot in self.lots.iter_mut() {
            lot.unit_cost = unit_cost;
            lot.reference_value = lot.amount * unit_cost;
        }
    }

    fn take_front(&mut self, from_back: bool) -> Option<Lot> {
        if from_back {
            self.lots.pop_back()
        } else {
            self.lots.pop_front()
        }
    }

    fn front_mut(&mut self, from_back: bool) -> Option<&mut Lot> {
        if from_back {
            self.lots.back_mut()
        } else {
            self.lots.front_mut()
        }
    }

    fn consume(&mut self, asset: &str, amount: Decimal, from_back: bool) -> Result<Withdrawal, LedgerError> {
        let mut remaining = amount;
        let mut withdrawal = Withdrawal::default();

        while let Some(lot) = self.front_mut(from_back) {
            if remaining < -EPS {
                return Err(LedgerError::LotAccounting {
                    asset: asset.to_string(),
                    amount: remaining,
                    reason: "withdrawal overshot the held lots",
                });
            }

            if lot.amount > remaining && (lot.amount - remaining).abs() >= EPS {
                let fragment = Lot::fragment(remaining, lot.unit_cost);
                lot.amount -= fragment.amount;
                lot.reference_value -= fragment.reference_value;
                remaining = Decimal::ZERO;
                self.release(&fragment, &mut withdrawal);
                break;
            }

            // whole lot goes; stop if it matched the remainder within tolerance
            let exact = (lot.amount - remaining).abs() < EPS;
            let consumed = lot.clone();
            self.take_front(from_back);
            remaining -= consumed.amount;
            self.release(&consumed, &mut withdrawal);
            if exact {
                break;
            }
        }

        if remaining > EPS {
            return Err(LedgerError::InsufficientBalance {
                asset: asset.to_string(),
                requested: amount,
                shortfall: remaining,
            });
        }
        if remaining < -EPS {
            return Err(LedgerError::LotAccounting {
                asset: asset.to_string(),
                amount: remaining,
                reason: "withdrawal consumed more than requested",
            });
        }
        Ok(withdrawal)
    }

    fn release(&mut self, lot: &Lot, withdrawal: &mut Withdrawal) {
        self.total_amount -= lot.amount;
        self.total_reference_value -= lot.reference_value;
        withdrawal.cost_basis += lot.reference_value;
        withdrawal.consumed.push(lot.clone());
    }
}

/// Result of consuming lots for a disposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    /// Reference value of everything consumed
    pub cost_basis: Decimal,
    /// Consumed lots and partial fragments, in consumption order
    pub consumed: Vec<Lot>,
}

/// Per-asset lot ledger for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ledger {
    assets: BTreeMap<String, AssetLedger>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset: &str) -> Option<&AssetLedger> {
        self.assets.get(asset)
    }

    pub fn assets(&self) -> impl Iterator<Item = (&String, &AssetLedger)> {
        self.assets.iter()
    }

    /// Held amount of an asset, zero when it was never acquired
    pub fn balance(&self, asset: &str) -> Decimal {
        self.assets
            .get(asset)
            .map(|entry| entry.total_amount)
            .unwrap_or(Decimal::ZERO)
    }

    /// Add a new lot for an acquisition.
    pub fn deposit(&mut self, asset: &str, amount: Decimal, reference_value: Decimal) -> Result<(), LedgerError> {
        if amount <= EPS {
            return Err(LedgerError::LotAccounting {
                asset: asset.to_string(),
                amount,
                reason: "cannot open a lot for a non-positive amount",
            });
        }

        let entry = self.assets.entry(asset.to_string()).or_default();
        let lot = Lot::new(amount, reference_value);
        entry.total_amount += lot.amount;
        entry.total_reference_value += lot.reference_value;
        log::debug!(
            "Ledger {} DEPOSIT: amount={}, value={}, unit_cost={}. Totals: amount={}, value={}",
            asset,
            lot.amount,
            lot.reference_value,
            lot.unit_cost,
            entry.total_amount,
            entry.total_reference_value
        );
        entry.lots.push_back(lot);
        entry.check_balance(asset)
    }

    /// Consume lots for a disposal, returning the released cost basis.
    pub fn withdraw(
        &mut self,
        asset: &str,
        amount: Decimal,
        method: AccountingMethod,
    ) -> Result<Withdrawal, LedgerError> {
        let Some(entry) = self.assets.get_mut(asset) else {
            if amount > EPS {
                return Err(LedgerError::InsufficientBalance {
                    asset: asset.to_string(),
                    requested: amount,
                    shortfall: amount,
                });
            }
            return Ok(Withdrawal::default());
        };

        let withdrawal = match method {
            AccountingMethod::Fifo => entry.consume(asset, amount, false)?,
            AccountingMethod::Lifo => entry.consume(asset, amount, true)?,
            AccountingMethod::Avg => {
                entry.blend_costs();
                entry.consume(asset, amount, false)?
            }
        };
        log::debug!(
            "Ledger {} WITHDRAW ({}): amount={}, cost_basis={}, lots={}. Remaining: amount={}, value={}",
            asset,
            method,
            amount,
            withdrawal.cost_basis,
            withdrawal.consumed.len(),
            entry.total_amount,
            entry.total_reference_value
        );
        entry.check_balance(asset)?;
        Ok(withdrawal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Decimal, expected: Decimal) {
        assert!(
            (actual - expected).abs() < EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn ledger_with(asset: &str, lots: &[(Decimal, Decimal)]) -> Ledger {
        let mut ledger = Ledger::new();
        for (amount, value) in lots {
            ledger.deposit(asset, *amount, *value).unwrap();
        }
        ledger
    }

    #[test]
    fn deposit_creates_lot_with_unit_cost() {
        let ledger = ledger_with("X", &[(dec!(10), dec!(100))]);
        let entry = ledger.get("X").unwrap();
        assert_eq!(entry.total_amount, dec!(10));
        assert_eq!(entry.total_reference_value, dec!(100));
        assert_eq!(entry.lots.len(), 1);
        assert_eq!(entry.lots[0].unit_cost, dec!(10));
    }

    #[test]
    fn deposit_rejects_empty_lot() {
        let mut ledger = Ledger::new();
        let err = ledger.deposit("X", dec!(0), dec!(5)).unwrap_err();
        assert!(matches!(err, LedgerError::LotAccounting { .. }));
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn fifo_partial_withdrawal_splits_oldest_lot() {
        let mut ledger = ledger_with("X", &[(dec!(10), dec!(100)), (dec!(5), dec!(100))]);

        let withdrawal = ledger.withdraw("X", dec!(4), AccountingMethod::Fifo).unwrap();
        assert_eq!(withdrawal.cost_basis, dec!(40));
        assert_eq!(withdrawal.consumed.len(), 1);
        assert_eq!(withdrawal.consumed[0].amount, dec!(4));

        let entry = ledger.get("X").unwrap();
        assert_eq!(entry.lots[0].amount, dec!(6));
        assert_eq!(entry.lots[0].reference_value, dec!(60));
        assert_eq!(entry.lots[0].unit_cost, dec!(10));
        assert_eq!(entry.total_amount, dec!(11));
        assert_eq!(entry.total_reference_value, dec!(160));
    }

    #[test]
    fn fifo_exact_match_removes_lot() {
        let mut ledger = ledger_with("X", &[(dec!(10), dec!(100)), (dec!(5), dec!(100))]);

        let withdrawal = ledger.withdraw("X", dec!(10), AccountingMethod::Fifo).unwrap();
        assert_eq!(withdrawal.cost_basis, dec!(100));

        let entry = ledger.get("X").unwrap();
        assert_eq!(entry.lots.len(), 1);
        assert_eq!(entry.lots[0].unit_cost, dec!(20));
    }

    #[test]
    fn fifo_within_tolerance_counts_as_exact() {
        let mut ledger = ledger_with("X", &[(dec!(10), dec!(100))]);

        let withdrawal = ledger
            .withdraw("X", dec!(10.0000001), AccountingMethod::Fifo)
            .unwrap();
        assert_eq!(withdrawal.cost_basis, dec!(100));
        assert!(ledger.get("X").unwrap().lots.is_empty());
    }

    #[test]
    fn fifo_spans_multiple_lots() {
        let mut ledger = ledger_with(
            "X",
            &[(dec!(2), dec!(20)), (dec!(3), dec!(60)), (dec!(5), dec!(150))],
        );

        let withdrawal = ledger.withdraw("X", dec!(6), AccountingMethod::Fifo).unwrap();
        // 2@10 + 3@20 + 1@30
        assert_eq!(withdrawal.cost_basis, dec!(110));
        let amounts: Vec<_> = withdrawal.consumed.iter().map(|l| l.amount).collect();
        assert_eq!(amounts, vec![dec!(2), dec!(3), dec!(1)]);

        let entry = ledger.get("X").unwrap();
        assert_eq!(entry.lots.len(), 1);
        assert_eq!(entry.lots[0].amount, dec!(4));
        assert_eq!(entry.total_reference_value, dec!(120));
    }

    #[test]
    fn lifo_consumes_newest_first() {
        let mut ledger = ledger_with("X", &[(dec!(5), dec!(50)), (dec!(5), dec!(100))]);

        let withdrawal = ledger.withdraw("X", dec!(6), AccountingMethod::Lifo).unwrap();
        // 5@20 + 1@10
        assert_eq!(withdrawal.cost_basis, dec!(110));
        assert_eq!(withdrawal.consumed[0].unit_cost, dec!(20));
        assert_eq!(withdrawal.consumed[1].unit_cost, dec!(10));

        let entry = ledger.get("X").unwrap();
        assert_eq!(entry.lots.len(), 1);
        assert_eq!(entry.lots[0].amount, dec!(4));
        assert_eq!(entry.lots[0].unit_cost, dec!(10));
    }

    #[test]
    fn avg_blends_cost_before_consuming() {
        let mut ledger = ledger_with("X", &[(dec!(5), dec!(50)), (dec!(5), dec!(100))]);

        let withdrawal = ledger.withdraw("X", dec!(6), AccountingMethod::Avg).unwrap();
        assert_eq!(withdrawal.cost_basis, dec!(90));
        assert!(withdrawal.consumed.iter().all(|l| l.unit_cost == dec!(15)));

        let entry = ledger.get("X").unwrap();
        assert_eq!(entry.total_amount, dec!(4));
        assert_eq!(entry.total_reference_value, dec!(60));
    }

    #[test]
    fn avg_collapses_remaining_lots_to_one_cost() {
        let mut ledger = ledger_with(
            "X",
            &[(dec!(3), dec!(10)), (dec!(7), dec!(90)), (dec!(11), dec!(13))],
        );
        let before = ledger.get("X").unwrap().clone();
        let blended = before.total_reference_value / before.total_amount;

        ledger.withdraw("X", dec!(1), AccountingMethod::Avg).unwrap();

        let entry = ledger.get("X").unwrap();
        assert_eq!(entry.lots.len(), 3);
        for lot in &entry.lots {
            assert_eq!(lot.unit_cost, blended);
        }
    }

    #[test]
    fn insufficient_balance_reports_shortfall() {
        let mut ledger = ledger_with("X", &[(dec!(2), dec!(20))]);

        let err = ledger.withdraw("X", dec!(3), AccountingMethod::Fifo).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                asset: "X".to_string(),
                requested: dec!(3),
                shortfall: dec!(1),
            }
        );
        assert!(!err.is_invariant_violation());
    }

    #[test]
    fn withdraw_unknown_asset_is_insufficient() {
        let mut ledger = Ledger::new();
        let err = ledger.withdraw("Y", dec!(1), AccountingMethod::Lifo).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn conservation_and_non_negativity_hold() {
        let mut ledger = Ledger::new();
        let mut expected = Decimal::ZERO;
        let steps: &[(bool, Decimal, Decimal)] = &[
            (true, dec!(1.5), dec!(30)),
            (true, dec!(0.25), dec!(7)),
            (false, dec!(0.6), Decimal::ZERO),
            (true, dec!(3), dec!(33)),
            (false, dec!(2.15), Decimal::ZERO),
            (false, dec!(2), Decimal::ZERO),
        ];

        for method in [AccountingMethod::Fifo, AccountingMethod::Lifo, AccountingMethod::Avg] {
            for (is_deposit, amount, value) in steps {
                if *is_deposit {
                    ledger.deposit("X", *amount, *value).unwrap();
                    expected += amount;
                } else {
                    ledger.withdraw("X", *amount, method).unwrap();
                    expected -= amount;
                }
                let entry = ledger.get("X").unwrap();
                assert_close(entry.total_amount, expected);
                assert_close(entry.lots.iter().map(|l| l.amount).sum(), entry.total_amount);
                assert_close(
                    entry.lots.iter().map(|l| l.reference_value).sum(),
                    entry.total_reference_value,
                );
                assert!(entry.total_amount >= -EPS);
                assert!(entry.total_reference_value >= -EPS);
            }
        }
    }

    #[test]
    fn parse_method() {
        assert_eq!("fifo".parse::<AccountingMethod>().unwrap(), AccountingMethod::Fifo);
        assert_eq!("LIFO".parse::<AccountingMethod>().unwrap(), AccountingMethod::Lifo);
        assert_eq!("Avg".parse::<AccountingMethod>().unwrap(), AccountingMethod::Avg);
        assert_eq!(
            "HIFO".parse::<AccountingMethod>().unwrap_err(),
            LedgerError::UnsupportedMethod("HIFO".to_string())
        );
    }
}
