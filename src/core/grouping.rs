use super::export::{Row, FEE_LABEL};
use chrono::DateTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GroupingError {
    #[error("operation at {time} already has {side} asset {existing}, cannot merge {incoming} ({label})")]
    InconsistentMerge {
        time: String,
        side: LegSide,
        existing: String,
        incoming: String,
        label: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LegSide {
    Acquired,
    Disposed,
}

impl fmt::Display for LegSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegSide::Acquired => write!(f, "acquired"),
            LegSide::Disposed => write!(f, "disposed"),
        }
    }
}

/// One side of an operation: a single asset and the signed sum of its rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leg {
    pub asset: String,
    pub amount: Decimal,
}

impl Leg {
    pub fn magnitude(&self) -> Decimal {
        self.amount.abs()
    }
}

/// Rows of one logical exchange event merged together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub local_time: DateTime<Tz>,
    pub label: String,
    pub acquired: Option<Leg>,
    pub disposed: Option<Leg>,
}

impl Operation {
    fn leg_mut(&mut self, side: LegSide) -> &mut Option<Leg> {
        match side {
            LegSide::Acquired => &mut self.acquired,
            LegSide::Disposed => &mut self.disposed,
        }
    }

    fn holds(&self, side: LegSide, asset: &str) -> bool {
        let leg = match side {
            LegSide::Acquired => &self.acquired,
            LegSide::Disposed => &self.disposed,
        };
        leg.as_ref().is_some_and(|leg| leg.asset == asset)
    }

    /// A fee charged in the disposed asset belongs with the disposal, any other fee with the acquisition.
    fn fee_side(&self, asset: &str) -> LegSide {
        if self.holds(LegSide::Disposed, asset) && !self.holds(LegSide::Acquired, asset) {
            LegSide::Disposed
        } else {
            LegSide::Acquired
        }
    }

    fn add(&mut self, side: LegSide, asset: &str, change: Decimal) -> Result<(), GroupingError> {
        let time = self.local_time;
        let label = self.label.clone();
        let slot = self.leg_mut(side);
        match slot {
            Some(leg) if leg.asset != asset => {
                return Err(GroupingError::InconsistentMerge {
                    time: time.to_rfc3339(),
                    side,
                    existing: leg.asset.clone(),
                    incoming: asset.to_string(),
                    label,
                })
            }
            Some(leg) => leg.amount += change,
            None => {
                *slot = Some(Leg {
                    asset: asset.to_string(),
                    amount: change,
                })
            }
        }
        log::debug!("Merged {} {} into {} {} leg at {}", change, asset, label, side, time);
        Ok(())
    }
}

/// An operation still receiving rows. Fee rows wait until it closes so their
/// routing does not depend on where they sit among rows of the same instant.
struct OpenOperation {
    operation: Operation,
    fees: Vec<Leg>,
}

impl OpenOperation {
    fn new(row: &Row) -> Result<Self, GroupingError> {
        let mut open = OpenOperation {
            operation: Operation {
                local_time: row.local_time,
                label: row.label.clone(),
                acquired: None,
                disposed: None,
            },
            fees: Vec::new(),
        };
        open.push(row)?;
        Ok(open)
    }

    /// Same instant, and same label unless one side is a fee.
    fn accepts(&self, row: &Row) -> bool {
        self.operation.local_time == row.local_time
            && (self.operation.label == row.label || row.is_fee() || self.operation.label == FEE_LABEL)
    }

    fn push(&mut self, row: &Row) -> Result<(), GroupingError> {
        if row.is_fee() {
            self.fees.push(Leg {
                asset: row.asset.clone(),
                amount: row.change,
            });
            return Ok(());
        }

        self.operation.label = row.label.clone();
        let side = if row.change >= Decimal::ZERO {
            LegSide::Acquired
        } else {
            LegSide::Disposed
        };
        self.operation.add(side, &row.asset, row.change)
    }

    fn close(self) -> Result<Operation, GroupingError> {
        let mut operation = self.operation;
        for fee in self.fees {
            let side = operation.fee_side(&fee.asset);
            operation.add(side, &fee.asset, fee.amount)?;
        }
        Ok(operation)
    }
}

/// Fold time-ordered rows into operations, looking back only at the previous one.
pub fn group_rows(rows: &[Row]) -> Result<Vec<Operation>, GroupingError> {
    let mut operations: Vec<Operation> = Vec::new();
    let mut current: Option<OpenOperation> = None;
    for row in rows {
        match current.as_mut() {
            Some(open) if open.accepts(row) => open.push(row)?,
            _ => {
                if let Some(done) = current.replace(OpenOperation::new(row)?) {
                    operations.push(done.close()?);
                }
            }
        }
    }
    if let Some(done) = current {
        operations.push(done.close()?);
    }
    log::info!("Grouped {} rows into {} operations", rows.len(), operations.len());
    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};
    use rust_decimal_macros::dec;

    fn row(time: &str, label: &str, asset: &str, change: Decimal) -> Row {
        let naive = NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S").unwrap();
        Row {
            local_time: chrono_tz::Europe::Tallinn.from_local_datetime(&naive).unwrap(),
            label: label.to_string(),
            asset: asset.to_string(),
            change,
        }
    }

    fn leg(asset: &str, amount: Decimal) -> Option<Leg> {
        Some(Leg {
            asset: asset.to_string(),
            amount,
        })
    }

    #[test]
    fn sell_with_fee_in_sold_asset() {
        let rows = vec![
            row("2022-05-01 12:00:00", "Sell", "X", dec!(-100)),
            row("2022-05-01 12:00:00", "Fee", "X", dec!(-1)),
        ];
        let ops = group_rows(&rows).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].label, "Sell");
        assert_eq!(ops[0].disposed, leg("X", dec!(-101)));
        assert_eq!(ops[0].acquired, None);
    }

    #[test]
    fn fee_before_sell_joins_disposal() {
        let rows = vec![
            row("2022-05-01 12:00:00", "Fee", "X", dec!(-1)),
            row("2022-05-01 12:00:00", "Sell", "X", dec!(-100)),
        ];
        let ops = group_rows(&rows).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].label, "Sell");
        assert_eq!(ops[0].disposed, leg("X", dec!(-101)));
        assert_eq!(ops[0].acquired, None);
    }

    #[test]
    fn fee_position_does_not_change_operation() {
        let sell = row("2022-05-01 12:00:00", "Sell", "BTC", dec!(-0.01));
        let proceeds = row("2022-05-01 12:00:00", "Sell", "USDT", dec!(300));
        let fee = row("2022-05-01 12:00:00", "Fee", "USDT", dec!(-0.3));

        let expected = group_rows(&[sell.clone(), proceeds.clone(), fee.clone()]).unwrap();
        assert_eq!(expected[0].acquired, leg("USDT", dec!(299.7)));
        assert_eq!(expected[0].disposed, leg("BTC", dec!(-0.01)));
        assert_eq!(
            group_rows(&[fee.clone(), sell.clone(), proceeds.clone()]).unwrap(),
            expected
        );
        assert_eq!(group_rows(&[sell, fee, proceeds]).unwrap(), expected);
    }

    #[test]
    fn buy_with_fee_in_bought_asset() {
        let rows = vec![
            row("2022-05-01 12:00:00", "Buy", "BTC", dec!(0.01)),
            row("2022-05-01 12:00:00", "Buy", "USDT", dec!(-300)),
            row("2022-05-01 12:00:00", "Fee", "BTC", dec!(-0.00001)),
        ];
        let ops = group_rows(&rows).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].acquired, leg("BTC", dec!(0.00999)));
        assert_eq!(ops[0].disposed, leg("USDT", dec!(-300)));
    }

    #[test]
    fn fee_first_does_not_keep_its_label() {
        let rows = vec![
            row("2022-05-01 12:00:00", "Fee", "BTC", dec!(-0.00001)),
            row("2022-05-01 12:00:00", "Buy", "BTC", dec!(0.01)),
            row("2022-05-01 12:00:00", "Buy", "USDT", dec!(-300)),
        ];
        let ops = group_rows(&rows).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].label, "Buy");
        assert_eq!(ops[0].acquired, leg("BTC", dec!(0.00999)));
    }

    #[test]
    fn different_time_or_label_starts_new_operation() {
        let rows = vec![
            row("2022-05-01 12:00:00", "Buy", "BTC", dec!(0.01)),
            row("2022-05-01 12:00:01", "Buy", "USDT", dec!(-300)),
            row("2022-05-01 12:00:01", "Deposit", "USDT", dec!(50)),
        ];
        let ops = group_rows(&rows).unwrap();
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn same_asset_rows_accumulate() {
        let rows = vec![
            row("2022-05-01 12:00:00", "Buy", "BTC", dec!(0.01)),
            row("2022-05-01 12:00:00", "Buy", "BTC", dec!(0.02)),
            row("2022-05-01 12:00:00", "Buy", "USDT", dec!(-300)),
            row("2022-05-01 12:00:00", "Buy", "USDT", dec!(-600)),
        ];
        let ops = group_rows(&rows).unwrap();
        assert_eq!(ops[0].acquired, leg("BTC", dec!(0.03)));
        assert_eq!(ops[0].disposed, leg("USDT", dec!(-900)));
    }

    #[test]
    fn mixed_assets_in_one_leg_fail() {
        let rows = vec![
            row("2022-05-01 12:00:00", "Buy", "BTC", dec!(0.01)),
            row("2022-05-01 12:00:00", "Buy", "USDT", dec!(-300)),
            row("2022-05-01 12:00:00", "Fee", "BNB", dec!(-0.001)),
        ];
        let err = group_rows(&rows).unwrap_err();
        let GroupingError::InconsistentMerge {
            side,
            existing,
            incoming,
            ..
        } = err;
        assert_eq!(side, LegSide::Acquired);
        assert_eq!(existing, "BTC");
        assert_eq!(incoming, "BNB");
    }

    #[test]
    fn grouping_is_repeatable() {
        let rows = vec![
            row("2022-05-01 12:00:00", "Deposit", "USDT", dec!(1000)),
            row("2022-05-02 09:00:00", "Buy", "BTC", dec!(0.02)),
            row("2022-05-02 09:00:00", "Buy", "USDT", dec!(-600)),
            row("2022-05-02 09:00:00", "Fee", "BTC", dec!(-0.00002)),
        ];
        assert_eq!(group_rows(&rows).unwrap(), group_rows(&rows).unwrap());
    }
}
