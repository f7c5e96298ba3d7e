use super::engine::{process, CalcError, ProcessedOperation};
use super::export::Row;
use super::grouping::group_rows;
use super::ledger::{AccountingMethod, Ledger};
use super::rates::RateTable;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Assets whose running balance is shown on every report row by default.
pub const DEFAULT_TRACKED_ASSETS: [&str; 2] = ["BTC", "USDT"];

/// Everything computed in one run.
#[derive(Debug, Clone)]
pub struct CalcReport {
    pub method: AccountingMethod,
    pub operations: Vec<ProcessedOperation>,
    pub ledger: Ledger,
}

/// Group rows, then value and book every operation against a fresh ledger.
pub fn calculate(rows: &[Row], rates: &RateTable, method: AccountingMethod) -> Result<CalcReport, CalcError> {
    let operations = group_rows(rows)?;
    let mut ledger = Ledger::new();
    let operations = process(operations, &mut ledger, rates, method)?;
    log::info!("Processed {} operations using {}", operations.len(), method);
    Ok(CalcReport {
        method,
        operations,
        ledger,
    })
}

/// Realized totals for one disposed asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetTotals {
    pub disposals: usize,
    pub proceeds: Decimal,
    pub cost_basis: Decimal,
    pub profit: Decimal,
    pub gains: Decimal,
}

impl CalcReport {
    fn disposals(&self) -> impl Iterator<Item = &ProcessedOperation> {
        self.operations.iter().filter(|op| op.disposal.is_some())
    }

    pub fn disposal_count(&self) -> usize {
        self.disposals().count()
    }

    /// Net realized profit, losses included
    pub fn total_profit(&self) -> Decimal {
        self.operations.iter().filter_map(|op| op.realized_profit()).sum()
    }

    /// Sum of profitable disposals only
    pub fn total_gains(&self) -> Decimal {
        self.operations
            .iter()
            .filter_map(|op| op.disposal.as_ref())
            .filter(|d| d.is_gain)
            .map(|d| d.realized_profit)
            .sum()
    }

    pub fn asset_totals(&self) -> BTreeMap<String, AssetTotals> {
        let mut totals: BTreeMap<String, AssetTotals> = BTreeMap::new();
        for op in self.disposals() {
            let (Some(disposed), Some(outcome)) = (&op.operation.disposed, &op.disposal) else {
                continue;
            };
            let entry = totals.entry(disposed.asset.clone()).or_default();
            entry.disposals += 1;
            entry.proceeds += op.valuation;
            entry.cost_basis += outcome.cost_basis;
            entry.profit += outcome.realized_profit;
            if outcome.is_gain {
                entry.gains += outcome.realized_profit;
            }
        }
        totals
    }

    /// Ledger as it stood after the last operation on or before `date`.
    pub fn ledger_at(&self, date: NaiveDate) -> Option<&Ledger> {
        self.operations
            .iter()
            .take_while(|op| op.operation.local_time.date_naive() <= date)
            .last()
            .map(|op| &op.ledger_after)
    }

    /// Write one delimited row per operation.
    pub fn write_csv<W: Write>(&self, writer: W, options: &CsvOptions) -> csv::Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(options.delimiter)
            .from_writer(writer);

        let mut header: Vec<String> = [
            "time",
            "disposed_asset",
            "acquired_asset",
            "disposed_amount",
            "acquired_amount",
            "is_gain",
            "realized_profit",
            "cost_basis",
            "proceeds",
            "reference_rate",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(options.tracked_assets.iter().map(|a| format!("{}_balance", a.to_lowercase())));
        header.push("first_lot_unit_cost".to_string());
        header.push("consumed_lots".to_string());
        wtr.write_record(&header)?;

        for op in &self.operations {
            let disposed = op.operation.disposed.as_ref();
            let acquired = op.operation.acquired.as_ref();
            let outcome = op.disposal.as_ref();

            let mut record = vec![
                op.operation.local_time.format("%Y-%m-%d %H:%M:%S%:z").to_string(),
                disposed.map(|l| l.asset.clone()).unwrap_or_default(),
                acquired.map(|l| l.asset.clone()).unwrap_or_default(),
                format_optional(disposed.map(|l| l.amount)),
                format_optional(acquired.map(|l| l.amount)),
                outcome.map(|d| d.is_gain.to_string()).unwrap_or_default(),
                format_optional(outcome.map(|d| d.realized_profit.round_dp(options.precision))),
                format_optional(outcome.map(|d| d.cost_basis.round_dp(options.precision))),
                op.valuation.round_dp(options.precision).normalize().to_string(),
                op.rate.rate.normalize().to_string(),
            ];
            record.extend(
                options
                    .tracked_assets
                    .iter()
                    .map(|asset| op.ledger_after.balance(asset).normalize().to_string()),
            );
            record.push(format_optional(
                outcome
                    .and_then(|d| d.consumed.first())
                    .map(|lot| lot.unit_cost.round_dp(options.precision)),
            ));
            record.push(
                outcome
                    .map(|d| {
                        d.consumed
                            .iter()
                            .map(|lot| lot.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default(),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_output(&self, reference_currency: &str) -> ReportOutput {
        ReportOutput {
            method: self.method.to_string(),
            reference_currency: reference_currency.to_string(),
            total_profit: self.total_profit(),
            total_gains: self.total_gains(),
            operations: self
                .operations
                .iter()
                .map(|op| OperationOutput {
                    time: op.operation.local_time.to_rfc3339(),
                    label: op.operation.label.clone(),
                    disposed_asset: op.operation.disposed.as_ref().map(|l| l.asset.clone()),
                    disposed_amount: op.operation.disposed.as_ref().map(|l| l.amount),
                    acquired_asset: op.operation.acquired.as_ref().map(|l| l.asset.clone()),
                    acquired_amount: op.operation.acquired.as_ref().map(|l| l.amount),
                    valuation: op.valuation,
                    reference_rate: op.rate.rate,
                    rate_date: op.rate.date.format("%Y-%m-%d").to_string(),
                    cost_basis: op.disposal.as_ref().map(|d| d.cost_basis),
                    realized_profit: op.realized_profit(),
                    is_gain: op.is_gain(),
                    consumed_lots: op
                        .disposal
                        .as_ref()
                        .map(|d| {
                            d.consumed
                                .iter()
                                .map(|lot| LotOutput {
                                    amount: lot.amount,
                                    reference_value: lot.reference_value,
                                    unit_cost: lot.unit_cost,
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// Layout of the delimited report.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub tracked_assets: Vec<String>,
    /// Decimal places for reference currency values
    pub precision: u32,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: b';',
            tracked_assets: DEFAULT_TRACKED_ASSETS.iter().map(|s| s.to_string()).collect(),
            precision: 8,
        }
    }
}

fn format_optional(value: Option<Decimal>) -> String {
    value.map(|v| v.normalize().to_string()).unwrap_or_default()
}

/// JSON form of a run
#[derive(Debug, Serialize, JsonSchema)]
pub struct ReportOutput {
    /// FIFO, LIFO or AVG
    pub method: String,
    pub reference_currency: String,
    #[schemars(with = "f64")]
    pub total_profit: Decimal,
    /// Profit of gaining disposals only
    #[schemars(with = "f64")]
    pub total_gains: Decimal,
    pub operations: Vec<OperationOutput>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct OperationOutput {
    /// Local time of the operation (RFC3339)
    pub time: String,
    pub label: String,
    pub disposed_asset: Option<String>,
    #[schemars(with = "Option<f64>")]
    pub disposed_amount: Option<Decimal>,
    pub acquired_asset: Option<String>,
    #[schemars(with = "Option<f64>")]
    pub acquired_amount: Option<Decimal>,
    /// Reference currency value of the priced leg
    #[schemars(with = "f64")]
    pub valuation: Decimal,
    #[schemars(with = "f64")]
    pub reference_rate: Decimal,
    /// Date the rate was published under
    pub rate_date: String,
    #[schemars(with = "Option<f64>")]
    pub cost_basis: Option<Decimal>,
    #[schemars(with = "Option<f64>")]
    pub realized_profit: Option<Decimal>,
    pub is_gain: Option<bool>,
    pub consumed_lots: Vec<LotOutput>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LotOutput {
    #[schemars(with = "f64")]
    pub amount: Decimal,
    #[schemars(with = "f64")]
    pub reference_value: Decimal,
    #[schemars(with = "f64")]
    pub unit_cost: Decimal,
}
