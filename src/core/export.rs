use super::CsvField;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use lotcalc_derive::CsvSchema;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::str::FromStr;

/// Zone the exchange's UTC timestamps are converted to before grouping.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Tallinn;

/// Label of fee rows, which merge into the operation they belong to.
pub const FEE_LABEL: &str = "Fee";

/// Administrative and internal-transfer operations that never move value.
pub const DEFAULT_EXCLUDED_OPERATIONS: &[&str] = &[
    "Transfer from Main Account/Futures to Margin Account",
    "Transfer from Margin Account to Main Account/Futures",
    "Main and Funding Account Transfer",
    "Simple Earn Flexible Subscription",
    "Simple Earn Flexible Redemption",
    "Fiat Deposit",
    "Small Assets Exchange BNB",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("line {line}: invalid UTC_Time '{value}'")]
    InvalidTimestamp { line: u64, value: String },
    #[error("line {line}: invalid Change '{value}'")]
    InvalidAmount { line: u64, value: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Raw record of the exchange transaction history export.
#[derive(Debug, Clone, Deserialize, CsvSchema)]
pub struct ExportRecord {
    /// Exchange account owner
    #[serde(rename = "User_ID")]
    pub user_id: String,
    /// Time of the ledger entry in UTC (YYYY-MM-DD hh:mm:ss)
    #[serde(rename = "UTC_Time")]
    pub utc_time: String,
    /// Wallet the entry was booked on (Spot, Funding, ...)
    #[serde(rename = "Account")]
    pub account: String,
    /// Operation label (Buy, Sell, Fee, Deposit, ...)
    #[serde(rename = "Operation")]
    pub operation: String,
    /// Asset symbol
    #[serde(rename = "Coin")]
    pub coin: String,
    /// Signed change of the asset balance
    #[serde(rename = "Change")]
    pub change: String,
    /// Free-form remark
    #[serde(rename = "Remark", default)]
    pub remark: Option<String>,
}

/// A parsed export row ready for grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub local_time: DateTime<Tz>,
    pub label: String,
    pub asset: String,
    pub change: Decimal,
}

impl Row {
    pub fn is_fee(&self) -> bool {
        self.label == FEE_LABEL
    }
}

/// How raw export records become rows.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub timezone: Tz,
    pub excluded_operations: HashSet<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            timezone: DEFAULT_TIMEZONE,
            excluded_operations: DEFAULT_EXCLUDED_OPERATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Read the semicolon delimited export, drop excluded operations and order rows by time.
pub fn read_export<R: Read>(reader: R, options: &ExportOptions) -> Result<Vec<Row>, ExportError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();
    let mut excluded = 0usize;
    for result in rdr.records() {
        let record = result?;
        let line = record.position().map_or(0, |pos| pos.line());
        let record: ExportRecord = record.deserialize(Some(&headers))?;
        if options.excluded_operations.contains(&record.operation) {
            log::debug!("Skipping excluded operation '{}' on line {}", record.operation, line);
            excluded += 1;
            continue;
        }
        rows.push(parse_record(record, line, options.timezone)?);
    }

    if excluded > 0 {
        log::warn!("Skipped {} rows with excluded operation labels", excluded);
    }
    log::info!("Read {} export rows", rows.len());

    // stable: rows sharing a timestamp keep their file order
    rows.sort_by_key(|row| row.local_time);
    Ok(rows)
}

fn parse_record(record: ExportRecord, line: u64, timezone: Tz) -> Result<Row, ExportError> {
    let utc = NaiveDateTime::parse_from_str(&record.utc_time, TIMESTAMP_FORMAT).map_err(|_| {
        ExportError::InvalidTimestamp {
            line,
            value: record.utc_time.clone(),
        }
    })?;
    let change = parse_amount(&record.change).ok_or_else(|| ExportError::InvalidAmount {
        line,
        value: record.change.clone(),
    })?;

    Ok(Row {
        local_time: Utc.from_utc_datetime(&utc).with_timezone(&timezone),
        label: record.operation,
        asset: record.coin,
        change,
    })
}

/// Plain or scientific notation, as exchanges emit tiny dust amounts as `1E-8`.
fn parse_amount(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}
