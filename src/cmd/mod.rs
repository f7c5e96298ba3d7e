pub mod holdings;
pub mod report;
pub mod schema;
pub mod summary;

use crate::core::export::{self, ExportOptions, DEFAULT_EXCLUDED_OPERATIONS};
use crate::core::ledger::{AccountingMethod, LedgerError};
use crate::core::rates::{RateError, RateTable, DEFAULT_FOREIGN_UNIT, DEFAULT_LOOKBACK_DAYS};
use crate::core::report::{calculate, CalcReport};
use anyhow::Context;
use chrono_tz::Tz;
use clap::Args;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Inputs and settings shared by every calculating command.
#[derive(Args, Debug, Clone)]
pub struct CalcArgs {
    /// Exchange transaction history export (semicolon delimited). Reads stdin with "-".
    #[arg(short, long)]
    pub input: PathBuf,

    /// Daily rate file of `date,rate` lines converting the foreign unit to the reference currency
    #[arg(short, long)]
    pub rates: PathBuf,

    /// Lot accounting method: FIFO, LIFO or AVG
    #[arg(short, long, default_value = "AVG", value_parser = parse_method)]
    pub method: AccountingMethod,

    /// Time zone the UTC export timestamps are converted to
    #[arg(long, default_value = "Europe/Tallinn", value_parser = parse_timezone)]
    pub timezone: Tz,

    /// Foreign unit covered by the rate file; assets containing it are priced
    #[arg(long, default_value = DEFAULT_FOREIGN_UNIT)]
    pub foreign_unit: String,

    /// Reference currency label used in printed totals
    #[arg(long, default_value = "EUR")]
    pub reference_currency: String,

    /// Days to search backward for a missing rate
    #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS)]
    pub lookback_days: u32,

    /// Additional operation label to drop (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Do not drop the built-in list of transfer and earn operations
    #[arg(long)]
    pub no_default_excludes: bool,
}

fn parse_method(s: &str) -> Result<AccountingMethod, String> {
    s.parse().map_err(|e: LedgerError| e.to_string())
}

fn parse_timezone(s: &str) -> Result<Tz, String> {
    s.parse::<Tz>().map_err(|e| e.to_string())
}

impl CalcArgs {
    pub fn export_options(&self) -> ExportOptions {
        let mut excluded_operations: HashSet<String> = if self.no_default_excludes {
            Default::default()
        } else {
            DEFAULT_EXCLUDED_OPERATIONS.iter().map(|s| s.to_string()).collect()
        };
        excluded_operations.extend(self.exclude.iter().cloned());
        ExportOptions {
            timezone: self.timezone,
            excluded_operations,
        }
    }

    /// Read both inputs and run the calculation.
    pub fn load(&self) -> anyhow::Result<CalcReport> {
        let rates_file = File::open(&self.rates)
            .with_context(|| format!("Failed to open rate file {}", self.rates.display()))?;
        let rates = RateTable::read_csv(BufReader::new(rates_file), &self.foreign_unit, self.lookback_days)
            .with_context(|| format!("Failed to read rate file {}", self.rates.display()))?;
        if rates.is_empty() {
            log::warn!(
                "Rate file {} contains no {} rates",
                self.rates.display(),
                rates.foreign_unit()
            );
        }

        let options = self.export_options();
        let rows = read_input(&self.input, |reader| export::read_export(reader, &options))?;

        let report = calculate(&rows, &rates, self.method).inspect_err(|err| {
            if err.is_invariant_violation() {
                log::error!("Ledger consistency check failed: {:?}", err.ledger_error());
            } else if let Some(RateError::RateNotFound { .. }) = err.rate_error() {
                log::warn!("Extend the rate file or raise --lookback-days");
            }
        })?;
        Ok(report)
    }
}

/// Read from a file, or stdin with "-"
fn read_input<T, E, F>(path: &Path, parse: F) -> anyhow::Result<T>
where
    F: FnOnce(Box<dyn Read>) -> Result<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    let reader: Box<dyn Read> = if path.as_os_str() == "-" {
        let mut buffer = Vec::new();
        io::stdin().lock().read_to_end(&mut buffer)?;
        if buffer.is_empty() {
            anyhow::bail!("No input received. Provide a file or pipe data to stdin.");
        }
        Box::new(io::Cursor::new(buffer))
    } else {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Box::new(BufReader::new(file))
    };
    parse(reader).with_context(|| format!("Failed to read {}", path.display()))
}

fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

fn format_money(amount: Decimal, currency: &str) -> String {
    format!("{:.2} {}", amount, currency)
}
