//! Report command - per-operation gain/loss report

use super::{format_money, CalcArgs};
use crate::core::report::{CalcReport, CsvOptions, DEFAULT_TRACKED_ASSETS};
use anyhow::Context;
use clap::Args;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ReportCommand {
    #[command(flatten)]
    calc: CalcArgs,

    /// Output file for the CSV report ("-" for stdout). Defaults to results_<METHOD>.csv
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Assets whose running balance gets its own column
    #[arg(long = "track", value_delimiter = ',', default_values_t = DEFAULT_TRACKED_ASSETS.map(String::from))]
    track: Vec<String>,

    /// Field delimiter of the CSV report
    #[arg(long, default_value_t = ';')]
    delimiter: char,

    /// Print the report as JSON to stdout instead of writing CSV
    #[arg(long)]
    json: bool,
}

impl ReportCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        if !self.delimiter.is_ascii() {
            anyhow::bail!("Delimiter must be a single ASCII character, got '{}'", self.delimiter);
        }
        let report = self.calc.load()?;

        if self.json {
            let output = report.to_output(&self.calc.reference_currency);
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        let options = CsvOptions {
            delimiter: self.delimiter as u8,
            tracked_assets: self.track.iter().map(|a| a.to_uppercase()).collect(),
            ..CsvOptions::default()
        };
        let path = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("results_{}.csv", report.method)));

        if path.as_os_str() == "-" {
            report.write_csv(io::stdout().lock(), &options)?;
        } else {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            report.write_csv(BufWriter::new(file), &options)?;
            log::info!("Wrote {} operations to {}", report.operations.len(), path.display());
            self.print_totals(&report);
        }
        Ok(())
    }

    fn print_totals(&self, report: &CalcReport) {
        let currency = &self.calc.reference_currency;
        println!("Method: {}", report.method);
        println!("Operations: {} ({} disposals)", report.operations.len(), report.disposal_count());
        println!("Total profit: {}", format_money(report.total_profit(), currency));
        println!("Plus profit: {}", format_money(report.total_gains(), currency));
    }
}
