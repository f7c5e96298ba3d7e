//! Holdings command - lots and balances left in the ledger

use super::{format_amount, format_money, CalcArgs};
use crate::core::ledger::{AssetLedger, Ledger};
use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct HoldingsCommand {
    #[command(flatten)]
    calc: CalcArgs,

    /// Show the ledger as it stood at the end of this local date (YYYY-MM-DD)
    #[arg(short, long)]
    until: Option<NaiveDate>,

    /// Filter by asset (e.g., BTC, USDT)
    #[arg(short, long)]
    asset: Option<String>,

    /// List individual lots instead of per-asset totals
    #[arg(long)]
    lots: bool,

    /// Output as JSON instead of formatted table
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Tabled)]
struct HoldingRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit Cost")]
    unit_cost: String,
    #[tabled(rename = "Lots")]
    lots: usize,
}

#[derive(Debug, Clone, Tabled)]
struct LotRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit Cost")]
    unit_cost: String,
}

#[derive(Debug, Serialize)]
struct HoldingsOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    until: Option<NaiveDate>,
    assets: Vec<HoldingView<'a>>,
}

#[derive(Debug, Serialize)]
struct HoldingView<'a> {
    asset: &'a str,
    #[serde(flatten)]
    ledger: &'a AssetLedger,
}

impl HoldingsCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let report = self.calc.load()?;
        let empty = Ledger::new();
        let ledger = match self.until {
            Some(date) => report.ledger_at(date).unwrap_or(&empty),
            None => &report.ledger,
        };

        let holdings: Vec<_> = ledger
            .assets()
            .filter(|(asset, _)| {
                self.asset
                    .as_deref()
                    .is_none_or(|filter| asset.eq_ignore_ascii_case(filter))
            })
            .filter(|(_, entry)| entry.total_amount != Decimal::ZERO || !entry.lots.is_empty())
            .collect();

        if self.json {
            let output = HoldingsOutput {
                until: self.until,
                assets: holdings
                    .iter()
                    .map(|(asset, ledger)| HoldingView { asset, ledger })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        if holdings.is_empty() {
            println!("No holdings found matching filters");
            return Ok(());
        }

        let currency = &self.calc.reference_currency;
        let title = self
            .until
            .map_or("HOLDINGS".to_string(), |d| format!("HOLDINGS (end of {})", d));
        println!();
        println!("{}", title);
        println!();

        let mut table = if self.lots {
            let rows: Vec<LotRow> = holdings
                .iter()
                .flat_map(|(asset, entry)| {
                    entry.lots.iter().enumerate().map(move |(i, lot)| LotRow {
                        asset: asset.to_string(),
                        index: i + 1,
                        amount: format_amount(lot.amount),
                        value: format_money(lot.reference_value, currency),
                        unit_cost: format_amount(lot.unit_cost.round_dp(8)),
                    })
                })
                .collect();
            Table::new(rows)
        } else {
            let rows: Vec<HoldingRow> = holdings
                .iter()
                .map(|(asset, entry)| HoldingRow {
                    asset: asset.to_string(),
                    amount: format_amount(entry.total_amount),
                    value: format_money(entry.total_reference_value, currency),
                    unit_cost: format_amount(entry.unit_cost().round_dp(8)),
                    lots: entry.lots.len(),
                })
                .collect();
            Table::new(rows)
        };

        table
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()));
        println!("{}", table);
        println!();
        Ok(())
    }
}
