//! Summary command - realized totals per disposed asset

use super::{format_amount, format_money, CalcArgs};
use crate::core::report::AssetTotals;
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct SummaryCommand {
    #[command(flatten)]
    calc: CalcArgs,

    /// Filter by disposed asset (e.g., BTC, ETH)
    #[arg(short, long)]
    asset: Option<String>,

    /// Output as JSON instead of formatted table
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Tabled)]
struct SummaryRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Disposals")]
    disposals: usize,
    #[tabled(rename = "Proceeds")]
    proceeds: String,
    #[tabled(rename = "Cost Basis")]
    cost_basis: String,
    #[tabled(rename = "Profit")]
    profit: String,
    #[tabled(rename = "Gains")]
    gains: String,
}

#[derive(Debug, Serialize)]
struct SummaryData {
    method: String,
    reference_currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    asset: Option<String>,
    disposal_count: usize,
    total_profit: String,
    total_gains: String,
    assets: BTreeMap<String, AssetTotals>,
}

impl SummaryCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let report = self.calc.load()?;
        let mut totals = report.asset_totals();
        if let Some(ref asset) = self.asset {
            totals.retain(|name, _| name.eq_ignore_ascii_case(asset));
        }

        let disposal_count: usize = totals.values().map(|t| t.disposals).sum();
        let total_profit: Decimal = totals.values().map(|t| t.profit).sum();
        let total_gains: Decimal = totals.values().map(|t| t.gains).sum();

        if self.json {
            let data = SummaryData {
                method: report.method.to_string(),
                reference_currency: self.calc.reference_currency.clone(),
                asset: self.asset.as_ref().map(|a| a.to_uppercase()),
                disposal_count,
                total_profit: format!("{:.2}", total_profit),
                total_gains: format!("{:.2}", total_gains),
                assets: totals,
            };
            println!("{}", serde_json::to_string_pretty(&data)?);
            return Ok(());
        }

        if totals.is_empty() {
            println!("No disposals found matching filters");
            return Ok(());
        }

        let currency = &self.calc.reference_currency;
        let rows: Vec<SummaryRow> = totals
            .iter()
            .map(|(asset, t)| SummaryRow {
                asset: asset.clone(),
                disposals: t.disposals,
                proceeds: format_money(t.proceeds, currency),
                cost_basis: format_money(t.cost_basis, currency),
                profit: format_money(t.profit, currency),
                gains: format_money(t.gains, currency),
            })
            .collect();

        println!();
        println!("REALIZED GAINS ({})", report.method);
        println!();
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);
        println!();
        println!("Disposals: {}", disposal_count);
        println!(
            "Total profit: {} | Plus profit: {}",
            format_money(total_profit, currency),
            format_money(total_gains, currency)
        );
        if let Some(ref asset) = self.asset {
            let asset = asset.to_uppercase();
            if let Some(entry) = report.ledger.get(&asset).filter(|e| !e.lots.is_empty()) {
                println!(
                    "Still held: {} {} ({} lots, cost {})",
                    format_amount(entry.total_amount),
                    asset,
                    entry.lots.len(),
                    format_money(entry.total_reference_value, currency)
                );
            }
        }
        println!();
        Ok(())
    }
}
