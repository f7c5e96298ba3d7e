mod cmd;
mod core;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lotcalc", version, about = "Realized gains for crypto exchange exports")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the per-operation gain/loss report and print totals
    Report(cmd::report::ReportCommand),
    /// Realized totals per disposed asset
    Summary(cmd::summary::SummaryCommand),
    /// Lots and balances remaining in the ledger
    Holdings(cmd::holdings::HoldingsCommand),
    /// Describe the expected input formats
    Schema(cmd::schema::SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Report(report) => report.exec(),
        Command::Summary(summary) => summary.exec(),
        Command::Holdings(holdings) => holdings.exec(),
        Command::Schema(schema) => schema.exec(),
    }
}
