//! Schema command - print expected input formats

use crate::core::export::ExportRecord;
use crate::core::rates::RateRecord;
use crate::core::report::ReportOutput;
use crate::core::CsvField;
use clap::{Args, ValueEnum};
use schemars::schema_for;

#[derive(Args, Debug)]
pub struct SchemaCommand {
    /// Output format: csv-header, csv-fields or json-schema
    #[arg(value_enum, default_value = "csv-fields")]
    format: SchemaFormat,

    /// Input format to describe (ignored for json-schema)
    #[arg(short, long, value_enum, default_value_t = InputKind::Export)]
    input: InputKind,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemaFormat {
    /// CSV header row with column names
    CsvHeader,
    /// CSV column descriptions
    CsvFields,
    /// JSON Schema of the `report --json` output
    JsonSchema,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum InputKind {
    /// Exchange transaction history export
    #[default]
    Export,
    /// Daily rate file
    Rates,
}

impl SchemaCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        match self.format {
            SchemaFormat::JsonSchema => {
                let schema = schema_for!(ReportOutput);
                println!("{}", serde_json::to_string_pretty(&schema)?);
            }
            SchemaFormat::CsvHeader => match self.input {
                InputKind::Export => println!("{}", ExportRecord::csv_columns().join(";")),
                InputKind::Rates => println!("{}", RateRecord::csv_columns().join(",")),
            },
            SchemaFormat::CsvFields => match self.input {
                InputKind::Export => {
                    print_fields("Exchange Export Format", ExportRecord::csv_schema());
                    println!("Delimiter is ';' and the header row is required.");
                    println!("Excluded operation labels are dropped before grouping.");
                }
                InputKind::Rates => {
                    print_fields("Rate File Format", RateRecord::csv_schema());
                    println!("Delimiter is ',' and there is no header row.");
                    println!("Missing dates fall back to the nearest earlier rate.");
                }
            },
        }
        Ok(())
    }
}

fn print_fields(title: &str, fields: &[CsvField]) {
    println!("{}", title);
    println!("{}", "=".repeat(title.len()));
    println!();
    for field in fields {
        let req = if field.required { "required" } else { "optional" };
        println!("{:20} ({:8})  {}", field.name, req, field.description);
    }
    println!();
}
