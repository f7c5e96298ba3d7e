pub mod engine;
pub mod export;
pub mod grouping;
pub mod ledger;
pub mod rates;
pub mod report;

/// Column of a CSV input format, generated by `#[derive(CsvSchema)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvField {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

// Flat public surface for domain types and functions.
#[allow(unused_imports)]
pub use self::{
    engine::{process, CalcError, DisposalOutcome, ProcessedOperation},
    export::{read_export, ExportError, ExportOptions, ExportRecord, Row},
    grouping::{group_rows, GroupingError, Leg, Operation},
    ledger::{AccountingMethod, AssetLedger, Ledger, LedgerError, Lot, Withdrawal, EPS},
    rates::{RateError, RateRecord, RateTable, ResolvedRate},
    report::{calculate, AssetTotals, CalcReport, CsvOptions, ReportOutput},
};
