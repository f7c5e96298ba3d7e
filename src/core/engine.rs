use super::grouping::{GroupingError, Leg, Operation};
use super::ledger::{AccountingMethod, Ledger, LedgerError, Lot, EPS};
use super::rates::{RateError, RateTable, ResolvedRate};
use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    #[error(transparent)]
    Grouping(#[from] GroupingError),
    #[error("cannot value {label} operation at {time}")]
    Valuation {
        time: String,
        label: String,
        #[source]
        source: RateError,
    },
    #[error("cannot book {label} operation at {time}")]
    Ledger {
        time: String,
        label: String,
        #[source]
        source: LedgerError,
    },
    #[error("operation at {time} has neither an acquired nor a disposed asset")]
    EmptyOperation { time: String },
}

impl CalcError {
    /// True when the ledger's own consistency checks failed rather than the input.
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            CalcError::Ledger { source, .. } => source.is_invariant_violation(),
            _ => false,
        }
    }

    pub fn ledger_error(&self) -> Option<&LedgerError> {
        match self {
            CalcError::Ledger { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn rate_error(&self) -> Option<&RateError> {
        match self {
            CalcError::Valuation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Cost basis and profit realized by an operation's disposal leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposalOutcome {
    pub cost_basis: Decimal,
    pub realized_profit: Decimal,
    pub is_gain: bool,
    pub consumed: Vec<Lot>,
}

/// An operation after valuation, with the ledger as it stood once it was booked.
#[derive(Debug, Clone)]
pub struct ProcessedOperation {
    pub operation: Operation,
    /// Reference currency value of the priced leg; the sale proceeds when something was disposed
    pub valuation: Decimal,
    pub rate: ResolvedRate,
    pub disposal: Option<DisposalOutcome>,
    pub ledger_after: Ledger,
}

impl ProcessedOperation {
    pub fn realized_profit(&self) -> Option<Decimal> {
        self.disposal.as_ref().map(|d| d.realized_profit)
    }

    pub fn is_gain(&self) -> Option<bool> {
        self.disposal.as_ref().map(|d| d.is_gain)
    }
}

/// The disposed leg when it is priced, otherwise the acquired leg.
fn priced_leg<'a>(operation: &'a Operation, rates: &RateTable) -> Option<&'a Leg> {
    match (&operation.disposed, &operation.acquired) {
        (Some(disposed), _) if rates.is_priced(&disposed.asset) => Some(disposed),
        (_, Some(acquired)) => Some(acquired),
        (disposed, None) => disposed.as_ref(),
    }
}

/// Value, book and snapshot every operation in order; the first failure aborts the run.
pub fn process(
    operations: Vec<Operation>,
    ledger: &mut Ledger,
    rates: &RateTable,
    method: AccountingMethod,
) -> Result<Vec<ProcessedOperation>, CalcError> {
    operations
        .into_iter()
        .map(|operation| process_one(operation, ledger, rates, method))
        .collect()
}

fn process_one(
    operation: Operation,
    ledger: &mut Ledger,
    rates: &RateTable,
    method: AccountingMethod,
) -> Result<ProcessedOperation, CalcError> {
    let time = || operation.local_time.to_rfc3339();
    let ledger_err = |source| CalcError::Ledger {
        time: time(),
        label: operation.label.clone(),
        source,
    };

    let leg = priced_leg(&operation, rates).ok_or_else(|| CalcError::EmptyOperation { time: time() })?;
    let (valuation, rate) = rates
        .value(&leg.asset, leg.magnitude(), operation.local_time.date_naive())
        .map_err(|source| CalcError::Valuation {
            time: time(),
            label: operation.label.clone(),
            source,
        })?;

    let disposal = match &operation.disposed {
        Some(disposed) => {
            let withdrawal = ledger
                .withdraw(&disposed.asset, disposed.magnitude(), method)
                .map_err(ledger_err)?;
            let realized_profit = valuation - withdrawal.cost_basis;
            Some(DisposalOutcome {
                cost_basis: withdrawal.cost_basis,
                realized_profit,
                is_gain: realized_profit > EPS,
                consumed: withdrawal.consumed,
            })
        }
        None => None,
    };

    if let Some(acquired) = &operation.acquired {
        ledger
            .deposit(&acquired.asset, acquired.amount, valuation)
            .map_err(ledger_err)?;
    }

    if let Some(outcome) = &disposal {
        log::debug!(
            "{} {}: valuation={}, cost_basis={}, profit={}",
            operation.local_time,
            operation.label,
            valuation,
            outcome.cost_basis,
            outcome.realized_profit
        );
    }

    Ok(ProcessedOperation {
        operation,
        valuation,
        rate,
        disposal,
        ledger_after: ledger.clone(),
    })
}
