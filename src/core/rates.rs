use super::CsvField;
use chrono::{Duration, NaiveDate};
use lotcalc_derive::CsvSchema;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;

/// Days searched backward from the requested date.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 5;

/// Foreign unit tracked by default; any asset whose symbol contains it is priced.
pub const DEFAULT_FOREIGN_UNIT: &str = "USD";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateError {
    #[error("no rate model for asset {asset} (only {unit}-denominated assets are priced)")]
    UnsupportedAsset { asset: String, unit: String },
    #[error("no {unit} rate for {asset} on {date} or the {lookback_days} days before")]
    RateNotFound {
        asset: String,
        unit: String,
        date: NaiveDate,
        lookback_days: u32,
    },
}

/// One line of the rate file: `YYYY-MM-DD,rate`, no header.
#[derive(Debug, Clone, Deserialize, CsvSchema)]
pub struct RateRecord {
    /// Calendar date (YYYY-MM-DD)
    pub date: NaiveDate,
    /// Reference currency units per one foreign unit
    pub rate: Decimal,
}

/// A rate together with the date it was published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRate {
    pub rate: Decimal,
    pub date: NaiveDate,
}

/// Daily foreign unit to reference currency rates.
#[derive(Debug, Clone)]
pub struct RateTable {
    rates: HashMap<NaiveDate, Decimal>,
    foreign_unit: String,
    lookback_days: u32,
}

impl Default for RateTable {
    fn default() -> Self {
        RateTable {
            rates: HashMap::new(),
            foreign_unit: DEFAULT_FOREIGN_UNIT.to_string(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

impl RateTable {
    pub fn new(foreign_unit: &str, lookback_days: u32) -> Self {
        RateTable {
            rates: HashMap::new(),
            foreign_unit: foreign_unit.to_string(),
            lookback_days,
        }
    }

    pub fn read_csv<R: Read>(reader: R, foreign_unit: &str, lookback_days: u32) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut table = RateTable::new(foreign_unit, lookback_days);
        for record in rdr.deserialize::<RateRecord>() {
            let record = record?;
            table.insert(record.date, record.rate);
        }
        log::info!("Loaded {} daily {} rates", table.len(), table.foreign_unit);
        Ok(table)
    }

    pub fn insert(&mut self, date: NaiveDate, rate: Decimal) {
        if let Some(previous) = self.rates.insert(date, rate) {
            log::debug!("Duplicate rate for {}: {} replaced by {}", date, previous, rate);
        }
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn foreign_unit(&self) -> &str {
        &self.foreign_unit
    }

    /// Whether the asset is denominated in the tracked foreign unit
    pub fn is_priced(&self, asset: &str) -> bool {
        asset.contains(&self.foreign_unit)
    }

    /// Finds the rate for `date`, stepping back one day at a time within the lookback window.
    pub fn resolve(&self, asset: &str, date: NaiveDate) -> Result<ResolvedRate, RateError> {
        if !self.is_priced(asset) {
            return Err(RateError::UnsupportedAsset {
                asset: asset.to_string(),
                unit: self.foreign_unit.clone(),
            });
        }

        (0..=self.lookback_days)
            .map(|days_back| date - Duration::days(days_back.into()))
            .find_map(|day| self.rates.get(&day).map(|rate| ResolvedRate { rate: *rate, date: day }))
            .ok_or_else(|| RateError::RateNotFound {
                asset: asset.to_string(),
                unit: self.foreign_unit.clone(),
                date,
                lookback_days: self.lookback_days,
            })
    }

    /// Reference currency value of `amount` units of `asset` on `date`.
    pub fn value(&self, asset: &str, amount: Decimal, date: NaiveDate) -> Result<(Decimal, ResolvedRate), RateError> {
        let resolved = self.resolve(asset, date)?;
        Ok((amount * resolved.rate, resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn table() -> RateTable {
        let mut table = RateTable::default();
        table.insert(date("2022-03-01"), dec!(0.9));
        table.insert(date("2022-03-04"), dec!(0.92));
        table
    }

    #[test]
    fn exact_date_hit() {
        let resolved = table().resolve("USDT", date("2022-03-01")).unwrap();
        assert_eq!(resolved.rate, dec!(0.9));
        assert_eq!(resolved.date, date("2022-03-01"));
    }

    #[test]
    fn steps_back_to_nearest_earlier_rate() {
        let resolved = table().resolve("BUSD", date("2022-03-07")).unwrap();
        assert_eq!(resolved.rate, dec!(0.92));
        assert_eq!(resolved.date, date("2022-03-04"));
    }

    #[test]
    fn lookback_window_is_bounded() {
        let table = table();
        assert!(table.resolve("USDT", date("2022-03-09")).is_ok());
        let err = table.resolve("USDT", date("2022-03-10")).unwrap_err();
        assert_eq!(
            err,
            RateError::RateNotFound {
                asset: "USDT".to_string(),
                unit: "USD".to_string(),
                date: date("2022-03-10"),
                lookback_days: 5,
            }
        );
    }

    #[test]
    fn never_looks_forward() {
        assert!(matches!(
            table().resolve("USDT", date("2022-02-28")),
            Err(RateError::RateNotFound { .. })
        ));
    }

    #[test]
    fn unsupported_asset() {
        let err = table().resolve("BTC", date("2022-03-01")).unwrap_err();
        assert!(matches!(err, RateError::UnsupportedAsset { .. }));
    }

    #[test]
    fn value_multiplies_by_rate() {
        let (value, resolved) = table().value("USDT", dec!(100), date("2022-03-02")).unwrap();
        assert_eq!(value, dec!(90));
        assert_eq!(resolved.date, date("2022-03-01"));
    }

    #[test]
    fn read_csv_without_header() {
        let data = "2022-01-03,0.8841\n2022-01-04, 0.8857\n2022-01-04,0.886\n";
        let table = RateTable::read_csv(data.as_bytes(), "USD", 5).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("USDC", date("2022-01-04")).unwrap().rate, dec!(0.886));
    }

    #[test]
    fn empty_file_keeps_its_foreign_unit() {
        let table = RateTable::read_csv("".as_bytes(), "GBP", 5).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.foreign_unit(), "GBP");
        assert!(table.is_priced("GBPT"));
    }
}
