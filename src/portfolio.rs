//! Portfolio CSV import and export.
//!
//! Column detection is loose: a header matches a field when it contains the
//! field's keyword, case-insensitively (`"Company Name"` is the name column,
//! `"Market Value ($)"` the market value column). A file must carry both a
//! name-like and a symbol-like column, even if every cell in one is empty.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::StringRecord;

use crate::enrichment::{FailureKind, PortfolioRow};
use crate::error::{Error, Result, ResultExt};

/// Header positions of the fields we understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Columns {
    pub name: usize,
    pub symbol: usize,
    pub shares: Option<usize>,
    pub price: Option<usize>,
    pub market_value: Option<usize>,
}

impl Columns {
    /// Locate columns by keyword.
    ///
    /// Name and symbol take the first matching header; shares, price and
    /// market value take the last.
    pub fn detect(headers: &StringRecord) -> Result<Self> {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let first = |keyword: &str| lowered.iter().position(|h| h.contains(keyword));
        let last = |keyword: &str| lowered.iter().rposition(|h| h.contains(keyword));

        let name = first("name").ok_or_else(|| {
            Error::invalid_format("must contain a COMPANY NAME field or similar")
        })?;
        let symbol = first("symbol")
            .ok_or_else(|| Error::invalid_format("must contain a SYMBOL field or similar"))?;

        Ok(Self {
            name,
            symbol,
            shares: last("shares"),
            price: last("price"),
            market_value: last("market"),
        })
    }
}

/// Read a portfolio CSV file.
pub fn read_csv(path: &Path) -> Result<Vec<PortfolioRow>> {
    if !path.exists() {
        return Err(Error::not_found(path));
    }
    let file = File::open(path).with_context(format!("opening {}", path.display()))?;
    parse_csv(file).with_context(format!("reading {}", path.display()))
}

/// Parse portfolio rows from CSV text. Row ids start at 1.
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<PortfolioRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let columns = Columns::detect(&headers)?;

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(format!("row {}", idx + 1))?;
        rows.push(parse_row(idx as u64 + 1, &record, &columns));
    }

    tracing::info!("Parsed {} portfolio rows", rows.len());
    Ok(rows)
}

fn parse_row(id: u64, record: &StringRecord, columns: &Columns) -> PortfolioRow {
    let text = |idx: usize| {
        record
            .get(idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let number = |idx: Option<usize>| idx.and_then(|i| record.get(i)).and_then(parse_number);

    PortfolioRow {
        id,
        name: text(columns.name),
        symbol: text(columns.symbol),
        shares: number(columns.shares),
        price: number(columns.price),
        market_value: number(columns.market_value),
        ..Default::default()
    }
}

/// Parse a numeric cell, tolerating currency signs and thousands separators.
fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    match cleaned.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!("Ignoring non-numeric cell {:?}", cell);
            None
        }
    }
}

const EXPORT_HEADER: [&str; 10] = [
    "id",
    "name",
    "symbol",
    "shares",
    "price",
    "market_value",
    "lookup_status",
    "is_enriched",
    "failure_kind",
    "failure_reason",
];

/// Write enriched rows as CSV, including lookup status columns.
pub fn write_rows<W: Write>(writer: W, rows: &[PortfolioRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(EXPORT_HEADER)?;

    let number = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
    for row in rows {
        let kind = row.failure_kind.map(FailureKind::as_str).unwrap_or_default();

        wtr.write_record([
            row.id.to_string(),
            row.name.clone().unwrap_or_default(),
            row.symbol.clone().unwrap_or_default(),
            number(row.shares),
            number(row.price),
            number(row.market_value),
            row.lookup_status.to_string(),
            row.is_enriched.to_string(),
            kind.to_string(),
            row.failure_reason.clone().unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write enriched rows to a CSV file.
pub fn write_csv(path: &Path, rows: &[PortfolioRow]) -> Result<()> {
    let file = File::create(path).with_context(format!("creating {}", path.display()))?;
    write_rows(file, rows)
}
