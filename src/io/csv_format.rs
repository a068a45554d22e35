//! CSV format handling for ledger scripts and balance output
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserialization
//! - Conversion from CSV records to script operations
//! - Account summary output serialization
//!
//! All functions are pure (no I/O) for easy testing.

use crate::session::AccountSummary;
use crate::types::{Money, Operation, OperationKind};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

/// CSV record structure for deserialization
///
/// Matches the script format with columns: op, account, to, customer, amount, memo.
/// Every column but `op` is optional; which ones an operation needs is
/// checked when it is applied.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct CsvRecord {
    pub op: String,
    pub account: Option<String>,
    pub to: Option<String>,
    pub customer: Option<String>,
    pub amount: Option<String>,
    pub memo: Option<String>,
}

/// Treat empty and whitespace-only fields as absent
fn present(field: Option<String>) -> Option<String> {
    field
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a decimal major-unit amount into minor units
///
/// # Errors
///
/// Returns an error message if the text is not a decimal number or has more
/// than two fractional digits.
pub fn parse_amount(text: &str) -> Result<Money, String> {
    let major = Decimal::from_str(text.trim()).map_err(|_| format!("Invalid amount '{}'", text))?;
    Money::from_major(major).map_err(|e| e.to_string())
}

/// Convert a CsvRecord to an Operation
///
/// This function:
/// - Parses the operation name (case-insensitive)
/// - Parses the amount from decimal major units into minor units (if present)
/// - Drops empty optional fields
///
/// # Arguments
///
/// * `csv_record` - The deserialized CSV record
/// * `line` - Line number of the record in the script file
///
/// # Returns
///
/// Result containing either:
/// - Ok(Operation) - Successfully converted record
/// - Err(String) - Error message describing the conversion failure
pub fn convert_csv_record(csv_record: CsvRecord, line: usize) -> Result<Operation, String> {
    let kind = OperationKind::parse(csv_record.op.trim())
        .ok_or_else(|| format!("Invalid operation '{}'", csv_record.op))?;

    let amount = match present(csv_record.amount) {
        Some(text) => Some(parse_amount(&text)?),
        None => None,
    };

    Ok(Operation {
        line,
        kind,
        account: present(csv_record.account),
        to: present(csv_record.to),
        customer: present(csv_record.customer),
        amount,
        memo: present(csv_record.memo),
    })
}

/// Write account summaries to CSV format
///
/// Writes accounts in CSV format with columns: account, customer, balance.
/// Balances are written in major units with two decimal places. Accounts are
/// sorted by label for deterministic output.
///
/// # Arguments
///
/// * `summaries` - Slice of account summaries to write
/// * `output` - Mutable reference to a writer for outputting CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_summaries_csv(summaries: &[AccountSummary], output: &mut dyn Write) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["account", "customer", "balance"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted = summaries.to_vec();
    sorted.sort_by(|a, b| a.label.cmp(&b.label));

    for summary in sorted {
        writer
            .write_record(&[
                summary.label,
                summary.customer,
                format!("{:.2}", summary.balance.to_major()),
            ])
            .map_err(|e| format!("Failed to write account record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
