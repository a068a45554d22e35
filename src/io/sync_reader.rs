//! Synchronous CSV reader with iterator interface
//!
//! Provides a streaming iterator over script operations from a CSV file.
//! Delegates CSV format concerns to the csv_format module.
//!
//! # Iterator Interface
//!
//! SyncReader implements the Iterator trait, yielding `Result<Operation, String>`
//! for each CSV row:
//!
//! ```no_run
//! use double_entry_ledger::io::sync_reader::SyncReader;
//! use std::path::Path;
//!
//! let reader = SyncReader::new(Path::new("script.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(operation) => println!("Applying: {:?}", operation),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `new()`
//! - Individual record parsing errors are yielded as Err variants in the iterator
//! - Line numbers are included in error messages for debugging

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::Operation;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::path::Path;

/// Synchronous CSV reader
///
/// Reads one record at a time; memory use does not grow with the file.
#[derive(Debug)]
pub struct SyncReader {
    reader: csv::Reader<File>,
    line_num: usize,
}

impl SyncReader {
    /// Create a new SyncReader from a file path
    ///
    /// The CSV reader is configured to:
    /// - Trim whitespace from all fields
    /// - Allow flexible field counts (trailing optional columns may be omitted)
    /// - Use an 8KB buffer for efficient I/O
    ///
    /// # Errors
    ///
    /// Returns an error message if the file could not be opened.
    pub fn new(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self {
            reader,
            line_num: 1,
        })
    }
}

impl Iterator for SyncReader {
    type Item = Result<Operation, String>;

    /// Get the next operation from the CSV file
    ///
    /// # Returns
    ///
    /// * `Some(Ok(Operation))` - Successfully parsed record
    /// * `Some(Err(String))` - Parse or conversion error with line number
    /// * `None` - End of file reached
    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<CsvRecord>();
        let result = deserializer.next()?;
        self.line_num += 1;
        let line = self.line_num;

        Some(match result {
            Ok(csv_record) => {
                convert_csv_record(csv_record, line).map_err(|e| format!("Line {}: {}", line, e))
            }
            Err(e) => Err(format!("Line {}: CSV parse error: {}", line, e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Money, OperationKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "op,account,to,customer,amount,memo\n";

    fn create_temp_csv(rows: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(HEADER.as_bytes()).expect("Failed to write header");
        file.write_all(rows.as_bytes()).expect("Failed to write rows");
        file.flush().expect("Failed to flush temp file");
        file
    }

    #[test]
    fn test_sync_reader_fails_on_missing_file() {
        let result = SyncReader::new(Path::new("nonexistent.csv"));
        assert!(result.unwrap_err().contains("Failed to open file"));
    }

    #[test]
    fn test_sync_reader_iterates_operations() {
        let file = create_temp_csv(
            "register,,,alice,,alice@example.com\n\
             open,A,,alice,1000.00,\n\
             transfer,A,B,,12.34,rent\n",
        );

        let operations: Vec<_> = SyncReader::new(file.path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(operations.len(), 3);
        assert_eq!(operations[0].kind, OperationKind::Register);
        assert_eq!(operations[0].memo.as_deref(), Some("alice@example.com"));
        assert_eq!(operations[1].amount, Some(Money::from_minor(100_000)));
        assert_eq!(operations[2].to.as_deref(), Some("B"));
        assert_eq!(operations[2].amount, Some(Money::from_minor(1_234)));
        assert_eq!(operations[2].line, 4);
    }

    #[test]
    fn test_sync_reader_includes_line_numbers_in_errors() {
        let file = create_temp_csv(
            "deposit,A,,,1.00,\n\
             deposit,A,,,lots,\n\
             bounce,A,,,1.00,\n\
             deposit,A,,,2.00,\n",
        );

        let records: Vec<_> = SyncReader::new(file.path()).unwrap().collect();

        assert_eq!(records.len(), 4);
        assert!(records[0].is_ok());
        assert!(records[1].as_ref().unwrap_err().contains("Line 3"));
        assert!(records[2].as_ref().unwrap_err().contains("Line 4"));
        assert_eq!(records[3].as_ref().unwrap().line, 5);
    }

    #[test]
    fn test_sync_reader_handles_whitespace() {
        let file = create_temp_csv("  deposit  ,  A  , , ,  5.00  , \n");

        let records: Vec<_> = SyncReader::new(file.path()).unwrap().collect();
        let operation = records[0].as_ref().unwrap();
        assert_eq!(operation.kind, OperationKind::Deposit);
        assert_eq!(operation.account.as_deref(), Some("A"));
        assert_eq!(operation.amount, Some(Money::from_minor(500)));
        assert_eq!(operation.memo, None);
    }
}
