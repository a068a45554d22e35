//! Asynchronous CSV reader with batch interface
//!
//! Provides batched reading of script operations from a CSV file for the
//! async strategy.
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of Operations
//!                  ↓
//!           csv_format module
//!           (CsvRecord, convert_csv_record)
//! ```

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::Operation;
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;

/// Asynchronous CSV reader
///
/// Maintains streaming behavior: only one batch is held in memory at a time.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    line_num: usize,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    /// Create a new AsyncReader from an async reader
    ///
    /// # Arguments
    ///
    /// * `reader` - Async reader providing CSV data
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            line_num: 1,
        }
    }

    /// Read a batch of operations
    ///
    /// Reads records until `batch_size` operations were converted or the file
    /// ends. Invalid records are logged and skipped.
    ///
    /// # Returns
    ///
    /// The converted operations in file order. An empty vector means the end
    /// of the file was reached.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<Operation> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<CsvRecord>();

        while batch.len() < batch_size {
            let Some(result) = records.next().await else {
                break;
            };
            self.line_num += 1;

            match result {
                Ok(csv_record) => match convert_csv_record(csv_record, self.line_num) {
                    Ok(operation) => batch.push(operation),
                    Err(e) => tracing::warn!(line = self.line_num, error = %e, "skipping record"),
                },
                Err(e) => tracing::warn!(line = self.line_num, error = %e, "CSV parse error"),
            }
        }

        batch
    }
}
