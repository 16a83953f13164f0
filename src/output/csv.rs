use std::path::Path;

use crate::atomic::write_atomic;
use crate::types::DataSet;

/// Comma-delimited, header row first. Nulls are empty fields.
pub(super) fn write_csv(data: &DataSet, path: &Path) -> Result<(), String> {
    write_atomic(path, |out| -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&data.schema.columns)?;
        let mut record: Vec<String> = Vec::with_capacity(data.schema.len());
        for row in &data.rows {
            record.clear();
            record.extend(row.iter().map(ToString::to_string));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    })
    .map_err(|e| e.to_string())
}
