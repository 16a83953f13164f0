use std::path::Path;

use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::atomic::write_bytes_atomic;
use crate::types::{DataSet, Value};

const MAX_ROWS: usize = 1_048_576;
const MAX_COLUMNS: usize = 16_384;

/// Single worksheet, bold header row, no index column.
pub(super) fn write_xlsx(data: &DataSet, path: &Path) -> Result<(), String> {
    if data.row_count() + 1 > MAX_ROWS {
        return Err(format!(
            "{} rows exceed the xlsx limit of {} (including the header)",
            data.row_count(),
            MAX_ROWS
        ));
    }
    if data.schema.len() > MAX_COLUMNS {
        return Err(format!(
            "{} columns exceed the xlsx limit of {MAX_COLUMNS}",
            data.schema.len()
        ));
    }

    let buffer = build_workbook(data)
        .and_then(|mut wb| wb.save_to_buffer())
        .map_err(|e| e.to_string())?;
    write_bytes_atomic(path, &buffer).map_err(|e| e.to_string())
}

fn build_workbook(data: &DataSet) -> Result<Workbook, XlsxError> {
    let mut wb = Workbook::new();
    let ws = wb.add_worksheet();
    ws.set_name("Sheet1")?;

    let bold = Format::new().set_bold();
    for (col, name) in data.schema.columns.iter().enumerate() {
        ws.write_string_with_format(0, col as u16, name, &bold)?;
    }

    for (r, row) in data.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            let col = col as u16;
            match value {
                Value::Null => {}
                Value::Int64(v) => {
                    ws.write_number(r, col, *v as f64)?;
                }
                Value::Float64(v) if v.is_nan() => {}
                Value::Float64(v) if v.is_infinite() => {
                    ws.write_string(r, col, v.to_string())?;
                }
                Value::Float64(v) => {
                    ws.write_number(r, col, *v)?;
                }
                Value::Bool(b) => {
                    ws.write_boolean(r, col, *b)?;
                }
                Value::Utf8(s) => {
                    ws.write_string(r, col, s)?;
                }
            }
        }
    }

    Ok(wb)
}
