use std::io;
use std::path::Path;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::atomic::write_atomic;
use crate::types::{DataSet, Value};

struct Rows<'a>(&'a DataSet);

struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl Serialize for Rows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.row_count()))?;
        for values in &self.0.rows {
            seq.serialize_element(&Row {
                columns: &self.0.schema.columns,
                values,
            })?;
        }
        seq.end()
    }
}

impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (i, column) in self.columns.iter().enumerate() {
            map.serialize_entry(column, self.values.get(i).unwrap_or(&Value::Null))?;
        }
        map.end()
    }
}

/// Array of row objects, keys in column order, 2-space indentation.
pub(super) fn write_json(data: &DataSet, path: &Path) -> Result<(), String> {
    write_atomic(path, |out| -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, &Rows(data))?;
        io::Write::write_all(out, b"\n")
    })
    .map_err(|e| e.to_string())
}
