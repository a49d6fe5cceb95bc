use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::error::{InventoryError, Result};

/// Read a CSV file with all columns as String dtype.
/// Trims whitespace from column names and applies optional rename.
pub fn read_csv_as_strings(path: &Path, rename: Option<HashMap<String, String>>) -> Result<DataFrame> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed.as_slice())?;

    if let Some(map) = rename {
        let old: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        let new: Vec<&str> = map.values().map(|s| s.as_str()).collect();
        df = df.lazy().rename(old, new, true).collect()?;
    }

    Ok(df)
}

/// Write `df` to `path`, creating missing parent directories first.
/// The extension picks the format: `.parquet` or `.csv`.
pub fn write_table(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("parquet") => {
            ParquetWriter::new(File::create(path)?).finish(df)?;
        }
        Some("csv") => {
            CsvWriter::new(File::create(path)?)
                .include_header(true)
                .finish(df)?;
        }
        other => {
            return Err(InventoryError::InvalidConfig(format!(
                "cannot write '{}': unsupported extension {:?}",
                path.display(),
                other
            )))
        }
    }

    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}
