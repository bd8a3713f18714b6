//! Partition Discoverer: enumerates `(column, value)` partitions for a
//! dataset reference by asking the executor which files exist and reading
//! their Hive-style `key=value` directory segments.

use std::collections::BTreeSet;

use percent_encoding::percent_decode_str;

use crate::error::CoordinatorError;
use crate::executor::{ExecutorSession, RawValue};

/// The sentinel second argument this coordinator's own `parquet_read` /
/// `read_parquet` table function recognizes as "also project a `filename`
/// column holding each row's source file path" — a plain positional string
/// literal so the embedded engine's table-function planner never has to
/// resolve named arguments.
pub const WITH_FILENAME_SENTINEL: &str = "with_filename";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub column: String,
    pub values: BTreeSet<String>,
    /// Other `key=value` segment names seen in file paths besides `column`,
    /// recorded as advisory: a dataset with more than one partition key
    /// still discovers cleanly off the first one, but callers that care can
    /// surface the ambiguity.
    pub other_keys_seen: BTreeSet<String>,
}

/// Issues the metadata-only discovery query and derives a
/// [`PartitionDescriptor`] from the returned file paths.
pub async fn discover(
    session: &mut dyn ExecutorSession,
    dataset_ref: &str,
) -> Result<PartitionDescriptor, CoordinatorError> {
    let escaped_ref = dataset_ref.replace('\'', "''");
    let sql =
        format!("SELECT DISTINCT filename FROM parquet_read('{escaped_ref}', '{WITH_FILENAME_SENTINEL}')");
    let raw = session.query(&sql).await?;

    let filename_idx = raw.columns.iter().position(|c| c == "filename").ok_or_else(|| {
        CoordinatorError::UnpartitionedDataset(format!(
            "discovery query for '{dataset_ref}' returned no filename column"
        ))
    })?;

    let mut selected_column: Option<String> = None;
    let mut values = BTreeSet::new();
    let mut other_keys = BTreeSet::new();

    for row in &raw.rows {
        let Some(RawValue::Str(path)) = row.get(filename_idx) else {
            continue;
        };
        let decoded = percent_decode_str(path).decode_utf8_lossy().into_owned();
        let Some((key, value)) = first_partition_segment(&decoded) else {
            continue;
        };
        match &selected_column {
            Some(col) if *col == key => {
                values.insert(value);
            }
            Some(_) => {
                other_keys.insert(key);
            }
            None => {
                selected_column = Some(key);
                values.insert(value);
            }
        }
    }

    let column = selected_column.ok_or_else(|| {
        CoordinatorError::UnpartitionedDataset(format!(
            "no '/key=value/' path segment found under dataset '{dataset_ref}'"
        ))
    })?;

    Ok(PartitionDescriptor {
        column,
        values,
        other_keys_seen: other_keys,
    })
}

/// Scans a (URL-decoded) path's `/`-separated segments for the first
/// *directory* segment shaped like `key=value` — the final, filename
/// segment is never considered, so a file named e.g. `part=1.parquet`
/// can't be misread as a partition.
pub(crate) fn first_partition_segment(path: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = path.split('/').collect();
    let directory_segments = segments.len().saturating_sub(1);
    segments.iter().take(directory_segments).find_map(|segment| {
        let (key, value) = segment.split_once('=')?;
        if key.is_empty() || value.is_empty() {
            return None;
        }
        Some((key.to_string(), value.to_string()))
    })
}
