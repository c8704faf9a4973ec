//! Daily CSV files and the sysinfo snapshot file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::warn;

use crate::error::StorageError;
use crate::sample::{RowFormat, Sample, Schema};

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `<dir>/<YYYY-MM-DD>.csv`
pub fn daily_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.csv", date.format("%Y-%m-%d")))
}

/// Current length of the file, 0 when it does not exist yet
fn file_len(path: &Path) -> Result<u64, StorageError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Append samples as rows, writing the header first for a new or empty file.
/// Returns the number of rows written.
///
/// Rows are rendered in memory and appended in one write. If that write
/// fails the file is cut back to its previous length, so a retry of the
/// same samples never duplicates rows or continues a torn line.
pub fn append_samples(
    path: &Path,
    schema: &Schema,
    format: &RowFormat,
    samples: &[Sample],
) -> Result<usize, StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    // Header presence is checked on disk every time, so restarts never
    // write a second one.
    let original_len = file_len(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if original_len == 0 {
        writer.write_record(schema.header())?;
    }
    for sample in samples {
        writer.write_record(sample.to_record(format))?;
    }
    let rows = writer
        .into_inner()
        .map_err(|e| io_error(path, e.into_error()))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error(path, e))?;
    append_or_rollback(&mut file, &rows, original_len).map_err(|e| io_error(path, e))?;

    Ok(samples.len())
}

/// A sink that can be cut back to an earlier length
trait Truncate {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

fn append_or_rollback<F: Write + Truncate>(
    file: &mut F,
    data: &[u8],
    original_len: u64,
) -> io::Result<()> {
    let result = file.write_all(data).and_then(|()| file.flush());
    if let Err(e) = result {
        if let Err(undo) = file.truncate_to(original_len) {
            warn!("[storage] could not roll back partial write: {}", undo);
        }
        return Err(e);
    }
    Ok(())
}

/// Replace the snapshot file with one `key,value` line per entry.
/// Written to a sibling temp file and renamed so readers never see a partial file.
pub fn write_key_values(path: &Path, entries: &[(String, String)]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)?;
        for (key, value) in entries {
            writer.write_record([key, value])?;
        }
        writer.flush().map_err(|e| io_error(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;
    Ok(())
}
