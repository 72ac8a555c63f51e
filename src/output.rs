//! Output formatting and export for the cleaned tables.
//!
//! Supports pretty JSON logging and CSV export with optional gzip.

use anyhow::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_rows<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<W> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(csv.into_inner().map_err(|e| e.into_error())?)
}

/// Writes `rows` to a CSV file at `path`, replacing it, with a header row.
///
/// With `gzip` the file is gzip-compressed. Returns the number of rows written.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T], gzip: bool) -> Result<usize> {
    debug!(path = %path.display(), rows = rows.len(), gzip, "Writing CSV export");

    let file = File::create(path)?;
    if gzip {
        let encoder = write_rows(GzEncoder::new(file, Compression::default()), rows)?;
        encoder.finish()?;
    } else {
        write_rows(file, rows)?.sync_all()?;
    }

    Ok(rows.len())
}
