//! Line-delimited JSON export of audit entries

use crate::errors::{corrupt_file, io_error, Result};
use crate::fs::atomic::atomic_write;
use editguard_core::audit::AuditEntry;
use std::io::Write;
use std::path::Path;

/// Write one JSON object per line
///
/// # Errors
///
/// Returns `Serialization` or `Io` on failure.
pub fn write_jsonl<'a, W, I>(writer: &mut W, entries: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a AuditEntry>,
{
    let mut written = 0;
    for entry in entries {
        let line = entry.to_json_line()?;
        writeln!(writer, "{}", line).map_err(|e| io_error("write_audit_line", e))?;
        written += 1;
    }
    writer.flush().map_err(|e| io_error("flush_audit", e))?;
    Ok(written)
}

/// Replace the file at `path` with the given entries
///
/// # Errors
///
/// Returns `Serialization` or `Io` on failure.
pub fn export_to_file<'a, I>(path: &Path, entries: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a AuditEntry>,
{
    let mut buffer = Vec::new();
    let written = write_jsonl(&mut buffer, entries)?;
    atomic_write(path, &buffer)?;
    tracing::info!(path = %path.display(), entries = written, "audit trail exported");
    Ok(written)
}

/// Read entries back from a JSONL file, skipping blank lines
///
/// # Errors
///
/// Returns `DataCorruption` for an undecodable line, or `Io`.
pub fn read_jsonl(path: &Path) -> Result<Vec<AuditEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| io_error("read_audit_file", e))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| corrupt_file(path, e)))
        .collect()
}
