use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::config::WEIGHT_MARKER;
use crate::{Error, Result};

/// The verb self-play workers use to stream game records
pub const SELF_PLAY_VERB: &str = "SelfPlay";

/// Returns true if the inbound line carries more than one `SelfPlay` verb.
///
/// Non-atomic writes on the worker side can concatenate two records into one
/// line; such lines are dropped entirely.
pub fn is_concatenated(line: &str) -> bool {
    match line.find(SELF_PLAY_VERB) {
        Some(pos) => line[pos + 1..].contains(SELF_PLAY_VERB),
        None => false,
    }
}

/// Returns true if the record was produced by the given model iteration,
/// i.e. its payload embeds `weight_iter_<model_iteration>`
pub fn embeds_model(record: &str, model_iteration: i64) -> bool {
    record.contains(&format!("{}{}", WEIGHT_MARKER, model_iteration))
}

/// Splits a record at the first `(` into its move count (the prefix, with
/// surrounding whitespace trimmed) and the payload starting at `(`
pub fn split_record(record: &str) -> Result<(&str, &str)> {
    let open = record
        .find('(')
        .ok_or_else(|| Error::invalid_data("record without a payload"))?;
    Ok((record[..open].trim(), &record[open..]))
}

/// The per-iteration record file: `<record_dir>/<iteration>.sgf`, truncated
/// on open, one numbered line per accepted record.
pub struct RecordFile {
    file: File,
    count: usize,
}

impl RecordFile {
    /// Creates (truncates) the record file for the given iteration
    pub fn create(record_dir: &Path, iteration: i64) -> Result<Self> {
        let file = File::create(record_dir.join(format!("{}.sgf", iteration)))?;
        Ok(Self { file, count: 0 })
    }
    /// Appends one accepted record as `<seq> <moveCount> <payload>`
    pub fn append(&mut self, move_count: &str, payload: &str) -> Result<()> {
        writeln!(self.file, "{} {} {}", self.count, move_count, payload)?;
        self.file.flush()?;
        self.count += 1;
        Ok(())
    }
    /// Number of records written so far
    pub fn len(&self) -> usize {
        self.count
    }
    /// Whether no record has been written yet
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
