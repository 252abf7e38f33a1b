// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Trace Persistence
// ─────────────────────────────────────────────────────────────────────
//! Durable, line-delimited refinement traces.
//!
//! Each entry is written and flushed as soon as it is appended, so a
//! crash mid-run leaves every completed attempt on disk.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use verdict_types::{Trace, TraceEntry, VerdictError, VerdictResult};

/// Receives trace entries in append order.
pub trait TraceSink {
    fn record(&mut self, entry: &TraceEntry) -> VerdictResult<()>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn record(&mut self, _entry: &TraceEntry) -> VerdictResult<()> {
        Ok(())
    }
}

/// Collects entries in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryTraceSink {
    entries: Vec<TraceEntry>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&mut self, entry: &TraceEntry) -> VerdictResult<()> {
        self.entries.push(entry.clone());
        Ok(())
    }
}

/// One JSON object per line.
pub struct JsonlTraceSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonlTraceSink<BufWriter<File>> {
    /// Append to `path`, creating it if needed.
    pub fn create(path: &Path) -> VerdictResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| VerdictError::Trace(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> TraceSink for JsonlTraceSink<W> {
    fn record(&mut self, entry: &TraceEntry) -> VerdictResult<()> {
        let line = entry.to_json_line()?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<T: TraceSink + ?Sized> TraceSink for &mut T {
    fn record(&mut self, entry: &TraceEntry) -> VerdictResult<()> {
        (**self).record(entry)
    }
}

/// Replay a JSONL trace written by [`JsonlTraceSink`].
pub fn read_trace(path: &Path) -> VerdictResult<Trace> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| VerdictError::Trace(format!("cannot read {}: {e}", path.display())))?;
    Trace::from_jsonl(&text)
}
