//! Output of the report events.

use std::io::Write;

use anyhow::Result;

use crate::events::ReportEvent;

/// Format to follow when printing events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PrintFormat {
    /// One line of text per event.
    Text,
    /// One JSON object per line.
    Json,
}

/// Writes events one by one to a `Write`.
pub(crate) struct Printer {
    writer: Box<dyn Write + Send>,
    format: PrintFormat,
}

impl Printer {
    pub(crate) fn new(writer: Box<dyn Write + Send>, format: PrintFormat) -> Self {
        Self { writer, format }
    }

    /// Format and print an event.
    pub(crate) fn process_one(&mut self, e: &ReportEvent) -> Result<()> {
        match self.format {
            PrintFormat::Text => {
                let event = format!("{e}");
                self.writer.write_all(event.as_bytes())?;
                self.writer.write_all(b"\n")?;
            }
            PrintFormat::Json => {
                let mut event = serde_json::to_vec(&e.to_json()?)?;
                event.push(b'\n');
                self.writer.write_all(&event)?;
            }
        }

        Ok(())
    }

    /// Flush underlying writers.
    pub(crate) fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

/// Shared in-memory writer, for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(pub(crate) std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
