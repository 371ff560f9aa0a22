//! Event Sources
//!
//! Where chain events come from. Any iterator of events is a source; a
//! JSON-lines reader turns a byte stream (stdin, a file, a socket) into one.

use std::io::BufRead;
use tracing::warn;

use crate::chain::ChainEvent;

/// Supplier of chain events, in acceptance order
pub trait EventSource {
    /// Next event, or `None` when the source is exhausted
    fn next_event(&mut self) -> Option<ChainEvent>;
}

impl<I> EventSource for I
where
    I: Iterator<Item = ChainEvent>,
{
    fn next_event(&mut self) -> Option<ChainEvent> {
        self.next()
    }
}

/// Reads one JSON-encoded `ChainEvent` per line
///
/// Blank lines are skipped. Lines that fail to parse, including ones that are
/// not valid UTF-8, are logged and skipped. An I/O error ends the stream.
pub struct JsonLinesSource<R> {
    reader: R,
    line: Vec<u8>,
    line_number: u64,
    skipped: u64,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            line_number: 0,
            skipped: 0,
        }
    }

    /// Number of lines that could not be parsed
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = ChainEvent;

    fn next(&mut self) -> Option<ChainEvent> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    warn!(line = self.line_number + 1, "Failed to read event stream: {}", e);
                    return None;
                }
            }
            self.line_number += 1;

            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice(&self.line) {
                Ok(event) => return Some(event),
                Err(e) => {
                    self.skipped += 1;
                    warn!(line = self.line_number, "Skipping malformed event: {}", e);
                }
            }
        }
    }
}
