// NDJSON line reassembly for the upstream token stream

use serde_json::Value;
use tracing::debug;

use super::event::StreamEvent;

/// Turns raw upstream bytes into stream events.
///
/// Bytes accumulate until a newline completes a line, so a record split
/// anywhere across reads (even inside a UTF-8 sequence) is parsed once it is
/// whole. Lines that are not JSON objects are dropped and counted.
#[derive(Debug, Default)]
pub struct NdjsonFramer {
    buffer: Vec<u8>,
    discarded: usize,
    done: bool,
}

impl NdjsonFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines dropped because they were not JSON objects.
    pub const fn discarded_lines(&self) -> usize {
        self.discarded
    }

    /// Whether a record with a truthy `done` field has been seen.
    pub const fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buffer, rest);
            self.process_line(&line, &mut events);
            if self.done {
                self.buffer.clear();
                break;
            }
        }

        events
    }

    /// Parse whatever is left once the upstream body ends without a final newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done || self.buffer.is_empty() {
            self.buffer.clear();
            return events;
        }
        let line = std::mem::take(&mut self.buffer);
        self.process_line(&line, &mut events);
        events
    }

    fn process_line(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        let record = match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(record)) => record,
            Ok(_) | Err(_) => {
                self.discarded += 1;
                debug!(discarded = self.discarded, "dropping non-object NDJSON line");
                return;
            }
        };

        match record.get("error") {
            None | Some(Value::Null) => {}
            Some(Value::String(message)) => events.push(StreamEvent::Error(format!("Error: {message}"))),
            Some(other) => events.push(StreamEvent::Error(format!("Error: {other}"))),
        }

        if let Some(Value::String(text)) = record.get("response") {
            if !text.is_empty() {
                events.push(StreamEvent::Chunk(text.clone()));
            }
        }

        if record.get("done").is_some_and(is_truthy) {
            self.done = true;
            events.push(StreamEvent::Done);
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}
