//! Incremental parsing of streamed response bodies.
//!
//! Chunks arrive at arbitrary byte boundaries, including inside a UTF-8
//! sequence, so both buffers hold raw bytes and only decode complete lines.
//! - Ollama streams NDJSON: one JSON object per line.
//! - OpenAI-compatible servers stream SSE: `data: {...}` lines, events
//!   separated by a blank line, terminated by `data: [DONE]`.

/// Pop one complete line (without `\n` / `\r\n`) off the front of `pending`.
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let pos = pending.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=pos).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// Splits an NDJSON stream into lines.
#[derive(Debug, Default)]
pub struct NdjsonBuffer {
    pending: Vec<u8>,
}

impl NdjsonBuffer {
    /// Feed a chunk; returns every complete, non-blank line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(line) = take_line(&mut self.pending) {
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// A final line the server did not terminate with `\n`.
    pub fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Collects the `data:` payloads of server-sent events.
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseBuffer {
    /// Feed a chunk; returns the data of every event completed by it.
    /// Multi-line data is joined with `\n`. Comments and other fields are ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(line) = take_line(&mut self.pending) {
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        events
    }

    /// Flush an event the stream ended without terminating.
    pub fn finish(mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&tail).into_owned();
            if let Some(value) = line.trim_end_matches('\r').strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}
