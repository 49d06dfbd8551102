//! Reassembly of newline-delimited records from arbitrarily split fragments

/// Turns transport fragments into complete text lines.
///
/// Bytes are buffered rather than text so that a multi-byte character split
/// across two fragments decodes correctly once its line is complete.
#[derive(Debug, Default)]
pub struct LineReassembler {
    buffer: Vec<u8>,
}

impl LineReassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment and return every line it completes.
    ///
    /// Blank lines are dropped. A trailing partial line stays buffered and is
    /// prefixed onto the next fragment.
    pub fn feed(&mut self, fragment: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = fragment;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.buffer.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let raw = std::mem::take(&mut self.buffer);
            if let Some(line) = decode_line(&raw) {
                lines.push(line);
            }
        }

        self.buffer.extend_from_slice(rest);
        lines
    }

    /// Flush the buffered partial line once the transport has completed.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        decode_line(&raw)
    }

    /// Number of bytes waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if line.trim().is_empty() {
        return None;
    }
    Some(line.into_owned())
}
