//! Line reassembly for byte streams that arrive in arbitrary chunks.
//!
//! Both HTTP response bodies and child process stdout are split by the
//! transport wherever it likes, including in the middle of a line terminator
//! or a multi-byte UTF-8 sequence. [`LineReassembler`] buffers raw bytes and
//! only hands out complete lines.

/// Accumulates bytes and yields complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineReassembler {
    buffer: Vec<u8>,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completes, in order.
    ///
    /// The terminator (and a `\r` right before it) is stripped. The trailing
    /// unterminated fragment stays buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        // Only the new bytes can contain a terminator we have not seen yet.
        let scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer[scan_from..]
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|pos| scan_from + pos)
        else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the reassembler and return the unterminated leftover, if any.
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(decode_line(&self.buffer))
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
