//! Incremental decoder for `text/event-stream` bodies.
//!
//! Only `data:` fields matter here; `event:`, `id:` and comment lines are
//! dropped. Multi-line data is joined with `\n` and the `[DONE]` sentinel is
//! swallowed.

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes already searched for an event boundary.
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body, returning the data of every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        loop {
            let start = self.scanned.saturating_sub(1);
            let boundary = self.buffer[start..]
                .windows(2)
                .position(|w| w == b"\n\n")
                .map(|pos| start + pos);

            match boundary {
                Some(end) => {
                    let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
                    self.scanned = 0;
                    if let Some(data) = event_data(&block[..end]) {
                        events.push(data);
                    }
                }
                None => {
                    self.scanned = self.buffer.len();
                    break;
                }
            }
        }

        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let block = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        event_data(&block)
    }
}

fn event_data(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        return None;
    }

    let joined = data.join("\n");
    if joined == "[DONE]" {
        None
    } else {
        Some(joined)
    }
}
