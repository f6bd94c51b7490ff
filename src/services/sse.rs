//! Incremental `text/event-stream` parser. Bytes arrive in arbitrary chunks; frames
//! come out once their terminating blank line has been seen.

use tracing::warn;

/// Longest line kept while waiting for its `\n`. Past this the line and the frame it
/// belongs to are dropped.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    /// `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub retry: Option<u64>,
}

impl SseFrame {
    /// Whether a browser `onmessage` handler would see this frame.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

#[derive(Debug)]
pub struct SseParser {
    buf: Vec<u8>,
    current: SseFrame,
    has_data: bool,
    max_line: usize,
    /// Skipping the tail of an oversized line.
    discarding: bool,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            current: SseFrame::default(),
            has_data: false,
            max_line,
            discarding: false,
        }
    }

    /// Consume a chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        if self.buf.len() > self.max_line {
            if !self.discarding {
                warn!(limit = self.max_line, "sse line too long, dropping frame");
            }
            self.buf.clear();
            self.current = SseFrame::default();
            self.has_data = false;
            self.discarding = true;
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.finish_frame();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            "id" if !value.contains('\0') => self.current.id = Some(value.to_string()),
            "event" => self.current.event = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.current.retry = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    fn finish_frame(&mut self) -> Option<SseFrame> {
        let frame = std::mem::take(&mut self.current);
        let dispatch = self.has_data;
        self.has_data = false;
        dispatch.then_some(frame)
    }
}
