use engine_contract::StreamEvent;

use crate::events::map_payload;

/// Prefix every protocol record starts with.
pub const DATA_MARKER: &str = "data:";
/// Literal record payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Result of decoding one complete record line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event(StreamEvent),
    Skip(SkipReason),
}

impl Frame {
    #[must_use]
    pub fn into_event(self) -> Option<StreamEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Skip(_) => None,
        }
    }
}

/// Why a record line produced no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingMarker,
    EmptyPayload,
    Malformed(String),
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    UnknownType(String),
    Unrecognized,
}

/// Incremental decoder for the engine's line-oriented event stream.
///
/// Chunk boundaries are independent of record boundaries: any bytes after the
/// last newline stay buffered until the next [`StreamDecoder::feed`], and
/// UTF-8 sequences split across chunks are reassembled before decoding.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: String,
    pending_utf8: Vec<u8>,
    skipped: usize,
}

impl StreamDecoder {
    /// Feed one transport chunk and drain every record it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.push_bytes(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(frame) = self.decode_buffered_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush the trailing fragment once the transport has ended.
    pub fn finish(&mut self) -> Vec<Frame> {
        if !self.pending_utf8.is_empty() {
            let tail = std::mem::take(&mut self.pending_utf8);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let line = std::mem::take(&mut self.buffer);
        self.decode_buffered_line(&line).into_iter().collect()
    }

    /// Decode a complete payload in one shot, keeping only events.
    pub fn parse_events(input: &str) -> Vec<StreamEvent> {
        let mut decoder = Self::default();
        let mut frames = decoder.feed(input.as_bytes());
        frames.extend(decoder.finish());
        frames.into_iter().filter_map(Frame::into_event).collect()
    }

    /// Decode one record line with its line terminator already removed.
    pub fn decode_line(line: &str) -> Frame {
        let Some(payload) = line.strip_prefix(DATA_MARKER) else {
            return Frame::Skip(SkipReason::MissingMarker);
        };
        let payload = payload.strip_prefix(' ').unwrap_or(payload).trim_end();

        if payload.is_empty() {
            return Frame::Skip(SkipReason::EmptyPayload);
        }
        if payload == DONE_SENTINEL {
            return Frame::Event(StreamEvent::Done);
        }

        match serde_json::from_str(payload) {
            Ok(value) => map_payload(value),
            Err(error) => Frame::Skip(SkipReason::Malformed(error.to_string())),
        }
    }

    /// Number of non-blank lines dropped so far.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.trim().is_empty() || !self.pending_utf8.is_empty()
    }

    fn decode_buffered_line(&mut self, raw: &str) -> Option<Frame> {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return None;
        }

        let frame = Self::decode_line(line);
        if let Frame::Skip(reason) = &frame {
            self.skipped += 1;
            tracing::debug!(?reason, "dropping stream record");
        }
        Some(frame)
    }

    fn push_bytes(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending_utf8);
        bytes.extend_from_slice(chunk);

        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(error) => {
                    let (valid, tail) = rest.split_at(error.valid_up_to());
                    self.buffer
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match error.error_len() {
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[invalid..];
                        }
                        None => {
                            self.pending_utf8 = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }
}
