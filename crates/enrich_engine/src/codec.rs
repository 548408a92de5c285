//! JSON Lines framing of [`ProgressEvent`] records.
//!
//! Every record is one JSON object terminated by `\n`. Transports may split
//! or merge chunks anywhere, so the decoder buffers until it sees a newline.

use std::io;

use bytes::BytesMut;
use enrich_core::ProgressEvent;
use enrich_logging::{enrich_debug, enrich_warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, FramedRead};

/// Content type announced for progress streams.
pub const CONTENT_TYPE: &str = "application/x-ndjson";

const PREVIEW_LEN: usize = 80;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport already closed")]
    Closed,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to open stream: {0}")]
    Open(String),
}

/// Serializes one event as a complete line.
pub fn encode_line(event: &ProgressEvent) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    Ok(line)
}

/// Producer half: owns the writer until [`StreamEncoder::close`].
pub struct StreamEncoder<W> {
    writer: Option<W>,
    sent: usize,
}

impl<W> StreamEncoder<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            sent: 0,
        }
    }

    /// Writes and flushes one record so the consumer sees it immediately.
    pub async fn send(&mut self, event: &ProgressEvent) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        let line = encode_line(event)?;
        writer.write_all(&line).await?;
        writer.flush().await?;
        self.sent += 1;
        Ok(())
    }

    /// Shuts the writer down. Only the first call does anything; shutdown
    /// errors are logged since the consumer may already be gone.
    pub async fn close(&mut self) -> bool {
        let Some(mut writer) = self.writer.take() else {
            return false;
        };
        if let Err(err) = writer.shutdown().await {
            enrich_debug!("Ignoring shutdown error after {} records: {}", self.sent, err);
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    pub fn records_sent(&self) -> usize {
        self.sent
    }
}

/// Consumer half. Usable directly through [`StreamDecoder::push`] or as a
/// `tokio_util` decoder via [`decode_stream`].
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: BytesMut,
    // Bytes already scanned for a newline; the next scan starts here.
    next_index: usize,
    skipped: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every record completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ProgressEvent> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(line) = self.take_line(&mut buffer) {
            if let Some(event) = self.parse_line(&line) {
                events.push(event);
            }
        }
        self.buffer = buffer;
        events
    }

    /// Ends the stream. A final record without trailing newline is still
    /// returned; anything else left over is dropped.
    pub fn finish(&mut self) -> Option<ProgressEvent> {
        let rest = self.buffer.split();
        self.next_index = 0;
        self.parse_line(&rest)
    }

    /// Number of malformed lines dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn take_line(&mut self, buffer: &mut BytesMut) -> Option<BytesMut> {
        let start = self.next_index.min(buffer.len());
        match buffer[start..].iter().position(|byte| *byte == b'\n') {
            Some(offset) => {
                self.next_index = 0;
                Some(buffer.split_to(start + offset + 1))
            }
            None => {
                self.next_index = buffer.len();
                None
            }
        }
    }

    fn parse_line(&mut self, line: &[u8]) -> Option<ProgressEvent> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_slice(line) {
            Ok(event) => Some(event),
            Err(err) => {
                self.skipped += 1;
                enrich_warn!(
                    "Skipping malformed progress line ({}): {}",
                    err,
                    preview(line)
                );
                None
            }
        }
    }
}

impl Decoder for StreamDecoder {
    type Item = ProgressEvent;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ProgressEvent>, io::Error> {
        while let Some(line) = self.take_line(src) {
            if let Some(event) = self.parse_line(&line) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ProgressEvent>, io::Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        self.next_index = 0;
        Ok(self.parse_line(&rest))
    }
}

/// Wraps a byte stream into a stream of decoded events.
pub fn decode_stream<R: AsyncRead>(reader: R) -> FramedRead<R, StreamDecoder> {
    FramedRead::new(reader, StreamDecoder::new())
}

fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    if text.chars().count() <= PREVIEW_LEN {
        return text.into_owned();
    }
    let cut: String = text.chars().take(PREVIEW_LEN).collect();
    format!("{cut}...")
}
