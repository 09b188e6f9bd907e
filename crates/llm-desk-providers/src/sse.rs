//! Line-oriented `data:` stream decoder.
//!
//! Converts a chunked response body into a `Stream` of text deltas for one
//! [`Dialect`]. Chunks are not aligned to lines, so incomplete lines are
//! carried over to the next chunk.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use llm_desk_core::error::DeskError;

use crate::dialect::Dialect;
use crate::{DeltaStream, TextDelta};

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Carry-over buffer splitting raw chunks into complete lines.
///
/// Splitting happens on bytes, so a UTF-8 character cut in half by the
/// transport is decoded once both halves arrived.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Whatever is left once the input ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// A complete `data:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Explicit end-of-stream.
    Done,
    Payload(String),
}

/// Parse one line. Blank lines and non-`data:` lines yield `None`.
pub fn parse_data_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload == DONE_MARKER {
        Some(Frame::Done)
    } else {
        Some(Frame::Payload(payload.to_string()))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

struct DecodeState {
    bytes: ByteStream,
    lines: LineBuffer,
    pending: VecDeque<String>,
    dialect: Dialect,
    cancel: CancellationToken,
    input_ended: bool,
}

/// Decode a chunked body into deltas.
///
/// The sequence ends at `data: [DONE]`, at end of input, or as soon as
/// `cancel` fires. A failed read is yielded once as an error and ends it.
/// Records that fail to parse or carry no text are skipped.
pub fn decode_stream<S, E>(bytes: S, dialect: Dialect, cancel: CancellationToken) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + 'static,
{
    let bytes: ByteStream = Box::pin(bytes.map(|chunk| chunk.map_err(|e| e.to_string())));

    let deltas = futures::stream::unfold(
        DecodeState {
            bytes,
            lines: LineBuffer::new(),
            pending: VecDeque::new(),
            dialect,
            cancel,
            input_ended: false,
        },
        |mut state| async move {
            loop {
                if state.cancel.is_cancelled() {
                    debug!("Stream cancelled");
                    return None;
                }

                // Drain complete lines first
                if let Some(line) = state.pending.pop_front() {
                    match parse_data_line(&line) {
                        None => continue,
                        Some(Frame::Done) => return None,
                        Some(Frame::Payload(payload)) => {
                            match state.dialect.extract_delta(&payload) {
                                Some(delta) => {
                                    return Some((Ok::<TextDelta, DeskError>(delta), state));
                                }
                                None => {
                                    trace!(payload = %payload, "Skipping record without delta");
                                    continue;
                                }
                            }
                        }
                    }
                }

                if state.input_ended {
                    return None;
                }

                // Need more data from the transport
                let next = tokio::select! {
                    biased;
                    _ = state.cancel.cancelled() => None,
                    item = state.bytes.next() => Some(item),
                };
                let Some(item) = next else {
                    debug!("Stream cancelled while waiting for data");
                    return None;
                };

                match item {
                    Some(Ok(chunk)) => {
                        let lines = state.lines.push(&chunk);
                        state.pending.extend(lines);
                    }
                    Some(Err(e)) => {
                        state.input_ended = true;
                        state.pending.clear();
                        return Some((Err(DeskError::Http(format!("stream read failed: {e}"))), state));
                    }
                    None => {
                        state.input_ended = true;
                        if let Some(rest) = state.lines.finish() {
                            state.pending.push_back(rest);
                        }
                    }
                }
            }
        },
    );

    Box::pin(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let owned: Vec<Result<Bytes, std::io::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    async fn collect(stream: DeltaStream) -> Vec<String> {
        let mut stream = stream;
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item.expect("delta"));
        }
        out
    }

    #[test]
    fn test_line_buffer_keeps_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        assert_eq!(buf.push(b":1}\n\ndata: x"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(buf.finish().as_deref(), Some("data: x"));
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_line_buffer_split_utf8() {
        let mut buf = LineBuffer::new();
        let bytes = "é\n".as_bytes();
        assert!(buf.push(&bytes[..1]).is_empty());
        assert_eq!(buf.push(&bytes[1..]), vec!["é"]);
    }

    #[test]
    fn test_parse_data_line() {
        assert_eq!(parse_data_line("   "), None);
        assert_eq!(parse_data_line("event: ping"), None);
        assert_eq!(parse_data_line(": keep-alive"), None);
        assert_eq!(parse_data_line("data: [DONE]\r"), Some(Frame::Done));
        assert_eq!(
            parse_data_line("data:{\"x\":1}"),
            Some(Frame::Payload("{\"x\":1}".into()))
        );
    }

    #[tokio::test]
    async fn test_split_record_yields_single_delta() {
        let stream = decode_stream(
            chunks(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel",
                "lo\"}}]}\n\ndata: [DONE]\n",
            ]),
            Dialect::OpenAiCompatible,
            CancellationToken::new(),
        );
        assert_eq!(collect(stream).await, vec!["Hello"]);
    }

    #[tokio::test]
    async fn test_done_stops_even_if_more_bytes_follow() {
        let stream = decode_stream(
            chunks(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\ndata: [DONE]\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n",
            ]),
            Dialect::OpenAiCompatible,
            CancellationToken::new(),
        );
        assert_eq!(collect(stream).await.concat(), "ab");
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let stream = decode_stream(
            chunks(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n",
                "data: {broken\n",
                ": comment\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\" two\"}}]}\n",
            ]),
            Dialect::Grok,
            CancellationToken::new(),
        );
        // No [DONE]: end of input ends the sequence normally.
        assert_eq!(collect(stream).await, vec!["one", " two"]);
    }

    #[tokio::test]
    async fn test_anthropic_event_stream() {
        let stream = decode_stream(
            chunks(&[
                "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"!\"}}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ]),
            Dialect::Anthropic,
            CancellationToken::new(),
        );
        assert_eq!(collect(stream).await.concat(), "Hi!");
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_decoded() {
        let stream = decode_stream(
            chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}"]),
            Dialect::OpenAiCompatible,
            CancellationToken::new(),
        );
        assert_eq!(collect(stream).await, vec!["tail"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_read_yields_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = decode_stream(
            chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n"]),
            Dialect::OpenAiCompatible,
            cancel,
        );
        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_read() {
        let cancel = CancellationToken::new();
        let first = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
        ))]);
        let body = first.chain(futures::stream::pending());
        let mut stream = decode_stream(body, Dialect::OpenAiCompatible, cancel.clone());

        assert_eq!(stream.next().await.unwrap().unwrap(), "x");
        cancel.cancel();
        let next = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("cancellation should unblock the read");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_read_error_surfaces_once() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n")),
        ]);
        let mut stream = decode_stream(body, Dialect::OpenAiCompatible, CancellationToken::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, DeskError::Http(ref m) if m.contains("connection reset")));
        assert!(stream.next().await.is_none());
    }
}
