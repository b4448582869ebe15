//! Server-sent event decoding for streamed completions
//!
//! Network chunks do not respect line boundaries, so bytes are buffered
//! until a full line is available.

use super::{LlmError, TextStream};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Data(String),
    Done,
}

/// Incremental line decoder for `data:` events
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes, returning every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes a final line that had no trailing newline
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line).into_iter().collect()
    }
}

fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(&['\r', '\n'][..]);

    // Blank separators, comments, and event/id fields carry no text
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        Some(SseEvent::Done)
    } else if data.is_empty() {
        None
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}

struct StreamState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
    parse: fn(&str) -> Result<Option<String>, LlmError>,
}

impl<S> StreamState<S> {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                return;
            }
            match event {
                SseEvent::Done => self.finished = true,
                SseEvent::Data(data) => match (self.parse)(&data) {
                    Ok(Some(text)) if !text.is_empty() => self.pending.push_back(Ok(text)),
                    Ok(_) => {}
                    Err(e) => {
                        self.pending.push_back(Err(e));
                        self.finished = true;
                    }
                },
            }
        }
    }
}

/// Turns a byte stream of SSE frames into a stream of text deltas
///
/// `parse` maps one `data:` payload to its text, if any. The stream ends at
/// `[DONE]`, at the end of the body, or after the first error.
pub(crate) fn text_stream<S, B, E>(
    body: S,
    parse: fn(&str) -> Result<Option<String>, LlmError>,
) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = StreamState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
        parse,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.absorb(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(LlmError::Request(format!("Stream error: {}", e))), state));
                }
                None => {
                    let events = state.decoder.finish();
                    state.absorb(events);
                    state.finished = true;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough(data: &str) -> Result<Option<String>, LlmError> {
        if data == "bad" {
            Err(LlmError::InvalidResponse(data.to_string()))
        } else {
            Ok(Some(data.to_string()))
        }
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], String>> {
        futures::stream::iter(parts.iter().copied().map(|p| Ok(p.as_bytes())).collect::<Vec<_>>())
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: hel").is_empty());
        assert_eq!(decoder.push(b"lo\n\n"), vec![SseEvent::Data("hello".into())]);
        assert_eq!(
            decoder.push(b": keep-alive\r\ndata: a\r\ndata: [DONE]\r\n"),
            vec![SseEvent::Data("a".into()), SseEvent::Done]
        );
    }

    #[test]
    fn test_decoder_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Data("tail".into())]);
        assert!(decoder.finish().is_empty());
    }

    #[tokio::test]
    async fn test_stream_stops_at_done() {
        let body = chunks(&["data: one\n\nda", "ta: two\n\ndata: [DONE]\n\ndata: three\n\n"]);
        let items: Vec<_> = text_stream(body, passthrough).collect().await;
        assert_eq!(items, vec![Ok("one".to_string()), Ok("two".to_string())]);
    }

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let body = chunks(&["data: one\n\ndata: bad\n\ndata: two\n\n"]);
        let items: Vec<_> = text_stream(body, passthrough).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_transport_error_is_reported() {
        let body = futures::stream::iter(vec![
            Ok::<&'static [u8], String>(b"data: one\n\n".as_slice()),
            Err("connection reset".to_string()),
        ]);
        let items: Vec<_> = text_stream(body, passthrough).collect().await;
        assert_eq!(items[0], Ok("one".to_string()));
        assert!(matches!(&items[1], Err(LlmError::Request(m)) if m.contains("connection reset")));
    }
}
