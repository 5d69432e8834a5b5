use std::time::Instant;

use anyhow::Result;
use devmate_provider::DeltaStream;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::request::{estimate_tokens, ChatStats};

pub const DONE_MARKER: &str = "[DONE]";
const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    End,
}

impl StreamEvent {
    /// One `data:` line followed by a blank line.
    pub fn encode(&self) -> String {
        match self {
            StreamEvent::Content(delta) => {
                format!("{DATA_PREFIX}{}\n\n", serde_json::json!({ "content": delta }))
            }
            StreamEvent::End => format!("{DATA_PREFIX}{DONE_MARKER}\n\n"),
        }
    }
}

/// Frames provider deltas for the wire. Exhaustion ends with exactly one
/// terminal marker; an upstream failure ends the body without one.
pub fn encode_stream(mut deltas: DeltaStream) -> impl Stream<Item = String> + Send + 'static {
    async_stream::stream! {
        let mut forwarded = 0usize;
        while let Some(item) = deltas.next().await {
            match item {
                Ok(delta) if delta.is_empty() => continue,
                Ok(delta) => {
                    forwarded += 1;
                    yield StreamEvent::Content(delta).encode();
                }
                Err(e) => {
                    tracing::error!(error = %e, forwarded, "Upstream stream failed mid-response");
                    return;
                }
            }
        }
        tracing::debug!(forwarded, "Stream relayed");
        yield StreamEvent::End.encode();
    }
}

#[derive(Deserialize)]
struct ContentPayload {
    content: Option<String>,
}

/// Turns relay bytes back into events. Only complete lines are interpreted,
/// so an event split across reads decodes once its remainder arrives.
#[derive(Debug, Default)]
pub struct RelayDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl RelayDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let Ok(line) = std::str::from_utf8(&line[..pos]) else {
                continue;
            };
            let line = line.strip_suffix('\r').unwrap_or(line);

            match parse_line(line) {
                Some(StreamEvent::End) => {
                    self.done = true;
                    self.buffer.clear();
                    events.push(StreamEvent::End);
                    break;
                }
                Some(event) => events.push(event),
                None => {}
            }
        }
        events
    }

    /// Drops whatever incomplete line is left at end of input.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(bytes = self.buffer.len(), "Discarding incomplete relay line");
            self.buffer.clear();
        }
    }
}

fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload == DONE_MARKER {
        return Some(StreamEvent::End);
    }
    serde_json::from_str::<ContentPayload>(payload)
        .ok()?
        .content
        .map(StreamEvent::Content)
}

/// Reduces decoded events into the reply text.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    pub text: String,
    pub done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, event: &StreamEvent) {
        if self.done {
            return;
        }
        match event {
            StreamEvent::Content(delta) => self.text.push_str(delta),
            StreamEvent::End => self.done = true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { content: String, stats: ChatStats },
    Cancelled { partial: String },
    /// The byte stream ended before a terminal marker.
    Interrupted { partial: String },
}

/// Drives a [`RelayDecoder`] over `bytes`, calling `on_update` with the
/// accumulated text after every delta. Cancellation aborts the pending read
/// and is reported as [`StreamOutcome::Cancelled`], not as an error.
pub async fn consume<S, B, E, F>(
    bytes: S,
    started: Instant,
    cancel: &CancellationToken,
    mut on_update: F,
) -> Result<StreamOutcome>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
    F: FnMut(&str),
{
    tokio::pin!(bytes);
    let mut decoder = RelayDecoder::new();
    let mut acc = StreamAccumulator::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(StreamOutcome::Cancelled { partial: acc.text });
            }
            next = bytes.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for event in decoder.feed(chunk.as_ref()) {
                    acc.process(&event);
                    match event {
                        StreamEvent::Content(_) => on_update(&acc.text),
                        StreamEvent::End => {
                            let stats = ChatStats {
                                latency_ms: started.elapsed().as_millis() as u64,
                                approximate_tokens: estimate_tokens(&acc.text),
                            };
                            return Ok(StreamOutcome::Completed {
                                content: acc.text,
                                stats,
                            });
                        }
                    }
                }
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                decoder.finish();
                return Ok(StreamOutcome::Interrupted { partial: acc.text });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devmate_provider::ProviderError;

    type Chunk = std::result::Result<Vec<u8>, std::io::Error>;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Chunk> {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(p.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    fn deltas(items: Vec<Result<String>>) -> DeltaStream {
        Box::pin(futures::stream::iter(items))
    }

    #[test]
    fn events_encode_as_data_lines() {
        assert_eq!(
            StreamEvent::Content("Hel".into()).encode(),
            "data: {\"content\":\"Hel\"}\n\n"
        );
        assert_eq!(
            StreamEvent::Content("a \"quote\"\nnewline".into()).encode(),
            "data: {\"content\":\"a \\\"quote\\\"\\nnewline\"}\n\n"
        );
        assert_eq!(StreamEvent::End.encode(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn encoder_ends_with_one_marker() {
        let out: String = encode_stream(deltas(vec![
            Ok("Hel".into()),
            Ok(String::new()),
            Ok("lo".into()),
        ]))
        .collect::<Vec<_>>()
        .await
        .concat();
        assert_eq!(
            out,
            "data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo\"}\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn encoder_closes_without_marker_on_upstream_error() {
        let out: Vec<String> = encode_stream(deltas(vec![
            Ok("partial".into()),
            Err(ProviderError::Stream("reset".into()).into()),
            Ok("never".into()),
        ]))
        .collect()
        .await;
        assert_eq!(out, vec!["data: {\"content\":\"partial\"}\n\n".to_string()]);
    }

    #[test]
    fn decoder_reassembles_line_split_mid_json() {
        let mut decoder = RelayDecoder::new();
        assert!(decoder.feed(b"data: {\"cont").is_empty());
        assert_eq!(
            decoder.feed(b"ent\":\"Hel\"}\n\n"),
            vec![StreamEvent::Content("Hel".into())]
        );
    }

    #[test]
    fn decoder_ignores_malformed_and_foreign_lines() {
        let mut decoder = RelayDecoder::new();
        let events = decoder.feed(
            b"data: {not json}\n\nevent: ping\n\n: comment\ndata: {\"other\":1}\ndata: {\"content\":\"ok\"}\r\n\r\n",
        );
        assert_eq!(events, vec![StreamEvent::Content("ok".into())]);
    }

    #[test]
    fn decoder_stops_after_terminal_marker() {
        let mut decoder = RelayDecoder::new();
        let events = decoder.feed(b"data: [DONE]\n\ndata: {\"content\":\"late\"}\n\n");
        assert_eq!(events, vec![StreamEvent::End]);
        assert!(decoder.is_done());
        assert!(decoder.feed(b"data: [DONE]\n\n").is_empty());
    }

    #[test]
    fn accumulator_ignores_repeated_end() {
        let mut acc = StreamAccumulator::new();
        for event in [
            StreamEvent::Content("a".into()),
            StreamEvent::End,
            StreamEvent::End,
            StreamEvent::Content("b".into()),
        ] {
            acc.process(&event);
        }
        assert_eq!(acc.text, "a");
        assert!(acc.done);
    }

    #[tokio::test]
    async fn consume_accumulates_and_finalizes_once() {
        let body = chunks(&[
            "data: {\"content\":\"Hel\"}\n\n",
            "data: {\"content\":\"lo\"}\n\n",
            "data: [DONE]\n\n",
            "data: [DONE]\n\n",
        ]);
        let mut updates = Vec::new();
        let outcome = consume(body, Instant::now(), &CancellationToken::new(), |text| {
            updates.push(text.to_string())
        })
        .await
        .unwrap();

        assert_eq!(updates, vec!["Hel", "Hello"]);
        match outcome {
            StreamOutcome::Completed { content, stats } => {
                assert_eq!(content, "Hello");
                assert_eq!(stats.approximate_tokens, 2);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn consume_handles_event_split_across_reads() {
        let body = chunks(&["data: {\"content\":\"Hel", "lo\"}\n", "\ndata: [DONE]\n\n"]);
        let outcome = consume(body, Instant::now(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, StreamOutcome::Completed { ref content, .. } if content == "Hello"));
    }

    #[tokio::test]
    async fn consume_reports_interruption_when_marker_never_arrives() {
        let body = chunks(&["data: {\"content\":\"Hi\"}\n\n", "data: {\"content\":\"dang"]);
        let outcome = consume(body, Instant::now(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::Interrupted {
                partial: "Hi".into()
            }
        );
    }

    #[tokio::test]
    async fn cancellation_is_not_an_error() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let body = chunks(&["data: {\"content\":\"Hel\"}\n\n"]).chain(futures::stream::pending());

        let outcome = consume(body, Instant::now(), &cancel, |_| trigger.cancel())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::Cancelled {
                partial: "Hel".into()
            }
        );
    }

    #[tokio::test]
    async fn read_errors_propagate() {
        let body = futures::stream::iter(vec![
            Ok(b"data: {\"content\":\"x\"}\n\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let err = consume(body, Instant::now(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reset"));
    }
}
