use anyhow::Result;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::Response;

pub fn parse_sse_stream(response: Response) -> BoxStream<'static, Result<SseEvent>> {
    parse_sse_bytes(response.bytes_stream())
}

/// Splits a raw byte stream into server-sent events. Bytes are buffered
/// until a blank line closes an event, so multi-byte characters and events
/// split across reads decode intact.
pub fn parse_sse_bytes<S, B, E>(byte_stream: S) -> BoxStream<'static, Result<SseEvent>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
{
    let buffer: Vec<u8> = Vec::new();

    let stream = futures::stream::unfold(
        (byte_stream, buffer),
        |(mut byte_stream, mut buffer)| async move {
            loop {
                if let Some((pos, sep_len)) = find_event_boundary(&buffer) {
                    let event_bytes: Vec<u8> = buffer.drain(..pos + sep_len).collect();
                    let event_text = String::from_utf8_lossy(&event_bytes[..pos]);

                    if let Some(event) = parse_event(&event_text) {
                        return Some((Ok(event), (byte_stream, buffer)));
                    }
                    continue;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(bytes.as_ref());
                    }
                    Some(Err(e)) => {
                        return Some((Err(e.into()), (byte_stream, buffer)));
                    }
                    None => return None,
                }
            }
        },
    );

    Box::pin(stream)
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

fn parse_event(text: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in text.lines() {
        if let Some(value) = line.strip_prefix("event: ") {
            event_type = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("data: ") {
            data_lines.push(value);
        } else if line == "data:" {
            data_lines.push("");
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let data = data_lines.join("\n");
    if data == "[DONE]" {
        return None;
    }

    Some(SseEvent {
        event: event_type,
        data,
    })
}
