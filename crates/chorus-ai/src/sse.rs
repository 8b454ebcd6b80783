//! Decoding of `text/event-stream` bodies into native provider chunks.

use std::io::BufRead;

use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{StreamError, StreamErrorCode};

const DONE_SENTINEL: &str = "[DONE]";

/// Iterates the `data:` payloads of an SSE body. Multi-line data is joined with
/// `\n`; a `[DONE]` payload ends the iteration without reading further.
pub struct SseDataEvents<R> {
    reader: R,
    line: String,
    finished: bool,
}

pub fn data_events<R: BufRead>(reader: R) -> SseDataEvents<R> {
    SseDataEvents {
        reader,
        line: String::new(),
        finished: false,
    }
}

/// Deserializes every SSE payload as `T`.
pub fn decode_chunks<T, R>(reader: R) -> impl Iterator<Item = Result<T, StreamError>>
where
    T: DeserializeOwned,
    R: BufRead,
{
    data_events(reader).map(|event| {
        let data = event?;
        serde_json::from_str::<T>(&data).map_err(|error| {
            StreamError::new(
                StreamErrorCode::ProviderProtocol,
                format!("Invalid SSE chunk JSON: {error}"),
            )
            .with_details(json!({ "chunk": data }))
        })
    })
}

impl<R: BufRead> SseDataEvents<R> {
    fn emit(&mut self, lines: Vec<String>) -> Option<Result<String, StreamError>> {
        if lines.is_empty() {
            return None;
        }
        let data = lines.join("\n");
        if data == DONE_SENTINEL {
            self.finished = true;
            return None;
        }
        Some(Ok(data))
    }
}

impl<R: BufRead> Iterator for SseDataEvents<R> {
    type Item = Result<String, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut data_lines: Vec<String> = Vec::new();
        loop {
            self.line.clear();
            let bytes_read = match self.reader.read_line(&mut self.line) {
                Ok(bytes_read) => bytes_read,
                Err(error) => {
                    self.finished = true;
                    return Some(Err(StreamError::transport(format!(
                        "SSE stream read failed: {error}"
                    ))));
                }
            };

            if bytes_read == 0 {
                self.finished = true;
                return self.emit(data_lines);
            }

            let trimmed = self.line.trim_end_matches(&['\r', '\n'][..]);
            if trimmed.is_empty() {
                if data_lines.is_empty() {
                    continue;
                }
                return self.emit(data_lines);
            }

            if let Some(data) = trimmed.strip_prefix("data:") {
                data_lines.push(data.trim_start().to_string());
            }
        }
    }
}
