use std::fmt::{Debug, Display, Formatter};

use serde_json::{Value, json};
use tracing::debug;

use crate::accumulator::DataStreamAccumulator;
use crate::error::{StreamError, StreamErrorCode};
use crate::types::{DataStreamPart, ToolCall};
use crate::validation::ToolValidator;

pub type StreamItem = Result<DataStreamPart, StreamError>;

type Producer<'a> = Box<dyn FnOnce(&mut dyn FnMut(StreamItem) -> bool) + 'a>;

/// A lazy, single-consumer sequence of canonical events.
///
/// Nothing is produced until the stream is driven with [`DataStream::for_each`]
/// (or one of the draining helpers). The consumer returns `false` to cancel; an
/// `Err` item or an [`DataStreamPart::Error`] part ends the stream after the
/// consumer has seen it.
pub struct DataStream<'a> {
    producer: Producer<'a>,
}

impl Debug for DataStream<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream").finish_non_exhaustive()
    }
}

impl<'a> DataStream<'a> {
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(&mut dyn FnMut(StreamItem) -> bool) + 'a,
    {
        Self {
            producer: Box::new(producer),
        }
    }

    pub fn empty() -> Self {
        Self::new(|_| {})
    }

    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = StreamItem> + 'a,
    {
        Self::new(move |consumer| {
            for item in items {
                if !consumer(item) {
                    return;
                }
            }
        })
    }

    pub fn from_parts<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = DataStreamPart> + 'a,
    {
        Self::new(move |consumer| {
            for part in parts {
                if !consumer(Ok(part)) {
                    return;
                }
            }
        })
    }

    pub fn for_each<F>(self, mut consumer: F)
    where
        F: FnMut(StreamItem) -> bool,
    {
        let mut open = true;
        let mut gate = |item: StreamItem| -> bool {
            if !open {
                return false;
            }
            let terminal = matches!(item, Err(_) | Ok(DataStreamPart::Error { .. }));
            open = consumer(item) && !terminal;
            open
        };
        (self.producer)(&mut gate);
    }

    /// Drains the stream, returning the error that terminated it, if any.
    pub fn run(self) -> Result<(), StreamError> {
        let mut failure = None;
        self.for_each(|item| match item {
            Ok(DataStreamPart::Error { cause }) | Err(cause) => {
                failure = Some(cause);
                false
            }
            Ok(_) => true,
        });
        failure.map_or(Ok(()), Err)
    }

    pub fn collect_parts(self) -> Result<Vec<DataStreamPart>, StreamError> {
        let mut parts = Vec::new();
        let mut failure = None;
        self.for_each(|item| match item {
            Ok(DataStreamPart::Error { cause }) | Err(cause) => {
                failure = Some(cause);
                false
            }
            Ok(part) => {
                parts.push(part);
                true
            }
        });
        match failure {
            Some(error) => Err(error),
            None => Ok(parts),
        }
    }

    pub fn inspect<F>(self, mut observer: F) -> DataStream<'a>
    where
        F: FnMut(&StreamItem) + 'a,
    {
        DataStream::new(move |consumer| {
            self.for_each(|item| {
                observer(&item);
                consumer(item)
            })
        })
    }

    /// Feeds a copy of every part to `accumulator` while forwarding the stream
    /// unchanged. A protocol violation reported by the accumulator is delivered
    /// as an `Err` right after the offending part and ends the stream.
    pub fn with_accumulator(self, accumulator: &'a mut DataStreamAccumulator) -> DataStream<'a> {
        DataStream::new(move |consumer| {
            self.for_each(|item| {
                let violation = match &item {
                    Ok(part) => match accumulator.push(part) {
                        Err(error) if !part.is_error() => Some(error),
                        _ => None,
                    },
                    Err(_) => None,
                };
                if !consumer(item) {
                    return false;
                }
                match violation {
                    Some(error) => {
                        consumer(Err(error));
                        false
                    }
                    None => true,
                }
            })
        })
    }

    /// Checks every completed tool call against `validator`. A call that fails
    /// is replaced by an `Error` part carrying the validation failure, so
    /// nothing downstream (in particular [`DataStream::with_tool_calling`])
    /// ever sees it.
    pub fn with_tool_validation(self, validator: &'a ToolValidator) -> DataStream<'a> {
        DataStream::new(move |consumer| {
            self.for_each(|item| {
                let verdict = match &item {
                    Ok(DataStreamPart::ToolCall(call)) => validator.validate(call),
                    _ => Ok(()),
                };
                match verdict {
                    Ok(()) => consumer(item),
                    Err(cause) => {
                        debug!(code = ?cause.code, "rejecting tool call: {}", cause.message);
                        consumer(Ok(DataStreamPart::Error { cause }));
                        false
                    }
                }
            })
        })
    }

    /// Runs `handler` for every completed tool call and injects its result as a
    /// `ToolResult` event directly after the call. A failing handler ends the
    /// stream with an `Error` part.
    pub fn with_tool_calling<F, E>(self, mut handler: F) -> DataStream<'a>
    where
        F: FnMut(&ToolCall) -> Result<Value, E> + 'a,
        E: Display,
    {
        DataStream::new(move |consumer| {
            self.for_each(|item| {
                let call = match &item {
                    Ok(DataStreamPart::ToolCall(call)) => Some(call.clone()),
                    _ => None,
                };
                if !consumer(item) {
                    return false;
                }
                let Some(call) = call else {
                    return true;
                };

                debug!(
                    tool_call_id = %call.tool_call_id,
                    tool_name = %call.tool_name,
                    "executing tool call"
                );
                match handler(&call) {
                    Ok(result) => consumer(Ok(DataStreamPart::ToolResult {
                        tool_call_id: call.tool_call_id,
                        result,
                    })),
                    Err(error) => {
                        let cause = StreamError::new(
                            StreamErrorCode::ToolExecutionFailed,
                            format!("Tool '{}' failed: {error}", call.tool_name),
                        )
                        .with_details(json!({
                            "toolCallId": call.tool_call_id,
                            "toolName": call.tool_name,
                        }));
                        consumer(Ok(DataStreamPart::Error { cause }));
                        false
                    }
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, Usage};

    fn finish() -> Vec<DataStreamPart> {
        vec![
            DataStreamPart::FinishStep {
                reason: FinishReason::Stop,
                continued: false,
                usage: Usage::default(),
            },
            DataStreamPart::FinishMessage {
                reason: FinishReason::Stop,
                usage: Usage::default(),
            },
        ]
    }

    #[test]
    fn gate_blocks_producers_that_ignore_cancellation() {
        let stream = DataStream::new(|consumer| {
            for index in 0..5 {
                let _ = consumer(Ok(DataStreamPart::text(index.to_string())));
            }
        });

        let mut seen = Vec::new();
        stream.for_each(|item| {
            seen.push(item.expect("text part"));
            seen.len() < 2
        });
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn run_reports_error_parts() {
        let cause = StreamError::new(StreamErrorCode::ProviderReported, "overloaded");
        let stream = DataStream::from_parts(vec![
            DataStreamPart::text("partial"),
            DataStreamPart::Error {
                cause: cause.clone(),
            },
            DataStreamPart::text("never delivered"),
        ]);
        assert_eq!(stream.run(), Err(cause));
    }

    #[test]
    fn collect_parts_preserves_order() {
        let mut parts = vec![DataStreamPart::text("a"), DataStreamPart::text("b")];
        parts.extend(finish());
        let collected = DataStream::from_parts(parts.clone())
            .collect_parts()
            .expect("stream succeeds");
        assert_eq!(collected, parts);
    }

    #[test]
    fn inspect_observes_without_altering() {
        let mut observed = 0usize;
        let collected = DataStream::from_parts(finish())
            .inspect(|_| observed += 1)
            .collect_parts()
            .expect("stream succeeds");
        assert_eq!(collected.len(), 2);
        assert_eq!(observed, 2);
    }

    #[test]
    fn empty_stream_runs_cleanly() {
        assert_eq!(DataStream::empty().collect_parts(), Ok(Vec::new()));
    }
}
