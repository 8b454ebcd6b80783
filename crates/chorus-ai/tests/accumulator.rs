use chorus_ai::{
    DataStream, DataStreamAccumulator, DataStreamPart, FinishReason, Part, Role, StreamError,
    StreamErrorCode, ToolCall, ToolInvocationState, Usage,
};
use serde_json::json;

fn finish_step(reason: FinishReason, continued: bool) -> DataStreamPart {
    DataStreamPart::FinishStep {
        reason,
        continued,
        usage: Usage::default(),
    }
}

fn finish_message(reason: FinishReason) -> DataStreamPart {
    DataStreamPart::FinishMessage {
        reason,
        usage: Usage::default(),
    }
}

fn delta(id: &str, name: Option<&str>, fragment: Option<&str>) -> DataStreamPart {
    DataStreamPart::ToolCallDelta {
        tool_call_id: id.to_string(),
        tool_name: name.map(str::to_string),
        args_fragment: fragment.map(str::to_string),
    }
}

fn tool_call_sequence() -> Vec<DataStreamPart> {
    vec![
        DataStreamPart::text("Let me check."),
        delta("call_1", Some("get_weather"), Some("{\"location\":")),
        delta("call_1", None, Some("\"Paris\"}")),
        DataStreamPart::ToolCall(ToolCall {
            tool_call_id: "call_1".to_string(),
            tool_name: "get_weather".to_string(),
            args: json!({ "location": "Paris" }),
        }),
        DataStreamPart::ToolResult {
            tool_call_id: "call_1".to_string(),
            result: json!({ "temperature": 21 }),
        },
        finish_step(FinishReason::ToolCalls, true),
        DataStreamPart::text("It is 21 degrees."),
        finish_step(FinishReason::Stop, false),
        finish_message(FinishReason::Stop),
    ]
}

#[test]
fn multi_step_tool_round_builds_one_message() {
    let messages = DataStreamAccumulator::accumulate(DataStream::from_parts(tool_call_sequence()))
        .expect("sequence is valid");

    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.role, Role::Assistant);
    assert_eq!(message.content, "Let me check.It is 21 degrees.");
    assert_eq!(message.parts.len(), 5);
    assert_eq!(message.parts[0], Part::StepStart);
    assert_eq!(message.parts[1], Part::text("Let me check."));
    assert_eq!(message.parts[3], Part::StepStart);
    assert_eq!(message.parts[4], Part::text("It is 21 degrees."));

    let invocation = message.tool_invocation("call_1").expect("invocation");
    assert_eq!(invocation.state, ToolInvocationState::Result);
    assert_eq!(invocation.tool_name, "get_weather");
    assert_eq!(invocation.args, json!({ "location": "Paris" }));
    assert_eq!(invocation.result, Some(json!({ "temperature": 21 })));
}

#[test]
fn accumulation_is_deterministic() {
    let first = DataStreamAccumulator::accumulate(DataStream::from_parts(tool_call_sequence()))
        .expect("first run");
    let second = DataStreamAccumulator::accumulate(DataStream::from_parts(tool_call_sequence()))
        .expect("second run");
    assert_eq!(first, second);
}

#[test]
fn partial_call_invocation_is_visible_while_streaming() {
    let mut accumulator = DataStreamAccumulator::new();
    accumulator
        .push(&delta("call_9", Some("search"), Some("{\"q\"")))
        .expect("delta");

    let invocation = accumulator
        .in_progress()
        .and_then(|message| message.tool_invocation("call_9"))
        .expect("partial invocation");
    assert_eq!(invocation.state, ToolInvocationState::PartialCall);
    assert_eq!(invocation.tool_name, "search");
    assert!(accumulator.messages().is_empty());
}

#[test]
fn consecutive_messages_are_finalized_separately() {
    let messages = DataStreamAccumulator::accumulate(DataStream::from_parts(vec![
        DataStreamPart::text("one"),
        finish_message(FinishReason::Stop),
        DataStreamPart::text("two"),
        finish_message(FinishReason::Length),
    ]))
    .expect("valid sequence");

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "one");
    assert_eq!(messages[1].content, "two");
    assert_eq!(messages[1].parts[0], Part::StepStart);
}

#[test]
fn unmatched_tool_result_fails_through_the_pipeline() {
    let mut accumulator = DataStreamAccumulator::new();
    let mut delivered = Vec::new();
    DataStream::from_parts(vec![
        DataStreamPart::text("hi"),
        DataStreamPart::ToolResult {
            tool_call_id: "ghost".to_string(),
            result: json!(null),
        },
        finish_message(FinishReason::Stop),
    ])
    .with_accumulator(&mut accumulator)
    .for_each(|item| {
        delivered.push(item);
        true
    });

    assert_eq!(delivered.len(), 3);
    assert!(matches!(delivered[1], Ok(DataStreamPart::ToolResult { .. })));
    let Err(error) = &delivered[2] else {
        panic!("expected a protocol violation, got {:?}", delivered[2]);
    };
    assert_eq!(error.code, StreamErrorCode::ProtocolViolation);
    assert!(accumulator.messages().is_empty());
}

#[test]
fn tool_call_after_result_is_rejected() {
    let mut parts = tool_call_sequence();
    parts.truncate(5);
    parts.push(DataStreamPart::ToolCall(ToolCall {
        tool_call_id: "call_1".to_string(),
        tool_name: "get_weather".to_string(),
        args: json!({ "location": "Rome" }),
    }));

    let error = DataStreamAccumulator::accumulate(DataStream::from_parts(parts))
        .expect_err("state never moves backward");
    assert_eq!(error.code, StreamErrorCode::ProtocolViolation);
}

#[test]
fn error_part_discards_in_progress_message() {
    let cause = StreamError::new(StreamErrorCode::ProviderReported, "overloaded");
    let mut accumulator = DataStreamAccumulator::new();
    let result = DataStream::from_parts(vec![
        DataStreamPart::text("partial"),
        DataStreamPart::Error {
            cause: cause.clone(),
        },
    ])
    .with_accumulator(&mut accumulator)
    .run();

    assert_eq!(result, Err(cause));
    assert!(accumulator.in_progress().is_none());
    assert!(accumulator.messages().is_empty());
}

#[test]
fn file_parts_are_kept_in_order() {
    let messages = DataStreamAccumulator::accumulate(DataStream::from_parts(vec![
        DataStreamPart::text("Here is the chart:"),
        DataStreamPart::File {
            mime_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        },
        finish_message(FinishReason::Stop),
    ]))
    .expect("valid sequence");

    assert_eq!(
        messages[0].parts,
        vec![
            Part::StepStart,
            Part::text("Here is the chart:"),
            Part::file("image/png", vec![1, 2, 3]),
        ]
    );
    assert_eq!(messages[0].content, "Here is the chart:");
}
