//! Canonical <-> `OpenAI` Responses API conversion
//!
//! The canonical types follow the Responses API, so requests pass through
//! almost unchanged. Responses and streams are still rebuilt so item ids,
//! numbering and tolerance of unknown item types match the other providers.

use std::time::{SystemTime, UNIX_EPOCH};

use http::StatusCode;
use serde_json::{Value, json};

use super::{ChunkAssembler, ContentUnit, StreamConverter, fallback_message, in_band_error};
use crate::{
    error::LlmError,
    protocol::openai::{OpenAiErrorResponse, OpenAiReasoning, OpenAiRequest, OpenAiResponse, OpenAiStreamEvent},
    types::{Include, Item, Request, Response, ResponseChunk, ResponseError, ResponseStatus, Tool},
};

/// Convert a canonical request to a Responses API body
pub fn to_openai_request(request: &Request) -> OpenAiRequest {
    let mut include = request.include.clone();
    if request.reasoning.is_some() && !include.contains(&Include::ReasoningEncryptedContent) {
        include.push(Include::ReasoningEncryptedContent);
    }

    // Encrypted reasoning is only returned for stateless requests
    let store = include.contains(&Include::ReasoningEncryptedContent).then_some(false);

    let tools = request
        .tools
        .iter()
        .cloned()
        .map(|tool| match tool {
            Tool::CodeInterpreter { container: None } => Tool::CodeInterpreter {
                container: Some(json!({"type": "auto"})),
            },
            other => other,
        })
        .collect();

    OpenAiRequest {
        model: request.model.clone(),
        input: request.input.clone(),
        instructions: request.instructions.clone(),
        tools,
        tool_choice: request.tool_choice.clone(),
        parallel_tool_calls: request.parallel_tool_calls,
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_output_tokens,
        reasoning: request.reasoning.as_ref().map(|reasoning| OpenAiReasoning {
            effort: reasoning.effort(),
            summary: reasoning.summary,
        }),
        text: request.text.clone(),
        stream: request.stream,
        include,
        metadata: request.metadata.clone(),
        store,
    }
}

/// Convert a Responses API body to a canonical response
pub fn from_openai_response(response: OpenAiResponse, requested_model: &str) -> Response {
    let output = response.output.into_iter().filter_map(parse_item).collect();

    let status = match response.status.as_deref() {
        Some("incomplete") => ResponseStatus::Incomplete,
        Some("failed") => ResponseStatus::Failed,
        Some("in_progress" | "queued") => ResponseStatus::InProgress,
        _ => ResponseStatus::Completed,
    };

    let mut metadata = response.metadata.unwrap_or_default();
    if let Some(reason) = response.incomplete_details.and_then(|details| details.reason) {
        metadata.insert("stop_reason".to_owned(), reason);
    }

    Response {
        id: response
            .id
            .unwrap_or_else(|| format!("resp_{}", uuid::Uuid::new_v4().simple())),
        object: "response".to_owned(),
        created_at: response.created_at.unwrap_or_else(now),
        model: response.model.unwrap_or_else(|| requested_model.to_owned()),
        status,
        output,
        usage: response.usage,
        error: response.error.map(|error| ResponseError {
            kind: conduit_core::ErrorKind::Upstream,
            message: error.message,
        }),
        metadata,
    }
}

/// Map an error body to [`LlmError::Upstream`]
pub fn openai_error(status: StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<OpenAiErrorResponse>(body)
        .ok()
        .map(|envelope| envelope.error)
        .filter(|error| !error.message.is_empty())
        .map_or_else(
            || fallback_message(status, body),
            |error| match error.code.or(error.error_type) {
                Some(code) => format!("{code}: {}", error.message),
                None => error.message,
            },
        );

    LlmError::Upstream {
        status: status.as_u16(),
        message,
    }
}

/// Parse one output item, skipping types the gateway does not model
fn parse_item(mut value: Value) -> Option<Item> {
    // Item-specific statuses such as `interpreting` collapse to unset
    if let Some(status) = value.get("status").and_then(Value::as_str)
        && !matches!(status, "in_progress" | "completed" | "incomplete")
        && let Some(object) = value.as_object_mut()
    {
        object.remove("status");
    }

    match serde_json::from_value::<Item>(value) {
        Ok(item) => Some(item),
        Err(e) => {
            tracing::debug!(error = %e, "skipping unsupported OpenAI output item");
            None
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Re-assembles a Responses API event stream
pub struct OpenAiStreamConverter {
    assembler: ChunkAssembler,
    streamed_arguments: bool,
    streamed_code: bool,
}

impl OpenAiStreamConverter {
    pub fn new(model: &str) -> Self {
        Self {
            assembler: ChunkAssembler::new(model),
            streamed_arguments: false,
            streamed_code: false,
        }
    }

    fn apply_response(&mut self, response: &OpenAiResponse) {
        if let Some(model) = &response.model {
            self.assembler.set_model(model);
        }
        if let Some(usage) = &response.usage {
            self.assembler.set_usage(usage.clone());
        }
    }

    fn item_added(&mut self, item: &Value) -> Vec<ResponseChunk> {
        match item_type(item) {
            Some("function_call") => {
                self.streamed_arguments = false;
                self.assembler.push(ContentUnit::FunctionCall {
                    call_id: str_field(item, "call_id").map(str::to_owned),
                    name: Some(str_field(item, "name").unwrap_or_default().to_owned()),
                    arguments: String::new(),
                })
            }
            Some("code_interpreter_call") => {
                self.streamed_code = false;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn item_done(&mut self, item: &Value) -> Vec<ResponseChunk> {
        let mut chunks = Vec::new();

        match item_type(item) {
            Some("function_call") => {
                if !self.streamed_arguments
                    && let Some(arguments) = str_field(item, "arguments")
                {
                    chunks.extend(self.assembler.push(ContentUnit::FunctionCall {
                        call_id: None,
                        name: None,
                        arguments: arguments.to_owned(),
                    }));
                }
            }
            Some("reasoning") => {
                if let Some(encrypted) = str_field(item, "encrypted_content") {
                    chunks.extend(self.assembler.push(ContentUnit::Signature(encrypted.to_owned())));
                }
            }
            Some("code_interpreter_call") => {
                if !self.streamed_code {
                    chunks.extend(self.assembler.push(ContentUnit::CodeExecution {
                        code: str_field(item, "code").unwrap_or_default().to_owned(),
                        complete: true,
                    }));
                }
                let logs: String = item
                    .get("outputs")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|output| str_field(output, "logs"))
                    .collect();
                chunks.extend(self.assembler.push(ContentUnit::CodeResult { output: logs }));
            }
            Some("image_generation_call") => {
                if let Some(result) = str_field(item, "result") {
                    let format = str_field(item, "output_format").unwrap_or("png");
                    chunks.extend(self.assembler.push(ContentUnit::Image {
                        media_type: format!("image/{format}"),
                        data: result.to_owned(),
                    }));
                }
            }
            _ => {}
        }

        chunks.extend(self.assembler.close_item());
        chunks
    }
}

impl StreamConverter for OpenAiStreamConverter {
    fn convert(&mut self, payload: &str) -> Result<Vec<ResponseChunk>, LlmError> {
        let event: OpenAiStreamEvent = serde_json::from_str(payload)
            .map_err(|e| LlmError::Streaming(format!("malformed OpenAI stream event: {e}")))?;

        let chunks = match event.event_type.as_str() {
            "response.created" | "response.in_progress" => {
                if let Some(response) = &event.response {
                    self.apply_response(response);
                }
                Vec::new()
            }
            "response.output_item.added" => event.item.as_ref().map(|item| self.item_added(item)).unwrap_or_default(),
            "response.output_item.done" => event.item.as_ref().map(|item| self.item_done(item)).unwrap_or_default(),
            "response.output_text.delta" => self.assembler.push(ContentUnit::Text(event.delta.unwrap_or_default())),
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                self.assembler.push(ContentUnit::Reasoning(event.delta.unwrap_or_default()))
            }
            "response.function_call_arguments.delta" => {
                self.streamed_arguments = true;
                self.assembler.push(ContentUnit::FunctionCall {
                    call_id: None,
                    name: None,
                    arguments: event.delta.unwrap_or_default(),
                })
            }
            "response.code_interpreter_call_code.delta" => {
                self.streamed_code = true;
                self.assembler.push(ContentUnit::CodeExecution {
                    code: event.delta.unwrap_or_default(),
                    complete: false,
                })
            }
            "response.code_interpreter_call_code.done" => self.assembler.push(ContentUnit::CodeExecution {
                code: String::new(),
                complete: true,
            }),
            "response.completed" | "response.incomplete" => {
                if let Some(response) = &event.response {
                    self.apply_response(response);
                    if let Some(reason) = response.incomplete_details.as_ref().and_then(|d| d.reason.as_deref()) {
                        self.assembler.set_metadata("stop_reason", reason);
                    }
                }
                if event.event_type == "response.incomplete" {
                    self.assembler.mark_incomplete();
                }
                self.assembler.finish()
            }
            "response.failed" => {
                let message = event
                    .response
                    .and_then(|response| response.error)
                    .map_or_else(|| "response failed".to_owned(), |error| error.message);
                self.fail(&in_band_error(None, message))
            }
            "error" => {
                let message = event.message.unwrap_or_else(|| "stream error".to_owned());
                self.fail(&in_band_error(None, message))
            }
            other => {
                tracing::debug!(event_type = other, "skipping OpenAI stream event");
                Vec::new()
            }
        };

        Ok(chunks)
    }

    fn assembler(&self) -> &ChunkAssembler {
        &self.assembler
    }

    fn assembler_mut(&mut self) -> &mut ChunkAssembler {
        &mut self.assembler
    }
}

fn item_type(item: &Value) -> Option<&str> {
    str_field(item, "type")
}

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkEvent, ReasoningConfig, ReasoningEffort};

    fn feed(converter: &mut OpenAiStreamConverter, events: &[Value]) -> Vec<ResponseChunk> {
        let mut chunks = Vec::new();
        for event in events {
            chunks.extend(converter.convert(&event.to_string()).unwrap());
        }
        chunks.extend(converter.finish());
        chunks
    }

    fn final_response(chunks: &[ResponseChunk]) -> &Response {
        chunks
            .iter()
            .find_map(|chunk| match &chunk.event {
                ChunkEvent::Completed { response } => Some(response),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn reasoning_requests_encrypted_content() {
        let mut request = Request::new("o4-mini", "hi");
        request.reasoning = Some(ReasoningConfig {
            budget_tokens: Some(20_000),
            ..ReasoningConfig::default()
        });

        let body = serde_json::to_value(to_openai_request(&request)).unwrap();
        assert_eq!(body["reasoning"]["effort"], "high");
        assert_eq!(body["include"], json!(["reasoning.encrypted_content"]));
        assert_eq!(body["store"], false);
    }

    #[test]
    fn code_interpreter_gets_auto_container() {
        let mut request = Request::new("gpt-4o", "hi");
        request.tools = vec![Tool::CodeInterpreter { container: None }];

        let body = serde_json::to_value(to_openai_request(&request)).unwrap();
        assert_eq!(body["tools"][0], json!({"type": "code_interpreter", "container": {"type": "auto"}}));
        assert!(body.get("store").is_none());
    }

    #[test]
    fn response_skips_unknown_items() {
        let response: OpenAiResponse = serde_json::from_value(json!({
            "id": "resp_abc",
            "created_at": 1_700_000_000,
            "model": "gpt-4o-2024-08-06",
            "status": "completed",
            "output": [
                {"type": "web_search_call", "id": "ws_1", "status": "completed"},
                {"type": "message", "id": "msg_1", "role": "assistant", "status": "completed",
                 "content": [{"type": "output_text", "text": "Hi", "annotations": []}]},
                {"type": "code_interpreter_call", "id": "ci_1", "status": "interpreting", "code": "1+1", "outputs": []}
            ],
            "usage": {"input_tokens": 3, "output_tokens": 1, "total_tokens": 4}
        }))
        .unwrap();

        let response = from_openai_response(response, "gpt-4o");
        assert_eq!(response.output.len(), 2);
        assert_eq!(response.output_text(), "Hi");
        assert_eq!(response.model, "gpt-4o-2024-08-06");
        assert_eq!(response.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn error_envelope_becomes_upstream_error() {
        let error = openai_error(
            StatusCode::UNAUTHORIZED,
            r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}}"#,
        );

        let LlmError::Upstream { status, message } = error else {
            panic!("expected upstream error");
        };
        assert_eq!(status, 401);
        assert_eq!(message, "invalid_api_key: Incorrect API key provided");
    }

    #[test]
    fn stream_rebuilds_text_and_function_call() {
        let mut converter = OpenAiStreamConverter::new("gpt-4o");
        let chunks = feed(
            &mut converter,
            &[
                json!({"type": "response.created", "response": {"id": "resp_1", "model": "gpt-4o-2024-08-06"}}),
                json!({"type": "response.output_item.added", "item": {"type": "message", "id": "msg_up"}}),
                json!({"type": "response.output_text.delta", "delta": "Checking"}),
                json!({"type": "response.output_item.done", "item": {"type": "message", "id": "msg_up"}}),
                json!({"type": "response.output_item.added", "item": {"type": "function_call", "call_id": "call_9", "name": "lookup"}}),
                json!({"type": "response.function_call_arguments.delta", "delta": "{\"q\":1}"}),
                json!({"type": "response.output_item.done", "item": {"type": "function_call", "call_id": "call_9", "name": "lookup", "arguments": "{\"q\":1}"}}),
                json!({"type": "response.completed", "response": {"model": "gpt-4o-2024-08-06", "usage": {"input_tokens": 5, "output_tokens": 2, "total_tokens": 7}}}),
            ],
        );

        let response = final_response(&chunks);
        assert_eq!(response.output.len(), 2);
        let Item::FunctionCall(call) = &response.output[1] else {
            panic!("expected function call");
        };
        assert_eq!(call.call_id, "call_9");
        assert_eq!(call.arguments, "{\"q\":1}");
        assert_eq!(response.model, "gpt-4o-2024-08-06");
        assert!(converter.is_finished());
    }

    #[test]
    fn encrypted_reasoning_is_kept() {
        let mut request = Request::new("o4-mini", "hi");
        request.reasoning = Some(ReasoningConfig {
            effort: Some(ReasoningEffort::Low),
            ..ReasoningConfig::default()
        });

        let mut converter = OpenAiStreamConverter::new(&request.model);
        let chunks = feed(
            &mut converter,
            &[
                json!({"type": "response.reasoning_summary_text.delta", "delta": "Short plan"}),
                json!({"type": "response.output_item.done", "item": {"type": "reasoning", "encrypted_content": "gAAAA"}}),
                json!({"type": "response.output_text.delta", "delta": "Answer"}),
            ],
        );

        let Item::Reasoning(reasoning) = &final_response(&chunks).output[0] else {
            panic!("expected reasoning");
        };
        assert_eq!(reasoning.encrypted_content.as_deref(), Some("gAAAA"));
        assert_eq!(reasoning.summary_text(), "Short plan");
    }

    #[test]
    fn encrypted_only_reasoning_stays_with_its_call() {
        let reasoning = |encrypted: &str| {
            json!({"type": "response.output_item.done", "item": {"type": "reasoning", "summary": [], "encrypted_content": encrypted}})
        };
        let call = |call_id: &str| {
            [
                json!({"type": "response.output_item.added", "item": {"type": "function_call", "call_id": call_id, "name": "lookup"}}),
                json!({"type": "response.output_item.done", "item": {"type": "function_call", "call_id": call_id, "name": "lookup", "arguments": "{}"}}),
            ]
        };

        let mut events = vec![reasoning("ENC_A")];
        events.extend(call("c1"));
        events.push(reasoning("ENC_B"));
        events.extend(call("c2"));

        let mut converter = OpenAiStreamConverter::new("o4-mini");
        let chunks = feed(&mut converter, &events);

        let shape: Vec<String> = final_response(&chunks)
            .output
            .iter()
            .map(|item| match item {
                Item::Reasoning(reasoning) => {
                    format!("reasoning:{}", reasoning.encrypted_content.as_deref().unwrap_or("-"))
                }
                Item::FunctionCall(call) => format!("call:{}", call.call_id),
                other => panic!("unexpected item {other:?}"),
            })
            .collect();
        assert_eq!(shape, ["reasoning:ENC_A", "call:c1", "reasoning:ENC_B", "call:c2"]);

        // Streamed items are final; the completed response repeats them verbatim
        let completed = &final_response(&chunks).output;
        let done: Vec<(u32, &Item)> = chunks
            .iter()
            .filter_map(|chunk| match &chunk.event {
                ChunkEvent::OutputItemDone { output_index, item } => Some((*output_index, item)),
                _ => None,
            })
            .collect();
        assert_eq!(done.len(), completed.len());
        for (index, item) in done {
            assert_eq!(&completed[index as usize], item);
        }
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let mut converter = OpenAiStreamConverter::new("gpt-4o");
        assert!(matches!(converter.convert("{not json"), Err(LlmError::Streaming(_))));
    }

    #[test]
    fn failed_event_ends_stream_with_error() {
        let mut converter = OpenAiStreamConverter::new("gpt-4o");
        let chunks = converter
            .convert(&json!({"type": "response.failed", "response": {"error": {"message": "model overloaded"}}}).to_string())
            .unwrap();

        assert!(matches!(
            &chunks.last().unwrap().event,
            ChunkEvent::Error { message, .. } if message == "provider returned 502: model overloaded"
        ));
        assert!(converter.is_finished());
    }
}
