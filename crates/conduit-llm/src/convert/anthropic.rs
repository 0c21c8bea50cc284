//! Canonical <-> Anthropic Messages API conversion

use http::StatusCode;
use serde_json::{Value, json};

use super::{
    ChunkAssembler, ContentUnit, StreamConverter, arguments_string, fallback_message, in_band_error, parse_data_url,
};
use crate::{
    error::LlmError,
    protocol::anthropic::{
        AnthropicBlock, AnthropicDelta, AnthropicErrorResponse, AnthropicImageSource, AnthropicMessage,
        AnthropicOutputFormat, AnthropicRequest, AnthropicResponse, AnthropicStreamEvent, AnthropicThinking,
        AnthropicTool, AnthropicToolChoice, AnthropicUsage,
    },
    types::{
        ContentPart, InputTokensDetails, Input, Item, NamedToolChoice, ReasoningConfig, Request, Response,
        ResponseChunk, Role, Tool, ToolChoice, ToolChoiceMode, Usage,
    },
};

/// Used when the caller sets no output limit; Anthropic requires one
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Smallest thinking budget Anthropic accepts
const MIN_THINKING_BUDGET: u32 = 1024;

pub const CODE_EXECUTION_TOOL: &str = "code_execution_20250522";
const WEB_SEARCH_TOOL: &str = "web_search_20250305";

/// Convert a canonical request to an Anthropic Messages body
pub fn to_anthropic_request(request: &Request) -> AnthropicRequest {
    let mut builder = MessageBuilder::default();
    if let Some(instructions) = &request.instructions {
        builder.system.push(instructions.clone());
    }

    match &request.input {
        Input::Text(text) => builder.push("user", AnthropicBlock::Text { text: text.clone() }),
        Input::Items(items) => {
            for item in items {
                builder.push_item(item);
            }
        }
    }

    let thinking_budget = request
        .reasoning
        .as_ref()
        .and_then(ReasoningConfig::budget)
        .map(|budget| budget.max(MIN_THINKING_BUDGET));

    // The thinking budget counts against max_tokens and must stay below it
    let mut max_tokens = request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if let Some(budget) = thinking_budget
        && budget >= max_tokens
    {
        max_tokens = budget.saturating_add(DEFAULT_MAX_TOKENS);
    }

    let tools: Vec<AnthropicTool> = request.tools.iter().filter_map(to_anthropic_tool).collect();

    if request.json_schema().is_some() && request.has_tools() {
        tracing::debug!(model = %request.model, "dropping structured output schema, tools take precedence");
    }
    let output_format = request
        .json_schema()
        .filter(|_| uses_structured_output(request))
        .map(|schema| AnthropicOutputFormat::JsonSchema { schema: schema.clone() });

    AnthropicRequest {
        model: request.model.clone(),
        max_tokens,
        system: (!builder.system.is_empty()).then(|| builder.system.join("\n\n")),
        messages: builder.messages,
        temperature: request.temperature,
        top_p: request.top_p,
        stream: request.stream,
        tool_choice: request
            .tool_choice
            .as_ref()
            .filter(|_| !tools.is_empty())
            .map(to_anthropic_tool_choice),
        tools,
        thinking: thinking_budget.map(|budget_tokens| AnthropicThinking::Enabled { budget_tokens }),
        output_format,
    }
}

/// Whether `output_format` is sent, i.e. a schema with no tools to override it
pub fn uses_structured_output(request: &Request) -> bool {
    request.json_schema().is_some() && !request.has_tools()
}

/// Whether the request needs the code execution beta
pub fn uses_code_execution(request: &Request) -> bool {
    request
        .tools
        .iter()
        .any(|tool| matches!(tool, Tool::CodeInterpreter { .. }))
}

fn to_anthropic_tool(tool: &Tool) -> Option<AnthropicTool> {
    match tool {
        Tool::Function(function) => Some(AnthropicTool::Custom {
            name: function.name.clone(),
            description: function.description.clone(),
            input_schema: function
                .parameters
                .clone()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        }),
        Tool::CodeInterpreter { .. } => Some(AnthropicTool::Server {
            tool_type: CODE_EXECUTION_TOOL,
            name: "code_execution",
        }),
        Tool::WebSearch => Some(AnthropicTool::Server {
            tool_type: WEB_SEARCH_TOOL,
            name: "web_search",
        }),
        Tool::ImageGeneration { .. } => {
            tracing::debug!("Anthropic has no image generation tool, skipping");
            None
        }
    }
}

fn to_anthropic_tool_choice(choice: &ToolChoice) -> AnthropicToolChoice {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => AnthropicToolChoice::Auto,
        ToolChoice::Mode(ToolChoiceMode::Required) => AnthropicToolChoice::Any,
        ToolChoice::Mode(ToolChoiceMode::None) => AnthropicToolChoice::None,
        ToolChoice::Named(NamedToolChoice::Function { name }) => AnthropicToolChoice::Tool { name: name.clone() },
    }
}

/// Groups blocks into alternating user/assistant messages
#[derive(Default)]
struct MessageBuilder {
    messages: Vec<AnthropicMessage>,
    system: Vec<String>,
}

impl MessageBuilder {
    fn push(&mut self, role: &'static str, block: AnthropicBlock) {
        match self.messages.last_mut() {
            Some(last) if last.role == role => last.content.push(block),
            _ => self.messages.push(AnthropicMessage {
                role,
                content: vec![block],
            }),
        }
    }

    fn push_item(&mut self, item: &Item) {
        match item {
            Item::Message(message) => {
                let role = match message.role {
                    Role::System | Role::Developer => {
                        self.system.push(message.content.joined_text());
                        return;
                    }
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                for part in message.content.clone().into_parts(message.role) {
                    if let Some(block) = content_block(part) {
                        self.push(role, block);
                    }
                }
            }
            Item::FunctionCall(call) => self.push(
                "assistant",
                AnthropicBlock::ToolUse {
                    id: call.call_id.clone(),
                    name: call.name.clone(),
                    input: serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({})),
                },
            ),
            Item::FunctionCallOutput(output) => self.push(
                "user",
                AnthropicBlock::ToolResult {
                    tool_use_id: output.call_id.clone(),
                    content: output.output.clone(),
                    is_error: None,
                },
            ),
            Item::Reasoning(reasoning) => match &reasoning.encrypted_content {
                Some(data) if reasoning.redacted => {
                    self.push("assistant", AnthropicBlock::RedactedThinking { data: data.clone() });
                }
                Some(signature) => self.push(
                    "assistant",
                    AnthropicBlock::Thinking {
                        thinking: reasoning.summary_text(),
                        signature: signature.clone(),
                    },
                ),
                None => tracing::debug!("skipping reasoning item without signature"),
            },
            Item::CodeInterpreterCall(_) | Item::ImageGenerationCall(_) => {
                tracing::debug!("skipping hosted tool item in Anthropic history");
            }
        }
    }
}

fn content_block(part: ContentPart) -> Option<AnthropicBlock> {
    match part {
        ContentPart::InputText { text } | ContentPart::OutputText { text, .. } => {
            (!text.is_empty()).then_some(AnthropicBlock::Text { text })
        }
        ContentPart::InputImage { image_url, .. } => {
            let url = image_url?;
            let source = match parse_data_url(&url) {
                Some((media_type, data)) => AnthropicImageSource::Base64 {
                    media_type: media_type.to_owned(),
                    data: data.to_owned(),
                },
                None => AnthropicImageSource::Url { url },
            };
            Some(AnthropicBlock::Image { source })
        }
    }
}

/// Content units for a complete block
fn block_units(block: AnthropicBlock) -> Vec<ContentUnit> {
    match block {
        AnthropicBlock::Text { text } => vec![ContentUnit::Text(text)],
        AnthropicBlock::ToolUse { id, name, input } => vec![ContentUnit::FunctionCall {
            call_id: Some(id),
            name: Some(name),
            arguments: arguments_string(&input),
        }],
        AnthropicBlock::Thinking { thinking, signature } => {
            let mut units = vec![ContentUnit::Reasoning(thinking)];
            if !signature.is_empty() {
                units.push(ContentUnit::Signature(signature));
            }
            units
        }
        AnthropicBlock::RedactedThinking { data } => vec![ContentUnit::RedactedReasoning(data)],
        AnthropicBlock::ServerToolUse { input, .. } => vec![ContentUnit::CodeExecution {
            code: code_from_input(&input),
            complete: true,
        }],
        AnthropicBlock::CodeExecutionToolResult { content, .. } => vec![ContentUnit::CodeResult {
            output: content.stdout + &content.stderr,
        }],
        AnthropicBlock::Image { .. } | AnthropicBlock::ToolResult { .. } | AnthropicBlock::Unsupported => Vec::new(),
    }
}

fn code_from_input(input: &Value) -> String {
    input.get("code").and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn to_usage(usage: &AnthropicUsage) -> Usage {
    let cache_read = usage.cache_read_input_tokens.unwrap_or(0);
    let input_tokens =
        usage.input_tokens.unwrap_or(0) + cache_read + usage.cache_creation_input_tokens.unwrap_or(0);
    let output_tokens = usage.output_tokens.unwrap_or(0);

    Usage {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens + output_tokens,
        input_tokens_details: (cache_read > 0).then_some(InputTokensDetails {
            cached_tokens: cache_read,
        }),
        output_tokens_details: None,
    }
}

/// Later reports override earlier fields; absent fields keep their value
fn merge_usage(current: &mut AnthropicUsage, update: AnthropicUsage) {
    current.input_tokens = update.input_tokens.or(current.input_tokens);
    current.output_tokens = update.output_tokens.or(current.output_tokens);
    current.cache_read_input_tokens = update.cache_read_input_tokens.or(current.cache_read_input_tokens);
    current.cache_creation_input_tokens = update
        .cache_creation_input_tokens
        .or(current.cache_creation_input_tokens);
}

fn apply_stop_reason(assembler: &mut ChunkAssembler, stop_reason: &str) {
    assembler.set_metadata("stop_reason", stop_reason);
    if stop_reason == "max_tokens" {
        assembler.mark_incomplete();
    }
}

/// Convert an Anthropic Messages body to a canonical response
pub fn from_anthropic_response(response: AnthropicResponse, requested_model: &str) -> Response {
    let mut assembler = ChunkAssembler::new(requested_model);
    assembler.set_model(&response.model);

    for block in response.content {
        let awaits_result = matches!(block, AnthropicBlock::ServerToolUse { .. });
        for unit in block_units(block) {
            assembler.push(unit);
        }
        if !awaits_result {
            assembler.close_item();
        }
    }

    if let Some(usage) = &response.usage {
        assembler.set_usage(to_usage(usage));
    }
    if let Some(stop_reason) = &response.stop_reason {
        apply_stop_reason(&mut assembler, stop_reason);
    }

    assembler.into_response()
}

/// Map an error body to [`LlmError::Upstream`]
pub fn anthropic_error(status: StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<AnthropicErrorResponse>(body)
        .ok()
        .filter(|envelope| !envelope.error.message.is_empty())
        .map_or_else(
            || fallback_message(status, body),
            |envelope| format!("{}: {}", envelope.error.error_type, envelope.error.message),
        );

    LlmError::Upstream {
        status: status.as_u16(),
        message,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    ToolUse,
    ServerToolUse,
    Other,
}

/// Converts Anthropic SSE events; items close on `content_block_stop`
pub struct AnthropicStreamConverter {
    assembler: ChunkAssembler,
    block: BlockKind,
    server_input: String,
    usage: AnthropicUsage,
}

impl AnthropicStreamConverter {
    pub fn new(model: &str) -> Self {
        Self {
            assembler: ChunkAssembler::new(model),
            block: BlockKind::Other,
            server_input: String::new(),
            usage: AnthropicUsage::default(),
        }
    }

    fn record_usage(&mut self, usage: AnthropicUsage) {
        merge_usage(&mut self.usage, usage);
        self.assembler.set_usage(to_usage(&self.usage));
    }

    fn push_all(&mut self, units: Vec<ContentUnit>) -> Vec<ResponseChunk> {
        units.into_iter().flat_map(|unit| self.assembler.push(unit)).collect()
    }

    fn block_start(&mut self, block: AnthropicBlock) -> Vec<ResponseChunk> {
        self.server_input.clear();

        match block {
            AnthropicBlock::ServerToolUse { input, .. } => {
                // Input usually streams as JSON deltas; keep any complete form
                self.block = BlockKind::ServerToolUse;
                if input.get("code").is_some() {
                    self.server_input = input.to_string();
                }
                Vec::new()
            }
            AnthropicBlock::ToolUse { id, name, .. } => {
                self.block = BlockKind::ToolUse;
                self.assembler.push(ContentUnit::FunctionCall {
                    call_id: Some(id),
                    name: Some(name),
                    arguments: String::new(),
                })
            }
            other => {
                self.block = BlockKind::Other;
                self.push_all(block_units(other))
            }
        }
    }

    fn block_delta(&mut self, delta: AnthropicDelta) -> Vec<ResponseChunk> {
        match delta {
            AnthropicDelta::TextDelta { text } => self.assembler.push(ContentUnit::Text(text)),
            AnthropicDelta::ThinkingDelta { thinking } => self.assembler.push(ContentUnit::Reasoning(thinking)),
            AnthropicDelta::SignatureDelta { signature } => self.assembler.push(ContentUnit::Signature(signature)),
            AnthropicDelta::InputJsonDelta { partial_json } => match self.block {
                BlockKind::ToolUse => self.assembler.push(ContentUnit::FunctionCall {
                    call_id: None,
                    name: None,
                    arguments: partial_json,
                }),
                BlockKind::ServerToolUse => {
                    self.server_input.push_str(&partial_json);
                    Vec::new()
                }
                BlockKind::Other => Vec::new(),
            },
            AnthropicDelta::Other => Vec::new(),
        }
    }

    fn block_stop(&mut self) -> Vec<ResponseChunk> {
        if self.block == BlockKind::ServerToolUse {
            // The code item stays open until its result block arrives
            self.block = BlockKind::Other;
            let input: Value = serde_json::from_str(&self.server_input).unwrap_or_default();
            return self.assembler.push(ContentUnit::CodeExecution {
                code: code_from_input(&input),
                complete: true,
            });
        }

        self.block = BlockKind::Other;
        self.assembler.close_item()
    }
}

impl StreamConverter for AnthropicStreamConverter {
    fn convert(&mut self, payload: &str) -> Result<Vec<ResponseChunk>, LlmError> {
        let event: AnthropicStreamEvent = serde_json::from_str(payload)
            .map_err(|e| LlmError::Streaming(format!("malformed Anthropic stream event: {e}")))?;

        let chunks = match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.assembler.set_model(&message.model);
                if let Some(usage) = message.usage {
                    self.record_usage(usage);
                }
                Vec::new()
            }
            AnthropicStreamEvent::ContentBlockStart { content_block, .. } => self.block_start(content_block),
            AnthropicStreamEvent::ContentBlockDelta { delta, .. } => self.block_delta(delta),
            AnthropicStreamEvent::ContentBlockStop { .. } => self.block_stop(),
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.record_usage(usage);
                }
                if let Some(stop_reason) = delta.stop_reason {
                    apply_stop_reason(&mut self.assembler, &stop_reason);
                }
                Vec::new()
            }
            AnthropicStreamEvent::MessageStop => self.assembler.finish(),
            AnthropicStreamEvent::Ping => Vec::new(),
            AnthropicStreamEvent::Error { error } => {
                self.fail(&in_band_error(None, format!("{}: {}", error.error_type, error.message)))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ChunkEvent, FunctionCallItem, FunctionCallOutputItem, FunctionTool, MessageItem, ReasoningEffort,
        ReasoningItem, SummaryPart, TextConfig, TextFormat,
    };

    fn lookup_tool() -> Tool {
        Tool::Function(FunctionTool {
            name: "lookup".to_owned(),
            description: Some("Look something up".to_owned()),
            parameters: Some(json!({"type": "object", "properties": {"q": {"type": "string"}}})),
            strict: None,
        })
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
    fn effort_maps_to_thinking_budget_and_raises_max_tokens() {
        let mut request = Request::new("claude-sonnet-4", "hi");
        request.reasoning = Some(ReasoningConfig {
            effort: Some(ReasoningEffort::Medium),
            ..ReasoningConfig::default()
        });

        let body = serde_json::to_value(to_anthropic_request(&request)).unwrap();
        assert_eq!(body["thinking"], json!({"type": "enabled", "budget_tokens": 8192}));
        assert_eq!(body["max_tokens"], 8192 + DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tools_win_over_structured_output() {
        let mut request = Request::new("claude-sonnet-4", "hi");
        request.tools = vec![lookup_tool()];
        request.text = Some(TextConfig {
            format: Some(TextFormat::JsonSchema {
                name: "answer".to_owned(),
                schema: json!({"type": "object"}),
                description: None,
                strict: None,
            }),
        });

        let body = serde_json::to_value(to_anthropic_request(&request)).unwrap();
        assert!(body.get("output_format").is_none());
        assert_eq!(body["tools"][0]["name"], "lookup");

        request.tools.clear();
        let body = serde_json::to_value(to_anthropic_request(&request)).unwrap();
        assert_eq!(body["output_format"]["type"], "json_schema");
    }

    #[test]
    fn history_becomes_alternating_messages() {
        let mut request = Request::new(
            "claude-sonnet-4",
            vec![
                Item::Message(MessageItem::text(Role::System, "Be brief.")),
                Item::Message(MessageItem::text(Role::User, "Weather in Oslo?")),
                Item::Reasoning(ReasoningItem {
                    id: None,
                    summary: vec![SummaryPart::SummaryText {
                        text: "Need the tool".to_owned(),
                    }],
                    encrypted_content: Some("sig".to_owned()),
                    ..ReasoningItem::default()
                }),
                Item::FunctionCall(FunctionCallItem {
                    id: None,
                    call_id: "toolu_1".to_owned(),
                    name: "lookup".to_owned(),
                    arguments: r#"{"q":"oslo"}"#.to_owned(),
                    status: None,
                }),
                Item::FunctionCallOutput(FunctionCallOutputItem {
                    id: None,
                    call_id: "toolu_1".to_owned(),
                    output: "4C".to_owned(),
                }),
            ],
        );
        request.tools = vec![lookup_tool()];

        let body = serde_json::to_value(to_anthropic_request(&request)).unwrap();
        assert_eq!(body["system"], "Be brief.");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "thinking");
        assert_eq!(messages[1]["content"][1]["input"], json!({"q": "oslo"}));
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn response_round_trips_model_and_tool_name() {
        let mut request = Request::new("claude-sonnet-4", "hi");
        request.tools = vec![lookup_tool()];
        let body = serde_json::to_value(to_anthropic_request(&request)).unwrap();

        let response: AnthropicResponse = serde_json::from_value(json!({
            "model": body["model"],
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_9", "name": body["tools"][0]["name"], "input": {"q": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 4, "cache_read_input_tokens": 2}
        }))
        .unwrap();

        let response = from_anthropic_response(response, &request.model);
        assert_eq!(response.model, "claude-sonnet-4");
        let Item::FunctionCall(call) = &response.output[1] else {
            panic!("expected function call");
        };
        assert_eq!(call.name, "lookup");
        assert_eq!(call.call_id, "toolu_9");

        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.input_tokens_details.unwrap().cached_tokens, 2);
        assert_eq!(response.metadata["stop_reason"], "tool_use");
    }

    #[test]
    fn redacted_thinking_is_replayed_in_place() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "content": [
                {"type": "redacted_thinking", "data": "REDACTED_BLOB"},
                {"type": "thinking", "thinking": "Visible", "signature": "EqQB"},
                {"type": "text", "text": "ok"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2}
        }))
        .unwrap();

        let response = from_anthropic_response(response, "claude-sonnet-4");
        let Item::Reasoning(redacted) = &response.output[0] else {
            panic!("expected reasoning");
        };
        assert!(redacted.redacted);
        assert_eq!(redacted.encrypted_content.as_deref(), Some("REDACTED_BLOB"));

        let mut history = vec![Item::Message(MessageItem::text(Role::User, "hi"))];
        history.extend(response.output);
        history.push(Item::Message(MessageItem::text(Role::User, "again")));

        let body = serde_json::to_value(to_anthropic_request(&Request::new("claude-sonnet-4", history))).unwrap();
        assert_eq!(
            body["messages"][1]["content"],
            json!([
                {"type": "redacted_thinking", "data": "REDACTED_BLOB"},
                {"type": "thinking", "thinking": "Visible", "signature": "EqQB"},
                {"type": "text", "text": "ok"}
            ])
        );
    }

    #[test]
    fn stream_closes_items_on_block_stop() {
        let mut converter = AnthropicStreamConverter::new("claude-sonnet-4");
        let events = [
            json!({"type": "message_start", "message": {"model": "claude-sonnet-4-20250514", "usage": {"input_tokens": 12, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Plan"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "EqQB"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "One"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "content_block_start", "index": 2, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 2, "delta": {"type": "text_delta", "text": "Two"}}),
            json!({"type": "content_block_stop", "index": 2}),
            json!({"type": "content_block_start", "index": 3, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {}}}),
            json!({"type": "content_block_delta", "index": 3, "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}}),
            json!({"type": "content_block_delta", "index": 3, "delta": {"type": "input_json_delta", "partial_json": "\"x\"}"}}),
            json!({"type": "content_block_stop", "index": 3}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 40}}),
            json!({"type": "message_stop"}),
        ];

        let mut chunks = Vec::new();
        for event in &events {
            chunks.extend(converter.convert(&event.to_string()).unwrap());
        }
        assert!(converter.is_finished());
        assert!(converter.finish().is_empty());

        let response = final_response(&chunks);
        assert_eq!(response.output.len(), 4);
        let Item::Reasoning(reasoning) = &response.output[0] else {
            panic!("expected reasoning");
        };
        assert_eq!(reasoning.encrypted_content.as_deref(), Some("EqQB"));
        let Item::FunctionCall(call) = &response.output[3] else {
            panic!("expected function call");
        };
        assert_eq!(call.arguments, r#"{"q":"x"}"#);

        let usage = response.usage.as_ref().unwrap();
        assert_eq!((usage.input_tokens, usage.output_tokens), (12, 40));
        assert_eq!(response.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn code_execution_waits_for_result_block() {
        let mut converter = AnthropicStreamConverter::new("claude-sonnet-4");
        let events = [
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "server_tool_use", "id": "srvtoolu_1", "name": "code_execution", "input": {}}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"code\": \"print(2)\"}"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "code_execution_tool_result", "tool_use_id": "srvtoolu_1", "content": {"type": "code_execution_result", "stdout": "2\n", "stderr": "", "return_code": 0}}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_stop"}),
        ];

        let mut chunks = Vec::new();
        for event in &events {
            chunks.extend(converter.convert(&event.to_string()).unwrap());
        }

        let Item::CodeInterpreterCall(code) = &final_response(&chunks).output[0] else {
            panic!("expected code item");
        };
        assert_eq!(code.code.as_deref(), Some("print(2)"));
        assert_eq!(code.outputs.len(), 1);
    }

    #[test]
    fn error_event_fails_stream() {
        let mut converter = AnthropicStreamConverter::new("claude-sonnet-4");
        let chunks = converter
            .convert(r#"{"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}"#)
            .unwrap();

        assert!(matches!(
            &chunks.last().unwrap().event,
            ChunkEvent::Error { message, .. } if message == "provider returned 502: overloaded_error: Overloaded"
        ));
    }

    #[test]
    fn error_envelope_is_readable() {
        let error = anthropic_error(
            StatusCode::BAD_REQUEST,
            r#"{"type": "error", "error": {"type": "invalid_request_error", "message": "max_tokens: required"}}"#,
        );
        assert_eq!(
            error.to_string(),
            "provider returned 400: invalid_request_error: max_tokens: required"
        );
    }
}
