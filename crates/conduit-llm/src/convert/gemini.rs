//! Canonical <-> Gemini `generateContent` conversion

use std::collections::HashMap;

use http::StatusCode;
use serde_json::{Value, json};

use super::{
    ChunkAssembler, ContentUnit, StreamConverter, arguments_string, fallback_message, in_band_error, parse_data_url,
};
use crate::{
    error::LlmError,
    protocol::gemini::{
        GeminiBlob, GeminiCodeExecutionResult, GeminiContent, GeminiErrorResponse, GeminiExecutableCode,
        GeminiFileData, GeminiFunctionCall, GeminiFunctionCallingConfig, GeminiFunctionDeclaration,
        GeminiFunctionResponse, GeminiGenerationConfig, GeminiPart, GeminiRequest, GeminiResponse,
        GeminiThinkingConfig, GeminiTool, GeminiToolConfig, GeminiUsageMetadata,
    },
    types::{
        CodeOutput, ContentPart, InputTokensDetails, Input, Item, NamedToolChoice, OutputTokensDetails,
        ReasoningConfig, Request, Response, ResponseChunk, Role, TextFormat, Tool, ToolChoice, ToolChoiceMode, Usage,
    },
};

/// Convert a canonical request to a `generateContent` body
pub fn to_gemini_request(request: &Request) -> GeminiRequest {
    let mut builder = ContentBuilder::default();
    if let Some(instructions) = &request.instructions {
        builder.system.push(instructions.clone());
    }

    match &request.input {
        Input::Text(text) => builder.push("user", GeminiPart::text(text.clone())),
        Input::Items(items) => {
            for item in items {
                builder.push_item(item);
            }
        }
    }
    builder.flush_signature();

    let declarations: Vec<GeminiFunctionDeclaration> = request
        .tools
        .iter()
        .filter_map(Tool::as_function)
        .map(|function| GeminiFunctionDeclaration {
            name: function.name.clone(),
            description: function.description.clone(),
            parameters: function.parameters.clone(),
        })
        .collect();
    let has_declarations = !declarations.is_empty();

    let mut tools = Vec::new();
    if has_declarations {
        tools.push(GeminiTool {
            function_declarations: declarations,
            ..GeminiTool::default()
        });
    }
    for tool in &request.tools {
        match tool {
            Tool::CodeInterpreter { .. } => tools.push(GeminiTool {
                code_execution: Some(json!({})),
                ..GeminiTool::default()
            }),
            Tool::WebSearch => tools.push(GeminiTool {
                google_search: Some(json!({})),
                ..GeminiTool::default()
            }),
            Tool::Function(_) | Tool::ImageGeneration { .. } => {}
        }
    }

    let generation_config = generation_config(request);

    GeminiRequest {
        contents: builder.contents,
        system_instruction: (!builder.system.is_empty()).then(|| GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(builder.system.join("\n\n"))],
        }),
        generation_config: Some(generation_config).filter(|config| *config != GeminiGenerationConfig::default()),
        tools,
        tool_config: request
            .tool_choice
            .as_ref()
            .filter(|_| has_declarations)
            .map(to_tool_config),
    }
}

fn generation_config(request: &Request) -> GeminiGenerationConfig {
    let mut config = GeminiGenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_output_tokens,
        thinking_config: request
            .reasoning
            .as_ref()
            .and_then(ReasoningConfig::budget)
            .map(|thinking_budget| GeminiThinkingConfig {
                thinking_budget,
                include_thoughts: true,
            }),
        ..GeminiGenerationConfig::default()
    };

    match request.text_format() {
        Some(TextFormat::JsonSchema { .. } | TextFormat::JsonObject) if request.has_tools() => {
            tracing::debug!(model = %request.model, "dropping structured output schema, tools take precedence");
        }
        Some(TextFormat::JsonSchema { schema, .. }) => {
            config.response_mime_type = Some("application/json".to_owned());
            config.response_json_schema = Some(schema.clone());
        }
        Some(TextFormat::JsonObject) => config.response_mime_type = Some("application/json".to_owned()),
        Some(TextFormat::Text) | None => {}
    }

    if request
        .tools
        .iter()
        .any(|tool| matches!(tool, Tool::ImageGeneration { .. }))
    {
        config.response_modalities = vec!["TEXT".to_owned(), "IMAGE".to_owned()];
    }

    config
}

fn to_tool_config(choice: &ToolChoice) -> GeminiToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => ("AUTO", Vec::new()),
        ToolChoice::Mode(ToolChoiceMode::Required) => ("ANY", Vec::new()),
        ToolChoice::Mode(ToolChoiceMode::None) => ("NONE", Vec::new()),
        ToolChoice::Named(NamedToolChoice::Function { name }) => ("ANY", vec![name.clone()]),
    };

    GeminiToolConfig {
        function_calling_config: GeminiFunctionCallingConfig {
            mode,
            allowed_function_names,
        },
    }
}

/// Groups parts into alternating user/model contents
///
/// A reasoning item's signature is replayed on the next model part, which is
/// where Gemini expects it.
#[derive(Default)]
struct ContentBuilder {
    contents: Vec<GeminiContent>,
    system: Vec<String>,
    call_names: HashMap<String, String>,
    pending_signature: Option<String>,
}

impl ContentBuilder {
    fn push(&mut self, role: &str, mut part: GeminiPart) {
        if role == "model" {
            if let Some(signature) = self.pending_signature.take() {
                part.thought_signature = Some(signature);
            }
        } else {
            self.flush_signature();
        }

        match self.contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.push(part),
            _ => self.contents.push(GeminiContent {
                role: Some(role.to_owned()),
                parts: vec![part],
            }),
        }
    }

    /// Emit a dangling signature on an empty model part
    fn flush_signature(&mut self) {
        if let Some(signature) = self.pending_signature.take() {
            self.push(
                "model",
                GeminiPart {
                    text: Some(String::new()),
                    thought_signature: Some(signature),
                    ..GeminiPart::default()
                },
            );
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
                    Role::Assistant => "model",
                };
                for part in message.content.clone().into_parts(message.role) {
                    if let Some(part) = content_part(part) {
                        self.push(role, part);
                    }
                }
            }
            Item::FunctionCall(call) => {
                self.call_names.insert(call.call_id.clone(), call.name.clone());
                self.push(
                    "model",
                    GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            id: None,
                            name: call.name.clone(),
                            args: serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({})),
                        }),
                        ..GeminiPart::default()
                    },
                );
            }
            Item::FunctionCallOutput(output) => {
                let name = self
                    .call_names
                    .get(&output.call_id)
                    .cloned()
                    .unwrap_or_else(|| output.call_id.clone());
                // Gemini wants an object; wrap anything else
                let response = match serde_json::from_str::<Value>(&output.output) {
                    Ok(Value::Object(object)) => Value::Object(object),
                    _ => json!({"output": output.output}),
                };
                self.push(
                    "user",
                    GeminiPart {
                        function_response: Some(GeminiFunctionResponse {
                            id: None,
                            name,
                            response,
                        }),
                        ..GeminiPart::default()
                    },
                );
            }
            Item::Reasoning(reasoning) => {
                if let Some(signature) = &reasoning.encrypted_content {
                    self.pending_signature = Some(signature.clone());
                }
            }
            Item::CodeInterpreterCall(call) => {
                self.push(
                    "model",
                    GeminiPart {
                        executable_code: Some(GeminiExecutableCode {
                            language: Some("PYTHON".to_owned()),
                            code: call.code.clone().unwrap_or_default(),
                        }),
                        ..GeminiPart::default()
                    },
                );
                let logs: String = call
                    .outputs
                    .iter()
                    .filter_map(|output| match output {
                        CodeOutput::Logs { logs } => Some(logs.as_str()),
                        CodeOutput::Image { .. } => None,
                    })
                    .collect();
                self.push(
                    "model",
                    GeminiPart {
                        code_execution_result: Some(GeminiCodeExecutionResult {
                            outcome: Some("OUTCOME_OK".to_owned()),
                            output: Some(logs),
                        }),
                        ..GeminiPart::default()
                    },
                );
            }
            Item::ImageGenerationCall(image) => {
                if let Some(data) = &image.result {
                    let format = image.output_format.as_deref().unwrap_or("png");
                    self.push(
                        "model",
                        GeminiPart {
                            inline_data: Some(GeminiBlob {
                                mime_type: format!("image/{format}"),
                                data: data.clone(),
                            }),
                            ..GeminiPart::default()
                        },
                    );
                }
            }
        }
    }
}

fn content_part(part: ContentPart) -> Option<GeminiPart> {
    match part {
        ContentPart::InputText { text } | ContentPart::OutputText { text, .. } => {
            (!text.is_empty()).then(|| GeminiPart::text(text))
        }
        ContentPart::InputImage { image_url, .. } => {
            let url = image_url?;
            let part = match parse_data_url(&url) {
                Some((mime_type, data)) => GeminiPart {
                    inline_data: Some(GeminiBlob {
                        mime_type: mime_type.to_owned(),
                        data: data.to_owned(),
                    }),
                    ..GeminiPart::default()
                },
                None => GeminiPart {
                    file_data: Some(GeminiFileData {
                        mime_type: None,
                        file_uri: url,
                    }),
                    ..GeminiPart::default()
                },
            };
            Some(part)
        }
    }
}

/// Content units for one response part, in the order Gemini intends them
///
/// A signature on a thought closes that thought. On any other part it comes
/// first, so replay puts it back on the same part.
fn part_units(part: GeminiPart) -> Vec<ContentUnit> {
    let thought = part.thought == Some(true);
    let mut units = Vec::new();

    if !thought && let Some(signature) = &part.thought_signature {
        units.push(ContentUnit::Signature(signature.clone()));
    }
    if let Some(text) = part.text {
        if thought {
            units.push(ContentUnit::Reasoning(text));
        } else {
            units.push(ContentUnit::Text(text));
        }
    }
    if let Some(blob) = part.inline_data {
        units.push(ContentUnit::Image {
            media_type: blob.mime_type,
            data: blob.data,
        });
    }
    if let Some(call) = part.function_call {
        units.push(ContentUnit::FunctionCall {
            call_id: call.id,
            name: Some(call.name),
            arguments: arguments_string(&call.args),
        });
    }
    if let Some(code) = part.executable_code {
        units.push(ContentUnit::CodeExecution {
            code: code.code,
            complete: true,
        });
    }
    if let Some(result) = part.code_execution_result {
        units.push(ContentUnit::CodeResult {
            output: result.output.unwrap_or_default(),
        });
    }
    if thought && let Some(signature) = part.thought_signature {
        units.push(ContentUnit::Signature(signature));
    }

    units
}

fn to_usage(usage: &GeminiUsageMetadata) -> Usage {
    let output_tokens = usage.candidates_token_count + usage.thoughts_token_count;
    let total_tokens = if usage.total_token_count > 0 {
        usage.total_token_count
    } else {
        usage.prompt_token_count + output_tokens
    };

    Usage {
        input_tokens: usage.prompt_token_count,
        output_tokens,
        total_tokens,
        input_tokens_details: (usage.cached_content_token_count > 0).then_some(InputTokensDetails {
            cached_tokens: usage.cached_content_token_count,
        }),
        output_tokens_details: (usage.thoughts_token_count > 0).then_some(OutputTokensDetails {
            reasoning_tokens: usage.thoughts_token_count,
        }),
    }
}

/// Map an error body to [`LlmError::Upstream`]
pub fn gemini_error(status: StatusCode, body: &str) -> LlmError {
    // Streaming errors sometimes arrive wrapped in an array
    let envelope = serde_json::from_str::<GeminiErrorResponse>(body).ok().or_else(|| {
        serde_json::from_str::<Vec<GeminiErrorResponse>>(body)
            .ok()
            .and_then(|mut envelopes| envelopes.pop())
    });

    let message = envelope
        .filter(|envelope| !envelope.error.message.is_empty())
        .map_or_else(
            || fallback_message(status, body),
            |envelope| match envelope.error.status {
                Some(code) => format!("{code}: {}", envelope.error.message),
                None => envelope.error.message,
            },
        );

    LlmError::Upstream {
        status: status.as_u16(),
        message,
    }
}

/// Converts Gemini stream payloads; each is a full `GeminiResponse`
pub struct GeminiStreamConverter {
    assembler: ChunkAssembler,
}

impl GeminiStreamConverter {
    pub fn new(model: &str) -> Self {
        Self {
            assembler: ChunkAssembler::new(model),
        }
    }

    fn apply(&mut self, response: GeminiResponse) -> Vec<ResponseChunk> {
        if let Some(error) = response.error {
            return self.fail(&in_band_error(error.code, error.message));
        }

        if let Some(model) = &response.model_version {
            self.assembler.set_model(model);
        }
        if let Some(usage) = &response.usage_metadata {
            self.assembler.set_usage(to_usage(usage));
        }
        if let Some(reason) = response.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            self.assembler.set_metadata("block_reason", reason);
        }

        let mut chunks = Vec::new();

        // Only the first candidate is surfaced
        if let Some(candidate) = response.candidates.into_iter().next() {
            let parts = candidate.content.map(|content| content.parts).unwrap_or_default();
            for unit in parts.into_iter().flat_map(part_units) {
                chunks.extend(self.assembler.push(unit));
            }

            if let Some(reason) = candidate.finish_reason {
                if reason == "MAX_TOKENS" {
                    self.assembler.mark_incomplete();
                }
                self.assembler.set_metadata("stop_reason", reason);
            }
        }

        chunks
    }
}

impl StreamConverter for GeminiStreamConverter {
    fn convert(&mut self, payload: &str) -> Result<Vec<ResponseChunk>, LlmError> {
        let response: GeminiResponse = serde_json::from_str(payload)
            .map_err(|e| LlmError::Streaming(format!("malformed Gemini stream payload: {e}")))?;

        Ok(self.apply(response))
    }

    fn assembler(&self) -> &ChunkAssembler {
        &self.assembler
    }

    fn assembler_mut(&mut self) -> &mut ChunkAssembler {
        &mut self.assembler
    }
}

/// Convert a `generateContent` body to a canonical response
pub fn from_gemini_response(response: GeminiResponse, requested_model: &str) -> Response {
    let mut converter = GeminiStreamConverter::new(requested_model);
    converter.apply(response);
    converter.assembler.into_response()
}
