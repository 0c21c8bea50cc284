use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{Item, NamedToolChoice, Tool, ToolChoice};
use crate::error::LlmError;

/// Canonical provider-agnostic request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub input: Input,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextConfig>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<Include>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Request {
    /// Minimal request with a plain text prompt
    pub fn new(model: impl Into<String>, input: impl Into<Input>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            instructions: None,
            tools: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: None,
            temperature: None,
            top_p: None,
            max_output_tokens: None,
            reasoning: None,
            text: None,
            stream: false,
            include: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Reject requests no provider could serve
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.model.trim().is_empty() {
            return Err(invalid("model must not be empty"));
        }

        match &self.input {
            Input::Text(text) if text.is_empty() => return Err(invalid("input text must not be empty")),
            Input::Items(items) if items.is_empty() => return Err(invalid("input must contain at least one item")),
            _ => {}
        }

        if let Some(temperature) = self.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(invalid("temperature must be between 0 and 2"));
        }

        if let Some(top_p) = self.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(invalid("top_p must be between 0 and 1"));
        }

        if self.max_output_tokens == Some(0) {
            return Err(invalid("max_output_tokens must be greater than zero"));
        }

        let mut names = HashSet::new();
        for function in self.tools.iter().filter_map(Tool::as_function) {
            if function.name.trim().is_empty() {
                return Err(invalid("function tool name must not be empty"));
            }
            if !names.insert(function.name.as_str()) {
                return Err(invalid(format!("duplicate function tool '{}'", function.name)));
            }
        }

        if let Some(ToolChoice::Named(NamedToolChoice::Function { name })) = &self.tool_choice
            && !names.contains(name.as_str())
        {
            return Err(invalid(format!("tool_choice names unknown function '{name}'")));
        }

        if let Some(TextFormat::JsonSchema { name, .. }) = self.text_format()
            && name.trim().is_empty()
        {
            return Err(invalid("json_schema format requires a name"));
        }

        Ok(())
    }

    pub fn text_format(&self) -> Option<&TextFormat> {
        self.text.as_ref().and_then(|text| text.format.as_ref())
    }

    /// Structured output schema, when one was requested
    pub fn json_schema(&self) -> Option<&serde_json::Value> {
        match self.text_format() {
            Some(TextFormat::JsonSchema { schema, .. }) => Some(schema),
            _ => None,
        }
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Whether the caller wants reasoning state returned for replay
    pub fn wants_encrypted_reasoning(&self) -> bool {
        self.include.contains(&Include::ReasoningEncryptedContent)
    }
}

fn invalid(message: impl Into<String>) -> LlmError {
    LlmError::InvalidRequest(message.into())
}

/// Request input: a plain prompt or a list of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    Text(String),
    Items(Vec<Item>),
}

impl From<&str> for Input {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Input {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<Item>> for Input {
    fn from(items: Vec<Item>) -> Self {
        Self::Items(items)
    }
}

/// Reasoning controls
///
/// Providers take either a qualitative effort or a token budget; whichever
/// one is missing is derived from the other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReasoningSummary>,
}

impl ReasoningConfig {
    /// Effort level, derived from the budget when only that is set
    pub fn effort(&self) -> Option<ReasoningEffort> {
        self.effort.or_else(|| self.budget_tokens.map(ReasoningEffort::from_budget))
    }

    /// Token budget, derived from the effort when only that is set
    pub fn budget(&self) -> Option<u32> {
        self.budget_tokens.or_else(|| self.effort.map(ReasoningEffort::budget))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Thinking token budget for this effort
    pub const fn budget(self) -> u32 {
        match self {
            Self::Minimal => 1_024,
            Self::Low => 2_048,
            Self::Medium => 8_192,
            Self::High => 24_576,
        }
    }

    /// Closest effort for a thinking token budget
    pub const fn from_budget(budget: u32) -> Self {
        match budget {
            0..=1_024 => Self::Minimal,
            1_025..=4_096 => Self::Low,
            4_097..=16_384 => Self::Medium,
            _ => Self::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<TextFormat>,
}

/// Output text format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextFormat {
    Text,
    JsonObject,
    JsonSchema {
        name: String,
        schema: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strict: Option<bool>,
    },
}

/// Extra output the caller asks providers to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Include {
    #[serde(rename = "reasoning.encrypted_content")]
    ReasoningEncryptedContent,
    #[serde(rename = "code_interpreter_call.outputs")]
    CodeInterpreterOutputs,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::FunctionTool;

    fn lookup_tool(name: &str) -> Tool {
        Tool::Function(FunctionTool {
            name: name.to_owned(),
            description: None,
            parameters: Some(json!({"type": "object"})),
            strict: None,
        })
    }

    #[test]
    fn parses_wire_shape() {
        let request: Request = serde_json::from_value(json!({
            "model": "gpt-4o",
            "input": "hello",
            "reasoning": {"effort": "high"},
            "text": {"format": {"type": "json_schema", "name": "answer", "schema": {"type": "object"}}},
            "include": ["reasoning.encrypted_content"],
            "stream": true
        }))
        .unwrap();

        assert_eq!(request.input, Input::Text("hello".to_owned()));
        assert!(request.stream);
        assert!(request.wants_encrypted_reasoning());
        assert_eq!(request.json_schema(), Some(&json!({"type": "object"})));
        request.validate().unwrap();
    }

    #[test]
    fn rejects_empty_input() {
        let request = Request::new("gpt-4o", "");
        assert!(matches!(request.validate(), Err(LlmError::InvalidRequest(_))));

        let request = Request::new("gpt-4o", Vec::<Item>::new());
        assert!(matches!(request.validate(), Err(LlmError::InvalidRequest(_))));
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let mut request = Request::new("gpt-4o", "hi");
        request.temperature = Some(2.5);
        assert!(request.validate().is_err());

        let mut request = Request::new("gpt-4o", "hi");
        request.max_output_tokens = Some(0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_or_unknown_tools() {
        let mut request = Request::new("gpt-4o", "hi");
        request.tools = vec![lookup_tool("lookup"), lookup_tool("lookup")];
        assert!(request.validate().is_err());

        let mut request = Request::new("gpt-4o", "hi");
        request.tools = vec![lookup_tool("lookup")];
        request.tool_choice = Some(ToolChoice::Named(NamedToolChoice::Function {
            name: "search".to_owned(),
        }));
        assert!(request.validate().is_err());
    }

    #[test]
    fn reasoning_effort_and_budget_derive_each_other() {
        let effort_only = ReasoningConfig {
            effort: Some(ReasoningEffort::Medium),
            ..ReasoningConfig::default()
        };
        assert_eq!(effort_only.budget(), Some(8_192));

        let budget_only = ReasoningConfig {
            budget_tokens: Some(3_000),
            ..ReasoningConfig::default()
        };
        assert_eq!(budget_only.effort(), Some(ReasoningEffort::Low));

        let both = ReasoningConfig {
            effort: Some(ReasoningEffort::High),
            budget_tokens: Some(500),
            summary: None,
        };
        assert_eq!(both.effort(), Some(ReasoningEffort::High));
        assert_eq!(both.budget(), Some(500));
    }

    #[test]
    fn stream_flag_is_omitted_when_false() {
        let value = serde_json::to_value(Request::new("gpt-4o", "hi")).unwrap();
        assert_eq!(value, json!({"model": "gpt-4o", "input": "hi"}));
    }
}
