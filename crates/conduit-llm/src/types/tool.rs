use serde::{Deserialize, Serialize};

/// Tool the model may use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
    Function(FunctionTool),
    CodeInterpreter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container: Option<serde_json::Value>,
    },
    WebSearch,
    ImageGeneration {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality: Option<String>,
    },
}

impl Tool {
    pub const fn as_function(&self) -> Option<&FunctionTool> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }
}

/// Client-side function the model can call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// How the model should pick tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Named(NamedToolChoice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

/// Force a specific function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NamedToolChoice {
    Function { name: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_choice_accepts_mode_or_function() {
        let mode: ToolChoice = serde_json::from_value(json!("required")).unwrap();
        assert_eq!(mode, ToolChoice::Mode(ToolChoiceMode::Required));

        let named: ToolChoice = serde_json::from_value(json!({"type": "function", "name": "lookup"})).unwrap();
        assert_eq!(
            named,
            ToolChoice::Named(NamedToolChoice::Function {
                name: "lookup".to_owned()
            })
        );
    }

    #[test]
    fn builtin_tools_are_tag_only() {
        let tools: Vec<Tool> = serde_json::from_value(json!([
            {"type": "web_search"},
            {"type": "code_interpreter"},
            {"type": "image_generation", "output_format": "png"}
        ]))
        .unwrap();

        assert_eq!(tools[0], Tool::WebSearch);
        assert!(matches!(tools[1], Tool::CodeInterpreter { container: None }));
        assert_eq!(serde_json::to_value(&tools[0]).unwrap(), json!({"type": "web_search"}));
    }
}
