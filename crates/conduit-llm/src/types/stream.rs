use conduit_core::ErrorKind;
use serde::{Deserialize, Serialize};

use super::{ContentPart, Item, Response, SummaryPart};

/// One event of a canonical response stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
    /// Gap-free position in the stream, starting at 0
    pub sequence_number: u64,
    #[serde(flatten)]
    pub event: ChunkEvent,
}

/// Canonical stream event, tagged by its Responses API name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChunkEvent {
    #[serde(rename = "response.created")]
    Created { response: Response },

    #[serde(rename = "response.in_progress")]
    InProgress { response: Response },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: u32, item: Item },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone { output_index: u32, item: Item },

    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        item_id: String,
        output_index: u32,
        content_index: u32,
        part: ContentPart,
    },

    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        item_id: String,
        output_index: u32,
        content_index: u32,
        part: ContentPart,
    },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        item_id: String,
        output_index: u32,
        content_index: u32,
        text: String,
    },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        item_id: String,
        output_index: u32,
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        item_id: String,
        output_index: u32,
        arguments: String,
    },

    #[serde(rename = "response.reasoning_summary_part.added")]
    ReasoningSummaryPartAdded {
        item_id: String,
        output_index: u32,
        summary_index: u32,
        part: SummaryPart,
    },

    #[serde(rename = "response.reasoning_summary_part.done")]
    ReasoningSummaryPartDone {
        item_id: String,
        output_index: u32,
        summary_index: u32,
        part: SummaryPart,
    },

    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta {
        item_id: String,
        output_index: u32,
        summary_index: u32,
        delta: String,
    },

    #[serde(rename = "response.reasoning_summary_text.done")]
    ReasoningSummaryTextDone {
        item_id: String,
        output_index: u32,
        summary_index: u32,
        text: String,
    },

    #[serde(rename = "response.image_generation_call.in_progress")]
    ImageGenerationInProgress { item_id: String, output_index: u32 },

    #[serde(rename = "response.image_generation_call.generating")]
    ImageGenerationGenerating { item_id: String, output_index: u32 },

    #[serde(rename = "response.image_generation_call.partial_image")]
    ImageGenerationPartialImage {
        item_id: String,
        output_index: u32,
        partial_image_index: u32,
        partial_image_b64: String,
    },

    #[serde(rename = "response.code_interpreter_call.in_progress")]
    CodeInterpreterInProgress { item_id: String, output_index: u32 },

    #[serde(rename = "response.code_interpreter_call_code.delta")]
    CodeInterpreterCodeDelta {
        item_id: String,
        output_index: u32,
        delta: String,
    },

    #[serde(rename = "response.code_interpreter_call_code.done")]
    CodeInterpreterCodeDone {
        item_id: String,
        output_index: u32,
        code: String,
    },

    #[serde(rename = "response.code_interpreter_call.interpreting")]
    CodeInterpreterInterpreting { item_id: String, output_index: u32 },

    #[serde(rename = "response.code_interpreter_call.completed")]
    CodeInterpreterCompleted { item_id: String, output_index: u32 },

    #[serde(rename = "response.completed")]
    Completed { response: Response },

    /// Terminal failure, no further chunks follow
    #[serde(rename = "error")]
    Error { code: ErrorKind, message: String },
}

impl ChunkEvent {
    /// Wire name of the event
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "response.created",
            Self::InProgress { .. } => "response.in_progress",
            Self::OutputItemAdded { .. } => "response.output_item.added",
            Self::OutputItemDone { .. } => "response.output_item.done",
            Self::ContentPartAdded { .. } => "response.content_part.added",
            Self::ContentPartDone { .. } => "response.content_part.done",
            Self::OutputTextDelta { .. } => "response.output_text.delta",
            Self::OutputTextDone { .. } => "response.output_text.done",
            Self::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            Self::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            Self::ReasoningSummaryPartAdded { .. } => "response.reasoning_summary_part.added",
            Self::ReasoningSummaryPartDone { .. } => "response.reasoning_summary_part.done",
            Self::ReasoningSummaryTextDelta { .. } => "response.reasoning_summary_text.delta",
            Self::ReasoningSummaryTextDone { .. } => "response.reasoning_summary_text.done",
            Self::ImageGenerationInProgress { .. } => "response.image_generation_call.in_progress",
            Self::ImageGenerationGenerating { .. } => "response.image_generation_call.generating",
            Self::ImageGenerationPartialImage { .. } => "response.image_generation_call.partial_image",
            Self::CodeInterpreterInProgress { .. } => "response.code_interpreter_call.in_progress",
            Self::CodeInterpreterCodeDelta { .. } => "response.code_interpreter_call_code.delta",
            Self::CodeInterpreterCodeDone { .. } => "response.code_interpreter_call_code.done",
            Self::CodeInterpreterInterpreting { .. } => "response.code_interpreter_call.interpreting",
            Self::CodeInterpreterCompleted { .. } => "response.code_interpreter_call.completed",
            Self::Completed { .. } => "response.completed",
            Self::Error { .. } => "error",
        }
    }

    /// Whether the stream ends with this event
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}
