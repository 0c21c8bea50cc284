//! Canonical request, response and stream types
//!
//! Shaped after the `OpenAI` Responses API. Every provider adapter converts
//! its wire format to and from these types.

pub mod item;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use item::{
    CodeInterpreterCallItem, CodeOutput, ContentPart, FunctionCallItem, FunctionCallOutputItem,
    ImageGenerationCallItem, Item, ItemStatus, MessageContent, MessageItem, ReasoningItem, Role, SummaryPart,
};
pub use request::{
    Include, Input, ReasoningConfig, ReasoningEffort, ReasoningSummary, Request, TextConfig, TextFormat,
};
pub use response::{
    InputTokensDetails, OutputTokensDetails, Response, ResponseError, ResponseStatus, Usage,
};
pub use stream::{ChunkEvent, ResponseChunk};
pub use tool::{FunctionTool, NamedToolChoice, Tool, ToolChoice, ToolChoiceMode};
