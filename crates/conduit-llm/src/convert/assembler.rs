//! Provider-independent stream assembly
//!
//! Provider converters classify each native stream fragment into a
//! [`ContentUnit`]. [`ChunkAssembler`] turns that sequence into canonical
//! chunks: it opens and closes output items on type changes, numbers every
//! chunk, and builds the final [`Response`].

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::types::{
    ChunkEvent, CodeInterpreterCallItem, CodeOutput, ContentPart, FunctionCallItem, ImageGenerationCallItem, Item,
    ItemStatus, MessageContent, MessageItem, ReasoningItem, Response, ResponseChunk, ResponseError, ResponseStatus,
    Role, SummaryPart, Usage,
};

/// Classified fragment of provider output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUnit {
    /// Visible assistant text
    Text(String),
    /// Reasoning summary text
    Reasoning(String),
    /// Function call start or argument fragment
    ///
    /// A unit carrying a `name` starts a new call; one without continues
    /// the active call's arguments.
    FunctionCall {
        call_id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Base64 image fragment
    Image { media_type: String, data: String },
    /// Interpreter source, `complete` once the provider finished sending it
    CodeExecution { code: String, complete: bool },
    /// Interpreter output for the active code item
    CodeResult { output: String },
    /// Opaque reasoning signature
    ///
    /// Belongs to the open reasoning item; otherwise it becomes a reasoning
    /// item of its own at this position.
    Signature(String),
    /// Reasoning the provider withheld, kept only as opaque data
    RedactedReasoning(String),
}

/// Builds a canonical chunk stream from content units
pub struct ChunkAssembler {
    response_id: String,
    created_at: u64,
    model: String,
    usage: Option<Usage>,
    metadata: BTreeMap<String, String>,
    incomplete: bool,
    next_sequence: u64,
    started: bool,
    ended: bool,
    active: Option<ActiveItem>,
    output: Vec<Item>,
}

struct ActiveItem {
    id: String,
    output_index: u32,
    state: ActiveState,
}

enum ActiveState {
    Message {
        text: String,
    },
    Reasoning {
        text: String,
        signature: Option<String>,
        redacted: bool,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    Image {
        media_type: String,
        data: String,
        partials: u32,
    },
    Code {
        code: String,
        code_done: bool,
        answered: bool,
        outputs: Vec<CodeOutput>,
    },
}

impl ChunkAssembler {
    pub fn new(model: impl Into<String>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());

        Self {
            response_id: new_id("resp"),
            created_at,
            model: model.into(),
            usage: None,
            metadata: BTreeMap::new(),
            incomplete: false,
            next_sequence: 0,
            started: false,
            ended: false,
            active: None,
            output: Vec::new(),
        }
    }

    /// Record the model reported by the provider; the last value wins
    pub fn set_model(&mut self, model: &str) {
        if !model.is_empty() {
            model.clone_into(&mut self.model);
        }
    }

    /// Record token usage; the last value wins
    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = Some(usage);
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Report the final response as cut short, e.g. by a token limit
    pub const fn mark_incomplete(&mut self) {
        self.incomplete = true;
    }

    pub const fn is_finished(&self) -> bool {
        self.ended
    }

    /// Consume one content unit
    pub fn push(&mut self, unit: ContentUnit) -> Vec<ResponseChunk> {
        if self.ended {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.start(&mut events);

        match unit {
            ContentUnit::Signature(signature) => self.attach_signature(signature, &mut events),
            ContentUnit::RedactedReasoning(data) => self.seal_reasoning(data, true, &mut events),
            ContentUnit::Text(text) => {
                if !text.is_empty() {
                    if !matches!(self.active_state(), Some(ActiveState::Message { .. })) {
                        self.close_active(&mut events);
                        self.open(ActiveState::Message { text: String::new() }, &mut events);
                    }
                    self.append(text, &mut events);
                }
            }
            ContentUnit::Reasoning(text) => {
                if !text.is_empty() {
                    if !matches!(self.active_state(), Some(ActiveState::Reasoning { .. })) {
                        self.close_active(&mut events);
                        self.open(
                            ActiveState::Reasoning {
                                text: String::new(),
                                signature: None,
                                redacted: false,
                            },
                            &mut events,
                        );
                    }
                    self.append(text, &mut events);
                }
            }
            ContentUnit::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                let continues = name.is_none() && matches!(self.active_state(), Some(ActiveState::FunctionCall { .. }));
                if !continues {
                    self.close_active(&mut events);
                    self.open(
                        ActiveState::FunctionCall {
                            call_id: call_id.unwrap_or_else(|| new_id("call")),
                            name: name.unwrap_or_default(),
                            arguments: String::new(),
                        },
                        &mut events,
                    );
                }
                if !arguments.is_empty() {
                    self.append(arguments, &mut events);
                }
            }
            ContentUnit::Image { media_type, data } => {
                if !matches!(self.active_state(), Some(ActiveState::Image { .. })) {
                    self.close_active(&mut events);
                    self.open(
                        ActiveState::Image {
                            media_type,
                            data: String::new(),
                            partials: 0,
                        },
                        &mut events,
                    );
                }
                if !data.is_empty() {
                    self.append(data, &mut events);
                }
            }
            ContentUnit::CodeExecution { code, complete } => {
                let continues = matches!(self.active_state(), Some(ActiveState::Code { code_done: false, .. }));
                if !continues {
                    self.close_active(&mut events);
                    self.open(
                        ActiveState::Code {
                            code: String::new(),
                            code_done: false,
                            answered: false,
                            outputs: Vec::new(),
                        },
                        &mut events,
                    );
                }
                if !code.is_empty() {
                    self.append(code, &mut events);
                }
                if complete {
                    self.complete_code(&mut events);
                }
            }
            ContentUnit::CodeResult { output } => {
                if let Some(ActiveItem {
                    state: ActiveState::Code { answered, outputs, .. },
                    ..
                }) = self.active.as_mut()
                {
                    *answered = true;
                    if !output.is_empty() {
                        outputs.push(CodeOutput::Logs { logs: output });
                    }
                    self.complete_code(&mut events);
                    if let Some(active) = &self.active {
                        events.push(ChunkEvent::CodeInterpreterCompleted {
                            item_id: active.id.clone(),
                            output_index: active.output_index,
                        });
                    }
                    self.close_active(&mut events);
                } else {
                    tracing::debug!("dropping code result without an active code item");
                }
            }
        }

        self.sequence(events)
    }

    /// Close the active item, if any
    ///
    /// Used by providers that mark block boundaries explicitly.
    pub fn close_item(&mut self) -> Vec<ResponseChunk> {
        if self.ended {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.close_active(&mut events);
        self.sequence(events)
    }

    /// End the stream successfully
    ///
    /// Closes the open item and emits `response.completed`. Calling it again
    /// yields nothing.
    pub fn finish(&mut self) -> Vec<ResponseChunk> {
        if self.ended {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.start(&mut events);
        self.close_active(&mut events);

        self.ended = true;
        let status = if self.incomplete {
            ResponseStatus::Incomplete
        } else {
            ResponseStatus::Completed
        };
        events.push(ChunkEvent::Completed {
            response: self.snapshot(status),
        });

        self.sequence(events)
    }

    /// End the stream with a terminal `error` chunk
    pub fn fail(&mut self, error: &ResponseError) -> Vec<ResponseChunk> {
        if self.ended {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.start(&mut events);
        self.ended = true;
        events.push(ChunkEvent::Error {
            code: error.kind,
            message: error.message.clone(),
        });

        self.sequence(events)
    }

    /// Finish and return the final response, for non-streaming callers
    pub fn into_response(mut self) -> Response {
        let _ = self.finish();
        let status = if self.incomplete {
            ResponseStatus::Incomplete
        } else {
            ResponseStatus::Completed
        };
        self.snapshot(status)
    }

    fn active_state(&self) -> Option<&ActiveState> {
        self.active.as_ref().map(|active| &active.state)
    }

    fn start(&mut self, events: &mut Vec<ChunkEvent>) {
        if self.started {
            return;
        }
        self.started = true;

        let response = self.snapshot(ResponseStatus::InProgress);
        events.push(ChunkEvent::Created {
            response: response.clone(),
        });
        events.push(ChunkEvent::InProgress { response });
    }

    fn attach_signature(&mut self, value: String, events: &mut Vec<ChunkEvent>) {
        if let Some(ActiveItem {
            state: ActiveState::Reasoning {
                signature,
                redacted: false,
                ..
            },
            ..
        }) = self.active.as_mut()
            && signature.is_none()
        {
            *signature = Some(value);
            return;
        }

        self.seal_reasoning(value, false, events);
    }

    /// Emit a complete reasoning item holding only opaque data
    fn seal_reasoning(&mut self, data: String, redacted: bool, events: &mut Vec<ChunkEvent>) {
        self.close_active(events);
        self.open(
            ActiveState::Reasoning {
                text: String::new(),
                signature: Some(data),
                redacted,
            },
            events,
        );
        self.close_active(events);
    }

    fn open(&mut self, state: ActiveState, events: &mut Vec<ChunkEvent>) {
        let output_index = u32::try_from(self.output.len()).unwrap_or(u32::MAX);

        let (id, item) = match &state {
            ActiveState::Message { .. } => {
                let id = new_id("msg");
                let item = Item::Message(MessageItem {
                    id: Some(id.clone()),
                    role: Role::Assistant,
                    content: MessageContent::Parts(Vec::new()),
                    status: Some(ItemStatus::InProgress),
                });
                (id, item)
            }
            ActiveState::Reasoning { .. } => {
                let id = new_id("rs");
                let item = Item::Reasoning(ReasoningItem {
                    id: Some(id.clone()),
                    ..ReasoningItem::default()
                });
                (id, item)
            }
            ActiveState::FunctionCall { call_id, name, .. } => {
                let id = new_id("fc");
                let item = Item::FunctionCall(FunctionCallItem {
                    id: Some(id.clone()),
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                    status: Some(ItemStatus::InProgress),
                });
                (id, item)
            }
            ActiveState::Image { media_type, .. } => {
                let id = new_id("ig");
                let item = Item::ImageGenerationCall(ImageGenerationCallItem {
                    id: id.clone(),
                    result: None,
                    output_format: Some(image_format(media_type)),
                    status: Some(ItemStatus::InProgress),
                });
                (id, item)
            }
            ActiveState::Code { .. } => {
                let id = new_id("ci");
                let item = Item::CodeInterpreterCall(CodeInterpreterCallItem {
                    id: id.clone(),
                    code: Some(String::new()),
                    outputs: Vec::new(),
                    status: Some(ItemStatus::InProgress),
                    container_id: None,
                });
                (id, item)
            }
        };

        events.push(ChunkEvent::OutputItemAdded { output_index, item });

        let item_id = id.clone();
        match &state {
            ActiveState::Message { .. } => events.push(ChunkEvent::ContentPartAdded {
                item_id,
                output_index,
                content_index: 0,
                part: output_text(String::new()),
            }),
            ActiveState::Reasoning { .. } => events.push(ChunkEvent::ReasoningSummaryPartAdded {
                item_id,
                output_index,
                summary_index: 0,
                part: SummaryPart::SummaryText { text: String::new() },
            }),
            ActiveState::Image { .. } => {
                events.push(ChunkEvent::ImageGenerationInProgress {
                    item_id: item_id.clone(),
                    output_index,
                });
                events.push(ChunkEvent::ImageGenerationGenerating { item_id, output_index });
            }
            ActiveState::Code { .. } => events.push(ChunkEvent::CodeInterpreterInProgress { item_id, output_index }),
            ActiveState::FunctionCall { .. } => {}
        }

        self.active = Some(ActiveItem {
            id,
            output_index,
            state,
        });
    }

    /// Append a fragment to the active item and emit its delta
    fn append(&mut self, fragment: String, events: &mut Vec<ChunkEvent>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let item_id = active.id.clone();
        let output_index = active.output_index;

        match &mut active.state {
            ActiveState::Message { text } => {
                text.push_str(&fragment);
                events.push(ChunkEvent::OutputTextDelta {
                    item_id,
                    output_index,
                    content_index: 0,
                    delta: fragment,
                });
            }
            ActiveState::Reasoning { text, .. } => {
                text.push_str(&fragment);
                events.push(ChunkEvent::ReasoningSummaryTextDelta {
                    item_id,
                    output_index,
                    summary_index: 0,
                    delta: fragment,
                });
            }
            ActiveState::FunctionCall { arguments, .. } => {
                arguments.push_str(&fragment);
                events.push(ChunkEvent::FunctionCallArgumentsDelta {
                    item_id,
                    output_index,
                    delta: fragment,
                });
            }
            ActiveState::Image { data, partials, .. } => {
                data.push_str(&fragment);
                events.push(ChunkEvent::ImageGenerationPartialImage {
                    item_id,
                    output_index,
                    partial_image_index: *partials,
                    partial_image_b64: fragment,
                });
                *partials += 1;
            }
            ActiveState::Code { code, .. } => {
                code.push_str(&fragment);
                events.push(ChunkEvent::CodeInterpreterCodeDelta {
                    item_id,
                    output_index,
                    delta: fragment,
                });
            }
        }
    }

    /// Mark the active code item's source as final and start waiting for
    /// its result
    fn complete_code(&mut self, events: &mut Vec<ChunkEvent>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let ActiveState::Code { code, code_done, .. } = &mut active.state
            && !*code_done
        {
            *code_done = true;
            events.push(ChunkEvent::CodeInterpreterCodeDone {
                item_id: active.id.clone(),
                output_index: active.output_index,
                code: code.clone(),
            });
            events.push(ChunkEvent::CodeInterpreterInterpreting {
                item_id: active.id.clone(),
                output_index: active.output_index,
            });
        }
    }

    fn close_active(&mut self, events: &mut Vec<ChunkEvent>) {
        let Some(ActiveItem {
            id,
            output_index,
            state,
        }) = self.active.take()
        else {
            return;
        };

        let item = match state {
            ActiveState::Message { text } => {
                events.push(ChunkEvent::OutputTextDone {
                    item_id: id.clone(),
                    output_index,
                    content_index: 0,
                    text: text.clone(),
                });
                events.push(ChunkEvent::ContentPartDone {
                    item_id: id.clone(),
                    output_index,
                    content_index: 0,
                    part: output_text(text.clone()),
                });
                Item::Message(MessageItem {
                    id: Some(id),
                    role: Role::Assistant,
                    content: MessageContent::Parts(vec![output_text(text)]),
                    status: Some(ItemStatus::Completed),
                })
            }
            ActiveState::Reasoning {
                text,
                signature,
                redacted,
            } => {
                events.push(ChunkEvent::ReasoningSummaryTextDone {
                    item_id: id.clone(),
                    output_index,
                    summary_index: 0,
                    text: text.clone(),
                });
                events.push(ChunkEvent::ReasoningSummaryPartDone {
                    item_id: id.clone(),
                    output_index,
                    summary_index: 0,
                    part: SummaryPart::SummaryText { text: text.clone() },
                });
                let summary = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![SummaryPart::SummaryText { text }]
                };
                Item::Reasoning(ReasoningItem {
                    id: Some(id),
                    summary,
                    encrypted_content: signature,
                    redacted,
                })
            }
            ActiveState::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                let arguments = if arguments.is_empty() {
                    "{}".to_owned()
                } else {
                    arguments
                };
                events.push(ChunkEvent::FunctionCallArgumentsDone {
                    item_id: id.clone(),
                    output_index,
                    arguments: arguments.clone(),
                });
                Item::FunctionCall(FunctionCallItem {
                    id: Some(id),
                    call_id,
                    name,
                    arguments,
                    status: Some(ItemStatus::Completed),
                })
            }
            ActiveState::Image { media_type, data, .. } => Item::ImageGenerationCall(ImageGenerationCallItem {
                id,
                result: Some(data),
                output_format: Some(image_format(&media_type)),
                status: Some(ItemStatus::Completed),
            }),
            ActiveState::Code {
                code,
                code_done,
                answered,
                outputs,
            } => {
                if !code_done {
                    events.push(ChunkEvent::CodeInterpreterCodeDone {
                        item_id: id.clone(),
                        output_index,
                        code: code.clone(),
                    });
                }
                // Closed by a type change or end of stream before any result
                let status = if answered {
                    ItemStatus::Completed
                } else {
                    ItemStatus::Incomplete
                };
                Item::CodeInterpreterCall(CodeInterpreterCallItem {
                    id,
                    code: Some(code),
                    outputs,
                    status: Some(status),
                    container_id: None,
                })
            }
        };

        events.push(ChunkEvent::OutputItemDone {
            output_index,
            item: item.clone(),
        });
        self.output.push(item);
    }

    fn snapshot(&self, status: ResponseStatus) -> Response {
        Response {
            id: self.response_id.clone(),
            object: "response".to_owned(),
            created_at: self.created_at,
            model: self.model.clone(),
            status,
            output: self.output.clone(),
            usage: self.usage.clone(),
            error: None,
            metadata: self.metadata.clone(),
        }
    }

    fn sequence(&mut self, events: Vec<ChunkEvent>) -> Vec<ResponseChunk> {
        events
            .into_iter()
            .map(|event| {
                let sequence_number = self.next_sequence;
                self.next_sequence += 1;
                ResponseChunk { sequence_number, event }
            })
            .collect()
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

fn output_text(text: String) -> ContentPart {
    ContentPart::OutputText {
        text,
        annotations: Vec::new(),
    }
}

/// `image/png` -> `png`
fn image_format(media_type: &str) -> String {
    media_type.strip_prefix("image/").unwrap_or(media_type).to_owned()
}
