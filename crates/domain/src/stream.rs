//! Client Stream Vocabulary (§6.1) — the wire shape of every event the core
//! emits through the Stream Multiplexer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::run::Run;

/// Parser status tag carried by `conversational_text_segment` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamTag {
    StartStream,
    Streaming,
    EndStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ConnectionAck {
        session_id: String,
    },
    AuthSuccess {
        user_id: String,
    },
    SessionInit {
        available_tools: Vec<Value>,
    },
    ToolsUpdated {
        available_tools: Vec<Value>,
    },
    ConversationalTextSegment {
        message_id: String,
        content: String,
        stream_type: StreamTag,
    },
    PlanGenerated {
        run_id: String,
        steps: Vec<Value>,
    },
    PlannerStatus {
        run_id: String,
        step_id: String,
        intent: String,
        tool: String,
    },
    ToolStatusUpdate {
        run_id: String,
        step_id: String,
        status: String,
    },
    ToolResult {
        run_id: String,
        step_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<Error>,
    },
    ActionConfirmationRequired {
        run_id: String,
        reason: String,
        steps: Vec<Value>,
    },
    ParameterCollectionRequired {
        run_id: String,
        step_id: String,
        missing_fields: Vec<String>,
    },
    RunUpdated {
        run: Box<Run>,
    },
    Error {
        error: Error,
    },
    StreamEnd {
        message_id: String,
    },
}

impl StreamEvent {
    /// Invariant #3 (§8): exactly one event per turn is marked final.
    pub fn is_final(&self) -> bool {
        matches!(self, StreamEvent::StreamEnd { .. })
    }
}
