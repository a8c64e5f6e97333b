//! Typed payloads for trigger, to-do and pipeline listing messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CodecError, EntityId, EntityRecord};

/// One firing of a state trigger.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateChange {
    /// Entity whose state changed
    pub entity_id: EntityId,
    /// State before the change (absent when the entity was just created)
    #[serde(default)]
    pub from_state: Option<EntityRecord>,
    /// State after the change (absent when the entity was removed)
    #[serde(default)]
    pub to_state: Option<EntityRecord>,
}

impl StateChange {
    /// Decode from a `subscribe_trigger` event payload
    /// (`{"variables": {"trigger": {...}}}`).
    pub fn from_event(event: &Value) -> Result<Self, CodecError> {
        let trigger = event
            .get("variables")
            .and_then(|v| v.get("trigger"))
            .ok_or_else(|| {
                CodecError::InvalidData("trigger event without variables.trigger".into())
            })?;
        Self::deserialize(trigger).map_err(CodecError::Deserialization)
    }
}

/// Completion status of a to-do item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoItemStatus {
    /// Still open
    NeedsAction,
    /// Done
    Completed,
}

/// One item of a to-do list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Stable item id
    pub uid: String,
    /// Item text
    pub summary: String,
    /// Completion status
    pub status: TodoItemStatus,
    /// Due date or datetime, as sent by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    /// Longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TodoItem {
    /// Decode the item set from a `todo/item/subscribe` event (`{"items": [...]}`).
    pub fn list_from_event(event: &Value) -> Result<Vec<Self>, CodecError> {
        let items = event
            .get("items")
            .ok_or_else(|| CodecError::InvalidData("to-do event without items".into()))?;
        Vec::<TodoItem>::deserialize(items).map_err(CodecError::Deserialization)
    }

    /// Whether the item is still open.
    pub fn is_open(&self) -> bool {
        self.status == TodoItemStatus::NeedsAction
    }
}

/// Result of `assist_pipeline/pipeline/list`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineList {
    /// Configured pipelines
    pub pipelines: Vec<PipelineSummary>,
    /// Id of the preferred pipeline
    #[serde(default)]
    pub preferred_pipeline: Option<String>,
}

impl PipelineList {
    /// The preferred pipeline, if it is in the list.
    pub fn preferred(&self) -> Option<&PipelineSummary> {
        let preferred = self.preferred_pipeline.as_deref()?;
        self.pipelines.iter().find(|p| p.id == preferred)
    }
}

/// One configured assist pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineSummary {
    /// Pipeline id
    pub id: String,
    /// Display name
    pub name: String,
    /// Language code
    #[serde(default)]
    pub language: Option<String>,
    /// Conversation agent behind the intent stage
    #[serde(default)]
    pub conversation_engine: Option<String>,
}
