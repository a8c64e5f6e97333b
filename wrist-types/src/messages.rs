//! Protocol messages and the JSON codec.
//!
//! Outbound requests are plain JSON objects carrying a `type` discriminator.
//! The correlation id is stamped at encode time by [`encode_request`], so a
//! [`Request`] value can be built before the client knows which id it gets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use zeroize::Zeroizing;

use crate::{CodecError, CommandId, EntityId};

/// All outbound commands that carry a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Full entity state snapshot
    #[serde(rename = "get_states")]
    GetStates,
    /// Server configuration (location, units, version)
    #[serde(rename = "get_config")]
    GetConfig,
    /// Available services per domain
    #[serde(rename = "get_services")]
    GetServices,
    /// Registered frontend panels
    #[serde(rename = "get_panels")]
    GetPanels,
    /// Area registry listing
    #[serde(rename = "config/area_registry/list")]
    AreaRegistryList,
    /// Device registry listing
    #[serde(rename = "config/device_registry/list")]
    DeviceRegistryList,
    /// Entity registry listing
    #[serde(rename = "config/entity_registry/list")]
    EntityRegistryList,
    /// Label registry listing
    #[serde(rename = "config/label_registry/list")]
    LabelRegistryList,
    /// Floor registry listing
    #[serde(rename = "config/floor_registry/list")]
    FloorRegistryList,
    /// Invoke a domain service
    #[serde(rename = "call_service")]
    CallService {
        /// Service domain (`light`, `todo`, ...)
        domain: String,
        /// Service name within the domain
        service: String,
        /// Service arguments
        #[serde(skip_serializing_if = "Option::is_none")]
        service_data: Option<Value>,
        /// Entities, devices or areas to act on
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<Target>,
    },
    /// Subscribe to an automation trigger
    #[serde(rename = "subscribe_trigger")]
    SubscribeTrigger {
        /// Trigger definition
        trigger: Value,
    },
    /// Subscribe to the compressed entity-diff feed
    #[serde(rename = "subscribe_entities")]
    SubscribeEntities {
        /// Restrict the feed to these entities (all entities when absent)
        #[serde(skip_serializing_if = "Option::is_none")]
        entity_ids: Option<Vec<EntityId>>,
    },
    /// Subscribe to raw bus events
    #[serde(rename = "subscribe_events")]
    SubscribeEvents {
        /// Only this event type (all events when absent)
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
    },
    /// Subscribe to the item set of a to-do list entity
    #[serde(rename = "todo/item/subscribe")]
    TodoItemSubscribe {
        /// The to-do list entity
        entity_id: EntityId,
    },
    /// List assist pipelines
    #[serde(rename = "assist_pipeline/pipeline/list")]
    PipelineList,
    /// Run an assist pipeline (event-sequence subscription)
    #[serde(rename = "assist_pipeline/run")]
    PipelineRun(PipelineRun),
    /// One-shot conversation turn
    #[serde(rename = "conversation/process")]
    ConversationProcess {
        /// User utterance
        text: String,
        /// Conversation to continue
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        /// Language override
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        /// Conversation agent override
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    /// Cancel a subscription
    #[serde(rename = "unsubscribe_events")]
    UnsubscribeEvents {
        /// Correlation id of the subscription
        subscription: CommandId,
    },
    /// Announce optional protocol features (message coalescing)
    #[serde(rename = "supported_features")]
    SupportedFeatures {
        /// Feature flags, e.g. `{"coalesce_messages": 1}`
        features: Value,
    },
    /// Liveness check answered by `pong`
    #[serde(rename = "ping")]
    Ping,
    /// Any command type not modelled above
    #[serde(skip)]
    Custom {
        /// The `type` discriminator
        kind: String,
        /// Remaining fields (an `id` or `type` key here is overwritten)
        fields: Map<String, Value>,
    },
}

impl Request {
    /// State trigger on one or more entities, delivering `{from_state, to_state}`.
    pub fn state_trigger(entity_ids: &[EntityId]) -> Self {
        let ids: Vec<Value> = entity_ids
            .iter()
            .map(|id| Value::String(id.to_string()))
            .collect();
        let mut trigger = Map::new();
        trigger.insert("platform".into(), Value::String("state".into()));
        trigger.insert("entity_id".into(), Value::Array(ids));
        Request::SubscribeTrigger {
            trigger: Value::Object(trigger),
        }
    }

    /// Build a command of an arbitrary type.
    pub fn custom(kind: impl Into<String>, fields: Map<String, Value>) -> Self {
        Request::Custom {
            kind: kind.into(),
            fields,
        }
    }

    /// The wire `type` of this request.
    pub fn kind(&self) -> String {
        match self {
            Request::Custom { kind, .. } => kind.clone(),
            other => serde_json::to_value(other)
                .ok()
                .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default(),
        }
    }
}

/// Service call target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Entities to act on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_id: Vec<EntityId>,
    /// Devices to act on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_id: Vec<String>,
    /// Areas to act on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub area_id: Vec<String>,
}

impl Target {
    /// Target a single entity.
    pub fn entity(id: EntityId) -> Self {
        Self {
            entity_id: vec![id],
            ..Self::default()
        }
    }

    /// Target several entities.
    pub fn entities(ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            entity_id: ids.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Arguments for `assist_pipeline/run`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
    /// First stage to run (`wake_word`, `stt`, `intent`, `tts`)
    pub start_stage: String,
    /// Last stage to run
    pub end_stage: String,
    /// Stage input, `{"text": ...}` for an intent start stage
    pub input: Value,
    /// Pipeline id (preferred pipeline when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    /// Conversation to continue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Server-side timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

impl PipelineRun {
    /// A text-in, intent-only run.
    pub fn text(text: &str) -> Self {
        let mut input = Map::new();
        input.insert("text".into(), Value::String(text.to_string()));
        Self {
            start_stage: "intent".into(),
            end_stage: "intent".into(),
            input: Value::Object(input),
            pipeline: None,
            conversation_id: None,
            timeout: None,
        }
    }

    /// Select a pipeline.
    pub fn with_pipeline(mut self, pipeline: &str) -> Self {
        self.pipeline = Some(pipeline.to_string());
        self
    }

    /// Continue an existing conversation.
    pub fn with_conversation_id(mut self, conversation_id: &str) -> Self {
        self.conversation_id = Some(conversation_id.to_string());
        self
    }

    /// Set the server-side timeout.
    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout = Some(secs);
        self
    }
}

/// Authentication message, sent without a correlation id when the
/// server asks for it.
///
/// Borrows the token so no unwiped copy of it is made.
#[derive(Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    /// Create an auth message for the given long-lived access token.
    pub fn new(access_token: &'a str) -> Self {
        Self {
            kind: "auth",
            access_token,
        }
    }
}

impl fmt::Debug for AuthMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMessage")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Serialize a request with its correlation id.
pub fn encode_request(id: CommandId, request: &Request) -> Result<String, CodecError> {
    let mut object = match request {
        Request::Custom { kind, fields } => {
            let mut object = fields.clone();
            object.insert("type".into(), Value::String(kind.clone()));
            object
        }
        other => match serde_json::to_value(other).map_err(CodecError::Serialization)? {
            Value::Object(object) => object,
            value => return Err(CodecError::NotAnObject(value.to_string())),
        },
    };
    object.insert("id".into(), Value::from(id.value()));
    serde_json::to_string(&object).map_err(CodecError::Serialization)
}

/// Serialize the auth message.
///
/// The frame contains the token and is wiped when dropped.
pub fn encode_auth(auth: &AuthMessage<'_>) -> Result<Zeroizing<String>, CodecError> {
    serde_json::to_string(auth)
        .map(Zeroizing::new)
        .map_err(CodecError::Serialization)
}

/// Error body of a failed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable code (`not_found`, `unknown_command`, ...)
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl ErrorInfo {
    /// Create an error body.
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    fn unknown() -> Self {
        Self::new("unknown_error", "request failed without an error body")
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// All inbound frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Server asks for credentials
    AuthRequired {
        /// Server version
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// Credentials accepted
    AuthOk {
        /// Server version
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// Credentials rejected
    AuthInvalid {
        /// Rejection reason
        #[serde(default)]
        message: Option<String>,
    },
    /// Result of a command or subscription request
    Result(ResultFrame),
    /// Event for a subscription
    Event(EventFrame),
    /// Answer to a ping
    Pong {
        /// Correlation id of the ping
        id: CommandId,
    },
}

const FRAME_TYPES: &[&str] = &[
    "auth_required",
    "auth_ok",
    "auth_invalid",
    "result",
    "event",
    "pong",
];

impl InboundFrame {
    /// Correlation id if the frame carries one.
    pub fn id(&self) -> Option<CommandId> {
        match self {
            InboundFrame::Result(r) => Some(r.id),
            InboundFrame::Event(e) => Some(e.id),
            InboundFrame::Pong { id } => Some(*id),
            _ => None,
        }
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
        if !FRAME_TYPES.contains(&kind) {
            return Err(CodecError::UnrecognisedFrame(format!("type {:?}", kind)));
        }
        serde_json::from_value(value).map_err(CodecError::Deserialization)
    }
}

/// A `result` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultFrame {
    /// Correlation id
    pub id: CommandId,
    /// Whether the request succeeded
    pub success: bool,
    /// Result payload
    #[serde(default)]
    pub result: Option<Value>,
    /// Error body when `success` is false
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

impl ResultFrame {
    /// Split into the success payload or the error body.
    pub fn into_outcome(self) -> Result<Value, ErrorInfo> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self.error.unwrap_or_else(ErrorInfo::unknown))
        }
    }
}

/// An `event` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventFrame {
    /// Correlation id of the subscription
    pub id: CommandId,
    /// Event payload
    pub event: Value,
}

/// Decode one WebSocket text frame into zero or more inbound frames.
///
/// With message coalescing the server may batch several messages into a
/// JSON array. Each element decodes independently.
pub fn decode_frames(text: &str) -> Vec<Result<InboundFrame, CodecError>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items.into_iter().map(InboundFrame::from_value).collect(),
        Ok(value @ Value::Object(_)) => vec![InboundFrame::from_value(value)],
        Ok(other) => vec![Err(CodecError::UnrecognisedFrame(other.to_string()))],
        Err(e) => vec![Err(CodecError::Deserialization(e))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(id: u64, request: &Request) -> Value {
        serde_json::from_str(&encode_request(CommandId::new(id), request).unwrap()).unwrap()
    }

    #[test]
    fn unit_request_carries_id_and_type() {
        assert_eq!(
            encoded(7, &Request::GetStates),
            json!({"id": 7, "type": "get_states"})
        );
        assert_eq!(
            encoded(8, &Request::FloorRegistryList),
            json!({"id": 8, "type": "config/floor_registry/list"})
        );
    }

    #[test]
    fn call_service_omits_absent_fields() {
        let request = Request::CallService {
            domain: "light".into(),
            service: "turn_on".into(),
            service_data: None,
            target: Some(Target::entity(EntityId::parse("light.kitchen").unwrap())),
        };
        assert_eq!(
            encoded(3, &request),
            json!({
                "id": 3,
                "type": "call_service",
                "domain": "light",
                "service": "turn_on",
                "target": {"entity_id": ["light.kitchen"]}
            })
        );
    }

    #[test]
    fn state_trigger_shape() {
        let ids = [
            EntityId::parse("light.a").unwrap(),
            EntityId::parse("light.b").unwrap(),
        ];
        assert_eq!(
            encoded(1, &Request::state_trigger(&ids)),
            json!({
                "id": 1,
                "type": "subscribe_trigger",
                "trigger": {"platform": "state", "entity_id": ["light.a", "light.b"]}
            })
        );
    }

    #[test]
    fn pipeline_run_flattens_into_request() {
        let run = PipelineRun::text("turn off the lights")
            .with_pipeline("p1")
            .with_timeout(30);
        assert_eq!(
            encoded(9, &Request::PipelineRun(run)),
            json!({
                "id": 9,
                "type": "assist_pipeline/run",
                "start_stage": "intent",
                "end_stage": "intent",
                "input": {"text": "turn off the lights"},
                "pipeline": "p1",
                "timeout": 30
            })
        );
    }

    #[test]
    fn custom_request_gets_type_and_id() {
        let mut fields = Map::new();
        fields.insert("entity_id".into(), json!("todo.shopping"));
        fields.insert("id".into(), json!(999));
        let request = Request::custom("todo/item/list", fields);
        assert_eq!(request.kind(), "todo/item/list");
        assert_eq!(
            encoded(4, &request),
            json!({"id": 4, "type": "todo/item/list", "entity_id": "todo.shopping"})
        );
    }

    #[test]
    fn request_kind_reads_discriminator() {
        assert_eq!(Request::Ping.kind(), "ping");
        assert_eq!(
            Request::UnsubscribeEvents {
                subscription: CommandId::new(2)
            }
            .kind(),
            "unsubscribe_events"
        );
    }

    #[test]
    fn auth_message_shape_and_redaction() {
        let token = String::from("secret-token");
        let auth = AuthMessage::new(&token);
        let frame: Zeroizing<String> = encode_auth(&auth).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "auth", "access_token": "secret-token"}));
        assert!(!format!("{:?}", auth).contains("secret-token"));
    }

    #[test]
    fn decodes_auth_phase_frames() {
        let frames = decode_frames(r#"{"type":"auth_required","ha_version":"2024.6.0"}"#);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &InboundFrame::AuthRequired {
                ha_version: Some("2024.6.0".into())
            }
        );

        let frames = decode_frames(r#"{"type":"auth_invalid","message":"bad token"}"#);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &InboundFrame::AuthInvalid {
                message: Some("bad token".into())
            }
        );
    }

    #[test]
    fn failed_result_carries_error_body() {
        let frames = decode_frames(
            r#"{"id":5,"type":"result","success":false,"error":{"code":"not_found","message":"Service not found."}}"#,
        );
        let frame = match frames.into_iter().next().unwrap().unwrap() {
            InboundFrame::Result(r) => r,
            other => panic!("expected result, got {:?}", other),
        };
        assert_eq!(frame.id, CommandId::new(5));
        assert_eq!(
            frame.into_outcome(),
            Err(ErrorInfo::new("not_found", "Service not found."))
        );
    }

    #[test]
    fn failed_result_without_body_is_unknown_error() {
        let frames = decode_frames(r#"{"id":5,"type":"result","success":false}"#);
        match frames.into_iter().next().unwrap().unwrap() {
            InboundFrame::Result(r) => {
                assert_eq!(r.into_outcome().unwrap_err().code, "unknown_error")
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn successful_result_with_null_payload() {
        let frames = decode_frames(r#"{"id":1,"type":"result","success":true,"result":null}"#);
        match frames.into_iter().next().unwrap().unwrap() {
            InboundFrame::Result(r) => assert_eq!(r.into_outcome(), Ok(Value::Null)),
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn coalesced_array_decodes_each_element() {
        let frames = decode_frames(
            r#"[{"id":1,"type":"result","success":true,"result":null},
                {"type":"mystery"},
                {"id":2,"type":"event","event":{"a":{}}}]"#,
        );
        assert_eq!(frames.len(), 3);
        assert!(frames[0].is_ok());
        assert!(matches!(frames[1], Err(CodecError::UnrecognisedFrame(_))));
        assert_eq!(frames[2].as_ref().unwrap().id(), Some(CommandId::new(2)));
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        let frames = decode_frames("not json at all");
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Err(CodecError::Deserialization(_))));

        let frames = decode_frames("42");
        assert!(matches!(frames[0], Err(CodecError::UnrecognisedFrame(_))));

        let frames = decode_frames(r#"{"type":"result","success":true}"#);
        assert!(matches!(frames[0], Err(CodecError::Deserialization(_))));
    }

    #[test]
    fn pong_has_id() {
        let frames = decode_frames(r#"{"id":11,"type":"pong"}"#);
        assert_eq!(frames[0].as_ref().unwrap().id(), Some(CommandId::new(11)));
    }
}
