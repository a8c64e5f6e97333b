//! Assist pipeline run events.
//!
//! A pipeline run is a subscription whose events walk through the stages
//! (`run-start`, `intent-start`, `intent-end`, ...) and end with either
//! `run-end` or `error`.

use serde_json::Value;
use std::fmt;

use crate::CodecError;

/// Discriminator of a pipeline event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineEventKind {
    /// Run accepted, stages about to start
    RunStart,
    /// Run finished (always last on success)
    RunEnd,
    /// Wake word detection started
    WakeWordStart,
    /// Wake word detected
    WakeWordEnd,
    /// Speech-to-text started
    SttStart,
    /// Voice activity detected
    SttVadStart,
    /// Voice activity ended
    SttVadEnd,
    /// Speech-to-text produced text
    SttEnd,
    /// Intent recognition started
    IntentStart,
    /// Streaming intent progress
    IntentProgress,
    /// Intent handled; carries the response and conversation id
    IntentEnd,
    /// Text-to-speech started
    TtsStart,
    /// Text-to-speech finished
    TtsEnd,
    /// Terminal failure
    Error,
    /// Event type this client does not know
    Other(String),
}

impl PipelineEventKind {
    /// Parse the wire name.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "run-start" => Self::RunStart,
            "run-end" => Self::RunEnd,
            "wake_word-start" => Self::WakeWordStart,
            "wake_word-end" => Self::WakeWordEnd,
            "stt-start" => Self::SttStart,
            "stt-vad-start" => Self::SttVadStart,
            "stt-vad-end" => Self::SttVadEnd,
            "stt-end" => Self::SttEnd,
            "intent-start" => Self::IntentStart,
            "intent-progress" => Self::IntentProgress,
            "intent-end" => Self::IntentEnd,
            "tts-start" => Self::TtsStart,
            "tts-end" => Self::TtsEnd,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RunStart => "run-start",
            Self::RunEnd => "run-end",
            Self::WakeWordStart => "wake_word-start",
            Self::WakeWordEnd => "wake_word-end",
            Self::SttStart => "stt-start",
            Self::SttVadStart => "stt-vad-start",
            Self::SttVadEnd => "stt-vad-end",
            Self::SttEnd => "stt-end",
            Self::IntentStart => "intent-start",
            Self::IntentProgress => "intent-progress",
            Self::IntentEnd => "intent-end",
            Self::TtsStart => "tts-start",
            Self::TtsEnd => "tts-end",
            Self::Error => "error",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for PipelineEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    /// Event type
    pub kind: PipelineEventKind,
    /// Event-specific data (`Null` when absent)
    pub data: Value,
    /// Server timestamp, as sent
    pub timestamp: Option<String>,
}

impl PipelineEvent {
    /// Decode from a subscription event payload.
    pub fn from_event(event: &Value) -> Result<Self, CodecError> {
        let kind = event
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::InvalidData("pipeline event without type".into()))?;
        Ok(Self {
            kind: PipelineEventKind::parse(kind),
            data: event.get("data").cloned().unwrap_or(Value::Null),
            timestamp: event
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Whether the run is over after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, PipelineEventKind::RunEnd | PipelineEventKind::Error)
    }

    /// The intent result of an `intent-end` event.
    pub fn intent_output(&self) -> Option<IntentOutput> {
        if self.kind != PipelineEventKind::IntentEnd {
            return None;
        }
        let output = self.data.get("intent_output")?;
        Some(IntentOutput {
            response: output.get("response").cloned().unwrap_or(Value::Null),
            conversation_id: output
                .get("conversation_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// The failure carried by an `error` event.
    pub fn failure(&self) -> Option<PipelineFailure> {
        if self.kind != PipelineEventKind::Error {
            return None;
        }
        let code = self
            .data
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let message = self
            .data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Pipeline error");
        Some(PipelineFailure {
            code: PipelineErrorCode::parse(code),
            message: message.to_string(),
        })
    }
}

/// Output of the intent stage.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentOutput {
    /// Full conversation response
    pub response: Value,
    /// Conversation id to continue with
    pub conversation_id: Option<String>,
}

impl IntentOutput {
    /// The plain spoken reply (`response.speech.plain.speech`).
    pub fn speech(&self) -> Option<&str> {
        self.response
            .get("speech")?
            .get("plain")?
            .get("speech")?
            .as_str()
    }
}

/// Terminal pipeline error codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineErrorCode {
    /// No wake word engine installed
    WakeEngineMissing,
    /// Wake word provider not available
    WakeProviderMissing,
    /// Wake word detection failed
    WakeStreamFailed,
    /// Wake word detection timed out
    WakeWordTimeout,
    /// Speech-to-text provider not available
    SttProviderMissing,
    /// Unsupported audio format
    SttProviderUnsupportedMetadata,
    /// Speech-to-text failed
    SttStreamFailed,
    /// No speech detected
    SttNoTextRecognized,
    /// Conversation agent not available
    IntentNotSupported,
    /// Intent recognition failed
    IntentFailed,
    /// Text-to-speech not available
    TtsNotSupported,
    /// Text-to-speech failed
    TtsFailed,
    /// Any other code
    Other(String),
}

impl PipelineErrorCode {
    /// Parse the wire code.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "wake-engine-missing" => Self::WakeEngineMissing,
            "wake-provider-missing" => Self::WakeProviderMissing,
            "wake-stream-failed" => Self::WakeStreamFailed,
            "wake-word-timeout" => Self::WakeWordTimeout,
            "stt-provider-missing" => Self::SttProviderMissing,
            "stt-provider-unsupported-metadata" => Self::SttProviderUnsupportedMetadata,
            "stt-stream-failed" => Self::SttStreamFailed,
            "stt-no-text-recognized" => Self::SttNoTextRecognized,
            "intent-not-supported" => Self::IntentNotSupported,
            "intent-failed" => Self::IntentFailed,
            "tts-not-supported" => Self::TtsNotSupported,
            "tts-failed" => Self::TtsFailed,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire code.
    pub fn as_str(&self) -> &str {
        match self {
            Self::WakeEngineMissing => "wake-engine-missing",
            Self::WakeProviderMissing => "wake-provider-missing",
            Self::WakeStreamFailed => "wake-stream-failed",
            Self::WakeWordTimeout => "wake-word-timeout",
            Self::SttProviderMissing => "stt-provider-missing",
            Self::SttProviderUnsupportedMetadata => "stt-provider-unsupported-metadata",
            Self::SttStreamFailed => "stt-stream-failed",
            Self::SttNoTextRecognized => "stt-no-text-recognized",
            Self::IntentNotSupported => "intent-not-supported",
            Self::IntentFailed => "intent-failed",
            Self::TtsNotSupported => "tts-not-supported",
            Self::TtsFailed => "tts-failed",
            Self::Other(raw) => raw,
        }
    }
}

/// A pipeline run that ended in an `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    /// Error code
    pub code: PipelineErrorCode,
    /// Server message
    pub message: String,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_parse_roundtrips_known_names() {
        for name in ["run-start", "stt-vad-end", "intent-end", "wake_word-start", "error"] {
            assert_eq!(PipelineEventKind::parse(name).as_str(), name);
        }
        assert_eq!(
            PipelineEventKind::parse("brand-new"),
            PipelineEventKind::Other("brand-new".into())
        );
    }

    #[test]
    fn intent_end_exposes_speech_and_conversation() {
        let event = PipelineEvent::from_event(&json!({
            "type": "intent-end",
            "data": {"intent_output": {
                "response": {"speech": {"plain": {"speech": "Turned off the lights"}}},
                "conversation_id": "conv-1"
            }},
            "timestamp": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let output = event.intent_output().unwrap();
        assert_eq!(output.speech(), Some("Turned off the lights"));
        assert_eq!(output.conversation_id.as_deref(), Some("conv-1"));
        assert!(!event.is_terminal());
    }

    #[test]
    fn error_event_maps_code() {
        let event = PipelineEvent::from_event(&json!({
            "type": "error",
            "data": {"code": "stt-no-text-recognized", "message": "No text recognized"}
        }))
        .unwrap();
        assert!(event.is_terminal());
        let failure = event.failure().unwrap();
        assert_eq!(failure.code, PipelineErrorCode::SttNoTextRecognized);
        assert_eq!(failure.to_string(), "stt-no-text-recognized: No text recognized");
    }

    #[test]
    fn run_end_is_terminal_without_failure() {
        let event = PipelineEvent::from_event(&json!({"type": "run-end", "data": null})).unwrap();
        assert!(event.is_terminal());
        assert!(event.failure().is_none());
        assert!(event.intent_output().is_none());
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(PipelineEvent::from_event(&json!({"data": {}})).is_err());
    }
}
