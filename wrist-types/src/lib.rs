//! # hawrist-types
//!
//! Wire format types for the Home Assistant WebSocket API as used by hawrist.
//!
//! This crate provides the foundational types used across all hawrist crates:
//! - [`CommandId`], [`EntityId`] - Correlation and entity identifiers
//! - [`Request`], [`AuthMessage`] - Outbound commands and the codec that stamps them
//! - [`InboundFrame`] - Decoded server frames (auth phase, results, events)
//! - [`EntityRecord`], [`DiffPatch`] - Typed entity state and incremental patches
//! - [`PipelineEvent`] - Assist pipeline run events
//! - [`CodecError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod diff;
mod entity;
mod error;
mod events;
mod ids;
mod messages;
mod pipeline;

pub use diff::{decode_entity_diff, DecodedDiff, DiffIssue};
pub use entity::{Attributes, DiffPatch, EntityChange, EntityRecord, RecordDelta};
pub use error::CodecError;
pub use events::{PipelineList, PipelineSummary, StateChange, TodoItem, TodoItemStatus};
pub use ids::{CommandId, EntityId};
pub use messages::{
    decode_frames, encode_auth, encode_request, AuthMessage, ErrorInfo, EventFrame,
    InboundFrame, PipelineRun, Request, ResultFrame, Target,
};
pub use pipeline::{
    IntentOutput, PipelineErrorCode, PipelineEvent, PipelineEventKind, PipelineFailure,
};
