//! Compressed entity-diff feed decoding.
//!
//! `subscribe_entities` delivers events shaped like
//!
//! ```text
//! { "a": { "<entity_id>": { "s": state, "a": attrs, "c": ctx, "lc": epoch, "lu": epoch } },
//!   "c": { "<entity_id>": { "+": { ...changed fields }, "-": { "a": [removed attr keys] } } },
//!   "r": [ "<entity_id>", ... ]  or  { "<entity_id>": true } }
//! ```
//!
//! Decoding is lenient: each entry is decoded on its own and problems are
//! reported as [`DiffIssue`]s next to the patch built from everything else.

use chrono::Utc;
use serde_json::{Map, Value};
use std::fmt;

use crate::entity::from_epoch_secs;
use crate::{Attributes, DiffPatch, EntityId, EntityRecord, RecordDelta};

/// A decoded diff event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedDiff {
    /// Everything that decoded cleanly
    pub patch: DiffPatch,
    /// Entries or fields that were skipped
    pub issues: Vec<DiffIssue>,
}

/// Part of a diff event that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffIssue {
    /// The event payload is not a JSON object
    NotAnObject,
    /// Top-level key other than `a`, `c`, `r`
    UnknownKey(String),
    /// A section (`a`, `c` or `r`) has the wrong JSON type
    BadSection(&'static str),
    /// Key is not a valid entity id
    BadEntityId(String),
    /// Added entry skipped
    BadAdded {
        /// Entity the entry was for
        entity_id: String,
        /// Why it was skipped
        reason: String,
    },
    /// Field of a changed entry ignored (the rest of the entry still applies)
    BadChangedField {
        /// Entity the entry was for
        entity_id: String,
        /// Offending field
        field: String,
    },
}

impl fmt::Display for DiffIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffIssue::NotAnObject => write!(f, "diff event is not an object"),
            DiffIssue::UnknownKey(key) => write!(f, "unknown diff key {:?}", key),
            DiffIssue::BadSection(section) => {
                write!(f, "diff section {:?} has wrong type", section)
            }
            DiffIssue::BadEntityId(raw) => write!(f, "invalid entity id {:?}", raw),
            DiffIssue::BadAdded { entity_id, reason } => {
                write!(f, "skipped added entity {}: {}", entity_id, reason)
            }
            DiffIssue::BadChangedField { entity_id, field } => {
                write!(f, "ignored field {:?} of changed entity {}", field, entity_id)
            }
        }
    }
}

/// Decode one `subscribe_entities` event payload.
pub fn decode_entity_diff(event: &Value) -> DecodedDiff {
    let mut out = DecodedDiff::default();
    let Some(object) = event.as_object() else {
        out.issues.push(DiffIssue::NotAnObject);
        return out;
    };

    for key in object.keys() {
        if !matches!(key.as_str(), "a" | "c" | "r") {
            out.issues.push(DiffIssue::UnknownKey(key.clone()));
        }
    }

    if let Some(added) = object.get("a") {
        match added.as_object() {
            Some(entries) => {
                for (raw_id, entry) in entries {
                    let Some(entity_id) = parse_id(raw_id, &mut out.issues) else {
                        continue;
                    };
                    match decode_added(entity_id, entry) {
                        Ok(record) => out.patch.changes.push(crate::EntityChange::Added(record)),
                        Err(reason) => out.issues.push(DiffIssue::BadAdded {
                            entity_id: raw_id.clone(),
                            reason,
                        }),
                    }
                }
            }
            None => out.issues.push(DiffIssue::BadSection("a")),
        }
    }

    if let Some(changed) = object.get("c") {
        match changed.as_object() {
            Some(entries) => {
                for (raw_id, entry) in entries {
                    let Some(entity_id) = parse_id(raw_id, &mut out.issues) else {
                        continue;
                    };
                    let delta = decode_changed(raw_id, entry, &mut out.issues);
                    out.patch.changes.push(crate::EntityChange::Changed { entity_id, delta });
                }
            }
            None => out.issues.push(DiffIssue::BadSection("c")),
        }
    }

    if let Some(removed) = object.get("r") {
        let ids: Vec<&str> = match removed {
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            Value::Object(entries) => entries
                .iter()
                .filter(|(_, flag)| !matches!(flag, Value::Bool(false)))
                .map(|(id, _)| id.as_str())
                .collect(),
            _ => {
                out.issues.push(DiffIssue::BadSection("r"));
                Vec::new()
            }
        };
        for raw_id in ids {
            if let Some(entity_id) = parse_id(raw_id, &mut out.issues) {
                out.patch.changes.push(crate::EntityChange::Removed(entity_id));
            }
        }
    }

    out
}

fn parse_id(raw: &str, issues: &mut Vec<DiffIssue>) -> Option<EntityId> {
    match EntityId::parse(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            issues.push(DiffIssue::BadEntityId(raw.to_string()));
            None
        }
    }
}

fn decode_added(entity_id: EntityId, entry: &Value) -> Result<EntityRecord, String> {
    let fields = entry.as_object().ok_or("entry is not an object")?;
    let state = fields
        .get("s")
        .and_then(Value::as_str)
        .ok_or("missing state string \"s\"")?;
    let attributes = match fields.get("a") {
        None | Some(Value::Null) => Attributes::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err("attributes \"a\" is not an object".into()),
    };
    let last_changed = epoch_field(fields, "lc");
    let last_updated = epoch_field(fields, "lu");
    Ok(EntityRecord {
        entity_id,
        state: state.to_string(),
        attributes,
        context: fields.get("c").cloned().filter(|c| !c.is_null()),
        last_changed: last_changed.or(last_updated).unwrap_or_else(Utc::now),
        last_updated: last_updated.or(last_changed),
    })
}

fn decode_changed(raw_id: &str, entry: &Value, issues: &mut Vec<DiffIssue>) -> RecordDelta {
    let mut delta = RecordDelta::default();
    let mut bad = |field: &str| {
        issues.push(DiffIssue::BadChangedField {
            entity_id: raw_id.to_string(),
            field: field.to_string(),
        })
    };
    let Some(fields) = entry.as_object() else {
        bad("entry");
        return delta;
    };

    if let Some(plus) = fields.get("+") {
        match plus.as_object() {
            Some(plus) => {
                match plus.get("s") {
                    None => {}
                    Some(Value::String(s)) => delta.state = Some(s.clone()),
                    Some(_) => bad("+.s"),
                }
                match plus.get("a") {
                    None => {}
                    Some(Value::Object(map)) => delta.attributes = Some(map.clone()),
                    Some(_) => bad("+.a"),
                }
                if let Some(context) = plus.get("c").filter(|c| !c.is_null()) {
                    delta.context = Some(context.clone());
                }
                for (key, slot) in [
                    ("lc", &mut delta.last_changed),
                    ("lu", &mut delta.last_updated),
                ] {
                    if plus.contains_key(key) {
                        *slot = epoch_field(plus, key);
                        if slot.is_none() {
                            bad(&format!("+.{}", key));
                        }
                    }
                }
            }
            None => bad("+"),
        }
    }

    if let Some(minus) = fields.get("-") {
        match minus.get("a") {
            Some(Value::Array(keys)) => {
                delta.removed_attributes = keys
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
            }
            None => {}
            Some(_) => bad("-.a"),
        }
    }

    delta
}

fn epoch_field(fields: &Map<String, Value>, key: &str) -> Option<chrono::DateTime<Utc>> {
    fields.get(key).and_then(Value::as_f64).and_then(from_epoch_secs)
}
