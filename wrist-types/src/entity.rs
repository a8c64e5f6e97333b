//! Entity records and incremental patches.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EntityId;

/// Entity attribute mapping.
pub type Attributes = Map<String, Value>;

/// Full state of one entity.
///
/// Deserializes from a `get_states` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Namespaced id
    pub entity_id: EntityId,
    /// Current state string
    pub state: String,
    /// State attributes
    #[serde(default)]
    pub attributes: Attributes,
    /// Opaque server context (id, parent_id, user_id)
    #[serde(default)]
    pub context: Option<Value>,
    /// When the state string last changed
    pub last_changed: DateTime<Utc>,
    /// When the state or attributes last changed
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl EntityRecord {
    /// Create a record with empty attributes.
    pub fn new(entity_id: EntityId, state: &str, last_changed: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            state: state.to_string(),
            attributes: Attributes::new(),
            context: None,
            last_changed,
            last_updated: None,
        }
    }

    /// Replace the attribute mapping.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// `friendly_name` attribute, falling back to the entity id.
    pub fn friendly_name(&self) -> &str {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(self.entity_id.as_str())
    }

    /// The entity's domain.
    pub fn domain(&self) -> &str {
        self.entity_id.domain()
    }
}

/// Partial update for an existing record. Absent fields keep their
/// previous value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDelta {
    /// New state string
    pub state: Option<String>,
    /// Attributes to add or overwrite, merged key by key
    pub attributes: Option<Attributes>,
    /// Attribute keys to delete
    pub removed_attributes: Vec<String>,
    /// New context
    pub context: Option<Value>,
    /// New `last_changed`
    pub last_changed: Option<DateTime<Utc>>,
    /// New `last_updated`
    pub last_updated: Option<DateTime<Utc>>,
}

impl RecordDelta {
    /// A delta that only changes the state string.
    pub fn state(state: &str) -> Self {
        Self {
            state: Some(state.to_string()),
            ..Self::default()
        }
    }

    /// Add attribute changes.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// True if applying this delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.attributes.as_ref().map_or(true, Map::is_empty)
            && self.removed_attributes.is_empty()
            && self.context.is_none()
            && self.last_changed.is_none()
            && self.last_updated.is_none()
    }

    /// Merge this delta onto a record.
    pub fn apply_to(&self, record: &mut EntityRecord) {
        if let Some(state) = &self.state {
            record.state.clone_from(state);
        }
        if let Some(attributes) = &self.attributes {
            for (key, value) in attributes {
                record.attributes.insert(key.clone(), value.clone());
            }
        }
        for key in &self.removed_attributes {
            record.attributes.remove(key);
        }
        if let Some(context) = &self.context {
            record.context = Some(context.clone());
        }
        if let Some(last_changed) = self.last_changed {
            record.last_changed = last_changed;
        }
        // The compressed feed omits lu when it equals lc.
        match (self.last_updated, self.last_changed) {
            (Some(lu), _) => record.last_updated = Some(lu),
            (None, Some(lc)) => record.last_updated = Some(lc),
            (None, None) => {}
        }
    }
}

/// One entry of a diff patch.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    /// Entity appeared (or is re-sent in full)
    Added(EntityRecord),
    /// Entity changed partially
    Changed {
        /// Entity being changed
        entity_id: EntityId,
        /// Fields that changed
        delta: RecordDelta,
    },
    /// Entity disappeared
    Removed(EntityId),
}

impl EntityChange {
    /// Entity this change refers to.
    pub fn entity_id(&self) -> &EntityId {
        match self {
            EntityChange::Added(record) => &record.entity_id,
            EntityChange::Changed { entity_id, .. } => entity_id,
            EntityChange::Removed(entity_id) => entity_id,
        }
    }
}

/// Incremental update: entities added, changed or removed since the last
/// delivered state.
///
/// Consumers apply all `Added` entries, then all `Changed`, then all
/// `Removed`, regardless of the order they were pushed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffPatch {
    /// All changes in this patch
    pub changes: Vec<EntityChange>,
}

impl DiffPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a full record.
    pub fn add(mut self, record: EntityRecord) -> Self {
        self.changes.push(EntityChange::Added(record));
        self
    }

    /// Add a partial change.
    pub fn change(mut self, entity_id: EntityId, delta: RecordDelta) -> Self {
        self.changes.push(EntityChange::Changed { entity_id, delta });
        self
    }

    /// Add a removal.
    pub fn remove(mut self, entity_id: EntityId) -> Self {
        self.changes.push(EntityChange::Removed(entity_id));
        self
    }

    /// Added records.
    pub fn added(&self) -> impl Iterator<Item = &EntityRecord> {
        self.changes.iter().filter_map(|c| match c {
            EntityChange::Added(record) => Some(record),
            _ => None,
        })
    }

    /// Partial changes.
    pub fn changed(&self) -> impl Iterator<Item = (&EntityId, &RecordDelta)> {
        self.changes.iter().filter_map(|c| match c {
            EntityChange::Changed { entity_id, delta } => Some((entity_id, delta)),
            _ => None,
        })
    }

    /// Removed ids.
    pub fn removed(&self) -> impl Iterator<Item = &EntityId> {
        self.changes.iter().filter_map(|c| match c {
            EntityChange::Removed(entity_id) => Some(entity_id),
            _ => None,
        })
    }

    /// Whether the patch has no entries.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Convert fractional epoch seconds (as sent by the compressed feed).
pub(crate) fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    Utc.timestamp_opt(whole as i64, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn epoch() -> DateTime<Utc> {
        from_epoch_secs(0.0).unwrap()
    }

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("attributes must be an object"),
        }
    }

    #[test]
    fn record_deserializes_from_get_states_row() {
        let row = json!({
            "entity_id": "sensor.outside",
            "state": "21.5",
            "attributes": {"unit_of_measurement": "°C", "friendly_name": "Outside"},
            "last_changed": "2024-05-01T10:00:00.123456+00:00",
            "last_updated": "2024-05-01T10:00:00.123456+00:00",
            "context": {"id": "abc", "parent_id": null, "user_id": null}
        });
        let record: EntityRecord = serde_json::from_value(row).unwrap();
        assert_eq!(record.entity_id, id("sensor.outside"));
        assert_eq!(record.friendly_name(), "Outside");
        assert_eq!(record.domain(), "sensor");
        assert!(record.last_updated.is_some());
    }

    #[test]
    fn friendly_name_falls_back_to_id() {
        let record = EntityRecord::new(id("light.x"), "on", epoch());
        assert_eq!(record.friendly_name(), "light.x");
    }

    #[test]
    fn delta_preserves_untouched_fields() {
        let mut record = EntityRecord::new(id("light.x"), "on", epoch())
            .with_attributes(attrs(json!({"brightness": 200, "friendly_name": "X"})));
        RecordDelta::state("off").apply_to(&mut record);

        assert_eq!(record.state, "off");
        assert_eq!(record.attributes.get("brightness"), Some(&json!(200)));
        assert_eq!(record.last_changed, epoch());
    }

    #[test]
    fn delta_merges_and_removes_attributes() {
        let mut record = EntityRecord::new(id("light.x"), "on", epoch())
            .with_attributes(attrs(json!({"brightness": 200, "color_mode": "hs"})));
        let mut delta = RecordDelta::default().with_attributes(attrs(json!({"brightness": 10})));
        delta.removed_attributes.push("color_mode".into());
        delta.apply_to(&mut record);

        assert_eq!(record.attributes.get("brightness"), Some(&json!(10)));
        assert!(record.attributes.get("color_mode").is_none());
        assert_eq!(record.state, "on");
    }

    #[test]
    fn delta_last_changed_implies_last_updated() {
        let mut record = EntityRecord::new(id("light.x"), "on", epoch());
        let later = from_epoch_secs(100.5).unwrap();
        let delta = RecordDelta {
            last_changed: Some(later),
            ..RecordDelta::default()
        };
        delta.apply_to(&mut record);
        assert_eq!(record.last_changed, later);
        assert_eq!(record.last_updated, Some(later));
    }

    #[test]
    fn empty_delta_detection() {
        assert!(RecordDelta::default().is_empty());
        assert!(RecordDelta::default()
            .with_attributes(Attributes::new())
            .is_empty());
        assert!(!RecordDelta::state("on").is_empty());
    }

    #[test]
    fn patch_accessors_split_by_kind() {
        let patch = DiffPatch::new()
            .remove(id("light.old"))
            .add(EntityRecord::new(id("light.new"), "on", epoch()))
            .change(id("light.x"), RecordDelta::state("off"));

        assert_eq!(patch.len(), 3);
        assert_eq!(patch.added().count(), 1);
        assert_eq!(patch.changed().count(), 1);
        assert_eq!(patch.removed().next(), Some(&id("light.old")));
        assert_eq!(patch.changes[0].entity_id(), &id("light.old"));
    }

    #[test]
    fn epoch_conversion_keeps_fraction() {
        let ts = from_epoch_secs(1_700_000_000.25).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 250);
        assert!(from_epoch_secs(f64::NAN).is_none());
    }
}
