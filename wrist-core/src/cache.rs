//! Local entity state cache.
//!
//! The cache is the only place entity records are mutated. It is filled by
//! a full snapshot, kept current by diff patches, and cleared whenever the
//! session drops so nothing pre-reconnect is read as current.

use hawrist_types::{DiffPatch, EntityId, EntityRecord};
use std::collections::HashMap;

/// What happened when a patch was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Records inserted or replaced
    pub added: usize,
    /// Records merged
    pub changed: usize,
    /// Records deleted
    pub removed: usize,
    /// Changed entries for entities the cache does not hold (protocol
    /// violation; skipped)
    pub unknown_changed: Vec<EntityId>,
    /// Removed entries for entities the cache does not hold
    pub unknown_removed: Vec<EntityId>,
}

impl PatchReport {
    /// True if the patch referenced entities the cache did not hold.
    pub fn has_violations(&self) -> bool {
        !self.unknown_changed.is_empty()
    }
}

/// Entity id → record mapping.
#[derive(Debug, Clone, Default)]
pub struct EntityStateCache {
    records: HashMap<EntityId, EntityRecord>,
    seeded: bool,
}

impl EntityStateCache {
    /// Create an empty, unseeded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mapping. Returns the number of records held.
    pub fn apply_snapshot(&mut self, records: impl IntoIterator<Item = EntityRecord>) -> usize {
        self.records = records
            .into_iter()
            .map(|record| (record.entity_id.clone(), record))
            .collect();
        self.seeded = true;
        self.records.len()
    }

    /// Insert or replace records without dropping any others.
    ///
    /// Used for the initial set of a filtered feed, which only covers part
    /// of the catalog.
    pub fn merge(&mut self, records: impl IntoIterator<Item = EntityRecord>) -> usize {
        let mut count = 0;
        for record in records {
            self.records.insert(record.entity_id.clone(), record);
            count += 1;
        }
        count
    }

    /// Apply a patch: every added record, then every change, then every
    /// removal.
    ///
    /// Re-applying an identical patch leaves the cache unchanged.
    pub fn apply_patch(&mut self, patch: &DiffPatch) -> PatchReport {
        let mut report = PatchReport::default();

        for record in patch.added() {
            self.records.insert(record.entity_id.clone(), record.clone());
            report.added += 1;
        }

        for (entity_id, delta) in patch.changed() {
            match self.records.get_mut(entity_id) {
                Some(record) => {
                    delta.apply_to(record);
                    report.changed += 1;
                }
                None => report.unknown_changed.push(entity_id.clone()),
            }
        }

        for entity_id in patch.removed() {
            if self.records.remove(entity_id).is_some() {
                report.removed += 1;
            } else {
                report.unknown_removed.push(entity_id.clone());
            }
        }

        report
    }

    /// Copy of one record.
    pub fn get(&self, entity_id: &str) -> Option<EntityRecord> {
        self.records.get(entity_id).cloned()
    }

    /// Check if a record is held.
    pub fn contains(&self, entity_id: &str) -> bool {
        self.records.contains_key(entity_id)
    }

    /// Copies of every record, sorted by entity id.
    pub fn all(&self) -> Vec<EntityRecord> {
        let mut all: Vec<_> = self.records.values().cloned().collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        all
    }

    /// Copies of every record in `domain`, sorted by entity id.
    pub fn by_domain(&self, domain: &str) -> Vec<EntityRecord> {
        let mut matching: Vec<_> = self
            .records
            .values()
            .filter(|record| record.domain() == domain)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        matching
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record and forget the snapshot.
    pub fn clear(&mut self) {
        self.records.clear();
        self.seeded = false;
    }

    /// A full snapshot has been applied since the last clear.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hawrist_types::{decode_entity_diff, RecordDelta};
    use serde_json::json;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn record(raw: &str, state: &str) -> EntityRecord {
        EntityRecord::new(id(raw), state, Utc.timestamp_opt(0, 0).unwrap())
    }

    fn patch(event: serde_json::Value) -> DiffPatch {
        let decoded = decode_entity_diff(&event);
        assert!(decoded.issues.is_empty(), "unexpected issues: {:?}", decoded.issues);
        decoded.patch
    }

    #[test]
    fn starts_empty_and_unseeded() {
        let cache = EntityStateCache::new();
        assert!(cache.is_empty());
        assert!(!cache.is_seeded());
    }

    #[test]
    fn snapshot_replaces_everything() {
        let mut cache = EntityStateCache::new();
        cache.apply_snapshot([record("light.a", "on"), record("light.b", "off")]);
        assert_eq!(cache.apply_snapshot([record("switch.c", "on")]), 1);

        assert!(cache.get("light.a").is_none());
        assert!(cache.contains("switch.c"));
        assert!(cache.is_seeded());
    }

    #[test]
    fn merge_keeps_other_records() {
        let mut cache = EntityStateCache::new();
        cache.apply_snapshot([record("light.a", "on")]);
        cache.merge([record("light.b", "off"), record("light.a", "off")]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("light.a").unwrap().state, "off");
    }

    #[test]
    fn changed_delta_preserves_untouched_fields() {
        let mut cache = EntityStateCache::new();
        cache.apply_patch(&patch(json!({
            "a": {"light.x": {"s": "on", "a": {"brightness": 128}, "lc": 0}}
        })));
        let report = cache.apply_patch(&patch(json!({
            "c": {"light.x": {"+": {"s": "off"}}}
        })));

        assert_eq!(report.changed, 1);
        let light = cache.get("light.x").unwrap();
        assert_eq!(light.state, "off");
        assert_eq!(light.attributes.get("brightness"), Some(&json!(128)));
    }

    #[test]
    fn removal_makes_entity_absent() {
        let mut cache = EntityStateCache::new();
        cache.apply_patch(&patch(json!({"a": {"light.x": {"s": "on", "a": {}, "lc": 0}}})));
        cache.apply_patch(&patch(json!({"c": {"light.x": {"+": {"s": "off"}}}})));
        let report = cache.apply_patch(&patch(json!({"r": {"light.x": true}})));

        assert_eq!(report.removed, 1);
        assert!(cache.get("light.x").is_none());
        assert!(cache.all().is_empty());
    }

    #[test]
    fn patch_applies_added_before_changed_before_removed() {
        let mut cache = EntityStateCache::new();
        // Pushed in reverse order on purpose
        let p = DiffPatch::new()
            .remove(id("light.x"))
            .change(id("light.x"), RecordDelta::state("off"))
            .add(record("light.x", "on"))
            .add(record("light.y", "on"))
            .change(id("light.y"), RecordDelta::state("off"));
        let report = cache.apply_patch(&p);

        assert!(cache.get("light.x").is_none());
        assert_eq!(cache.get("light.y").unwrap().state, "off");
        assert_eq!((report.added, report.changed, report.removed), (2, 2, 1));
    }

    #[test]
    fn reapplying_identical_patch_is_idempotent() {
        let mut cache = EntityStateCache::new();
        let p = patch(json!({
            "a": {"light.x": {"s": "on", "a": {"brightness": 10}, "lc": 5}},
            "c": {"light.x": {"+": {"a": {"brightness": 20}}}}
        }));
        cache.apply_patch(&p);
        let first = cache.all();
        cache.apply_patch(&p);

        assert_eq!(cache.all(), first);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn change_for_unknown_entity_is_reported_not_fatal() {
        let mut cache = EntityStateCache::new();
        cache.apply_snapshot([record("light.a", "on")]);
        let report = cache.apply_patch(
            &DiffPatch::new()
                .change(id("light.ghost"), RecordDelta::state("on"))
                .change(id("light.a"), RecordDelta::state("off")),
        );

        assert!(report.has_violations());
        assert_eq!(report.unknown_changed, vec![id("light.ghost")]);
        assert!(cache.get("light.ghost").is_none());
        assert_eq!(cache.get("light.a").unwrap().state, "off");
    }

    #[test]
    fn removing_unknown_entity_is_reported() {
        let mut cache = EntityStateCache::new();
        let report = cache.apply_patch(&DiffPatch::new().remove(id("light.gone")));
        assert_eq!(report.unknown_removed, vec![id("light.gone")]);
        assert!(!report.has_violations());
    }

    #[test]
    fn returned_records_are_copies() {
        let mut cache = EntityStateCache::new();
        cache.apply_snapshot([record("light.a", "on")]);

        let mut copy = cache.get("light.a").unwrap();
        copy.state = "tampered".into();
        let mut all = cache.all();
        all[0].state = "tampered".into();

        assert_eq!(cache.get("light.a").unwrap().state, "on");
    }

    #[test]
    fn all_and_by_domain_are_sorted() {
        let mut cache = EntityStateCache::new();
        cache.apply_snapshot([
            record("switch.b", "on"),
            record("light.z", "on"),
            record("light.a", "off"),
        ]);

        let ids: Vec<String> = cache.all().iter().map(|r| r.entity_id.to_string()).collect();
        assert_eq!(ids, vec!["light.a", "light.z", "switch.b"]);

        let lights = cache.by_domain("light");
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].entity_id, id("light.a"));
        assert!(cache.by_domain("cover").is_empty());
    }

    #[test]
    fn clear_empties_and_unseeds() {
        let mut cache = EntityStateCache::new();
        cache.apply_snapshot([record("light.a", "on")]);
        cache.clear();

        assert!(cache.all().is_empty());
        assert!(!cache.is_seeded());
    }
}
