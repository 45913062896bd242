//! Per-field version tracking and conflict detection.

use crate::activity::SyncTransaction;
use crate::error::{Result, SyncError};
use crate::transactions::{Hlc, TransactionDescriptor};
use crate::types::TransactionId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stamp of the last accepted write to one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldVersion {
    pub transaction_id: TransactionId,
    pub version: u64,
}

/// Field name to last-write stamp, stored on the entity row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldVersionMap(BTreeMap<String, FieldVersion>);

impl FieldVersionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldVersion> {
        self.0.get(field)
    }

    /// Current transaction stamp of a field (`None` if never written).
    pub fn stamp_of(&self, field: &str) -> Option<&TransactionId> {
        self.0.get(field).map(|v| &v.transaction_id)
    }

    /// Current version of a field. Absent fields are at version 0.
    pub fn version_of(&self, field: &str) -> u64 {
        self.0.get(field).map(|v| v.version).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldVersion)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Highest version across all fields.
    pub fn max_version(&self) -> u64 {
        self.0.values().map(|v| v.version).max().unwrap_or(0)
    }

    /// Compact encoding for the row's opaque column.
    pub fn to_column_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_column_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl FromIterator<(String, FieldVersion)> for FieldVersionMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldVersion)>>(iter: I) -> Self {
        FieldVersionMap(iter.into_iter().collect())
    }
}

/// A field whose server stamp differs from what the client expected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    pub field: String,
    pub server_transaction_id: Option<TransactionId>,
    pub client_expected_transaction_id: Option<TransactionId>,
}

/// Stamp every changed field with `stamp`, bumping its version by one.
///
/// Returns a new map; `previous` is left untouched.
pub fn build_field_versions<S: AsRef<str>>(
    previous: &FieldVersionMap,
    changed_fields: &[S],
    stamp: &TransactionId,
) -> FieldVersionMap {
    let mut next = previous.clone();
    for field in changed_fields {
        let field = field.as_ref();
        let version = previous.version_of(field) + 1;
        next.0.insert(
            field.to_string(),
            FieldVersion {
                transaction_id: stamp.clone(),
                version,
            },
        );
    }
    next
}

/// Compare each changed field's server stamp with the client's expectation.
///
/// `client_base` maps field name to the stamp the client last saw; a
/// missing entry means the client believes the field was never written.
/// A field the server never wrote never conflicts. Every conflicting field
/// is reported, not just the first.
pub fn check_field_conflicts<S: AsRef<str>>(
    changed_fields: &[S],
    previous: &FieldVersionMap,
    client_base: &BTreeMap<String, TransactionId>,
) -> Vec<FieldConflict> {
    changed_fields
        .iter()
        .filter_map(|field| {
            let field = field.as_ref();
            let server = previous.stamp_of(field)?;
            let expected = client_base.get(field);
            if Some(server) == expected {
                return None;
            }
            Some(FieldConflict {
                field: field.to_string(),
                server_transaction_id: Some(server.clone()),
                client_expected_transaction_id: expected.cloned(),
            })
        })
        .collect()
}

/// Fail with [`SyncError::FieldConflict`] when `conflicts` is non-empty.
pub fn throw_if_conflicts(entity_type: &str, conflicts: Vec<FieldConflict>) -> Result<()> {
    if conflicts.is_empty() {
        return Ok(());
    }
    Err(SyncError::FieldConflict {
        entity_type: entity_type.to_string(),
        conflicts,
    })
}

/// Outcome of a validated mutation, ready to persist.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedMutation {
    /// Map to store on the row.
    pub field_versions: FieldVersionMap,
    /// Fields this mutation stamped (empty for whole-entity mutations).
    pub changed_keys: Vec<String>,
    /// Metadata the activity producer embeds on the resulting event.
    pub transaction: SyncTransaction,
}

/// Run the write-path checks for one mutation.
///
/// All descriptors must share a transaction id and source. A descriptor
/// without a field is a whole-entity create/delete and must stand alone;
/// it skips field checks and leaves the map as is.
pub fn prepare_mutation(
    entity_type: &str,
    previous: &FieldVersionMap,
    descriptors: &[TransactionDescriptor],
) -> Result<PreparedMutation> {
    let first = descriptors
        .first()
        .ok_or_else(|| SyncError::InvalidTransaction("no transaction descriptors".into()))?;

    Hlc::parse(&first.transaction_id)?;

    if descriptors
        .iter()
        .any(|d| d.transaction_id != first.transaction_id || d.source_id != first.source_id)
    {
        return Err(SyncError::InvalidTransaction(
            "descriptors in one mutation must share transaction and source".into(),
        ));
    }

    let whole_entity = descriptors.iter().any(|d| d.changed_field.is_none());
    if whole_entity {
        if descriptors.len() > 1 {
            return Err(SyncError::InvalidTransaction(
                "whole-entity mutation cannot be combined with field updates".into(),
            ));
        }
        return Ok(PreparedMutation {
            field_versions: previous.clone(),
            changed_keys: Vec::new(),
            transaction: SyncTransaction {
                mutation_id: first.transaction_id.clone(),
                source_id: first.source_id.clone(),
                changed_field: None,
                expected_transaction_id: None,
                version: previous.max_version(),
                field_versions: previous.clone(),
            },
        });
    }

    let mut seen = BTreeSet::new();
    let mut changed_keys = Vec::with_capacity(descriptors.len());
    let mut client_base = BTreeMap::new();
    for descriptor in descriptors {
        // Checked above: every descriptor names a field here.
        let Some(field) = descriptor.changed_field.as_ref() else {
            continue;
        };
        if !seen.insert(field.as_str()) {
            return Err(SyncError::InvalidTransaction(format!(
                "field {field} appears twice in one mutation"
            )));
        }
        changed_keys.push(field.clone());
        if let Some(expected) = &descriptor.expected_transaction_id {
            client_base.insert(field.clone(), expected.clone());
        }
    }

    throw_if_conflicts(
        entity_type,
        check_field_conflicts(&changed_keys, previous, &client_base),
    )?;

    let field_versions = build_field_versions(previous, &changed_keys, &first.transaction_id);
    let version = changed_keys
        .iter()
        .map(|f| field_versions.version_of(f))
        .max()
        .unwrap_or(0);

    let single = (descriptors.len() == 1).then_some(first);
    Ok(PreparedMutation {
        transaction: SyncTransaction {
            mutation_id: first.transaction_id.clone(),
            source_id: first.source_id.clone(),
            changed_field: single.and_then(|d| d.changed_field.clone()),
            expected_transaction_id: single.and_then(|d| d.expected_transaction_id.clone()),
            version,
            field_versions: field_versions.clone(),
        },
        field_versions,
        changed_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id)
    }

    fn page_v1() -> FieldVersionMap {
        let empty = FieldVersionMap::new();
        build_field_versions(&empty, &["title", "content"], &tx("100.0.seed"))
    }

    #[test]
    fn test_build_bumps_only_changed_fields() {
        let v1 = page_v1();
        let v2 = build_field_versions(&v1, &["content"], &tx("200.0.b"));

        assert_eq!(v2.version_of("content"), 2);
        assert_eq!(v2.stamp_of("content"), Some(&tx("200.0.b")));
        assert_eq!(v2.get("title"), v1.get("title"));
        // Input untouched
        assert_eq!(v1.version_of("content"), 1);
    }

    #[test]
    fn test_absent_field_starts_at_zero() {
        let map = FieldVersionMap::new();
        assert_eq!(map.version_of("tags"), 0);
        let next = build_field_versions(&map, &["tags"], &tx("1.0.a"));
        assert_eq!(next.version_of("tags"), 1);
    }

    #[test]
    fn test_conflict_rules() {
        let v1 = page_v1();
        let mut base = BTreeMap::new();

        // Client assumed unwritten but server has a stamp
        let conflicts = check_field_conflicts(&["title"], &v1, &base);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].client_expected_transaction_id, None);

        // Matching stamp
        base.insert("title".to_string(), tx("100.0.seed"));
        assert!(check_field_conflicts(&["title"], &v1, &base).is_empty());

        // Both unwritten
        assert!(check_field_conflicts(&["tags"], &v1, &BTreeMap::new()).is_empty());

        // Client expects a stamp the server never wrote
        base.insert("tags".to_string(), tx("90.0.x"));
        assert!(check_field_conflicts(&["tags"], &v1, &base).is_empty());
        assert!(check_field_conflicts(&["tags"], &FieldVersionMap::new(), &base).is_empty());
    }

    #[test]
    fn test_all_conflicts_reported() {
        let v1 = page_v1();
        let mut base = BTreeMap::new();
        base.insert("title".to_string(), tx("1.0.stale"));
        base.insert("content".to_string(), tx("2.0.stale"));

        let conflicts = check_field_conflicts(&["title", "content"], &v1, &base);
        let fields: Vec<_> = conflicts.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["title", "content"]);

        let err = throw_if_conflicts("page", conflicts).unwrap_err();
        assert_eq!(err.conflicting_fields(), vec!["title", "content"]);
    }

    #[test]
    fn test_throw_if_conflicts_noop_when_empty() {
        assert!(throw_if_conflicts("page", Vec::new()).is_ok());
    }

    #[test]
    fn test_concurrent_edits_to_different_fields() {
        let v1 = page_v1();

        // Client B updates content
        let b = prepare_mutation(
            "page",
            &v1,
            &[TransactionDescriptor::field("200.0.b", "tab-b", "content", Some(tx("100.0.seed")))],
        )
        .unwrap();

        // Client A, still on v1, updates title
        let a = prepare_mutation(
            "page",
            &b.field_versions,
            &[TransactionDescriptor::field("201.0.a", "tab-a", "title", Some(tx("100.0.seed")))],
        )
        .unwrap();

        assert_eq!(a.field_versions.stamp_of("content"), Some(&tx("200.0.b")));
        assert_eq!(a.field_versions.stamp_of("title"), Some(&tx("201.0.a")));
        assert_eq!(a.transaction.version, 2);
        assert_eq!(a.changed_keys, vec!["title".to_string()]);
    }

    #[test]
    fn test_stale_write_conflicts_on_that_field_only() {
        let v1 = page_v1();
        let v2 = build_field_versions(&v1, &["content"], &tx("200.0.b"));

        let result = prepare_mutation(
            "page",
            &v2,
            &[
                TransactionDescriptor::field("201.0.a", "tab-a", "content", Some(tx("100.0.seed"))),
                TransactionDescriptor::field("201.0.a", "tab-a", "title", Some(tx("100.0.seed"))),
            ],
        );

        match result {
            Err(SyncError::FieldConflict {
                entity_type,
                conflicts,
            }) => {
                assert_eq!(entity_type, "page");
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].field, "content");
                assert_eq!(conflicts[0].server_transaction_id, Some(tx("200.0.b")));
            }
            other => panic!("expected field conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_whole_entity_create() {
        let prepared = prepare_mutation(
            "page",
            &FieldVersionMap::new(),
            &[TransactionDescriptor::whole_entity("1.0.a", "tab-a")],
        )
        .unwrap();

        assert!(prepared.field_versions.is_empty());
        assert!(prepared.changed_keys.is_empty());
        assert_eq!(prepared.transaction.changed_field, None);
        assert_eq!(prepared.transaction.version, 0);
    }

    #[test]
    fn test_invalid_batches_rejected() {
        let map = FieldVersionMap::new();

        assert!(matches!(
            prepare_mutation("page", &map, &[]),
            Err(SyncError::InvalidTransaction(_))
        ));

        let mixed = [
            TransactionDescriptor::field("1.0.a", "tab-a", "title", None),
            TransactionDescriptor::field("2.0.a", "tab-a", "content", None),
        ];
        assert!(matches!(
            prepare_mutation("page", &map, &mixed),
            Err(SyncError::InvalidTransaction(_))
        ));

        let duplicate = [
            TransactionDescriptor::field("1.0.a", "tab-a", "title", None),
            TransactionDescriptor::field("1.0.a", "tab-a", "title", None),
        ];
        assert!(matches!(
            prepare_mutation("page", &map, &duplicate),
            Err(SyncError::InvalidTransaction(_))
        ));

        let bad_id = [TransactionDescriptor::field("not-an-hlc", "tab-a", "title", None)];
        assert!(matches!(
            prepare_mutation("page", &map, &bad_id),
            Err(SyncError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_column_bytes_preserve_map() {
        let v1 = page_v1();
        let bytes = v1.to_column_bytes().unwrap();
        assert_eq!(FieldVersionMap::from_column_bytes(&bytes).unwrap(), v1);
    }

    #[test]
    fn test_json_wire_form() {
        let v1 = build_field_versions(&FieldVersionMap::new(), &["title"], &tx("1.0.a"));
        let json = serde_json::to_value(&v1).unwrap();
        assert_eq!(json["title"]["transactionId"], "1.0.a");
        assert_eq!(json["title"]["version"], 1);
    }

    proptest! {
        #[test]
        fn prop_version_advances_by_write_count(
            writes in proptest::collection::vec((0usize..4, any::<bool>()), 1..40)
        ) {
            let fields = ["title", "content", "tags", "status"];
            let mut map = FieldVersionMap::new();
            let mut counts = [0u64; 4];

            for (i, (field_idx, touch_other)) in writes.iter().enumerate() {
                let mut changed = vec![fields[*field_idx]];
                if *touch_other {
                    changed.push(fields[(field_idx + 1) % 4]);
                }
                for f in &changed {
                    let idx = fields.iter().position(|x| x == f).unwrap();
                    counts[idx] += 1;
                }
                map = build_field_versions(&map, &changed, &tx(&format!("{i}.0.n")));
            }

            for (idx, field) in fields.iter().enumerate() {
                prop_assert_eq!(map.version_of(field), counts[idx]);
            }
        }

        #[test]
        fn prop_conflict_iff_stamps_differ(server in "[a-c]", client in "[a-c]") {
            let map = build_field_versions(&FieldVersionMap::new(), &["f"], &tx(&server));
            let mut base = BTreeMap::new();
            base.insert("f".to_string(), tx(&client));

            let conflicts = check_field_conflicts(&["f"], &map, &base);
            prop_assert_eq!(conflicts.is_empty(), server == client);
        }

        #[test]
        fn prop_disjoint_fields_never_conflict(
            a in proptest::collection::btree_set("[a-e]", 1..3),
            b in proptest::collection::btree_set("[f-j]", 1..3),
        ) {
            let all: Vec<String> = a.iter().chain(b.iter()).cloned().collect();
            let snapshot = build_field_versions(&FieldVersionMap::new(), &all, &tx("1.0.seed"));
            let base: BTreeMap<String, TransactionId> = snapshot
                .iter()
                .map(|(k, v)| (k.to_string(), v.transaction_id.clone()))
                .collect();

            let a_fields: Vec<String> = a.into_iter().collect();
            let b_fields: Vec<String> = b.into_iter().collect();

            // Writer A lands first
            prop_assert!(check_field_conflicts(&a_fields, &snapshot, &base).is_empty());
            let after_a = build_field_versions(&snapshot, &a_fields, &tx("2.0.a"));

            // Writer B used the same stale snapshot
            prop_assert!(check_field_conflicts(&b_fields, &after_a, &base).is_empty());
        }
    }
}
