// Copyright (c) 2025 - Cowboy AI, Inc.
//! Built-in appliers
//!
//! The engine ships appliers for the eight core event types. Each is a
//! pure function in the handler pattern: validate the input constraint
//! first, then construct the resulting entities and diffs.
//!
//! | Tag | Effect |
//! |---|---|
//! | `create-individual` | new Individual at v=1 |
//! | `create-group` | new Group, payload `members` created as Individuals |
//! | `update-individual` | shallow merge into `data` |
//! | `update-group` | shallow merge into `data`, member list untouched |
//! | `add-member` | create members, append guids to the group |
//! | `remove-member` | drop guid from the group, tombstone the member |
//! | `delete-entity` | tombstone |
//! | `resolve-duplicate` | optionally tombstone the duplicate, close the record |

use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::domain::{diff_data, Entity, EntityKind, FieldChange, FormSubmission};
use crate::errors::{EngineError, EngineResult};

use super::{AppliedChange, AppliedResult, ApplierRegistry, EntityLookup, EventApplier};

/// Seed a registry with the eight built-in appliers
pub fn register_builtins(registry: &mut ApplierRegistry) {
    use crate::domain::form::event_types::*;

    registry.register(CREATE_INDIVIDUAL, Arc::new(CreateIndividual));
    registry.register(CREATE_GROUP, Arc::new(CreateGroup));
    registry.register(UPDATE_INDIVIDUAL, Arc::new(UpdateIndividual));
    registry.register(UPDATE_GROUP, Arc::new(UpdateGroup));
    registry.register(ADD_MEMBER, Arc::new(AddMember));
    registry.register(REMOVE_MEMBER, Arc::new(RemoveMember));
    registry.register(DELETE_ENTITY, Arc::new(DeleteEntity));
    registry.register(RESOLVE_DUPLICATE, Arc::new(ResolveDuplicate));
}

/// A member record parsed from a `members` payload entry
struct MemberInput {
    guid: String,
    data: Map<String, Value>,
}

/// Parse the `members` array of a payload
///
/// Each entry is an object carrying a non-empty `guid` plus the member's
/// own payload fields.
fn parse_members(data: &Map<String, Value>) -> EngineResult<Vec<MemberInput>> {
    let entries = data
        .get("members")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::Validation("payload must carry a members array".into()))?;

    let mut members = Vec::with_capacity(entries.len());
    for entry in entries {
        let object = entry
            .as_object()
            .ok_or_else(|| EngineError::Validation("member entries must be objects".into()))?;
        let guid = object
            .get("guid")
            .and_then(Value::as_str)
            .filter(|g| !g.trim().is_empty())
            .ok_or_else(|| EngineError::Validation("member entry missing guid".into()))?
            .to_string();
        let mut member_data = object.clone();
        member_data.remove("guid");
        members.push(MemberInput {
            guid,
            data: member_data,
        });
    }
    Ok(members)
}

fn member_ids_change(old: &[String], new: &[String]) -> FieldChange {
    FieldChange {
        field: "memberIds".to_string(),
        old: Some(json!(old)),
        new: Some(json!(new)),
    }
}

fn tombstone_change() -> FieldChange {
    FieldChange {
        field: "deleted".to_string(),
        old: Some(json!(false)),
        new: Some(json!(true)),
    }
}

fn require_absent(entity: Option<&Entity>, form: &FormSubmission) -> EngineResult<()> {
    if entity.is_some() {
        return Err(EngineError::Validation(format!(
            "entity {} already exists",
            form.entity_guid
        )));
    }
    Ok(())
}

fn require_group<'a>(entity: Option<&'a Entity>, form: &FormSubmission) -> EngineResult<&'a Entity> {
    let entity = entity.ok_or_else(|| {
        EngineError::Validation(format!("entity {} does not exist", form.entity_guid))
    })?;
    if !entity.is_group() {
        return Err(EngineError::Validation(format!(
            "entity {} is not a group",
            form.entity_guid
        )));
    }
    Ok(entity)
}

/// `create-individual`
pub struct CreateIndividual;

impl EventApplier for CreateIndividual {
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        _lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        require_absent(entity, form)?;
        if form.data.contains_key("members") {
            return Err(EngineError::Validation(
                "an individual cannot carry members".into(),
            ));
        }

        let created = Entity::new(
            &form.entity_guid,
            EntityKind::Individual,
            form.data.clone(),
            form.timestamp,
        );
        let changes = diff_data(&Map::new(), &created.data);
        Ok(AppliedResult::single(None, created, changes))
    }
}

/// `create-group`
pub struct CreateGroup;

impl EventApplier for CreateGroup {
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        require_absent(entity, form)?;

        // The member list lives in member_guids, not in the group's
        // payload.
        let mut group_data = form.data.clone();
        group_data.remove("members");
        let mut group = Entity::new(
            &form.entity_guid,
            EntityKind::Group,
            group_data,
            form.timestamp,
        );

        let mut result = AppliedResult::default();
        if form.data.contains_key("members") {
            for member in parse_members(&form.data)? {
                if lookup.get(&member.guid).is_some() {
                    return Err(EngineError::Validation(format!(
                        "member entity {} already exists",
                        member.guid
                    )));
                }
                group.add_member(&member.guid)?;
                let created = Entity::new(
                    &member.guid,
                    EntityKind::Individual,
                    member.data,
                    form.timestamp,
                );
                let changes = diff_data(&Map::new(), &created.data);
                result.changes.push(AppliedChange {
                    existing: None,
                    modified: created,
                    changes,
                });
            }
        }

        let mut group_changes = diff_data(&Map::new(), &group.data);
        if !group.member_guids.is_empty() {
            group_changes.push(member_ids_change(&[], &group.member_guids));
        }
        // Group first, members after, matching input order within the
        // member list.
        result.changes.insert(
            0,
            AppliedChange {
                existing: None,
                modified: group,
                changes: group_changes,
            },
        );
        Ok(result)
    }
}

/// `update-individual`
pub struct UpdateIndividual;

impl EventApplier for UpdateIndividual {
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        _lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        let existing = entity.ok_or_else(|| {
            EngineError::Validation(format!("entity {} does not exist", form.entity_guid))
        })?;
        if existing.kind != EntityKind::Individual {
            return Err(EngineError::Validation(format!(
                "entity {} is not an individual",
                form.entity_guid
            )));
        }

        let mut updated = existing.clone();
        updated.merge_data(&form.data);
        updated.touch(form.timestamp);
        let changes = diff_data(&existing.data, &updated.data);
        Ok(AppliedResult::single(
            Some(existing.clone()),
            updated,
            changes,
        ))
    }
}

/// `update-group`
pub struct UpdateGroup;

impl EventApplier for UpdateGroup {
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        _lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        let existing = require_group(entity, form)?;

        // Membership only changes through add-member / remove-member.
        let mut payload = form.data.clone();
        payload.remove("members");
        payload.remove("memberIds");

        let mut updated = existing.clone();
        updated.merge_data(&payload);
        updated.touch(form.timestamp);
        let changes = diff_data(&existing.data, &updated.data);
        Ok(AppliedResult::single(
            Some(existing.clone()),
            updated,
            changes,
        ))
    }
}

/// `add-member`
pub struct AddMember;

impl EventApplier for AddMember {
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        let existing = require_group(entity, form)?;
        let members = parse_members(&form.data)?;

        let mut group = existing.clone();
        let old_member_guids = group.member_guids.clone();
        let mut result = AppliedResult::default();

        for member in members {
            group.add_member(&member.guid)?;
            match lookup.get(&member.guid) {
                // A previously removed member comes back as the same
                // entity, revived from its tombstone.
                Some(prior) => {
                    let mut revived = prior.clone();
                    revived.deleted = false;
                    revived.merge_data(&member.data);
                    revived.touch(form.timestamp);
                    let mut changes = diff_data(&prior.data, &revived.data);
                    if prior.deleted {
                        changes.push(FieldChange {
                            field: "deleted".to_string(),
                            old: Some(json!(true)),
                            new: Some(json!(false)),
                        });
                    }
                    result.changes.push(AppliedChange {
                        existing: Some(prior),
                        modified: revived,
                        changes,
                    });
                }
                None => {
                    let created = Entity::new(
                        &member.guid,
                        EntityKind::Individual,
                        member.data,
                        form.timestamp,
                    );
                    let changes = diff_data(&Map::new(), &created.data);
                    result.changes.push(AppliedChange {
                        existing: None,
                        modified: created,
                        changes,
                    });
                }
            }
        }

        group.touch(form.timestamp);
        result.changes.insert(
            0,
            AppliedChange {
                existing: Some(existing.clone()),
                modified: group.clone(),
                changes: vec![member_ids_change(&old_member_guids, &group.member_guids)],
            },
        );
        Ok(result)
    }
}

/// `remove-member`
pub struct RemoveMember;

impl EventApplier for RemoveMember {
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        let existing = require_group(entity, form)?;
        let member_guid = form
            .data_str("memberId")
            .filter(|g| !g.trim().is_empty())
            .ok_or_else(|| EngineError::Validation("payload must carry memberId".into()))?
            .to_string();

        let mut group = existing.clone();
        let old_member_guids = group.member_guids.clone();
        group.remove_member(&member_guid)?;
        group.touch(form.timestamp);

        let mut result = AppliedResult::single(
            Some(existing.clone()),
            group.clone(),
            vec![member_ids_change(&old_member_guids, &group.member_guids)],
        );

        // The member entity is retained but tombstoned.
        if let Some(member) = lookup.get(&member_guid) {
            if !member.deleted {
                let mut tombstoned = member.clone();
                tombstoned.deleted = true;
                tombstoned.touch(form.timestamp);
                result.changes.push(AppliedChange {
                    existing: Some(member),
                    modified: tombstoned,
                    changes: vec![tombstone_change()],
                });
            }
        }
        Ok(result)
    }
}

/// `delete-entity`
pub struct DeleteEntity;

impl EventApplier for DeleteEntity {
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        _lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        let existing = entity.ok_or_else(|| {
            EngineError::Validation(format!("entity {} does not exist", form.entity_guid))
        })?;

        let mut tombstoned = existing.clone();
        tombstoned.deleted = true;
        tombstoned.touch(form.timestamp);
        Ok(AppliedResult::single(
            Some(existing.clone()),
            tombstoned,
            vec![tombstone_change()],
        ))
    }
}

/// `resolve-duplicate`
pub struct ResolveDuplicate;

impl EventApplier for ResolveDuplicate {
    fn apply(
        &self,
        entity: Option<&Entity>,
        form: &FormSubmission,
        lookup: &dyn EntityLookup,
    ) -> EngineResult<AppliedResult> {
        let surviving = entity.ok_or_else(|| {
            EngineError::Validation(format!("entity {} does not exist", form.entity_guid))
        })?;
        let pairs = form
            .data
            .get("duplicates")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EngineError::Validation("payload must carry a duplicates array".into())
            })?;
        let should_delete = form
            .data
            .get("shouldDelete")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut result = AppliedResult::default();
        for pair in pairs {
            let entity_guid = pair
                .get("entityGuid")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    EngineError::Validation("duplicate entry missing entityGuid".into())
                })?;
            let duplicate_guid = pair
                .get("duplicateGuid")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    EngineError::Validation("duplicate entry missing duplicateGuid".into())
                })?;

            let duplicate = lookup.get(duplicate_guid).ok_or_else(|| {
                EngineError::Validation(format!("entity {} does not exist", duplicate_guid))
            })?;

            if should_delete && !duplicate.deleted {
                let mut tombstoned = duplicate.clone();
                tombstoned.deleted = true;
                tombstoned.touch(form.timestamp);
                result.changes.push(AppliedChange {
                    existing: Some(duplicate),
                    modified: tombstoned,
                    changes: vec![tombstone_change()],
                });
            }
            result
                .resolved_pairs
                .push((entity_guid.to_string(), duplicate_guid.to_string()));
        }

        let mut touched = surviving.clone();
        touched.touch(form.timestamp);
        result.changes.insert(
            0,
            AppliedChange {
                existing: Some(surviving.clone()),
                modified: touched,
                changes: Vec::new(),
            },
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appliers::PrefetchedEntities;
    use crate::domain::{form::event_types, SyncLevel};
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn ts() -> DateTime<Utc> {
        "2026-01-19T12:00:00Z".parse().unwrap()
    }

    fn form(event_type: &str, entity_guid: &str, data: Value) -> FormSubmission {
        FormSubmission {
            guid: format!("form-{}-{}", event_type, entity_guid),
            entity_guid: entity_guid.to_string(),
            event_type: event_type.to_string(),
            data: data.as_object().unwrap().clone(),
            timestamp: ts(),
            user_id: "u1".to_string(),
            sync_level: SyncLevel::Local,
        }
    }

    fn lookup(entities: Vec<Entity>) -> PrefetchedEntities {
        PrefetchedEntities::new(
            entities
                .into_iter()
                .map(|e| (e.guid.clone(), e))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_create_individual() {
        let form = form(
            event_types::CREATE_INDIVIDUAL,
            "P1",
            json!({"name": "John", "age": 30}),
        );
        let result = CreateIndividual
            .apply(None, &form, &PrefetchedEntities::default())
            .unwrap();

        assert_eq!(result.changes.len(), 1);
        let created = &result.changes[0].modified;
        assert_eq!(created.guid, "P1");
        assert_eq!(created.kind, EntityKind::Individual);
        assert_eq!(created.version, 1);
        assert_eq!(created.name, "John");
        assert_eq!(result.changes[0].changes.len(), 2);
    }

    #[test]
    fn test_create_individual_rejects_members() {
        let form = form(
            event_types::CREATE_INDIVIDUAL,
            "P1",
            json!({"name": "John", "members": []}),
        );
        assert!(CreateIndividual
            .apply(None, &form, &PrefetchedEntities::default())
            .is_err());
    }

    #[test]
    fn test_create_group_with_members() {
        let form = form(
            event_types::CREATE_GROUP,
            "G1",
            json!({
                "name": "Doe",
                "members": [
                    {"guid": "P2", "name": "Jane"},
                    {"guid": "P3", "name": "Jim"},
                ],
            }),
        );
        let result = CreateGroup
            .apply(None, &form, &PrefetchedEntities::default())
            .unwrap();

        assert_eq!(result.changes.len(), 3);
        let group = &result.changes[0].modified;
        assert_eq!(group.kind, EntityKind::Group);
        assert_eq!(group.member_guids, vec!["P2", "P3"]);
        assert_eq!(group.version, 1);
        assert!(!group.data.contains_key("members"));

        let member_guids: Vec<&str> = result.changes[1..]
            .iter()
            .map(|c| c.modified.guid.as_str())
            .collect();
        assert_eq!(member_guids, vec!["P2", "P3"]);
        assert!(result.changes[1..].iter().all(|c| c.modified.version == 1));
    }

    #[test]
    fn test_update_group_never_mutates_members() {
        let mut group = Entity::new(
            "G1",
            EntityKind::Group,
            json!({"name": "Doe"}).as_object().unwrap().clone(),
            ts(),
        );
        group.member_guids = vec!["P2".to_string()];

        let form = form(
            event_types::UPDATE_GROUP,
            "G1",
            json!({"name": "Smith", "members": [{"guid": "P9"}]}),
        );
        let result = UpdateGroup
            .apply(Some(&group), &form, &PrefetchedEntities::default())
            .unwrap();

        let updated = &result.changes[0].modified;
        assert_eq!(updated.member_guids, vec!["P2"]);
        assert_eq!(updated.name, "Smith");
        assert_eq!(updated.version, 2);
        assert!(!updated.data.contains_key("members"));
    }

    #[test]
    fn test_add_member_rejects_existing_member() {
        let mut group = Entity::new(
            "G1",
            EntityKind::Group,
            json!({"name": "Doe"}).as_object().unwrap().clone(),
            ts(),
        );
        group.member_guids = vec!["P2".to_string()];

        let form = form(
            event_types::ADD_MEMBER,
            "G1",
            json!({"members": [{"guid": "P2", "name": "Jane"}]}),
        );
        assert!(AddMember
            .apply(Some(&group), &form, &PrefetchedEntities::default())
            .is_err());
    }

    #[test]
    fn test_remove_member_tombstones_entity() {
        let mut group = Entity::new(
            "G1",
            EntityKind::Group,
            json!({"name": "Doe"}).as_object().unwrap().clone(),
            ts(),
        );
        group.member_guids = vec!["P4".to_string()];
        let member = Entity::new(
            "P4",
            EntityKind::Individual,
            json!({"name": "Ann"}).as_object().unwrap().clone(),
            ts(),
        );

        let form = form(event_types::REMOVE_MEMBER, "G1", json!({"memberId": "P4"}));
        let result = RemoveMember
            .apply(Some(&group), &form, &lookup(vec![member]))
            .unwrap();

        assert_eq!(result.changes.len(), 2);
        assert!(result.changes[0].modified.member_guids.is_empty());
        assert_eq!(result.changes[0].modified.version, 2);
        assert!(result.changes[1].modified.deleted);
    }

    #[test]
    fn test_resolve_duplicate_with_delete() {
        let keeper = Entity::new(
            "P6",
            EntityKind::Individual,
            json!({"name": "John Doe"}).as_object().unwrap().clone(),
            ts(),
        );
        let duplicate = Entity::new(
            "P5",
            EntityKind::Individual,
            json!({"name": "John Doe"}).as_object().unwrap().clone(),
            ts(),
        );

        let form = form(
            event_types::RESOLVE_DUPLICATE,
            "P6",
            json!({
                "duplicates": [{"entityGuid": "P6", "duplicateGuid": "P5"}],
                "shouldDelete": true,
            }),
        );
        let result = ResolveDuplicate
            .apply(Some(&keeper), &form, &lookup(vec![duplicate]))
            .unwrap();

        assert_eq!(result.resolved_pairs, vec![("P6".into(), "P5".into())]);
        assert_eq!(result.changes[0].modified.guid, "P6");
        assert_eq!(result.changes[0].modified.version, 2);
        assert!(result.changes[1].modified.deleted);
    }

    #[test]
    fn test_apply_is_deterministic() {
        let form = form(
            event_types::CREATE_GROUP,
            "G1",
            json!({"name": "Doe", "members": [{"guid": "P2", "name": "Jane"}]}),
        );
        let a = CreateGroup
            .apply(None, &form, &PrefetchedEntities::default())
            .unwrap();
        let b = CreateGroup
            .apply(None, &form, &PrefetchedEntities::default())
            .unwrap();
        let entities_a: Vec<&Entity> = a.changes.iter().map(|c| &c.modified).collect();
        let entities_b: Vec<&Entity> = b.changes.iter().map(|c| &c.modified).collect();
        assert_eq!(entities_a, entities_b);
    }
}
