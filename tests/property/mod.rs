// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property test modules and pure-function properties

pub mod event_application;

use proptest::prelude::*;
use serde_json::json;

use registry_engine::domain::form::event_types;
use registry_engine::{merkle, FormSubmission, SyncLevel};

/// Strategy: a small payload map with a name and an age
pub fn payload() -> impl Strategy<Value = serde_json::Map<String, serde_json::Value>> {
    ("[A-Z][a-z]{2,8} [A-Z][a-z]{2,8}", 0u8..120).prop_map(|(name, age)| {
        let mut map = serde_json::Map::new();
        map.insert("name".to_string(), json!(name));
        map.insert("age".to_string(), json!(age));
        map
    })
}

/// Strategy: a batch of create submissions with unique guids and
/// distinct minute-granularity timestamps
pub fn create_batch(max: usize) -> impl Strategy<Value = Vec<FormSubmission>> {
    proptest::collection::vec(payload(), 1..=max).prop_map(|payloads| {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, data)| FormSubmission {
                guid: format!("form-{:03}", i),
                entity_guid: format!("entity-{:03}", i),
                event_type: event_types::CREATE_INDIVIDUAL.to_string(),
                data,
                timestamp: format!("2026-01-19T{:02}:{:02}:00Z", 8 + i / 60, i % 60)
                    .parse()
                    .unwrap(),
                user_id: "prop".to_string(),
                sync_level: SyncLevel::Local,
            })
            .collect()
    })
}

proptest! {
    /// The root is a pure function of the ordered log.
    #[test]
    fn prop_merkle_root_deterministic(events in create_batch(24)) {
        let a = merkle::root_from_events(&events).unwrap();
        let b = merkle::root_from_events(&events).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Any payload tamper moves the root.
    #[test]
    fn prop_merkle_root_tamper_sensitive(
        events in create_batch(24),
        index in any::<proptest::sample::Index>(),
    ) {
        let original = merkle::root_from_events(&events).unwrap();
        let mut tampered = events.clone();
        let i = index.index(tampered.len());
        tampered[i].data.insert("name".to_string(), json!("__tampered__"));
        let moved = merkle::root_from_events(&tampered).unwrap();
        prop_assert_ne!(original, moved);
    }

    /// The wire encoding of a sync level survives a round trip, and
    /// upgrades are exactly the non-decreasing transitions.
    #[test]
    fn prop_sync_level_roundtrip_and_order(a in 0u8..3, b in 0u8..3) {
        let left = SyncLevel::from_u8(a).unwrap();
        let right = SyncLevel::from_u8(b).unwrap();

        let encoded = serde_json::to_string(&left).unwrap();
        prop_assert_eq!(encoded, a.to_string());
        let decoded: SyncLevel = serde_json::from_str(&b.to_string()).unwrap();
        prop_assert_eq!(decoded, right);

        prop_assert_eq!(left.can_upgrade_to(right), a <= b);
    }

    /// A canonical encoding never varies between calls.
    #[test]
    fn prop_canonical_bytes_stable(events in create_batch(8)) {
        for event in &events {
            prop_assert_eq!(
                event.canonical_bytes().unwrap(),
                event.canonical_bytes().unwrap()
            );
        }
    }
}
