//! Test-only helpers shared across unit tests in this crate.
#![cfg(test)]

use named_cache_proto as proto;

use crate::{event::MapEvent, serializer::Serializer};

pub fn insert_event_for_test<S: Serializer + Default>() -> MapEvent<S> {
    MapEvent::from_proto(
        "test-cache".to_string(),
        proto::MapEventMessage {
            cache: "test-cache".to_string(),
            key: b"k1".to_vec(),
            old_value: Vec::new(),
            new_value: b"\"v1\"".to_vec(),
            id: proto::EventId::Inserted as i32,
            filter_ids: Vec::new(),
            synthetic: false,
        },
        S::default(),
    )
}
