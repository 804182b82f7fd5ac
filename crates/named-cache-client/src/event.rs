use named_cache_proto as proto;
use serde::de::DeserializeOwned;

use crate::{error::ClientError, serializer::Serializer};

/// The kind of change a `MapEvent` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Inserted,
    Updated,
    Deleted,
}

impl EventKind {
    fn from_proto(id: i32) -> Self {
        match proto::EventId::try_from(id).unwrap_or(proto::EventId::Inserted) {
            proto::EventId::Inserted => EventKind::Inserted,
            proto::EventId::Updated => EventKind::Updated,
            proto::EventId::Deleted => EventKind::Deleted,
        }
    }
}

/// An immutable event bound to the map it was raised on, the serializer
/// used to decode it, and the raw payload the server sent.
/// Old/new value bytes are empty when the owning listener group is
/// registered `lite`.
#[derive(Debug, Clone)]
pub struct MapEvent<S: Serializer> {
    pub cache: String,
    pub kind: EventKind,
    pub filter_ids: Vec<i32>,
    pub synthetic: bool,
    key_bytes: Vec<u8>,
    old_value_bytes: Vec<u8>,
    new_value_bytes: Vec<u8>,
    serializer: S,
}

impl<S: Serializer> MapEvent<S> {
    pub(crate) fn from_proto(cache: String, message: proto::MapEventMessage, serializer: S) -> Self {
        Self {
            cache,
            kind: EventKind::from_proto(message.id),
            filter_ids: message.filter_ids,
            synthetic: message.synthetic,
            key_bytes: message.key,
            old_value_bytes: message.old_value,
            new_value_bytes: message.new_value,
            serializer,
        }
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    pub fn key<K: DeserializeOwned>(&self) -> Result<K, ClientError> {
        self.serializer.deserialize(&self.key_bytes)
    }

    /// `None` when the owning listener group was negotiated as `lite` or
    /// when this is an INSERTED event (there is no prior value).
    pub fn old_value<V: DeserializeOwned>(&self) -> Result<Option<V>, ClientError> {
        if self.old_value_bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.serializer.deserialize(&self.old_value_bytes)?))
    }

    /// `None` when the owning listener group was negotiated as `lite` or
    /// when this is a DELETED event (there is no new value).
    pub fn new_value<V: DeserializeOwned>(&self) -> Result<Option<V>, ClientError> {
        if self.new_value_bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.serializer.deserialize(&self.new_value_bytes)?))
    }
}
