//! A key/value pair read back from a paged entry stream, decoded lazily
//! and at most once per field.

use std::sync::OnceLock;

use serde::de::DeserializeOwned;

use crate::{error::ClientError, serializer::Serializer};

pub struct NamedCacheEntry<S: Serializer> {
    key_bytes: Vec<u8>,
    value_bytes: Vec<u8>,
    serializer: S,
}

impl<S: Serializer> NamedCacheEntry<S> {
    pub(crate) fn new(key_bytes: Vec<u8>, value_bytes: Vec<u8>, serializer: S) -> Self {
        Self {
            key_bytes,
            value_bytes,
            serializer,
        }
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    pub fn value_bytes(&self) -> &[u8] {
        &self.value_bytes
    }

    pub fn key<K: DeserializeOwned>(&self) -> Result<K, ClientError> {
        self.serializer.deserialize(&self.key_bytes)
    }

    pub fn value<V: DeserializeOwned>(&self) -> Result<V, ClientError> {
        self.serializer.deserialize(&self.value_bytes)
    }
}

/// Caches one deserialized value of type `T` for an entry accessed
/// repeatedly through the same concrete type. Entries are usually
/// consumed once, so this is only worth reaching for when a caller loops
/// over the same typed accessor more than once.
pub struct CachedEntry<S: Serializer, K, V> {
    entry: NamedCacheEntry<S>,
    key: OnceLock<K>,
    value: OnceLock<V>,
}

impl<S: Serializer, K: DeserializeOwned + Clone, V: DeserializeOwned + Clone> CachedEntry<S, K, V> {
    pub fn new(entry: NamedCacheEntry<S>) -> Self {
        Self {
            entry,
            key: OnceLock::new(),
            value: OnceLock::new(),
        }
    }

    pub fn key(&self) -> Result<&K, ClientError> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let key = self.entry.key::<K>()?;
        Ok(self.key.get_or_init(|| key))
    }

    pub fn value(&self) -> Result<&V, ClientError> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let value = self.entry.value::<V>()?;
        Ok(self.value.get_or_init(|| value))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serializer::JsonSerializer;

    #[test]
    fn decodes_key_and_value_independently() {
        let entry = NamedCacheEntry::new(
            serde_json::to_vec("k1").unwrap(),
            serde_json::to_vec(&42u32).unwrap(),
            JsonSerializer,
        );
        assert_eq!(entry.key::<String>().unwrap(), "k1");
        assert_eq!(entry.value::<u32>().unwrap(), 42);
    }

    #[test]
    fn cached_entry_reuses_decoded_value() {
        let entry = NamedCacheEntry::new(
            serde_json::to_vec("k1").unwrap(),
            serde_json::to_vec(&42u32).unwrap(),
            JsonSerializer,
        );
        let cached: CachedEntry<JsonSerializer, String, u32> = CachedEntry::new(entry);
        assert_eq!(cached.value().unwrap(), &42);
        assert_eq!(cached.value().unwrap(), &42);
        assert_eq!(cached.key().unwrap(), "k1");
    }
}
