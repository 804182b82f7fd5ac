//! The facade applications hold: a handle to one remote map, composing
//! request/response calls, the event multiplexer, and the paged set
//! views into a single typed API.

use std::{sync::Arc, time::Duration};

use named_cache_proto::named_cache_client::NamedCacheClient;
use serde::{de::DeserializeOwned, Serialize};
use tonic::transport::Channel;

use crate::{
    error::ClientError,
    events_manager::{always_filter_bytes, EventsManager, LifecycleEvent},
    listener::{ListenerId, MapListener},
    remote_set::{RemoteEntrySet, RemoteFilteredEntrySet, RemoteKeySet, RemoteValueSet},
    request_factory::RequestFactory,
    serializer::Serializer,
};

/// A handle to one named map on the server. Cheap to clone: every clone
/// shares the same underlying connection and event multiplexer.
#[derive(Clone)]
pub struct NamedMap<S: Serializer> {
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
    serializer: S,
    events: Arc<EventsManager<S>>,
}

impl<S: Serializer> NamedMap<S> {
    pub fn new(
        client: NamedCacheClient<Channel>,
        cache: impl Into<String>,
        serializer: S,
        request_timeout: Duration,
    ) -> Self {
        let cache = cache.into();
        let events = Arc::new(EventsManager::new(
            client.clone(),
            cache.clone(),
            serializer.clone(),
            request_timeout,
        ));
        Self {
            factory: RequestFactory::new(cache),
            client,
            serializer,
            events,
        }
    }

    pub fn name(&self) -> &str {
        self.factory.cache_name()
    }

    fn check_open(&self) -> Result<(), ClientError> {
        if self.events.is_destroyed() {
            return Err(ClientError::PreconditionFailure(format!(
                "map {} has been destroyed",
                self.factory.cache_name()
            )));
        }
        Ok(())
    }

    /// Notifications about the map's own lifecycle (destroyed/truncated),
    /// as opposed to entry-level `MapEvent`s.
    pub fn subscribe_lifecycle(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe_lifecycle()
    }

    // -- single-entry operations ----------------------------------------

    pub async fn get<K: Serialize, V: DeserializeOwned>(
        &self,
        key: &K,
    ) -> Result<Option<V>, ClientError> {
        self.check_open()?;
        let key_bytes = self.serializer.serialize(key)?;
        let response = self
            .client
            .clone()
            .get(self.factory.get(key_bytes))
            .await?
            .into_inner();
        if !response.present {
            return Ok(None);
        }
        Ok(Some(self.serializer.deserialize(&response.value)?))
    }

    pub async fn put<K: Serialize, V: Serialize>(
        &self,
        key: &K,
        value: &V,
    ) -> Result<(), ClientError> {
        self.check_open()?;
        let key_bytes = self.serializer.serialize(key)?;
        let value_bytes = self.serializer.serialize(value)?;
        self.client
            .clone()
            .put(self.factory.put(key_bytes, value_bytes))
            .await?;
        Ok(())
    }

    pub async fn remove<K: Serialize, V: DeserializeOwned>(
        &self,
        key: &K,
    ) -> Result<Option<V>, ClientError> {
        self.check_open()?;
        let key_bytes = self.serializer.serialize(key)?;
        let response = self
            .client
            .clone()
            .remove(self.factory.remove(key_bytes))
            .await?
            .into_inner();
        if !response.had_previous {
            return Ok(None);
        }
        Ok(Some(self.serializer.deserialize(&response.previous_value)?))
    }

    pub async fn remove_mapping<K: Serialize, V: Serialize>(
        &self,
        key: &K,
        value: &V,
    ) -> Result<bool, ClientError> {
        self.check_open()?;
        let key_bytes = self.serializer.serialize(key)?;
        let value_bytes = self.serializer.serialize(value)?;
        let response = self
            .client
            .clone()
            .remove_mapping(self.factory.remove_mapping(key_bytes, value_bytes))
            .await?
            .into_inner();
        Ok(response.removed)
    }

    pub async fn contains_key<K: Serialize>(&self, key: &K) -> Result<bool, ClientError> {
        self.check_open()?;
        let key_bytes = self.serializer.serialize(key)?;
        let response = self
            .client
            .clone()
            .contains_key(self.factory.contains_key(key_bytes))
            .await?
            .into_inner();
        Ok(response.present)
    }

    pub async fn size(&self) -> Result<u64, ClientError> {
        self.check_open()?;
        let response = self.client.clone().size(self.factory.size()).await?.into_inner();
        Ok(response.size)
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        self.check_open()?;
        self.client.clone().clear(self.factory.clear()).await?;
        Ok(())
    }

    pub async fn truncate(&self) -> Result<(), ClientError> {
        self.check_open()?;
        self.client.clone().truncate(self.factory.truncate()).await?;
        Ok(())
    }

    pub async fn destroy(&self) -> Result<(), ClientError> {
        self.check_open()?;
        self.client.clone().destroy(self.factory.destroy()).await?;
        self.events.close().await;
        Ok(())
    }

    pub async fn invoke<K: Serialize, R: DeserializeOwned>(
        &self,
        key: &K,
        processor: Vec<u8>,
    ) -> Result<R, ClientError> {
        self.check_open()?;
        let key_bytes = self.serializer.serialize(key)?;
        let response = self
            .client
            .clone()
            .invoke(self.factory.invoke(key_bytes, processor))
            .await?
            .into_inner();
        self.serializer.deserialize(&response.result)
    }

    pub async fn invoke_all(
        &self,
        filter: Option<Vec<u8>>,
        processor: Vec<u8>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ClientError> {
        self.check_open()?;
        let filter = filter.unwrap_or_else(always_filter_bytes);
        let response = self
            .client
            .clone()
            .invoke_all(self.factory.invoke_all(filter, processor))
            .await?
            .into_inner();
        Ok(response
            .results
            .into_iter()
            .map(|result| (result.key, result.result))
            .collect())
    }

    pub async fn aggregate<R: DeserializeOwned>(
        &self,
        filter: Option<Vec<u8>>,
        aggregator: Vec<u8>,
    ) -> Result<R, ClientError> {
        self.check_open()?;
        let filter = filter.unwrap_or_else(always_filter_bytes);
        let response = self
            .client
            .clone()
            .aggregate(self.factory.aggregate(filter, aggregator))
            .await?
            .into_inner();
        self.serializer.deserialize(&response.result)
    }

    // -- listeners ---------------------------------------------------------

    pub async fn add_listener_for_key<K: Serialize>(
        &self,
        key: &K,
        listener: MapListener<S>,
        lite: bool,
    ) -> Result<ListenerId, ClientError> {
        self.check_open()?;
        let id = listener.id();
        let key_bytes = self.serializer.serialize(key)?;
        self.events.register_key_listener(key_bytes, listener, lite).await?;
        Ok(id)
    }

    pub async fn remove_listener_for_key<K: Serialize>(
        &self,
        key: &K,
        listener_id: ListenerId,
    ) -> Result<(), ClientError> {
        let key_bytes = self.serializer.serialize(key)?;
        self.events.remove_key_listener(key_bytes, listener_id).await
    }

    /// `filter` is `None` for the always-matching predicate (every entry
    /// in the map).
    pub async fn add_listener_for_filter(
        &self,
        filter: Option<Vec<u8>>,
        listener: MapListener<S>,
        lite: bool,
    ) -> Result<ListenerId, ClientError> {
        self.check_open()?;
        let id = listener.id();
        self.events.register_filter_listener(filter, listener, lite).await?;
        Ok(id)
    }

    pub async fn remove_listener_for_filter(
        &self,
        filter: Option<Vec<u8>>,
        listener_id: ListenerId,
    ) -> Result<(), ClientError> {
        self.events.remove_filter_listener(filter, listener_id).await
    }

    // -- set views -----------------------------------------------------------

    pub fn key_set(&self) -> RemoteKeySet<S> {
        RemoteKeySet::new(self.client.clone(), self.factory.clone(), self.serializer.clone())
    }

    pub fn entry_set(&self) -> RemoteEntrySet<S> {
        RemoteEntrySet::new(self.client.clone(), self.factory.clone(), self.serializer.clone())
    }

    pub fn values(&self) -> RemoteValueSet<S> {
        RemoteValueSet::new(
            self.client.clone(),
            self.factory.clone(),
            always_filter_bytes(),
            self.serializer.clone(),
        )
    }

    pub fn entries_matching(&self, filter: Vec<u8>) -> RemoteFilteredEntrySet<S> {
        RemoteFilteredEntrySet::new(
            self.client.clone(),
            self.factory.clone(),
            filter,
            self.serializer.clone(),
        )
    }
}
