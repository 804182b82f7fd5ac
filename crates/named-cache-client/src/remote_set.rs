//! Paged views over a cache's full key set, entry set, and value set.
//!
//! Each view streams from the server one page at a time through a
//! [`PageAdvancer`]; none of them materialize the whole collection
//! locally. They only support the async, server-driven iteration this
//! crate can actually back with a real RPC: synchronous iteration,
//! membership tests, and mutation through the view itself are not
//! supported and return [`ClientError::UnsupportedOperation`].

use async_trait::async_trait;
use named_cache_proto::{self as proto, named_cache_client::NamedCacheClient};
use tonic::transport::Channel;

use crate::{
    cookie::Cookie,
    entry::NamedCacheEntry,
    error::ClientError,
    page_advancer::{PageAdvancer, PageHelper},
    request_factory::RequestFactory,
    serializer::Serializer,
};

fn unexpected_envelope(what: &str) -> ClientError {
    ClientError::Protocol(format!("paged response stream did not start with a {what} cookie"))
}

struct KeySetHelper {
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
}

#[async_trait]
impl PageHelper for KeySetHelper {
    type Raw = Vec<u8>;

    async fn load_page(&self, cookie: Cookie) -> Result<(Cookie, Vec<Vec<u8>>), ClientError> {
        let request = self.factory.next_key_page(cookie.into_bytes());
        let mut stream = self
            .client
            .clone()
            .next_key_set_page(request)
            .await?
            .into_inner();

        let first = stream.message().await?.ok_or_else(|| unexpected_envelope("key"))?;
        let next_cookie = match first.part {
            Some(proto::key_page_response::Part::Cookie(bytes)) => Cookie::from_bytes(bytes),
            _ => return Err(unexpected_envelope("key")),
        };

        let mut keys = Vec::new();
        while let Some(message) = stream.message().await? {
            match message.part {
                Some(proto::key_page_response::Part::Key(key)) => keys.push(key),
                _ => return Err(ClientError::Protocol("second cookie in a key page".into())),
            }
        }
        Ok((next_cookie, keys))
    }
}

struct EntrySetHelper {
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
}

#[async_trait]
impl PageHelper for EntrySetHelper {
    type Raw = (Vec<u8>, Vec<u8>);

    async fn load_page(&self, cookie: Cookie) -> Result<(Cookie, Vec<(Vec<u8>, Vec<u8>)>), ClientError> {
        let request = self.factory.next_entry_page(cookie.into_bytes());
        let mut stream = self
            .client
            .clone()
            .next_entry_set_page(request)
            .await?
            .into_inner();
        read_entry_page(&mut stream).await
    }
}

struct ValuesHelper {
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
    filter: Vec<u8>,
}

#[async_trait]
impl PageHelper for ValuesHelper {
    type Raw = (Vec<u8>, Vec<u8>);

    async fn load_page(&self, cookie: Cookie) -> Result<(Cookie, Vec<(Vec<u8>, Vec<u8>)>), ClientError> {
        let request = self.factory.values(self.filter.clone(), cookie.into_bytes());
        let mut stream = self.client.clone().values(request).await?.into_inner();
        read_entry_page(&mut stream).await
    }
}

struct EntriesHelper {
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
    filter: Vec<u8>,
}

#[async_trait]
impl PageHelper for EntriesHelper {
    type Raw = (Vec<u8>, Vec<u8>);

    async fn load_page(&self, cookie: Cookie) -> Result<(Cookie, Vec<(Vec<u8>, Vec<u8>)>), ClientError> {
        let request = self.factory.entries(self.filter.clone(), cookie.into_bytes());
        let mut stream = self.client.clone().entries(request).await?.into_inner();
        read_entry_page(&mut stream).await
    }
}

async fn read_entry_page(
    stream: &mut tonic::Streaming<proto::EntryPageResponse>,
) -> Result<(Cookie, Vec<(Vec<u8>, Vec<u8>)>), ClientError> {
    let first = stream.message().await?.ok_or_else(|| unexpected_envelope("entry"))?;
    let next_cookie = match first.part {
        Some(proto::entry_page_response::Part::Cookie(bytes)) => Cookie::from_bytes(bytes),
        _ => return Err(unexpected_envelope("entry")),
    };

    let mut entries = Vec::new();
    while let Some(message) = stream.message().await? {
        match message.part {
            Some(proto::entry_page_response::Part::Entry(entry)) => {
                entries.push((entry.key, entry.value))
            }
            _ => return Err(ClientError::Protocol("second cookie in an entry page".into())),
        }
    }
    Ok((next_cookie, entries))
}

/// A lazily-paged view over every key in a map.
pub struct RemoteKeySet<S: Serializer> {
    advancer: PageAdvancer<KeySetHelper>,
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
    serializer: S,
}

impl<S: Serializer> RemoteKeySet<S> {
    pub(crate) fn new(client: NamedCacheClient<Channel>, factory: RequestFactory, serializer: S) -> Self {
        Self {
            advancer: PageAdvancer::new(KeySetHelper {
                client: client.clone(),
                factory: factory.clone(),
            }),
            client,
            factory,
            serializer,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        self.advancer.next().await
    }

    pub async fn next_key<K: serde::de::DeserializeOwned>(&mut self) -> Result<Option<K>, ClientError> {
        match self.advancer.next().await? {
            Some(bytes) => Ok(Some(self.serializer.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delegates to the owning map: a set view holds no entries of its own.
    pub async fn size(&self) -> Result<u64, ClientError> {
        let response = self
            .client
            .clone()
            .size(self.factory.size())
            .await?
            .into_inner();
        Ok(response.size)
    }

    /// Delegates to the owning map; affects every other view over the
    /// same cache too.
    pub async fn clear(&self) -> Result<(), ClientError> {
        self.client.clone().clear(self.factory.clear()).await?;
        Ok(())
    }

    /// Remote remove-by-key. Resolves `true` iff the server reported a
    /// prior value for `key_bytes`.
    pub async fn delete(&self, key_bytes: Vec<u8>) -> Result<bool, ClientError> {
        let response = self
            .client
            .clone()
            .remove(self.factory.remove(key_bytes))
            .await?
            .into_inner();
        Ok(response.had_previous)
    }

    /// Synchronous iteration isn't supported: every step is a potential
    /// network round-trip.
    pub fn iter(&self) -> Result<(), ClientError> {
        Err(ClientError::UnsupportedOperation("RemoteKeySet::iter"))
    }

    pub fn has(&self, _key: &[u8]) -> Result<bool, ClientError> {
        Err(ClientError::UnsupportedOperation("RemoteKeySet::has"))
    }

    pub fn add(&mut self, _key: Vec<u8>) -> Result<(), ClientError> {
        Err(ClientError::UnsupportedOperation("RemoteKeySet::add"))
    }
}

/// A lazily-paged view over every entry in a map.
pub struct RemoteEntrySet<S: Serializer> {
    advancer: PageAdvancer<EntrySetHelper>,
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
    serializer: S,
}

impl<S: Serializer> RemoteEntrySet<S> {
    pub(crate) fn new(client: NamedCacheClient<Channel>, factory: RequestFactory, serializer: S) -> Self {
        Self {
            advancer: PageAdvancer::new(EntrySetHelper {
                client: client.clone(),
                factory: factory.clone(),
            }),
            client,
            factory,
            serializer,
        }
    }

    pub async fn next(&mut self) -> Result<Option<NamedCacheEntry<S>>, ClientError> {
        match self.advancer.next().await? {
            Some((key, value)) => Ok(Some(NamedCacheEntry::new(key, value, self.serializer.clone()))),
            None => Ok(None),
        }
    }

    /// Delegates to the owning map: a set view holds no entries of its own.
    pub async fn size(&self) -> Result<u64, ClientError> {
        let response = self
            .client
            .clone()
            .size(self.factory.size())
            .await?
            .into_inner();
        Ok(response.size)
    }

    /// Delegates to the owning map; affects every other view over the
    /// same cache too.
    pub async fn clear(&self) -> Result<(), ClientError> {
        self.client.clone().clear(self.factory.clear()).await?;
        Ok(())
    }

    /// Remote conditional remove matching both key and value.
    pub async fn delete(&self, key_bytes: Vec<u8>, value_bytes: Vec<u8>) -> Result<bool, ClientError> {
        let response = self
            .client
            .clone()
            .remove_mapping(self.factory.remove_mapping(key_bytes, value_bytes))
            .await?
            .into_inner();
        Ok(response.removed)
    }

    pub fn has(&self, _key: &[u8]) -> Result<bool, ClientError> {
        Err(ClientError::UnsupportedOperation("RemoteEntrySet::has"))
    }

    pub fn add(&mut self, _entry: (Vec<u8>, Vec<u8>)) -> Result<(), ClientError> {
        Err(ClientError::UnsupportedOperation("RemoteEntrySet::add"))
    }
}

/// A lazily-paged, filter-scoped view over a map's values. `filter` is
/// `None` for the always-matching predicate (the whole map).
pub struct RemoteValueSet<S: Serializer> {
    advancer: PageAdvancer<ValuesHelper>,
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
    serializer: S,
}

impl<S: Serializer> RemoteValueSet<S> {
    pub(crate) fn new(
        client: NamedCacheClient<Channel>,
        factory: RequestFactory,
        filter: Vec<u8>,
        serializer: S,
    ) -> Self {
        Self {
            advancer: PageAdvancer::new(ValuesHelper {
                client: client.clone(),
                factory: factory.clone(),
                filter,
            }),
            client,
            factory,
            serializer,
        }
    }

    pub async fn next<V: serde::de::DeserializeOwned>(&mut self) -> Result<Option<V>, ClientError> {
        match self.advancer.next().await? {
            Some((_key, value)) => Ok(Some(self.serializer.deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Delegates to the owning map: a set view holds no entries of its own.
    pub async fn size(&self) -> Result<u64, ClientError> {
        let response = self
            .client
            .clone()
            .size(self.factory.size())
            .await?
            .into_inner();
        Ok(response.size)
    }

    /// Delegates to the owning map; affects every other view over the
    /// same cache too.
    pub async fn clear(&self) -> Result<(), ClientError> {
        self.client.clone().clear(self.factory.clear()).await?;
        Ok(())
    }

    pub fn has(&self, _value: &[u8]) -> Result<bool, ClientError> {
        Err(ClientError::UnsupportedOperation("RemoteValueSet::has"))
    }

    /// A value set has no stable key to delete by; removal must go
    /// through the map itself.
    pub fn delete(&mut self, _value: &[u8]) -> Result<bool, ClientError> {
        Err(ClientError::UnsupportedOperation("RemoteValueSet::delete"))
    }
}

/// A filter-scoped, lazily-paged view over a map's entries.
pub struct RemoteFilteredEntrySet<S: Serializer> {
    advancer: PageAdvancer<EntriesHelper>,
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
    serializer: S,
}

impl<S: Serializer> RemoteFilteredEntrySet<S> {
    pub(crate) fn new(
        client: NamedCacheClient<Channel>,
        factory: RequestFactory,
        filter: Vec<u8>,
        serializer: S,
    ) -> Self {
        Self {
            advancer: PageAdvancer::new(EntriesHelper {
                client: client.clone(),
                factory: factory.clone(),
                filter,
            }),
            client,
            factory,
            serializer,
        }
    }

    pub async fn next(&mut self) -> Result<Option<NamedCacheEntry<S>>, ClientError> {
        match self.advancer.next().await? {
            Some((key, value)) => Ok(Some(NamedCacheEntry::new(key, value, self.serializer.clone()))),
            None => Ok(None),
        }
    }

    /// Delegates to the owning map: a set view holds no entries of its own.
    pub async fn size(&self) -> Result<u64, ClientError> {
        let response = self
            .client
            .clone()
            .size(self.factory.size())
            .await?
            .into_inner();
        Ok(response.size)
    }

    /// Delegates to the owning map; affects every other view over the
    /// same cache too.
    pub async fn clear(&self) -> Result<(), ClientError> {
        self.client.clone().clear(self.factory.clear()).await?;
        Ok(())
    }

    /// Remote conditional remove matching both key and value.
    pub async fn delete(&self, key_bytes: Vec<u8>, value_bytes: Vec<u8>) -> Result<bool, ClientError> {
        let response = self
            .client
            .clone()
            .remove_mapping(self.factory.remove_mapping(key_bytes, value_bytes))
            .await?
            .into_inner();
        Ok(response.removed)
    }
}
