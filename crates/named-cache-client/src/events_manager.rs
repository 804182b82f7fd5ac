//! Owns the bidirectional `Events` stream and multiplexes every key- and
//! filter-based listener registration for one cache across it.
//!
//! The stream itself is created lazily, the first time a listener is
//! registered, and is shared by every subsequent registration: one duplex
//! stream per cache, however many local listeners are attached to it.
//! `ListenerGroup` decides *whether* a wire action is needed; this module
//! is the only thing that actually writes to the stream and reads
//! `ListenerResponse`s off of it, so it owns the sequencing and bookkeeping
//! those decisions depend on.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use named_cache_proto::{self as proto, named_cache_client::NamedCacheClient};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::transport::Channel;

use crate::{
    error::ClientError,
    event::MapEvent,
    listener::{ListenerId, MapListener},
    listener_group::{AddAction, GroupTarget, ListenerGroup, RemoveAction},
    request_factory::RequestFactory,
    serializer::{fingerprint, Serializer},
};

/// Canonical "always matches" filter used when a listener is registered
/// with no explicit filter. A real filter catalog is out of this crate's
/// scope, so this is the one filter expression the client understands.
pub fn always_filter_bytes() -> Vec<u8> {
    b"ALWAYS".to_vec()
}

/// A lifecycle notification about the map itself, as opposed to an entry
/// within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Destroyed,
    Truncated,
}

struct PendingAck {
    tx: oneshot::Sender<Result<(), ClientError>>,
}

struct Inner<S: Serializer> {
    key_groups: HashMap<String, ListenerGroup<S>>,
    filter_groups: HashMap<Vec<u8>, ListenerGroup<S>>,
    filter_id_index: HashMap<i32, Vec<u8>>,
    pending_acks: HashMap<String, PendingAck>,
    closing: bool,
}

impl<S: Serializer> Inner<S> {
    fn new() -> Self {
        Self {
            key_groups: HashMap::new(),
            filter_groups: HashMap::new(),
            filter_id_index: HashMap::new(),
            pending_acks: HashMap::new(),
            closing: false,
        }
    }

    fn resolve_ack(&mut self, uid: &str, result: Result<(), ClientError>) {
        if let Some(pending) = self.pending_acks.remove(uid) {
            let _ = pending.tx.send(result);
        }
    }

    fn drain_pending_acks_with(&mut self, mut make_error: impl FnMut() -> ClientError) {
        for (_, pending) in self.pending_acks.drain() {
            let _ = pending.tx.send(Err(make_error()));
        }
    }
}

struct StreamHandle {
    outbound: mpsc::UnboundedSender<proto::ListenerRequest>,
}

/// Multiplexes listener registrations for a single named cache over one
/// `Events` duplex stream.
pub struct EventsManager<S: Serializer> {
    cache: String,
    client: NamedCacheClient<Channel>,
    factory: RequestFactory,
    serializer: S,
    request_timeout: Duration,
    next_filter_id: AtomicI32,
    inner: Arc<Mutex<Inner<S>>>,
    stream: tokio::sync::OnceCell<StreamHandle>,
    lifecycle_tx: tokio::sync::broadcast::Sender<LifecycleEvent>,
    destroyed: Arc<std::sync::atomic::AtomicBool>,
    reader_exit: Mutex<Option<oneshot::Sender<()>>>,
}

impl<S: Serializer> EventsManager<S> {
    pub fn new(
        client: NamedCacheClient<Channel>,
        cache: impl Into<String>,
        serializer: S,
        request_timeout: Duration,
    ) -> Self {
        let cache = cache.into();
        let (lifecycle_tx, _) = tokio::sync::broadcast::channel(16);
        Self {
            factory: RequestFactory::new(cache.clone()),
            cache,
            client,
            serializer,
            request_timeout,
            next_filter_id: AtomicI32::new(1),
            inner: Arc::new(Mutex::new(Inner::new())),
            stream: tokio::sync::OnceCell::new(),
            lifecycle_tx,
            destroyed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            reader_exit: Mutex::new(None),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn subscribe_lifecycle(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Creates the duplex stream on first use and blocks until the INIT
    /// handshake is acked. Concurrent callers observe exactly one stream
    /// and one INIT round-trip.
    async fn ensure_stream(&self) -> Result<&StreamHandle, ClientError> {
        self.stream
            .get_or_try_init(|| async {
                if self.inner.lock().await.closing {
                    return Err(ClientError::Cancelled);
                }

                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<proto::ListenerRequest>();
                let mut client = self.client.clone();
                let response = client
                    .events(tonic::Request::new(UnboundedReceiverStream::new(outbound_rx)))
                    .await?;
                let inbound = response.into_inner();

                let (exit_tx, exit_rx) = oneshot::channel();
                *self.reader_exit.lock().await = Some(exit_tx);

                let reader = ReaderTask {
                    inbound,
                    exit_rx,
                    inner: self.inner.clone(),
                    cache: self.cache.clone(),
                    serializer: self.serializer.clone(),
                    lifecycle_tx: self.lifecycle_tx.clone(),
                    destroyed: self.destroyed.clone(),
                };
                tokio::spawn(reader.run());

                let (uid, init_request) = self.factory.init();
                let (ack_tx, ack_rx) = oneshot::channel();
                self.inner
                    .lock()
                    .await
                    .pending_acks
                    .insert(uid.as_str().to_string(), PendingAck { tx: ack_tx });

                outbound_tx
                    .send(init_request)
                    .map_err(|_| ClientError::TransportFailure("events stream closed before INIT".into()))?;

                await_ack(self.request_timeout, ack_rx, self.inner.clone(), uid.as_str()).await?;

                Ok(StreamHandle {
                    outbound: outbound_tx,
                })
            })
            .await
    }

    async fn send_listener_request(
        &self,
        uid: crate::correlation::CorrelationId,
        request: proto::ListenerRequest,
    ) -> Result<(), ClientError> {
        let stream = self.ensure_stream().await?;
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            if inner.closing {
                return Err(ClientError::Cancelled);
            }
            inner
                .pending_acks
                .insert(uid.as_str().to_string(), PendingAck { tx: ack_tx });
        }
        stream
            .outbound
            .send(request)
            .map_err(|_| ClientError::TransportFailure("events stream closed".into()))?;
        await_ack(self.request_timeout, ack_rx, self.inner.clone(), uid.as_str()).await
    }

    pub async fn register_key_listener(
        &self,
        key_bytes: Vec<u8>,
        listener: MapListener<S>,
        lite: bool,
    ) -> Result<(), ClientError> {
        let fp = fingerprint(&key_bytes);
        let action = {
            let mut inner = self.inner.lock().await;
            let group = inner
                .key_groups
                .entry(fp.clone())
                .or_insert_with(|| ListenerGroup::new(GroupTarget::key(fp.clone(), key_bytes.clone())));
            group.add_listener(listener, lite)
        };
        self.apply_key_add(fp, key_bytes, action).await
    }

    pub async fn remove_key_listener(
        &self,
        key_bytes: Vec<u8>,
        listener_id: ListenerId,
    ) -> Result<(), ClientError> {
        let fp = fingerprint(&key_bytes);
        let action = {
            let mut inner = self.inner.lock().await;
            match inner.key_groups.get_mut(&fp) {
                Some(group) => group.remove_listener(listener_id),
                None => RemoveAction::NoOp,
            }
        };
        self.apply_key_remove(fp, key_bytes, action).await
    }

    async fn apply_key_add(
        &self,
        fp: String,
        key_bytes: Vec<u8>,
        action: AddAction,
    ) -> Result<(), ClientError> {
        match action {
            AddAction::NoOp => Ok(()),
            AddAction::Subscribe { lite } => {
                let (uid, request) = self.factory.subscribe_key(key_bytes, lite);
                self.send_listener_request(uid, request).await?;
                let mut inner = self.inner.lock().await;
                if let Some(group) = inner.key_groups.get_mut(&fp) {
                    group.confirm_registered_lite(lite);
                }
                Ok(())
            }
            AddAction::Resubscribe { new_lite } => {
                let (uid, request) = self.factory.unsubscribe_key(key_bytes.clone());
                self.send_listener_request(uid, request).await?;
                let (uid, request) = self.factory.subscribe_key(key_bytes, new_lite);
                self.send_listener_request(uid, request).await?;
                let mut inner = self.inner.lock().await;
                if let Some(group) = inner.key_groups.get_mut(&fp) {
                    group.confirm_registered_lite(new_lite);
                }
                Ok(())
            }
        }
    }

    async fn apply_key_remove(
        &self,
        fp: String,
        key_bytes: Vec<u8>,
        action: RemoveAction,
    ) -> Result<(), ClientError> {
        match action {
            RemoveAction::NoOp => Ok(()),
            RemoveAction::UnsubscribeAndDrop => {
                let (uid, request) = self.factory.unsubscribe_key(key_bytes);
                self.send_listener_request(uid, request).await?;
                self.inner.lock().await.key_groups.remove(&fp);
                Ok(())
            }
            RemoveAction::Downgrade => {
                let (uid, request) = self.factory.unsubscribe_key(key_bytes.clone());
                self.send_listener_request(uid, request).await?;
                let (uid, request) = self.factory.subscribe_key(key_bytes, true);
                self.send_listener_request(uid, request).await?;
                let mut inner = self.inner.lock().await;
                if let Some(group) = inner.key_groups.get_mut(&fp) {
                    group.confirm_registered_lite(true);
                }
                Ok(())
            }
        }
    }

    pub async fn register_filter_listener(
        &self,
        filter_bytes: Option<Vec<u8>>,
        listener: MapListener<S>,
        lite: bool,
    ) -> Result<(), ClientError> {
        let filter_bytes = filter_bytes.unwrap_or_else(always_filter_bytes);
        let identity = filter_bytes.clone();
        let (action, filter_id, newly_created) = {
            let mut inner = self.inner.lock().await;
            let newly_created = !inner.filter_groups.contains_key(&identity);
            let filter_id = if newly_created {
                self.next_filter_id.fetch_add(1, Ordering::Relaxed)
            } else {
                match inner.filter_groups.get(&identity).map(|g| g.target()) {
                    Some(GroupTarget::Filter {
                        server_filter_id: Some(id),
                        ..
                    }) => *id,
                    _ => self.next_filter_id.fetch_add(1, Ordering::Relaxed),
                }
            };
            let group = inner
                .filter_groups
                .entry(identity.clone())
                .or_insert_with(|| {
                    let mut group = ListenerGroup::new(GroupTarget::filter(filter_bytes.clone()));
                    group.set_server_filter_id(filter_id);
                    group
                });
            let action = group.add_listener(listener, lite);
            (action, filter_id, newly_created)
        };

        if newly_created {
            self.inner
                .lock()
                .await
                .filter_id_index
                .insert(filter_id, identity.clone());
        }

        self.apply_filter_add(identity, filter_bytes, filter_id, action)
            .await
    }

    pub async fn remove_filter_listener(
        &self,
        filter_bytes: Option<Vec<u8>>,
        listener_id: ListenerId,
    ) -> Result<(), ClientError> {
        let filter_bytes = filter_bytes.unwrap_or_else(always_filter_bytes);
        let identity = filter_bytes.clone();
        let (action, filter_id) = {
            let mut inner = self.inner.lock().await;
            match inner.filter_groups.get_mut(&identity) {
                Some(group) => {
                    let filter_id = match group.target() {
                        GroupTarget::Filter {
                            server_filter_id: Some(id),
                            ..
                        } => *id,
                        _ => 0,
                    };
                    (group.remove_listener(listener_id), filter_id)
                }
                None => (RemoveAction::NoOp, 0),
            }
        };
        self.apply_filter_remove(identity, filter_bytes, filter_id, action)
            .await
    }

    async fn apply_filter_add(
        &self,
        identity: Vec<u8>,
        filter_bytes: Vec<u8>,
        filter_id: i32,
        action: AddAction,
    ) -> Result<(), ClientError> {
        match action {
            AddAction::NoOp => Ok(()),
            AddAction::Subscribe { lite } => {
                let (uid, request) = self.factory.subscribe_filter(filter_bytes, filter_id, lite);
                self.send_listener_request(uid, request).await?;
                let mut inner = self.inner.lock().await;
                if let Some(group) = inner.filter_groups.get_mut(&identity) {
                    group.confirm_registered_lite(lite);
                }
                Ok(())
            }
            AddAction::Resubscribe { new_lite } => {
                let (uid, request) = self
                    .factory
                    .unsubscribe_filter(filter_bytes.clone(), filter_id);
                self.send_listener_request(uid, request).await?;
                let (uid, request) = self
                    .factory
                    .subscribe_filter(filter_bytes, filter_id, new_lite);
                self.send_listener_request(uid, request).await?;
                let mut inner = self.inner.lock().await;
                if let Some(group) = inner.filter_groups.get_mut(&identity) {
                    group.confirm_registered_lite(new_lite);
                }
                Ok(())
            }
        }
    }

    async fn apply_filter_remove(
        &self,
        identity: Vec<u8>,
        filter_bytes: Vec<u8>,
        filter_id: i32,
        action: RemoveAction,
    ) -> Result<(), ClientError> {
        match action {
            RemoveAction::NoOp => Ok(()),
            RemoveAction::UnsubscribeAndDrop => {
                let (uid, request) = self.factory.unsubscribe_filter(filter_bytes, filter_id);
                self.send_listener_request(uid, request).await?;
                let mut inner = self.inner.lock().await;
                inner.filter_groups.remove(&identity);
                inner.filter_id_index.remove(&filter_id);
                Ok(())
            }
            RemoveAction::Downgrade => {
                let (uid, request) = self
                    .factory
                    .unsubscribe_filter(filter_bytes.clone(), filter_id);
                self.send_listener_request(uid, request).await?;
                let (uid, request) = self.factory.subscribe_filter(filter_bytes, filter_id, true);
                self.send_listener_request(uid, request).await?;
                let mut inner = self.inner.lock().await;
                if let Some(group) = inner.filter_groups.get_mut(&identity) {
                    group.confirm_registered_lite(true);
                }
                Ok(())
            }
        }
    }

    /// Cancels the duplex stream and rejects any acks still in flight.
    /// Idempotent: closing twice is a no-op.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closing {
            return;
        }
        inner.closing = true;
        inner.drain_pending_acks_with(|| ClientError::Cancelled);
        drop(inner);

        if let Some(exit_tx) = self.reader_exit.lock().await.take() {
            let _ = exit_tx.send(());
        }
    }
}

async fn await_ack<S: Serializer>(
    timeout: Duration,
    rx: oneshot::Receiver<Result<(), ClientError>>,
    inner: Arc<Mutex<Inner<S>>>,
    uid: &str,
) -> Result<(), ClientError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_recv_dropped)) => Err(ClientError::Cancelled),
        Err(_elapsed) => {
            inner.lock().await.pending_acks.remove(uid);
            Err(ClientError::Timeout)
        }
    }
}

struct ReaderTask<S: Serializer> {
    inbound: tonic::Streaming<proto::ListenerResponse>,
    exit_rx: oneshot::Receiver<()>,
    inner: Arc<Mutex<Inner<S>>>,
    cache: String,
    serializer: S,
    lifecycle_tx: tokio::sync::broadcast::Sender<LifecycleEvent>,
    destroyed: Arc<std::sync::atomic::AtomicBool>,
}

impl<S: Serializer> ReaderTask<S> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = &mut self.exit_rx => {
                    tracing::debug!(cache = %self.cache, "events stream closed");
                    return;
                }
                message = self.inbound.next() => match message {
                    Some(Ok(response)) => self.handle(response).await,
                    Some(Err(status)) => {
                        tracing::warn!(cache = %self.cache, %status, "events stream error");
                        let mut inner = self.inner.lock().await;
                        if !inner.closing {
                            let message = ClientError::from(status).to_string();
                            inner.drain_pending_acks_with(|| {
                                ClientError::TransportFailure(message.clone())
                            });
                        }
                    }
                    None => {
                        tracing::debug!(cache = %self.cache, "events stream ended");
                        let mut inner = self.inner.lock().await;
                        if !inner.closing {
                            inner.drain_pending_acks_with(|| {
                                ClientError::TransportFailure(
                                    "events stream ended unexpectedly".into(),
                                )
                            });
                        }
                        return;
                    }
                }
            }
        }
    }

    async fn handle(&self, response: proto::ListenerResponse) {
        use proto::listener_response::Response::*;
        match response.response {
            Some(Subscribed(body)) => {
                self.inner.lock().await.resolve_ack(&body.uid, Ok(()));
            }
            Some(Unsubscribed(body)) => {
                self.inner.lock().await.resolve_ack(&body.uid, Ok(()));
            }
            Some(Destroyed(body)) => {
                if body.cache == self.cache {
                    self.destroyed.store(true, Ordering::Release);
                    let _ = self.lifecycle_tx.send(LifecycleEvent::Destroyed);
                }
            }
            Some(Truncated(body)) => {
                if body.cache == self.cache {
                    let _ = self.lifecycle_tx.send(LifecycleEvent::Truncated);
                }
            }
            Some(Event(message)) => self.dispatch_event(message).await,
            None => {}
        }
    }

    async fn dispatch_event(&self, message: proto::MapEventMessage) {
        let key_bytes = message.key.clone();
        let filter_ids = message.filter_ids.clone();
        let event = MapEvent::from_proto(self.cache.clone(), message, self.serializer.clone());

        let inner = self.inner.lock().await;
        let fp = fingerprint(&key_bytes);
        if let Some(group) = inner.key_groups.get(&fp) {
            group.notify(&event);
        }
        for filter_id in &filter_ids {
            if let Some(identity) = inner.filter_id_index.get(filter_id) {
                if let Some(group) = inner.filter_groups.get(identity) {
                    group.notify(&event);
                }
            }
        }
    }
}
