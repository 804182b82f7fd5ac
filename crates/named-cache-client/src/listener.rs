use std::sync::{atomic::AtomicU64, Arc};

use crate::{event::MapEvent, serializer::Serializer};

/// Identifies a registered listener for the purposes of dedup/removal.
/// Closures aren't comparable, so every [`MapListener`] is stamped with
/// one of these at construction and compared by id rather than by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }
}

type HandlerFn<S> = Arc<dyn Fn(&MapEvent<S>) + Send + Sync>;

/// A listener is a record of optional,
/// kind-specific sinks rather than a subtyped interface. Lite/full is a
/// flag carried alongside the record by the owning `ListenerGroup`, not a
/// property of the listener itself (the same listener can be registered
/// lite in one group and full in another).
#[derive(Clone)]
pub struct MapListener<S: Serializer> {
    id: ListenerId,
    on_inserted: Option<HandlerFn<S>>,
    on_updated: Option<HandlerFn<S>>,
    on_deleted: Option<HandlerFn<S>>,
}

impl<S: Serializer> MapListener<S> {
    pub fn builder() -> MapListenerBuilder<S> {
        MapListenerBuilder::default()
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn dispatch(&self, event: &MapEvent<S>) {
        use crate::event::EventKind::*;
        let handler = match event.kind {
            Inserted => &self.on_inserted,
            Updated => &self.on_updated,
            Deleted => &self.on_deleted,
        };
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

pub struct MapListenerBuilder<S: Serializer> {
    on_inserted: Option<HandlerFn<S>>,
    on_updated: Option<HandlerFn<S>>,
    on_deleted: Option<HandlerFn<S>>,
}

impl<S: Serializer> Default for MapListenerBuilder<S> {
    fn default() -> Self {
        Self {
            on_inserted: None,
            on_updated: None,
            on_deleted: None,
        }
    }
}

impl<S: Serializer> MapListenerBuilder<S> {
    pub fn on_inserted(mut self, handler: impl Fn(&MapEvent<S>) + Send + Sync + 'static) -> Self {
        self.on_inserted = Some(Arc::new(handler));
        self
    }

    pub fn on_updated(mut self, handler: impl Fn(&MapEvent<S>) + Send + Sync + 'static) -> Self {
        self.on_updated = Some(Arc::new(handler));
        self
    }

    pub fn on_deleted(mut self, handler: impl Fn(&MapEvent<S>) + Send + Sync + 'static) -> Self {
        self.on_deleted = Some(Arc::new(handler));
        self
    }

    pub fn on_any(self, handler: impl Fn(&MapEvent<S>) + Send + Sync + 'static) -> Self {
        let handler = Arc::new(handler);
        Self {
            on_inserted: Some(handler.clone()),
            on_updated: Some(handler.clone()),
            on_deleted: Some(handler),
        }
    }

    pub fn build(self) -> MapListener<S> {
        MapListener {
            id: ListenerId::next(),
            on_inserted: self.on_inserted,
            on_updated: self.on_updated,
            on_deleted: self.on_deleted,
        }
    }
}
