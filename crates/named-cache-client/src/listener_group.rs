//! Coalesces many local listeners sharing one subscription target into
//! exactly one logical subscription with the server.
//!
//! `ListenerGroup` is deliberately pure bookkeeping: it decides which wire
//! action a call requires and updates its own listener/detail-level state,
//! but never talks to the transport itself. `EventsManager` owns the
//! transport and interprets the returned `AddAction`/`RemoveAction`,
//! sequencing subscribe/unsubscribe RPCs and preserving per-group ordering.
//! Keeping the decision logic transport-free lets the coalescing rules be
//! tested without a mock server (see the tests below).

use crate::{event::MapEvent, listener::MapListener, serializer::Serializer};

/// What a group is keyed on: a specific key, or a server-side filter
/// expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupTarget {
    Key {
        fingerprint: String,
        key_bytes: Vec<u8>,
    },
    Filter {
        /// Structural identity of the filter expression: since the
        /// serializer is deterministic, equal filters serialize to equal
        /// bytes, so the bytes themselves are a sufficient identity.
        identity: Vec<u8>,
        filter_bytes: Vec<u8>,
        server_filter_id: Option<i32>,
    },
}

impl GroupTarget {
    pub fn key(fingerprint: impl Into<String>, key_bytes: Vec<u8>) -> Self {
        GroupTarget::Key {
            fingerprint: fingerprint.into(),
            key_bytes,
        }
    }

    pub fn filter(filter_bytes: Vec<u8>) -> Self {
        GroupTarget::Filter {
            identity: filter_bytes.clone(),
            filter_bytes,
            server_filter_id: None,
        }
    }
}

/// Wire action `add_listener` requires the caller to perform, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddAction {
    /// Already present with the same detail level; nothing to do.
    NoOp,
    /// First listener in the group: issue exactly one SUBSCRIBE.
    Subscribe { lite: bool },
    /// The group was registered lite but a non-lite listener was just
    /// added: issue UNSUBSCRIBE, then SUBSCRIBE with `lite=false`, in
    /// that order.
    Resubscribe { new_lite: bool },
}

/// Wire action `remove_listener` requires the caller to perform, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveAction {
    NoOp,
    /// The group is now empty: issue UNSUBSCRIBE and drop the group from
    /// whichever index it is reachable from.
    UnsubscribeAndDrop,
    /// The last non-lite listener was removed: issue UNSUBSCRIBE, then
    /// SUBSCRIBE with `lite=true`, in that order.
    Downgrade,
}

pub struct ListenerGroup<S: Serializer> {
    target: GroupTarget,
    // insertion order matters: dispatch follows arrival order, so this
    // stays a Vec rather than a HashMap.
    listeners: Vec<(MapListener<S>, bool)>,
    registered_lite: bool,
    lite_false_count: usize,
}

impl<S: Serializer> ListenerGroup<S> {
    pub fn new(target: GroupTarget) -> Self {
        Self {
            target,
            listeners: Vec::new(),
            registered_lite: true,
            lite_false_count: 0,
        }
    }

    pub fn target(&self) -> &GroupTarget {
        &self.target
    }

    pub fn set_server_filter_id(&mut self, id: i32) {
        if let GroupTarget::Filter {
            server_filter_id, ..
        } = &mut self.target
        {
            *server_filter_id = Some(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Holds `registered_lite == (lite_false_count == 0)` at every observable point.
    pub fn registered_lite(&self) -> bool {
        self.registered_lite
    }

    pub fn add_listener(&mut self, listener: MapListener<S>, lite: bool) -> AddAction {
        if let Some((_, existing_lite)) = self
            .listeners
            .iter()
            .find(|(existing, _)| existing.id() == listener.id())
        {
            if *existing_lite == lite {
                return AddAction::NoOp;
            }
        }

        let first = self.listeners.is_empty();
        match self
            .listeners
            .iter_mut()
            .find(|(existing, _)| existing.id() == listener.id())
        {
            Some(slot) => {
                let was_non_lite = !slot.1;
                let now_non_lite = !lite;
                if was_non_lite && !now_non_lite {
                    self.lite_false_count -= 1;
                } else if !was_non_lite && now_non_lite {
                    self.lite_false_count += 1;
                }
                slot.1 = lite;
            }
            None => {
                if !lite {
                    self.lite_false_count += 1;
                }
                self.listeners.push((listener, lite));
            }
        }

        if first {
            AddAction::Subscribe { lite }
        } else if self.registered_lite && !lite {
            AddAction::Resubscribe { new_lite: false }
        } else {
            AddAction::NoOp
        }
    }

    pub fn remove_listener(&mut self, id: crate::listener::ListenerId) -> RemoveAction {
        let Some(position) = self.listeners.iter().position(|(l, _)| l.id() == id) else {
            return RemoveAction::NoOp;
        };
        let (_, lite) = self.listeners.remove(position);
        if !lite {
            self.lite_false_count -= 1;
        }

        if self.listeners.is_empty() {
            RemoveAction::UnsubscribeAndDrop
        } else if self.lite_false_count == 0 && !self.registered_lite {
            RemoveAction::Downgrade
        } else {
            RemoveAction::NoOp
        }
    }

    /// Called once the subscribe/unsubscribe sequence for an `AddAction`
    /// or `RemoveAction` has fully completed and acked.
    pub fn confirm_registered_lite(&mut self, lite: bool) {
        self.registered_lite = lite;
    }

    /// Dispatches to every record's handler in insertion order. A handler
    /// that panics is caught and logged so it cannot stop delivery to the
    /// handlers after it in the group.
    pub fn notify(&self, event: &MapEvent<S>) {
        for (listener, _lite) in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.dispatch(event)
            }));
            if let Err(panic) = result {
                tracing::error!(?panic, "map listener panicked while handling an event");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{listener::MapListener, serializer::JsonSerializer};

    fn target() -> GroupTarget {
        GroupTarget::key("6b31", b"k1".to_vec())
    }

    #[test]
    fn first_listener_subscribes_with_its_own_lite_level() {
        let mut group: ListenerGroup<JsonSerializer> = ListenerGroup::new(target());
        let listener = MapListener::builder().build();
        assert_eq!(
            group.add_listener(listener, true),
            AddAction::Subscribe { lite: true }
        );
    }

    #[test]
    fn re_adding_same_listener_with_same_lite_is_idempotent() {
        let mut group: ListenerGroup<JsonSerializer> = ListenerGroup::new(target());
        let listener = MapListener::builder().build();
        assert_eq!(
            group.add_listener(listener.clone(), true),
            AddAction::Subscribe { lite: true }
        );
        group.confirm_registered_lite(true);
        assert_eq!(group.add_listener(listener, true), AddAction::NoOp);
    }

    #[test]
    fn adding_non_lite_listener_to_lite_group_upgrades() {
        let mut group: ListenerGroup<JsonSerializer> = ListenerGroup::new(target());
        let h1 = MapListener::builder().build();
        let h2 = MapListener::builder().build();

        assert_eq!(
            group.add_listener(h1, true),
            AddAction::Subscribe { lite: true }
        );
        group.confirm_registered_lite(true);

        assert_eq!(
            group.add_listener(h2, false),
            AddAction::Resubscribe { new_lite: false }
        );
        group.confirm_registered_lite(false);
        assert!(!group.registered_lite());
    }

    #[test]
    fn removing_last_non_lite_listener_downgrades() {
        let mut group: ListenerGroup<JsonSerializer> = ListenerGroup::new(target());
        let h1 = MapListener::builder().build();
        let h2 = MapListener::builder().build();
        let h2_id = h2.id();

        group.add_listener(h1, true);
        group.confirm_registered_lite(true);
        group.add_listener(h2, false);
        group.confirm_registered_lite(false);

        assert_eq!(group.remove_listener(h2_id), RemoveAction::Downgrade);
        group.confirm_registered_lite(true);
        assert!(group.registered_lite());
    }

    #[test]
    fn removing_last_listener_drops_group() {
        let mut group: ListenerGroup<JsonSerializer> = ListenerGroup::new(target());
        let h1 = MapListener::builder().build();
        let h1_id = h1.id();
        group.add_listener(h1, true);
        group.confirm_registered_lite(true);

        assert_eq!(
            group.remove_listener(h1_id),
            RemoveAction::UnsubscribeAndDrop
        );
        assert!(group.is_empty());
    }

    #[test]
    fn notify_dispatches_in_insertion_order() {
        let mut group: ListenerGroup<JsonSerializer> = ListenerGroup::new(target());
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            let listener = MapListener::builder()
                .on_inserted(move |_event| order.lock().unwrap().push(n))
                .build();
            group.add_listener(listener, true);
        }
        group.confirm_registered_lite(true);

        let event = crate::test_support::insert_event_for_test::<JsonSerializer>();
        group.notify(&event);

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
