//! Event Bus - synchronous pub/sub keyed by channel
//!
//! Design:
//! - One explicitly constructed bus per session, shared behind an `Arc`
//! - Delivery happens on the publisher's stack, in subscription order
//! - Each publish iterates a snapshot of the subscriber list, so handlers may
//!   publish, subscribe or unsubscribe reentrantly
//! - A failing (or panicking) handler is logged and skipped

use ahash::AHashMap;
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::device::DeviceId;
use crate::error::BusHandlerError;
use crate::events::{BusEvent, Channel};

/// Bus handler callback
pub type Handler = Arc<dyn Fn(&BusEvent) -> Result<(), BusHandlerError> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    owner: Option<DeviceId>,
    handler: Handler,
    /// Cleared on unsubscribe; snapshots taken earlier check it before delivery
    live: AtomicBool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    channels: AHashMap<Channel, Vec<Arc<Subscription>>>,
    index: AHashMap<SubscriptionId, Channel>,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(channel) = self.index.remove(&id) else {
            return false;
        };
        if let Some(subscribers) = self.channels.get_mut(&channel) {
            if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
                let subscription = subscribers.remove(pos);
                subscription.live.store(false, Ordering::SeqCst);
            }
            if subscribers.is_empty() {
                self.channels.remove(&channel);
            }
        }
        true
    }
}

pub struct EventBus {
    registry: RwLock<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe a handler to a channel
    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> Result<(), BusHandlerError> + Send + Sync + 'static,
    {
        self.insert(channel, None, Arc::new(handler))
    }

    /// Subscribe a handler owned by a device controller.
    ///
    /// Owned subscriptions can be dropped together with `unsubscribe_owner`.
    pub fn subscribe_owned<F>(&self, channel: Channel, owner: DeviceId, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> Result<(), BusHandlerError> + Send + Sync + 'static,
    {
        self.insert(channel, Some(owner), Arc::new(handler))
    }

    fn insert(&self, channel: Channel, owner: Option<DeviceId>, handler: Handler) -> SubscriptionId {
        let mut registry = self.write();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.index.insert(id, channel);
        registry
            .channels
            .entry(channel)
            .or_default()
            .push(Arc::new(Subscription {
                id,
                owner,
                handler,
                live: AtomicBool::new(true),
            }));
        tracing::trace!("[EventBus] Subscribed {:?} to {}", id, channel);
        id
    }

    /// Remove one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.write().remove(id)
    }

    /// Remove every subscription owned by `owner`, returns how many were removed
    pub fn unsubscribe_owner(&self, owner: &DeviceId) -> usize {
        let mut registry = self.write();
        let owned: Vec<SubscriptionId> = registry
            .channels
            .values()
            .flatten()
            .filter(|s| s.owner.as_ref() == Some(owner))
            .map(|s| s.id)
            .collect();
        for id in &owned {
            registry.remove(*id);
        }
        tracing::debug!(
            "[EventBus] Removed {} subscriptions owned by {}",
            owned.len(),
            owner
        );
        owned.len()
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.read().channels.get(&channel).map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler subscribed to its channel.
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn publish(&self, event: &BusEvent) -> usize {
        let channel = event.channel();
        let snapshot: SmallVec<[Arc<Subscription>; 8]> = match self.read().channels.get(&channel) {
            Some(subscribers) => subscribers.iter().cloned().collect(),
            None => return 0,
        };

        tracing::trace!(
            "[EventBus] Publishing {} to {} subscribers",
            channel,
            snapshot.len()
        );

        let mut delivered = 0;
        for subscription in snapshot {
            if !subscription.live.load(Ordering::SeqCst) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (subscription.handler)(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::error!(
                        "[EventBus] Handler {:?} on {} failed: {}",
                        subscription.id,
                        channel,
                        e
                    );
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "[EventBus] Handler {:?} on {} panicked: {}",
                        subscription.id,
                        channel,
                        reason
                    );
                }
            }
        }
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
