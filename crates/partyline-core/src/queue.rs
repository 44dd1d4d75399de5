//! Deferred operations.
//!
//! Requests that arrive before their precondition holds are parked here and
//! released by the per-tick advance once it does. Two shapes exist:
//!
//! - [`Staged`]: at most one pending instance; staging again overwrites the
//!   parameters.
//! - [`KeyedQueue`]: one pending instance per key, for work that waits on a
//!   per-participant fact.
//!
//! Releasing takes the parameters out of the slot, so the slot is already
//! empty when the released action runs. An action that stages the same kind
//! again therefore queues a fresh request instead of being dropped.

use crate::{config::NetworkConfiguration, network_id::NetworkId};

/// Single-slot deferred request.
#[derive(Debug, Clone, PartialEq)]
pub struct Staged<T> {
    params: Option<T>,
}

impl<T> Default for Staged<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Staged<T> {
    /// Create an empty slot.
    pub const fn new() -> Self {
        Self { params: None }
    }

    /// Queue `params`, replacing any queued parameters.
    ///
    /// Returns `true` if an earlier request was overwritten.
    pub fn stage(&mut self, params: T) -> bool {
        self.params.replace(params).is_some()
    }

    /// `true` if a request is waiting.
    pub fn is_queued(&self) -> bool {
        self.params.is_some()
    }

    /// Parameters of the waiting request.
    pub fn params(&self) -> Option<&T> {
        self.params.as_ref()
    }

    /// Take the waiting request, leaving the slot empty.
    pub fn release(&mut self) -> Option<T> {
        self.params.take()
    }

    /// Take the waiting request only if `ready` accepts its parameters.
    pub fn release_if(&mut self, ready: impl FnOnce(&T) -> bool) -> Option<T> {
        if self.params.as_ref().is_some_and(ready) { self.params.take() } else { None }
    }

    /// Drop the waiting request.
    pub fn cancel(&mut self) {
        self.params = None;
    }
}

/// Deferred requests keyed by target, at most one per key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedQueue<K, V> {
    entries: Vec<(K, V)>,
}

impl<K, V> Default for KeyedQueue<K, V> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<K: PartialEq, V> KeyedQueue<K, V> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `value` for `key`, replacing a request already queued for it.
    ///
    /// Returns `true` if the key was not queued before.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
            return false;
        }
        self.entries.push((key, value));
        true
    }

    /// `true` if a request is queued for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Remove the request queued for `key`.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Offer every queued request to `attempt`, in insertion order; the ones
    /// it reports as done are removed.
    pub fn drain_completed(&mut self, mut attempt: impl FnMut(&K, &mut V) -> bool) {
        self.entries.retain_mut(|(k, v)| !attempt(k, v));
    }

    /// Queued keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every queued request.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A network request released from a [`NetworkRequests`] gate.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkRequest {
    /// Create a network with this configuration and join it.
    CreateAndJoin(NetworkConfiguration),
    /// Join the network with this identity.
    Join(NetworkId),
}

/// Create-and-join and join slots that gate on the same precondition.
///
/// The two kinds are exclusive: staging one cancels the other, so only the
/// most recent request survives until release.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkRequests {
    create: Staged<NetworkConfiguration>,
    join: Staged<NetworkId>,
}

impl NetworkRequests {
    /// Queue a create-and-join, replacing any queued request.
    pub fn stage_create(&mut self, config: NetworkConfiguration) {
        self.join.cancel();
        self.create.stage(config);
    }

    /// Queue a join, replacing any queued request.
    pub fn stage_join(&mut self, network_id: NetworkId) {
        self.create.cancel();
        self.join.stage(network_id);
    }

    /// Queue an already-released request again.
    pub fn stage(&mut self, request: NetworkRequest) {
        match request {
            NetworkRequest::CreateAndJoin(config) => self.stage_create(config),
            NetworkRequest::Join(network_id) => self.stage_join(network_id),
        }
    }

    /// `true` if either kind is waiting.
    pub fn is_queued(&self) -> bool {
        self.create.is_queued() || self.join.is_queued()
    }

    /// Waiting create-and-join configuration.
    pub fn queued_create(&self) -> Option<&NetworkConfiguration> {
        self.create.params()
    }

    /// Waiting join identity.
    pub fn queued_join(&self) -> Option<&NetworkId> {
        self.join.params()
    }

    /// Take the waiting request, create-and-join first.
    pub fn release(&mut self) -> Option<NetworkRequest> {
        if let Some(config) = self.create.release() {
            return Some(NetworkRequest::CreateAndJoin(config));
        }
        self.join.release().map(NetworkRequest::Join)
    }

    /// Drop both kinds.
    pub fn cancel(&mut self) {
        self.create.cancel();
        self.join.cancel();
    }
}
