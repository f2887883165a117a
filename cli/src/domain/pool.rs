//! Generic reservation pool for interchangeable resources (devices, accounts).
//!
//! A pool owns a fixed universe of registered resources and hands them out
//! one at a time. Selection order is shuffled once per epoch: the working
//! list is rebuilt whenever the reservation map no longer covers every
//! registered resource (i.e. after new registrations). Every mutation happens
//! under a single mutex.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::domain::error::PoolError;

/// A resource that can be registered in a [`ResourcePool`].
///
/// The id must be unique within one pool.
pub trait Reservable: Clone {
    fn resource_id(&self) -> &str;
}

struct PoolState<T> {
    registered: Vec<T>,
    /// resource id -> reserved flag
    reservations: HashMap<String, bool>,
    /// shuffled indices into `registered`
    order: Vec<usize>,
    rng: StdRng,
}

impl<T: Reservable> PoolState<T> {
    fn begin_epoch_if_stale(&mut self, kind: &str) {
        if self.reservations.len() == self.registered.len()
            && self.order.len() == self.registered.len()
        {
            return;
        }
        for resource in &self.registered {
            self.reservations
                .entry(resource.resource_id().to_string())
                .or_insert(false);
        }
        self.order = (0..self.registered.len()).collect();
        self.order.shuffle(&mut self.rng);
        tracing::debug!(pool = kind, size = self.order.len(), "pool order reshuffled");
    }

    fn reserved_count(&self) -> usize {
        self.reservations.values().filter(|r| **r).count()
    }

    fn is_reserved(&self, id: &str) -> bool {
        self.reservations.get(id).copied().unwrap_or(false)
    }

    fn set_reserved(&mut self, id: &str, reserved: bool) {
        if let Some(flag) = self.reservations.get_mut(id) {
            *flag = reserved;
        }
    }
}

/// Thread-safe checkout/return of a fixed set of resources.
pub struct ResourcePool<T> {
    kind: &'static str,
    state: Mutex<PoolState<T>>,
}

impl<T: Reservable> ResourcePool<T> {
    /// Create an empty pool. `kind` names the resource in logs and errors.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self::with_rng(kind, StdRng::from_entropy())
    }

    /// Create a pool whose shuffle order is reproducible.
    #[must_use]
    pub fn with_seed(kind: &'static str, seed: u64) -> Self {
        Self::with_rng(kind, StdRng::seed_from_u64(seed))
    }

    fn with_rng(kind: &'static str, rng: StdRng) -> Self {
        Self {
            kind,
            state: Mutex::new(PoolState {
                registered: Vec::new(),
                reservations: HashMap::new(),
                order: Vec::new(),
                rng,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        // Every critical section leaves the state consistent, so a panic in
        // another holder does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exhausted(&self, state: &PoolState<T>) -> PoolError {
        PoolError::ResourceExhausted {
            kind: self.kind,
            registered: state.registered.len(),
            reserved: state.reserved_count(),
        }
    }

    /// Add a resource to the universe. It becomes available on the next
    /// reservation, which starts a new epoch.
    pub fn register(&self, resource: T) -> Result<(), PoolError> {
        let mut state = self.lock();
        let id = resource.resource_id();
        if state.registered.iter().any(|r| r.resource_id() == id) {
            return Err(PoolError::DuplicateResource {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        tracing::debug!(pool = self.kind, resource = id, "registered");
        state.registered.push(resource);
        Ok(())
    }

    /// Reserve any available resource.
    pub fn reserve(&self) -> Result<T, PoolError> {
        self.reserve_matching(|_| true)
    }

    /// Reserve the first available resource (in epoch order) accepted by
    /// `wanted`.
    pub fn reserve_matching<F>(&self, wanted: F) -> Result<T, PoolError>
    where
        F: Fn(&T) -> bool,
    {
        let mut state = self.lock();
        state.begin_epoch_if_stale(self.kind);
        let picked = state.order.iter().copied().find(|&idx| {
            let resource = &state.registered[idx];
            !state.is_reserved(resource.resource_id()) && wanted(resource)
        });
        match picked {
            Some(idx) => {
                let resource = state.registered[idx].clone();
                state.set_reserved(resource.resource_id(), true);
                tracing::debug!(pool = self.kind, resource = resource.resource_id(), "reserved");
                Ok(resource)
            }
            None => Err(self.exhausted(&state)),
        }
    }

    /// Reserve one resource per entry of `wants`, atomically.
    ///
    /// Either every request is satisfied, or nothing is reserved and the pool
    /// is left exactly as it was. Results are returned in the order of
    /// `wants`.
    pub fn reserve_all<F>(&self, wants: &[F]) -> Result<Vec<T>, PoolError>
    where
        F: Fn(&T) -> bool,
    {
        let mut state = self.lock();
        state.begin_epoch_if_stale(self.kind);

        let mut picked: Vec<usize> = Vec::with_capacity(wants.len());
        for wanted in wants {
            let next = state.order.iter().copied().find(|&idx| {
                let resource = &state.registered[idx];
                !picked.contains(&idx) && !state.is_reserved(resource.resource_id()) && wanted(resource)
            });
            match next {
                Some(idx) => picked.push(idx),
                None => return Err(self.exhausted(&state)),
            }
        }

        let granted: Vec<T> = picked.iter().map(|&idx| state.registered[idx].clone()).collect();
        for resource in &granted {
            state.set_reserved(resource.resource_id(), true);
        }
        Ok(granted)
    }

    /// Return a resource to the available set. Returns `false` (and does
    /// nothing) when it was not reserved.
    pub fn release(&self, resource: &T) -> bool {
        let mut state = self.lock();
        let id = resource.resource_id();
        if !state.is_reserved(id) {
            return false;
        }
        state.set_reserved(id, false);
        tracing::debug!(pool = self.kind, resource = id, "released");
        true
    }

    pub fn release_all(&self, resources: &[T]) {
        for resource in resources {
            self.release(resource);
        }
    }

    /// Clear all pool state. Resources still reserved indicate a caller that
    /// never released; they are logged, not treated as fatal.
    pub fn dispose(&self) {
        let mut state = self.lock();
        let mut leaked: Vec<&String> = state
            .reservations
            .iter()
            .filter_map(|(id, reserved)| reserved.then_some(id))
            .collect();
        leaked.sort();
        for id in leaked {
            tracing::warn!(pool = self.kind, resource = %id, "still reserved at dispose");
        }
        state.registered.clear();
        state.reservations.clear();
        state.order.clear();
    }

    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.lock().registered.len()
    }

    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.lock().reserved_count()
    }

    #[must_use]
    pub fn available_count(&self) -> usize {
        let state = self.lock();
        state.registered.len() - state.reserved_count()
    }

    #[must_use]
    pub fn is_reserved(&self, id: &str) -> bool {
        self.lock().is_reserved(id)
    }

    /// Snapshot of every registered resource, reserved or not.
    #[must_use]
    pub fn resources(&self) -> Vec<T> {
        self.lock().registered.clone()
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}
