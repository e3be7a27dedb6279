//! Wishlist synchronization: keeps the signed-in user's liked products in
//! local state, applies toggles optimistically and rolls them back when the
//! remote store rejects them.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use db::models::product::Product;
use strum_macros::Display;
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    cache::WishlistCache,
    identity::{Identity, IdentityProvider},
    wishlist_store::{StoreError, WishlistStore},
};

#[derive(Debug, Error)]
pub enum WishlistError {
    #[error("sign in required")]
    Unauthenticated,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("identity changed while the request was in flight")]
    SessionChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SyncPhase {
    Unauthenticated,
    Syncing,
    Ready,
}

/// Result of a confirmed toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ToggleOutcome {
    Liked,
    Unliked,
}

/// A local change that a fetch may not have observed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LocalChange {
    // Clear epoch in effect when the change started
    epoch: u64,
    // Confirmation number, once the remote store accepted the change
    confirmed: Option<u64>,
}

impl LocalChange {
    fn unseen_by(&self, since: u64) -> bool {
        self.confirmed.is_none_or(|at| at > since)
    }
}

/// Local wishlist state for the current identity session
#[derive(Debug, Clone)]
pub struct WishlistState {
    identity: Option<Identity>,
    phase: SyncPhase,
    entries: HashSet<String>,
    // Bumped on every identity change; work started under an older value is discarded.
    generation: u64,
    in_flight: usize,
    fetching: usize,
    changes: HashMap<String, LocalChange>,
    cleared: Option<LocalChange>,
    clear_epoch: u64,
    clears_started: u64,
    confirmations: u64,
}

impl WishlistState {
    fn unauthenticated() -> Self {
        Self {
            identity: None,
            phase: SyncPhase::Unauthenticated,
            entries: HashSet::new(),
            generation: 0,
            in_flight: 0,
            fetching: 0,
            changes: HashMap::new(),
            cleared: None,
            clear_epoch: 0,
            clears_started: 0,
            confirmations: 0,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|identity| identity.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn entries(&self) -> &HashSet<String> {
        &self.entries
    }

    pub fn is_liked(&self, product_id: &str) -> bool {
        self.entries.contains(product_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while a fetch or mutation is outstanding
    pub fn loading(&self) -> bool {
        self.in_flight > 0 || self.phase == SyncPhase::Syncing
    }

    fn set_liked(&mut self, product_id: &str, liked: bool) {
        if liked {
            self.entries.insert(product_id.to_string());
        } else {
            self.entries.remove(product_id);
        }
    }

    fn next_confirmation(&mut self) -> u64 {
        self.confirmations += 1;
        self.confirmations
    }

    /// `base` with every local change not seen by a read that started at
    /// confirmation number `since` laid over it.
    fn reconcile(&self, mut base: HashSet<String>, since: u64) -> HashSet<String> {
        if self.cleared.is_some_and(|clear| clear.unseen_by(since)) {
            // Local entries already are "cleared, then later toggles".
            return self.entries.clone();
        }
        for (product_id, change) in &self.changes {
            if !change.unseen_by(since) {
                continue;
            }
            if self.entries.contains(product_id) {
                base.insert(product_id.clone());
            } else {
                base.remove(product_id);
            }
        }
        base
    }

    /// Forget confirmed changes once no fetch in flight can have missed them
    /// and no pending clear may need them to roll back.
    fn prune(&mut self) {
        if self.fetching > 0 || self.cleared.is_some_and(|clear| clear.confirmed.is_none()) {
            return;
        }
        self.changes.retain(|_, change| change.confirmed.is_none());
        if self.cleared.is_some_and(|clear| clear.confirmed.is_some()) {
            self.cleared = None;
        }
    }

    fn reset(&mut self, identity: Option<Identity>) {
        self.generation += 1;
        self.phase = if identity.is_some() {
            SyncPhase::Syncing
        } else {
            SyncPhase::Unauthenticated
        };
        self.identity = identity;
        self.entries.clear();
        self.in_flight = 0;
        self.fetching = 0;
        self.changes.clear();
        self.cleared = None;
    }
}

/// A fetch that has been counted as in flight
#[derive(Debug, Clone, Copy)]
struct Fetch {
    user_id: Uuid,
    generation: u64,
    since: u64,
}

struct Inner {
    store: Arc<dyn WishlistStore>,
    cache: Option<Arc<dyn WishlistCache>>,
    remote_timeout: Duration,
    state: watch::Sender<WishlistState>,
    product_locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Owner of the wishlist state. Clones share the same state.
///
/// Toggles on the same product id are serialized: a second toggle waits for
/// the first to be confirmed or rolled back, then reads membership afresh.
/// Toggles on different products run concurrently and each rollback restores
/// only its own product's membership.
///
/// A fetch never overwrites a change it may not have seen: changes still in
/// flight, or confirmed after the fetch started, are laid over its result.
#[derive(Clone)]
pub struct WishlistService {
    inner: Arc<Inner>,
}

impl WishlistService {
    pub fn new(
        store: Arc<dyn WishlistStore>,
        remote_timeout: Duration,
        cache: Option<Arc<dyn WishlistCache>>,
    ) -> Self {
        let (state, _) = watch::channel(WishlistState::unauthenticated());
        Self {
            inner: Arc::new(Inner {
                store,
                cache,
                remote_timeout,
                state,
                product_locks: DashMap::new(),
            }),
        }
    }

    /// Receiver notified after every state change
    pub fn subscribe(&self) -> watch::Receiver<WishlistState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> WishlistState {
        self.inner.state.borrow().clone()
    }

    pub fn entries(&self) -> HashSet<String> {
        self.inner.state.borrow().entries.clone()
    }

    pub fn is_liked(&self, product_id: &str) -> bool {
        self.inner.state.borrow().is_liked(product_id)
    }

    pub fn count(&self) -> usize {
        self.inner.state.borrow().len()
    }

    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    /// Liked products from `catalog`, in catalog order
    pub fn wishlisted_products<'a>(&self, catalog: &'a [Product]) -> Vec<&'a Product> {
        let state = self.inner.state.borrow();
        catalog
            .iter()
            .filter(|product| state.is_liked(&product.id))
            .collect()
    }

    /// Follow `provider`: apply the current identity, then every change, each
    /// followed by a fetch for the new user.
    pub fn follow(&self, provider: Arc<dyn IdentityProvider>) -> JoinHandle<()> {
        let service = self.clone();
        let mut identities = provider.subscribe();
        tokio::spawn(async move {
            let initial = identities.borrow_and_update().clone();
            service.spawn_sync(initial);

            while identities.changed().await.is_ok() {
                let identity = identities.borrow_and_update().clone();
                service.spawn_sync(identity);
            }
            debug!("Wishlist: identity provider closed");
        })
    }

    fn spawn_sync(&self, identity: Option<Identity>) {
        // The transition is applied here, in order; only the fetch runs detached.
        if let Some(generation) = self.switch_identity(identity) {
            let service = self.clone();
            tokio::spawn(async move {
                service.sync_session(generation).await;
            });
        }
    }

    /// Apply an identity transition and, when signed in, fetch the new user's wishlist.
    pub async fn set_identity(&self, identity: Option<Identity>) {
        if let Some(generation) = self.switch_identity(identity) {
            self.sync_session(generation).await;
        }
    }

    /// Reset local state if the user changed. Returns the new generation when a
    /// user is now signed in.
    fn switch_identity(&self, identity: Option<Identity>) -> Option<u64> {
        let next_user = identity.as_ref().map(|identity| identity.id);
        let mut switched = None;

        self.inner.state.send_if_modified(|state| {
            if state.user_id() == next_user {
                if identity.is_some() {
                    state.identity = identity;
                }
                return false;
            }
            state.reset(identity);
            switched = Some(state.generation);
            true
        });

        let generation = switched?;
        // Old-session toggles keep their own lock handles; new ones start fresh.
        self.inner.product_locks.clear();

        match next_user {
            Some(user_id) => {
                info!(user_id = %user_id, generation, "Wishlist: identity changed, syncing");
                Some(generation)
            }
            None => {
                info!("Wishlist: signed out, local state discarded");
                None
            }
        }
    }

    async fn sync_session(&self, generation: u64) {
        // A newer session runs its own sync.
        let Ok(fetch) = self.begin_fetch(Some(generation)) else {
            return;
        };
        self.seed_from_cache(fetch).await;
        // Failures are logged inside fetch and leave the seeded entries in place.
        let _ = self.fetch(fetch).await;
    }

    async fn seed_from_cache(&self, fetch: Fetch) {
        let Some(cache) = &self.inner.cache else {
            return;
        };
        let user_id = fetch.user_id;

        let cached = match cache.load(user_id).await {
            Ok(Some(cached)) => cached,
            Ok(None) => return,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Wishlist: unreadable cache, ignoring");
                return;
            }
        };

        let count = cached.len();
        let seeded = self.inner.state.send_if_modified(|state| {
            if state.generation != fetch.generation || state.phase != SyncPhase::Syncing {
                return false;
            }
            // Nothing done in this session is in the cache yet.
            state.entries = state.reconcile(cached, 0);
            true
        });
        if seeded {
            debug!(user_id = %user_id, count, "Wishlist: seeded from cache");
        }
    }

    /// Fetch the full wishlist for the current user. Changes the fetch may not
    /// have seen are kept; on failure the last known entries are kept.
    pub async fn refresh(&self) -> Result<(), WishlistError> {
        let fetch = self.begin_fetch(None)?;
        self.fetch(fetch).await
    }

    fn begin_fetch(&self, generation: Option<u64>) -> Result<Fetch, WishlistError> {
        let (user_id, generation, since) = self.begin_in(generation, |state| {
            state.phase = SyncPhase::Syncing;
            state.fetching += 1;
            state.confirmations
        })?;
        Ok(Fetch {
            user_id,
            generation,
            since,
        })
    }

    async fn fetch(&self, fetch: Fetch) -> Result<(), WishlistError> {
        let Fetch {
            user_id,
            generation,
            since,
        } = fetch;

        match self.remote(self.inner.store.select_all(user_id)).await {
            Ok(product_ids) => {
                let fetched: HashSet<String> = product_ids.into_iter().collect();
                let count = fetched.len();
                let current = self.commit(generation, |state| {
                    state.fetching = state.fetching.saturating_sub(1);
                    state.entries = state.reconcile(fetched, since);
                    if state.fetching == 0 {
                        state.phase = SyncPhase::Ready;
                    }
                    state.prune();
                });
                if !current {
                    debug!(user_id = %user_id, "Wishlist: discarding fetch for previous identity");
                    return Err(WishlistError::SessionChanged);
                }
                info!(user_id = %user_id, count, "Wishlist: synced");
                self.persist_cache(user_id, generation).await;
                Ok(())
            }
            Err(e) => {
                error!(
                    user_id = %user_id,
                    error = %e,
                    "Wishlist: fetch failed, keeping last known entries"
                );
                self.commit(generation, |state| {
                    state.fetching = state.fetching.saturating_sub(1);
                    if state.fetching == 0 {
                        state.phase = SyncPhase::Ready;
                    }
                    state.prune();
                });
                Err(e.into())
            }
        }
    }

    /// Flip membership of `product_id`. Returns false when signed out or when
    /// the remote store rejected the change (which is then rolled back).
    pub async fn toggle(&self, product_id: &str) -> bool {
        match self.try_toggle(product_id).await {
            Ok(_) => true,
            Err(WishlistError::Unauthenticated) => {
                debug!(product_id, "Wishlist: toggle ignored, not signed in");
                false
            }
            Err(_) => false,
        }
    }

    pub async fn try_toggle(&self, product_id: &str) -> Result<ToggleOutcome, WishlistError> {
        if !self.is_authenticated() {
            return Err(WishlistError::Unauthenticated);
        }

        let lock = self
            .inner
            .product_locks
            .entry(product_id.to_string())
            .or_default()
            .value()
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.toggle_locked(product_id).await
        };

        // Drop the lock entry once nobody else holds or waits on it.
        self.inner.product_locks.remove_if(product_id, |_, entry| {
            Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) == 2
        });

        result
    }

    async fn toggle_locked(&self, product_id: &str) -> Result<ToggleOutcome, WishlistError> {
        let (user_id, generation, (was_liked, earlier, epoch)) = self.begin(|state| {
            let was_liked = state.is_liked(product_id);
            state.set_liked(product_id, !was_liked);
            let epoch = state.clear_epoch;
            let earlier = state.changes.insert(
                product_id.to_string(),
                LocalChange {
                    epoch,
                    confirmed: None,
                },
            );
            (was_liked, earlier, epoch)
        })?;
        let liked = !was_liked;
        debug!(
            user_id = %user_id,
            product_id,
            liked,
            "Wishlist: optimistic toggle applied"
        );

        let result = if was_liked {
            self.remote(self.inner.store.delete_by_key(user_id, product_id))
                .await
        } else {
            self.remote(self.inner.store.insert(user_id, product_id))
                .await
        };

        match result {
            Ok(()) => {
                let current = self.commit(generation, |state| {
                    let confirmed = Some(state.next_confirmation());
                    state
                        .changes
                        .insert(product_id.to_string(), LocalChange { epoch, confirmed });
                    // A clear started meanwhile may have dropped the optimistic value.
                    state.set_liked(product_id, liked);
                    state.prune();
                });
                if current {
                    self.persist_cache(user_id, generation).await;
                }
                Ok(if liked {
                    ToggleOutcome::Liked
                } else {
                    ToggleOutcome::Unliked
                })
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    product_id,
                    error = %e,
                    "Wishlist: toggle rejected, rolling back"
                );
                self.commit(generation, |state| {
                    match earlier {
                        Some(change) => state.changes.insert(product_id.to_string(), change),
                        None => state.changes.remove(product_id),
                    };
                    // A clear that started after this toggle already decided membership.
                    if state.clear_epoch <= epoch {
                        state.set_liked(product_id, was_liked);
                    }
                    state.prune();
                });
                Err(e.into())
            }
        }
    }

    /// Empty the wishlist. Signed-out calls are ignored; a remote failure
    /// restores the previous entries in full.
    pub async fn clear(&self) {
        if let Err(WishlistError::Unauthenticated) = self.try_clear().await {
            debug!("Wishlist: clear ignored, not signed in");
        }
    }

    pub async fn try_clear(&self) -> Result<(), WishlistError> {
        let (user_id, generation, (previous, earlier_epoch, earlier, epoch)) =
            self.begin(|state| {
                state.clears_started += 1;
                let epoch = state.clears_started;
                let earlier_epoch = std::mem::replace(&mut state.clear_epoch, epoch);
                let earlier = state.cleared.replace(LocalChange {
                    epoch,
                    confirmed: None,
                });
                (
                    std::mem::take(&mut state.entries),
                    earlier_epoch,
                    earlier,
                    epoch,
                )
            })?;
        debug!(user_id = %user_id, count = previous.len(), "Wishlist: optimistic clear applied");

        match self
            .remote(self.inner.store.delete_all_for_user(user_id))
            .await
        {
            Ok(()) => {
                let current = self.commit(generation, |state| {
                    let confirmed = Some(state.next_confirmation());
                    if state.cleared.is_some_and(|clear| clear.epoch == epoch) {
                        state.cleared = Some(LocalChange { epoch, confirmed });
                    }
                    state.prune();
                });
                if current {
                    self.persist_cache(user_id, generation).await;
                }
                info!(user_id = %user_id, "Wishlist: cleared");
                Ok(())
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "Wishlist: clear rejected, restoring entries"
                );
                self.commit(generation, |state| {
                    if state.clear_epoch != epoch {
                        return;
                    }
                    state.clear_epoch = earlier_epoch;
                    state.cleared = earlier;
                    // Toggles started after the clear keep their current membership.
                    let mut restored = previous;
                    for (product_id, change) in &state.changes {
                        if change.epoch < epoch {
                            continue;
                        }
                        if state.entries.contains(product_id) {
                            restored.insert(product_id.clone());
                        } else {
                            restored.remove(product_id);
                        }
                    }
                    state.entries = restored;
                    state.prune();
                });
                Err(e.into())
            }
        }
    }

    /// Start an operation: check for an identity, count it as in flight and
    /// apply `mutate` in the same step.
    fn begin<R>(
        &self,
        mutate: impl FnOnce(&mut WishlistState) -> R,
    ) -> Result<(Uuid, u64, R), WishlistError> {
        self.begin_in(None, mutate)
    }

    /// Like [`Self::begin`], but only under `generation` when one is given.
    fn begin_in<R>(
        &self,
        generation: Option<u64>,
        mutate: impl FnOnce(&mut WishlistState) -> R,
    ) -> Result<(Uuid, u64, R), WishlistError> {
        let mut started = Err(WishlistError::Unauthenticated);
        self.inner.state.send_if_modified(|state| {
            let Some(user_id) = state.user_id() else {
                return false;
            };
            if generation.is_some_and(|generation| generation != state.generation) {
                started = Err(WishlistError::SessionChanged);
                return false;
            }
            state.in_flight += 1;
            let output = mutate(state);
            started = Ok((user_id, state.generation, output));
            true
        });
        started
    }

    /// Finish an operation started under `generation`. `apply` runs only if the
    /// identity has not changed since; returns whether it ran.
    fn commit(&self, generation: u64, apply: impl FnOnce(&mut WishlistState)) -> bool {
        let mut current = false;
        self.inner.state.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            state.in_flight = state.in_flight.saturating_sub(1);
            apply(state);
            current = true;
            true
        });
        current
    }

    async fn remote<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.inner.remote_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    /// Write the current entries to the cache, or drop the cache file when
    /// the wishlist is empty.
    async fn persist_cache(&self, user_id: Uuid, generation: u64) {
        let Some(cache) = &self.inner.cache else {
            return;
        };
        let entries = {
            let state = self.inner.state.borrow();
            if state.generation != generation {
                return;
            }
            state.entries.clone()
        };

        let result = if entries.is_empty() {
            cache.remove(user_id).await
        } else {
            cache.save(user_id, &entries).await
        };
        if let Err(e) = result {
            warn!(user_id = %user_id, error = %e, "Wishlist: failed to update cache");
        }
    }
}
