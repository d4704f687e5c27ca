//! Sync Coordinator: keeps the local idea set consistent with the server.
//!
//! All record-set state lives in one [`Inner`] behind a mutex; every mutator
//! (local edits, pull-and-merge, identity loss) goes through it and writes the
//! Local Cache before committing the in-memory copy.
//!
//! Server mirrors of local edits and the upload of local-only records after a
//! merge are detached tasks on a [`TaskTracker`]; their failures are only
//! logged; the periodic pull is the consistency backstop.
//!
//! Pulls are serialized by `sync_lock`. Timer-driven pulls that find it held
//! are coalesced; identity transitions and manual syncs wait for it. A pull
//! records the identity generation it started under and discards its result
//! if the generation changed before the merge is written.

use crate::api_client::RemoteError;
use crate::cache::{CacheError, LocalCache};
use crate::session::{SessionError, SessionProvider};
use aquarium_core::{Idea, IdeaDraft, Session, User, merge_ideas, next_local_id};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Server operations the coordinator depends on.
#[async_trait]
pub trait IdeaRemote: Send + Sync {
    async fn list_ideas(&self, credential: &str) -> Result<Vec<Idea>, RemoteError>;
    async fn create_idea(&self, credential: &str, idea: &Idea) -> Result<(), RemoteError>;
    async fn update_idea(&self, credential: &str, idea: &Idea) -> Result<(), RemoteError>;
    async fn delete_idea(&self, credential: &str, idea_id: &str) -> Result<(), RemoteError>;
    async fn clear_ideas(&self, credential: &str) -> Result<usize, RemoteError>;
    /// Additive, idempotent batch upload. Returns the number of records written.
    async fn upload_ideas(&self, credential: &str, ideas: &[Idea]) -> Result<usize, RemoteError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("idea not found: {0}")]
    NotFound(String),

    #[error("no free local id left")]
    IdsExhausted,

    #[error("invalid idea: {0}")]
    Invalid(#[from] aquarium_core::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// User-visible sync indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Result of a pull-and-merge attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No credential available; nothing to sync against.
    Skipped,
    /// Another pull was in flight; this trigger was folded into it.
    Coalesced,
    Merged {
        total: usize,
        pulled: usize,
        pushed: usize,
    },
    /// The credential was rejected after one refresh; identity was dropped.
    SignedOut,
    /// Identity changed while the pull was in flight; its result was dropped.
    Discarded,
}

/// Result of [`SyncCoordinator::with_refresh_once`].
enum Attempt<T> {
    Done(T),
    SignedOut,
    /// Identity changed while the credential was being refreshed.
    Discarded,
}

struct Inner {
    ideas: Vec<Idea>,
    next_id: u128,
    identity: Option<User>,
    // Bumped on every identity transition.
    generation: u64,
}

struct Shared {
    cache: LocalCache,
    remote: Arc<dyn IdeaRemote>,
    sessions: Arc<dyn SessionProvider>,
    state: Mutex<Inner>,
    sync_lock: Mutex<()>,
    indicator: watch::Sender<SyncState>,
    tasks: TaskTracker,
    poller: std::sync::Mutex<Option<CancellationToken>>,
    interval: Duration,
}

/// Owner of the client's record set.
#[derive(Clone)]
pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

impl SyncCoordinator {
    pub fn new(
        cache: LocalCache,
        remote: Arc<dyn IdeaRemote>,
        sessions: Arc<dyn SessionProvider>,
        interval: Duration,
    ) -> Self {
        let (indicator, _) = watch::channel(SyncState::Idle);
        Self {
            shared: Arc::new(Shared {
                cache,
                remote,
                sessions,
                state: Mutex::new(Inner {
                    ideas: Vec::new(),
                    next_id: aquarium_core::FIRST_LOCAL_ID,
                    identity: None,
                    generation: 0,
                }),
                sync_lock: Mutex::new(()),
                indicator,
                tasks: TaskTracker::new(),
                poller: std::sync::Mutex::new(None),
                interval,
            }),
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn ideas(&self) -> Vec<Idea> {
        self.shared.state.lock().await.ideas.clone()
    }

    pub async fn identity(&self) -> Option<User> {
        self.shared.state.lock().await.identity.clone()
    }

    pub async fn is_signed_in(&self) -> bool {
        self.shared.state.lock().await.identity.is_some()
    }

    /// Next id handed out by a local create while signed out.
    pub async fn next_id(&self) -> u128 {
        self.shared.state.lock().await.next_id
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.shared.indicator.subscribe()
    }

    pub fn sync_state(&self) -> SyncState {
        *self.shared.indicator.borrow()
    }

    // =========================================================================
    // Startup / shutdown
    // =========================================================================

    /// Load the Local Cache and, if a session was persisted, re-establish
    /// identity and pull.
    pub async fn restore(&self) -> Result<SyncOutcome, SyncError> {
        let ideas = self.shared.cache.load().await?;
        {
            let mut inner = self.shared.state.lock().await;
            inner.next_id = next_local_id(&ideas);
            inner.ideas = ideas;
        }

        let Some(session) = self.shared.sessions.current().await? else {
            return Ok(SyncOutcome::Skipped);
        };
        tracing::debug!(user_id = %session.user.id, "Restoring persisted session");
        self.establish(session.user).await;

        let _sync = self.shared.sync_lock.lock().await;
        let _indicator = Indicator::start(&self.shared.indicator);
        self.pull_and_merge(None).await
    }

    /// Stop background reconciliation and wait for detached mirror tasks.
    pub async fn shutdown(&self) {
        self.stop_poller();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        self.shared.tasks.reopen();
    }

    // =========================================================================
    // Local mutations
    // =========================================================================

    /// Add a new idea. Signed-in creates use a timestamp-derived id so two
    /// devices are unlikely to collide.
    pub async fn create(&self, draft: IdeaDraft) -> Result<Idea, SyncError> {
        let mut inner = self.shared.state.lock().await;
        let mut id = if inner.identity.is_some() {
            u128::from(now_millis()).max(inner.next_id)
        } else {
            inner.next_id
        };
        // The counter can lag behind ids it cannot parse; never reuse one.
        while inner.ideas.iter().any(|i| i.id == id.to_string()) {
            id = id.checked_add(1).ok_or(SyncError::IdsExhausted)?;
        }
        let idea = draft.into_idea(id.to_string());

        let mut ideas = inner.ideas.clone();
        ideas.push(idea.clone());
        self.shared.cache.save(&ideas).await?;
        inner.ideas = ideas;
        inner.next_id = inner.next_id.max(id.saturating_add(1));

        if inner.identity.is_some() {
            let mirrored = idea.clone();
            self.spawn_mirror("create", move |remote, credential| async move {
                remote.create_idea(&credential, &mirrored).await
            });
        }
        Ok(idea)
    }

    /// Replace the idea with the same id.
    pub async fn update(&self, idea: Idea) -> Result<Idea, SyncError> {
        idea.validate()?;
        let mut inner = self.shared.state.lock().await;
        let Some(pos) = inner.ideas.iter().position(|i| i.id == idea.id) else {
            return Err(SyncError::NotFound(idea.id));
        };

        let mut ideas = inner.ideas.clone();
        ideas[pos] = idea.clone();
        self.shared.cache.save(&ideas).await?;
        inner.ideas = ideas;

        if inner.identity.is_some() {
            let mirrored = idea.clone();
            self.spawn_mirror("update", move |remote, credential| async move {
                remote.update_idea(&credential, &mirrored).await
            });
        }
        Ok(idea)
    }

    pub async fn delete(&self, idea_id: &str) -> Result<Idea, SyncError> {
        let mut inner = self.shared.state.lock().await;
        let Some(pos) = inner.ideas.iter().position(|i| i.id == idea_id) else {
            return Err(SyncError::NotFound(idea_id.to_string()));
        };

        let mut ideas = inner.ideas.clone();
        let removed = ideas.remove(pos);
        self.shared.cache.save(&ideas).await?;
        inner.ideas = ideas;

        if inner.identity.is_some() {
            let id = removed.id.clone();
            self.spawn_mirror("delete", move |remote, credential| async move {
                remote.delete_idea(&credential, &id).await
            });
        }
        Ok(removed)
    }

    /// Remove every idea locally and, when signed in, on the server.
    pub async fn clear_all(&self) -> Result<usize, SyncError> {
        let mut inner = self.shared.state.lock().await;
        let count = inner.ideas.len();
        self.shared.cache.save(&[]).await?;
        inner.ideas.clear();
        inner.next_id = aquarium_core::FIRST_LOCAL_ID;

        if inner.identity.is_some() {
            self.spawn_mirror("clear", move |remote, credential| async move {
                remote.clear_ideas(&credential).await.map(|_| ())
            });
        }
        Ok(count)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Pull-and-merge. A trigger that arrives while another pull is running
    /// is coalesced into it. `silent` only controls the sync indicator.
    pub async fn sync(&self, silent: bool) -> Result<SyncOutcome, SyncError> {
        let Ok(_sync) = self.shared.sync_lock.try_lock() else {
            tracing::debug!("Sync already in flight, coalescing");
            return Ok(SyncOutcome::Coalesced);
        };
        let _indicator = (!silent).then(|| Indicator::start(&self.shared.indicator));
        self.pull_and_merge(None).await
    }

    /// User-triggered sync: upload the whole local set, then pull. The
    /// indicator stays at `Syncing` throughout. Upload failures are returned
    /// to the caller.
    pub async fn sync_now(&self) -> Result<SyncOutcome, SyncError> {
        let _sync = self.shared.sync_lock.lock().await;
        let _indicator = Indicator::start(&self.shared.indicator);

        let (start_gen, local) = {
            let inner = self.shared.state.lock().await;
            if inner.identity.is_none() {
                return Err(SyncError::NotSignedIn);
            }
            (inner.generation, inner.ideas.clone())
        };

        if !local.is_empty() {
            let credential = self
                .shared
                .sessions
                .current()
                .await?
                .map(|s| s.access_token)
                .ok_or(SyncError::NotSignedIn)?;
            let local = Arc::new(local);
            let uploaded = self
                .with_refresh_once(start_gen, credential, move |remote, credential| {
                    let local = Arc::clone(&local);
                    async move { remote.upload_ideas(&credential, &local).await }
                })
                .await?;
            match uploaded {
                Attempt::Done(count) => tracing::info!(count, "Uploaded local ideas"),
                Attempt::SignedOut => return Ok(SyncOutcome::SignedOut),
                Attempt::Discarded => return Ok(SyncOutcome::Discarded),
            }
        }

        self.pull_and_merge(None).await
    }

    /// Persist `session`, establish its identity, start background
    /// reconciliation and pull immediately.
    pub async fn sign_in(&self, session: Session) -> Result<SyncOutcome, SyncError> {
        self.shared.sessions.store(&session).await?;
        tracing::info!(user_id = %session.user.id, email = %session.user.email, "Signed in");
        self.establish(session.user).await;

        let _sync = self.shared.sync_lock.lock().await;
        let _indicator = Indicator::start(&self.shared.indicator);
        self.pull_and_merge(Some(session.access_token)).await
    }

    /// Revoke the credential (best effort) and drop identity.
    pub async fn sign_out(&self) -> Result<(), SyncError> {
        if let Err(e) = self.shared.sessions.revoke().await {
            tracing::warn!(error = %e, "Failed to revoke session on server");
        }
        self.lose_identity(None).await;
        tracing::info!("Signed out");
        Ok(())
    }

    async fn pull_and_merge(
        &self,
        override_credential: Option<String>,
    ) -> Result<SyncOutcome, SyncError> {
        let start_gen = self.shared.state.lock().await.generation;

        let credential = match override_credential {
            Some(credential) => credential,
            None => match self.shared.sessions.current().await? {
                Some(session) => session.access_token,
                None => return Ok(SyncOutcome::Skipped),
            },
        };

        let server = match self
            .with_refresh_once(start_gen, credential, |remote, credential| async move {
                remote.list_ideas(&credential).await
            })
            .await?
        {
            Attempt::Done(server) => server,
            Attempt::SignedOut => return Ok(SyncOutcome::SignedOut),
            Attempt::Discarded => return Ok(SyncOutcome::Discarded),
        };
        let pulled = server.len();

        let mut inner = self.shared.state.lock().await;
        if inner.generation != start_gen || inner.identity.is_none() {
            tracing::debug!("Identity changed during pull, discarding result");
            return Ok(SyncOutcome::Discarded);
        }

        let merge = merge_ideas(server, &inner.ideas);
        self.shared.cache.save(&merge.merged).await?;
        if let Some(next) = merge.next_local_id() {
            inner.next_id = next;
        }
        let total = merge.merged.len();
        let pushed = merge.missing_on_server.len();
        inner.ideas = merge.merged;
        drop(inner);

        if pushed > 0 {
            self.spawn_upload(merge.missing_on_server);
        }

        tracing::debug!(total, pulled, pushed, "Merged server ideas");
        Ok(SyncOutcome::Merged {
            total,
            pulled,
            pushed,
        })
    }

    /// Run `op`; on an authorization failure refresh the credential exactly
    /// once and retry. A failed refresh or a second authorization failure
    /// drops identity. If identity changed since `start_gen` the refreshed
    /// credential belongs to nobody and the attempt is discarded.
    async fn with_refresh_once<T, F, Fut>(
        &self,
        start_gen: u64,
        credential: String,
        op: F,
    ) -> Result<Attempt<T>, SyncError>
    where
        F: Fn(Arc<dyn IdeaRemote>, String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        match op(self.shared.remote.clone(), credential).await {
            Ok(value) => return Ok(Attempt::Done(value)),
            Err(RemoteError::Unauthorized(reason)) => {
                tracing::info!(%reason, "Credential rejected, refreshing");
            }
            Err(e) => return Err(e.into()),
        }

        let refreshed = self.shared.sessions.refresh().await;
        if self.shared.state.lock().await.generation != start_gen {
            tracing::debug!("Identity changed during refresh, discarding");
            return Ok(Attempt::Discarded);
        }
        let refreshed = match refreshed {
            Ok(session) => session,
            Err(SessionError::Superseded) => return Ok(Attempt::Discarded),
            Err(e) => {
                tracing::warn!(error = %e, "Credential refresh failed, signing out");
                self.lose_identity(Some(start_gen)).await;
                return Ok(Attempt::SignedOut);
            }
        };

        match op(self.shared.remote.clone(), refreshed.access_token).await {
            Ok(value) => Ok(Attempt::Done(value)),
            Err(RemoteError::Unauthorized(reason)) => {
                tracing::warn!(%reason, "Refreshed credential rejected, signing out");
                self.lose_identity(Some(start_gen)).await;
                Ok(Attempt::SignedOut)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Identity transitions
    // =========================================================================

    async fn establish(&self, user: User) {
        {
            let mut inner = self.shared.state.lock().await;
            inner.identity = Some(user);
            inner.generation += 1;
        }
        self.start_poller();
    }

    /// Drop identity, forget the persisted session and fall back to whatever
    /// the Local Cache holds. With `expected_gen`, only acts if no identity
    /// transition happened since that generation.
    async fn lose_identity(&self, expected_gen: Option<u64>) {
        let mut inner = self.shared.state.lock().await;
        if let Some(generation) = expected_gen
            && generation != inner.generation
        {
            return;
        }
        inner.identity = None;
        inner.generation += 1;
        self.stop_poller();

        if let Err(e) = self.shared.sessions.clear().await {
            tracing::warn!(error = %e, "Failed to clear persisted session");
        }
        match self.shared.cache.load().await {
            Ok(ideas) => {
                inner.next_id = next_local_id(&ideas);
                inner.ideas = ideas;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload local cache, keeping in-memory ideas");
            }
        }
    }

    // =========================================================================
    // Background work
    // =========================================================================

    fn start_poller(&self) {
        let token = CancellationToken::new();
        let previous = self
            .shared
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = self.shared.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; sign-in already pulled.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(shared) = weak.upgrade() else { break };
                let coordinator = SyncCoordinator { shared };
                match coordinator.sync(true).await {
                    Ok(SyncOutcome::SignedOut) => break,
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Background sync failed"),
                }
            }
            tracing::debug!("Background sync stopped");
        });
    }

    fn stop_poller(&self) {
        let token = self
            .shared
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn spawn_mirror<F, Fut>(&self, operation: &'static str, op: F)
    where
        F: FnOnce(Arc<dyn IdeaRemote>, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
    {
        let remote = self.shared.remote.clone();
        let sessions = self.shared.sessions.clone();
        self.shared.tasks.spawn(async move {
            let credential = match sessions.current().await {
                Ok(Some(session)) => session.access_token,
                Ok(None) => {
                    tracing::debug!(operation, "No session, skipping server mirror");
                    return;
                }
                Err(e) => {
                    tracing::warn!(operation, error = %e, "Failed to read session for mirror");
                    return;
                }
            };
            if let Err(e) = op(remote, credential).await {
                tracing::warn!(operation, error = %e, "Server mirror failed");
            }
        });
    }

    fn spawn_upload(&self, ideas: Vec<Idea>) {
        let count = ideas.len();
        self.spawn_mirror("upload", move |remote, credential| async move {
            let written = remote.upload_ideas(&credential, &ideas).await?;
            tracing::debug!(count, written, "Uploaded local-only ideas");
            Ok(())
        });
    }
}

/// Holds the indicator at `Syncing` until dropped.
struct Indicator<'a>(&'a watch::Sender<SyncState>);

impl<'a> Indicator<'a> {
    fn start(tx: &'a watch::Sender<SyncState>) -> Self {
        tx.send_replace(SyncState::Syncing);
        Self(tx)
    }
}

impl Drop for Indicator<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SyncState::Idle);
    }
}

fn now_millis() -> u64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    u64::try_from(millis).unwrap_or(0)
}
