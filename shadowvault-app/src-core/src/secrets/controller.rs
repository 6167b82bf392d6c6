//! In-memory list state behind the vault screen.
//!
//! The held list is a projection of the remote collection. It is only ever
//! replaced wholesale by a fetch, or emptied by [`ListViewController::clear`].
//! Mutations go to the backend first and are followed by a full reload.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::model::{Secret, SecretId};
use super::repository::SecretsRepository;
use crate::error::{Result, ShadowVaultError};

/// Indicator shown next to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SyncStatus {
    Syncing,
    Secure,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syncing => write!(f, "SYNCING..."),
            Self::Secure => write!(f, "SECURE"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSnapshot {
    pub secrets: Vec<Secret>,
    /// A full list fetch is running.
    pub loading: bool,
    /// A create or delete is running.
    pub syncing: bool,
}

impl ListSnapshot {
    pub fn status(&self) -> SyncStatus {
        if self.loading || self.syncing {
            SyncStatus::Syncing
        } else {
            SyncStatus::Secure
        }
    }
}

/// A create or delete that the backend accepted.
#[derive(Debug)]
pub struct Mutated {
    /// Set when the follow-up reload failed. The list then still shows the
    /// previous fetch.
    pub reload_error: Option<ShadowVaultError>,
}

#[derive(Default)]
struct ListState {
    secrets: Vec<Secret>,
    /// Bumped by every clear. Fetches started under an older generation are
    /// dropped on arrival.
    generation: u64,
    pending_loads: usize,
}

pub struct ListViewController {
    repository: SecretsRepository,
    state: Mutex<ListState>,
    mutation_in_progress: AtomicBool,
    changes: watch::Sender<ListSnapshot>,
}

/// Counts one running fetch. Released on every exit path, including
/// cancellation.
struct LoadTicket<'a> {
    controller: &'a ListViewController,
    generation: u64,
}

impl Drop for LoadTicket<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.controller.state.lock();
            if state.generation == self.generation {
                state.pending_loads = state.pending_loads.saturating_sub(1);
            }
        }
        self.controller.publish();
    }
}

/// Holds the single mutation slot. Dropping it clears `syncing`.
struct MutationGuard<'a> {
    controller: &'a ListViewController,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.controller
            .mutation_in_progress
            .store(false, Ordering::SeqCst);
        self.controller.publish();
    }
}

impl ListViewController {
    pub fn new(repository: SecretsRepository) -> Self {
        let (changes, _) = watch::channel(ListSnapshot::default());
        Self {
            repository,
            state: Mutex::new(ListState::default()),
            mutation_in_progress: AtomicBool::new(false),
            changes,
        }
    }

    pub fn snapshot(&self) -> ListSnapshot {
        let state = self.state.lock();
        ListSnapshot {
            secrets: state.secrets.clone(),
            loading: state.pending_loads > 0,
            syncing: self.mutation_in_progress.load(Ordering::SeqCst),
        }
    }

    /// Stream of snapshots, one per observable change.
    pub fn watch(&self) -> watch::Receiver<ListSnapshot> {
        self.changes.subscribe()
    }

    /// Replaces the held list with a fresh fetch. On failure the held list
    /// is left as it was.
    pub async fn reload(&self) -> Result<()> {
        let ticket = self.begin_load();
        let fetched = self.repository.list().await;

        let stale = {
            let mut state = self.state.lock();
            let stale = state.generation != ticket.generation;
            if let (false, Ok(secrets)) = (stale, &fetched) {
                state.secrets = secrets.clone();
            }
            stale
        };
        drop(ticket);

        if stale {
            // The session that asked for this fetch is gone, and so is its outcome.
            match fetched {
                Ok(_) => debug!("List was cleared during fetch, discarding result"),
                Err(e) => debug!("List was cleared during fetch, dropping error: {}", e),
            }
            return Ok(());
        }

        let secrets = fetched?;
        debug!("List reloaded with {} secrets", secrets.len());
        Ok(())
    }

    /// Stores a new secret, then reloads. The mutation result and the reload
    /// result are reported separately.
    pub async fn create(&self, title: &str, value: &str) -> Result<Mutated> {
        let _guard = self.begin_mutation()?;
        self.repository.create(title, value).await?;
        info!("Secret stored");
        Ok(self.reload_after_mutation().await)
    }

    pub async fn delete(&self, id: SecretId) -> Result<Mutated> {
        let _guard = self.begin_mutation()?;
        self.repository.delete(id).await?;
        info!("Secret {} deleted", id);
        Ok(self.reload_after_mutation().await)
    }

    async fn reload_after_mutation(&self) -> Mutated {
        let reload_error = self.reload().await.err();
        if let Some(e) = &reload_error {
            warn!("Reload after mutation failed: {}", e);
        }
        Mutated { reload_error }
    }

    /// Empties the list without a network round trip. Any fetch still in
    /// flight is discarded when it lands.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.secrets.clear();
            state.generation += 1;
            state.pending_loads = 0;
        }
        self.publish();
    }

    fn begin_load(&self) -> LoadTicket<'_> {
        let generation = {
            let mut state = self.state.lock();
            state.pending_loads += 1;
            state.generation
        };
        self.publish();
        LoadTicket {
            controller: self,
            generation,
        }
    }

    fn begin_mutation(&self) -> Result<MutationGuard<'_>> {
        if self
            .mutation_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Mutation rejected, another one is in flight");
            return Err(ShadowVaultError::Busy);
        }
        self.publish();
        Ok(MutationGuard { controller: self })
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.changes.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}
