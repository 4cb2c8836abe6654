//! Registry of live decode sessions, keyed by source id.
//!
//! # Concurrency design
//!
//! - Structural changes (insert/remove) happen only on the relay worker task,
//!   so at most one session per source id can ever be registered.
//! - Refcounts live in an `AtomicUsize` per entry and are updated with
//!   compare-and-swap loops: subscription disposals race with each other and
//!   with the worker's increments, and none of them take a map-wide lock.
//! - An entry whose refcount reached zero is dead; increments refuse to
//!   revive it, so the worker opens a fresh session instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::session::DecodeSession;

/// A registered session plus its subscriber count.
pub struct RegistryEntry {
    session: Arc<DecodeSession>,
    refcount: AtomicUsize,
}

impl RegistryEntry {
    /// Creates an entry owned by its first subscriber (refcount 1).
    pub(crate) fn new(session: Arc<DecodeSession>) -> Self {
        Self {
            session,
            refcount: AtomicUsize::new(1),
        }
    }

    pub fn session(&self) -> &Arc<DecodeSession> {
        &self.session
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Adds a subscriber. Fails once the count has dropped to zero.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut current = self.refcount.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.refcount.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Removes a subscriber and returns the remaining count.
    ///
    /// The call that takes the count from 1 to 0 closes the session; that
    /// happens exactly once per entry.
    pub(crate) fn release(&self) -> usize {
        let mut current = self.refcount.load(Ordering::Acquire);
        loop {
            if current == 0 {
                log::warn!(
                    "[Registry] Release on source {} with refcount already 0",
                    self.session.source_id()
                );
                return 0;
            }
            match self.refcount.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let remaining = current - 1;
        if remaining == 0 {
            log::info!(
                "[Registry] Last subscriber left source {}, tearing down session {}",
                self.session.source_id(),
                self.session.id()
            );
            self.session.close();
        }
        remaining
    }

    /// Live means: still referenced and the session has not ended.
    pub fn is_live(&self) -> bool {
        self.refcount() > 0 && !self.session.is_terminal()
    }
}

/// Thread-safe map of source id to live session.
///
/// Readers may query from any thread; mutators are `pub(crate)` and called
/// only by the relay worker.
#[derive(Default)]
pub struct SessionRegistry {
    entries: DashMap<String, Arc<RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `source_id`, live or not.
    pub(crate) fn get(&self, source_id: &str) -> Option<Arc<RegistryEntry>> {
        self.entries.get(source_id).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn insert(&self, source_id: &str, entry: Arc<RegistryEntry>) {
        if let Some(previous) = self.entries.insert(source_id.to_string(), entry) {
            // The worker removes stale entries first; a live one here is a bug
            debug_assert!(!previous.is_live(), "replaced a live session");
        }
    }

    /// Removes the entry only if it still belongs to `session_id`.
    pub(crate) fn remove_session(&self, source_id: &str, session_id: Uuid) -> bool {
        self.entries
            .remove_if(source_id, |_, entry| entry.session().id() == session_id)
            .is_some()
    }

    /// Subscriber count for a live session, `None` if there is none.
    #[must_use]
    pub fn refcount(&self, source_id: &str) -> Option<usize> {
        self.entries
            .get(source_id)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.refcount())
    }

    /// The live session for `source_id`, if any.
    #[must_use]
    pub fn session(&self, source_id: &str) -> Option<Arc<DecodeSession>> {
        self.entries
            .get(source_id)
            .filter(|entry| entry.is_live())
            .map(|entry| Arc::clone(entry.session()))
    }

    /// Source ids with a live session, sorted.
    #[must_use]
    pub fn active_sources(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|r| r.value().is_live())
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered entries, including ones awaiting removal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
