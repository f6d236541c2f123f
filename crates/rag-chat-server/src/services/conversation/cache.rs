use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use crate::config::ConversationConfig;
use crate::models::chat::SessionId;
use super::error::ConversationError;
use super::types::ConversationState;

/// Exclusive handle on one session's state. Holding the lock serializes
/// queries of that session.
pub type SessionHandle = Arc<Mutex<ConversationState>>;

struct SessionEntry {
    state: SessionHandle,
    last_access: parking_lot::Mutex<Instant>,
    /// Set once the first exchange is committed
    live: AtomicBool,
}

impl SessionEntry {
    fn new(session_id: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConversationState::new(session_id.to_string()))),
            last_access: parking_lot::Mutex::new(Instant::now()),
            live: AtomicBool::new(false),
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// One query's claim on a session, from [`ConversationCache::lease`]
pub struct SessionLease {
    entry: Arc<SessionEntry>,
}

impl SessionLease {
    pub fn handle(&self) -> &SessionHandle {
        &self.entry.state
    }

    /// True until the session's first exchange is committed
    pub fn is_pending(&self) -> bool {
        !self.entry.is_live()
    }
}

/// Result of [`ConversationCache::activate`]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Activation {
    /// True when this call made the session live
    pub created: bool,
    /// Session dropped to make room, if any
    pub evicted: Option<SessionId>,
}

/// Thread-safe in-memory session store
/// Uses DashMap for lock-free concurrent access
///
/// A session id seen for the first time is pending: invisible to [`get`]
/// and outside `max_sessions` until its first exchange commits.
///
/// [`get`]: ConversationCache::get
#[derive(Clone)]
pub struct ConversationCache {
    storage: Arc<DashMap<SessionId, Arc<SessionEntry>>>,

    /// System info for RAM monitoring
    system: Arc<parking_lot::Mutex<System>>,

    ttl: Duration,
    max_sessions: usize,
    max_memory_usage_percent: f64,
}

impl ConversationCache {
    pub fn new(ttl: Duration, max_sessions: usize, max_memory_usage_percent: f64) -> Self {
        info!(
            "Initializing conversation cache: ttl={:?}, max_sessions={}, memory_limit={}%",
            ttl, max_sessions, max_memory_usage_percent
        );
        Self {
            storage: Arc::new(DashMap::new()),
            system: Arc::new(parking_lot::Mutex::new(System::new())),
            ttl,
            max_sessions: max_sessions.max(1),
            max_memory_usage_percent,
        }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::new(
            Duration::from_secs(config.session_ttl_seconds),
            config.max_sessions,
            config.max_memory_usage_percent,
        )
    }

    /// Entry for `session_id` unless missing or idle past the TTL
    fn lookup(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        let entry = self.storage.get(session_id)?.value().clone();

        // Lazy deletion
        if entry.idle_for() > self.ttl {
            self.storage.remove_if(session_id, |_, current| Arc::ptr_eq(current, &entry));
            debug!("Session {} expired, removed from cache", session_id);
            return None;
        }

        Some(entry)
    }

    /// Get a live session, refreshing its idle timer.
    /// Returns None if not found, expired or still pending.
    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        let entry = self.lookup(session_id).filter(|entry| entry.is_live())?;
        entry.touch();
        Some(entry.state.clone())
    }

    /// Claim the session for one query, registering it as pending on first use
    pub fn lease(&self, session_id: &str) -> Result<SessionLease, ConversationError> {
        if let Some(entry) = self.lookup(session_id) {
            entry.touch();
            return Ok(SessionLease { entry });
        }

        if !self.can_create_new_session() {
            return Err(ConversationError::Capacity(
                "Memory limit reached, cannot create new session".to_string(),
            ));
        }

        let entry = self
            .storage
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionEntry::new(session_id)))
            .value()
            .clone();

        entry.touch();
        Ok(SessionLease { entry })
    }

    /// Make the leased session live after an exchange was committed to it,
    /// evicting the least recently used live session past `max_sessions`.
    ///
    /// `max_sessions` is a soft cap: the count and the eviction are not one
    /// atomic step, so concurrent activations can briefly overshoot it.
    pub fn activate(&self, session_id: &str, lease: &SessionLease) -> Activation {
        lease.entry.touch();

        // Reattach if a sweep dropped the entry while the query ran
        self.storage
            .entry(session_id.to_string())
            .or_insert_with(|| lease.entry.clone());

        if lease.entry.live.swap(true, Ordering::AcqRel) {
            return Activation::default();
        }
        debug!("Session {} is live", session_id);

        let evicted = if self.len() > self.max_sessions {
            self.evict_least_recent(session_id)
        } else {
            None
        };

        Activation {
            created: true,
            evicted,
        }
    }

    /// Forget a pending session whose query failed, unless another query
    /// still holds a lease on it
    pub fn release(&self, session_id: &str, lease: SessionLease) {
        if !lease.is_pending() {
            return;
        }
        let removed = self.storage.remove_if(session_id, |_, current| {
            Arc::ptr_eq(current, &lease.entry) && Arc::strong_count(current) == 2 && !current.is_live()
        });
        if removed.is_some() {
            debug!("Dropped pending session {}", session_id);
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.storage.remove(session_id).is_some()
    }

    /// Get number of live sessions
    pub fn len(&self) -> usize {
        self.storage.iter().filter(|entry| entry.value().is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the memory guard. A limit of 100% or more disables it.
    pub fn can_create_new_session(&self) -> bool {
        if self.max_memory_usage_percent >= 100.0 {
            return true;
        }

        let mut sys = self.system.lock();
        sys.refresh_memory();

        let total_memory = sys.total_memory();
        if total_memory == 0 {
            return true;
        }
        let used_memory = sys.used_memory();
        let usage_percent = (used_memory as f64 / total_memory as f64) * 100.0;

        if usage_percent >= self.max_memory_usage_percent {
            warn!(
                "Memory usage at {:.2}% (used: {} MB, total: {} MB), rejecting new session",
                usage_percent,
                used_memory / 1024 / 1024,
                total_memory / 1024 / 1024
            );
            return false;
        }

        true
    }

    /// Drop the live session idle the longest, other than `keep`
    fn evict_least_recent(&self, keep: &str) -> Option<SessionId> {
        let oldest = self
            .storage
            .iter()
            .filter(|entry| entry.key() != keep && entry.value().is_live())
            .max_by_key(|entry| entry.value().idle_for())
            .map(|entry| entry.key().clone())?;

        self.storage.remove(&oldest);
        info!("Session cache full ({}), evicted session {}", self.max_sessions, oldest);
        Some(oldest)
    }

    /// Remove every session idle past the TTL.
    /// Returns number of sessions removed
    pub fn cleanup_expired(&self) -> usize {
        let start_len = self.storage.len();
        let ttl = self.ttl;
        self.storage.retain(|_, entry| entry.idle_for() <= ttl);
        let count = start_len.saturating_sub(self.storage.len());

        if count > 0 {
            info!("Cleaned up {} expired sessions", count);
        }

        count
    }

    /// Get cache statistics for monitoring
    pub fn stats(&self) -> CacheStats {
        let active_sessions = self.len();
        let pending_sessions = self.storage.len().saturating_sub(active_sessions);

        let mut sys = self.system.lock();
        sys.refresh_memory();
        let total = sys.total_memory();

        CacheStats {
            active_sessions,
            pending_sessions,
            memory_usage_mb: sys.used_memory() / 1024 / 1024,
            memory_total_mb: total / 1024 / 1024,
            memory_usage_percent: if total == 0 {
                0.0
            } else {
                (sys.used_memory() as f64 / total as f64) * 100.0
            },
        }
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::from_config(&ConversationConfig::default())
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub active_sessions: usize,
    /// Sessions whose first query is still running
    pub pending_sessions: usize,
    pub memory_usage_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f64,
}
