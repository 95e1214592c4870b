//! Per-handle chunk sessions.
//!
//! Sessions live in a concurrent map keyed by handle. Each entry is an
//! `Arc<SessionSlot>` with its own async mutex, so work on one handle never
//! waits for another. Callers clone the `Arc` out of the map before locking
//! and never hold a map guard across an `.await`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::reassembly::ChunkReassembler;
use crate::protocol::{ChunkEnvelope, StatusCode};

/// What a handle is currently doing.
#[derive(Debug)]
pub(crate) enum SessionState {
    /// Receiving request chunks.
    Inbound(ChunkReassembler),
    /// Serving reply fragments to pulls.
    Outbound {
        fragments: Vec<ChunkEnvelope>,
        next: u32,
        status: StatusCode,
    },
    /// A complete message is being dispatched; the slot holds its place
    /// under the session cap until the reply is known.
    Dispatching,
    /// Finished or aborted; the slot is (or is about to be) out of the map.
    Closed,
}

#[derive(Debug)]
pub(crate) struct SessionSlot {
    touched: AtomicU64,
    pub(crate) state: Mutex<SessionState>,
}

impl SessionSlot {
    fn new(state: SessionState, now: u64) -> Self {
        Self {
            touched: AtomicU64::new(now),
            state: Mutex::new(state),
        }
    }
}

/// Why a session could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenError {
    /// The handle already has a live session.
    InUse,
    /// The table is at capacity.
    Full,
}

pub(crate) struct SessionTable {
    sessions: DashMap<u64, Arc<SessionSlot>>,
    // Reserved slots; counts a session before it lands in the map.
    reserved: AtomicUsize,
    epoch: Instant,
    ttl_millis: u64,
    max_sessions: usize,
}

impl SessionTable {
    pub(crate) fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
            epoch: Instant::now(),
            ttl_millis: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            max_sessions,
        }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn is_expired(&self, slot: &SessionSlot, now: u64) -> bool {
        now.saturating_sub(slot.touched.load(Ordering::Acquire)) > self.ttl_millis
    }

    /// Mark `slot` as active now.
    pub(crate) fn touch(&self, slot: &SessionSlot) {
        slot.touched.store(self.now(), Ordering::Release);
    }

    /// Insert a new session for `handle`, counted against the session cap.
    pub(crate) fn open(
        &self,
        handle: u64,
        state: SessionState,
    ) -> Result<Arc<SessionSlot>, OpenError> {
        let max = self.max_sessions;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| OpenError::Full)?;

        match self.sessions.entry(handle) {
            Entry::Occupied(_) => {
                self.release(1);
                Err(OpenError::InUse)
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(SessionSlot::new(state, self.now()));
                vacant.insert(slot.clone());
                Ok(slot)
            }
        }
    }

    fn release(&self, count: usize) {
        if count > 0 {
            self.reserved.fetch_sub(count, Ordering::AcqRel);
        }
    }

    /// Session for `handle`, if live and not expired.
    pub(crate) fn get(&self, handle: u64) -> Option<Arc<SessionSlot>> {
        let slot = self.sessions.get(&handle).map(|entry| entry.value().clone())?;
        if self.is_expired(&slot, self.now()) {
            if let Ok(mut state) = slot.state.try_lock() {
                *state = SessionState::Closed;
                drop(state);
                self.remove(handle, &slot);
                return None;
            }
        }
        Some(slot)
    }

    /// Whether `handle` has a session (expired or not).
    pub(crate) fn contains(&self, handle: u64) -> bool {
        self.sessions.contains_key(&handle)
    }

    /// Remove `handle` only if it still maps to `slot`.
    pub(crate) fn remove(&self, handle: u64, slot: &Arc<SessionSlot>) -> bool {
        let removed = self
            .sessions
            .remove_if(&handle, |_, current| Arc::ptr_eq(current, slot))
            .is_some();
        self.release(usize::from(removed));
        removed
    }

    /// Remove `handle` unconditionally.
    pub(crate) fn abort(&self, handle: u64) -> bool {
        let removed = self.sessions.remove(&handle).is_some();
        self.release(usize::from(removed));
        removed
    }

    /// Drop expired sessions that are not in the middle of a dispatch.
    ///
    /// Returns how many were dropped.
    pub(crate) fn sweep(&self) -> usize {
        let now = self.now();
        let mut dropped = 0;

        self.sessions.retain(|handle, slot| {
            if !self.is_expired(slot, now) {
                return true;
            }
            match slot.state.try_lock() {
                Ok(mut state) => {
                    tracing::warn!(handle = *handle, "Chunk session expired");
                    *state = SessionState::Closed;
                    dropped += 1;
                    false
                }
                // Busy with a dispatch.
                Err(_) => true,
            }
        });

        self.release(dropped);
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}
