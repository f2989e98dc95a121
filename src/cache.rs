use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CacheError;
use crate::models::{CacheState, UsageEvent};

/// File-backed usage-event cache with a sync watermark.
///
/// The watermark is the raw timestamp string of the newest event ever
/// stored. Events arrive newest-first from the dashboard, so a fetch can
/// stop paging as soon as it sees a timestamp at or below the watermark,
/// and `append` only ever receives events newer than the cache holds.
///
/// Timestamps are 13-digit decimal millisecond strings, so lexicographic
/// comparison matches numeric comparison and the watermark can stay a
/// plain string.
#[derive(Clone)]
pub struct UsageCache {
    path: PathBuf,
    inner: Arc<Mutex<CacheState>>,
}

impl UsageCache {
    pub fn load(path: PathBuf) -> Self {
        let state = Self::load_from_disk(&path).unwrap_or_default();
        Self {
            path,
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn load_from_disk(path: &Path) -> Option<CacheState> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn persist(&self, state: &CacheState) -> Result<(), CacheError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn watermark(&self) -> Option<String> {
        self.inner.lock().watermark.clone()
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.inner.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    /// Merge freshly fetched events into the cache, write through, and
    /// return the merged set newest-first.
    ///
    /// `new_events` must be newest-first as fetched. An empty slice is a
    /// no-op: no write happens and the prior set comes back unchanged, so
    /// the call is cheap to make speculatively.
    pub fn append(
        &self,
        new_events: &[UsageEvent],
        retention_days: u32,
        now_ms: u64,
    ) -> Result<Vec<UsageEvent>, CacheError> {
        let mut state = self.inner.lock();
        if new_events.is_empty() {
            return Ok(state.events.clone());
        }

        // Full-event identity: two rows are duplicates only when every
        // field matches, so a re-priced event with the same timestamp is
        // kept as its own row.
        let mut seen: HashSet<String> =
            HashSet::with_capacity(state.events.len() + new_events.len());
        let mut merged: Vec<UsageEvent> =
            Vec::with_capacity(state.events.len() + new_events.len());
        for ev in new_events.iter().chain(state.events.iter()) {
            let key = serde_json::to_string(ev)?;
            if seen.insert(key) {
                merged.push(ev.clone());
            }
        }

        let cutoff = now_ms.saturating_sub(retention_days as u64 * 86_400_000);
        // Events with unparseable timestamps are never aged out; losing
        // them silently would make the spend totals drift.
        merged.retain(|ev| ev.occurred_at_ms().map_or(true, |ts| ts >= cutoff));

        // Newest first. Unparseable timestamps sort as oldest.
        merged.sort_by_key(|ev| Reverse(ev.occurred_at_ms().unwrap_or(0)));

        state.watermark = new_events
            .first()
            .map(|ev| ev.timestamp.clone())
            .or_else(|| state.watermark.clone());
        state.events = merged;

        self.persist(&state)?;
        Ok(state.events.clone())
    }

    /// Replace the whole cache, used for cold-start priming. Persists
    /// unconditionally.
    pub fn replace(
        &self,
        mut events: Vec<UsageEvent>,
        watermark: Option<String>,
    ) -> Result<(), CacheError> {
        events.sort_by_key(|ev| Reverse(ev.occurred_at_ms().unwrap_or(0)));
        let mut state = self.inner.lock();
        state.events = events;
        state.watermark = watermark;
        self.persist(&state)
    }

    /// Drop everything, used on sign-out.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.replace(Vec::new(), None)
    }
}
