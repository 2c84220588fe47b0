//! Inverted landmark index.
//!
//! Two maps share one lifecycle: `hash -> postings` and `track_id -> track`.
//! Postings carry a compact numeric handle into the track table instead of
//! the string id, so the hot lookup path never touches strings. Handles are
//! never reused; a forgotten track leaves a tombstone slot behind.
//!
//! One `RwLock` guards both maps. `add_track` and `forget` take the write
//! side for the duration of one track's merge, so readers either see all of
//! a track's postings or none of them.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::fingerprint::{Landmark, LandmarkHash};

pub mod store;

pub use store::SqliteStore;

/// Compact numeric handle for a track inside one index instance.
pub type TrackHandle = u32;

/// One indexed recording plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    /// Stable opaque identifier, typically a content digest of the source
    /// file.
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub path: String,
    pub duration_s: f64,
    pub num_peaks: u64,
    pub num_hashes: u64,
}

/// One `(track, anchor_time)` occurrence of a landmark hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub track: TrackHandle,
    pub anchor_time: u32,
}

/// Index-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub n_tracks: u64,
    pub n_postings: u64,
    pub n_unique_hashes: u64,
}

#[derive(Default)]
struct IndexInner {
    postings: HashMap<LandmarkHash, Vec<Posting>>,
    /// Handle -> track record; `None` marks a forgotten track's slot.
    handles: Vec<Option<Track>>,
    ids: HashMap<String, TrackHandle>,
    n_postings: u64,
}

/// In-memory inverted index over landmark hashes.
#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<IndexInner>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, IndexInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, IndexInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a track and all of its postings atomically.
    ///
    /// Rejects an already-present `track_id` without touching the index.
    /// A track with an empty landmark list is legal and stays visible in
    /// [`list_tracks`](Self::list_tracks) with zero postings.
    pub fn add_track(&self, track: Track, landmarks: &[Landmark]) -> Result<()> {
        let mut inner = self.write_inner();
        if inner.ids.contains_key(&track.track_id) {
            return Err(EngineError::DuplicateTrack(track.track_id));
        }

        let handle = inner.handles.len() as TrackHandle;
        inner.ids.insert(track.track_id.clone(), handle);
        inner.handles.push(Some(track));

        for lm in landmarks {
            inner.postings.entry(lm.hash).or_default().push(Posting {
                track: handle,
                anchor_time: lm.anchor_time,
            });
        }
        inner.n_postings += landmarks.len() as u64;
        Ok(())
    }

    /// Remove a track and every posting that references it. Idempotent;
    /// returns whether the track existed.
    pub fn forget(&self, track_id: &str) -> bool {
        let mut inner = self.write_inner();
        let Some(handle) = inner.ids.remove(track_id) else {
            return false;
        };
        inner.handles[handle as usize] = None;

        let mut removed = 0u64;
        inner.postings.retain(|_, list| {
            let before = list.len();
            list.retain(|p| p.track != handle);
            removed += (before - list.len()) as u64;
            !list.is_empty()
        });
        inner.n_postings -= removed;
        true
    }

    /// All postings for a hash, in unspecified order.
    pub fn lookup(&self, hash: LandmarkHash) -> Vec<Posting> {
        self.lookup_capped(hash, usize::MAX)
    }

    /// At most `limit` postings for a hash. The matcher uses this to bound
    /// the cost of hashes shared by very many tracks.
    pub fn lookup_capped(&self, hash: LandmarkHash, limit: usize) -> Vec<Posting> {
        let inner = self.read_inner();
        match inner.postings.get(&hash) {
            Some(list) => list.iter().take(limit).copied().collect(),
            None => Vec::new(),
        }
    }

    pub fn get_track(&self, track_id: &str) -> Option<Track> {
        let inner = self.read_inner();
        let handle = *inner.ids.get(track_id)?;
        inner.handles[handle as usize].clone()
    }

    /// Resolve a posting's handle back to its track record. `None` when the
    /// track was forgotten after the posting was read.
    pub fn track_by_handle(&self, handle: TrackHandle) -> Option<Track> {
        let inner = self.read_inner();
        inner.handles.get(handle as usize)?.clone()
    }

    /// Snapshot of all live track records.
    pub fn list_tracks(&self) -> Vec<Track> {
        let inner = self.read_inner();
        inner.handles.iter().flatten().cloned().collect()
    }

    pub fn stats(&self) -> IndexStats {
        let inner = self.read_inner();
        IndexStats {
            n_tracks: inner.ids.len() as u64,
            n_postings: inner.n_postings,
            n_unique_hashes: inner.postings.len() as u64,
        }
    }
}
