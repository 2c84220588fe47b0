//! The engine ties configuration, the in-memory index and the optional
//! durable store together. Everything takes the engine as an explicit
//! parameter; there is no process-wide instance.

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::audio;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fingerprint::Landmark;
use crate::index::{IndexStats, MemoryIndex, SqliteStore, Track};
use crate::matcher::{self, MatchCandidate, MatchOptions};

/// Outcome of fingerprinting and matching one query clip.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub matches: Vec<MatchCandidate>,
    pub query_duration_s: f64,
    pub query_landmarks: usize,
}

pub struct Engine {
    config: EngineConfig,
    index: MemoryIndex,
    store: Option<SqliteStore>,
}

impl Engine {
    /// Purely in-memory engine.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            index: MemoryIndex::new(),
            store: None,
        }
    }

    /// Engine that writes through to a SQLite store.
    pub fn with_store(config: EngineConfig, store: SqliteStore) -> Self {
        Self {
            config,
            index: MemoryIndex::new(),
            store: Some(store),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &MemoryIndex {
        &self.index
    }

    /// Replay the durable store into memory. No-op without a store.
    pub async fn load_from_store(&self) -> Result<u64> {
        match &self.store {
            Some(store) => store.load_into(&self.index).await,
            None => Ok(0),
        }
    }

    /// Insert a track atomically: the durable write happens first, then the
    /// in-memory commit. A failure on either side leaves the index without
    /// the track.
    pub async fn add_track(&self, track: Track, landmarks: &[Landmark]) -> Result<()> {
        if self.index.get_track(&track.track_id).is_some() {
            return Err(EngineError::DuplicateTrack(track.track_id));
        }

        let track_id = track.track_id.clone();
        if let Some(store) = &self.store {
            store.save_track(&track, landmarks).await?;
        }

        if let Err(e) = self.index.add_track(track, landmarks) {
            // Lost the race to a concurrent writer; back the durable copy out
            // so both sides agree.
            if let Some(store) = &self.store {
                let _ = store.delete_track(&track_id).await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Fingerprint one audio file and add it under a content-derived id.
    pub async fn index_file(&self, path: &Path) -> Result<Track> {
        let bytes = tokio::fs::read(path).await?;
        let track_id = content_id(&bytes);
        if self.index.get_track(&track_id).is_some() {
            return Err(EngineError::DuplicateTrack(track_id));
        }

        let config = self.config.clone();
        let print = tokio::task::spawn_blocking(move || audio::fingerprint_bytes(&bytes, &config))
            .await
            .map_err(|e| EngineError::ResourceExhausted(e.to_string()))??;

        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let track = Track {
            track_id,
            title,
            artist: String::new(),
            path: path.display().to_string(),
            duration_s: print.duration_s,
            num_peaks: print.num_peaks,
            num_hashes: print.landmarks.len() as u64,
        };

        self.add_track(track.clone(), &print.landmarks).await?;
        Ok(track)
    }

    /// Fingerprint a query clip and rank it against the index.
    ///
    /// A clip too short or too quiet to fingerprint returns an empty report
    /// rather than an error.
    pub fn search_bytes(&self, bytes: &[u8], k: usize, opts: &MatchOptions) -> Result<SearchReport> {
        let print = match audio::fingerprint_bytes(bytes, &self.config) {
            Ok(print) => print,
            Err(EngineError::EmptyFingerprint) => {
                return Ok(SearchReport {
                    matches: Vec::new(),
                    query_duration_s: 0.0,
                    query_landmarks: 0,
                })
            }
            Err(e) => return Err(e),
        };

        let matches = matcher::match_landmarks(&self.index, &print.landmarks, k, &self.config, opts);
        Ok(SearchReport {
            matches,
            query_duration_s: print.duration_s,
            query_landmarks: print.landmarks.len(),
        })
    }

    /// Same as [`search_bytes`](Self::search_bytes) for already-decoded PCM.
    pub fn search_pcm(
        &self,
        samples: &[f32],
        channels: usize,
        source_rate: u32,
        k: usize,
        opts: &MatchOptions,
    ) -> Result<SearchReport> {
        let print = match audio::fingerprint_pcm(samples, channels, source_rate, &self.config) {
            Ok(print) => print,
            Err(EngineError::EmptyFingerprint) => {
                return Ok(SearchReport {
                    matches: Vec::new(),
                    query_duration_s: 0.0,
                    query_landmarks: 0,
                })
            }
            Err(e) => return Err(e),
        };

        let matches = matcher::match_landmarks(&self.index, &print.landmarks, k, &self.config, opts);
        Ok(SearchReport {
            matches,
            query_duration_s: print.duration_s,
            query_landmarks: print.landmarks.len(),
        })
    }

    /// Drop a track and all of its postings. Returns whether it existed.
    pub async fn forget(&self, track_id: &str) -> Result<bool> {
        if let Some(store) = &self.store {
            store.delete_track(track_id).await?;
        }
        Ok(self.index.forget(track_id))
    }

    pub fn get_track(&self, track_id: &str) -> Option<Track> {
        self.index.get_track(track_id)
    }

    pub fn list_tracks(&self) -> Vec<Track> {
        self.index.list_tracks()
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }
}

/// Shared handle used by the pipeline and the HTTP layer.
pub type SharedEngine = Arc<Engine>;

/// Hex SHA-256 of the raw file bytes; the same content always indexes under
/// the same id.
pub fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
