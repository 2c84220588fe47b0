//! Durable SQLite mirror of the index.
//!
//! Two relations: `tracks` keyed by `track_id` and `postings` with a
//! secondary index on `hash_value`, cascade-deleted with their track. The
//! in-memory index stays the read path; this store is written through on
//! insert and delete and replayed into memory at startup.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, SqlitePool};

use crate::error::{EngineError, Result};
use crate::fingerprint::Landmark;
use crate::index::{IndexStats, MemoryIndex, Track};

/// Postings per multi-row insert; amortizes statement overhead on bulk loads.
const POSTING_BATCH: usize = 1000;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) the database at `url`, e.g.
    /// `sqlite://fingerprints.db`, and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tracks (
                track_id    TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                artist      TEXT NOT NULL,
                path        TEXT NOT NULL,
                duration_s  REAL NOT NULL,
                num_peaks   INTEGER NOT NULL,
                num_hashes  INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS postings (
                hash_value  INTEGER NOT NULL,
                track_id    TEXT NOT NULL REFERENCES tracks(track_id) ON DELETE CASCADE,
                anchor_time INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_postings_hash ON postings(hash_value)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Persist one track and all of its postings in a single transaction.
    pub async fn save_track(&self, track: &Track, landmarks: &[Landmark]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO tracks (track_id, title, artist, path, duration_s, num_peaks, num_hashes)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&track.track_id)
        .bind(&track.title)
        .bind(&track.artist)
        .bind(&track.path)
        .bind(track.duration_s)
        .bind(track.num_peaks as i64)
        .bind(track.num_hashes as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                EngineError::DuplicateTrack(track.track_id.clone())
            }
            _ => EngineError::Storage(e),
        })?;

        for chunk in landmarks.chunks(POSTING_BATCH) {
            let mut builder =
                QueryBuilder::new("INSERT INTO postings (hash_value, track_id, anchor_time) ");
            builder.push_values(chunk, |mut row, lm| {
                row.push_bind(lm.hash as i64)
                    .push_bind(&track.track_id)
                    .push_bind(lm.anchor_time as i64);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a track; postings go with it via the cascade. Returns whether
    /// the track existed.
    pub async fn delete_track(&self, track_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tracks WHERE track_id = ?")
            .bind(track_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replay every stored track into an in-memory index. Returns the number
    /// of tracks loaded.
    pub async fn load_into(&self, index: &MemoryIndex) -> Result<u64> {
        let tracks = sqlx::query(
            "SELECT track_id, title, artist, path, duration_s, num_peaks, num_hashes
             FROM tracks ORDER BY track_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut loaded = 0u64;
        for row in tracks {
            let track = Track {
                track_id: row.try_get("track_id")?,
                title: row.try_get("title")?,
                artist: row.try_get("artist")?,
                path: row.try_get("path")?,
                duration_s: row.try_get("duration_s")?,
                num_peaks: row.try_get::<i64, _>("num_peaks")? as u64,
                num_hashes: row.try_get::<i64, _>("num_hashes")? as u64,
            };

            let rows = sqlx::query(
                "SELECT hash_value, anchor_time FROM postings WHERE track_id = ?",
            )
            .bind(&track.track_id)
            .fetch_all(&self.pool)
            .await?;

            let mut landmarks = Vec::with_capacity(rows.len());
            for row in rows {
                landmarks.push(Landmark {
                    hash: row.try_get::<i64, _>("hash_value")? as u32,
                    anchor_time: row.try_get::<i64, _>("anchor_time")? as u32,
                });
            }

            if landmarks.len() as u64 != track.num_hashes {
                return Err(EngineError::CorruptIndex(format!(
                    "track {} stores {} postings but records num_hashes = {}",
                    track.track_id,
                    landmarks.len(),
                    track.num_hashes
                )));
            }

            index.add_track(track, &landmarks)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let n_tracks: i64 = sqlx::query("SELECT COUNT(*) FROM tracks")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        let n_postings: i64 = sqlx::query("SELECT COUNT(*) FROM postings")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        let n_unique_hashes: i64 = sqlx::query("SELECT COUNT(DISTINCT hash_value) FROM postings")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        Ok(IndexStats {
            n_tracks: n_tracks as u64,
            n_postings: n_postings as u64,
            n_unique_hashes: n_unique_hashes as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_url(name: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "soundmark-{}-{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        format!("sqlite://{}", path.display())
    }

    fn track(id: &str, num_hashes: u64) -> Track {
        Track {
            track_id: id.to_string(),
            title: format!("title {id}"),
            artist: "artist".to_string(),
            path: format!("/music/{id}.wav"),
            duration_s: 12.5,
            num_peaks: num_hashes,
            num_hashes,
        }
    }

    fn landmarks(count: u32) -> Vec<Landmark> {
        (0..count)
            .map(|i| Landmark {
                hash: 0x4000 + i,
                anchor_time: i,
            })
            .collect()
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let store = SqliteStore::connect(&temp_db_url("round-trip")).await.unwrap();
        let lms = landmarks(2500); // spans multiple insert batches
        store.save_track(&track("a", 2500), &lms).await.unwrap();

        let index = MemoryIndex::new();
        let loaded = store.load_into(&index).await.unwrap();
        assert_eq!(loaded, 1);

        let restored = index.get_track("a").unwrap();
        assert_eq!(restored, track("a", 2500));
        assert_eq!(index.stats().n_postings, 2500);
        assert_eq!(index.lookup(0x4000 + 17).len(), 1);
    }

    #[tokio::test]
    async fn duplicate_save_is_rejected() {
        let store = SqliteStore::connect(&temp_db_url("duplicate")).await.unwrap();
        store.save_track(&track("a", 0), &[]).await.unwrap();
        let err = store.save_track(&track("a", 0), &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTrack(id) if id == "a"));
    }

    #[tokio::test]
    async fn delete_cascades_to_postings() {
        let store = SqliteStore::connect(&temp_db_url("cascade")).await.unwrap();
        store.save_track(&track("a", 10), &landmarks(10)).await.unwrap();
        store.save_track(&track("b", 10), &landmarks(10)).await.unwrap();

        assert!(store.delete_track("a").await.unwrap());
        assert!(!store.delete_track("a").await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.n_tracks, 1);
        assert_eq!(stats.n_postings, 10);
    }
}
