//! Parallel batch indexing.
//!
//! Fans decode -> spectrogram -> peaks -> hashes out over a bounded number of
//! workers; every worker funnels into the shared index through
//! [`Engine::add_track`], which serializes the commit per track. Per-file
//! failures are recorded and never abort the batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use walkdir::WalkDir;

use crate::engine::SharedEngine;
use crate::error::EngineError;
use crate::SUPPORTED_EXTENSIONS;

/// What happened to one file.
#[derive(Debug, Clone)]
pub enum FileStatus {
    /// Added under this track id.
    Indexed(String),
    /// Not an error: too short, too quiet, or the batch was cancelled.
    Skipped(String),
    /// Decode failure, duplicate id, storage failure.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
}

/// Batch summary.
#[derive(Debug, Default)]
pub struct IndexingReport {
    pub indexed: u64,
    pub skipped: u64,
    pub errors: Vec<FileReport>,
}

/// Index a set of files with up to `concurrency` workers.
///
/// `cancel` is checked at every file boundary; a track whose commit already
/// began still completes, so cancellation never leaves half a track behind.
/// `progress` runs on the calling task after each completed file.
pub async fn index_paths<F>(
    engine: SharedEngine,
    paths: Vec<PathBuf>,
    concurrency: usize,
    cancel: Arc<AtomicBool>,
    mut progress: F,
) -> IndexingReport
where
    F: FnMut(usize, usize, &FileReport),
{
    let total = paths.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel::<FileReport>();

    for path in paths {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let status = if cancel.load(Ordering::Relaxed) {
                FileStatus::Skipped("cancelled".to_string())
            } else {
                match engine.index_file(&path).await {
                    Ok(track) => FileStatus::Indexed(track.track_id),
                    Err(EngineError::EmptyFingerprint) => {
                        FileStatus::Skipped("no fingerprint".to_string())
                    }
                    Err(e) => FileStatus::Failed(e.to_string()),
                }
            };
            let _ = tx.send(FileReport { path, status });
        });
    }
    drop(tx);

    let mut report = IndexingReport::default();
    let mut done = 0;
    while let Some(file) = rx.recv().await {
        done += 1;
        match &file.status {
            FileStatus::Indexed(_) => report.indexed += 1,
            FileStatus::Skipped(_) => report.skipped += 1,
            FileStatus::Failed(_) => report.errors.push(file.clone()),
        }
        progress(done, total, &file);
    }
    report
}

/// Enumerate supported audio files under a directory, sorted for stable
/// batch order.
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
