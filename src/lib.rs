//! Landmark-based acoustic fingerprinting and matching.
//!
//! Audio flows through the same stages on the write and the read path:
//!
//! ```text
//! PCM -> spectrogram -> peaks -> landmark hashes -> index   (indexing)
//! PCM -> spectrogram -> peaks -> landmark hashes -> matcher (querying)
//! ```
//!
//! The [`Engine`] ties a configuration, an in-memory inverted index and an
//! optional SQLite store together; the binary in `main.rs` exposes it over
//! HTTP.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod server;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};

/// Audio file extensions accepted by the indexing pipeline.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg"];
