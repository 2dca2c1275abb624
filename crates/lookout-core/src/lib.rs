//! lookout-core — Face gallery management and open-set matching.
//!
//! Keeps a persisted gallery of labeled face images, turns it into
//! embeddings through a pluggable [`FaceAnalyzer`], and classifies query
//! embeddings by Euclidean nearest neighbour with a rejection threshold.

pub mod analyzer;
pub mod gallery;
pub mod image_ref;
pub mod matcher;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use gallery::{build_gallery, GalleryEntry};
pub use image_ref::{ImageRef, ImageRefError};
pub use matcher::{FaceMatcher, MatchError, MatchLabel, MatchResult, DEFAULT_MATCH_THRESHOLD};
pub use store::{
    FileBackend, GalleryStore, Identity, MemoryBackend, MigrationReport, StoreBackend, StoreError,
};
pub use types::{BoundingBox, DetectedFace, Embedding, Frame};
