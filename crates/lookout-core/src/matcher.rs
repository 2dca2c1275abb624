//! Open-set nearest-neighbour matching over a gallery snapshot.

use crate::gallery::GalleryEntry;
use crate::types::Embedding;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Maximum Euclidean distance accepted as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("threshold must be positive and finite, got {0}")]
    InvalidThreshold(f32),
    #[error("gallery mixes embedding dimensions {expected} and {got}")]
    MixedDimensions { expected: usize, got: usize },
    #[error("query has dimension {got}, gallery uses {expected}")]
    QueryDimension { expected: usize, got: usize },
}

/// Outcome label of a match: an enrolled identity, or open-set rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchLabel {
    Known(String),
    Unknown,
}

impl MatchLabel {
    pub fn is_known(&self) -> bool {
        matches!(self, MatchLabel::Known(_))
    }
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLabel::Known(label) => f.write_str(label),
            MatchLabel::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for MatchLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of matching one query embedding against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub label: MatchLabel,
    /// Euclidean distance to the nearest stored embedding.
    pub distance: f32,
    /// Present only for known labels, in [0, 100].
    pub confidence_percent: Option<u8>,
}

/// Euclidean nearest-neighbour matcher with a rejection threshold.
///
/// The gallery is flattened once at construction into `(label, embedding)`
/// pairs; lookups always scan every pair and keep the first strict minimum,
/// so ties resolve to the earliest gallery position.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    entries: Vec<(String, Embedding)>,
    threshold: f32,
    dim: Option<usize>,
}

impl FaceMatcher {
    pub fn new(gallery: &[GalleryEntry], threshold: f32) -> Result<Self, MatchError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MatchError::InvalidThreshold(threshold));
        }

        let mut dim = None;
        let mut entries = Vec::new();
        for entry in gallery {
            for embedding in &entry.embeddings {
                let expected = *dim.get_or_insert(embedding.dim());
                if embedding.dim() != expected {
                    return Err(MatchError::MixedDimensions {
                        expected,
                        got: embedding.dim(),
                    });
                }
                entries.push((entry.label.clone(), embedding.clone()));
            }
        }

        Ok(Self {
            entries,
            threshold,
            dim,
        })
    }

    pub fn with_default_threshold(gallery: &[GalleryEntry]) -> Result<Self, MatchError> {
        Self::new(gallery, DEFAULT_MATCH_THRESHOLD)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Number of stored embeddings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify `query` against the gallery.
    ///
    /// An empty matcher always answers `Unknown` at infinite distance.
    pub fn best_match(&self, query: &Embedding) -> Result<MatchResult, MatchError> {
        if let Some(expected) = self.dim {
            if query.dim() != expected {
                return Err(MatchError::QueryDimension {
                    expected,
                    got: query.dim(),
                });
            }
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, (_, embedding)) in self.entries.iter().enumerate() {
            let dist = query.euclidean_distance(embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        Ok(match best_idx {
            Some(idx) if best_dist <= self.threshold => MatchResult {
                label: MatchLabel::Known(self.entries[idx].0.clone()),
                distance: best_dist,
                confidence_percent: Some(confidence_percent(best_dist, self.threshold)),
            },
            _ => MatchResult {
                label: MatchLabel::Unknown,
                distance: best_dist,
                confidence_percent: None,
            },
        })
    }
}

/// Map a within-threshold distance to a 0–100 score; 0 distance is 100%.
fn confidence_percent(distance: f32, threshold: f32) -> u8 {
    ((1.0 - distance / threshold) * 100.0).round().clamp(0.0, 100.0) as u8
}
