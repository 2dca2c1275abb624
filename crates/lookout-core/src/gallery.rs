//! Gallery construction: per-identity embeddings from stored images.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::image_ref::{ImageRef, ImageRefError};
use crate::store::Identity;
use crate::types::{Embedding, Frame};
use thiserror::Error;

/// Labeled embeddings for one identity. Rebuilt every session, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

/// Why a single gallery image produced no embedding.
#[derive(Error, Debug)]
enum ExtractionFailure {
    #[error("unreadable image reference: {0}")]
    Reference(#[from] ImageRefError),
    #[error("undecodable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error("no face detected")]
    NoFace,
    #[error("embedding has dimension {got}, gallery uses {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Build the matching gallery from stored identities.
///
/// Every image is processed independently: an image that cannot be read,
/// decoded, or that contains no face is skipped and logged. Identities left
/// without a single embedding are omitted from the result, so the caller
/// sees an empty gallery when nothing usable was found.
pub fn build_gallery(identities: &[Identity], analyzer: &dyn FaceAnalyzer) -> Vec<GalleryEntry> {
    let mut gallery = Vec::with_capacity(identities.len());
    let mut dim: Option<usize> = None;
    let mut skipped = 0usize;

    for identity in identities {
        let mut embeddings = Vec::with_capacity(identity.images.len());

        for (idx, image) in identity.images.iter().enumerate() {
            match extract(image, analyzer, dim) {
                Ok(embedding) => {
                    dim.get_or_insert(embedding.dim());
                    embeddings.push(embedding);
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        label = %identity.label,
                        image = idx,
                        reference = %image.short(),
                        error = %e,
                        "skipping gallery image"
                    );
                }
            }
        }

        if embeddings.is_empty() {
            tracing::warn!(label = %identity.label, "identity has no usable images; excluded from gallery");
            continue;
        }

        tracing::debug!(label = %identity.label, embeddings = embeddings.len(), "gallery entry built");
        gallery.push(GalleryEntry {
            label: identity.label.clone(),
            embeddings,
        });
    }

    tracing::info!(
        identities = identities.len(),
        entries = gallery.len(),
        skipped_images = skipped,
        "gallery built"
    );

    gallery
}

/// Extract the embedding of the most confident face in one stored image.
fn extract(
    image: &ImageRef,
    analyzer: &dyn FaceAnalyzer,
    expected_dim: Option<usize>,
) -> Result<Embedding, ExtractionFailure> {
    let bytes = image.load_bytes()?;
    let frame = Frame::decode(&bytes)?;
    let faces = analyzer.analyze(&frame)?;

    let best = faces
        .into_iter()
        .max_by(|a, b| {
            a.bbox
                .confidence
                .partial_cmp(&b.bbox.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or(ExtractionFailure::NoFace)?;

    match expected_dim {
        Some(expected) if best.embedding.dim() != expected => Err(ExtractionFailure::DimensionMismatch {
            expected,
            got: best.embedding.dim(),
        }),
        _ => Ok(best.embedding),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, DetectedFace};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// Test analyzer keyed on the colour of the top-left pixel:
    /// red channel 0 means "no face", otherwise the RGB triple becomes the embedding.
    /// A green channel of 255 adds a second, more confident face.
    struct ColorAnalyzer;

    impl FaceAnalyzer for ColorAnalyzer {
        fn analyze(&self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let [r, g, b] = [frame.data[0], frame.data[1], frame.data[2]];
            if r == 0 {
                return Ok(Vec::new());
            }
            let face = |values: Vec<f32>, confidence: f32| DetectedFace {
                bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence },
                embedding: Embedding::new(values),
            };
            let mut faces = vec![face(vec![r as f32, g as f32, b as f32], 0.6)];
            if g == 255 {
                faces.push(face(vec![-1.0, -1.0, -1.0], 0.9));
            }
            Ok(faces)
        }
    }

    fn png_ref(rgb: [u8; 3]) -> ImageRef {
        let img = RgbImage::from_pixel(2, 2, Rgb(rgb));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        ImageRef::from_bytes(&buf, "image/png")
    }

    fn identity(label: &str, images: Vec<ImageRef>) -> Identity {
        Identity { label: label.into(), images }
    }

    #[test]
    fn test_build_counts_only_identities_with_embeddings() {
        let identities = vec![
            identity("alice", vec![png_ref([1, 0, 0]), png_ref([2, 0, 0])]),
            identity("bob", vec![png_ref([0, 9, 9])]),
            identity("carol", vec![ImageRef::new("data:image/png;base64,AAAA"), png_ref([3, 0, 0])]),
            identity("dave", vec![ImageRef::new("data:image/png;base64,%%%")]),
        ];

        let gallery = build_gallery(&identities, &ColorAnalyzer);
        let labels: Vec<_> = gallery.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["alice", "carol"]);
        assert_eq!(gallery[0].embeddings.len(), 2);
        assert_eq!(gallery[1].embeddings, vec![Embedding::new(vec![3.0, 0.0, 0.0])]);
    }

    #[test]
    fn test_build_empty_when_nothing_extractable() {
        let identities = vec![identity("ghost", vec![png_ref([0, 0, 0])])];
        assert!(build_gallery(&identities, &ColorAnalyzer).is_empty());
        assert!(build_gallery(&[], &ColorAnalyzer).is_empty());
    }

    #[test]
    fn test_build_prefers_most_confident_face() {
        let identities = vec![identity("group", vec![png_ref([5, 255, 0])])];
        let gallery = build_gallery(&identities, &ColorAnalyzer);
        assert_eq!(gallery[0].embeddings, vec![Embedding::new(vec![-1.0, -1.0, -1.0])]);
    }

    #[test]
    fn test_build_tolerates_analyzer_errors() {
        struct Flaky;
        impl FaceAnalyzer for Flaky {
            fn analyze(&self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
                if frame.data[0] == 1 {
                    return Err(AnalyzerError::InferenceFailed("boom".into()));
                }
                ColorAnalyzer.analyze(frame)
            }
        }

        let identities = vec![identity("erin", vec![png_ref([1, 0, 0]), png_ref([7, 0, 0])])];
        let gallery = build_gallery(&identities, &Flaky);
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].embeddings, vec![Embedding::new(vec![7.0, 0.0, 0.0])]);
    }

    #[test]
    fn test_build_skips_mismatched_dimensions() {
        struct Ragged;
        impl FaceAnalyzer for Ragged {
            fn analyze(&self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
                let len = frame.data[0] as usize;
                Ok(vec![DetectedFace {
                    bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0 },
                    embedding: Embedding::new(vec![0.5; len]),
                }])
            }
        }

        let identities = vec![
            identity("first", vec![png_ref([4, 0, 0])]),
            identity("second", vec![png_ref([3, 0, 0])]),
        ];
        let gallery = build_gallery(&identities, &Ragged);
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].label, "first");
    }
}
