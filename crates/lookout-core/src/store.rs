//! Persisted gallery of labeled face images.
//!
//! The whole gallery lives in a single JSON document: an ordered array of
//! `{"label": ..., "images": [...]}` records. Older documents written one
//! image per record (`{"label": ..., "imageData": ...}`) are upgraded when
//! loaded. Labels are unique ignoring case, and an identity never exists
//! without at least one image.

use crate::image_ref::ImageRef;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("at least one image is required")]
    NoImages,
    #[error("identity index {index} out of range (gallery has {len})")]
    IdentityOutOfRange { index: usize, len: usize },
    #[error("image index {index} out of range for '{label}' ({len} images)")]
    ImageOutOfRange {
        label: String,
        index: usize,
        len: usize,
    },
    #[error("identity '{0}' has no images")]
    EmptyIdentity(String),
    #[error("duplicate label '{0}'")]
    DuplicateLabel(String),
}

/// A labeled set of face images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub label: String,
    pub images: Vec<ImageRef>,
}

impl Identity {
    fn has_label(&self, label: &str) -> bool {
        labels_match(&self.label, label)
    }
}

fn labels_match(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Every record shape the store has ever written.
///
/// Variant order matters: a record carrying both `images` and `imageData`
/// is read as the current shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current {
        #[serde(alias = "name")]
        label: String,
        images: Vec<ImageRef>,
    },
    Legacy {
        #[serde(alias = "name")]
        label: String,
        #[serde(rename = "imageData")]
        image_data: ImageRef,
    },
    Bare {
        #[serde(alias = "name")]
        label: String,
    },
}

/// What normalizing a persisted document changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Records present in the document.
    pub records: usize,
    /// Single-image records upgraded to the `images` form.
    pub legacy_upgraded: usize,
    /// Records folded into an earlier record with the same label.
    pub duplicates_merged: usize,
    /// Records dropped because they carried no images.
    pub dropped_empty: usize,
    /// Elements matching no known record shape.
    pub unrecognized: usize,
    /// The document could not be parsed at all and was treated as empty.
    pub corrupt: bool,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.legacy_upgraded == 0
            && self.duplicates_merged == 0
            && self.dropped_empty == 0
            && self.unrecognized == 0
            && !self.corrupt
    }
}

/// Normalize a persisted document into identities.
fn migrate_document(raw: &str) -> Result<(Vec<Identity>, MigrationReport), serde_json::Error> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    let mut report = MigrationReport {
        records: values.len(),
        ..Default::default()
    };
    let mut identities: Vec<Identity> = Vec::with_capacity(values.len());

    for (idx, value) in values.into_iter().enumerate() {
        let (label, images) = match serde_json::from_value::<StoredRecord>(value) {
            Ok(StoredRecord::Current { label, images }) => (label, images),
            Ok(StoredRecord::Legacy { label, image_data }) => {
                report.legacy_upgraded += 1;
                (label, vec![image_data])
            }
            Ok(StoredRecord::Bare { label }) => (label, Vec::new()),
            Err(e) => {
                report.unrecognized += 1;
                tracing::warn!(record = idx, error = %e, "skipping unrecognized gallery record");
                continue;
            }
        };

        if images.is_empty() {
            report.dropped_empty += 1;
            tracing::warn!(record = idx, label = %label, "dropping gallery record without images");
            continue;
        }

        match identities.iter_mut().find(|i| i.has_label(&label)) {
            Some(existing) => {
                report.duplicates_merged += 1;
                existing.images.extend(images);
            }
            None => identities.push(Identity { label, images }),
        }
    }

    Ok((identities, report))
}

/// Raw persistence of the gallery document.
pub trait StoreBackend: Send + Sync {
    /// Current document, or `None` if nothing was ever saved.
    fn read(&self) -> Result<Option<String>, StoreError>;
    /// Replace the document.
    fn write(&self, contents: &str) -> Result<(), StoreError>;
}

/// Gallery document stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreBackend for FileBackend {
    fn read(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read(&self.path) {
            // Invalid UTF-8 is a corrupt document, not an I/O failure.
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, contents: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so readers never observe a truncated document.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process gallery document, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    contents: RwLock<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: RwLock::new(Some(contents.into())),
        }
    }
}

impl StoreBackend for MemoryBackend {
    fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.contents.read().clone())
    }

    fn write(&self, contents: &str) -> Result<(), StoreError> {
        *self.contents.write() = Some(contents.to_string());
        Ok(())
    }
}

/// The gallery store: the only way identities are read or changed.
///
/// Mutations are load-modify-save under a store-wide lock, so concurrent
/// uploads through the same store never lose each other's changes.
pub struct GalleryStore {
    backend: Box<dyn StoreBackend>,
    write_lock: Mutex<()>,
}

impl GalleryStore {
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            write_lock: Mutex::new(()),
        }
    }

    /// Open a file-backed store. The file is created on first save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(FileBackend::new(path))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Load all identities, upgrading older record shapes.
    ///
    /// Never fails: unreadable or corrupt data yields an empty gallery.
    pub fn load(&self) -> Vec<Identity> {
        match self.read_document() {
            Ok((identities, _)) => identities,
            Err(e) => {
                tracing::warn!(error = %e, "gallery store unreadable; treating as empty");
                Vec::new()
            }
        }
    }

    /// Read and normalize the stored document for a read-modify-write.
    ///
    /// Backend I/O errors propagate so a failed read never turns into a save
    /// over the whole gallery. A document that parses but is corrupt still
    /// counts as empty.
    fn read_document(&self) -> Result<(Vec<Identity>, MigrationReport), StoreError> {
        let Some(raw) = self.backend.read()? else {
            return Ok((Vec::new(), MigrationReport::default()));
        };

        match migrate_document(&raw) {
            Ok((identities, report)) => {
                if !report.is_clean() {
                    tracing::info!(?report, "normalized gallery store on load");
                }
                Ok((identities, report))
            }
            Err(e) => {
                tracing::warn!(error = %e, "gallery store corrupt; treating as empty");
                Ok((Vec::new(), corrupt_report()))
            }
        }
    }

    /// Persist `identities`, replacing the stored gallery.
    pub fn save(&self, identities: &[Identity]) -> Result<(), StoreError> {
        for (i, identity) in identities.iter().enumerate() {
            if identity.images.is_empty() {
                return Err(StoreError::EmptyIdentity(identity.label.clone()));
            }
            if identities[..i].iter().any(|prev| prev.has_label(&identity.label)) {
                return Err(StoreError::DuplicateLabel(identity.label.clone()));
            }
        }

        let json = serde_json::to_string(identities)?;
        self.backend.write(&json)?;
        tracing::debug!(identities = identities.len(), "gallery store saved");
        Ok(())
    }

    /// Add images under `label`, merging into an existing identity whose
    /// label matches ignoring case, or creating a new identity at the front.
    ///
    /// Returns the updated gallery.
    pub fn add_images(&self, label: &str, images: Vec<ImageRef>) -> Result<Vec<Identity>, StoreError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(StoreError::EmptyLabel);
        }
        if images.is_empty() {
            return Err(StoreError::NoImages);
        }

        let _guard = self.write_lock.lock();
        let (mut identities, _) = self.read_document()?;
        let added = images.len();

        match identities.iter_mut().find(|i| i.has_label(label)) {
            Some(existing) => {
                existing.images.extend(images);
                tracing::info!(label = %existing.label, added, total = existing.images.len(), "images added to identity");
            }
            None => {
                identities.insert(
                    0,
                    Identity {
                        label: label.to_string(),
                        images,
                    },
                );
                tracing::info!(label, added, "identity created");
            }
        }

        self.save(&identities)?;
        Ok(identities)
    }

    /// Delete the identity at `index`. Returns the updated gallery.
    pub fn remove_identity(&self, index: usize) -> Result<Vec<Identity>, StoreError> {
        let _guard = self.write_lock.lock();
        let (mut identities, _) = self.read_document()?;
        if index >= identities.len() {
            return Err(StoreError::IdentityOutOfRange {
                index,
                len: identities.len(),
            });
        }

        let removed = identities.remove(index);
        tracing::info!(label = %removed.label, images = removed.images.len(), "identity removed");

        self.save(&identities)?;
        Ok(identities)
    }

    /// Delete one image. Removing the last image removes the identity.
    /// Returns the updated gallery.
    pub fn remove_image(
        &self,
        identity_index: usize,
        image_index: usize,
    ) -> Result<Vec<Identity>, StoreError> {
        let _guard = self.write_lock.lock();
        let (mut identities, _) = self.read_document()?;
        let len = identities.len();
        let identity = identities
            .get_mut(identity_index)
            .ok_or(StoreError::IdentityOutOfRange {
                index: identity_index,
                len,
            })?;

        if image_index >= identity.images.len() {
            return Err(StoreError::ImageOutOfRange {
                label: identity.label.clone(),
                index: image_index,
                len: identity.images.len(),
            });
        }

        identity.images.remove(image_index);
        tracing::info!(label = %identity.label, image = image_index, remaining = identity.images.len(), "image removed");

        if identity.images.is_empty() {
            let removed = identities.remove(identity_index);
            tracing::info!(label = %removed.label, "last image removed; identity deleted");
        }

        self.save(&identities)?;
        Ok(identities)
    }

    /// Rewrite the stored document in the current record shape.
    pub fn migrate(&self) -> Result<MigrationReport, StoreError> {
        let _guard = self.write_lock.lock();
        let (identities, report) = self.read_document()?;
        self.save(&identities)?;
        tracing::info!(identities = identities.len(), ?report, "gallery store migrated");
        Ok(report)
    }
}

fn corrupt_report() -> MigrationReport {
    MigrationReport {
        corrupt: true,
        ..Default::default()
    }
}
