// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The local archive destination: an OCI image layout directory.
//!
//! An archive holds replicated artifacts content-addressed under
//! `blobs/sha256/` with an `index.json` recording one annotated descriptor
//! per appended entry. The role annotation plus the registry-relative
//! reference of the primary artifact are the only correlation index a reader
//! has; no other index file is maintained.
//!
//! Writes are ordered — primary artifact, then signatures, then
//! attestations, then attachments — and there is no rollback: a failure
//! part-way leaves the archive holding the entries appended so far.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;
use oci_client::manifest::{ImageIndexEntry, OciImageIndex, OCI_IMAGE_INDEX_MEDIA_TYPE};
use oci_client::Reference;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tokio::fs;

use crate::digest::digest_hex;
use crate::entity::{OciArtifact, SignedEntity, SignedImage, SignedImageIndex};
use crate::reference::relative_image_ref;
use crate::transport::{EntityTransport, TransportError, SBOM_ATTACHMENT_NAME};

/// Layout version marker file.
pub const OCI_LAYOUT_FILE: &str = "oci-layout";

/// Descriptor list of every appended entry.
pub const INDEX_FILE: &str = "index.json";

/// Content-addressed blob directory.
pub const BLOBS_DIR: &str = "blobs";

const LAYOUT_VERSION: &str = "1.0.0";

/// Annotation key carrying the role of an archive entry.
pub const KIND_ANNOTATION: &str = "kind";

/// Annotation key carrying the registry-relative reference of the primary
/// artifact an entry belongs to.
pub const IMAGE_REF_ANNOTATION: &str = "imageReference";

/// Role of an entry appended into an archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
pub enum EntryKind {
    Image,
    ImageIndex,
    Signatures,
    Attestations,
    Sboms,
}

pub type LayoutResult<T> = std::result::Result<T, LayoutError>;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("failed to access archive at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt archive index at {path}: {source}")]
    CorruptIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("archive at {path} has unsupported layout version {version}")]
    UnsupportedLayoutVersion { path: PathBuf, version: String },

    #[error("failed to read signature collection: {source}")]
    SignatureRead {
        #[source]
        source: TransportError,
    },

    #[error("failed to read attestation collection: {source}")]
    AttestationRead {
        #[source]
        source: TransportError,
    },

    #[error("failed to read {name} attachment: {source}")]
    AttachmentRead {
        name: String,
        #[source]
        source: TransportError,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

/// A local, append-only archive of replicated artifacts.
pub struct LayoutArchive {
    path: PathBuf,
    index: OciImageIndex,
}

impl LayoutArchive {
    /// Open the archive at `path`, initializing an empty one when nothing
    /// exists there yet. This is the single acquisition routine shared by
    /// every write path.
    pub async fn open_or_create(path: &Path) -> LayoutResult<Self> {
        let marker_path = path.join(OCI_LAYOUT_FILE);
        if !marker_path.exists() {
            return Self::initialize(path).await;
        }

        let marker_bytes = fs::read(&marker_path).await.map_err(io_error(path))?;
        let marker: LayoutMarker =
            serde_json::from_slice(&marker_bytes).map_err(|source| LayoutError::CorruptIndex {
                path: marker_path.clone(),
                source,
            })?;
        if marker.image_layout_version != LAYOUT_VERSION {
            return Err(LayoutError::UnsupportedLayoutVersion {
                path: path.to_path_buf(),
                version: marker.image_layout_version,
            });
        }

        let index_path = path.join(INDEX_FILE);
        let index_bytes = fs::read(&index_path).await.map_err(io_error(path))?;
        let index: OciImageIndex =
            serde_json::from_slice(&index_bytes).map_err(|source| LayoutError::CorruptIndex {
                path: index_path,
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            index,
        })
    }

    async fn initialize(path: &Path) -> LayoutResult<Self> {
        debug!("initializing empty archive at {}", path.display());
        fs::create_dir_all(path.join(BLOBS_DIR).join("sha256"))
            .await
            .map_err(io_error(path))?;

        let marker = LayoutMarker {
            image_layout_version: LAYOUT_VERSION.to_string(),
        };
        let marker_bytes = serde_json::to_vec(&marker).expect("marker serialization is infallible");
        fs::write(path.join(OCI_LAYOUT_FILE), marker_bytes)
            .await
            .map_err(io_error(path))?;

        let index: OciImageIndex = serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_INDEX_MEDIA_TYPE,
            "manifests": []
        }))
        .expect("empty index is well-formed");
        let archive = Self {
            path: path.to_path_buf(),
            index,
        };
        archive.persist_index().await?;
        Ok(archive)
    }

    /// Entries appended so far, oldest first.
    pub fn entries(&self) -> &[ImageIndexEntry] {
        &self.index.manifests
    }

    /// Append an image-shaped artifact (manifest, signature collection,
    /// attestation collection, attachment).
    pub async fn append_image(
        &mut self,
        artifact: &OciArtifact,
        kind: EntryKind,
        relative_ref: &str,
    ) -> LayoutResult<()> {
        self.append(artifact, kind, relative_ref).await
    }

    /// Append an index-shaped artifact.
    pub async fn append_index(
        &mut self,
        artifact: &OciArtifact,
        kind: EntryKind,
        relative_ref: &str,
    ) -> LayoutResult<()> {
        self.append(artifact, kind, relative_ref).await
    }

    /// Blobs are written at most once per content address; descriptors are
    /// appended unconditionally, so repeating a write appends a duplicate
    /// entry rather than deduplicating.
    async fn append(
        &mut self,
        artifact: &OciArtifact,
        kind: EntryKind,
        relative_ref: &str,
    ) -> LayoutResult<()> {
        let digest = artifact.digest();
        let blob_path = self.blob_path(&digest);
        if !blob_path.exists() {
            fs::write(&blob_path, &artifact.data)
                .await
                .map_err(io_error(&self.path))?;
        }

        let mut annotations = BTreeMap::new();
        annotations.insert(KIND_ANNOTATION.to_string(), kind.to_string());
        annotations.insert(IMAGE_REF_ANNOTATION.to_string(), relative_ref.to_string());

        self.index.manifests.push(ImageIndexEntry {
            media_type: artifact.media_type.clone(),
            digest,
            size: artifact.size(),
            platform: None,
            annotations: Some(annotations),
        });
        self.persist_index().await
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.path
            .join(BLOBS_DIR)
            .join("sha256")
            .join(digest_hex(digest))
    }

    async fn persist_index(&self) -> LayoutResult<()> {
        let index_bytes =
            serde_json::to_vec_pretty(&self.index).expect("index serialization is infallible");
        fs::write(self.path.join(INDEX_FILE), index_bytes)
            .await
            .map_err(io_error(&self.path))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LayoutError {
    let path = path.to_path_buf();
    move |source| LayoutError::Io { path, source }
}

/// Write `image` and every present side collection into the archive at
/// `path`, keyed by the registry-relative name of `reference`.
pub async fn write_signed_image<T>(
    transport: &T,
    path: &Path,
    image: &SignedImage,
    reference: &Reference,
) -> LayoutResult<()>
where
    T: EntityTransport + ?Sized,
{
    let mut archive = LayoutArchive::open_or_create(path).await?;
    let relative = relative_image_ref(reference);
    archive
        .append_image(&image.artifact, EntryKind::Image, &relative)
        .await?;
    let entity = SignedEntity::Image(image.clone());
    write_side_artifacts(transport, &mut archive, &entity, &relative).await
}

/// Write `index` and every present side collection into the archive at
/// `path`, keyed by the registry-relative name of `reference`.
pub async fn write_signed_image_index<T>(
    transport: &T,
    path: &Path,
    index: &SignedImageIndex,
    reference: &Reference,
) -> LayoutResult<()>
where
    T: EntityTransport + ?Sized,
{
    let mut archive = LayoutArchive::open_or_create(path).await?;
    let relative = relative_image_ref(reference);
    archive
        .append_index(&index.artifact, EntryKind::ImageIndex, &relative)
        .await?;
    let entity = SignedEntity::ImageIndex(index.clone());
    write_side_artifacts(transport, &mut archive, &entity, &relative).await
}

/// Append the present side collections of `entity`: signatures, then
/// attestations, then attachments. Later entries point back at the primary
/// artifact through `relative`, so the primary must already be in the
/// archive when this runs.
async fn write_side_artifacts<T>(
    transport: &T,
    archive: &mut LayoutArchive,
    entity: &SignedEntity,
    relative: &str,
) -> LayoutResult<()>
where
    T: EntityTransport + ?Sized,
{
    let signatures = transport
        .fetch_signatures(entity)
        .await
        .map_err(|source| LayoutError::SignatureRead { source })?;
    if let Some(signatures) = signatures.filter(|collection| !collection.is_empty()) {
        archive
            .append_image(&signatures.artifact, EntryKind::Signatures, relative)
            .await?;
    }

    let attestations = transport
        .fetch_attestations(entity)
        .await
        .map_err(|source| LayoutError::AttestationRead { source })?;
    if let Some(attestations) = attestations.filter(|collection| !collection.is_empty()) {
        archive
            .append_image(&attestations.artifact, EntryKind::Attestations, relative)
            .await?;
    }

    match transport.fetch_attachment(entity, SBOM_ATTACHMENT_NAME).await {
        Ok(sboms) => {
            archive
                .append_image(&sboms.artifact, EntryKind::Sboms, relative)
                .await?;
        }
        Err(TransportError::NotFound { name, .. }) => {
            debug!("no {name} attachment for {relative}, skipping");
        }
        Err(source) => {
            return Err(LayoutError::AttachmentRead {
                name: SBOM_ATTACHMENT_NAME.to_string(),
                source,
            });
        }
    }

    Ok(())
}
