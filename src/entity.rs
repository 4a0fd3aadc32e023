// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The signed entity data model.
//!
//! A signed entity is a container image or an image index resolved from a
//! source location, together with whatever detached side collections
//! (signatures, attestations, named attachments) that source carries. The
//! entity itself is plain data; side collections are materialized lazily and
//! fallibly through an [`EntityTransport`].

use oci_client::manifest::{OciDescriptor, OciImageIndex, OciImageManifest};
use oci_client::Reference;
use thiserror::Error;

use crate::digest::sha256_digest;
use crate::transport::{EntityTransport, TransportError};

pub type SignatureCheckResult<T> = std::result::Result<T, SignatureCheckError>;

#[derive(Error, Debug)]
pub enum SignatureCheckError {
    #[error("failed to read signature collection: {source}")]
    SignatureRead {
        #[source]
        source: TransportError,
    },
}

/// An opaque content item moved between registries and archives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OciArtifact {
    /// Media type the content is served under.
    pub media_type: String,

    /// Raw content bytes, exactly as fetched. Pushing these bytes verbatim
    /// keeps the content address stable across locations.
    pub data: Vec<u8>,
}

impl OciArtifact {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    /// Content address of the artifact.
    pub fn digest(&self) -> String {
        sha256_digest(&self.data)
    }

    pub fn size(&self) -> i64 {
        self.data.len() as i64
    }
}

/// A detached side collection: the collection artifact itself plus the
/// materialized list of entries it carries.
///
/// A collection can exist while carrying no entries; such a collection is
/// treated as if it were absent by every consumer.
#[derive(Clone, Debug)]
pub struct ArtifactSet {
    /// The collection artifact, appended as-is when propagating.
    pub artifact: OciArtifact,

    /// Descriptors of the individual entries in the collection.
    pub entries: Vec<OciDescriptor>,
}

impl ArtifactSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single-platform image and its signed-entity side data.
#[derive(Clone, Debug)]
pub struct SignedImage {
    /// Source reference the image was resolved from.
    pub reference: Reference,

    /// Digest of the image manifest.
    pub digest: String,

    /// The raw image manifest.
    pub artifact: OciArtifact,

    /// Parsed view of the manifest.
    pub manifest: OciImageManifest,
}

/// A manifest list of further images, carrying signed-entity side data at
/// the index level.
#[derive(Clone, Debug)]
pub struct SignedImageIndex {
    /// Source reference the index was resolved from.
    pub reference: Reference,

    /// Digest of the index manifest.
    pub digest: String,

    /// The raw index manifest.
    pub artifact: OciArtifact,

    /// Parsed view of the index.
    pub index: OciImageIndex,
}

/// A resolved signed entity. Anything that is neither an image nor an index
/// is rejected at resolution time, so no third case exists here.
#[derive(Clone, Debug)]
pub enum SignedEntity {
    Image(SignedImage),
    ImageIndex(SignedImageIndex),
}

impl SignedEntity {
    /// The source reference the entity was resolved from.
    pub fn reference(&self) -> &Reference {
        match self {
            SignedEntity::Image(image) => &image.reference,
            SignedEntity::ImageIndex(index) => &index.reference,
        }
    }

    /// Digest of the primary manifest.
    pub fn digest(&self) -> &str {
        match self {
            SignedEntity::Image(image) => &image.digest,
            SignedEntity::ImageIndex(index) => &index.digest,
        }
    }

    /// The primary artifact.
    pub fn artifact(&self) -> &OciArtifact {
        match self {
            SignedEntity::Image(image) => &image.artifact,
            SignedEntity::ImageIndex(index) => &index.artifact,
        }
    }
}

/// Report whether `entity` carries at least one detached signature.
///
/// An absent signature collection and a present-but-empty one both count as
/// unsigned. A failure to read the collection is surfaced, never conflated
/// with `false`.
pub async fn has_signature<T>(transport: &T, entity: &SignedEntity) -> SignatureCheckResult<bool>
where
    T: EntityTransport + ?Sized,
{
    match transport.fetch_signatures(entity).await {
        Ok(Some(signatures)) => Ok(!signatures.is_empty()),
        Ok(None) => Ok(false),
        Err(source) => Err(SignatureCheckError::SignatureRead { source }),
    }
}
