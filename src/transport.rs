// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Transport between content-addressable locations.
//!
//! [`EntityTransport`] is the contract the replication paths consume:
//! resolving signed entities, materializing their side collections, and
//! moving content to a registry destination. [`RegistryTransport`] implements
//! it over `oci-client`, locating side collections through the digest-derived
//! tag convention (`sha256-<hex>.sig` and friends) in the entity's own
//! repository.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use log::debug;
use oci_client::client::ClientConfig;
use oci_client::errors::OciDistributionError;
use oci_client::manifest::{
    OciDescriptor, OciImageIndex, OciImageManifest, IMAGE_MANIFEST_LIST_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference, RegistryOperation};
use reqwest::header::HeaderValue;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ReplicationConfig;
use crate::entity::{ArtifactSet, OciArtifact, SignedEntity, SignedImage, SignedImageIndex};

/// Tag suffix locating the detached signature collection of a digest.
pub const SIGNATURE_TAG_SUFFIX: &str = "sig";

/// Tag suffix locating the attestation collection of a digest.
pub const ATTESTATION_TAG_SUFFIX: &str = "att";

/// Well-known attachment carrying a software bill of materials.
pub const SBOM_ATTACHMENT_NAME: &str = "sbom";

/// Manifest media types a source may serve for a signed entity root.
const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_IMAGE_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
];

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to construct registry client: {source}")]
    Client {
        #[source]
        source: OciDistributionError,
    },

    #[error("failed to fetch manifest for {reference}: {source}")]
    Fetch {
        reference: String,
        #[source]
        source: OciDistributionError,
    },

    #[error("failed to fetch blob {digest}: {source}")]
    FetchBlob {
        digest: String,
        #[source]
        source: OciDistributionError,
    },

    #[error("{name} not found for {reference}")]
    NotFound { name: String, reference: String },

    #[error("unsupported entity type {media_type}")]
    UnsupportedEntityType { media_type: String },

    #[error("malformed manifest for {reference}: {source}")]
    MalformedManifest {
        reference: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to authenticate to {registry}: {source}")]
    Auth {
        registry: String,
        #[source]
        source: OciDistributionError,
    },

    #[error("failed to push blob {digest}: {source}")]
    PushBlob {
        digest: String,
        #[source]
        source: OciDistributionError,
    },

    #[error("failed to push manifest to {reference}: {source}")]
    PushManifest {
        reference: String,
        #[source]
        source: OciDistributionError,
    },

    #[error("invalid media type {media_type}")]
    InvalidMediaType { media_type: String },
}

/// Moves signed entities and their side collections between locations.
///
/// Resolution performs no writes, so a failed or unsupported resolution
/// leaves both ends untouched.
#[async_trait]
pub trait EntityTransport: Send + Sync {
    /// Resolve the signed entity rooted at `reference`.
    async fn fetch_entity(&self, reference: &Reference) -> TransportResult<SignedEntity>;

    /// Materialize the detached signature collection of `entity`.
    /// `Ok(None)` when the collection is absent at the source.
    async fn fetch_signatures(
        &self,
        entity: &SignedEntity,
    ) -> TransportResult<Option<ArtifactSet>>;

    /// Materialize the attestation collection of `entity`.
    async fn fetch_attestations(
        &self,
        entity: &SignedEntity,
    ) -> TransportResult<Option<ArtifactSet>>;

    /// Materialize the attachment called `name`. Fails with
    /// [`TransportError::NotFound`] when the attachment does not exist, so
    /// callers can skip absence while surfacing genuine faults.
    async fn fetch_attachment(
        &self,
        entity: &SignedEntity,
        name: &str,
    ) -> TransportResult<ArtifactSet>;

    /// Copy the bare content at `source` to `dest`: the manifest and every
    /// blob it references, nothing else.
    async fn copy_raw(&self, source: &Reference, dest: &Reference) -> TransportResult<()>;

    /// Replicate the full signed entity to `dest`: the primary artifact
    /// first, then every present side collection under its digest-derived
    /// destination tag. An absent `sbom` attachment is skipped; any other
    /// side-collection failure aborts the push.
    async fn push_signed_entity(
        &self,
        source: &Reference,
        dest: &Reference,
        entity: &SignedEntity,
    ) -> TransportResult<()>;
}

/// Tag locating a digest's side collection: `sha256-<hex>.<suffix>`.
fn collection_tag(digest: &str, suffix: &str) -> String {
    format!("{}.{}", digest.replace(':', "-"), suffix)
}

/// Reference of a side collection in the entity's own repository.
fn collection_reference(entity: &SignedEntity, suffix: &str) -> Reference {
    let reference = entity.reference();
    Reference::with_tag(
        reference.registry().to_string(),
        reference.repository().to_string(),
        collection_tag(entity.digest(), suffix),
    )
}

fn parse_manifest<T>(raw: &[u8], reference: &Reference) -> TransportResult<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_slice(raw).map_err(|source| TransportError::MalformedManifest {
        reference: reference.whole(),
        source,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ManifestKind {
    Image,
    Index,
}

#[derive(Deserialize)]
struct ManifestProbe {
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    manifests: Option<serde_json::Value>,
    layers: Option<serde_json::Value>,
    config: Option<serde_json::Value>,
}

/// Decide whether a raw manifest roots an image or an index. Manifests that
/// are neither are unsupported entities.
fn classify_manifest(raw: &[u8], reference: &Reference) -> TransportResult<ManifestKind> {
    let probe: ManifestProbe = parse_manifest(raw, reference)?;
    match probe.media_type.as_deref() {
        Some(OCI_IMAGE_MEDIA_TYPE) | Some(IMAGE_MANIFEST_MEDIA_TYPE) => Ok(ManifestKind::Image),
        Some(OCI_IMAGE_INDEX_MEDIA_TYPE) | Some(IMAGE_MANIFEST_LIST_MEDIA_TYPE) => {
            Ok(ManifestKind::Index)
        }
        Some(other) => Err(TransportError::UnsupportedEntityType {
            media_type: other.to_string(),
        }),
        // Some OCI manifests omit mediaType; fall back to the document shape.
        None if probe.manifests.is_some() => Ok(ManifestKind::Index),
        None if probe.layers.is_some() || probe.config.is_some() => Ok(ManifestKind::Image),
        None => Err(TransportError::UnsupportedEntityType {
            media_type: "unknown".to_string(),
        }),
    }
}

fn is_not_found(err: &OciDistributionError) -> bool {
    matches!(err, OciDistributionError::ImageManifestNotFoundError(_))
}

/// [`EntityTransport`] over remote OCI registries.
pub struct RegistryTransport {
    /// `oci-client` to talk with remote OCI registries.
    client: Client,

    /// OCI registry auth info.
    auth: RegistryAuth,

    /// Max number of concurrent blob transfers within one artifact copy.
    max_concurrent_blob_transfers: usize,
}

impl RegistryTransport {
    /// Constructs a transport with the provided client configuration and
    /// registry auth info.
    pub fn new(
        client_config: ClientConfig,
        auth: RegistryAuth,
        max_concurrent_blob_transfers: usize,
    ) -> TransportResult<Self> {
        let client =
            Client::try_from(client_config).map_err(|source| TransportError::Client { source })?;
        Ok(Self {
            client,
            auth,
            max_concurrent_blob_transfers,
        })
    }

    /// Constructs a transport from configuration.
    pub fn from_config(config: &ReplicationConfig, auth: RegistryAuth) -> TransportResult<Self> {
        let client_config = ClientConfig {
            https_proxy: config.image_transfer_proxy.clone(),
            no_proxy: config.skip_proxy_ips.clone(),
            ..Default::default()
        };
        Self::new(client_config, auth, config.max_concurrent_blob_transfers)
    }

    async fn pull_raw_manifest(
        &self,
        reference: &Reference,
    ) -> TransportResult<(Vec<u8>, String)> {
        self.client
            .pull_manifest_raw(reference, &self.auth, MANIFEST_MEDIA_TYPES)
            .await
            .map_err(|source| TransportError::Fetch {
                reference: reference.whole(),
                source,
            })
    }

    async fn authenticate_push(&self, reference: &Reference) -> TransportResult<()> {
        self.client
            .auth(reference, &self.auth, RegistryOperation::Push)
            .await
            .map_err(|source| TransportError::Auth {
                registry: reference.registry().to_string(),
                source,
            })?;
        Ok(())
    }

    /// Fetch a side collection manifest by its tag suffix. `Ok(None)` when
    /// the tag does not exist at the source.
    async fn fetch_collection(
        &self,
        entity: &SignedEntity,
        suffix: &str,
    ) -> TransportResult<Option<ArtifactSet>> {
        let reference = collection_reference(entity, suffix);
        let (raw, _digest) = match self
            .client
            .pull_manifest_raw(&reference, &self.auth, MANIFEST_MEDIA_TYPES)
            .await
        {
            Ok(pulled) => pulled,
            Err(err) if is_not_found(&err) => return Ok(None),
            Err(source) => {
                return Err(TransportError::Fetch {
                    reference: reference.whole(),
                    source,
                })
            }
        };

        let manifest: OciImageManifest = parse_manifest(&raw, &reference)?;
        let media_type = manifest
            .media_type
            .clone()
            .unwrap_or_else(|| OCI_IMAGE_MEDIA_TYPE.to_string());
        let entries = manifest.layers.clone();
        Ok(Some(ArtifactSet {
            artifact: OciArtifact::new(media_type, raw),
            entries,
        }))
    }

    async fn copy_blob(
        &self,
        source: &Reference,
        dest: &Reference,
        descriptor: OciDescriptor,
    ) -> TransportResult<()> {
        let mut data = Vec::with_capacity(descriptor.size as usize);
        self.client
            .pull_blob(source, &descriptor, &mut data)
            .await
            .map_err(|source| TransportError::FetchBlob {
                digest: descriptor.digest.clone(),
                source,
            })?;
        self.client
            .push_blob(dest, &data, &descriptor.digest)
            .await
            .map_err(|source| TransportError::PushBlob {
                digest: descriptor.digest.clone(),
                source,
            })?;
        Ok(())
    }

    async fn push_raw_manifest(
        &self,
        dest: &Reference,
        raw: Vec<u8>,
        media_type: &str,
        digest: &str,
        is_root: bool,
    ) -> TransportResult<()> {
        // Non-root manifests (index children) are pushed by digest; only the
        // root lands on the destination tag.
        let target = if is_root {
            dest.clone()
        } else {
            Reference::with_digest(
                dest.registry().to_string(),
                dest.repository().to_string(),
                digest.to_string(),
            )
        };
        let content_type =
            HeaderValue::from_str(media_type).map_err(|_| TransportError::InvalidMediaType {
                media_type: media_type.to_string(),
            })?;
        self.client
            .push_manifest_raw(&target, raw, content_type)
            .await
            .map_err(|source| TransportError::PushManifest {
                reference: target.whole(),
                source,
            })?;
        Ok(())
    }

    /// Replicate the manifest at `raw` and everything it references from
    /// `source`'s repository into `dest`'s. Manifest bytes travel verbatim,
    /// so digests — and with them the side-collection tag correlation —
    /// survive the copy.
    fn replicate_tree<'a>(
        &'a self,
        source: &'a Reference,
        dest: &'a Reference,
        raw: Vec<u8>,
        digest: String,
        is_root: bool,
    ) -> BoxFuture<'a, TransportResult<()>> {
        Box::pin(async move {
            match classify_manifest(&raw, source)? {
                ManifestKind::Image => {
                    let manifest: OciImageManifest = parse_manifest(&raw, source)?;
                    let mut blobs = manifest.layers.clone();
                    blobs.push(manifest.config.clone());
                    stream::iter(blobs)
                        .map(|descriptor| self.copy_blob(source, dest, descriptor))
                        .buffer_unordered(self.max_concurrent_blob_transfers)
                        .try_collect::<Vec<()>>()
                        .await?;
                    let media_type = manifest
                        .media_type
                        .as_deref()
                        .unwrap_or(OCI_IMAGE_MEDIA_TYPE)
                        .to_string();
                    self.push_raw_manifest(dest, raw, &media_type, &digest, is_root)
                        .await
                }
                ManifestKind::Index => {
                    let index: OciImageIndex = parse_manifest(&raw, source)?;
                    for entry in &index.manifests {
                        let child_source = Reference::with_digest(
                            source.registry().to_string(),
                            source.repository().to_string(),
                            entry.digest.clone(),
                        );
                        let (child_raw, child_digest) =
                            self.pull_raw_manifest(&child_source).await?;
                        self.replicate_tree(source, dest, child_raw, child_digest, false)
                            .await?;
                    }
                    let media_type = index
                        .media_type
                        .as_deref()
                        .unwrap_or(OCI_IMAGE_INDEX_MEDIA_TYPE)
                        .to_string();
                    self.push_raw_manifest(dest, raw, &media_type, &digest, is_root)
                        .await
                }
            }
        })
    }

    /// Copy one side collection tree under its digest-derived tag at `dest`.
    async fn copy_collection(
        &self,
        entity: &SignedEntity,
        dest: &Reference,
        suffix: &str,
    ) -> TransportResult<()> {
        let collection_source = collection_reference(entity, suffix);
        let collection_dest = Reference::with_tag(
            dest.registry().to_string(),
            dest.repository().to_string(),
            collection_tag(entity.digest(), suffix),
        );
        self.copy_raw(&collection_source, &collection_dest).await
    }
}

#[async_trait]
impl EntityTransport for RegistryTransport {
    async fn fetch_entity(&self, reference: &Reference) -> TransportResult<SignedEntity> {
        let (raw, digest) = self.pull_raw_manifest(reference).await?;
        debug!("resolved {reference} to {digest}");
        match classify_manifest(&raw, reference)? {
            ManifestKind::Image => {
                let manifest: OciImageManifest = parse_manifest(&raw, reference)?;
                let media_type = manifest
                    .media_type
                    .clone()
                    .unwrap_or_else(|| OCI_IMAGE_MEDIA_TYPE.to_string());
                Ok(SignedEntity::Image(SignedImage {
                    reference: reference.clone(),
                    digest,
                    artifact: OciArtifact::new(media_type, raw),
                    manifest,
                }))
            }
            ManifestKind::Index => {
                let index: OciImageIndex = parse_manifest(&raw, reference)?;
                let media_type = index
                    .media_type
                    .clone()
                    .unwrap_or_else(|| OCI_IMAGE_INDEX_MEDIA_TYPE.to_string());
                Ok(SignedEntity::ImageIndex(SignedImageIndex {
                    reference: reference.clone(),
                    digest,
                    artifact: OciArtifact::new(media_type, raw),
                    index,
                }))
            }
        }
    }

    async fn fetch_signatures(
        &self,
        entity: &SignedEntity,
    ) -> TransportResult<Option<ArtifactSet>> {
        self.fetch_collection(entity, SIGNATURE_TAG_SUFFIX).await
    }

    async fn fetch_attestations(
        &self,
        entity: &SignedEntity,
    ) -> TransportResult<Option<ArtifactSet>> {
        self.fetch_collection(entity, ATTESTATION_TAG_SUFFIX).await
    }

    async fn fetch_attachment(
        &self,
        entity: &SignedEntity,
        name: &str,
    ) -> TransportResult<ArtifactSet> {
        match self.fetch_collection(entity, name).await? {
            Some(attachment) => Ok(attachment),
            None => Err(TransportError::NotFound {
                name: name.to_string(),
                reference: entity.reference().whole(),
            }),
        }
    }

    async fn copy_raw(&self, source: &Reference, dest: &Reference) -> TransportResult<()> {
        self.authenticate_push(dest).await?;
        let (raw, digest) = self.pull_raw_manifest(source).await?;
        self.replicate_tree(source, dest, raw, digest, true).await
    }

    async fn push_signed_entity(
        &self,
        source: &Reference,
        dest: &Reference,
        entity: &SignedEntity,
    ) -> TransportResult<()> {
        // The primary artifact goes first; side collections are subordinate
        // annotations correlated to it by digest.
        self.copy_raw(source, dest).await?;

        for suffix in [SIGNATURE_TAG_SUFFIX, ATTESTATION_TAG_SUFFIX] {
            let collection = self.fetch_collection(entity, suffix).await?;
            match collection {
                Some(collection) if !collection.is_empty() => {
                    self.copy_collection(entity, dest, suffix).await?;
                }
                _ => debug!("no .{suffix} collection for {}", entity.reference()),
            }
        }

        match self.fetch_attachment(entity, SBOM_ATTACHMENT_NAME).await {
            Ok(_) => {
                self.copy_collection(entity, dest, SBOM_ATTACHMENT_NAME)
                    .await?
            }
            Err(TransportError::NotFound { name, .. }) => {
                debug!("no {name} attachment for {}, skipping", entity.reference());
            }
            Err(err) => return Err(err),
        }

        Ok(())
    }
}
