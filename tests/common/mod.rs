// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory transport for exercising the replication paths without a
//! registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use oci_client::manifest::{OciDescriptor, OciImageIndex, OciImageManifest};
use oci_client::Reference;

use signed_image_rs::entity::{
    ArtifactSet, OciArtifact, SignedEntity, SignedImage, SignedImageIndex,
};
use signed_image_rs::transport::{EntityTransport, TransportError, TransportResult};

pub const IMAGE_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Call counters observed across one replication operation.
#[derive(Default)]
pub struct Calls {
    pub copy_raw: AtomicUsize,
    pub push_signed_entity: AtomicUsize,
}

/// How the fake answers a side-collection read.
pub enum CollectionBehavior {
    Absent,
    Present(ArtifactSet),
    Fails,
}

impl CollectionBehavior {
    fn materialize(&self) -> TransportResult<Option<ArtifactSet>> {
        match self {
            CollectionBehavior::Absent => Ok(None),
            CollectionBehavior::Present(collection) => Ok(Some(collection.clone())),
            CollectionBehavior::Fails => Err(TransportError::MalformedManifest {
                reference: "fake".to_string(),
                source: serde_json::from_str::<serde_json::Value>("not json").unwrap_err(),
            }),
        }
    }
}

/// An in-memory [`EntityTransport`]. Entities are registered up front; a
/// reference registered as unsupported resolves to an unsupported-entity
/// failure the way an unknown manifest media type does.
pub struct FakeTransport {
    entities: HashMap<String, Option<SignedEntity>>,
    pub signatures: CollectionBehavior,
    pub attestations: CollectionBehavior,
    pub attachments: HashMap<String, CollectionBehavior>,
    pub calls: Arc<Calls>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            signatures: CollectionBehavior::Absent,
            attestations: CollectionBehavior::Absent,
            attachments: HashMap::new(),
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn register(&mut self, entity: SignedEntity) {
        self.entities
            .insert(entity.reference().whole(), Some(entity));
    }

    pub fn register_unsupported(&mut self, reference: &str) {
        let reference = Reference::try_from(reference).unwrap();
        self.entities.insert(reference.whole(), None);
    }
}

#[async_trait]
impl EntityTransport for FakeTransport {
    async fn fetch_entity(&self, reference: &Reference) -> TransportResult<SignedEntity> {
        match self.entities.get(&reference.whole()) {
            Some(Some(entity)) => Ok(entity.clone()),
            Some(None) => Err(TransportError::UnsupportedEntityType {
                media_type: "application/vnd.example.unknown+json".to_string(),
            }),
            None => Err(TransportError::NotFound {
                name: "entity".to_string(),
                reference: reference.whole(),
            }),
        }
    }

    async fn fetch_signatures(
        &self,
        _entity: &SignedEntity,
    ) -> TransportResult<Option<ArtifactSet>> {
        self.signatures.materialize()
    }

    async fn fetch_attestations(
        &self,
        _entity: &SignedEntity,
    ) -> TransportResult<Option<ArtifactSet>> {
        self.attestations.materialize()
    }

    async fn fetch_attachment(
        &self,
        entity: &SignedEntity,
        name: &str,
    ) -> TransportResult<ArtifactSet> {
        match self.attachments.get(name) {
            Some(behavior) => match behavior.materialize()? {
                Some(attachment) => Ok(attachment),
                None => Err(TransportError::NotFound {
                    name: name.to_string(),
                    reference: entity.reference().whole(),
                }),
            },
            None => Err(TransportError::NotFound {
                name: name.to_string(),
                reference: entity.reference().whole(),
            }),
        }
    }

    async fn copy_raw(&self, _source: &Reference, _dest: &Reference) -> TransportResult<()> {
        self.calls.copy_raw.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn push_signed_entity(
        &self,
        _source: &Reference,
        _dest: &Reference,
        _entity: &SignedEntity,
    ) -> TransportResult<()> {
        self.calls.push_signed_entity.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn image_manifest() -> OciImageManifest {
    serde_json::from_value(serde_json::json!({
        "schemaVersion": 2,
        "mediaType": IMAGE_MEDIA_TYPE,
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            "size": 2
        },
        "layers": []
    }))
    .unwrap()
}

/// A single-platform signed image rooted at `reference`.
pub fn image_entity(reference: &str) -> SignedEntity {
    let reference = Reference::try_from(reference).unwrap();
    let artifact = OciArtifact::new(
        IMAGE_MEDIA_TYPE,
        format!("{{\"schemaVersion\":2,\"layers\":[],\"ref\":\"{reference}\"}}").into_bytes(),
    );
    SignedEntity::Image(SignedImage {
        digest: artifact.digest(),
        reference,
        manifest: image_manifest(),
        artifact,
    })
}

/// An image index rooted at `reference`.
pub fn index_entity(reference: &str) -> SignedEntity {
    let reference = Reference::try_from(reference).unwrap();
    let artifact = OciArtifact::new(
        INDEX_MEDIA_TYPE,
        format!("{{\"schemaVersion\":2,\"manifests\":[],\"ref\":\"{reference}\"}}").into_bytes(),
    );
    let index: OciImageIndex = serde_json::from_value(serde_json::json!({
        "schemaVersion": 2,
        "mediaType": INDEX_MEDIA_TYPE,
        "manifests": []
    }))
    .unwrap();
    SignedEntity::ImageIndex(SignedImageIndex {
        digest: artifact.digest(),
        reference,
        index,
        artifact,
    })
}

/// A side collection carrying `entries` blobs, with distinguishable content.
pub fn collection(marker: &str, entries: usize) -> ArtifactSet {
    let artifact = OciArtifact::new(
        IMAGE_MEDIA_TYPE,
        format!("{{\"schemaVersion\":2,\"marker\":\"{marker}\"}}").into_bytes(),
    );
    ArtifactSet {
        artifact,
        entries: (0..entries).map(|_| OciDescriptor::default()).collect(),
    }
}
