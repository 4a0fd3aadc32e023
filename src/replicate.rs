// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The replication orchestrator.
//!
//! Every operation runs the same pipeline — parse, resolve, narrow, write —
//! strictly in that order, failing fast on the first error. The `copy`
//! operation adds the signature fast path: a source without any signature is
//! moved as bare content, skipping signed-entity propagation entirely.

use std::path::Path;

use log::{debug, info};
use oci_client::secrets::RegistryAuth;
use oci_client::Reference;
use thiserror::Error;

use crate::config::ReplicationConfig;
use crate::entity::{has_signature, SignatureCheckError, SignedEntity};
use crate::layout::{write_signed_image, write_signed_image_index, LayoutError};
use crate::platform::{narrow_to_platform, PlatformError};
use crate::reference::{compose_load_target, parse_reference, ReferenceError};
use crate::transport::{EntityTransport, RegistryTransport, TransportError};

pub type ReplicateResult<T> = std::result::Result<T, ReplicateError>;

#[derive(Error, Debug)]
pub enum ReplicateError {
    #[error("invalid reference: {0}")]
    InvalidReference(#[from] ReferenceError),

    #[error("registry transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("platform narrowing failed: {0}")]
    Platform(#[from] PlatformError),

    #[error("signature presence check failed: {0}")]
    SignatureCheck(#[from] SignatureCheckError),

    #[error("archive write failed: {0}")]
    Archive(#[from] LayoutError),
}

/// Replicates signed entities between registries and local archives.
pub struct Replicator<T> {
    transport: T,
    config: ReplicationConfig,
}

impl Replicator<RegistryTransport> {
    /// Construct a replicator talking to remote registries with the given
    /// registry auth info.
    pub fn new(config: ReplicationConfig, auth: RegistryAuth) -> ReplicateResult<Self> {
        let transport = RegistryTransport::from_config(&config, auth)?;
        Ok(Self { transport, config })
    }
}

impl<T: EntityTransport> Replicator<T> {
    /// Construct a replicator over a caller-provided transport.
    pub fn with_transport(transport: T, config: ReplicationConfig) -> Self {
        Self { transport, config }
    }

    /// Load `image` into the registry rooted at `registry_prefix`, carrying
    /// every present side collection along. The destination reference is
    /// composed by joining the prefix with the source identifier, and is
    /// returned on success.
    pub async fn load(&self, image: &str, registry_prefix: &str) -> ReplicateResult<Reference> {
        let source = parse_reference(image)?;
        let target = compose_load_target(registry_prefix, image)?;
        debug!("loading {source} into {target}");

        let entity = self.resolve(&source).await?;
        self.transport
            .push_signed_entity(&source, &target, &entity)
            .await?;

        info!("loaded {source} into {target}");
        Ok(target)
    }

    /// Copy the entity at `source` to `dest`.
    ///
    /// A source without any signature takes the raw fast path: bare content
    /// transfer, no signed-entity semantics. Anything signed is replicated
    /// in full.
    pub async fn copy(&self, source: &str, dest: &str) -> ReplicateResult<()> {
        let source = parse_reference(source)?;
        let dest = parse_reference(dest)?;

        let entity = self.resolve(&source).await?;
        if has_signature(&self.transport, &entity).await? {
            debug!("{source} carries signatures, replicating the full signed entity");
            self.transport
                .push_signed_entity(&source, &dest, &entity)
                .await?;
        } else {
            debug!("{source} carries no signature, copying raw content");
            self.transport.copy_raw(&source, &dest).await?;
        }

        info!("copied {source} to {dest}");
        Ok(())
    }

    /// Save the signed entity at `source` into the local archive at
    /// `archive_path`, creating the archive when it does not exist yet.
    pub async fn save(&self, source: &str, archive_path: &Path) -> ReplicateResult<()> {
        let source = parse_reference(source)?;

        let entity = self.resolve(&source).await?;
        match &entity {
            SignedEntity::Image(image) => {
                write_signed_image(&self.transport, archive_path, image, &source).await?
            }
            SignedEntity::ImageIndex(index) => {
                write_signed_image_index(&self.transport, archive_path, index, &source).await?
            }
        }

        info!("saved {source} into {}", archive_path.display());
        Ok(())
    }

    async fn resolve(&self, source: &Reference) -> ReplicateResult<SignedEntity> {
        let entity = self.transport.fetch_entity(source).await?;
        let entity =
            narrow_to_platform(&self.transport, entity, self.config.platform.as_deref()).await?;
        Ok(entity)
    }
}

#[derive(Default)]
pub struct ReplicatorBuilder {
    config: ReplicationConfig,
    auth: Option<RegistryAuth>,
}

macro_rules! __impl_config {
    ($name: ident, $type: ident) => {
        pub fn $name(mut self, $name: $type) -> Self {
            self.config.$name = $name;
            self
        }
    };
    ($name: ident, $value: expr, $type: ident) => {
        pub fn $name(mut self, $name: $type) -> Self {
            self.config.$name = $value;
            self
        }
    };
}

impl ReplicatorBuilder {
    __impl_config!(max_concurrent_blob_transfers, usize);
    __impl_config!(platform, Some(platform), String);
    __impl_config!(image_transfer_proxy, Some(image_transfer_proxy), String);
    __impl_config!(skip_proxy_ips, Some(skip_proxy_ips), String);

    /// Registry auth info to use; anonymous when unset.
    pub fn auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn build(self) -> ReplicateResult<Replicator<RegistryTransport>> {
        let auth = self.auth.unwrap_or(RegistryAuth::Anonymous);
        Replicator::new(self.config, auth)
    }
}

impl From<ReplicationConfig> for ReplicatorBuilder {
    fn from(config: ReplicationConfig) -> Self {
        Self { config, auth: None }
    }
}
