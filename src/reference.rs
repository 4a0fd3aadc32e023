// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Location identifiers for replication sources and destinations.
//!
//! References are `oci_client::Reference` values. This module adds the two
//! derivations the replication paths need: registry-relative names, which key
//! side collections to their primary artifact inside an archive, and
//! destination composition for load operations.

use oci_client::{ParseError, Reference};
use thiserror::Error;

pub type ReferenceResult<T> = std::result::Result<T, ReferenceError>;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("invalid image reference {reference}: {source}")]
    InvalidReference {
        reference: String,
        #[source]
        source: ParseError,
    },
}

/// Parse a location string into an OCI reference.
pub fn parse_reference(reference: &str) -> ReferenceResult<Reference> {
    Reference::try_from(reference).map_err(|source| ReferenceError::InvalidReference {
        reference: reference.to_string(),
        source,
    })
}

/// Registry-relative name of `reference`: its whole name with the
/// `<registry>/` prefix stripped.
///
/// Best effort — when the registry is not actually a prefix of the whole
/// name, the whole name is returned unmodified rather than failing.
pub fn relative_image_ref(reference: &Reference) -> String {
    let whole = reference.whole();
    let registry_prefix = format!("{}/", reference.registry());
    match whole.strip_prefix(&registry_prefix) {
        Some(relative) => relative.to_string(),
        None => whole,
    }
}

/// Compose the destination reference of a load operation by joining the
/// target registry prefix with the source identifier.
pub fn compose_load_target(registry_prefix: &str, image: &str) -> ReferenceResult<Reference> {
    let target = format!(
        "{}/{}",
        registry_prefix.trim_end_matches('/'),
        image.trim_start_matches('/')
    );
    parse_reference(&target)
}
