// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Narrowing a resolved index to one platform before replication.

use std::str::FromStr;

use log::debug;
use oci_client::manifest::Platform;
use oci_client::Reference;
use thiserror::Error;

use crate::entity::SignedEntity;
use crate::transport::{EntityTransport, TransportError};

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("invalid platform selector {0}, expected os/arch[/variant]")]
    InvalidSelector(String),

    #[error("no manifest in {reference} matches platform {platform}")]
    NoMatchingPlatform { reference: String, platform: String },

    #[error("platform {platform} requested but {reference} is not a multi-arch index")]
    NotMultiArch { reference: String, platform: String },

    #[error("failed to fetch platform manifest: {0}")]
    Fetch(#[from] TransportError),
}

/// An `os/arch[/variant]` platform selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformSelector {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl FromStr for PlatformSelector {
    type Err = PlatformError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        let mut parts = selector.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(os), Some(architecture), variant, None)
                if !os.is_empty()
                    && !architecture.is_empty()
                    && variant.map_or(true, |v| !v.is_empty()) =>
            {
                Ok(Self {
                    os: os.to_string(),
                    architecture: architecture.to_string(),
                    variant: variant.map(str::to_string),
                })
            }
            _ => Err(PlatformError::InvalidSelector(selector.to_string())),
        }
    }
}

impl PlatformSelector {
    /// A selector without a variant matches any variant.
    fn matches(&self, platform: &Platform) -> bool {
        platform.os == self.os
            && platform.architecture == self.architecture
            && self
                .variant
                .as_deref()
                .map_or(true, |variant| platform.variant.as_deref() == Some(variant))
    }
}

/// Narrow `entity` down to the sub-entity matching `selector`.
///
/// An empty selector is a no-op passthrough. Narrowing a single image is
/// refused — there is nothing to select from.
pub async fn narrow_to_platform<T>(
    transport: &T,
    entity: SignedEntity,
    selector: Option<&str>,
) -> PlatformResult<SignedEntity>
where
    T: EntityTransport + ?Sized,
{
    let Some(selector_str) = selector.filter(|selector| !selector.is_empty()) else {
        return Ok(entity);
    };
    let selector = PlatformSelector::from_str(selector_str)?;

    match entity {
        SignedEntity::Image(image) => Err(PlatformError::NotMultiArch {
            reference: image.reference.whole(),
            platform: selector_str.to_string(),
        }),
        SignedEntity::ImageIndex(index) => {
            let entry = index
                .index
                .manifests
                .iter()
                .find(|entry| {
                    entry
                        .platform
                        .as_ref()
                        .map_or(false, |platform| selector.matches(platform))
                })
                .ok_or_else(|| PlatformError::NoMatchingPlatform {
                    reference: index.reference.whole(),
                    platform: selector_str.to_string(),
                })?;

            debug!(
                "narrowed {} to {} for platform {selector_str}",
                index.reference, entry.digest
            );
            let child = Reference::with_digest(
                index.reference.registry().to_string(),
                index.reference.repository().to_string(),
                entry.digest.clone(),
            );
            Ok(transport.fetch_entity(&child).await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("linux/amd64", "linux", "amd64", None)]
    #[case("linux/arm64/v8", "linux", "arm64", Some("v8"))]
    fn test_selector_parse(
        #[case] selector: &str,
        #[case] os: &str,
        #[case] architecture: &str,
        #[case] variant: Option<&str>,
    ) {
        let parsed = PlatformSelector::from_str(selector).unwrap();
        assert_eq!(parsed.os, os);
        assert_eq!(parsed.architecture, architecture);
        assert_eq!(parsed.variant.as_deref(), variant);
    }

    #[rstest]
    #[case("")]
    #[case("linux")]
    #[case("linux/")]
    #[case("linux/arm64/")]
    #[case("linux/arm64/v8/extra")]
    fn test_selector_parse_invalid(#[case] selector: &str) {
        assert!(matches!(
            PlatformSelector::from_str(selector),
            Err(PlatformError::InvalidSelector(_))
        ));
    }

    fn platform(os: &str, architecture: &str, variant: Option<&str>) -> Platform {
        serde_json::from_value(serde_json::json!({
            "os": os,
            "architecture": architecture,
            "variant": variant,
        }))
        .unwrap()
    }

    #[test]
    fn test_selector_matches() {
        let selector = PlatformSelector::from_str("linux/arm64").unwrap();
        assert!(selector.matches(&platform("linux", "arm64", None)));
        assert!(selector.matches(&platform("linux", "arm64", Some("v8"))));
        assert!(!selector.matches(&platform("linux", "amd64", None)));
        assert!(!selector.matches(&platform("windows", "arm64", None)));

        let selector = PlatformSelector::from_str("linux/arm64/v8").unwrap();
        assert!(selector.matches(&platform("linux", "arm64", Some("v8"))));
        assert!(!selector.matches(&platform("linux", "arm64", None)));
    }
}
