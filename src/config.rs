// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

/// Default max concurrent blob transfers within one artifact copy.
pub const DEFAULT_MAX_CONCURRENT_BLOB_TRANSFERS: usize = 3;

/// `signed-image-rs` configuration information.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ReplicationConfig {
    /// The maximum number of blobs transferred concurrently while
    /// replicating one specific artifact.
    ///
    /// This defaults to [`DEFAULT_MAX_CONCURRENT_BLOB_TRANSFERS`].
    #[serde(default = "default_max_concurrent_blob_transfers")]
    pub max_concurrent_blob_transfers: usize,

    /// Platform selector (`os/arch[/variant]`) applied when narrowing a
    /// resolved index before replication.
    ///
    /// This value defaults to `None`, which replicates the entity as-is.
    #[serde(default = "Option::default")]
    pub platform: Option<String>,

    /// Proxy that will be used to reach registries.
    ///
    /// This value defaults to `None`.
    #[serde(default = "Option::default")]
    pub image_transfer_proxy: Option<String>,

    /// No proxy env that will be used to reach registries.
    ///
    /// This will ensure that when we access the registries with specified
    /// IPs, the `image_transfer_proxy` will not be used.
    ///
    /// If `image_transfer_proxy` is not set, this field will do nothing.
    ///
    /// This value defaults to `None`.
    #[serde(default = "Option::default")]
    pub skip_proxy_ips: Option<String>,
}

macro_rules! __default_deserialization_value {
    ($name: ident, $type: ident, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

__default_deserialization_value!(
    default_max_concurrent_blob_transfers,
    usize,
    DEFAULT_MAX_CONCURRENT_BLOB_TRANSFERS
);

impl Default for ReplicationConfig {
    // Construct a default instance of `ReplicationConfig`
    fn default() -> ReplicationConfig {
        ReplicationConfig {
            max_concurrent_blob_transfers: DEFAULT_MAX_CONCURRENT_BLOB_TRANSFERS,
            platform: None,
            image_transfer_proxy: None,
            skip_proxy_ips: None,
        }
    }
}

impl TryFrom<&Path> for ReplicationConfig {
    /// Load `ReplicationConfig` from a configuration file like:
    ///    {
    ///        "max_concurrent_blob_transfers": 3,
    ///        "platform": "linux/amd64"
    ///    }
    type Error = anyhow::Error;
    fn try_from(config_path: &Path) -> Result<Self, Self::Error> {
        let file = File::open(config_path)
            .map_err(|e| anyhow!("failed to open config file {}", e.to_string()))?;

        serde_json::from_reader::<File, ReplicationConfig>(file)
            .map_err(|e| anyhow!("failed to parse config file {}", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::prelude::*;

    #[test]
    fn test_replication_config() {
        let config = ReplicationConfig::default();

        assert_eq!(
            config.max_concurrent_blob_transfers,
            DEFAULT_MAX_CONCURRENT_BLOB_TRANSFERS
        );
        assert_eq!(config.platform, None);
        assert_eq!(config.image_transfer_proxy, None);
    }

    #[test]
    fn test_replication_config_from_file() {
        let data = r#"{
            "max_concurrent_blob_transfers": 1,
            "platform": "linux/amd64",
            "image_transfer_proxy": "http://127.0.0.1:5432"
        }"#;

        let tempdir = tempfile::tempdir().unwrap();
        let config_file = tempdir.path().join("config.json");

        File::create(&config_file)
            .unwrap()
            .write_all(data.as_bytes())
            .unwrap();

        let config = ReplicationConfig::try_from(config_file.as_path()).unwrap();

        assert_eq!(config.max_concurrent_blob_transfers, 1);
        assert_eq!(config.platform, Some("linux/amd64".to_string()));
        assert_eq!(
            config.image_transfer_proxy,
            Some("http://127.0.0.1:5432".to_string())
        );
        assert_eq!(config.skip_proxy_ips, None);

        let invalid_config_file = tempdir.path().join("does-not-exist");
        assert!(!invalid_config_file.exists());
        assert!(ReplicationConfig::try_from(invalid_config_file.as_path()).is_err());
    }

    #[test]
    fn test_replication_config_defaults_from_empty_object() {
        let config: ReplicationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReplicationConfig::default());
    }
}
