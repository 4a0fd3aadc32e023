// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! `signed-image-rs` replicates signed entities — container images or image
//! indexes together with their detached signatures, attestations and named
//! attachments — between OCI registries and local image layout archives.

pub mod config;
pub mod digest;
pub mod entity;
pub mod layout;
pub mod platform;
pub mod reference;
pub mod replicate;
pub mod transport;
