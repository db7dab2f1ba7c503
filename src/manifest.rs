// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Parses the rootfs-bundled per-DLC manifest (imageloader.json). Mirrors
// the fields `imageloader::Manifest` exposes in the original C++ service;
// this crate only needs a subset of them.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::common::MANIFEST_FILE_NAME;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,

    pub size: u64,
    #[serde(default)]
    pub preallocated_size: u64,

    #[serde(rename = "image-sha256-hash")]
    pub image_sha256: String,

    #[serde(default, rename = "preload-allowed")]
    pub preload_allowed: bool,
    #[serde(default, rename = "factory-install")]
    pub factory_install: bool,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default, rename = "user-tied")]
    pub user_tied: bool,
    #[serde(default, rename = "mount-file-required")]
    pub mount_file_required: bool,
    #[serde(default)]
    pub scaled: bool,
    #[serde(default, rename = "force-ota")]
    pub force_ota: bool,
    #[serde(default, rename = "use-logical-volume")]
    pub use_logical_volume: bool,

    #[serde(default = "default_package")]
    pub package: String,
}

fn default_package() -> String {
    "package".to_string()
}

impl Manifest {
    /// Preallocated size to request from the image backend, falling back
    /// to the expected image size when the manifest didn't specify one.
    pub fn allocation_size(&self) -> u64 {
        if self.preallocated_size > 0 {
            self.preallocated_size
        } else {
            self.size
        }
    }

    pub fn expected_sha256(&self) -> Result<Vec<u8>> {
        hex::decode(&self.image_sha256)
            .with_context(|| format!("malformed image-sha256-hash: {}", self.image_sha256))
    }
}

/// Loads `<manifest_dir>/<id>/package/imageloader.json`.
pub fn load_manifest(manifest_dir: &Path, id: &str) -> Result<Manifest> {
    let candidates = [
        manifest_dir.join(id).join("package").join(MANIFEST_FILE_NAME),
        manifest_dir.join(id).join(MANIFEST_FILE_NAME),
    ];
    for path in &candidates {
        if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let manifest: Manifest = serde_json::from_str(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            return Ok(manifest);
        }
    }
    anyhow::bail!(
        "no manifest found for dlc '{}' under {}",
        id,
        manifest_dir.display()
    )
}

/// Enumerates DLC ids by scanning the manifest directory for subdirectories
/// containing a manifest file, mirroring `DlcService::Initialize`'s scan of
/// the manifest root.
pub fn scan_supported_dlc_ids(manifest_dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    if !manifest_dir.is_dir() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().to_string();
        if load_manifest(manifest_dir, &id).is_ok() {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_manifest(dir: &Path, id: &str, body: &str) {
        let package_dir = dir.join(id).join("package");
        std::fs::create_dir_all(&package_dir).unwrap();
        std::fs::write(package_dir.join(MANIFEST_FILE_NAME), body).unwrap();
    }

    #[test]
    fn loads_required_and_defaulted_fields() {
        let tmp = tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "sample-dlc",
            r#"{
                "name": "Sample",
                "size": 4096,
                "image-sha256-hash": "deadbeef",
                "preload-allowed": true
            }"#,
        );

        let manifest = load_manifest(tmp.path(), "sample-dlc").unwrap();
        assert_eq!(manifest.size, 4096);
        assert_eq!(manifest.name.as_deref(), Some("Sample"));
        assert!(manifest.preload_allowed);
        assert!(!manifest.scaled);
        assert_eq!(manifest.package, "package");
    }

    #[test]
    fn allocation_size_falls_back_to_size() {
        let tmp = tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "no-prealloc",
            r#"{"size": 1024, "image-sha256-hash": "ab"}"#,
        );
        let manifest = load_manifest(tmp.path(), "no-prealloc").unwrap();
        assert_eq!(manifest.allocation_size(), 1024);
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(load_manifest(tmp.path(), "nonexistent").is_err());
    }

    #[test]
    fn scan_finds_only_dirs_with_manifests() {
        let tmp = tempdir().unwrap();
        write_manifest(tmp.path(), "a", r#"{"size": 1, "image-sha256-hash": "00"}"#);
        std::fs::create_dir_all(tmp.path().join("b")).unwrap(); // no manifest inside
        let ids = scan_supported_dlc_ids(tmp.path()).unwrap();
        assert_eq!(ids, vec!["a".to_string()]);
    }
}
