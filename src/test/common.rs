// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Scratch-directory fixtures shared by the entity and manager test suites.

use std::sync::Arc;

use openssl::hash::{Hasher, MessageDigest};
use tempfile::TempDir;

use crate::common::{Config, MANIFEST_FILE_NAME};
use crate::image_backend::file_backend::FileBackend;
use crate::image_backend::ImageBackend;
use crate::manifest::{load_manifest, Manifest};

/// Holds the `TempDir` alive for the lifetime of a test's `Config`.
pub struct Fixture {
    _tmp: TempDir,
    pub config: Config,
}

pub fn scratch_config() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let config = Config {
        content_dir: root.join("content"),
        prefs_dir: root.join("prefs"),
        manifest_dir: root.join("manifest"),
        preloaded_content_dir: root.join("preloaded"),
        factory_install_dir: root.join("factory"),
        deployed_content_dir: root.join("deployed"),
        verification_value_file: root.join("verification_value"),
        mount_base_dir: root.join("mount"),
        use_logical_volumes: false,
        is_official_build: false,
    };
    Fixture { _tmp: tmp, config }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new(MessageDigest::sha256()).unwrap();
    hasher.update(bytes).unwrap();
    hex::encode(hasher.finish().unwrap())
}

/// Writes `<manifest_dir>/<id>/package/imageloader.json` with the given body.
pub fn write_manifest_json(config: &Config, id: &str, body: &str) {
    let dir = config.manifest_dir.join(id).join("package");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(MANIFEST_FILE_NAME), body).unwrap();
}

/// A minimal manifest whose expected hash matches `payload`, plus whatever
/// extra top-level JSON fields the caller passes in (e.g. `, "scaled": true`).
pub fn write_basic_manifest(config: &Config, id: &str, payload: &[u8], extra_fields: &str) {
    let body = format!(
        r#"{{"size": {}, "image-sha256-hash": "{}"{}}}"#,
        payload.len(),
        sha256_hex(payload),
        extra_fields
    );
    write_manifest_json(config, id, &body);
}

pub fn read_manifest(config: &Config, id: &str) -> Manifest {
    load_manifest(&config.manifest_dir, id).unwrap()
}

pub fn file_backend(config: &Config) -> Arc<dyn ImageBackend> {
    Arc::new(FileBackend::new(config.content_dir.clone()))
}
