// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Image storage is a capability set: create/delete/resolve/hash. The file
// backend and the logical-volume backend are two implementations; the rest
// of the core only ever holds one `Arc<dyn ImageBackend>` and treats images
// as opaque paths.

pub mod file_backend;
pub mod lvm_backend;

use std::path::PathBuf;

use anyhow::Result;

use crate::common::Slot;

pub trait ImageBackend: Send + Sync {
    /// Path the active/inactive slot image for `id` would live at, whether
    /// or not it currently exists.
    fn resolve_path(&self, id: &str, slot: Slot) -> PathBuf;

    /// Ensures both slot images exist and are at least `size` bytes,
    /// creating directories and preallocating space as needed.
    fn create(&self, id: &str, size: u64) -> Result<()>;

    /// Removes both slot images (and, for the LVM backend, the logical
    /// volumes themselves). Best-effort: returns the paths that failed to
    /// delete rather than aborting on the first error.
    fn delete(&self, id: &str) -> Vec<(PathBuf, std::io::Error)>;

    /// Hashes the first `size` bytes of the image at `path`.
    fn hash_file(&self, path: &std::path::Path, size: u64) -> Result<Vec<u8>>;

    /// Copies `size` bytes from `src` to `dst` while hashing the bytes
    /// written, so the returned hash matches exactly what landed on disk.
    fn copy_and_hash(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        size: u64,
    ) -> Result<Vec<u8>>;

    /// Prepares the slot inactive relative to `active_slot` to receive an
    /// update (e.g. activates the inactive logical volume). For the file
    /// backend this just (re)creates the inactive image.
    fn make_ready_for_update(&self, id: &str, active_slot: Slot, size: u64) -> Result<()>;
}
