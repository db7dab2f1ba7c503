// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// File-backed image storage: a sparse-or-preallocated file per slot under
// the DLC's content directory. Mirrors `utils::CreateFile`/`ResizeFile`/
// `HashFile`/`CopyAndHashFile` from the original service: growth is done by
// writing real zero bytes past the previous end rather than `set_len`, so
// callers that need non-sparse allocation get it; shrinking still goes
// through truncation.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use openssl::hash::{Hasher, MessageDigest};

use crate::common::{Slot, IMAGE_FILE_NAME};

const CHUNK_SIZE: usize = 4096;
const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

pub struct FileBackend {
    content_dir: PathBuf,
}

impl FileBackend {
    pub fn new(content_dir: PathBuf) -> FileBackend {
        FileBackend { content_dir }
    }

    fn slot_dir(&self, id: &str, slot: Slot) -> PathBuf {
        self.content_dir
            .join(id)
            .join("package")
            .join(format!("dlc_{}", slot.as_str()))
    }

    fn create_dir(dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))
            .with_context(|| format!("failed to chmod {}", dir.display()))
    }

    fn resize_file(file: &mut File, new_size: u64) -> Result<()> {
        let prev_size = file.metadata()?.len();
        if new_size < prev_size {
            file.set_len(new_size)?;
            return Ok(());
        }
        if new_size == prev_size {
            return Ok(());
        }
        file.seek(SeekFrom::Start(prev_size))?;
        let zeros = [0u8; CHUNK_SIZE];
        let mut remaining = new_size - prev_size;
        while remaining > 0 {
            let chunk = std::cmp::min(remaining, CHUNK_SIZE as u64) as usize;
            file.write_all(&zeros[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    fn create_file(path: &Path, size: u64) -> Result<()> {
        if let Some(parent) = path.parent() {
            Self::create_dir(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::resize_file(&mut file, size)
            .with_context(|| format!("failed to resize {}", path.display()))?;
        fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))
            .with_context(|| format!("failed to chmod {}", path.display()))
    }

    fn hash_stream<R: Read>(mut reader: R, size: u64) -> Result<Vec<u8>> {
        let mut hasher = Hasher::new(MessageDigest::sha256())?;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let chunk = std::cmp::min(remaining, CHUNK_SIZE as u64) as usize;
            let n = reader.read(&mut buf[..chunk])?;
            if n == 0 {
                anyhow::bail!("unexpected EOF, {} bytes short of {}", remaining, size);
            }
            hasher.update(&buf[..n])?;
            remaining -= n as u64;
        }
        Ok(hasher.finish()?.to_vec())
    }
}

impl super::ImageBackend for FileBackend {
    fn resolve_path(&self, id: &str, slot: Slot) -> PathBuf {
        self.slot_dir(id, slot).join(IMAGE_FILE_NAME)
    }

    fn create(&self, id: &str, size: u64) -> Result<()> {
        for slot in [Slot::A, Slot::B] {
            Self::create_file(&self.resolve_path(id, slot), size)?;
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Vec<(PathBuf, std::io::Error)> {
        let dir = self.content_dir.join(id);
        let mut failures = Vec::new();
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                failures.push((dir, e));
            }
        }
        failures
    }

    fn hash_file(&self, path: &Path, size: u64) -> Result<Vec<u8>> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let actual_len = file.metadata()?.len();
        if actual_len < size {
            anyhow::bail!(
                "{} is {} bytes, shorter than expected {}",
                path.display(),
                actual_len,
                size
            );
        }
        Self::hash_stream(file, size)
    }

    fn copy_and_hash(&self, src: &Path, dst: &Path, size: u64) -> Result<Vec<u8>> {
        if let Some(parent) = dst.parent() {
            Self::create_dir(parent)?;
        }
        let mut src_file =
            File::open(src).with_context(|| format!("failed to open {}", src.display()))?;
        let mut dst_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dst)
            .with_context(|| format!("failed to open {}", dst.display()))?;

        let mut hasher = Hasher::new(MessageDigest::sha256())?;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let chunk = std::cmp::min(remaining, CHUNK_SIZE as u64) as usize;
            let n = src_file.read(&mut buf[..chunk])?;
            if n == 0 {
                anyhow::bail!("unexpected EOF copying {}", src.display());
            }
            dst_file.write_all(&buf[..n])?;
            hasher.update(&buf[..n])?;
            remaining -= n as u64;
        }
        fs::set_permissions(dst, fs::Permissions::from_mode(FILE_MODE))
            .with_context(|| format!("failed to chmod {}", dst.display()))?;
        Ok(hasher.finish()?.to_vec())
    }

    fn make_ready_for_update(&self, id: &str, active_slot: Slot, size: u64) -> Result<()> {
        Self::create_file(&self.resolve_path(id, active_slot.other()), size)
    }
}
