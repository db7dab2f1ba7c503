// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Logical-volume-backed image storage, used on devices where DLC storage
// sits on top of LVM rather than plain files. Grounded in
// `DlcLvm::CreateDlc`/`CreateDlcLogicalVolumes`/`DeleteInternal`: each slot
// is a named logical volume `dlc_<id>_{a,b}`, sized in MiB.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[cfg(test)]
use mockall::automock;

use crate::common::Slot;
use crate::image_backend::file_backend::FileBackend;
use crate::image_backend::ImageBackend;

const MIB: u64 = 1024 * 1024;

fn lv_name(id: &str, slot: Slot) -> String {
    format!("dlc_{}_{}", id, slot.as_str())
}

fn mib_ceil(bytes: u64) -> u64 {
    (bytes + MIB - 1) / MIB
}

/// Narrow synchronous facade over the lvmd D-Bus service, mirroring
/// `LvmdProxyWrapper`. Kept synchronous like the original blocking proxy
/// calls so `ImageBackend` doesn't need to be async.
#[cfg_attr(test, automock)]
pub trait LvmdProxyTrait: Send + Sync {
    fn create_logical_volumes(&self, configs: &[(String, u64)]) -> Result<()>;
    fn remove_logical_volumes(&self, names: &[String]) -> Result<()>;
    fn activate_logical_volume(&self, name: &str) -> Result<()>;
    fn logical_volume_path(&self, name: &str) -> Result<PathBuf>;
    fn list_logical_volumes(&self) -> Result<Vec<String>>;
}

pub struct LvmBackend<P: LvmdProxyTrait> {
    proxy: P,
    // Image hashing/copy still goes through plain file I/O once a logical
    // volume is activated and its block device path resolved; reuse the
    // file backend's chunked hasher instead of duplicating it.
    file_ops: FileBackend,
    hibernate_resume_in_progress: std::sync::atomic::AtomicBool,
}

impl<P: LvmdProxyTrait> LvmBackend<P> {
    pub fn new(proxy: P, content_dir: PathBuf) -> LvmBackend<P> {
        LvmBackend {
            proxy,
            file_ops: FileBackend::new(content_dir),
            hibernate_resume_in_progress: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Devices resuming from hibernate have a capacity-limited LVM
    /// snapshot; creating new LVs during that window can starve it.
    pub fn set_hibernate_resume_in_progress(&self, in_progress: bool) {
        self.hibernate_resume_in_progress
            .store(in_progress, std::sync::atomic::Ordering::SeqCst);
    }

    fn guard_hibernate_resume(&self) -> Result<()> {
        if self
            .hibernate_resume_in_progress
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            anyhow::bail!("logical volume allocation refused during hibernate resume");
        }
        Ok(())
    }
}

impl<P: LvmdProxyTrait> ImageBackend for LvmBackend<P> {
    fn resolve_path(&self, id: &str, slot: Slot) -> PathBuf {
        self.proxy
            .logical_volume_path(&lv_name(id, slot))
            .unwrap_or_else(|_| PathBuf::from("/dev/null"))
    }

    fn create(&self, id: &str, size: u64) -> Result<()> {
        self.guard_hibernate_resume()?;
        let size_mib = mib_ceil(size);
        let configs = [
            (lv_name(id, Slot::A), size_mib),
            (lv_name(id, Slot::B), size_mib),
        ];
        self.proxy
            .create_logical_volumes(&configs)
            .with_context(|| format!("failed to create logical volumes for {}", id))?;
        for slot in [Slot::A, Slot::B] {
            self.proxy.activate_logical_volume(&lv_name(id, slot))?;
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Vec<(PathBuf, std::io::Error)> {
        let names = vec![lv_name(id, Slot::A), lv_name(id, Slot::B)];
        if let Err(e) = self.proxy.remove_logical_volumes(&names) {
            return vec![(
                PathBuf::from(format!("lv:{}", id)),
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )];
        }
        Vec::new()
    }

    fn hash_file(&self, path: &Path, size: u64) -> Result<Vec<u8>> {
        self.file_ops.hash_file(path, size)
    }

    fn copy_and_hash(&self, src: &Path, dst: &Path, size: u64) -> Result<Vec<u8>> {
        self.file_ops.copy_and_hash(src, dst, size)
    }

    fn make_ready_for_update(&self, id: &str, active_slot: Slot, size: u64) -> Result<()> {
        self.guard_hibernate_resume()?;
        let inactive = lv_name(id, active_slot.other());
        let existing = self.proxy.list_logical_volumes()?;
        if !existing.contains(&inactive) {
            self.proxy
                .create_logical_volumes(&[(inactive.clone(), mib_ceil(size))])?;
        }
        self.proxy.activate_logical_volume(&inactive)
    }
}
