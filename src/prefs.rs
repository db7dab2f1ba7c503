// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Durable per-DLC key/value prefs, the Rust analogue of `Prefs` in the
// original service: a thin wrapper around small files under prefs_dir.
// Presence of the `verified` pref for a slot, with content equal to the
// current verification-value, is what "is_verified" means on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;

use crate::common::Slot;

#[derive(Debug, Clone)]
pub struct Prefs {
    root: PathBuf,
}

impl Prefs {
    pub fn new(prefs_dir: &Path, id: &str) -> Prefs {
        Prefs {
            root: prefs_dir.join(id),
        }
    }

    fn slot_dir(&self, slot: Slot) -> PathBuf {
        self.root.join(slot.as_str())
    }

    fn path(&self, slot: Slot, key: &str) -> PathBuf {
        self.slot_dir(slot).join(key)
    }

    pub fn get(&self, slot: Slot, key: &str) -> Option<String> {
        fs::read_to_string(self.path(slot, key))
            .ok()
            .map(|s| s.trim_end().to_string())
    }

    pub fn exists(&self, slot: Slot, key: &str) -> bool {
        self.path(slot, key).exists()
    }

    pub fn set(&self, slot: Slot, key: &str, value: &str) -> Result<()> {
        let dir = self.slot_dir(slot);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create pref dir {}", dir.display()))?;
        fs::write(self.path(slot, key), value)
            .with_context(|| format!("failed to write pref {}/{}", slot, key))
    }

    pub fn delete(&self, slot: Slot, key: &str) -> Result<()> {
        let path = self.path(slot, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("failed to delete pref {}: {}", path.display(), e);
                Err(e).with_context(|| format!("failed to delete pref {}", path.display()))
            }
        }
    }

    /// Best-effort recursive removal of this DLC's entire prefs tree.
    pub fn delete_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", self.root.display())),
        }
    }
}
