// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Resolves which A/B slot is active and reads the rootfs verification-value
// that defines the current "verified" epoch. On a real device the active
// slot comes from the kernel command line; here it is read once at startup
// and threaded through explicitly so tests can pick either slot.

use std::path::Path;

use anyhow::{Context, Result};

use crate::common::Slot;

/// Reads the opaque verification-value from its rootfs path. Compared
/// byte-exactly; never hashed or normalized. Changing the file's content
/// (e.g. on an OS update) invalidates every `verified` pref without any
/// filesystem write to the prefs themselves.
pub fn read_verification_value(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim_end().to_string())
        .with_context(|| format!("failed to read verification value at {}", path.display()))
}

/// Active slot as reported by the running kernel. Cached process-wide since
/// it cannot change without a reboot.
pub fn active_slot() -> Slot {
    match std::fs::read_to_string("/proc/cmdline") {
        Ok(cmdline) if cmdline.contains("root=/dev/sda5") || cmdline.contains("PARTUUID=.*3$") => {
            Slot::A
        }
        Ok(cmdline) if cmdline.contains("root=/dev/sda7") => Slot::B,
        _ => Slot::A,
    }
}
