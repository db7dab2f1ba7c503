// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// The per-DLC state machine. Grounded in `DlcBase`/`Dlc` from the original
// service: a DLC moves NotInstalled -> Installing -> Installed, driven by
// `install`/`finish_install`/`cancel_install`/`uninstall`, with verification
// against the manifest's expected SHA-256 gating every transition into
// Installed.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::common::{Config, DlcId, Package, Slot};
use crate::error::{self, DlcError, DlcErrorKind};
use crate::image_backend::ImageBackend;
use crate::manifest::Manifest;
use crate::mount_proxy::DlcMounter;
use crate::prefs::Prefs;
use crate::state_change_notifier::{DlcState, State};

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    NotInstalled,
    Installing { progress: f64 },
    Installed { root_path: String, image_path: String },
}

pub enum InstallOutcome {
    /// Already mounted and usable, or just finished mounting synchronously
    /// from a verified or locally-copyable image: nothing further for the
    /// manager to do.
    Done,
    /// Already `Installing`; caller should treat this as a no-op success.
    AlreadyInstalling,
    /// A payload fetch through the updater is required before this DLC can
    /// finish installing.
    NeedsUpdater,
}

pub struct Dlc {
    pub id: DlcId,
    pub package: Package,
    manifest: Manifest,
    prefs: Prefs,
    backend: Arc<dyn ImageBackend>,
    mounter: Arc<dyn DlcMounter>,
    active_slot: Slot,
    verification_value: String,
    preloaded_image_path: PathBuf,
    factory_install_image_path: PathBuf,
    deployed_image_path: PathBuf,
    is_official_build: bool,

    phase: Phase,
    is_verified: bool,
    reserve: bool,
    last_error: DlcErrorKind,
}

impl Dlc {
    pub fn new(
        id: DlcId,
        manifest: Manifest,
        config: &Config,
        backend: Arc<dyn ImageBackend>,
        mounter: Arc<dyn DlcMounter>,
        active_slot: Slot,
        verification_value: String,
    ) -> Dlc {
        let package = manifest.package.clone();
        Dlc {
            prefs: Prefs::new(&config.prefs_dir, &id),
            preloaded_image_path: config
                .preloaded_content_dir
                .join(&id)
                .join(&package)
                .join(crate::common::IMAGE_FILE_NAME),
            factory_install_image_path: config
                .factory_install_dir
                .join(&id)
                .join(&package)
                .join(crate::common::IMAGE_FILE_NAME),
            deployed_image_path: config
                .deployed_content_dir
                .join(&id)
                .join(&package)
                .join(crate::common::IMAGE_FILE_NAME),
            is_official_build: config.is_official_build,
            reserve: manifest.reserved,
            id,
            package,
            manifest,
            backend,
            mounter,
            active_slot,
            verification_value,
            phase: Phase::NotInstalled,
            is_verified: false,
            last_error: DlcErrorKind::None,
        }
    }

    /// Loads durable state: the `verified` pref for the active slot, and
    /// (best-effort) reserves slot images up front for `reserved` DLCs.
    /// Does not mount; mounting only happens through `install()`.
    pub fn initialize(&mut self) -> error::Result<()> {
        self.is_verified = self
            .prefs
            .get(self.active_slot, crate::common::VERIFIED_PREF_NAME)
            .as_deref()
            == Some(self.verification_value.as_str());

        if !self.manifest.factory_install && self.factory_install_image_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.factory_install_image_path) {
                warn!(
                    "failed to remove disallowed factory image for {}: {}",
                    self.id, e
                );
            }
        }

        if self.reserve {
            if let Err(e) = self.backend.create(&self.id, self.manifest.allocation_size()) {
                warn!("failed to reserve storage for {}: {}", self.id, e);
            }
        }

        Ok(())
    }

    pub fn state(&self) -> DlcState {
        let (state, progress, root_path, image_path) = match &self.phase {
            Phase::NotInstalled => (State::NotInstalled, 0.0, String::new(), String::new()),
            Phase::Installing { progress } => (State::Installing, *progress, String::new(), String::new()),
            Phase::Installed {
                root_path,
                image_path,
            } => (State::Installed, 1.0, root_path.clone(), image_path.clone()),
        };
        DlcState {
            id: self.id.clone(),
            state,
            progress,
            last_error_code: self.last_error,
            root_path,
            image_path,
            is_verified: self.is_verified,
        }
    }

    pub fn is_installing(&self) -> bool {
        matches!(self.phase, Phase::Installing { .. })
    }

    pub fn is_installed(&self) -> bool {
        matches!(self.phase, Phase::Installed { .. })
    }

    pub fn is_verified(&self) -> bool {
        self.is_verified
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn active_image_path(&self) -> PathBuf {
        self.backend.resolve_path(&self.id, self.active_slot)
    }

    fn mark_verified(&mut self) -> error::Result<()> {
        self.prefs
            .set(
                self.active_slot,
                crate::common::VERIFIED_PREF_NAME,
                &self.verification_value,
            )
            .map_err(|e| error::internal(e.to_string()))?;
        self.is_verified = true;
        Ok(())
    }

    fn mark_unverified(&mut self) {
        if let Err(e) = self
            .prefs
            .delete(self.active_slot, crate::common::VERIFIED_PREF_NAME)
        {
            warn!("failed to clear verified pref for {}: {}", self.id, e);
        }
        self.is_verified = false;
    }

    /// Hashes the first `manifest.size` bytes of the active-slot image and
    /// compares against the manifest's expected hash, marking (or clearing)
    /// the verified pref accordingly.
    fn verify(&mut self) -> error::Result<bool> {
        let expected = self
            .manifest
            .expected_sha256()
            .map_err(|e| error::failed_to_verify_image(e.to_string()))?;
        let actual = self
            .backend
            .hash_file(&self.active_image_path(), self.manifest.size)
            .map_err(|e| error::failed_to_verify_image(e.to_string()))?;
        if actual == expected {
            self.mark_verified()?;
            Ok(true)
        } else {
            self.mark_unverified();
            Ok(false)
        }
    }

    async fn mount(&mut self) -> error::Result<()> {
        let image_path = self.active_image_path();
        let mount_point = self
            .mounter
            .load(
                self.id.clone(),
                self.package.clone(),
                image_path.to_string_lossy().into_owned(),
            )
            .await
            .map_err(|e| error::failed_to_mount_image(e.to_string()))?;

        if self.manifest.mount_file_required {
            if let Err(e) = self.prefs.set(
                self.active_slot,
                crate::common::ROOT_MOUNT_PREF_NAME,
                &mount_point,
            ) {
                warn!("failed to record mount root for {}: {}", self.id, e);
            }
        }

        self.phase = Phase::Installed {
            root_path: mount_point,
            image_path: image_path.to_string_lossy().into_owned(),
        };
        self.last_error = DlcErrorKind::None;
        Ok(())
    }

    async fn unmount(&mut self) -> error::Result<()> {
        self.mounter
            .unload(self.id.clone(), self.package.clone())
            .await
            .map_err(|e| error::internal(e.to_string()))
    }

    /// Best-effort recursive delete of this DLC's on-disk state. Failures
    /// are logged, not propagated: the in-memory transition always
    /// finishes regardless of filesystem trouble.
    fn delete_internal(&mut self) {
        self.mark_unverified();
        if self.reserve {
            debug!("{} is reserved, keeping image files", self.id);
            return;
        }
        for (path, err) in self.backend.delete(&self.id) {
            warn!("failed to delete {}: {}", path.display(), err);
        }
        if let Err(e) = self.prefs.delete_all() {
            warn!("failed to delete prefs for {}: {}", self.id, e);
        }
    }

    fn preloaded_copier(&mut self) -> error::Result<bool> {
        if !self.preloaded_image_path.exists() {
            return Ok(false);
        }
        let expected = self
            .manifest
            .expected_sha256()
            .map_err(|e| error::failed_to_verify_image(e.to_string()))?;
        let actual = self
            .backend
            .copy_and_hash(
                &self.preloaded_image_path,
                &self.active_image_path(),
                self.manifest.size,
            )
            .map_err(|e| error::failed_to_verify_image(e.to_string()))?;
        if actual != expected {
            warn!("preloaded image for {} failed verification", self.id);
            return Ok(false);
        }
        self.mark_verified()?;
        Ok(true)
    }

    fn factory_install_copier(&mut self) -> error::Result<bool> {
        if !self.factory_install_image_path.exists() {
            return Ok(false);
        }
        let expected = self
            .manifest
            .expected_sha256()
            .map_err(|e| error::failed_to_verify_image(e.to_string()))?;
        let actual = self
            .backend
            .copy_and_hash(
                &self.factory_install_image_path,
                &self.active_image_path(),
                self.manifest.size,
            )
            .map_err(|e| error::failed_to_verify_image(e.to_string()))?;
        if actual != expected {
            warn!("factory image for {} failed verification", self.id);
            return Ok(false);
        }
        self.mark_verified()?;
        Ok(true)
    }

    /// Advances a `NotInstalled` DLC as far as it can go without the
    /// updater: reserve space, then try (in order) an already-verified
    /// image, a pre-existing active-slot image, a factory-install copy,
    /// and a preloaded copy. Returns `NeedsUpdater` if none of those apply.
    pub async fn install(&mut self) -> error::Result<InstallOutcome> {
        match &self.phase {
            Phase::Installed { .. } => {
                if let Err(e) = self.mount().await {
                    self.mark_unverified();
                    self.cancel_install(e.kind);
                    return Err(e);
                }
                return Ok(InstallOutcome::Done);
            }
            Phase::Installing { .. } => return Ok(InstallOutcome::AlreadyInstalling),
            Phase::NotInstalled => {}
        }

        self.backend
            .create(&self.id, self.manifest.allocation_size())
            .map_err(|e| error::allocation(e.to_string()))?;
        self.phase = Phase::Installing { progress: 0.0 };
        self.last_error = DlcErrorKind::None;

        if self.is_verified {
            self.mount().await?;
            return Ok(InstallOutcome::Done);
        }

        if self.active_image_path().exists() && self.verify()? {
            self.mount().await?;
            return Ok(InstallOutcome::Done);
        }

        if self.manifest.factory_install && self.factory_install_copier()? {
            self.mount().await?;
            return Ok(InstallOutcome::Done);
        }

        if self.manifest.preload_allowed && !self.is_official_build && self.preloaded_copier()? {
            self.mount().await?;
            return Ok(InstallOutcome::Done);
        }

        Ok(InstallOutcome::NeedsUpdater)
    }

    /// Called once the updater has reported the install stream finished
    /// (`Idle`). Verifies the freshly-written payload and mounts it.
    /// `no_update_available` reflects the updater's `last_attempt_error`:
    /// when set, there was never a payload to verify, so a verification
    /// mismatch is reported as "no image found" rather than "failed to
    /// verify".
    pub async fn finish_install(&mut self, no_update_available: bool) -> error::Result<()> {
        if !matches!(self.phase, Phase::Installing { .. }) {
            return Err(error::internal(format!(
                "finish_install called while {} is not installing",
                self.id
            )));
        }
        if !self.is_verified && !self.verify()? {
            let err = if no_update_available {
                error::no_image_found(format!("no payload found for {}", self.id))
            } else {
                error::failed_to_verify_image(format!("{} failed verification", self.id))
            };
            self.cancel_install(err.kind);
            return Err(err);
        }
        if let Err(e) = self.mount().await {
            self.mark_unverified();
            self.cancel_install(e.kind);
            return Err(e);
        }
        Ok(())
    }

    /// Reverts to `NotInstalled`, recording `cause` and deleting on-disk
    /// state unless this DLC is reserved.
    pub fn cancel_install(&mut self, cause: DlcErrorKind) {
        self.phase = Phase::NotInstalled;
        self.last_error = cause;
        self.delete_internal();
    }

    pub fn set_progress(&mut self, progress: f64) {
        if let Phase::Installing { progress: p } = &mut self.phase {
            *p = p.max(progress).min(1.0);
        }
    }

    pub async fn uninstall(&mut self) -> error::Result<()> {
        if self.is_installing() {
            return Err(error::busy(format!("{} is installing", self.id)));
        }
        self.reserve = false;
        if let Phase::Installed { .. } = self.phase {
            self.unmount().await?;
        }
        self.phase = Phase::NotInstalled;
        self.delete_internal();
        Ok(())
    }

    /// Distinct from `uninstall`: force-deletes on-disk state even if
    /// `reserved`. The busy-while-updating check lives in `DlcManager`,
    /// which alone knows about the global in-flight install.
    pub async fn purge(&mut self) -> error::Result<()> {
        if let Phase::Installed { .. } = self.phase {
            self.unmount().await?;
        }
        self.phase = Phase::NotInstalled;
        self.reserve = false;
        self.mark_unverified();
        for (path, err) in self.backend.delete(&self.id) {
            warn!("failed to delete {}: {}", path.display(), err);
        }
        if let Err(e) = self.prefs.delete_all() {
            warn!("failed to delete prefs for {}: {}", self.id, e);
        }
        Ok(())
    }

    pub fn install_completed(&mut self) -> error::Result<()> {
        self.mark_verified()
    }

    pub fn update_completed(&mut self) -> error::Result<()> {
        self.prefs
            .set(
                self.active_slot.other(),
                crate::common::VERIFIED_PREF_NAME,
                &self.verification_value,
            )
            .map_err(|e| error::internal(e.to_string()))
    }

    /// Prepares the inactive slot for an OS update. Returns whether this
    /// DLC should be included in the update payload list: `false` for
    /// scaled DLCs, user-tied DLCs, and any DLC not currently verified.
    pub fn make_ready_for_update(&mut self, backend: &dyn ImageBackend) -> error::Result<bool> {
        if self.manifest.scaled || self.manifest.user_tied {
            return Ok(false);
        }
        if !self.is_verified {
            return Ok(false);
        }
        // Clear the inactive pref before touching disk: a crash here must
        // leave the inactive slot in a known-unverified state, never a
        // stale verified stamp pointing at an image that was never
        // actually refreshed.
        if let Err(e) = self
            .prefs
            .delete(self.active_slot.other(), crate::common::VERIFIED_PREF_NAME)
        {
            warn!("failed to clear inactive verified pref for {}: {}", self.id, e);
        }
        backend
            .make_ready_for_update(&self.id, self.active_slot, self.manifest.allocation_size())
            .map_err(|e| error::internal(e.to_string()))?;
        Ok(true)
    }

    /// Dev/test-image only: ingests a pre-existing payload from the deploy
    /// directory into the active slot. Does not mount.
    pub fn deploy(&mut self) -> error::Result<()> {
        if self.is_official_build {
            return Err(error::internal("deploy is unavailable on official builds"));
        }
        if !matches!(self.phase, Phase::NotInstalled) {
            return Err(error::busy(format!("{} is not in a deployable state", self.id)));
        }
        if !self.deployed_image_path.exists() {
            return Err(error::no_image_found(format!(
                "no deployed payload for {}",
                self.id
            )));
        }
        let expected = self
            .manifest
            .expected_sha256()
            .map_err(|e| error::failed_to_verify_image(e.to_string()))?;
        self.backend
            .create(&self.id, self.manifest.allocation_size())
            .map_err(|e| error::allocation(e.to_string()))?;
        let actual = self
            .backend
            .copy_and_hash(
                &self.deployed_image_path,
                &self.active_image_path(),
                self.manifest.size,
            )
            .map_err(|e| error::failed_to_verify_image(e.to_string()))?;
        if actual != expected {
            return Err(error::failed_to_verify_image(format!(
                "deployed payload for {} failed verification",
                self.id
            )));
        }
        self.mark_verified()
    }

    /// Unmounts and returns to `NotInstalled` without deleting image
    /// files. Refused while installing.
    pub async fn unload(&mut self) -> error::Result<()> {
        if self.is_installing() {
            return Err(error::busy(format!("{} is installing", self.id)));
        }
        if let Phase::Installed { .. } = self.phase {
            self.unmount().await?;
        }
        self.phase = Phase::NotInstalled;
        Ok(())
    }

    pub fn used_bytes_on_disk(&self) -> u64 {
        std::fs::metadata(self.active_image_path())
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for Dlc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dlc")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("is_verified", &self.is_verified)
            .finish()
    }
}

/// A best-effort summary used by `GetExistingDlcs`.
pub struct DlcSummary {
    pub id: DlcId,
    pub name: String,
    pub description: String,
    pub used_bytes_on_disk: u64,
    pub is_removable: bool,
}

impl Dlc {
    pub fn summary(&self) -> DlcSummary {
        DlcSummary {
            id: self.id.clone(),
            name: self.manifest.name.clone().unwrap_or_default(),
            description: self.manifest.description.clone().unwrap_or_default(),
            used_bytes_on_disk: self.used_bytes_on_disk(),
            is_removable: !self.reserve,
        }
    }
}

// `DlcError` derives from kind+message; keep it importable from this module
// for callers that only need the type.
pub use crate::error::DlcError as Error;
