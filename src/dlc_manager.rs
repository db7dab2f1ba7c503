// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Owns the set of all supported DLCs, dispatches client operations, and
// reconciles with the updater's asynchronous status signal. Grounded in
// `DlcService` from the original source: constants, the single-in-flight
// invariant, `HandleStatusResult`'s tolerance cap, and the watchdog poll
// are all carried over unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::boot_slot;
use crate::common::{Config, DlcId, Slot, PERIODIC_INSTALL_CHECK_INTERVAL, TOLERANCE_CAP};
use crate::dlc::{Dlc, DlcSummary, InstallOutcome};
use crate::error::{self, DlcErrorKind};
use crate::image_backend::ImageBackend;
use crate::manifest;
use crate::mount_proxy::DlcMounter;
use crate::state_change_notifier::{DlcState, StateChangeNotifier};
use crate::updater_proxy::{DlcUpdaterHandle, InstallOptions, Operation, UpdaterStatus};

// update_engine's sentinel `last_attempt_error` text for "nothing to
// install", distinguishing "never got a payload" from "got a payload that
// failed verification" when `FinishInstall` runs.
const NO_UPDATE_AVAILABLE_ERROR: &str = "no update available";

pub enum UnloadSelector {
    Id(DlcId),
    AllUserTied,
    AllScaled,
}

struct ManagerState {
    dlcs: HashMap<DlcId, Dlc>,
    installing_dlc_id: Option<DlcId>,
    tolerance: u32,
}

pub struct DlcManager {
    config: Config,
    backend: Arc<dyn ImageBackend>,
    updater: Arc<dyn DlcUpdaterHandle>,
    notifier: StateChangeNotifier,
    active_slot: Slot,
    verification_value: String,
    state: Mutex<ManagerState>,
    watchdog_scheduled: AtomicBool,
}

pub type DlcManagerPtr = Arc<DlcManager>;

impl DlcManager {
    /// `backend` is selected by the caller at startup based on
    /// `config.use_logical_volumes` (see `main.rs`), since only it has the
    /// lvmd D-Bus connection the LVM backend needs.
    pub fn new(
        config: Config,
        backend: Arc<dyn ImageBackend>,
        updater: Arc<dyn DlcUpdaterHandle>,
        verification_value: String,
    ) -> DlcManagerPtr {
        let active_slot = boot_slot::active_slot();
        Arc::new(DlcManager {
            config,
            backend,
            updater,
            notifier: StateChangeNotifier::new(),
            active_slot,
            verification_value,
            state: Mutex::new(ManagerState {
                dlcs: HashMap::new(),
                installing_dlc_id: None,
                tolerance: 0,
            }),
            watchdog_scheduled: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DlcState> {
        self.notifier.subscribe()
    }

    /// Discovers every DLC advertised by the rootfs manifest directory,
    /// constructs and initializes an entity for each, and garbage-collects
    /// on-disk content for ids no longer supported.
    pub async fn initialize(&self, mounter: Arc<dyn DlcMounter>) -> error::Result<()> {
        let ids = manifest::scan_supported_dlc_ids(&self.config.manifest_dir)
            .map_err(|e| error::internal(e.to_string()))?;

        let mut state = self.state.lock().await;
        for id in &ids {
            let manifest = match manifest::load_manifest(&self.config.manifest_dir, id) {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping {}: {}", id, e);
                    continue;
                }
            };
            let mut dlc = Dlc::new(
                id.clone(),
                manifest,
                &self.config,
                self.backend.clone(),
                mounter.clone(),
                self.active_slot,
                self.verification_value.clone(),
            );
            if let Err(e) = dlc.initialize() {
                warn!("failed to initialize {}: {}", id, e);
                continue;
            }
            state.dlcs.insert(id.clone(), dlc);
        }
        self.cleanup_unsupported(&mut state, &ids);
        info!("initialized {} supported dlcs", state.dlcs.len());
        Ok(())
    }

    fn cleanup_unsupported(&self, state: &mut ManagerState, supported_ids: &[DlcId]) {
        let content_dir = &self.config.content_dir;
        let entries = match std::fs::read_dir(content_dir) {
            Ok(e) => e,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if supported_ids.contains(&name) {
                continue;
            }
            debug!("removing orphaned content dir for unsupported dlc {}", name);
            if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                warn!("failed to remove orphaned dir {}: {}", entry.path().display(), e);
            }
        }
        let _ = state; // state.dlcs already excludes unsupported ids by construction
    }

    fn dlc_state_or_invalid(&self, state: &ManagerState, id: &DlcId) -> error::Result<DlcState> {
        state
            .dlcs
            .get(id)
            .map(Dlc::state)
            .ok_or_else(|| error::invalid_dlc(format!("unknown dlc {}", id)))
    }

    pub async fn get_dlc_state(&self, id: &DlcId) -> error::Result<DlcState> {
        let state = self.state.lock().await;
        self.dlc_state_or_invalid(&state, id)
    }

    pub async fn get_installed(&self) -> Vec<DlcId> {
        let state = self.state.lock().await;
        state
            .dlcs
            .values()
            .filter(|d| d.is_installed())
            .map(|d| d.id.clone())
            .collect()
    }

    pub async fn get_existing_dlcs(&self) -> Vec<DlcSummary> {
        let state = self.state.lock().await;
        state.dlcs.values().map(Dlc::summary).collect()
    }

    pub async fn get_dlcs_to_update(&self) -> error::Result<Vec<DlcId>> {
        let mut state = self.state.lock().await;
        let mut ids = Vec::new();
        for dlc in state.dlcs.values_mut() {
            if dlc.make_ready_for_update(self.backend.as_ref())? {
                ids.push(dlc.id.clone());
            }
        }
        Ok(ids)
    }

    pub async fn install(self: &Arc<Self>, id: &DlcId, options: InstallOptions) -> error::Result<()> {
        let outcome = {
            let mut state = self.state.lock().await;
            let dlc = match state.dlcs.get_mut(id) {
                Some(d) => d,
                None => return Err(error::invalid_dlc(format!("unknown dlc {}", id))),
            };
            let outcome = dlc.install().await;
            self.notifier.notify(dlc.state());
            outcome
        }?;

        match outcome {
            InstallOutcome::Done => {
                self.mark_active(id, true).await;
                Ok(())
            }
            InstallOutcome::AlreadyInstalling => Ok(()),
            InstallOutcome::NeedsUpdater => self.request_updater_install(id, options).await,
        }
    }

    /// Best-effort: tells the updater which DLCs are in active use so it can
    /// skip fetching updates for ones that aren't, per `SetDlcActiveValue`.
    async fn mark_active(&self, id: &DlcId, active: bool) {
        if let Err(e) = self.updater.set_active(id.clone(), active).await {
            warn!("SetDlcActiveValue({}, {}) failed: {}", active, id, e);
        }
    }

    async fn request_updater_install(
        self: &Arc<Self>,
        id: &DlcId,
        options: InstallOptions,
    ) -> error::Result<()> {
        if !self.updater.is_ready() {
            let mut state = self.state.lock().await;
            if let Some(dlc) = state.dlcs.get_mut(id) {
                dlc.cancel_install(DlcErrorKind::Busy);
                self.notifier.notify(dlc.state());
            }
            return Err(error::busy(format!(
                "updater is not ready yet, cannot install {}",
                id
            )));
        }

        {
            let mut state = self.state.lock().await;
            match state.installing_dlc_id.clone() {
                Some(existing) if &existing != id => {
                    if let Some(dlc) = state.dlcs.get_mut(id) {
                        dlc.cancel_install(DlcErrorKind::Busy);
                        self.notifier.notify(dlc.state());
                    }
                    return Err(error::busy(format!(
                        "{} is already installing, cannot install {}",
                        existing, id
                    )));
                }
                Some(_) => {}
                None => {
                    state.installing_dlc_id = Some(id.clone());
                    state.tolerance = 0;
                }
            }
        }

        self.schedule_watchdog_if_needed();

        if let Err(e) = self.updater.install(id.clone(), options).await {
            let mut state = self.state.lock().await;
            if let Some(dlc) = state.dlcs.get_mut(id) {
                dlc.cancel_install(DlcErrorKind::FailedInstallInUpdateEngine);
                self.notifier.notify(dlc.state());
            }
            state.installing_dlc_id = None;
            return Err(error::failed_install_in_update_engine(e.to_string()));
        }
        Ok(())
    }

    pub async fn uninstall(&self, id: &DlcId) -> error::Result<()> {
        {
            let mut state = self.state.lock().await;
            let dlc = state
                .dlcs
                .get_mut(id)
                .ok_or_else(|| error::invalid_dlc(format!("unknown dlc {}", id)))?;
            let result = dlc.uninstall().await;
            self.notifier.notify(dlc.state());
            result?;
        }
        self.mark_active(id, false).await;
        Ok(())
    }

    /// Refuses while any install is in flight for a still-verified DLC
    /// (yanking data out from under the updater is unsafe); otherwise
    /// force-deletes on-disk state regardless of `reserved`.
    pub async fn purge(&self, id: &DlcId) -> error::Result<()> {
        {
            let mut state = self.state.lock().await;
            let install_in_flight = state.installing_dlc_id.is_some();
            let dlc = state
                .dlcs
                .get_mut(id)
                .ok_or_else(|| error::invalid_dlc(format!("unknown dlc {}", id)))?;
            if install_in_flight && dlc.is_verified() {
                return Err(error::busy(format!(
                    "an install is in flight, refusing to purge {}",
                    id
                )));
            }
            let result = dlc.purge().await;
            self.notifier.notify(dlc.state());
            result?;
        }
        self.mark_active(id, false).await;
        Ok(())
    }

    pub async fn deploy(&self, id: &DlcId) -> error::Result<()> {
        let mut state = self.state.lock().await;
        let dlc = state
            .dlcs
            .get_mut(id)
            .ok_or_else(|| error::invalid_dlc(format!("unknown dlc {}", id)))?;
        let result = dlc.deploy();
        self.notifier.notify(dlc.state());
        result
    }

    pub async fn install_completed(&self, ids: &[DlcId]) -> error::Result<()> {
        let mut state = self.state.lock().await;
        for id in ids {
            if let Some(dlc) = state.dlcs.get_mut(id) {
                dlc.install_completed()?;
                self.notifier.notify(dlc.state());
            }
        }
        Ok(())
    }

    pub async fn update_completed(&self, ids: &[DlcId]) -> error::Result<()> {
        let mut state = self.state.lock().await;
        for id in ids {
            if let Some(dlc) = state.dlcs.get_mut(id) {
                dlc.update_completed()?;
            }
        }
        Ok(())
    }

    pub async fn unload(&self, selector: UnloadSelector) -> error::Result<()> {
        let mut state = self.state.lock().await;
        let ids: Vec<DlcId> = match &selector {
            UnloadSelector::Id(id) => vec![id.clone()],
            UnloadSelector::AllUserTied => state
                .dlcs
                .values()
                .filter(|d| d.manifest().user_tied)
                .map(|d| d.id.clone())
                .collect(),
            UnloadSelector::AllScaled => state
                .dlcs
                .values()
                .filter(|d| d.manifest().scaled)
                .map(|d| d.id.clone())
                .collect(),
        };
        for id in ids {
            if let Some(dlc) = state.dlcs.get_mut(&id) {
                if let Err(e) = dlc.unload().await {
                    warn!("failed to unload {}: {}", id, e);
                    continue;
                }
                self.notifier.notify(dlc.state());
            }
        }
        Ok(())
    }

    fn schedule_watchdog_if_needed(self: &Arc<Self>) {
        if self.watchdog_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PERIODIC_INSTALL_CHECK_INTERVAL).await;
                let still_installing = {
                    let state = manager.state.lock().await;
                    state.installing_dlc_id.is_some()
                };
                if !still_installing {
                    manager.watchdog_scheduled.store(false, Ordering::SeqCst);
                    return;
                }
                match manager.updater.status_sync().await {
                    Ok(status) => manager.handle_status_result(status).await,
                    Err(e) => warn!("update_engine status_sync failed: {}", e),
                }
            }
        });
    }

    /// Core reconciliation of asynchronous updater status against the
    /// single in-flight install. Mirrors `DlcService::HandleStatusResult`.
    pub async fn handle_status_result(&self, status: UpdaterStatus) {
        let mut state = self.state.lock().await;
        let installing_id = match state.installing_dlc_id.clone() {
            Some(id) => id,
            None => {
                state.tolerance = 0;
                return;
            }
        };

        if !status.is_install {
            state.tolerance += 1;
            if state.tolerance > TOLERANCE_CAP {
                self.cancel_locked(&mut state, &installing_id, DlcErrorKind::FailedInstallInUpdateEngine);
            }
            return;
        }
        state.tolerance = 0;

        match status.operation {
            Operation::UpdatedNeedReboot => {
                self.cancel_locked(&mut state, &installing_id, DlcErrorKind::NeedReboot);
            }
            Operation::ReportingErrorEvent => {
                self.cancel_locked(
                    &mut state,
                    &installing_id,
                    DlcErrorKind::FailedInstallInUpdateEngine,
                );
            }
            Operation::Downloading => {
                for dlc in state.dlcs.values_mut() {
                    if dlc.is_installing() {
                        dlc.set_progress(status.progress);
                    }
                }
                let snapshots: Vec<DlcState> = state
                    .dlcs
                    .values()
                    .filter(|d| d.is_installing())
                    .map(Dlc::state)
                    .collect();
                for snapshot in snapshots {
                    self.notifier.notify(snapshot);
                }
            }
            Operation::Idle => {
                let no_update_available = status.last_attempt_error == NO_UPDATE_AVAILABLE_ERROR;
                let mut succeeded = false;
                if let Some(dlc) = state.dlcs.get_mut(&installing_id) {
                    match dlc.finish_install(no_update_available).await {
                        Ok(()) => succeeded = true,
                        Err(e) => warn!("finish_install failed for {}: {}", installing_id, e),
                    }
                    self.notifier.notify(dlc.state());
                }
                state.installing_dlc_id = None;
                drop(state);
                if succeeded {
                    self.mark_active(&installing_id, true).await;
                }
                return;
            }
            Operation::Checking | Operation::Verifying | Operation::Finalizing | Operation::Other => {}
        }
    }

    fn cancel_locked(&self, state: &mut ManagerState, id: &DlcId, cause: DlcErrorKind) {
        if let Some(dlc) = state.dlcs.get_mut(id) {
            dlc.cancel_install(cause);
            self.notifier.notify(dlc.state());
        }
        state.installing_dlc_id = None;
    }
}
