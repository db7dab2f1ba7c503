// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Entry points a future request adaptor would call into. Unlike
// shadercached's D-Bus method handlers, these take plain typed arguments:
// wire framing for this service's own client surface is out of scope here,
// only the proxies to collaborating services are implemented.

use crate::common::DlcId;
use crate::dlc::DlcSummary;
use crate::dlc_manager::{DlcManagerPtr, UnloadSelector};
use crate::error;
use crate::state_change_notifier::DlcState;
use crate::updater_proxy::InstallOptions;

#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub id: DlcId,
    pub url_override: Option<String>,
    pub scaled: bool,
    pub force_ota: bool,
}

pub async fn handle_install(manager: DlcManagerPtr, request: InstallRequest) -> error::Result<()> {
    let options = InstallOptions {
        url_override: request.url_override,
        scaled: request.scaled,
        force_ota: request.force_ota,
    };
    manager.install(&request.id, options).await
}

pub async fn handle_uninstall(manager: DlcManagerPtr, id: DlcId) -> error::Result<()> {
    manager.uninstall(&id).await
}

pub async fn handle_purge(manager: DlcManagerPtr, id: DlcId) -> error::Result<()> {
    manager.purge(&id).await
}

pub async fn handle_deploy(manager: DlcManagerPtr, id: DlcId) -> error::Result<()> {
    manager.deploy(&id).await
}

pub async fn handle_unload(manager: DlcManagerPtr, selector: UnloadSelector) -> error::Result<()> {
    manager.unload(selector).await
}

pub async fn handle_get_dlc_state(manager: DlcManagerPtr, id: DlcId) -> error::Result<DlcState> {
    manager.get_dlc_state(&id).await
}

pub async fn handle_get_installed(manager: DlcManagerPtr) -> Vec<DlcId> {
    manager.get_installed().await
}

pub async fn handle_get_existing_dlcs(manager: DlcManagerPtr) -> Vec<DlcSummary> {
    manager.get_existing_dlcs().await
}

pub async fn handle_get_dlcs_to_update(manager: DlcManagerPtr) -> error::Result<Vec<DlcId>> {
    manager.get_dlcs_to_update().await
}

pub async fn handle_install_completed(manager: DlcManagerPtr, ids: Vec<DlcId>) -> error::Result<()> {
    manager.install_completed(&ids).await
}

pub async fn handle_update_completed(manager: DlcManagerPtr, ids: Vec<DlcId>) -> error::Result<()> {
    manager.update_completed(&ids).await
}

