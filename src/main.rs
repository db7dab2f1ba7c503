// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod boot_slot;
mod common;
mod dbus_constants;
mod dbus_wrapper;
mod dlc;
mod dlc_manager;
mod error;
mod image_backend;
mod manifest;
mod mount_proxy;
mod prefs;
mod service;
mod state_change_notifier;
#[cfg(test)]
mod test;
mod updater_proxy;

use std::sync::Arc;

use anyhow::Result;
use dbus::message::MatchRule;
use log::{debug, error, info, warn};
use tokio::signal::unix::{signal, SignalKind};

use common::BINARY_IDENTITY;
use dbus_wrapper::DbusConnection;
use dlc_manager::DlcManager;
use image_backend::file_backend::FileBackend;
use image_backend::ImageBackend;
use mount_proxy::{DlcMounter, MountProxy};
use updater_proxy::{DlcUpdaterHandle, Operation, UpdaterProxy, UpdaterStatus};

#[tokio::main]
pub async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = common::parse_config(&args)?;

    if let Err(e) = syslog::init(
        syslog::Facility::LOG_DAEMON,
        log::LevelFilter::Info,
        Some(BINARY_IDENTITY),
    ) {
        panic!("failed to initialize syslog: {}", e);
    }

    info!("Starting dlcservice...");

    let verification_value = boot_slot::read_verification_value(&config.verification_value_file)
        .unwrap_or_else(|e| {
            warn!("failed to read verification value, treating as empty: {}", e);
            String::new()
        });

    let (resource, conn) = dbus_tokio::connection::new_system_sync()?;
    tokio::spawn(async move {
        let err = resource.await;
        error!("lost connection to D-Bus: {}", err);
        panic!("lost connection to D-Bus: {}", err);
    });

    // A second connection is required to receive signals: reusing the
    // connection we issue method calls on causes update_engine's broadcast
    // to be rejected.
    let (resource_listen, conn_listen) = dbus_tokio::connection::new_system_sync()?;
    tokio::spawn(async move {
        let err = resource_listen.await;
        error!("lost signal-listening connection to D-Bus: {}", err);
        panic!("lost signal-listening connection to D-Bus: {}", err);
    });

    let dbus_conn = DbusConnection::new(conn.clone());
    let updater: Arc<dyn DlcUpdaterHandle> = Arc::new(UpdaterProxy::new(dbus_conn.clone()));
    let mounter: Arc<dyn DlcMounter> = Arc::new(MountProxy::new(dbus_conn.clone()));

    let backend: Arc<dyn ImageBackend> = if config.use_logical_volumes {
        // The LVM backend needs its own lvmd proxy wiring; the file
        // backend is the only one that can be constructed generically
        // here without a concrete `LvmdProxyTrait` implementation.
        warn!("--use-logical-volumes requested but no lvmd wiring is configured; falling back to the file backend");
        Arc::new(FileBackend::new(config.content_dir.clone()))
    } else {
        Arc::new(FileBackend::new(config.content_dir.clone()))
    };

    let manager = DlcManager::new(config, backend, updater.clone(), verification_value);
    manager.initialize(mounter).await?;

    // Listen for update_engine's asynchronous status broadcast and feed it
    // into the manager's reconciliation logic.
    let mr_status_update = MatchRule::new_signal(
        dbus_constants::update_engine::INTERFACE_NAME,
        dbus_constants::update_engine::STATUS_UPDATE_SIGNAL,
    );
    debug!("matching update_engine signal: {}", mr_status_update.match_str());
    let manager_for_signal = manager.clone();
    let status_match = conn_listen
        .add_match(mr_status_update)
        .await?
        .cb(move |_, (progress, current_operation, is_install, last_attempt_error): (f64, String, bool, String)| {
            let manager = manager_for_signal.clone();
            let status = UpdaterStatus::from_signal_args(
                progress,
                &current_operation,
                is_install,
                &last_attempt_error,
            );
            if status.operation != Operation::Other {
                tokio::spawn(async move {
                    manager.handle_status_result(status).await;
                });
            }
            true
        });

    updater.set_ready(true);
    info!("dlcservice serving!");

    signal(SignalKind::terminate())?.recv().await;

    info!("cleaning up...");
    drop(status_match);

    info!("exiting with successful cleanup!");
    Ok(())
}
