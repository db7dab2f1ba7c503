// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Thin adapter over the external updater service. Issues install requests
// and turns its status broadcast into a typed `UpdaterStatus`. Retains no
// state beyond the readiness flag; the manager owns everything else.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::debug;

#[cfg(test)]
use mockall::automock;

use crate::dbus_constants::update_engine;
use crate::dbus_wrapper::DbusConnectionTrait;

/// Object-safe facade over `UpdaterProxy<D>` so `DlcManager` can hold one
/// without being generic over the concrete D-Bus connection type.
#[cfg_attr(test, automock)]
pub trait DlcUpdaterHandle: Send + Sync {
    fn install(
        &self,
        id: String,
        options: InstallOptions,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;

    fn status_sync(&self) -> Pin<Box<dyn Future<Output = Result<UpdaterStatus>> + Send>>;

    fn set_active(
        &self,
        id: String,
        active: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;

    fn is_ready(&self) -> bool;
    fn set_ready(&self, ready: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Idle,
    Checking,
    Downloading,
    Verifying,
    Finalizing,
    UpdatedNeedReboot,
    ReportingErrorEvent,
    Other,
}

impl Operation {
    fn parse(raw: &str) -> Operation {
        match raw {
            "IDLE" => Operation::Idle,
            "CHECKING_FOR_UPDATE" => Operation::Checking,
            "DOWNLOADING" => Operation::Downloading,
            "VERIFYING" => Operation::Verifying,
            "FINALIZING" => Operation::Finalizing,
            "UPDATED_NEED_REBOOT" => Operation::UpdatedNeedReboot,
            "REPORTING_ERROR_EVENT" => Operation::ReportingErrorEvent,
            _ => Operation::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdaterStatus {
    pub operation: Operation,
    pub is_install: bool,
    pub progress: f64,
    pub last_attempt_error: String,
}

impl UpdaterStatus {
    /// Parses the tuple carried by `StatusUpdateAdvanced`:
    /// `(last_checked_time, progress, current_operation, new_version,
    /// new_size, is_install, last_attempt_error)`, matching the signal
    /// payload update_engine actually sends.
    pub fn from_signal_args(
        progress: f64,
        current_operation: &str,
        is_install: bool,
        last_attempt_error: &str,
    ) -> UpdaterStatus {
        UpdaterStatus {
            operation: Operation::parse(current_operation),
            is_install,
            progress,
            last_attempt_error: last_attempt_error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub url_override: Option<String>,
    pub scaled: bool,
    pub force_ota: bool,
}

pub struct UpdaterProxy<D: DbusConnectionTrait> {
    dbus_conn: Arc<D>,
    ready: Arc<AtomicBool>,
}

impl<D: DbusConnectionTrait> Clone for UpdaterProxy<D> {
    fn clone(&self) -> Self {
        UpdaterProxy {
            dbus_conn: self.dbus_conn.clone(),
            ready: self.ready.clone(),
        }
    }
}

impl<D: DbusConnectionTrait> UpdaterProxy<D> {
    pub fn new(dbus_conn: Arc<D>) -> UpdaterProxy<D> {
        UpdaterProxy {
            dbus_conn,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn install(&self, id: &str, options: &InstallOptions) -> Result<()> {
        debug!("requesting install of {} from update_engine", id);
        let url = options.url_override.clone().unwrap_or_default();
        self.dbus_conn
            .call_dbus_method::<(), _>(
                update_engine::SERVICE_NAME,
                update_engine::PATH_NAME,
                update_engine::INTERFACE_NAME,
                update_engine::ATTEMPT_INSTALL_METHOD,
                (id.to_string(), url, options.scaled, options.force_ota),
            )
            .await?;
        Ok(())
    }

    pub async fn status_sync(&self) -> Result<UpdaterStatus> {
        let (progress, current_operation, is_install, last_attempt_error): (
            f64,
            String,
            bool,
            String,
        ) = self
            .dbus_conn
            .call_dbus_method(
                update_engine::SERVICE_NAME,
                update_engine::PATH_NAME,
                update_engine::INTERFACE_NAME,
                update_engine::GET_STATUS_ADVANCED_METHOD,
                (),
            )
            .await?;
        Ok(UpdaterStatus::from_signal_args(
            progress,
            &current_operation,
            is_install,
            &last_attempt_error,
        ))
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        debug!("setting active={} for {}", active, id);
        self.dbus_conn
            .call_dbus_method::<(), _>(
                update_engine::SERVICE_NAME,
                update_engine::PATH_NAME,
                update_engine::INTERFACE_NAME,
                update_engine::SET_DLC_ACTIVE_VALUE_METHOD,
                (active, id.to_string()),
            )
            .await?;
        Ok(())
    }
}

impl<D: DbusConnectionTrait + Send + Sync + 'static> DlcUpdaterHandle for UpdaterProxy<D> {
    fn install(
        &self,
        id: String,
        options: InstallOptions,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        let proxy = self.clone();
        Box::pin(async move { proxy.install(&id, &options).await })
    }

    fn status_sync(&self) -> Pin<Box<dyn Future<Output = Result<UpdaterStatus>> + Send>> {
        let proxy = self.clone();
        Box::pin(async move { proxy.status_sync().await })
    }

    fn set_active(
        &self,
        id: String,
        active: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        let proxy = self.clone();
        Box::pin(async move { proxy.set_active(&id, active).await })
    }

    fn is_ready(&self) -> bool {
        UpdaterProxy::is_ready(self)
    }

    fn set_ready(&self, ready: bool) {
        UpdaterProxy::set_ready(self, ready)
    }
}
