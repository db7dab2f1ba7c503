// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Thin adapter over the external image-loader service: mounts and unmounts
// a DLC's active-slot image. Pure translation layer, no retained state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;

#[cfg(test)]
use mockall::automock;

use crate::dbus_constants::image_loader;
use crate::dbus_wrapper::DbusConnectionTrait;

/// Object-safe facade over `MountProxy<D>` so `Dlc` can hold one without
/// being generic over the concrete D-Bus connection type, mirroring how
/// `DbusConnectionTrait` itself erases its connection behind boxed futures.
#[cfg_attr(test, automock)]
pub trait DlcMounter: Send + Sync {
    fn load(
        &self,
        id: String,
        package: String,
        image_path: String,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send>>;

    fn unload(
        &self,
        id: String,
        package: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

pub struct MountProxy<D: DbusConnectionTrait> {
    dbus_conn: Arc<D>,
}

impl<D: DbusConnectionTrait> MountProxy<D> {
    pub fn new(dbus_conn: Arc<D>) -> MountProxy<D> {
        MountProxy { dbus_conn }
    }

    pub async fn load(&self, id: &str, package: &str, image_path: &str) -> Result<String> {
        debug!("requesting mount of {} ({})", id, image_path);
        let (mount_point,): (String,) = self
            .dbus_conn
            .call_dbus_method(
                image_loader::SERVICE_NAME,
                image_loader::PATH_NAME,
                image_loader::INTERFACE_NAME,
                image_loader::LOAD_DLC_IMAGE_METHOD,
                (id.to_string(), package.to_string(), image_path.to_string()),
            )
            .await
            .with_context(|| format!("LoadDlcImage failed for {}", id))?;
        if mount_point.is_empty() {
            anyhow::bail!("imageloader returned an empty mount point for {}", id);
        }
        Ok(mount_point)
    }

    pub async fn unload(&self, id: &str, package: &str) -> Result<()> {
        debug!("requesting unmount of {}", id);
        let (success,): (bool,) = self
            .dbus_conn
            .call_dbus_method(
                image_loader::SERVICE_NAME,
                image_loader::PATH_NAME,
                image_loader::INTERFACE_NAME,
                image_loader::UNLOAD_DLC_IMAGE_METHOD,
                (id.to_string(), package.to_string()),
            )
            .await
            .with_context(|| format!("UnloadDlcImage failed for {}", id))?;
        if !success {
            anyhow::bail!("imageloader declined to unload {}", id);
        }
        Ok(())
    }
}

impl<D: DbusConnectionTrait + Send + Sync + 'static> DlcMounter for MountProxy<D> {
    fn load(
        &self,
        id: String,
        package: String,
        image_path: String,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send>> {
        let id2 = id;
        let package2 = package;
        let image_path2 = image_path;
        let conn = self.dbus_conn.clone();
        let proxy = MountProxy { dbus_conn: conn };
        Box::pin(async move { proxy.load(&id2, &package2, &image_path2).await })
    }

    fn unload(
        &self,
        id: String,
        package: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        let id2 = id;
        let package2 = package;
        let conn = self.dbus_conn.clone();
        let proxy = MountProxy { dbus_conn: conn };
        Box::pin(async move { proxy.unload(&id2, &package2).await })
    }
}
