// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Names of the narrow external services this core talks to. Method dispatch
// for this service's own client-facing surface is intentionally not defined
// here; only the services we call out to are.

pub mod update_engine {
    pub const SERVICE_NAME: &str = "org.chromium.UpdateEngine";
    pub const PATH_NAME: &str = "/org/chromium/UpdateEngine";
    pub const INTERFACE_NAME: &str = "org.chromium.UpdateEngineInterface";

    pub const ATTEMPT_INSTALL_METHOD: &str = "AttemptInstall";
    pub const GET_STATUS_ADVANCED_METHOD: &str = "GetStatusAdvanced";
    pub const SET_DLC_ACTIVE_VALUE_METHOD: &str = "SetDlcActiveValue";
    pub const STATUS_UPDATE_SIGNAL: &str = "StatusUpdateAdvanced";
}

pub mod image_loader {
    pub const SERVICE_NAME: &str = "org.chromium.ImageLoader";
    pub const PATH_NAME: &str = "/org/chromium/ImageLoader";
    pub const INTERFACE_NAME: &str = "org.chromium.ImageLoaderInterface";

    pub const LOAD_DLC_IMAGE_METHOD: &str = "LoadDlcImage";
    pub const UNLOAD_DLC_IMAGE_METHOD: &str = "UnloadDlcImage";
}

pub mod lvmd {
    pub const SERVICE_NAME: &str = "org.chromium.Lvmd";
    pub const PATH_NAME: &str = "/org/chromium/Lvmd";
    pub const INTERFACE_NAME: &str = "org.chromium.LvmdInterface";

    pub const LIST_LOGICAL_VOLUMES_METHOD: &str = "ListLogicalVolumes";
    pub const CREATE_LOGICAL_VOLUMES_METHOD: &str = "CreateLogicalVolumes";
    pub const REMOVE_LOGICAL_VOLUMES_METHOD: &str = "RemoveLogicalVolumes";
    pub const ACTIVATE_LOGICAL_VOLUME_METHOD: &str = "ActivateLogicalVolume";
}
