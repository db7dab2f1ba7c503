// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Domain error kinds returned by DLC operations. Identifiers are stable;
// they are reported to clients and recorded as the last error on a DLC.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlcErrorKind {
    #[error("none")]
    None,
    #[error("invalid dlc")]
    InvalidDlc,
    #[error("internal")]
    Internal,
    #[error("busy")]
    Busy,
    #[error("need reboot")]
    NeedReboot,
    #[error("allocation failure")]
    Allocation,
    #[error("no image found")]
    NoImageFound,
    #[error("failed to create directory")]
    FailedToCreateDirectory,
    #[error("failed to verify image")]
    FailedToVerifyImage,
    #[error("failed to mount image")]
    FailedToMountImage,
    #[error("update_engine reported an install failure")]
    FailedInstallInUpdateEngine,
    #[error("failed to allocate storage during hibernate resume")]
    FailedCreationDuringHibernateResume,
    #[error("internal failure")]
    FailedInternal,
}

impl Default for DlcErrorKind {
    fn default() -> Self {
        DlcErrorKind::None
    }
}

#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct DlcError {
    pub kind: DlcErrorKind,
    pub message: String,
}

impl DlcError {
    pub fn new(kind: DlcErrorKind, message: impl Into<String>) -> Self {
        DlcError {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DlcError>;

// Convenience constructors mirroring the error kinds above, used throughout
// dlc.rs and dlc_manager.rs so call sites read as `Err(invalid_dlc(&id))`.
macro_rules! error_ctor {
    ($name:ident, $kind:ident) => {
        pub fn $name(message: impl Into<String>) -> DlcError {
            DlcError::new(DlcErrorKind::$kind, message)
        }
    };
}

error_ctor!(invalid_dlc, InvalidDlc);
error_ctor!(internal, Internal);
error_ctor!(busy, Busy);
error_ctor!(need_reboot, NeedReboot);
error_ctor!(allocation, Allocation);
error_ctor!(no_image_found, NoImageFound);
error_ctor!(failed_to_create_directory, FailedToCreateDirectory);
error_ctor!(failed_to_verify_image, FailedToVerifyImage);
error_ctor!(failed_to_mount_image, FailedToMountImage);
error_ctor!(failed_install_in_update_engine, FailedInstallInUpdateEngine);
error_ctor!(
    failed_creation_during_hibernate_resume,
    FailedCreationDuringHibernateResume
);
error_ctor!(failed_internal, FailedInternal);
