// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Manager-level scenarios exercising the single-in-flight invariant and the
// updater status reconciliation loop.

use std::sync::Arc;

use crate::common::Slot;
use crate::dlc_manager::DlcManager;
use crate::error::DlcErrorKind;
use crate::image_backend::ImageBackend;
use crate::mount_proxy::MockDlcMounter;
use crate::state_change_notifier::State;
use crate::test::common::{file_backend, scratch_config, write_basic_manifest};
use crate::updater_proxy::{InstallOptions, MockDlcUpdaterHandle, Operation, UpdaterStatus};

fn mounter_returning(mount_point: &'static str) -> Arc<MockDlcMounter> {
    let mut mock = MockDlcMounter::new();
    mock.expect_load()
        .returning(move |_id, _package, _image_path| {
            Box::pin(async move { Ok(mount_point.to_string()) })
        });
    mock.expect_unload()
        .returning(|_id, _package| Box::pin(async move { Ok(()) }));
    Arc::new(mock)
}

fn status(operation: Operation, is_install: bool, progress: f64, last_attempt_error: &str) -> UpdaterStatus {
    UpdaterStatus {
        operation,
        is_install,
        progress,
        last_attempt_error: last_attempt_error.to_string(),
    }
}

#[tokio::test]
async fn scenario_a_install_already_verified_dlc() {
    let fixture = scratch_config();
    let payload = b"already present and verified".to_vec();
    write_basic_manifest(&fixture.config, "first-dlc", &payload, "");

    let backend = file_backend(&fixture.config);
    std::fs::write(backend.resolve_path("first-dlc", Slot::A), &payload).unwrap();
    let prefs_dir = fixture.config.prefs_dir.join("first-dlc").join("a");
    std::fs::create_dir_all(&prefs_dir).unwrap();
    std::fs::write(prefs_dir.join("verified"), "epoch-1").unwrap();

    let mut updater = MockDlcUpdaterHandle::new();
    updater
        .expect_set_active()
        .withf(|id, active| id == "first-dlc" && *active)
        .times(1)
        .returning(|_, _| Box::pin(async move { Ok(()) }));

    let mounter = mounter_returning("/run/imageloader/first-dlc/package");
    let manager = DlcManager::new(fixture.config, backend, Arc::new(updater), "epoch-1".to_string());
    manager.initialize(mounter).await.unwrap();

    manager
        .install(&"first-dlc".to_string(), InstallOptions::default())
        .await
        .unwrap();

    let state = manager.get_dlc_state(&"first-dlc".to_string()).await.unwrap();
    assert_eq!(state.state, State::Installed);
    assert!(state.is_verified);
}

#[tokio::test]
async fn scenario_b_install_requiring_updater_then_idle() {
    let fixture = scratch_config();
    let payload = b"fetched by the updater".to_vec();
    write_basic_manifest(&fixture.config, "second-dlc", &payload, "");

    let mut updater = MockDlcUpdaterHandle::new();
    updater.expect_is_ready().returning(|| true);
    updater
        .expect_install()
        .times(1)
        .returning(|_, _| Box::pin(async move { Ok(()) }));
    updater
        .expect_set_active()
        .withf(|id, active| id == "second-dlc" && *active)
        .times(1)
        .returning(|_, _| Box::pin(async move { Ok(()) }));

    let backend = file_backend(&fixture.config);
    let mounter = mounter_returning("/run/imageloader/second-dlc/package");
    let manager = DlcManager::new(fixture.config, backend.clone(), Arc::new(updater), "epoch-1".to_string());
    manager.initialize(mounter).await.unwrap();

    manager
        .install(&"second-dlc".to_string(), InstallOptions::default())
        .await
        .unwrap();

    let mut rx = manager.subscribe();
    manager
        .handle_status_result(status(Operation::Downloading, true, 0.5, ""))
        .await;
    let progress_update = rx.recv().await.unwrap();
    assert_eq!(progress_update.progress, 0.5);
    assert_eq!(progress_update.state, State::Installing);

    std::fs::write(backend.resolve_path("second-dlc", Slot::A), &payload).unwrap();
    manager
        .handle_status_result(status(Operation::Idle, true, 1.0, ""))
        .await;

    let final_update = rx.recv().await.unwrap();
    assert_eq!(final_update.state, State::Installed);

    let state = manager.get_dlc_state(&"second-dlc".to_string()).await.unwrap();
    assert_eq!(state.state, State::Installed);
    assert!(state.is_verified);
}

#[tokio::test]
async fn scenario_c_install_fails_verification() {
    let fixture = scratch_config();
    write_basic_manifest(&fixture.config, "second-dlc", b"the real expected payload", "");

    let mut updater = MockDlcUpdaterHandle::new();
    updater.expect_is_ready().returning(|| true);
    updater
        .expect_install()
        .times(1)
        .returning(|_, _| Box::pin(async move { Ok(()) }));

    let backend = file_backend(&fixture.config);
    let mounter = mounter_returning("/run/imageloader/second-dlc/package");
    let manager = DlcManager::new(fixture.config, backend.clone(), Arc::new(updater), "epoch-1".to_string());
    manager.initialize(mounter).await.unwrap();

    manager
        .install(&"second-dlc".to_string(), InstallOptions::default())
        .await
        .unwrap();

    // The updater wrote something, but it doesn't hash to what the manifest
    // expects.
    std::fs::write(
        backend.resolve_path("second-dlc", Slot::A),
        b"corrupted bytes, wrong length!!",
    )
    .unwrap();
    manager
        .handle_status_result(status(Operation::Idle, true, 1.0, ""))
        .await;

    let state = manager.get_dlc_state(&"second-dlc".to_string()).await.unwrap();
    assert_eq!(state.state, State::NotInstalled);
    assert_eq!(state.last_error_code, DlcErrorKind::FailedToVerifyImage);
    assert!(!backend.resolve_path("second-dlc", Slot::A).exists());
}

#[tokio::test]
async fn scenario_d_two_concurrent_installs_are_refused() {
    let fixture = scratch_config();
    write_basic_manifest(&fixture.config, "second-dlc", b"payload-2", "");
    write_basic_manifest(&fixture.config, "third-dlc", b"payload-3", "");

    let mut updater = MockDlcUpdaterHandle::new();
    updater.expect_is_ready().returning(|| true);
    updater
        .expect_install()
        .times(1)
        .returning(|_, _| Box::pin(async move { Ok(()) }));
    updater.expect_set_active().returning(|_, _| Box::pin(async move { Ok(()) }));

    let backend = file_backend(&fixture.config);
    let mounter = mounter_returning("/run/imageloader/dlc/package");
    let manager = DlcManager::new(fixture.config, backend, Arc::new(updater), "epoch-1".to_string());
    manager.initialize(mounter).await.unwrap();

    manager
        .install(&"second-dlc".to_string(), InstallOptions::default())
        .await
        .unwrap();

    let err = manager
        .install(&"third-dlc".to_string(), InstallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DlcErrorKind::Busy);

    let third = manager.get_dlc_state(&"third-dlc".to_string()).await.unwrap();
    assert_eq!(third.state, State::NotInstalled);
    assert_eq!(third.last_error_code, DlcErrorKind::Busy);

    let second = manager.get_dlc_state(&"second-dlc".to_string()).await.unwrap();
    assert_eq!(second.state, State::Installing);
}

#[tokio::test]
async fn scenario_e_tolerance_cap_cancels_a_stuck_install() {
    let fixture = scratch_config();
    write_basic_manifest(&fixture.config, "second-dlc", b"payload-2", "");

    let mut updater = MockDlcUpdaterHandle::new();
    updater.expect_is_ready().returning(|| true);
    updater
        .expect_install()
        .times(1)
        .returning(|_, _| Box::pin(async move { Ok(()) }));

    let backend = file_backend(&fixture.config);
    let mounter = mounter_returning("/run/imageloader/second-dlc/package");
    let manager = DlcManager::new(fixture.config, backend, Arc::new(updater), "epoch-1".to_string());
    manager.initialize(mounter).await.unwrap();

    manager
        .install(&"second-dlc".to_string(), InstallOptions::default())
        .await
        .unwrap();

    for _ in 0..31 {
        manager
            .handle_status_result(status(Operation::Other, false, 0.0, ""))
            .await;
    }

    let state = manager.get_dlc_state(&"second-dlc".to_string()).await.unwrap();
    assert_eq!(state.state, State::NotInstalled);
    assert_eq!(state.last_error_code, DlcErrorKind::FailedInstallInUpdateEngine);
}

#[tokio::test]
async fn install_is_refused_while_updater_is_not_ready() {
    let fixture = scratch_config();
    write_basic_manifest(&fixture.config, "second-dlc", b"payload-2", "");

    let mut updater = MockDlcUpdaterHandle::new();
    updater.expect_is_ready().returning(|| false);
    updater.expect_install().times(0);

    let backend = file_backend(&fixture.config);
    let mounter = mounter_returning("/run/imageloader/second-dlc/package");
    let manager = DlcManager::new(fixture.config, backend, Arc::new(updater), "epoch-1".to_string());
    manager.initialize(mounter).await.unwrap();

    let err = manager
        .install(&"second-dlc".to_string(), InstallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DlcErrorKind::Busy);

    let state = manager.get_dlc_state(&"second-dlc".to_string()).await.unwrap();
    assert_eq!(state.state, State::NotInstalled);
    assert_eq!(state.last_error_code, DlcErrorKind::Busy);
}

#[tokio::test]
async fn scenario_f_uninstall_during_install_is_refused() {
    let fixture = scratch_config();
    write_basic_manifest(&fixture.config, "second-dlc", b"payload-2", "");

    let mut updater = MockDlcUpdaterHandle::new();
    updater.expect_is_ready().returning(|| true);
    updater
        .expect_install()
        .times(1)
        .returning(|_, _| Box::pin(async move { Ok(()) }));

    let backend = file_backend(&fixture.config);
    let mounter = mounter_returning("/run/imageloader/second-dlc/package");
    let manager = DlcManager::new(fixture.config, backend, Arc::new(updater), "epoch-1".to_string());
    manager.initialize(mounter).await.unwrap();

    manager
        .install(&"second-dlc".to_string(), InstallOptions::default())
        .await
        .unwrap();

    let err = manager.uninstall(&"second-dlc".to_string()).await.unwrap_err();
    assert_eq!(err.kind, DlcErrorKind::Busy);

    let state = manager.get_dlc_state(&"second-dlc".to_string()).await.unwrap();
    assert_eq!(state.state, State::Installing);
}
