// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Entity-level tests: the `NotInstalled -> Installing -> Installed` machine
// in isolation, with a real `FileBackend` and a mocked mount proxy.

use std::sync::Arc;

use crate::common::Slot;
use crate::dlc::{Dlc, InstallOutcome};
use crate::error::DlcErrorKind;
use crate::image_backend::ImageBackend;
use crate::mount_proxy::MockDlcMounter;
use crate::test::common::{file_backend, read_manifest, scratch_config, write_basic_manifest};

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

#[tokio::test]
async fn install_succeeds_synchronously_from_preloaded_image() {
    let fixture = scratch_config();
    let payload = b"preloaded payload bytes".to_vec();
    write_basic_manifest(
        &fixture.config,
        "sample-dlc",
        &payload,
        r#", "preload-allowed": true"#,
    );
    let manifest = read_manifest(&fixture.config, "sample-dlc");

    let preloaded_path = fixture
        .config
        .preloaded_content_dir
        .join("sample-dlc")
        .join("package")
        .join(crate::common::IMAGE_FILE_NAME);
    std::fs::create_dir_all(preloaded_path.parent().unwrap()).unwrap();
    std::fs::write(&preloaded_path, &payload).unwrap();

    let mut dlc = Dlc::new(
        "sample-dlc".to_string(),
        manifest,
        &fixture.config,
        file_backend(&fixture.config),
        mounter_returning("/run/imageloader/sample-dlc/package"),
        Slot::A,
        "epoch-1".to_string(),
    );

    let outcome = dlc.install().await.unwrap();
    assert!(matches!(outcome, InstallOutcome::Done));
    assert!(dlc.is_installed());
    assert!(dlc.is_verified());
}

#[tokio::test]
async fn install_requests_updater_when_no_local_image_is_available() {
    let fixture = scratch_config();
    let payload = b"payload only the updater can provide".to_vec();
    write_basic_manifest(&fixture.config, "second-dlc", &payload, "");
    let manifest = read_manifest(&fixture.config, "second-dlc");

    let mut dlc = Dlc::new(
        "second-dlc".to_string(),
        manifest,
        &fixture.config,
        file_backend(&fixture.config),
        mounter_returning("/run/imageloader/second-dlc/package"),
        Slot::A,
        "epoch-1".to_string(),
    );

    let outcome = dlc.install().await.unwrap();
    assert!(matches!(outcome, InstallOutcome::NeedsUpdater));
    assert!(dlc.is_installing());
    assert!(!dlc.is_verified());
}

#[tokio::test]
async fn finish_install_verifies_and_mounts_the_freshly_written_payload() {
    let fixture = scratch_config();
    let payload = b"the real payload the updater wrote".to_vec();
    write_basic_manifest(&fixture.config, "second-dlc", &payload, "");
    let manifest = read_manifest(&fixture.config, "second-dlc");
    let backend = file_backend(&fixture.config);

    let mut dlc = Dlc::new(
        "second-dlc".to_string(),
        manifest,
        &fixture.config,
        backend.clone(),
        mounter_returning("/run/imageloader/second-dlc/package"),
        Slot::A,
        "epoch-1".to_string(),
    );

    assert!(matches!(
        dlc.install().await.unwrap(),
        InstallOutcome::NeedsUpdater
    ));

    // Simulate update_engine having written the real payload into the
    // active-slot image the updater was told to target.
    std::fs::write(backend.resolve_path("second-dlc", Slot::A), &payload).unwrap();

    dlc.finish_install(true).await.unwrap();
    assert!(dlc.is_installed());
    assert!(dlc.is_verified());
}

#[tokio::test]
async fn finish_install_fails_verification_and_reports_no_image_found() {
    let fixture = scratch_config();
    let payload = b"never actually written".to_vec();
    write_basic_manifest(&fixture.config, "second-dlc", &payload, "");
    let manifest = read_manifest(&fixture.config, "second-dlc");

    let mut dlc = Dlc::new(
        "second-dlc".to_string(),
        manifest,
        &fixture.config,
        file_backend(&fixture.config),
        mounter_returning("/run/imageloader/second-dlc/package"),
        Slot::A,
        "epoch-1".to_string(),
    );

    assert!(matches!(
        dlc.install().await.unwrap(),
        InstallOutcome::NeedsUpdater
    ));

    let err = dlc.finish_install(true).await.unwrap_err();
    assert_eq!(err.kind, DlcErrorKind::NoImageFound);
    assert!(!dlc.is_installed());
    assert_eq!(dlc.state().last_error_code, DlcErrorKind::NoImageFound);
}

#[tokio::test]
async fn uninstall_is_refused_while_installing() {
    let fixture = scratch_config();
    let payload = b"payload".to_vec();
    write_basic_manifest(&fixture.config, "second-dlc", &payload, "");
    let manifest = read_manifest(&fixture.config, "second-dlc");

    let mut dlc = Dlc::new(
        "second-dlc".to_string(),
        manifest,
        &fixture.config,
        file_backend(&fixture.config),
        mounter_returning("/run/imageloader/second-dlc/package"),
        Slot::A,
        "epoch-1".to_string(),
    );

    assert!(matches!(
        dlc.install().await.unwrap(),
        InstallOutcome::NeedsUpdater
    ));

    let err = dlc.uninstall().await.unwrap_err();
    assert_eq!(err.kind, DlcErrorKind::Busy);
    assert!(dlc.is_installing());
}

#[tokio::test]
async fn cancel_install_keeps_image_files_for_a_reserved_dlc() {
    let fixture = scratch_config();
    let payload = b"payload".to_vec();
    write_basic_manifest(&fixture.config, "reserved-dlc", &payload, r#", "reserved": true"#);
    let manifest = read_manifest(&fixture.config, "reserved-dlc");
    let backend = file_backend(&fixture.config);

    let mut dlc = Dlc::new(
        "reserved-dlc".to_string(),
        manifest,
        &fixture.config,
        backend.clone(),
        mounter_returning("/run/imageloader/reserved-dlc/package"),
        Slot::A,
        "epoch-1".to_string(),
    );

    assert!(matches!(
        dlc.install().await.unwrap(),
        InstallOutcome::NeedsUpdater
    ));
    dlc.cancel_install(DlcErrorKind::FailedInstallInUpdateEngine);

    assert!(!dlc.is_installing());
    assert!(backend.resolve_path("reserved-dlc", Slot::A).exists());
}

#[tokio::test]
async fn make_ready_for_update_skips_scaled_dlcs() {
    let fixture = scratch_config();
    let payload = b"payload".to_vec();
    write_basic_manifest(&fixture.config, "scaled-dlc", &payload, r#", "scaled": true"#);
    let manifest = read_manifest(&fixture.config, "scaled-dlc");
    let backend = file_backend(&fixture.config);

    let mut dlc = Dlc::new(
        "scaled-dlc".to_string(),
        manifest,
        &fixture.config,
        backend.clone(),
        mounter_returning("/run/imageloader/scaled-dlc/package"),
        Slot::A,
        "epoch-1".to_string(),
    );

    let should_update = dlc.make_ready_for_update(backend.as_ref()).unwrap();
    assert!(!should_update);
}
