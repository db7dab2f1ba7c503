// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::time::Duration;

pub type DlcId = String;
pub type Package = String;

pub const BINARY_IDENTITY: &str = "dlcservice";

// How often the manager re-polls update_engine status while an install is
// in flight, to recover from a missed signal.
pub const PERIODIC_INSTALL_CHECK_INTERVAL: Duration = Duration::from_secs(10);
// Consecutive non-install status updates tolerated before an in-flight
// install is given up as stuck.
pub const TOLERANCE_CAP: u32 = 30;
// Upper bound on a single LoadDlc/UnloadDlcImage round trip to imageloader.
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_DBUS_TIMEOUT: Duration = Duration::from_secs(10);

pub const MANIFEST_FILE_NAME: &str = "imageloader.json";
pub const IMAGE_FILE_NAME: &str = "dlc.img";
pub const VERIFIED_PREF_NAME: &str = "verified";
pub const ROOT_MOUNT_PREF_NAME: &str = "root_mount";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::A => "a",
            Slot::B => "b",
        }
    }

    pub fn as_upper(self) -> &'static str {
        match self {
            Slot::A => "A",
            Slot::B => "B",
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named filesystem roots and process-wide knobs, analogous to the
/// compile-time constants `shadercached::common` defines, but gathered
/// behind a struct so tests can point them at a scratch directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub content_dir: PathBuf,
    pub prefs_dir: PathBuf,
    pub manifest_dir: PathBuf,
    pub preloaded_content_dir: PathBuf,
    pub factory_install_dir: PathBuf,
    pub deployed_content_dir: PathBuf,
    pub verification_value_file: PathBuf,
    pub mount_base_dir: PathBuf,
    pub use_logical_volumes: bool,
    pub is_official_build: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            content_dir: PathBuf::from("/var/lib/dlcservice/dlc"),
            prefs_dir: PathBuf::from("/var/lib/dlcservice/prefs"),
            manifest_dir: PathBuf::from("/opt/google/dlc"),
            preloaded_content_dir: PathBuf::from("/var/cache/dlc-images"),
            factory_install_dir: PathBuf::from("/usr/local/factory-dlc"),
            deployed_content_dir: PathBuf::from("/usr/local/dlc"),
            verification_value_file: PathBuf::from("/opt/google/dlc/verification_value"),
            mount_base_dir: PathBuf::from("/run/imageloader"),
            use_logical_volumes: false,
            is_official_build: true,
        }
    }
}

/// Parses process arguments the way `hiberman` and `crosh` do: a handful of
/// `--flag value` overrides layered on top of the compiled-in defaults, so
/// tests and sandboxed runs can redirect every path without recompiling.
pub fn parse_config(args: &[String]) -> anyhow::Result<Config> {
    let mut opts = getopts::Options::new();
    opts.optopt("", "content-dir", "DLC content directory", "PATH");
    opts.optopt("", "prefs-dir", "DLC prefs directory", "PATH");
    opts.optopt("", "manifest-dir", "DLC manifest directory", "PATH");
    opts.optopt("", "mount-base-dir", "imageloader mount base", "PATH");
    opts.optflag("", "use-logical-volumes", "use the LVM image backend");
    opts.optflag("", "unofficial-build", "run as a non-official (test) build");

    let matches = opts.parse(args)?;
    let mut config = Config::default();
    if let Some(v) = matches.opt_str("content-dir") {
        config.content_dir = PathBuf::from(v);
    }
    if let Some(v) = matches.opt_str("prefs-dir") {
        config.prefs_dir = PathBuf::from(v);
    }
    if let Some(v) = matches.opt_str("manifest-dir") {
        config.manifest_dir = PathBuf::from(v);
    }
    if let Some(v) = matches.opt_str("mount-base-dir") {
        config.mount_base_dir = PathBuf::from(v);
    }
    if matches.opt_present("use-logical-volumes") {
        config.use_logical_volumes = true;
    }
    if matches.opt_present("unofficial-build") {
        config.is_official_build = false;
    }
    Ok(config)
}
