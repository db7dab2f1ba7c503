// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use ctor::ctor;

mod common;
mod dlc_manager_test;
mod dlc_test;

#[ctor]
fn global_init() {
    log_init::init();
}
