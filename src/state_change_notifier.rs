// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Delivers per-DLC state transitions to subscribers. A thin wrapper over a
// broadcast channel; a full state snapshot is sent on every transition and
// every progress increment, same as the original `DlcStateChanged` signal.

use tokio::sync::broadcast;

use crate::common::DlcId;
use crate::error::DlcErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotInstalled,
    Installing,
    Installed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DlcState {
    pub id: DlcId,
    pub state: State,
    pub progress: f64,
    pub last_error_code: DlcErrorKind,
    pub root_path: String,
    pub image_path: String,
    pub is_verified: bool,
}

impl DlcState {
    pub fn not_installed(id: DlcId) -> DlcState {
        DlcState {
            id,
            state: State::NotInstalled,
            progress: 0.0,
            last_error_code: DlcErrorKind::None,
            root_path: String::new(),
            image_path: String::new(),
            is_verified: false,
        }
    }
}

const CHANNEL_CAPACITY: usize = 64;

pub struct StateChangeNotifier {
    tx: broadcast::Sender<DlcState>,
}

impl Default for StateChangeNotifier {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        StateChangeNotifier { tx }
    }
}

impl StateChangeNotifier {
    pub fn new() -> StateChangeNotifier {
        StateChangeNotifier::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DlcState> {
        self.tx.subscribe()
    }

    /// Broadcasting is lossy by design: if nobody is subscribed, or a slow
    /// subscriber lagged, we don't want that to block or fail a transition.
    pub fn notify(&self, state: DlcState) {
        let _ = self.tx.send(state);
    }
}
