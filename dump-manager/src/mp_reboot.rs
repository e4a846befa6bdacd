// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detection of a memory-preserving reboot of the host.

use camino::Utf8Path;
use camino::Utf8PathBuf;

/// Marker created by the host reboot path while a memory-preserving reboot
/// is underway.
pub const DEFAULT_MP_REBOOT_MARKER: &str = "/run/openbmc/mpreboot@0";

/// Reports whether the host is inside a memory-preserving reboot window.
///
/// The marker is checked on every call.
#[derive(Clone, Debug)]
pub struct MpRebootMarker {
    path: Utf8PathBuf,
}

impl MpRebootMarker {
    pub fn new(path: Utf8PathBuf) -> Self {
        MpRebootMarker { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.path.exists()
    }
}

impl Default for MpRebootMarker {
    fn default() -> Self {
        MpRebootMarker::new(Utf8PathBuf::from(DEFAULT_MP_REBOOT_MARKER))
    }
}
