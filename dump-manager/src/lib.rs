// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle management for system dumps held on behalf of a managed host.
//!
//! The host collects dumps and keeps its own copy until told to free it; we
//! keep an entry per dump, let callers offload it, and delete it on request.
//! The host reboots on its own schedule, so every decision that could free
//! host-side storage first asks the [`HostStateOracle`] what the host is
//! doing right now.

mod config;
mod entry;
mod error;
mod host_state;
mod manager;
mod mp_reboot;
mod serialize;
mod transport;

#[cfg(test)]
mod fakes;

pub use config::Config;
pub use config::LoadError;
pub use entry::OperationStatus;
pub use entry::SystemDumpEntry;
pub use entry::INVALID_SOURCE_ID;
pub use error::DumpError;
pub use host_state::BootProgress;
pub use host_state::BusError;
pub use host_state::BusHostStateOracle;
pub use host_state::HostState;
pub use host_state::HostStateError;
pub use host_state::HostStateOracle;
pub use host_state::PropertyValue;
pub use host_state::StateBus;
pub use host_state::UnknownValue;
pub use manager::DeleteOutcome;
pub use manager::DumpManager;
pub use mp_reboot::MpRebootMarker;
pub use mp_reboot::DEFAULT_MP_REBOOT_MARKER;
pub use serialize::EntryStore;
pub use serialize::FileEntryStore;
pub use serialize::PersistError;
pub use serialize::PersistedEntry;
pub use serialize::PRESERVE_FILE_NAME;
pub use transport::HostTransport;
pub use transport::TransportError;
pub use transport::SYSTEM_DUMP_TRANSPORT_TYPE;
