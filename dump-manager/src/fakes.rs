// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory stand-ins for the host and persistence, for tests.

use crate::entry::SystemDumpEntry;
use crate::host_state::BootProgress;
use crate::host_state::BusError;
use crate::host_state::HostState;
use crate::host_state::HostStateError;
use crate::host_state::HostStateOracle;
use crate::host_state::PropertyValue;
use crate::host_state::StateBus;
use crate::host_state::BOOT_PROGRESS_INTERFACE;
use crate::host_state::BOOT_PROGRESS_PROPERTY;
use crate::host_state::HOST_STATE_INTERFACE;
use crate::host_state::HOST_STATE_OBJECT_PATH;
use crate::host_state::HOST_STATE_PROPERTY;
use crate::serialize::EntryStore;
use crate::serialize::PersistError;
use crate::serialize::PersistedEntry;
use crate::transport::HostTransport;
use crate::transport::TransportError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

/// A bus holding host state properties in memory.  Clones share state.
#[derive(Clone, Default)]
pub struct FakeStateBus {
    properties: Arc<Mutex<BTreeMap<(String, String), PropertyValue>>>,
    fail_reads: Arc<AtomicBool>,
}

impl FakeStateBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_raw(
        &self,
        interface: &str,
        property: &str,
        value: PropertyValue,
    ) {
        self.properties
            .lock()
            .unwrap()
            .insert((interface.to_string(), property.to_string()), value);
    }

    pub fn set_boot_progress(&self, stage: BootProgress) {
        self.set_raw(
            BOOT_PROGRESS_INTERFACE,
            BOOT_PROGRESS_PROPERTY,
            PropertyValue::String(stage.to_bus_string()),
        );
    }

    pub fn set_host_state(&self, state: HostState) {
        self.set_raw(
            HOST_STATE_INTERFACE,
            HOST_STATE_PROPERTY,
            PropertyValue::String(state.to_bus_string()),
        );
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateBus for FakeStateBus {
    async fn get_service(
        &self,
        path: &str,
        interface: &str,
    ) -> Result<Option<String>, BusError> {
        if path != HOST_STATE_OBJECT_PATH {
            return Ok(None);
        }
        let provided = self
            .properties
            .lock()
            .unwrap()
            .keys()
            .any(|(iface, _)| iface == interface);
        Ok(provided.then(|| "xyz.openbmc_project.State.Host0".to_string()))
    }

    async fn get_property(
        &self,
        _service: &str,
        _path: &str,
        interface: &str,
        property: &str,
    ) -> Result<PropertyValue, BusError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BusError::Call("injected failure".to_string()));
        }
        self.properties
            .lock()
            .unwrap()
            .get(&(interface.to_string(), property.to_string()))
            .cloned()
            .ok_or_else(|| BusError::Call(format!("no property {property}")))
    }
}

/// An oracle answering from fixed, settable values.
pub struct FakeHostStateOracle {
    boot_progress: Mutex<BootProgress>,
    host_state: Mutex<HostState>,
    fail: AtomicBool,
    queries: AtomicUsize,
}

impl FakeHostStateOracle {
    pub fn new(boot_progress: BootProgress) -> Self {
        FakeHostStateOracle {
            boot_progress: Mutex::new(boot_progress),
            host_state: Mutex::new(HostState::Running),
            fail: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set_boot_progress(&self, stage: BootProgress) {
        *self.boot_progress.lock().unwrap() = stage;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of state queries answered or failed so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), HostStateError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostStateError::NoProvider {
                path: HOST_STATE_OBJECT_PATH,
                interface: BOOT_PROGRESS_INTERFACE,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HostStateOracle for FakeHostStateOracle {
    async fn get_boot_progress(&self) -> Result<BootProgress, HostStateError> {
        self.check()?;
        Ok(*self.boot_progress.lock().unwrap())
    }

    async fn get_host_state(&self) -> Result<HostState, HostStateError> {
        self.check()?;
        Ok(*self.host_state.lock().unwrap())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportCall {
    Offload(u32),
    Delete(u32, u32),
}

/// A transport that records every request it is given.
#[derive(Default)]
pub struct FakeHostTransport {
    calls: Mutex<Vec<TransportCall>>,
    fail_offload: AtomicBool,
    fail_delete: AtomicBool,
}

impl FakeHostTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_offload(&self, fail: bool) {
        self.fail_offload.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl HostTransport for FakeHostTransport {
    async fn request_offload(
        &self,
        source_dump_id: u32,
    ) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(TransportCall::Offload(source_dump_id));
        if self.fail_offload.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("injected".to_string()));
        }
        Ok(())
    }

    async fn request_delete(
        &self,
        source_dump_id: u32,
        dump_type: u32,
    ) -> Result<(), TransportError> {
        // Yield so concurrent deletes get a chance to interleave.
        tokio::task::yield_now().await;
        self.calls
            .lock()
            .unwrap()
            .push(TransportCall::Delete(source_dump_id, dump_type));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                source_dump_id,
                reason: "injected".to_string(),
            });
        }
        Ok(())
    }
}

/// A store keeping every serialized record, in order.
#[derive(Default)]
pub struct FakeEntryStore {
    saved: Mutex<Vec<PersistedEntry>>,
}

impl FakeEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<PersistedEntry> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntryStore for FakeEntryStore {
    async fn serialize(
        &self,
        entry: &SystemDumpEntry,
    ) -> Result<(), PersistError> {
        self.saved.lock().unwrap().push(PersistedEntry::from(entry));
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<PersistedEntry>, PersistError> {
        let mut latest = BTreeMap::new();
        for record in self.saved.lock().unwrap().iter() {
            latest.insert(record.id, record.clone());
        }
        Ok(latest.into_values().collect())
    }
}
