// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The set of system dump entries held for retrieval.
//!
//! Each entry lives in a slot keyed by its id.  A slot is locked for the
//! whole of any operation on its entry, including every remote round trip a
//! delete makes, so two operations on one id never interleave.  The map of
//! slots itself is only locked briefly and never across an await.
//!
//! Creating entries, whether by [`DumpManager::create_dump`] or
//! [`DumpManager::notify`], is serialized separately: each checks the
//! existing entries and then inserts or adopts one as a single step.

use crate::entry::DeleteContext;
use crate::entry::DeleteGuard;
use crate::entry::OperationStatus;
use crate::entry::SystemDumpEntry;
use crate::entry::INVALID_SOURCE_ID;
use crate::error::DumpError;
use crate::host_state::HostStateOracle;
use crate::mp_reboot::MpRebootMarker;
use crate::serialize::EntryStore;
use crate::transport::HostTransport;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::Mutex as SlotMutex;
use tokio::sync::OwnedMutexGuard;

type Slot = Arc<SlotMutex<SystemDumpEntry>>;

/// What a delete request did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entry and its storage are gone.
    Deleted,
    /// The host is in a memory-preserving reboot and the dump is still in
    /// progress; the entry was left untouched.
    Skipped,
}

#[derive(Default)]
struct Slots {
    entries: BTreeMap<u32, Slot>,
    last_entry_id: u32,
}

/// Owns every system dump entry and serializes operations on each.
pub struct DumpManager {
    log: Logger,
    dump_dir: Utf8PathBuf,
    mp_reboot: MpRebootMarker,
    oracle: Arc<dyn HostStateOracle>,
    transport: Arc<dyn HostTransport>,
    store: Arc<dyn EntryStore>,
    slots: Mutex<Slots>,
    /// Held by `create_dump` and `notify` from their scan of existing
    /// entries through the insert or adoption that follows it.
    creating: SlotMutex<()>,
}

/// Whether `entry` is a user-requested dump still waiting for the host to
/// report it.
fn is_pending(entry: &SystemDumpEntry) -> bool {
    entry.status() == OperationStatus::InProgress
        && entry.source_dump_id() == INVALID_SOURCE_ID
}

/// Current time in microseconds since the epoch, the unit used for entry
/// timestamps.
fn now_micros() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}

impl DumpManager {
    pub fn new(
        log: &Logger,
        dump_dir: Utf8PathBuf,
        mp_reboot: MpRebootMarker,
        oracle: Arc<dyn HostStateOracle>,
        transport: Arc<dyn HostTransport>,
        store: Arc<dyn EntryStore>,
    ) -> Self {
        let log = log.new(o!("component" => "DumpManager"));
        DumpManager {
            log,
            dump_dir,
            mp_reboot,
            oracle,
            transport,
            store,
            slots: Mutex::new(Slots::default()),
            creating: SlotMutex::new(()),
        }
    }

    pub fn dump_dir(&self) -> &Utf8Path {
        &self.dump_dir
    }

    fn entry_log(&self, id: u32) -> Logger {
        self.log.new(o!("dump_id" => id))
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        // A panic while holding this lock leaves the map itself consistent,
        // so keep going with it.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts a new entry under the next free id.  Ids are never reused.
    fn insert_next<F>(&self, make: F) -> Result<u32, DumpError>
    where
        F: FnOnce(u32, Utf8PathBuf) -> SystemDumpEntry,
    {
        let mut slots = self.slots();
        let id = slots
            .last_entry_id
            .checked_add(1)
            .ok_or(DumpError::EntryIdsExhausted)?;
        let entry = make(id, self.dump_dir.join(id.to_string()));
        slots.entries.insert(id, Arc::new(SlotMutex::new(entry)));
        slots.last_entry_id = id;
        Ok(id)
    }

    /// Locks the slot for `id`, failing if it does not exist or was removed
    /// while we waited for the lock.
    async fn lock_slot(
        &self,
        id: u32,
    ) -> Result<OwnedMutexGuard<SystemDumpEntry>, DumpError> {
        let slot = self
            .slots()
            .entries
            .get(&id)
            .cloned()
            .ok_or(DumpError::EntryNotFound(id))?;
        let guard = slot.clone().lock_owned().await;
        let still_present = self
            .slots()
            .entries
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot));
        if !still_present {
            return Err(DumpError::EntryNotFound(id));
        }
        Ok(guard)
    }

    /// Rebuilds entries from the persistence backend.  Meant to be called
    /// once, before any other operation.
    pub async fn restore(&self) -> Result<usize, DumpError> {
        let records = self.store.load_all().await?;
        let mut slots = self.slots();
        let mut restored = 0;
        for record in &records {
            if slots.entries.contains_key(&record.id) {
                warn!(
                    self.log,
                    "not restoring dump entry over an existing one";
                    "dump_id" => record.id,
                );
                continue;
            }
            let path = self.dump_dir.join(record.id.to_string());
            let entry = SystemDumpEntry::from_persisted(record, path);
            slots.entries.insert(record.id, Arc::new(SlotMutex::new(entry)));
            slots.last_entry_id = slots.last_entry_id.max(record.id);
            restored += 1;
        }
        info!(
            self.log,
            "restored system dump entries";
            "count" => restored,
            "last_entry_id" => slots.last_entry_id,
        );
        Ok(restored)
    }

    /// Creates an entry for a user-requested dump.  The host reports the
    /// finished dump later through [`DumpManager::notify`].
    ///
    /// Only one system dump may be in progress at a time, and only a running
    /// host can produce one.
    pub async fn create_dump(&self) -> Result<u32, DumpError> {
        let _creating = self.creating.lock().await;
        if !self.oracle.is_host_running().await? {
            return Err(DumpError::not_allowed(
                "system dump can be initiated only when the host is up",
            ));
        }

        let slots: Vec<Slot> = self.slots().entries.values().cloned().collect();
        for slot in slots {
            if slot.lock().await.status() == OperationStatus::InProgress {
                return Err(DumpError::not_allowed(
                    "a system dump is already in progress",
                ));
            }
        }

        let id = self.insert_next(|id, path| {
            SystemDumpEntry::new_in_progress(id, path, now_micros())
        })?;
        info!(self.entry_log(id), "created in-progress system dump entry");
        Ok(id)
    }

    /// Handles the host reporting a completed dump `source_dump_id` of `size`
    /// bytes.  Returns the id of the entry describing it.
    ///
    /// A user-requested dump has an in-progress entry with no source id yet;
    /// that entry adopts the report.  A dump raised by the host on its own
    /// gets a new entry.
    pub async fn notify(
        &self,
        source_dump_id: u32,
        size: u64,
    ) -> Result<u32, DumpError> {
        let _creating = self.creating.lock().await;
        let timestamp = now_micros();
        let slots: Vec<(u32, Slot)> = self
            .slots()
            .entries
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut pending = None;
        for (id, slot) in slots {
            let entry = slot.lock().await;
            if entry.source_dump_id() == source_dump_id {
                info!(
                    self.entry_log(id),
                    "system dump entry with source dump id already present";
                    "source_dump_id" => source_dump_id,
                );
                return Ok(id);
            }
            if is_pending(&entry) {
                pending = Some(id);
            }
        }

        if let Some(id) = pending {
            // A direct update or a delete may have reached the entry since
            // the scan; only adopt it if it is still waiting for a report.
            match self.lock_slot(id).await {
                Ok(mut entry) if is_pending(&entry) => {
                    entry
                        .update(
                            &self.entry_log(id),
                            self.store.as_ref(),
                            timestamp,
                            size,
                            source_dump_id,
                        )
                        .await?;
                    return Ok(id);
                }
                Ok(entry) if entry.source_dump_id() == source_dump_id => {
                    return Ok(id);
                }
                Ok(_) | Err(DumpError::EntryNotFound(_)) => (),
                Err(err) => return Err(err),
            }
        }

        let id = self.insert_next(|id, path| {
            SystemDumpEntry::new_completed(
                id,
                path,
                timestamp,
                size,
                source_dump_id,
            )
        })?;
        let log = self.entry_log(id);
        info!(
            log,
            "created system dump entry from host notification";
            "source_dump_id" => source_dump_id,
            "size" => size,
        );
        let guard = self.lock_slot(id).await?;
        self.store.serialize(&guard).await?;
        Ok(id)
    }

    /// Returns a copy of the entry `id`.
    ///
    /// Waits for any operation in flight on the entry to finish.
    pub async fn entry(&self, id: u32) -> Option<SystemDumpEntry> {
        self.lock_slot(id).await.ok().map(|entry| entry.clone())
    }

    pub fn entry_ids(&self) -> Vec<u32> {
        self.slots().entries.keys().copied().collect()
    }

    /// Marks entry `id` completed with the given details and persists it.
    pub async fn update(
        &self,
        id: u32,
        timestamp: u64,
        size: u64,
        source_dump_id: u32,
    ) -> Result<(), DumpError> {
        let mut entry = self.lock_slot(id).await?;
        entry
            .update(
                &self.entry_log(id),
                self.store.as_ref(),
                timestamp,
                size,
                source_dump_id,
            )
            .await
    }

    /// Starts offloading entry `id` to `uri`.
    pub async fn initiate_offload(
        &self,
        id: u32,
        uri: String,
    ) -> Result<(), DumpError> {
        let mut entry = self.lock_slot(id).await?;
        entry
            .initiate_offload(&self.entry_log(id), self.transport.as_ref(), uri)
            .await
    }

    /// Deletes entry `id`, freeing the host's copy of the dump first when the
    /// host is up.
    ///
    /// Once the guards pass and any host-side copy is freed, the slot is
    /// released; that is the commit point.  Local storage is removed after
    /// it on a best-effort basis.
    pub async fn delete(&self, id: u32) -> Result<DeleteOutcome, DumpError> {
        let log = self.entry_log(id);
        let entry = self.lock_slot(id).await?;

        let ctx = DeleteContext {
            mp_reboot: &self.mp_reboot,
            oracle: self.oracle.as_ref(),
            transport: self.transport.as_ref(),
        };
        match entry.guard_delete(&log, &ctx).await? {
            DeleteGuard::Skip => return Ok(DeleteOutcome::Skipped),
            DeleteGuard::Proceed => (),
        }

        self.slots().entries.remove(&id);
        let path = entry.path().to_path_buf();
        drop(entry);

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => (),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
            Err(err) => {
                warn!(
                    log,
                    "failed to remove dump storage";
                    "path" => %path,
                    "error" => InlineErrorChain::new(&err),
                );
            }
        }

        info!(log, "system dump entry deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Deletes every entry, in id order, stopping at the first failure.
    /// Entries skipped for a memory-preserving reboot stay behind.
    pub async fn delete_all(&self) -> Result<(), DumpError> {
        for id in self.entry_ids() {
            match self.delete(id).await {
                Ok(_) | Err(DumpError::EntryNotFound(_)) => (),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
