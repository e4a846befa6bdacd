// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The lifecycle of a single system dump entry.
//!
//! An entry starts `InProgress` (the host is still collecting) or
//! `Completed` (the host told us about a finished dump), moves to
//! `Completed` via [`SystemDumpEntry::update`], and may have an offload
//! requested at any point.  Deleting an entry is split in two: the guard
//! phase here decides whether the delete may go ahead and frees the host's
//! copy, and the [`crate::DumpManager`] then releases the slot and removes
//! local storage.

use crate::error::DumpError;
use crate::host_state::HostStateOracle;
use crate::mp_reboot::MpRebootMarker;
use crate::serialize::EntryStore;
use crate::serialize::PersistedEntry;
use crate::transport::HostTransport;
use crate::transport::SYSTEM_DUMP_TRANSPORT_TYPE;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use slog::error;
use slog::info;
use slog::Logger;
use slog_error_chain::InlineErrorChain;

/// Source dump id of an entry the host has not yet assigned one to.
pub const INVALID_SOURCE_ID: u32 = 0xFFFF_FFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    InProgress,
    Completed,
}

/// Metadata for one system dump held for retrieval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemDumpEntry {
    id: u32,
    size: u64,
    elapsed: u64,
    completed_time: u64,
    status: OperationStatus,
    offload_uri: String,
    source_dump_id: u32,
    path: Utf8PathBuf,
}

/// Result of the guard phase of a delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeleteGuard {
    /// The host is mid memory-preserving reboot and the dump is still being
    /// collected; leave everything as it is.
    Skip,
    /// Any host-side copy has been freed; the entry may be removed.
    Proceed,
}

/// Collaborators consulted while guarding a delete.
pub(crate) struct DeleteContext<'a> {
    pub mp_reboot: &'a MpRebootMarker,
    pub oracle: &'a dyn HostStateOracle,
    pub transport: &'a dyn HostTransport,
}

impl SystemDumpEntry {
    /// An entry for a dump the host has been asked to collect but has not yet
    /// reported.
    pub fn new_in_progress(id: u32, path: Utf8PathBuf, timestamp: u64) -> Self {
        SystemDumpEntry {
            id,
            size: 0,
            elapsed: timestamp,
            completed_time: 0,
            status: OperationStatus::InProgress,
            offload_uri: String::new(),
            source_dump_id: INVALID_SOURCE_ID,
            path,
        }
    }

    /// An entry for a dump the host reported as already complete.
    pub fn new_completed(
        id: u32,
        path: Utf8PathBuf,
        timestamp: u64,
        size: u64,
        source_dump_id: u32,
    ) -> Self {
        SystemDumpEntry {
            id,
            size,
            elapsed: timestamp,
            completed_time: timestamp,
            status: OperationStatus::Completed,
            offload_uri: String::new(),
            source_dump_id,
            path,
        }
    }

    /// Rebuild an entry from its persisted record.  Offload state is not
    /// persisted, so the restored entry has none.
    pub fn from_persisted(record: &PersistedEntry, path: Utf8PathBuf) -> Self {
        SystemDumpEntry {
            id: record.id,
            size: record.size,
            elapsed: record.elapsed,
            completed_time: record.completed_time,
            status: record.status,
            offload_uri: String::new(),
            source_dump_id: record.source_dump_id,
            path,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn completed_time(&self) -> u64 {
        self.completed_time
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn offload_uri(&self) -> &str {
        &self.offload_uri
    }

    pub fn source_dump_id(&self) -> u32 {
        self.source_dump_id
    }

    /// Local storage backing this entry.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Record that the host finished collecting this dump, then persist it.
    ///
    /// There is no failed state: every update marks the dump completed.
    pub(crate) async fn update(
        &mut self,
        log: &Logger,
        store: &dyn EntryStore,
        timestamp: u64,
        size: u64,
        source_dump_id: u32,
    ) -> Result<(), DumpError> {
        self.elapsed = timestamp;
        self.size = size;
        self.source_dump_id = source_dump_id;
        self.status = OperationStatus::Completed;
        self.completed_time = timestamp;

        info!(
            log,
            "system dump completed";
            "size" => size,
            "source_dump_id" => source_dump_id,
        );

        store.serialize(self).await?;
        Ok(())
    }

    /// Record `uri` as the offload destination and ask the host to start
    /// sending the dump.
    pub(crate) async fn initiate_offload(
        &mut self,
        log: &Logger,
        transport: &dyn HostTransport,
        uri: String,
    ) -> Result<(), DumpError> {
        if uri.is_empty() {
            return Err(DumpError::InvalidArgument {
                reason: "offload uri must not be empty".to_string(),
            });
        }

        info!(
            log,
            "system dump offload request";
            "uri" => &uri,
            "source_dump_id" => self.source_dump_id,
        );
        self.offload_uri = uri;
        transport
            .request_offload(self.source_dump_id)
            .await
            .map_err(DumpError::Transport)
    }

    /// Decide whether this entry may be deleted, freeing the host's copy of
    /// the dump if so.
    ///
    /// Nothing here mutates the entry.  The host's state is re-read at each
    /// check; it can change between the checks and the host-side delete, and
    /// that window is accepted.
    pub(crate) async fn guard_delete(
        &self,
        log: &Logger,
        ctx: &DeleteContext<'_>,
    ) -> Result<DeleteGuard, DumpError> {
        if self.status == OperationStatus::InProgress
            && ctx.mp_reboot.is_active()
        {
            info!(
                log,
                "skipping delete of in-progress system dump during \
                 memory preserving reboot"
            );
            return Ok(DeleteGuard::Skip);
        }

        if !self.offload_uri.is_empty() && ctx.oracle.is_host_running().await? {
            error!(
                log,
                "system dump offload in progress";
                "source_dump_id" => self.source_dump_id,
                "uri" => &self.offload_uri,
            );
            return Err(DumpError::not_allowed(format!(
                "offload of dump {} is in progress",
                self.id
            )));
        }

        info!(
            log,
            "system dump delete";
            "source_dump_id" => self.source_dump_id,
        );

        if ctx.oracle.is_host_running().await?
            && self.source_dump_id != INVALID_SOURCE_ID
        {
            if let Err(err) = ctx
                .transport
                .request_delete(self.source_dump_id, SYSTEM_DUMP_TRANSPORT_TYPE)
                .await
            {
                error!(
                    log,
                    "failed to delete system dump from host";
                    "source_dump_id" => self.source_dump_id,
                    "error" => InlineErrorChain::new(&err),
                );
                return Err(DumpError::not_allowed(format!(
                    "host failed to delete dump {} (source dump id {})",
                    self.id, self.source_dump_id
                )));
            }
        }

        Ok(DeleteGuard::Proceed)
    }
}
