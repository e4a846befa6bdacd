// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable record of completed dump entries, used to rebuild them after a
//! restart.
//!
//! Each entry is written as JSON to `<dump_dir>/<id>/.preserve`, next to the
//! dump it describes.

use crate::entry::OperationStatus;
use crate::entry::SystemDumpEntry;
use async_trait::async_trait;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use thiserror::Error;

/// Name of the record file inside an entry's directory.
pub const PRESERVE_FILE_NAME: &str = ".preserve";

const PERSISTED_ENTRY_VERSION: u32 = 1;

/// The persisted form of a [`SystemDumpEntry`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub version: u32,
    pub id: u32,
    pub size: u64,
    pub elapsed: u64,
    pub completed_time: u64,
    pub source_dump_id: u32,
    pub status: OperationStatus,
}

impl From<&SystemDumpEntry> for PersistedEntry {
    fn from(entry: &SystemDumpEntry) -> Self {
        PersistedEntry {
            version: PERSISTED_ENTRY_VERSION,
            id: entry.id(),
            size: entry.size(),
            elapsed: entry.elapsed(),
            completed_time: entry.completed_time(),
            source_dump_id: entry.source_dump_id(),
            status: entry.status(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write \"{path}\"")]
    Write {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to read \"{path}\"")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to serialize dump entry {id}")]
    Serialize {
        id: u32,
        #[source]
        err: serde_json::Error,
    },
    #[error("failed to parse \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: serde_json::Error,
    },
    #[error("\"{path}\" has version {found}, expected {expected}")]
    Version { path: Utf8PathBuf, found: u32, expected: u32 },
    #[error("\"{path}\" describes entry {found}, expected {expected}")]
    IdMismatch { path: Utf8PathBuf, found: u32, expected: u32 },
}

/// Stores entry metadata so entries survive a restart.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Durably record the current metadata of `entry`.
    async fn serialize(&self, entry: &SystemDumpEntry)
        -> Result<(), PersistError>;

    /// Load every readable record.  Records that cannot be read are logged
    /// and skipped; only a failure to enumerate records at all is an error.
    async fn load_all(&self) -> Result<Vec<PersistedEntry>, PersistError>;
}

/// An [`EntryStore`] keeping one JSON record per entry directory.
pub struct FileEntryStore {
    dump_dir: Utf8PathBuf,
    log: Logger,
}

impl FileEntryStore {
    pub fn new(dump_dir: Utf8PathBuf, log: &Logger) -> Self {
        let log = log.new(slog::o!(
            "component" => "FileEntryStore",
            "dump_dir" => dump_dir.to_string(),
        ));
        FileEntryStore { dump_dir, log }
    }

    fn record_path(&self, id: u32) -> Utf8PathBuf {
        self.dump_dir.join(id.to_string()).join(PRESERVE_FILE_NAME)
    }

    async fn read_record(
        path: &Utf8Path,
        expected_id: u32,
    ) -> Result<PersistedEntry, PersistError> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|err| PersistError::Read { path: path.into(), err })?;
        let record: PersistedEntry = serde_json::from_slice(&contents)
            .map_err(|err| PersistError::Parse { path: path.into(), err })?;
        if record.version != PERSISTED_ENTRY_VERSION {
            return Err(PersistError::Version {
                path: path.into(),
                found: record.version,
                expected: PERSISTED_ENTRY_VERSION,
            });
        }
        if record.id != expected_id {
            return Err(PersistError::IdMismatch {
                path: path.into(),
                found: record.id,
                expected: expected_id,
            });
        }
        Ok(record)
    }
}

#[async_trait]
impl EntryStore for FileEntryStore {
    async fn serialize(
        &self,
        entry: &SystemDumpEntry,
    ) -> Result<(), PersistError> {
        let record = PersistedEntry::from(entry);
        let path = self.record_path(record.id);
        let contents = serde_json::to_string_pretty(&record).map_err(
            |err| PersistError::Serialize { id: record.id, err },
        )?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                PersistError::Write { path: parent.into(), err }
            })?;
        }

        // Write a sibling and rename it over the record, so a crash never
        // leaves a torn record behind.
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, contents).await.map_err(|err| {
            PersistError::Write { path: tmp_path.clone(), err }
        })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|err| PersistError::Write { path: path.clone(), err })?;

        debug!(self.log, "persisted dump entry"; "id" => record.id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<PersistedEntry>, PersistError> {
        let mut dir = match tokio::fs::read_dir(&self.dump_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(self.log, "no dump directory; nothing to restore");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(PersistError::Read {
                    path: self.dump_dir.clone(),
                    err,
                });
            }
        };

        let mut records = Vec::new();
        loop {
            let dirent = match dir.next_entry().await {
                Ok(Some(dirent)) => dirent,
                Ok(None) => break,
                Err(err) => {
                    return Err(PersistError::Read {
                        path: self.dump_dir.clone(),
                        err,
                    });
                }
            };
            let Some(id) = dirent
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };

            let path = self.record_path(id);
            if !path.exists() {
                debug!(self.log, "dump directory has no record"; "id" => id);
                continue;
            }
            match Self::read_record(&path, id).await {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(
                        self.log,
                        "skipping unreadable dump entry record";
                        "id" => id,
                        "error" => InlineErrorChain::new(&err),
                    );
                }
            }
        }

        records.sort_by_key(|record| record.id);
        Ok(records)
    }
}
