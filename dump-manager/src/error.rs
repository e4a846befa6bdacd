// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the dump manager.

use crate::host_state::HostStateError;
use crate::serialize::PersistError;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors visible to callers of dump entry operations.
#[derive(Debug, Error)]
pub enum DumpError {
    /// The host's boot progress or operational state could not be read.
    #[error("failed to query host state")]
    HostState(#[from] HostStateError),

    #[error("operation not allowed: {reason}")]
    OperationNotAllowed { reason: String },

    #[error("no dump entry with id {0}")]
    EntryNotFound(u32),

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Every entry id has been handed out.
    #[error("no dump entry ids left")]
    EntryIdsExhausted,

    /// A request to the host transport failed.  The underlying error is
    /// passed through unmodified.
    #[error(transparent)]
    Transport(TransportError),

    #[error("failed to persist dump entry")]
    Persist(#[from] PersistError),
}

impl DumpError {
    pub(crate) fn not_allowed<S: Into<String>>(reason: S) -> Self {
        DumpError::OperationNotAllowed { reason: reason.into() }
    }

    /// Returns true if the error is the one surfaced when a delete was
    /// refused, either by the offload guard or by a failed host-side delete.
    pub fn is_not_allowed(&self) -> bool {
        matches!(self, DumpError::OperationNotAllowed { .. })
    }
}
