// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Requests sent to the host about dumps it holds.

use async_trait::async_trait;
use thiserror::Error;

/// Identifies a system dump to the host transport, as opposed to the other
/// dump types the host can hold.
pub const SYSTEM_DUMP_TRANSPORT_TYPE: u32 = 3;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("host transport unavailable: {0}")]
    Unavailable(String),
    #[error("host rejected request for dump {source_dump_id}: {reason}")]
    Rejected { source_dump_id: u32, reason: String },
}

/// Carries offload and delete requests to the host.
///
/// Dumps are named by the host-assigned source dump id, never by our local
/// entry id.
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Ask the host to start transferring the dump `source_dump_id`.
    async fn request_offload(
        &self,
        source_dump_id: u32,
    ) -> Result<(), TransportError>;

    /// Ask the host to free its copy of the dump `source_dump_id` of type
    /// `dump_type`.
    async fn request_delete(
        &self,
        source_dump_id: u32,
        dump_type: u32,
    ) -> Result<(), TransportError>;
}
