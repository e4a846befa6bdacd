// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Queries against the host's boot progress and operational state.
//!
//! The host reboots independently of us, so nothing here is cached: every
//! question is answered by asking the current provider of the state
//! interface.  Callers use the answers to decide whether an irreversible
//! operation (freeing host-side dump storage, say) is safe right now.

use async_trait::async_trait;
use slog::warn;
use slog::Logger;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Object path of the (single) managed host's state objects.
pub const HOST_STATE_OBJECT_PATH: &str = "/xyz/openbmc_project/state/host0";

pub const BOOT_PROGRESS_INTERFACE: &str =
    "xyz.openbmc_project.State.Boot.Progress";
pub const BOOT_PROGRESS_PROPERTY: &str = "BootProgress";

pub const HOST_STATE_INTERFACE: &str = "xyz.openbmc_project.State.Host";
pub const HOST_STATE_PROPERTY: &str = "CurrentHostState";

/// A property value as returned by the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Strings(Vec<String>),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus call failed: {0}")]
    Call(String),
}

/// Access to the bus carrying the host's state objects.
///
/// Service discovery and the wire protocol live behind this trait.
#[async_trait]
pub trait StateBus: Send + Sync {
    /// Return the name of the service currently providing `interface` at
    /// `path`, or `None` if nothing does.
    async fn get_service(
        &self,
        path: &str,
        interface: &str,
    ) -> Result<Option<String>, BusError>;

    async fn get_property(
        &self,
        service: &str,
        path: &str,
        interface: &str,
        property: &str,
    ) -> Result<PropertyValue, BusError>;
}

#[derive(Debug, Error)]
#[error("unrecognized value {0:?}")]
pub struct UnknownValue(pub String);

/// Declares an enum that is carried on the bus as a fully qualified string,
/// e.g. `xyz.openbmc_project.State.Host.HostState.Running`.
macro_rules! bus_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident ($prefix:literal) {
            $($variant:ident => $wire:literal,)*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)*
        }

        impl $name {
            const PREFIX: &'static str = $prefix;

            /// The unqualified member name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)*
                }
            }

            /// The fully qualified value as it appears on the bus.
            pub fn to_bus_string(&self) -> String {
                format!("{}{}", Self::PREFIX, self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let member = s
                    .strip_prefix(Self::PREFIX)
                    .ok_or_else(|| UnknownValue(s.to_string()))?;
                match member {
                    $($wire => Ok($name::$variant),)*
                    _ => Err(UnknownValue(s.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

bus_enum! {
    /// Stages of host startup, from power-on through a running OS.
    pub enum BootProgress ("xyz.openbmc_project.State.Boot.Progress.ProgressStages.") {
        Unspecified => "Unspecified",
        PrimaryProcInit => "PrimaryProcInit",
        BusInit => "BusInit",
        MemoryInit => "MemoryInit",
        SecondaryProcInit => "SecondaryProcInit",
        PciInit => "PCIInit",
        SystemInitComplete => "SystemInitComplete",
        OsStart => "OSStart",
        OsRunning => "OSRunning",
        SystemSetup => "SystemSetup",
        MotherboardInit => "MotherboardInit",
        Other => "Other",
    }
}

bus_enum! {
    /// Operational state of the host.
    pub enum HostState ("xyz.openbmc_project.State.Host.HostState.") {
        Off => "Off",
        Running => "Running",
        TransitioningToRunning => "TransitioningToRunning",
        TransitioningToOff => "TransitioningToOff",
        Standby => "Standby",
        Quiesced => "Quiesced",
        DiagnosticMode => "DiagnosticMode",
    }
}

impl BootProgress {
    /// Whether the host has progressed far enough to service requests such
    /// as offloading or deleting a dump.
    pub fn is_host_running(&self) -> bool {
        matches!(
            self,
            BootProgress::SystemInitComplete
                | BootProgress::SystemSetup
                | BootProgress::OsStart
                | BootProgress::OsRunning
        )
    }
}

#[derive(Debug, Error)]
pub enum HostStateError {
    #[error("failed to find a provider of {interface} at {path}")]
    Discovery {
        path: &'static str,
        interface: &'static str,
        #[source]
        err: BusError,
    },
    #[error("no service provides {interface} at {path}")]
    NoProvider { path: &'static str, interface: &'static str },
    #[error("failed to read {interface}.{property} from {service}")]
    Read {
        service: String,
        interface: &'static str,
        property: &'static str,
        #[source]
        err: BusError,
    },
    #[error("{interface}.{property} has unexpected type: {value:?}")]
    UnexpectedType {
        interface: &'static str,
        property: &'static str,
        value: PropertyValue,
    },
    #[error("failed to decode {interface}.{property}")]
    Decode {
        interface: &'static str,
        property: &'static str,
        #[source]
        err: UnknownValue,
    },
}

/// Answers questions about the host's current state.
///
/// Implementations must query fresh state on every call.
#[async_trait]
pub trait HostStateOracle: Send + Sync {
    async fn get_boot_progress(&self) -> Result<BootProgress, HostStateError>;

    async fn get_host_state(&self) -> Result<HostState, HostStateError>;

    /// True iff the host has reached a boot stage where it can be talked to.
    async fn is_host_running(&self) -> Result<bool, HostStateError> {
        Ok(self.get_boot_progress().await?.is_host_running())
    }

    async fn is_host_quiesced(&self) -> Result<bool, HostStateError> {
        Ok(self.get_host_state().await? == HostState::Quiesced)
    }
}

/// A [`HostStateOracle`] that reads host state properties over a
/// [`StateBus`].
pub struct BusHostStateOracle<B> {
    bus: B,
    log: Logger,
}

impl<B: StateBus> BusHostStateOracle<B> {
    pub fn new(bus: B, log: &Logger) -> Self {
        let log = log.new(slog::o!("component" => "HostStateOracle"));
        Self { bus, log }
    }

    async fn read_state_string(
        &self,
        interface: &'static str,
        property: &'static str,
    ) -> Result<String, HostStateError> {
        let path = HOST_STATE_OBJECT_PATH;
        let service = self
            .bus
            .get_service(path, interface)
            .await
            .map_err(|err| HostStateError::Discovery { path, interface, err })?
            .filter(|service| !service.is_empty())
            .ok_or(HostStateError::NoProvider { path, interface })?;

        let value = self
            .bus
            .get_property(&service, path, interface, property)
            .await
            .map_err(|err| HostStateError::Read {
                service: service.clone(),
                interface,
                property,
                err,
            })?;

        match value {
            PropertyValue::String(s) => Ok(s),
            value => Err(HostStateError::UnexpectedType {
                interface,
                property,
                value,
            }),
        }
    }

    async fn read_state<T>(
        &self,
        interface: &'static str,
        property: &'static str,
    ) -> Result<T, HostStateError>
    where
        T: FromStr<Err = UnknownValue>,
    {
        let result =
            self.read_state_string(interface, property).await.and_then(|s| {
                s.parse().map_err(|err| HostStateError::Decode {
                    interface,
                    property,
                    err,
                })
            });
        if let Err(err) = &result {
            warn!(
                self.log,
                "host state query failed";
                "interface" => interface,
                "property" => property,
                "error" => slog_error_chain::InlineErrorChain::new(err),
            );
        }
        result
    }
}

#[async_trait]
impl<B: StateBus> HostStateOracle for BusHostStateOracle<B> {
    async fn get_boot_progress(&self) -> Result<BootProgress, HostStateError> {
        self.read_state(BOOT_PROGRESS_INTERFACE, BOOT_PROGRESS_PROPERTY).await
    }

    async fn get_host_state(&self) -> Result<HostState, HostStateError> {
        self.read_state(HOST_STATE_INTERFACE, HOST_STATE_PROPERTY).await
    }
}
