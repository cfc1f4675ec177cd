//! Server-side error taxonomy.
//!
//! Four classes of failure exist: network errors (fatal to starting a
//! transport, never retried automatically), protocol errors (handled
//! locally by dropping the offending datagram, they never reach this type),
//! universe errors, and recording/playback errors (fatal to that one
//! operation, the file is left untouched). Each variant carries the context
//! needed for a precise message and maps to a stable code via
//! [`DmxError::code`], so user-facing output is a sanitized message plus a
//! code, never a backtrace.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmxError {
    #[error("Address {addr} is already in use")]
    AddressInUse {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },
    #[error("Address {addr} is not available on this host")]
    AddressUnavailable {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },
    #[error("No permission to bind {addr} (ports below 1024 need elevated rights)")]
    PermissionDenied {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },
    #[error("No network interface carries address {0}")]
    InterfaceNotFound(Ipv4Addr),
    #[error("Cannot join multicast group {group} on {nic}")]
    MulticastJoin {
        group: Ipv4Addr,
        nic: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    #[error("I/O operation failed")]
    Io(#[from] io::Error),
    #[error("Universe {universe} outside valid range {min}..={max}")]
    InvalidUniverse { universe: u16, min: u16, max: u16 },
    #[error("No nodes or universes discovered")]
    NothingDiscovered,
    #[error("'{}' is not a recording file (bad magic)", path.display())]
    BadMagic { path: PathBuf },
    #[error("Recording '{}' uses format version {version}, newer than supported version {supported}", path.display())]
    UnsupportedVersion {
        path: PathBuf,
        version: u8,
        supported: u8,
    },
    #[error("Recording '{}' is too small to be valid", path.display())]
    FileTooSmall { path: PathBuf },
    #[error("Cannot {operation} while {state}")]
    WrongState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("No recording named '{0}'")]
    RecordingNotFound(String),
    #[error("Path '{0}' escapes the recordings directory")]
    UnsafePath(String),
    #[error("Shutdown")]
    Shutdown,
}

impl DmxError {
    /// Stable machine-readable code for user-visible reporting
    pub fn code(&self) -> &'static str {
        match self {
            DmxError::AddressInUse { .. } => "net-addr-in-use",
            DmxError::AddressUnavailable { .. } => "net-addr-unavailable",
            DmxError::PermissionDenied { .. } => "net-permission-denied",
            DmxError::InterfaceNotFound(_) => "net-interface-not-found",
            DmxError::MulticastJoin { .. } => "net-multicast-join",
            DmxError::Io(_) => "io",
            DmxError::InvalidUniverse { .. } => "universe-invalid",
            DmxError::NothingDiscovered => "universe-none-discovered",
            DmxError::BadMagic { .. } => "recording-bad-magic",
            DmxError::UnsupportedVersion { .. } => "recording-unsupported-version",
            DmxError::FileTooSmall { .. } => "recording-too-small",
            DmxError::WrongState { .. } => "recording-wrong-state",
            DmxError::RecordingNotFound(_) => "recording-not-found",
            DmxError::UnsafePath(_) => "recording-unsafe-path",
            DmxError::Shutdown => "shutdown",
        }
    }

    /// Classify a bind failure on `addr` into its distinct network error
    pub fn from_bind(addr: SocketAddrV4, source: io::Error) -> DmxError {
        match source.kind() {
            io::ErrorKind::AddrInUse => DmxError::AddressInUse { addr, source },
            io::ErrorKind::AddrNotAvailable => DmxError::AddressUnavailable { addr, source },
            io::ErrorKind::PermissionDenied => DmxError::PermissionDenied { addr, source },
            _ => DmxError::Io(source),
        }
    }
}
