//! Error types for protocol parsing

use thiserror::Error;

/// Errors that can occur when parsing DMX network packets
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Packet is too short to contain required data
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Packet header doesn't match expected format
    #[error("Invalid header: expected {expected:02X?}, got {actual:02X?}")]
    InvalidHeader {
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    /// Length field doesn't match actual packet length
    #[error("Length mismatch: header says {header_len} bytes, packet has {actual_len}")]
    LengthMismatch { header_len: usize, actual_len: usize },

    /// Protocol revision is older than the minimum this implementation speaks
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Universe number outside the range the protocol allows
    #[error("Universe {0} outside valid range")]
    InvalidUniverse(u16),

    /// Invalid UTF-8 in string field
    #[error("Invalid string encoding")]
    InvalidString,

    /// OpCode or layer vector not recognized
    #[error("Unknown packet type: {0:#06X}")]
    UnknownPacketType(u16),

    /// Invalid packet data
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),
}
