//! DMX network protocol implementations.
//!
//! This module contains wire protocol parsing and construction for each
//! transport protocol. All functions are pure (no I/O): they take byte
//! slices and return parsed structures or [`crate::ParseError`].
//!
//! # Structure
//!
//! Each protocol module provides:
//! - **Packet parsing** - Validated decode of inbound datagrams
//! - **Packet construction** - Bit-exact encode of outbound datagrams
//! - **Wire constants** - Ports, opcodes, layer vectors, ranges
//!
//! # Example
//!
//! ```rust,no_run
//! use dmxscope_core::protocol::artnet;
//!
//! let datagram: &[u8] = &[/* bytes from the wire */];
//! match artnet::parse_dmx(datagram) {
//!     Ok(dmx) => println!("universe {} with {} channels", dmx.universe, dmx.data.len()),
//!     Err(e) => println!("not a DMX packet: {}", e),
//! }
//! ```

pub mod artnet;
pub mod sacn;

/// Helper function to extract a null-terminated C string from bytes
pub fn c_string(bytes: &[u8]) -> Option<String> {
    let null_pos = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..null_pos])
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_string() {
        assert_eq!(c_string(b"hello\0world"), Some("hello".to_string()));
        assert_eq!(c_string(b"hello"), Some("hello".to_string()));
        assert_eq!(c_string(b"\0"), None);
        assert_eq!(c_string(b"  test  \0"), Some("test".to_string()));
        assert_eq!(c_string(&[0xFF, 0xFE, 0x00]), None);
    }
}
