//! Controller register access
//!
//! Crane controllers expose their process image as addressable memory areas:
//! numbered data blocks (`DB57`, `DB59`, ...) and the marker (flag) area
//! (`M103.2`). Values are big-endian; a 16-bit signed integer occupies two
//! bytes, a boolean one bit of a byte.
//!
//! The engine never speaks a wire protocol itself. A transport implements
//! [`RegisterClient`] and a [`ClientFactory`] builds one per configured crane.

use crate::config::DeviceConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory area a register lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterArea {
    /// Numbered data block
    Db,
    /// Marker (flag) memory
    Marker,
}

/// A readable block of controller memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    DataBlock(u16),
    Marker,
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataBlock(n) => write!(f, "DB{}", n),
            Self::Marker => f.write_str("M"),
        }
    }
}

/// Location of a single signal.
///
/// `bit` is only meaningful for boolean signals; `db` is ignored for the
/// marker area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAddress {
    #[serde(default = "default_area")]
    pub area: RegisterArea,
    #[serde(default)]
    pub db: u16,
    pub byte: u32,
    #[serde(default)]
    pub bit: u8,
}

fn default_area() -> RegisterArea {
    RegisterArea::Db
}

impl RegisterAddress {
    pub const fn db_word(db: u16, byte: u32) -> Self {
        Self {
            area: RegisterArea::Db,
            db,
            byte,
            bit: 0,
        }
    }

    pub const fn db_bit(db: u16, byte: u32, bit: u8) -> Self {
        Self {
            area: RegisterArea::Db,
            db,
            byte,
            bit,
        }
    }

    pub const fn marker_bit(byte: u32, bit: u8) -> Self {
        Self {
            area: RegisterArea::Marker,
            db: 0,
            byte,
            bit,
        }
    }

    pub fn block(&self) -> BlockId {
        match self.area {
            RegisterArea::Db => BlockId::DataBlock(self.db),
            RegisterArea::Marker => BlockId::Marker,
        }
    }
}

impl std::fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.area {
            RegisterArea::Db => write!(f, "DB{}.{}.{}", self.db, self.byte, self.bit),
            RegisterArea::Marker => write!(f, "M{}.{}", self.byte, self.bit),
        }
    }
}

/// Register transport errors
#[derive(Debug, Clone, Error)]
pub enum RegisterError {
    #[error("Connection to {address} failed: {message}")]
    ConnectionFailed { address: String, message: String },

    #[error("Connection to {address} timed out after {timeout_ms}ms")]
    ConnectTimeout { address: String, timeout_ms: u64 },

    #[error("Not connected")]
    NotConnected,

    #[error("Read of {block} offset {offset} ({length} bytes) failed: {message}")]
    ReadFailed {
        block: BlockId,
        offset: u32,
        length: usize,
        message: String,
    },

    #[error("Short read from {block} offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        block: BlockId,
        offset: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Read of {block} offset {offset} timed out after {timeout_ms}ms")]
    ReadTimeout {
        block: BlockId,
        offset: u32,
        timeout_ms: u64,
    },
}

impl RegisterError {
    /// True for failures to establish a session (as opposed to a failed read
    /// on an established one).
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ConnectTimeout { .. }
        )
    }
}

/// Connection-oriented register reader for one controller.
///
/// Implementations do not retry or reconnect on their own; the device worker
/// owns that policy.
#[async_trait]
pub trait RegisterClient: Send + 'static {
    /// Open a session to the controller at `address`.
    async fn connect(&mut self, address: &str, rack: u16, slot: u16) -> Result<(), RegisterError>;

    /// Whether a session is currently open. Must not perform I/O.
    fn is_connected(&self) -> bool;

    /// Read `length` raw bytes starting at `offset` in `block`.
    async fn read_block(
        &mut self,
        block: BlockId,
        offset: u32,
        length: usize,
    ) -> Result<Vec<u8>, RegisterError>;

    /// Close the session. Calling this on a closed session is a no-op.
    async fn disconnect(&mut self);

    /// Human-readable transport name for logging.
    fn client_name(&self) -> &str;
}

/// Builds a fresh transport for each configured crane.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: RegisterClient;

    fn create(&self, device: &DeviceConfig) -> Self::Client;
}

/// Decode a big-endian 16-bit signed integer at `offset`.
pub fn get_int(data: &[u8], offset: usize) -> Option<i16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(i16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Decode bit `bit` (0 = LSB) of the byte at `offset`.
pub fn get_bool(data: &[u8], offset: usize, bit: u8) -> Option<bool> {
    if bit > 7 {
        return None;
    }
    data.get(offset).map(|b| (b >> bit) & 1 == 1)
}

/// Encode a big-endian 16-bit signed integer at `offset`, growing `data` as needed.
pub fn set_int(data: &mut Vec<u8>, offset: usize, value: i16) {
    if data.len() < offset + 2 {
        data.resize(offset + 2, 0);
    }
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Set or clear bit `bit` of the byte at `offset`, growing `data` as needed.
pub fn set_bool(data: &mut Vec<u8>, offset: usize, bit: u8, value: bool) {
    if data.len() < offset + 1 {
        data.resize(offset + 1, 0);
    }
    let mask = 1u8 << (bit & 7);
    if value {
        data[offset] |= mask;
    } else {
        data[offset] &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_int_is_big_endian_signed() {
        let data = [0x00, 0x64, 0xFF, 0x9C];
        assert_eq!(get_int(&data, 0), Some(100));
        assert_eq!(get_int(&data, 2), Some(-100));
        assert_eq!(get_int(&data, 3), None);
    }

    #[test]
    fn test_get_bool_bit_order() {
        // 0b0010_0010: bits 1 and 5 set
        let data = [0x22];
        assert_eq!(get_bool(&data, 0, 1), Some(true));
        assert_eq!(get_bool(&data, 0, 5), Some(true));
        assert_eq!(get_bool(&data, 0, 0), Some(false));
        assert_eq!(get_bool(&data, 0, 8), None);
        assert_eq!(get_bool(&data, 1, 0), None);
    }

    #[test]
    fn test_set_helpers_grow_buffer() {
        let mut data = Vec::new();
        set_int(&mut data, 10, -1234);
        assert_eq!(data.len(), 12);
        assert_eq!(get_int(&data, 10), Some(-1234));

        set_bool(&mut data, 20, 3, true);
        assert_eq!(get_bool(&data, 20, 3), Some(true));
        set_bool(&mut data, 20, 3, false);
        assert_eq!(data[20], 0);
    }

    #[test]
    fn test_address_display_and_block() {
        let order = RegisterAddress::db_word(57, 8);
        assert_eq!(order.block(), BlockId::DataBlock(57));
        assert_eq!(order.to_string(), "DB57.8.0");

        let reset = RegisterAddress::marker_bit(103, 2);
        assert_eq!(reset.block(), BlockId::Marker);
        assert_eq!(reset.to_string(), "M103.2");
    }

    #[test]
    fn test_connection_error_classification() {
        let e = RegisterError::ConnectTimeout {
            address: "10.0.0.1".to_string(),
            timeout_ms: 5000,
        };
        assert!(e.is_connection_error());
        assert!(!RegisterError::NotConnected.is_connection_error());
    }
}
