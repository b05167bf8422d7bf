//! Capacity-bounded scratch buffer for outgoing MQTT packets
//!
//! Every write is checked against the declared capacity. A write that would
//! overflow fails with [`CodecError::BufferCapacityExceeded`] and leaves the
//! buffer contents untouched past the current length.

use super::codec::CodecError;

/// Default scratch capacity, large enough for a telemetry PUBLISH
pub const DEFAULT_PACKET_CAPACITY: usize = 512;

/// Byte buffer with a hard upper bound on its length
///
/// The backing storage is allocated once and reused by every encode call.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl PacketBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Declared capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes still available before the capacity is reached
    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Fail unless `required` bytes fit in a cleared buffer
    pub fn ensure_fits(&self, required: usize) -> Result<(), CodecError> {
        if required > self.capacity {
            return Err(CodecError::BufferCapacityExceeded {
                required,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn put_u8(&mut self, byte: u8) -> Result<(), CodecError> {
        self.put_slice(&[byte])
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.put_slice(&value.to_be_bytes())
    }

    pub fn put_slice(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let required = self.bytes.len() + data.len();
        if required > self.capacity {
            return Err(CodecError::BufferCapacityExceeded {
                required,
                capacity: self.capacity,
            });
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Write a UTF-8 string with its two-byte big-endian length prefix
    pub fn put_str(&mut self, value: &str) -> Result<(), CodecError> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::StringTooLong {
            length: value.len(),
        })?;
        self.put_u16(len)?;
        self.put_slice(value.as_bytes())
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PACKET_CAPACITY)
    }
}
