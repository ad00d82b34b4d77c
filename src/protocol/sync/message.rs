//! Wire format of the two sync messages.
//!
//! Both messages are tightly packed little-endian `u64` microsecond
//! timestamps with no header; the payload length alone identifies the
//! kind, so decoding is an exact-size check.
//!
//! ```text
//! TimeRequest   | t1 |                                   8 bytes
//! TimeResponse  | t1 | t2_recv | t3_send |               24 bytes
//! ```

use bytes::{Buf, BufMut};

use crate::error::MessageError;

/// Client to master: "what time is it?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRequest {
    /// Client clock when the request left.
    pub t1: u64,
}

impl TimeRequest {
    /// Wire size in bytes.
    pub const SIZE: usize = 8;

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        let mut buf = &mut data[..];
        buf.put_u64_le(self.t1);
        data
    }

    /// Parse from bytes.
    ///
    /// # Errors
    /// Returns [`MessageError::WrongSize`] unless `data` is exactly
    /// [`Self::SIZE`] bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        check_size(data, Self::SIZE)?;
        let mut buf = data;
        Ok(Self {
            t1: buf.get_u64_le(),
        })
    }
}

/// Master to client: the echoed origin plus the master's receive and send times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeResponse {
    /// Echoed from the request.
    pub t1: u64,
    /// Master clock when the request arrived.
    pub t2_recv: u64,
    /// Master clock when this response left.
    pub t3_send: u64,
}

impl TimeResponse {
    /// Wire size in bytes.
    pub const SIZE: usize = 24;

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        let mut buf = &mut data[..];
        buf.put_u64_le(self.t1);
        buf.put_u64_le(self.t2_recv);
        buf.put_u64_le(self.t3_send);
        data
    }

    /// Parse from bytes.
    ///
    /// # Errors
    /// Returns [`MessageError::WrongSize`] unless `data` is exactly
    /// [`Self::SIZE`] bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        check_size(data, Self::SIZE)?;
        let mut buf = data;
        Ok(Self {
            t1: buf.get_u64_le(),
            t2_recv: buf.get_u64_le(),
            t3_send: buf.get_u64_le(),
        })
    }
}

fn check_size(data: &[u8], expected: usize) -> Result<(), MessageError> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(MessageError::WrongSize {
            expected,
            actual: data.len(),
        })
    }
}
