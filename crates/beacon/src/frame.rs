// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Datagram framing for the sample transport.
//!
//! Every `send` produces exactly one UDP datagram:
//!
//! ```text
//! +-------+-----------------+------------------+-------------------+
//! | magic | name length u16 | name (UTF-8)     | payload           |
//! | "BCN1"| big endian      | name length bytes| rest of datagram  |
//! +-------+-----------------+------------------+-------------------+
//! ```
//!
//! There is no fragmentation: a frame that does not fit into one datagram is rejected by
//! the sender.

use bytes::{Buf, BufMut, BytesMut};

use crate::errors::DecodeError;

pub const MAGIC: &[u8; 4] = b"BCN1";

/// Bytes taken by the frame before the sample name.
pub const HEADER_SIZE: usize = MAGIC.len() + 2;

/// Longest sample name a frame can carry.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// A decoded frame borrowing from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub name: &'a str,
    pub payload: &'a [u8],
}

/// Size of the datagram that `encode` would produce.
#[must_use]
pub fn encoded_len(name: &str, payload: &[u8]) -> usize {
    HEADER_SIZE + name.len() + payload.len()
}

/// Writes `name` and `payload` into a single datagram buffer.
///
/// Callers must ensure `name.len() <= MAX_NAME_LEN`.
#[must_use]
pub fn encode(name: &str, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(encoded_len(name, payload));
    buf.put_slice(MAGIC);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16(name.len() as u16);
    buf.put_slice(name.as_bytes());
    buf.put_slice(payload);
    buf
}

pub fn decode(datagram: &[u8]) -> Result<Frame<'_>, DecodeError> {
    if datagram.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated(datagram.len()));
    }
    let (magic, mut rest) = datagram.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let name_len = usize::from(rest.get_u16());
    if rest.len() < name_len {
        return Err(DecodeError::Truncated(datagram.len()));
    }
    let (name, payload) = rest.split_at(name_len);
    let name = std::str::from_utf8(name).map_err(|_| DecodeError::InvalidName)?;
    Ok(Frame { name, payload })
}
