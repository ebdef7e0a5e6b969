// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

pub mod denomination;
pub mod events;
pub mod ledger;
pub mod message;

use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Upper bound for any length-prefixed field read from the wire.
pub const MAX_VAR_BYTES: usize = 1024 * 1024;

/// Seconds since the unix epoch, `0` if the system clock is before it.
pub fn get_current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|n| n.as_secs())
        .unwrap_or(0)
}

pub trait Serializable {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()>;
    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized;

    fn read_bytes<R: Read, const N: usize>(r: &mut R) -> io::Result<[u8; N]> {
        let mut buffer = [0u8; N];
        r.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
        let mut num = [0u8; 1];
        r.read_exact(&mut num)?;
        Ok(num[0])
    }

    fn read_u16_le<R: Read>(r: &mut R) -> io::Result<u16> {
        let data = Self::read_bytes(r)?;
        Ok(u16::from_le_bytes(data))
    }

    fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
        let data = Self::read_bytes(r)?;
        Ok(u32::from_le_bytes(data))
    }

    fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
        let data = Self::read_bytes(r)?;
        Ok(u64::from_le_bytes(data))
    }

    /// Writes length-prefixed fields
    fn write_var_le_bytes32<W: Write>(w: &mut W, buf: &[u8]) -> io::Result<()> {
        let len = buf.len() as u32;
        w.write_all(&len.to_le_bytes())?;
        w.write_all(buf)?;
        Ok(())
    }

    /// Reads length-prefixed fields
    fn read_var_le_bytes32<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
        let len = Self::read_u32_le(r)? as usize;
        if len > MAX_VAR_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("field length {len} exceeds {MAX_VAR_BYTES}"),
            ));
        }

        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;

        Ok(buf)
    }

    /// Writes a u32-prefixed list of serializable items
    fn write_vec<W: Write, T: Serializable>(
        w: &mut W,
        items: &[T],
    ) -> io::Result<()> {
        let len = items.len() as u32;
        w.write_all(&len.to_le_bytes())?;
        for item in items {
            item.write(w)?;
        }
        Ok(())
    }

    /// Reads a u32-prefixed list, rejecting lists longer than `max`
    fn read_vec<R: Read, T: Serializable>(
        r: &mut R,
        max: usize,
    ) -> io::Result<Vec<T>> {
        let len = Self::read_u32_le(r)? as usize;
        if len > max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("list length {len} exceeds {max}"),
            ));
        }

        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::read(r)?);
        }
        Ok(items)
    }
}
