//! Payload layouts of configuration and identity messages.
//!
//! Each submodule decodes and encodes one payload family. All multi-byte
//! fields are little-endian. Decoders fail with
//! [`Error::ProtocolMismatch`](crate::Error::ProtocolMismatch) if a payload
//! is shorter than its layout requires; trailing bytes added by newer
//! firmware are ignored.

pub mod identity;
pub mod mixer;
pub mod mode_range;
pub mod pid;
pub mod rc_tuning;
pub mod servo;

use crate::{Error, Result};

/// Sequential reader over a received payload.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or(Error::ProtocolMismatch)?;

        self.pos += len;

        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.take(N)?
            .try_into()
            .map_err(|_| Error::ProtocolMismatch)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub(crate) fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Reads a NUL-terminated string.
    pub(crate) fn cstr(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0x00)
            .ok_or(Error::ProtocolMismatch)?;
        let text = String::from_utf8_lossy(&rest[..len]).into_owned();

        self.pos += len + 1;

        Ok(text)
    }

    /// Reads the remaining bytes as text, stopping at the first NUL.
    pub(crate) fn rest_str(&mut self) -> String {
        let rest = &self.buf[self.pos..];
        let len = rest.iter().position(|&b| b == 0x00).unwrap_or(rest.len());

        self.pos = self.buf.len();

        String::from_utf8_lossy(&rest[..len]).into_owned()
    }
}
