//! Relay chain serialization: little-endian integers and var-uint prefixed
//! byte strings.

use crate::{Error, Result};

pub struct Source<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Source<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Serialization(format!(
                "unexpected end of buffer: want {} bytes at {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(b))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn read_var_uint(&mut self) -> Result<u64> {
        match self.read_u8()? {
            0xFD => Ok(self.read_u16()? as u64),
            0xFE => Ok(self.read_u32()? as u64),
            0xFF => self.read_u64(),
            b => Ok(b as u64),
        }
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_var_uint()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Serialization(format!("var bytes length {} overflows", len)))?;
        self.take(len)
    }

    pub fn read_var_string(&mut self) -> Result<String> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct Sink {
    buf: Vec<u8>,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn write_var_uint(&mut self, v: u64) -> &mut Self {
        if v < 0xFD {
            self.buf.push(v as u8);
        } else if v <= 0xFFFF {
            self.buf.push(0xFD);
            self.buf.extend_from_slice(&(v as u16).to_le_bytes());
        } else if v <= 0xFFFF_FFFF {
            self.buf.push(0xFE);
            self.buf.extend_from_slice(&(v as u32).to_le_bytes());
        } else {
            self.buf.push(0xFF);
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    pub fn write_var_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.write_var_uint(v.len() as u64);
        self.write_bytes(v)
    }

    pub fn write_var_string(&mut self, v: &str) -> &mut Self {
        self.write_var_bytes(v.as_bytes())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Decodes a hex string, tolerating a `0x` prefix and an odd digit count.
pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let res = if s.len() % 2 == 1 {
        hex::decode(format!("0{}", s))
    } else {
        hex::decode(s)
    };
    res.map_err(|e| Error::InvalidTx(format!("invalid hex {}: {}", s, e)))
}
