//! Bounds-checked big-endian cursor over untrusted bytes
//!
//! Every read checks the remaining length first and reports the offset and
//! context on failure; nothing here can panic on short or corrupt input.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{CodecError, CodecResult};

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unread tail of the buffer
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn need(&self, n: usize, context: &str) -> CodecResult<()> {
        if self.remaining() < n {
            return Err(CodecError::message_too_small(
                self.pos + n,
                self.data.len(),
                context,
            ));
        }
        Ok(())
    }

    pub fn bytes(&mut self, n: usize, context: &str) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::truncated(
                context,
                n,
                self.remaining(),
                self.pos,
            ));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self, context: &str) -> CodecResult<u8> {
        self.need(1, context)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn u16(&mut self, context: &str) -> CodecResult<u16> {
        self.need(2, context)?;
        let v = BigEndian::read_u16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    pub fn i16(&mut self, context: &str) -> CodecResult<i16> {
        self.need(2, context)?;
        let v = BigEndian::read_i16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    pub fn u32(&mut self, context: &str) -> CodecResult<u32> {
        self.need(4, context)?;
        let v = BigEndian::read_u32(&self.data[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    pub fn i32(&mut self, context: &str) -> CodecResult<i32> {
        self.need(4, context)?;
        let v = BigEndian::read_i32(&self.data[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    /// `u8 len · bytes`
    pub fn u8_prefixed(&mut self, context: &str) -> CodecResult<&'a [u8]> {
        let len = self.u8(context)? as usize;
        self.bytes(len, context)
    }

    /// `u16 len · bytes`
    pub fn u16_prefixed(&mut self, context: &str) -> CodecResult<&'a [u8]> {
        let len = self.u16(context)? as usize;
        self.bytes(len, context)
    }

    /// `u16 len · text`, decoded lossily
    pub fn u16_text(&mut self, context: &str) -> CodecResult<String> {
        Ok(String::from_utf8_lossy(self.u16_prefixed(context)?).into_owned())
    }
}
