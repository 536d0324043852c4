// src/formats/wire.rs

//! Little-endian field cursors shared by the binary codecs
//!
//! `Fields` walks a buffer the caller has already bounds-checked (sectors are
//! a fixed 512 bytes, index headers are length-checked before parsing), so
//! the accessors index directly. `FieldWriter` builds fixed-layout records
//! and zero-pads them to their physical size.

pub(crate) struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    pub fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    pub fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    pub fn i16(&mut self) -> i16 {
        self.u16() as i16
    }

    pub fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        v
    }

    pub fn i32(&mut self) -> i32 {
        self.u32() as i32
    }

    /// UUID halves are the one big-endian exception in these formats
    pub fn u64_be(&mut self) -> u64 {
        let mut v = 0u64;
        for i in 0..8 {
            v = (v << 8) | self.buf[self.pos + i] as u64;
        }
        self.pos += 8;
        v
    }
}

#[derive(Default)]
pub(crate) struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i16(&mut self, v: i16) {
        self.u16(v as u16);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.u32(v as u32);
    }

    pub fn u64_be(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Zero-pad up to `len`; layouts never shrink
    pub fn pad_to(&mut self, len: usize) {
        debug_assert!(self.buf.len() <= len);
        self.buf.resize(len, 0);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_writer_round_trip() {
        let mut w = FieldWriter::new();
        w.u16(0x1234);
        w.u8(7);
        w.i32(-2);
        w.u64_be(0x0102030405060708);
        w.pad_to(32);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 32);

        let mut f = Fields::new(&bytes);
        assert_eq!(f.u16(), 0x1234);
        assert_eq!(f.u8(), 7);
        assert_eq!(f.i32(), -2);
        assert_eq!(f.u64_be(), 0x0102030405060708);
        assert_eq!(f.remaining(), 17);
    }
}
