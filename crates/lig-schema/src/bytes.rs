//! Endian-aware byte cursors shared by the schema codec and the block reader.

use lig_types::{Endianness, PointerWidth};

/// Read cursor over a byte slice in a fixed byte order.
///
/// All reads return `None` once the slice is exhausted; callers turn that
/// into whatever "truncated" error fits their layer.
#[derive(Clone, Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endianness,
}

macro_rules! read_int {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Option<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes: [u8; N] = self.take(N)?.try_into().ok()?;
            Some(match self.endian {
                Endianness::Little => <$ty>::from_le_bytes(bytes),
                Endianness::Big => <$ty>::from_be_bytes(bytes),
            })
        }
    };
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], endian: Endianness) -> Self {
        Self {
            data,
            pos: 0,
            endian,
        }
    }

    /// Current offset from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Move to an absolute offset.
    pub fn seek(&mut self, pos: usize) -> Option<()> {
        if pos > self.data.len() {
            return None;
        }
        self.pos = pos;
        Some(())
    }

    /// Borrow the next `n` bytes and advance.
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Advance to the next multiple of four.
    pub fn align4(&mut self) -> Option<()> {
        let aligned = (self.pos + 3) & !3;
        self.seek(aligned.min(self.data.len()))
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    read_int!(u16, u16);
    read_int!(i16, i16);
    read_int!(u32, u32);
    read_int!(i32, i32);
    read_int!(u64, u64);
    read_int!(i64, i64);

    pub fn f32(&mut self) -> Option<f32> {
        self.u32().map(f32::from_bits)
    }

    pub fn f64(&mut self) -> Option<f64> {
        self.u64().map(f64::from_bits)
    }

    /// Read an address of the given width, widened to `u64`.
    pub fn address(&mut self, width: PointerWidth) -> Option<u64> {
        match width {
            PointerWidth::Four => self.u32().map(u64::from),
            PointerWidth::Eight => self.u64(),
        }
    }

    /// Read a NUL-terminated string (the terminator is consumed).
    pub fn cstr(&mut self) -> Option<String> {
        let rest = self.data.get(self.pos..)?;
        let len = rest.iter().position(|&b| b == 0)?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Some(s)
    }
}

/// Growable write buffer in a fixed byte order.
#[derive(Clone, Debug)]
pub struct ByteWriter {
    buf: Vec<u8>,
    endian: Endianness,
}

macro_rules! write_int {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) {
            match self.endian {
                Endianness::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
                Endianness::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
            }
        }
    };
}

impl ByteWriter {
    pub fn new(endian: Endianness) -> Self {
        Self {
            buf: Vec::new(),
            endian,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    write_int!(u16, u16);
    write_int!(i16, i16);
    write_int!(u32, u32);
    write_int!(i32, i32);
    write_int!(u64, u64);
    write_int!(i64, i64);

    pub fn f32(&mut self, value: f32) {
        self.u32(value.to_bits());
    }

    pub fn f64(&mut self, value: f64) {
        self.u64(value.to_bits());
    }

    /// Write an address in the given width. Values that do not fit in four
    /// bytes are truncated.
    pub fn address(&mut self, value: u64, width: PointerWidth) {
        match width {
            PointerWidth::Four => self.u32(value as u32),
            PointerWidth::Eight => self.u64(value),
        }
    }

    /// Write a string followed by a NUL terminator.
    pub fn cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Pad with zeros to the next multiple of four.
    pub fn align4(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_roundtrip() {
        let mut w = ByteWriter::new(Endianness::Big);
        w.u32(0x0102_0304);
        w.i16(-2);
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);

        let mut r = ByteReader::new(&bytes, Endianness::Big);
        assert_eq!(r.u32(), Some(0x0102_0304));
        assert_eq!(r.i16(), Some(-2));
        assert_eq!(r.u8(), None);
    }

    #[test]
    fn cstr_and_alignment() {
        let mut w = ByteWriter::new(Endianness::Little);
        w.cstr("abc");
        w.cstr("de");
        w.align4();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 8);

        let mut r = ByteReader::new(&bytes, Endianness::Little);
        assert_eq!(r.cstr().as_deref(), Some("abc"));
        assert_eq!(r.cstr().as_deref(), Some("de"));
        r.align4().unwrap();
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn address_widths() {
        let mut w = ByteWriter::new(Endianness::Little);
        w.address(0x1122_3344, PointerWidth::Four);
        w.address(0x1122_3344_5566_7788, PointerWidth::Eight);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 12);

        let mut r = ByteReader::new(&bytes, Endianness::Little);
        assert_eq!(r.address(PointerWidth::Four), Some(0x1122_3344));
        assert_eq!(r.address(PointerWidth::Eight), Some(0x1122_3344_5566_7788));
    }

    #[test]
    fn truncated_reads_return_none() {
        let mut r = ByteReader::new(&[1, 2, 3], Endianness::Little);
        assert_eq!(r.u32(), None);
        assert_eq!(r.position(), 0);
        assert_eq!(r.cstr(), None);
    }
}
