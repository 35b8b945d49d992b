use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Byte order a document was written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// Byte order of the running program.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// Header marker character.
    pub fn marker(&self) -> u8 {
        match self {
            Self::Little => b'v',
            Self::Big => b'V',
        }
    }

    /// Parse a header marker character.
    pub fn from_marker(marker: u8) -> Result<Self, TypeError> {
        match marker {
            b'v' => Ok(Self::Little),
            b'V' => Ok(Self::Big),
            other => Err(TypeError::InvalidEndianMarker(other)),
        }
    }
}

/// Width of addresses stored in a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerWidth {
    Four,
    Eight,
}

impl PointerWidth {
    /// Address width of the running program.
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "32") {
            Self::Four
        } else {
            Self::Eight
        }
    }

    /// Width in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Build from a byte count.
    pub fn from_bytes(n: usize) -> Result<Self, TypeError> {
        match n {
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(TypeError::UnsupportedPointerWidth(other)),
        }
    }

    /// Header marker character.
    pub fn marker(&self) -> u8 {
        match self {
            Self::Four => b'_',
            Self::Eight => b'-',
        }
    }

    /// Parse a header marker character.
    pub fn from_marker(marker: u8) -> Result<Self, TypeError> {
        match marker {
            b'_' => Ok(Self::Four),
            b'-' => Ok(Self::Eight),
            other => Err(TypeError::InvalidPointerMarker(other)),
        }
    }

    /// Convert an address written with width `self` to width `to`.
    ///
    /// Narrowing 8 → 4 shifts right by three bits before truncating. Files
    /// written by 32-bit readers of 64-bit documents carry addresses in that
    /// form, so the rule is part of the format and must stay bit-exact.
    /// Widening 4 → 8 zero-extends.
    pub fn convert(&self, address: u64, to: PointerWidth) -> u64 {
        match (self, to) {
            (Self::Eight, Self::Four) => ((address >> 3) as u32) as u64,
            (Self::Four, Self::Eight) => address & 0xFFFF_FFFF,
            _ => address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_roundtrip() {
        for width in [PointerWidth::Four, PointerWidth::Eight] {
            assert_eq!(PointerWidth::from_marker(width.marker()).unwrap(), width);
        }
        for order in [Endianness::Little, Endianness::Big] {
            assert_eq!(Endianness::from_marker(order.marker()).unwrap(), order);
        }
    }

    #[test]
    fn bad_markers_rejected() {
        assert_eq!(
            PointerWidth::from_marker(b'x'),
            Err(TypeError::InvalidPointerMarker(b'x'))
        );
        assert_eq!(
            Endianness::from_marker(b'x'),
            Err(TypeError::InvalidEndianMarker(b'x'))
        );
    }

    #[test]
    fn narrowing_shifts_by_three() {
        let addr = 0x0000_7f00_1234_5678u64;
        let narrowed = PointerWidth::Eight.convert(addr, PointerWidth::Four);
        assert_eq!(narrowed, ((addr >> 3) as u32) as u64);
        assert!(narrowed <= u32::MAX as u64);
    }

    #[test]
    fn widening_zero_extends() {
        assert_eq!(
            PointerWidth::Four.convert(0xdead_beef, PointerWidth::Eight),
            0xdead_beef
        );
    }

    #[test]
    fn same_width_is_identity() {
        assert_eq!(PointerWidth::Eight.convert(42, PointerWidth::Eight), 42);
        assert_eq!(PointerWidth::Four.convert(42, PointerWidth::Four), 42);
    }
}
