use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Two-character code naming a top-level object kind.
///
/// Object blocks carry their type code in the first two bytes of the block
/// code, zero padded: `OB` is written as `b"OB\0\0"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeCode([u8; 2]);

impl TypeCode {
    /// Library records: one per external document referenced by a file.
    pub const LIBRARY: TypeCode = TypeCode(*b"LI");

    /// Create a code from its two ASCII bytes.
    pub const fn new(bytes: [u8; 2]) -> Self {
        Self(bytes)
    }

    /// Parse from a two-character string.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 || !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err(TypeError::InvalidTypeCode(s.to_string()));
        }
        Ok(Self([bytes[0], bytes[1]]))
    }

    /// The raw two bytes.
    pub fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }

    /// The block code an object of this type is written under.
    pub fn block_code(&self) -> BlockCode {
        BlockCode([self.0[0], self.0[1], 0, 0])
    }
}

impl fmt::Debug for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeCode({self})")
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Four-byte tag at the start of every block header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockCode(pub [u8; 4]);

impl BlockCode {
    /// Plain data owned by the preceding object block.
    pub const DATA: BlockCode = BlockCode(*b"DATA");
    /// Embedded schema (structure self-description).
    pub const DNA1: BlockCode = BlockCode(*b"DNA1");
    /// File-wide globals record.
    pub const GLOB: BlockCode = BlockCode(*b"GLOB");
    /// Stream terminator.
    pub const ENDB: BlockCode = BlockCode(*b"ENDB");
    /// Link placeholder: an object that lives in the library declared last.
    pub const LINK_PLACEHOLDER: BlockCode = BlockCode(*b"ID\0\0");
    /// Library declaration.
    pub const LIBRARY: BlockCode = BlockCode(*b"LI\0\0");

    /// The type code of an object block, if this code names one.
    ///
    /// Object codes are two alphanumeric bytes followed by two zero bytes.
    /// The link placeholder code is not an object type.
    pub fn type_code(&self) -> Option<TypeCode> {
        let [a, b, c, d] = self.0;
        if *self == Self::LINK_PLACEHOLDER || c != 0 || d != 0 {
            return None;
        }
        if a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric() {
            Some(TypeCode([a, b]))
        } else {
            None
        }
    }

    /// Whether this block carries an object record (real or placeholder).
    pub fn is_object(&self) -> bool {
        *self == Self::LINK_PLACEHOLDER || self.type_code().is_some()
    }
}

impl fmt::Debug for BlockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockCode({self})")
    }
}

impl fmt::Display for BlockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b == 0 {
                break;
            }
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_code_block_code_roundtrip() {
        let code = TypeCode::new(*b"OB");
        assert_eq!(code.block_code(), BlockCode(*b"OB\0\0"));
        assert_eq!(code.block_code().type_code(), Some(code));
    }

    #[test]
    fn reserved_codes_are_not_object_types() {
        assert_eq!(BlockCode::DATA.type_code(), None);
        assert_eq!(BlockCode::DNA1.type_code(), None);
        assert_eq!(BlockCode::ENDB.type_code(), None);
        assert_eq!(BlockCode::LINK_PLACEHOLDER.type_code(), None);
        assert!(BlockCode::LINK_PLACEHOLDER.is_object());
        assert!(!BlockCode::GLOB.is_object());
    }

    #[test]
    fn library_code_is_object() {
        assert_eq!(BlockCode::LIBRARY.type_code(), Some(TypeCode::LIBRARY));
    }

    #[test]
    fn parse_rejects_bad_codes() {
        assert!(TypeCode::parse("OB").is_ok());
        assert!(TypeCode::parse("O").is_err());
        assert!(TypeCode::parse("OBJ").is_err());
        assert!(TypeCode::parse("O ").is_err());
    }

    #[test]
    fn display_trims_zero_padding() {
        assert_eq!(BlockCode(*b"ME\0\0").to_string(), "ME");
        assert_eq!(BlockCode::DATA.to_string(), "DATA");
        assert_eq!(TypeCode::new(*b"MA").to_string(), "MA");
    }

    #[test]
    fn serde_roundtrip() {
        let code = TypeCode::new(*b"SC");
        let json = serde_json::to_string(&code).unwrap();
        let parsed: TypeCode = serde_json::from_str(&json).unwrap();
        assert_eq!(code, parsed);
    }
}
