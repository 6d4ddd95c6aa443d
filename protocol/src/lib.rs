use std::fmt;

use anyhow::{bail, Result};

mod error;
mod password;

pub use error::Error;
pub use password::{Password, SECRET_PREFIX};

/// Raw object identifier.
///
/// The full width is 32 bytes so that 32-byte hash schemes fit; stores using
/// 20-byte hashes leave bytes 20..32 zero. Hex formatting covers the first
/// 20 bytes only, which is what object bodies embed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Number of significant bytes for a 20-byte hash scheme.
    pub const SHORT_LEN: usize = 20;
    pub const LEN: usize = 32;
    pub const HEX_LEN: usize = 40;

    /// Builds an id from 20 or 32 raw bytes; a 20-byte input is zero-extended.
    pub fn from_raw(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SHORT_LEN && bytes.len() != Self::LEN {
            bail!("invalid object id length: {}", bytes.len());
        }
        let mut id = [0u8; Self::LEN];
        id[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(id))
    }

    /// Parses a 40-hex-digit id (the 20-byte form).
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            bail!("invalid object id: `{s}`");
        }
        let bytes = hex::decode(s)?;
        Self::from_raw(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// The significant prefix embedded in object bodies.
    pub fn short_bytes(&self) -> &[u8] {
        &self.0[..Self::SHORT_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.short_bytes())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

/// The only object kinds that participate in translation. Tags and any
/// future kinds are rejected before they reach the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_hex_roundtrip() {
        let hex = "0123456789abcdef0123456789abcdef01234567";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(&id.as_bytes()[20..], &[0u8; 12]);
        assert_eq!(id, ObjectId::from_raw(id.short_bytes()).unwrap());
    }

    #[test]
    fn object_id_rejects_bad_input() {
        assert!(ObjectId::from_hex("0123").is_err());
        assert!(ObjectId::from_hex("zz23456789abcdef0123456789abcdef01234567").is_err());
        assert!(ObjectId::from_raw(&[0u8; 19]).is_err());
        assert!(ObjectId::from_raw(&[0u8; 33]).is_err());
    }
}
