//! `Identifier`: the 32-byte content hash used throughout the data model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte content hash. Equality is byte-equality.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier(pub [u8; 32]);

impl Identifier {
    /// The distinguished "none" identifier, used as `ParentID` of a
    /// genesis root block.
    pub const ZERO: Identifier = Identifier([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// A fixed test identifier with `b` in its low byte. Used across the
    /// workspace's test fixtures; not meant for production key material.
    pub fn from_byte(b: u8) -> Self {
        let mut id = [0u8; 32];
        id[31] = b;
        Identifier(id)
    }
}

impl From<[u8; 32]> for Identifier {
    fn from(bytes: [u8; 32]) -> Self {
        Identifier(bytes)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", hex::encode(self.0))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
