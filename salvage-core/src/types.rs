use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Size of a host sector in bytes (4 MiB).
pub const SECTOR_SIZE: usize = 1 << 22;

/// Size of a merkle leaf within a sector.
pub const LEAF_SIZE: usize = 64;

const ED25519_PREFIX: &str = "ed25519:";

#[derive(Debug, Error, PartialEq)]
pub enum ParseKeyError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
    #[error("unsupported key algorithm in {0:?}")]
    Algorithm(String),
}

fn decode_32(s: &str) -> Result<[u8; 32], ParseKeyError> {
    let raw = hex::decode(s)?;
    let len = raw.len();
    raw.try_into().map_err(|_| ParseKeyError::Length(len))
}

/// A 256-bit content hash. Sector merkle roots and contract ids use this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(b: [u8; 32]) -> Self {
        Hash256(b)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

impl FromStr for Hash256 {
    type Err = ParseKeyError;

    // Older exports prefix hashes with "h:".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("h:").unwrap_or(s);
        decode_32(s).map(Hash256)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Host identity: an ed25519 public key, written as `ed25519:<hex>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey(pub [u8; 32]);

impl HostKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Bare hex form, used for on-disk directory names.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ED25519_PREFIX}{}", self.hex())
    }
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostKey({self})")
    }
}

impl FromStr for HostKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("ed25519", key)) => decode_32(key).map(HostKey),
            Some(_) => Err(ParseKeyError::Algorithm(s.to_string())),
            None => decode_32(s).map(HostKey),
        }
    }
}

impl Serialize for HostKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HostKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
