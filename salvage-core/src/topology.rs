//! In-memory file topology: chunks, pieces and the sectors that hold them.
//!
//! This is also the portable JSON form written by `salvage extract`. Field
//! names are camelCase; the all-lowercase spellings of older exports are
//! accepted on input.
use crate::crypto::MasterKey;
use crate::error::{malformed, CipherError, DecodeError, ErasureError};
use crate::rs_codec::{ErasureCoder, ErasureKind};
use crate::types::{Hash256, HostKey};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// One claimed copy of a piece: the sector's merkle root and the host that
/// was last known to store it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SectorRef {
    #[serde(alias = "MerkleRoot")]
    pub merkle_root: Hash256,
    #[serde(alias = "HostKey")]
    pub host_key: HostKey,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    /// One slot per piece index; an empty slot has no known copies.
    #[serde(default, alias = "Pieces", deserialize_with = "piece_slots")]
    pub pieces: Vec<Vec<SectorRef>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(alias = "filesize")]
    pub file_size: u64,
    #[serde(alias = "piecesize")]
    pub piece_size: u64,
    #[serde(alias = "encodertype")]
    pub encoder_type: u32,
    #[serde(alias = "datapieces")]
    pub data_pieces: u32,
    #[serde(alias = "paritypieces")]
    pub parity_pieces: u32,
    #[serde(default, alias = "masterkey", with = "base64_bytes")]
    pub master_key: Vec<u8>,
    #[serde(default = "plaintext", alias = "masterkeytype")]
    pub master_key_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub skylinks: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub chunks: Vec<Chunk>,
}

fn plaintext() -> String {
    "plaintext".to_string()
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

fn piece_slots<'de, D>(d: D) -> Result<Vec<Vec<SectorRef>>, D::Error>
where
    D: Deserializer<'de>,
{
    let slots = Option::<Vec<Option<Vec<SectorRef>>>>::deserialize(d)?.unwrap_or_default();
    Ok(slots.into_iter().map(Option::unwrap_or_default).collect())
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(text) => STANDARD.decode(text).map_err(de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

impl Descriptor {
    pub fn num_pieces(&self) -> usize {
        self.data_pieces as usize + self.parity_pieces as usize
    }

    pub fn min_pieces(&self) -> usize {
        self.data_pieces as usize
    }

    /// Bytes of file data carried by one full chunk. Saturates; descriptors
    /// that passed [`Descriptor::validate`] never overflow.
    pub fn chunk_size(&self) -> u64 {
        self.piece_size.saturating_mul(self.data_pieces as u64)
    }

    /// Chunk size, or an error when `pieceSize * dataPieces` overflows.
    pub fn checked_chunk_size(&self) -> Result<u64, DecodeError> {
        self.piece_size.checked_mul(self.data_pieces as u64).ok_or_else(|| {
            malformed(format!(
                "chunk size overflows: {} byte pieces x {} data pieces",
                self.piece_size, self.data_pieces
            ))
        })
    }

    /// Check the erasure parameters against the coder; they bound every
    /// per-chunk allocation.
    pub fn check_erasure_params(&self) -> Result<(), DecodeError> {
        match self.erasure_coder() {
            Ok(_) => Ok(()),
            Err(ErasureError::UnsupportedType(tag)) => Err(DecodeError::UnsupportedErasureType(tag)),
            Err(e) => Err(malformed(format!("erasure parameters: {e}"))),
        }
    }

    /// Number of chunks implied by the file size; an empty file still has one.
    pub fn expected_chunks(&self) -> usize {
        let size = self.chunk_size();
        if size == 0 {
            return 0;
        }
        self.file_size.div_ceil(size).max(1) as usize
    }

    /// Bytes of file data in chunk `index`; the last chunk is truncated.
    pub fn chunk_len(&self, index: usize) -> u64 {
        let start = (index as u64).saturating_mul(self.chunk_size());
        self.file_size.saturating_sub(start).min(self.chunk_size())
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.data_pieces == 0 {
            return Err(malformed("dataPieces must be positive"));
        }
        if self.piece_size == 0 {
            return Err(malformed("pieceSize must be positive"));
        }
        if ErasureKind::from_tag(self.encoder_type).is_err() {
            return Err(DecodeError::UnsupportedErasureType(self.encoder_type));
        }
        self.check_erasure_params()?;
        self.checked_chunk_size()?;
        if self.chunks.len() != self.expected_chunks() {
            return Err(malformed(format!(
                "expected {} chunks for {} bytes, found {}",
                self.expected_chunks(),
                self.file_size,
                self.chunks.len()
            )));
        }
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.pieces.len() != self.num_pieces() {
                return Err(malformed(format!(
                    "chunk {i} has {} piece slots, expected {}",
                    chunk.pieces.len(),
                    self.num_pieces()
                )));
            }
        }
        Ok(())
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        let desc: Descriptor = serde_json::from_slice(bytes)?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn to_json_pretty(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Every distinct sector root, in first-seen order.
    pub fn distinct_sectors(&self) -> Vec<Hash256> {
        let mut seen = HashSet::new();
        self.sector_refs().map(|r| r.merkle_root).filter(|root| seen.insert(*root)).collect()
    }

    /// Every distinct claimed host, in first-seen order.
    pub fn hosts(&self) -> Vec<HostKey> {
        let mut seen = HashSet::new();
        self.sector_refs().map(|r| r.host_key).filter(|host| seen.insert(*host)).collect()
    }

    fn sector_refs(&self) -> impl Iterator<Item = &SectorRef> {
        self.chunks.iter().flat_map(|c| c.pieces.iter().flatten())
    }

    pub fn erasure_coder(&self) -> Result<ErasureCoder, ErasureError> {
        ErasureCoder::from_tag(self.encoder_type, self.data_pieces, self.parity_pieces)
    }

    pub fn master_key(&self) -> Result<MasterKey, CipherError> {
        MasterKey::from_descriptor(&self.master_key_type, &self.master_key)
    }
}
