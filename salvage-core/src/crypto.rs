//! Piece encryption keys.
//!
//! Every piece is encrypted with a key derived from the file's master key and
//! the piece's `(chunkIndex, pieceIndex)` position. XChaCha20 is a stream
//! cipher, so encryption and decryption are the same keystream XOR.
use crate::error::CipherError;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{Key, XChaCha20, XNonce};
use std::fmt;
use std::str::FromStr;

const XCHACHA_KEY_LEN: usize = 32;
const XCHACHA_NONCE_LEN: usize = 24;
const XCHACHA_MASTER_LEN: usize = XCHACHA_KEY_LEN + XCHACHA_NONCE_LEN;

const SPECIFIERS: [(&str, u8); 4] =
    [("plaintext", 1), ("twofish-gcm", 2), ("threefish", 3), ("xchacha20", 4)];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherKind {
    Plaintext,
    XChaCha20,
}

impl CipherKind {
    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::Plaintext => "plaintext",
            CipherKind::XChaCha20 => "xchacha20",
        }
    }

    /// Map the 8-byte type specifier used by descriptor headers to a cipher
    /// name. Known but unsupported ciphers keep their name so the failure can
    /// be reported when a key is built.
    pub fn name_from_specifier(spec: [u8; 8]) -> Option<&'static str> {
        if spec[..7] != [0u8; 7] {
            return None;
        }
        SPECIFIERS.iter().find(|(_, id)| *id == spec[7]).map(|(name, _)| *name)
    }

    pub fn specifier_for_name(name: &str) -> Option<[u8; 8]> {
        let (_, id) = SPECIFIERS.iter().find(|(n, _)| *n == name)?;
        let mut spec = [0u8; 8];
        spec[7] = *id;
        Some(spec)
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plaintext" => Ok(CipherKind::Plaintext),
            "xchacha20" => Ok(CipherKind::XChaCha20),
            other => Err(CipherError::UnsupportedCipher(other.to_string())),
        }
    }
}

/// The per-file master key.
#[derive(Clone)]
pub struct MasterKey {
    kind: CipherKind,
    key: Vec<u8>,
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl MasterKey {
    pub fn new(kind: CipherKind, key: &[u8]) -> Result<Self, CipherError> {
        if kind == CipherKind::XChaCha20 && key.len() != XCHACHA_MASTER_LEN {
            return Err(CipherError::InvalidKeyLength {
                cipher: "xchacha20",
                expected: XCHACHA_MASTER_LEN,
                got: key.len(),
            });
        }
        Ok(Self { kind, key: key.to_vec() })
    }

    /// Parse the `(masterKeyType, masterKey)` pair carried by a descriptor.
    pub fn from_descriptor(kind: &str, key: &[u8]) -> Result<Self, CipherError> {
        Self::new(kind.parse()?, key)
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Derive the key for one piece. XChaCha20 keys hash the full master key
    /// with both indices (little-endian) and keep the master nonce.
    pub fn derive(&self, chunk_index: u64, piece_index: u64) -> PieceKey {
        match self.kind {
            CipherKind::Plaintext => PieceKey::Plaintext,
            CipherKind::XChaCha20 => {
                let mut state = blake2b_simd::Params::new().hash_length(32).to_state();
                state.update(&self.key);
                state.update(&chunk_index.to_le_bytes());
                state.update(&piece_index.to_le_bytes());
                let mut key = [0u8; XCHACHA_KEY_LEN];
                key.copy_from_slice(state.finalize().as_bytes());
                let mut nonce = [0u8; XCHACHA_NONCE_LEN];
                nonce.copy_from_slice(&self.key[XCHACHA_KEY_LEN..]);
                PieceKey::XChaCha20 { key, nonce }
            }
        }
    }
}

/// Key for a single piece.
#[derive(Clone)]
pub enum PieceKey {
    Plaintext,
    XChaCha20 { key: [u8; XCHACHA_KEY_LEN], nonce: [u8; XCHACHA_NONCE_LEN] },
}

impl PieceKey {
    pub fn decrypt_in_place(&self, buf: &mut [u8]) {
        self.apply(buf)
    }

    pub fn encrypt_in_place(&self, buf: &mut [u8]) {
        self.apply(buf)
    }

    fn apply(&self, buf: &mut [u8]) {
        if let PieceKey::XChaCha20 { key, nonce } = self {
            let mut cipher = XChaCha20::new(Key::from_slice(key), XNonce::from_slice(nonce));
            cipher.apply_keystream(buf);
        }
    }
}
