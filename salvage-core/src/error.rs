use thiserror::Error;

/// Structural problems with a descriptor, on disk or in topology JSON form.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("unsupported erasure code type {0}")]
    UnsupportedErasureType(u32),

    #[error("topology json: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn malformed(msg: impl Into<String>) -> DecodeError {
    DecodeError::MalformedDescriptor(msg.into())
}

#[derive(Debug, Error)]
pub enum ErasureError {
    #[error("unsupported erasure code type {0}")]
    UnsupportedType(u32),

    #[error("invalid erasure parameters: {data} data / {parity} parity pieces")]
    InvalidParameters { data: usize, parity: usize },

    #[error("expected {expected} piece slots, got {got}")]
    WrongPieceCount { expected: usize, got: usize },

    #[error("need at least {need} pieces to recover, have {have}")]
    TooFewPieces { have: usize, need: usize },

    #[error("pieces are not all the same length")]
    InconsistentPieceLength,

    #[error("piece length {len} is not a multiple of the {segment}-byte segment size")]
    MisalignedPieceLength { len: usize, segment: usize },

    #[error("cannot write {requested} bytes from pieces holding {available}")]
    OutputTooLarge { requested: usize, available: usize },

    #[error("reed-solomon: {0:?}")]
    Codec(reed_solomon_erasure::Error),

    #[error("writing recovered data: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reed_solomon_erasure::Error> for ErasureError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        ErasureError::Codec(err)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("unsupported cipher type {0:?}")]
    UnsupportedCipher(String),

    #[error("{cipher} keys are {expected} bytes, got {got}")]
    InvalidKeyLength { cipher: &'static str, expected: usize, got: usize },
}

/// Outcome of a failed sector exchange with one host. The protocol client sets
/// the kind; callers match on it and never inspect message text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SectorError {
    /// The host does not hold the sector.
    #[error("host does not have the sector")]
    NotFound,

    /// The host has no record of our contract; the relationship is stale.
    #[error("host has no record of the contract")]
    ContractMissing,

    /// Anything below the protocol level: dial failures, timeouts, short or
    /// corrupt payloads.
    #[error("transport: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Descriptor(#[from] DecodeError),

    #[error(transparent)]
    Erasure(#[from] ErasureError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("no hosts available")]
    NoHosts,

    #[error(
        "file not recoverable: chunk {chunk} has {recovered} of {required} required pieces"
    )]
    Unrecoverable { chunk: usize, recovered: usize, required: usize },
}

pub type Result<T, E = RecoveryError> = std::result::Result<T, E>;
