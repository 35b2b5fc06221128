use crate::error::ErasureError;
use rayon::prelude::*;
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::io::Write;

/// Segment width of the sub-piece interleaved code.
pub const SUB_PIECE_SEGMENT: usize = 64;

// Segments decoded per rayon batch before the batch is written out.
const SEGMENT_BATCH: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErasureKind {
    /// Whole pieces form one Reed-Solomon codeword.
    ReedSolomon,
    /// Every 64-byte segment index across the pieces forms its own codeword.
    ReedSolomonSubPiece,
}

impl ErasureKind {
    pub fn from_tag(tag: u32) -> Result<Self, ErasureError> {
        match tag {
            1 => Ok(ErasureKind::ReedSolomon),
            2 => Ok(ErasureKind::ReedSolomonSubPiece),
            other => Err(ErasureError::UnsupportedType(other)),
        }
    }

    pub fn tag(&self) -> u32 {
        match self {
            ErasureKind::ReedSolomon => 1,
            ErasureKind::ReedSolomonSubPiece => 2,
        }
    }
}

/// Systematic Reed-Solomon coder over GF(2^8).
pub struct ErasureCoder {
    kind: ErasureKind,
    data: usize,
    parity: usize,
    // None when there is no parity: pieces are the data verbatim.
    inner: Option<ReedSolomon>,
}

impl ErasureCoder {
    pub fn new(kind: ErasureKind, data: usize, parity: usize) -> Result<Self, ErasureError> {
        if data == 0 || data + parity > 256 {
            return Err(ErasureError::InvalidParameters { data, parity });
        }
        let inner = if parity == 0 { None } else { Some(ReedSolomon::new(data, parity)?) };
        Ok(Self { kind, data, parity, inner })
    }

    pub fn from_tag(tag: u32, data: u32, parity: u32) -> Result<Self, ErasureError> {
        Self::new(ErasureKind::from_tag(tag)?, data as usize, parity as usize)
    }

    pub fn kind(&self) -> ErasureKind {
        self.kind
    }

    /// Pieces needed to recover a chunk.
    pub fn min_pieces(&self) -> usize {
        self.data
    }

    pub fn num_pieces(&self) -> usize {
        self.data + self.parity
    }

    /// Split `data` (zero-padded to `min_pieces * piece_size`) into
    /// `num_pieces` pieces of `piece_size` bytes.
    pub fn encode(&self, data: &[u8], piece_size: usize) -> Result<Vec<Vec<u8>>, ErasureError> {
        let chunk_size = piece_size * self.data;
        if data.len() > chunk_size {
            return Err(ErasureError::OutputTooLarge { requested: data.len(), available: chunk_size });
        }
        let mut padded = data.to_vec();
        padded.resize(chunk_size, 0);
        match self.kind {
            ErasureKind::ReedSolomon => {
                let mut shards: Vec<Vec<u8>> =
                    padded.chunks(piece_size.max(1)).map(|c| c.to_vec()).collect();
                shards.resize(self.data, Vec::new());
                shards.resize(self.num_pieces(), vec![0u8; piece_size]);
                self.encode_shards(&mut shards)?;
                Ok(shards)
            }
            ErasureKind::ReedSolomonSubPiece => {
                if piece_size % SUB_PIECE_SEGMENT != 0 {
                    return Err(ErasureError::MisalignedPieceLength {
                        len: piece_size,
                        segment: SUB_PIECE_SEGMENT,
                    });
                }
                let mut pieces = vec![Vec::with_capacity(piece_size); self.num_pieces()];
                let stripe = SUB_PIECE_SEGMENT * self.data;
                for seg in padded.chunks(stripe) {
                    let mut shards: Vec<Vec<u8>> =
                        seg.chunks(SUB_PIECE_SEGMENT).map(|c| c.to_vec()).collect();
                    shards.resize(self.num_pieces(), vec![0u8; SUB_PIECE_SEGMENT]);
                    self.encode_shards(&mut shards)?;
                    for (piece, shard) in pieces.iter_mut().zip(shards) {
                        piece.extend_from_slice(&shard);
                    }
                }
                Ok(pieces)
            }
        }
    }

    fn encode_shards(&self, shards: &mut [Vec<u8>]) -> Result<(), ErasureError> {
        if let Some(rs) = &self.inner {
            rs.encode(shards)?;
        }
        Ok(())
    }

    /// Reconstruct the chunk from at least `min_pieces` present pieces and
    /// write exactly `n` bytes of it to `w`. Missing data pieces are filled in
    /// place.
    pub fn recover(
        &self,
        pieces: &mut [Option<Vec<u8>>],
        n: usize,
        w: &mut dyn Write,
    ) -> Result<(), ErasureError> {
        if pieces.len() != self.num_pieces() {
            return Err(ErasureError::WrongPieceCount {
                expected: self.num_pieces(),
                got: pieces.len(),
            });
        }
        let have = pieces.iter().filter(|p| p.is_some()).count();
        if have < self.data {
            return Err(ErasureError::TooFewPieces { have, need: self.data });
        }
        let mut lens = pieces.iter().flatten().map(|p| p.len());
        let piece_len = lens.next().unwrap_or(0);
        if lens.any(|l| l != piece_len) {
            return Err(ErasureError::InconsistentPieceLength);
        }
        let available = piece_len * self.data;
        if n > available {
            return Err(ErasureError::OutputTooLarge { requested: n, available });
        }
        match self.kind {
            ErasureKind::ReedSolomon => self.recover_whole(pieces, n, w),
            ErasureKind::ReedSolomonSubPiece => self.recover_segments(pieces, piece_len, n, w),
        }
    }

    fn recover_whole(
        &self,
        pieces: &mut [Option<Vec<u8>>],
        n: usize,
        w: &mut dyn Write,
    ) -> Result<(), ErasureError> {
        if pieces[..self.data].iter().any(Option::is_none) {
            if let Some(rs) = &self.inner {
                rs.reconstruct_data(pieces)?;
            }
        }
        let mut remaining = n;
        for piece in pieces[..self.data].iter().flatten() {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(piece.len());
            w.write_all(&piece[..take])?;
            remaining -= take;
        }
        Ok(())
    }

    fn recover_segments(
        &self,
        pieces: &[Option<Vec<u8>>],
        piece_len: usize,
        n: usize,
        w: &mut dyn Write,
    ) -> Result<(), ErasureError> {
        if piece_len % SUB_PIECE_SEGMENT != 0 {
            return Err(ErasureError::MisalignedPieceLength {
                len: piece_len,
                segment: SUB_PIECE_SEGMENT,
            });
        }
        let segments = piece_len / SUB_PIECE_SEGMENT;
        let stripe = SUB_PIECE_SEGMENT * self.data;
        let needed = n.div_ceil(stripe).min(segments);
        let mut remaining = n;
        let mut start = 0;
        while start < needed {
            let end = (start + SEGMENT_BATCH).min(needed);
            let decoded: Vec<Vec<u8>> = (start..end)
                .into_par_iter()
                .map(|seg| self.decode_segment(pieces, seg))
                .collect::<Result<_, _>>()?;
            for stripe_bytes in decoded {
                let take = remaining.min(stripe_bytes.len());
                w.write_all(&stripe_bytes[..take])?;
                remaining -= take;
            }
            start = end;
        }
        Ok(())
    }

    fn decode_segment(&self, pieces: &[Option<Vec<u8>>], seg: usize) -> Result<Vec<u8>, ErasureError> {
        let off = seg * SUB_PIECE_SEGMENT;
        let mut shards: Vec<Option<Vec<u8>>> = pieces
            .iter()
            .map(|p| p.as_ref().map(|p| p[off..off + SUB_PIECE_SEGMENT].to_vec()))
            .collect();
        if shards[..self.data].iter().any(Option::is_none) {
            if let Some(rs) = &self.inner {
                rs.reconstruct_data(&mut shards)?;
            }
        }
        Ok(shards.into_iter().take(self.data).flatten().flatten().collect())
    }
}
