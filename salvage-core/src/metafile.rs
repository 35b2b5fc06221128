//! On-disk file descriptor.
//!
//! Layout: a JSON header object at offset 0, a host key table at
//! `pubkeytableoffset` and fixed 4096-byte chunk records from `chunkoffset`
//! to the end of the file.
//!
//! Host table entry (57 bytes): 16-byte NUL-padded algorithm specifier,
//! u64 LE key length (32), 32-byte key, 1-byte used flag.
//!
//! Chunk record: 17 skipped bytes (extension info and stuck flag), u16 LE
//! piece count, then `(u32 LE piece index, u32 LE host index, 32-byte root)`
//! per sector. The last record may be cut short by the end of the file.
use crate::crypto::CipherKind;
use crate::error::{malformed, DecodeError};
use crate::rs_codec::ErasureKind;
use crate::topology::{Chunk, Descriptor, SectorRef};
use crate::types::{Hash256, HostKey};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CHUNK_RECORD_LEN: usize = 4096;
pub const HOST_ENTRY_LEN: usize = 16 + 8 + 32 + 1;
const RECORD_SKIP: usize = 17;
const REF_LEN: usize = 4 + 4 + 32;
/// Sector refs that fit in one chunk record.
pub const MAX_REFS_PER_CHUNK: usize = (CHUNK_RECORD_LEN - RECORD_SKIP - 2) / REF_LEN;
const PAGE: usize = 4096;
const ED25519: &[u8] = b"ed25519";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KeyType {
    Name(String),
    Specifier([u8; 8]),
}

#[derive(Serialize, Deserialize)]
struct Header {
    filesize: u64,
    piecesize: u64,
    pubkeytableoffset: i64,
    chunkoffset: i64,
    erasurecodetype: [u8; 4],
    erasurecodeparams: [u8; 8],
    #[serde(default)]
    masterkey: Option<String>,
    #[serde(default)]
    masterkeytype: Option<KeyType>,
    #[serde(default)]
    skylinks: Option<Vec<String>>,
}

fn le_u32(b: &[u8]) -> u32 {
    let mut x = [0u8; 4];
    x.copy_from_slice(&b[..4]);
    u32::from_le_bytes(x)
}

fn offset(v: i64, len: usize, what: &str) -> Result<usize, DecodeError> {
    usize::try_from(v)
        .ok()
        .filter(|&o| o <= len)
        .ok_or_else(|| malformed(format!("{what} {v} outside descriptor of {len} bytes")))
}

/// Parse an on-disk descriptor.
pub fn decode(bytes: &[u8]) -> Result<Descriptor, DecodeError> {
    let header = match serde_json::Deserializer::from_slice(bytes).into_iter::<Header>().next() {
        Some(Ok(h)) => h,
        Some(Err(e)) => return Err(malformed(format!("header: {e}"))),
        None => return Err(malformed("empty descriptor")),
    };

    let tag = u32::from_be_bytes(header.erasurecodetype);
    let kind = ErasureKind::from_tag(tag).map_err(|_| DecodeError::UnsupportedErasureType(tag))?;
    let data_pieces = le_u32(&header.erasurecodeparams[..4]);
    let parity_pieces = le_u32(&header.erasurecodeparams[4..]);
    if data_pieces == 0 {
        return Err(malformed("dataPieces must be positive"));
    }
    if header.piecesize == 0 {
        return Err(malformed("pieceSize must be positive"));
    }

    let table_start = offset(header.pubkeytableoffset, bytes.len(), "host table offset")?;
    let chunk_start = offset(header.chunkoffset, bytes.len(), "chunk table offset")?;
    if chunk_start < table_start {
        return Err(malformed("chunk table precedes host table"));
    }
    let hosts = decode_host_table(&bytes[table_start..chunk_start])?;

    let master_key = match &header.masterkey {
        Some(text) => STANDARD.decode(text).map_err(|e| malformed(format!("master key: {e}")))?,
        None => Vec::new(),
    };
    let master_key_type = match header.masterkeytype {
        Some(KeyType::Name(name)) => name,
        Some(KeyType::Specifier(spec)) => CipherKind::name_from_specifier(spec)
            .ok_or_else(|| malformed(format!("unknown cipher specifier {spec:?}")))?
            .to_string(),
        None => CipherKind::Plaintext.name().to_string(),
    };

    let mut desc = Descriptor {
        file_size: header.filesize,
        piece_size: header.piecesize,
        encoder_type: kind.tag(),
        data_pieces,
        parity_pieces,
        master_key,
        master_key_type,
        skylinks: header.skylinks.unwrap_or_default(),
        chunks: Vec::new(),
    };

    desc.check_erasure_params()?;
    desc.checked_chunk_size()?;
    let num_pieces = desc.num_pieces();
    let expected = desc.expected_chunks();
    let table = &bytes[chunk_start..];
    for i in 0..expected {
        let start = i * CHUNK_RECORD_LEN;
        if start >= table.len() {
            return Err(malformed(format!(
                "chunk table ends after {i} of {expected} chunks"
            )));
        }
        let mut record = [0u8; CHUNK_RECORD_LEN];
        let avail = &table[start..table.len().min(start + CHUNK_RECORD_LEN)];
        record[..avail.len()].copy_from_slice(avail);
        desc.chunks.push(decode_chunk(&record, num_pieces, &hosts, i)?);
    }
    Ok(desc)
}

// `None` marks an unused padding slot.
fn decode_host_table(table: &[u8]) -> Result<Vec<Option<HostKey>>, DecodeError> {
    table
        .chunks_exact(HOST_ENTRY_LEN)
        .enumerate()
        .map(|(i, entry)| {
            let mut len8 = [0u8; 8];
            len8.copy_from_slice(&entry[16..24]);
            match u64::from_le_bytes(len8) {
                0 => Ok(None),
                32 => {
                    let algo = &entry[..16];
                    let name_len = algo.iter().position(|&b| b == 0).unwrap_or(16);
                    if &algo[..name_len] != ED25519 {
                        return Err(malformed(format!(
                            "host {i}: unsupported key algorithm {:?}",
                            String::from_utf8_lossy(&algo[..name_len])
                        )));
                    }
                    let mut key = [0u8; 32];
                    key.copy_from_slice(&entry[24..56]);
                    Ok(Some(HostKey(key)))
                }
                n => Err(malformed(format!("host {i}: key length {n}"))),
            }
        })
        .collect()
}

fn decode_chunk(
    record: &[u8; CHUNK_RECORD_LEN],
    num_pieces: usize,
    hosts: &[Option<HostKey>],
    index: usize,
) -> Result<Chunk, DecodeError> {
    let count = u16::from_le_bytes([record[RECORD_SKIP], record[RECORD_SKIP + 1]]) as usize;
    if count > MAX_REFS_PER_CHUNK {
        return Err(malformed(format!("chunk {index}: {count} sectors overflow the record")));
    }
    let mut chunk = Chunk { pieces: vec![Vec::new(); num_pieces] };
    let refs = &record[RECORD_SKIP + 2..];
    for entry in refs.chunks_exact(REF_LEN).take(count) {
        let piece = le_u32(&entry[0..4]) as usize;
        let host = le_u32(&entry[4..8]) as usize;
        if piece >= num_pieces {
            return Err(malformed(format!("chunk {index}: piece index {piece} out of range")));
        }
        let host_key = match hosts.get(host) {
            Some(Some(key)) => *key,
            Some(None) => {
                return Err(malformed(format!("chunk {index}: host index {host} is unused")))
            }
            None => {
                return Err(malformed(format!("chunk {index}: host index {host} out of range")))
            }
        };
        let mut root = [0u8; 32];
        root.copy_from_slice(&entry[8..40]);
        chunk.pieces[piece].push(SectorRef { merkle_root: Hash256(root), host_key });
    }
    Ok(chunk)
}

/// Write `desc` in the on-disk layout. The host table lists each claimed host
/// once, in first-seen order.
pub fn encode(desc: &Descriptor) -> Result<Vec<u8>> {
    desc.validate().context("encode descriptor")?;
    let hosts = desc.hosts();
    let host_index: HashMap<HostKey, u32> =
        hosts.iter().enumerate().map(|(i, h)| (*h, i as u32)).collect();

    let mut params = [0u8; 8];
    params[..4].copy_from_slice(&desc.data_pieces.to_le_bytes());
    params[4..].copy_from_slice(&desc.parity_pieces.to_le_bytes());
    let masterkeytype = match CipherKind::specifier_for_name(&desc.master_key_type) {
        Some(spec) => KeyType::Specifier(spec),
        None => KeyType::Name(desc.master_key_type.clone()),
    };
    let mut header = Header {
        filesize: desc.file_size,
        piecesize: desc.piece_size,
        pubkeytableoffset: 0,
        chunkoffset: 0,
        erasurecodetype: desc.encoder_type.to_be_bytes(),
        erasurecodeparams: params,
        masterkey: Some(STANDARD.encode(&desc.master_key)),
        masterkeytype: Some(masterkeytype),
        skylinks: Some(desc.skylinks.clone()),
    };

    // The offsets live inside the header, so size it with the widest values
    // first and place the table on the next page boundary after that.
    header.pubkeytableoffset = i64::MAX;
    header.chunkoffset = i64::MAX;
    let widest = serde_json::to_vec(&header).context("serialize header")?.len();
    let table_start = (widest + 1).div_ceil(PAGE) * PAGE;
    let chunk_start = table_start + hosts.len() * HOST_ENTRY_LEN;
    header.pubkeytableoffset = table_start as i64;
    header.chunkoffset = chunk_start as i64;

    let mut out = serde_json::to_vec(&header).context("serialize header")?;
    out.push(b'\n');
    out.resize(table_start, 0);
    for host in &hosts {
        let mut algo = [0u8; 16];
        algo[..ED25519.len()].copy_from_slice(ED25519);
        out.extend_from_slice(&algo);
        out.extend_from_slice(&32u64.to_le_bytes());
        out.extend_from_slice(host.as_bytes());
        out.push(1);
    }

    for (i, chunk) in desc.chunks.iter().enumerate() {
        let refs: Vec<(usize, &SectorRef)> = chunk
            .pieces
            .iter()
            .enumerate()
            .flat_map(|(p, slot)| slot.iter().map(move |r| (p, r)))
            .collect();
        if refs.len() > MAX_REFS_PER_CHUNK {
            bail!("chunk {i} has {} sectors, a record holds {MAX_REFS_PER_CHUNK}", refs.len());
        }
        let mut record = vec![0u8; CHUNK_RECORD_LEN];
        record[RECORD_SKIP..RECORD_SKIP + 2].copy_from_slice(&(refs.len() as u16).to_le_bytes());
        let mut at = RECORD_SKIP + 2;
        for (piece, r) in refs {
            record[at..at + 4].copy_from_slice(&(piece as u32).to_le_bytes());
            record[at + 4..at + 8].copy_from_slice(&host_index[&r.host_key].to_le_bytes());
            record[at + 8..at + 40].copy_from_slice(r.merkle_root.as_bytes());
            at += REF_LEN;
        }
        out.extend_from_slice(&record);
    }
    Ok(out)
}
