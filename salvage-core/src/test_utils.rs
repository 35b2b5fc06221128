//! Fixtures for tests: encoded files and an in-memory host network.
use crate::crypto::{CipherKind, MasterKey};
use crate::merkle;
use crate::renter::{ContractMeta, NoContract, Renter};
use crate::rhp::{Currency, HostSettings, ReadSection, Session, SessionError};
use crate::rs_codec::{ErasureCoder, ErasureKind};
use crate::topology::{Chunk, Descriptor, SectorRef};
use crate::types::{Hash256, HostKey};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Deterministic host identity for index `i`.
pub fn host_key(i: usize) -> HostKey {
    HostKey(*blake3::hash(format!("salvage test host {i}").as_bytes()).as_bytes())
}

#[derive(Clone, Debug)]
pub struct FixtureSpec {
    pub kind: ErasureKind,
    pub data_pieces: u32,
    pub parity_pieces: u32,
    pub piece_size: usize,
    pub sector_size: usize,
    pub cipher: CipherKind,
    pub hosts: usize,
}

impl Default for FixtureSpec {
    fn default() -> Self {
        Self {
            kind: ErasureKind::ReedSolomon,
            data_pieces: 2,
            parity_pieces: 1,
            piece_size: 4096,
            sector_size: 4096,
            cipher: CipherKind::XChaCha20,
            hosts: 3,
        }
    }
}

/// Where one piece of the fixture was stored.
#[derive(Clone, Debug)]
pub struct Placement {
    pub chunk: usize,
    pub piece: usize,
    pub host: HostKey,
    pub root: Hash256,
    pub sector: Bytes,
}

pub struct Fixture {
    pub descriptor: Descriptor,
    pub hosts: Vec<HostKey>,
    pub placements: Vec<Placement>,
    pub data: Vec<u8>,
}

impl Fixture {
    pub fn placement(&self, chunk: usize, piece: usize) -> &Placement {
        &self.placements[chunk * self.descriptor.num_pieces() + piece]
    }
}

/// Erasure-code and encrypt `data` the way an uploader would. Piece `p` of
/// chunk `c` is stored as one sector on host `(c * numPieces + p) % hosts`.
pub fn build_fixture(data: &[u8], spec: &FixtureSpec) -> Result<Fixture> {
    let coder = ErasureCoder::new(spec.kind, spec.data_pieces as usize, spec.parity_pieces as usize)?;
    let master = match spec.cipher {
        CipherKind::Plaintext => Vec::new(),
        CipherKind::XChaCha20 => {
            let mut key = vec![0u8; 56];
            let mut hasher = blake3::Hasher::new();
            hasher.update(b"salvage fixture master key");
            hasher.update(&(data.len() as u64).to_le_bytes());
            hasher.finalize_xof().fill(&mut key);
            key
        }
    };
    let key = MasterKey::new(spec.cipher, &master)?;
    let hosts: Vec<HostKey> = (0..spec.hosts.max(1)).map(host_key).collect();
    let chunk_size = spec.piece_size * spec.data_pieces as usize;
    let num_chunks = data.len().div_ceil(chunk_size).max(1);

    let mut chunks = Vec::with_capacity(num_chunks);
    let mut placements = Vec::new();
    for c in 0..num_chunks {
        let start = (c * chunk_size).min(data.len());
        let end = (start + chunk_size).min(data.len());
        let pieces = coder.encode(&data[start..end], spec.piece_size)?;
        let mut chunk = Chunk { pieces: vec![Vec::new(); coder.num_pieces()] };
        for (p, mut piece) in pieces.into_iter().enumerate() {
            key.derive(c as u64, p as u64).encrypt_in_place(&mut piece);
            piece.resize(spec.sector_size.max(piece.len()), 0);
            let root = merkle::sector_root(&piece);
            let host = hosts[(c * coder.num_pieces() + p) % hosts.len()];
            chunk.pieces[p].push(SectorRef { merkle_root: root, host_key: host });
            placements.push(Placement { chunk: c, piece: p, host, root, sector: Bytes::from(piece) });
        }
        chunks.push(chunk);
    }

    let descriptor = Descriptor {
        file_size: data.len() as u64,
        piece_size: spec.piece_size as u64,
        encoder_type: spec.kind.tag(),
        data_pieces: spec.data_pieces,
        parity_pieces: spec.parity_pieces,
        master_key: master,
        master_key_type: spec.cipher.name().to_string(),
        skylinks: Vec::new(),
        chunks,
    };
    Ok(Fixture { descriptor, hosts, placements, data: data.to_vec() })
}

/// How a mock host answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostBehavior {
    /// Serve whatever sectors it stores.
    Serve,
    /// Deny holding any sector.
    NotFound,
    /// Reject every read as if our contract were gone.
    ContractMissing,
    /// Serve stored sectors with a flipped byte.
    Corrupt,
    /// Refuse connections.
    Offline,
    /// Accept the read and never answer.
    Stall,
}

#[derive(Default)]
struct Network {
    sectors: Mutex<HashMap<HostKey, HashMap<Hash256, Bytes>>>,
    reads: Mutex<HashMap<HostKey, usize>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`Renter`] with scripted host behavior and call accounting.
#[derive(Default)]
pub struct MockRenter {
    network: Arc<Network>,
    behavior: Mutex<HashMap<HostKey, HostBehavior>>,
    contracts: Mutex<BTreeSet<HostKey>>,
    removed: Mutex<Vec<HostKey>>,
    removal_threads: Mutex<Vec<ThreadId>>,
    sessions: AtomicUsize,
}

impl MockRenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fixture host, each with a contract and the sectors placed on it.
    pub fn with_fixture(fixture: &Fixture) -> Self {
        let renter = Self::new();
        for host in &fixture.hosts {
            renter.add_host(*host);
        }
        for p in &fixture.placements {
            renter.put_sector(p.host, p.root, p.sector.clone());
        }
        renter
    }

    pub fn add_host(&self, host: HostKey) {
        locked(&self.contracts).insert(host);
        locked(&self.network.sectors).entry(host).or_default();
    }

    pub fn put_sector(&self, host: HostKey, root: Hash256, sector: Bytes) {
        locked(&self.network.sectors).entry(host).or_default().insert(root, sector);
    }

    pub fn set_behavior(&self, host: HostKey, behavior: HostBehavior) {
        locked(&self.behavior).insert(host, behavior);
    }

    /// Forget our side of the contract without telling the host.
    pub fn drop_contract(&self, host: &HostKey) {
        locked(&self.contracts).remove(host);
    }

    /// Sector reads issued to `host`.
    pub fn reads(&self, host: &HostKey) -> usize {
        locked(&self.network.reads).get(host).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> usize {
        locked(&self.network.reads).values().sum()
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Hosts removed through [`Renter::remove_host_contract`], in order.
    pub fn removed(&self) -> Vec<HostKey> {
        locked(&self.removed).clone()
    }

    /// Threads that ran each contract removal.
    pub fn removal_threads(&self) -> Vec<ThreadId> {
        locked(&self.removal_threads).clone()
    }
}

struct MockSession {
    host: HostKey,
    behavior: HostBehavior,
    network: Arc<Network>,
}

#[async_trait]
impl Session for MockSession {
    async fn settings(&mut self) -> Result<HostSettings, SessionError> {
        Ok(HostSettings { base_rpc_price: 1, sector_access_price: 1, download_bandwidth_price: 1 })
    }

    async fn read(
        &mut self,
        sections: &[ReadSection],
        _cost: Currency,
    ) -> Result<Bytes, SessionError> {
        *locked(&self.network.reads).entry(self.host).or_default() += 1;
        let not_found = || SessionError::Rpc("could not find the desired sector".into());
        match self.behavior {
            HostBehavior::NotFound => return Err(not_found()),
            HostBehavior::ContractMissing => {
                return Err(SessionError::Rpc("no record of that contract".into()))
            }
            HostBehavior::Stall => std::future::pending::<()>().await,
            HostBehavior::Serve | HostBehavior::Corrupt | HostBehavior::Offline => {}
        }
        let mut out = Vec::new();
        for section in sections {
            let sector = locked(&self.network.sectors)
                .get(&self.host)
                .and_then(|s| s.get(&section.merkle_root).cloned())
                .ok_or_else(not_found)?;
            let start = (section.offset as usize).min(sector.len());
            let end = (start + section.length as usize).min(sector.len());
            out.extend_from_slice(&sector[start..end]);
        }
        if self.behavior == HostBehavior::Corrupt {
            if let Some(b) = out.first_mut() {
                *b ^= 0xff;
            }
        }
        Ok(Bytes::from(out))
    }
}

#[async_trait]
impl Renter for MockRenter {
    fn hosts(&self) -> Vec<HostKey> {
        locked(&self.contracts).iter().copied().collect()
    }

    fn host_contract(&self, host: &HostKey) -> Result<ContractMeta, NoContract> {
        if !locked(&self.contracts).contains(host) {
            return Err(NoContract(*host));
        }
        Ok(ContractMeta { id: Hash256(host.0), host_key: *host, expiration_height: u64::MAX })
    }

    async fn new_session(&self, host: &HostKey) -> Result<Box<dyn Session>, SessionError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        if !locked(&self.contracts).contains(host) {
            return Err(SessionError::Transport(NoContract(*host).to_string()));
        }
        let behavior = locked(&self.behavior).get(host).copied().unwrap_or(HostBehavior::Serve);
        if behavior == HostBehavior::Offline {
            return Err(SessionError::Transport(format!("dial {host}: connection refused")));
        }
        Ok(Box::new(MockSession { host: *host, behavior, network: self.network.clone() }))
    }

    fn remove_host_contract(&self, host: &HostKey) -> Result<()> {
        locked(&self.contracts).remove(host);
        locked(&self.removed).push(*host);
        locked(&self.removal_threads).push(thread::current().id());
        Ok(())
    }
}
