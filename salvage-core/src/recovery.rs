//! Chunk-by-chunk file recovery.
//!
//! Each chunk first tries the hosts the descriptor names for each piece, in
//! order (fast path). Pieces still missing after that are raced across every
//! host we hold a contract with (slow path). As soon as `dataPieces` pieces
//! are in hand the chunk is decoded and written; a chunk that cannot reach
//! that count ends the run.
use crate::cache::SectorCache;
use crate::config::RecoveryConfig;
use crate::crypto::MasterKey;
use crate::error::{ErasureError, RecoveryError, Result, SectorError};
use crate::pool::fan_out;
use crate::progress::Progress;
use crate::renter::{prune_contract, Renter};
use crate::rhp::SectorClient;
use crate::rs_codec::ErasureCoder;
use crate::topology::{Chunk, Descriptor};
use crate::types::{Hash256, HostKey};
use bytes::Bytes;
use std::io::Write;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub chunks: u64,
    pub bytes_written: u64,
    /// Sector downloads attempted against hosts.
    pub network_fetches: u64,
    /// Sector lookups served from the cache.
    pub cache_hits: u64,
    /// Sectors that had to be raced across all hosts.
    pub races: u64,
    pub hosts_pruned: u64,
}

#[derive(Default)]
struct Stats {
    fetches: AtomicU64,
    cache_hits: AtomicU64,
    races: AtomicU64,
    pruned: AtomicU64,
}

pub struct Recoverer {
    renter: Arc<dyn Renter>,
    client: SectorClient,
    config: RecoveryConfig,
    cache: SectorCache,
    stats: Arc<Stats>,
    progress: Option<Progress>,
}

impl Recoverer {
    pub fn new(renter: Arc<dyn Renter>, config: RecoveryConfig) -> Self {
        Self {
            client: SectorClient::new(&config),
            renter,
            config,
            cache: SectorCache::new(),
            stats: Arc::new(Stats::default()),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cache(&self) -> &SectorCache {
        &self.cache
    }

    /// Recover the file described by `desc`, writing exactly `fileSize` bytes
    /// to `out` in order. Nothing past the last complete chunk is written when
    /// a chunk turns out to be unrecoverable.
    pub async fn recover<W: Write + Send>(&self, desc: &Descriptor, out: &mut W) -> Result<RecoveryReport> {
        desc.validate()?;
        let coder = desc.erasure_coder()?;
        let key = desc.master_key()?;
        let hosts = self.renter.hosts();
        if hosts.is_empty() {
            return Err(RecoveryError::NoHosts);
        }
        let total = desc.chunks.len();
        info!(
            chunks = total,
            file_size = desc.file_size,
            data_pieces = desc.data_pieces,
            parity_pieces = desc.parity_pieces,
            hosts = hosts.len(),
            "starting recovery"
        );
        if let Some(p) = &self.progress {
            p.set_chunks_total(total as u64);
            p.start();
        }

        let result = self.recover_chunks(desc, &coder, &key, out).await;
        if let Some(p) = &self.progress {
            p.stop();
        }
        let bytes_written = result?;
        out.flush().map_err(ErasureError::from)?;
        Ok(self.report(total as u64, bytes_written))
    }

    async fn recover_chunks<W: Write + Send>(
        &self,
        desc: &Descriptor,
        coder: &ErasureCoder,
        key: &MasterKey,
        out: &mut W,
    ) -> Result<u64> {
        let total = desc.chunks.len();
        let mut written = 0u64;
        for (index, chunk) in desc.chunks.iter().enumerate() {
            let mut pieces = self.collect_pieces(desc, index, chunk, key).await?;
            let len = desc.chunk_len(index);
            coder.recover(&mut pieces, len as usize, &mut *out)?;
            written += len;
            if let Some(p) = &self.progress {
                p.inc_chunk();
                p.add_bytes(len);
            }
            info!(chunk = index + 1, chunks = total, "recovered chunk");
        }
        Ok(written)
    }

    fn report(&self, chunks: u64, bytes_written: u64) -> RecoveryReport {
        RecoveryReport {
            chunks,
            bytes_written,
            network_fetches: self.stats.fetches.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            races: self.stats.races.load(Ordering::Relaxed),
            hosts_pruned: self.stats.pruned.load(Ordering::Relaxed),
        }
    }

    async fn collect_pieces(
        &self,
        desc: &Descriptor,
        index: usize,
        chunk: &Chunk,
        key: &MasterKey,
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let need = desc.min_pieces();
        let mut pieces: Vec<Option<Vec<u8>>> = vec![None; desc.num_pieces()];
        let mut recovered = 0;
        let mut missing = Vec::new();

        for (piece, refs) in chunk.pieces.iter().enumerate() {
            if recovered >= need {
                break;
            }
            if refs.is_empty() {
                continue;
            }
            let mut found = None;
            for r in refs {
                if !self.cache.contains(&r.merkle_root)
                    && self.renter.host_contract(&r.host_key).is_err()
                {
                    debug!(host = %r.host_key, piece, chunk = index, "no contract with claimed host");
                    continue;
                }
                match self.fetch_sector(&r.host_key, &r.merkle_root).await {
                    Ok(sector) => {
                        found = Some(sector);
                        break;
                    }
                    Err(e) => {
                        if let Some(host) = self.note_failure(&r.host_key, &r.merkle_root, e) {
                            self.prune_host(host).await;
                        }
                    }
                }
            }
            match found {
                Some(sector) => {
                    pieces[piece] = Some(self.decrypt(desc, key, index, piece, &sector));
                    recovered += 1;
                    debug!(chunk = index, piece, recovered, need, "recovered piece");
                }
                None => missing.push(piece),
            }
        }

        if recovered < need {
            info!(
                chunk = index,
                recovered,
                need,
                missing = missing.len(),
                "fast path came up short, searching all hosts"
            );
            for piece in missing {
                if recovered >= need {
                    break;
                }
                let root = chunk.pieces[piece][0].merkle_root;
                if let Some(sector) = self.race_sector(&root).await {
                    pieces[piece] = Some(self.decrypt(desc, key, index, piece, &sector));
                    recovered += 1;
                    debug!(chunk = index, piece, recovered, need, "recovered piece from search");
                }
            }
        }

        if recovered < need {
            return Err(RecoveryError::Unrecoverable { chunk: index, recovered, required: need });
        }
        Ok(pieces)
    }

    fn decrypt(
        &self,
        desc: &Descriptor,
        key: &MasterKey,
        chunk: usize,
        piece: usize,
        sector: &[u8],
    ) -> Vec<u8> {
        let len = (desc.piece_size as usize).min(sector.len());
        let mut buf = sector[..len].to_vec();
        key.derive(chunk as u64, piece as u64).decrypt_in_place(&mut buf);
        buf
    }

    /// Fetch `root` from `host`, or from the cache when an earlier fetch
    /// already verified it.
    pub async fn fetch_sector(&self, host: &HostKey, root: &Hash256) -> Result<Bytes, SectorError> {
        if let Some(sector) = self.cache.get(root) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(sector);
        }
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let sector = self.client.download(self.renter.as_ref(), host, root).await?;
        self.remember(root, &sector);
        Ok(sector)
    }

    fn remember(&self, root: &Hash256, sector: &Bytes) {
        self.cache.insert(*root, sector.clone());
        if let Some(p) = &self.progress {
            p.inc_sector();
        }
    }

    /// Ask every host we hold a contract with for `root`; the first verified
    /// copy wins and the other requests are abandoned.
    async fn race_sector(&self, root: &Hash256) -> Option<Bytes> {
        if let Some(sector) = self.cache.get(root) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(sector);
        }
        let hosts = self.renter.hosts();
        if hosts.is_empty() {
            return None;
        }
        self.stats.races.fetch_add(1, Ordering::Relaxed);
        debug!(%root, hosts = hosts.len(), workers = self.config.workers, "racing sector");

        let cancel = CancellationToken::new();
        let mut winner = None;
        let mut stale = Vec::new();
        fan_out(
            hosts,
            self.config.workers,
            &cancel,
            |host| {
                let renter = self.renter.clone();
                let client = self.client.clone();
                let stats = self.stats.clone();
                let root = *root;
                async move {
                    stats.fetches.fetch_add(1, Ordering::Relaxed);
                    let res = client.download(renter.as_ref(), &host, &root).await;
                    (host, res)
                }
            },
            |(host, res)| match res {
                Ok(sector) => {
                    debug!(%root, %host, "sector found");
                    winner = Some(sector);
                    ControlFlow::Break(())
                }
                Err(e) => {
                    stale.extend(self.note_failure(&host, root, e));
                    ControlFlow::Continue(())
                }
            },
        )
        .await;
        for host in stale {
            self.prune_host(host).await;
        }

        if let Some(sector) = &winner {
            self.remember(root, sector);
        }
        winner
    }

    /// Log a failed fetch. A host that lost our contract is handed back for
    /// pruning.
    fn note_failure(&self, host: &HostKey, root: &Hash256, err: SectorError) -> Option<HostKey> {
        match err {
            SectorError::NotFound => debug!(%host, %root, "host does not have sector"),
            SectorError::ContractMissing => return Some(*host),
            SectorError::Transport(msg) => {
                warn!(%host, %root, error = %msg, "sector download failed")
            }
        }
        None
    }

    async fn prune_host(&self, host: HostKey) {
        if prune_contract(self.renter.clone(), host).await {
            self.stats.pruned.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Claimed hosts in `desc` that we no longer hold a contract with.
pub fn missing_contracts(renter: &dyn Renter, desc: &Descriptor) -> Vec<HostKey> {
    desc.hosts().into_iter().filter(|h| renter.host_contract(h).is_err()).collect()
}
