//! Read-only availability report for a descriptor.
use crate::config::RecoveryConfig;
use crate::error::{RecoveryError, Result, SectorError};
use crate::pool::fan_out;
use crate::renter::{prune_contract, Renter};
use crate::rhp::SectorClient;
use crate::topology::Descriptor;
use crate::types::{Hash256, HostKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PieceHealth {
    pub merkle_root: Hash256,
    /// Hosts that served a verified copy.
    pub hosts: Vec<HostKey>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHealth {
    pub min_pieces: u32,
    pub available_pieces: u32,
    pub pieces: Vec<Vec<PieceHealth>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileHealth {
    pub checked_utc: String,
    pub chunks: Vec<ChunkHealth>,
    pub recoverable: bool,
}

/// Check every distinct sector of `desc` against every host we hold a
/// contract with. A host that has lost our contract is pruned and its
/// remaining checks are skipped.
pub async fn check(
    renter: Arc<dyn Renter>,
    desc: &Descriptor,
    config: &RecoveryConfig,
) -> Result<FileHealth> {
    desc.validate()?;
    let hosts = renter.hosts();
    if hosts.is_empty() {
        return Err(RecoveryError::NoHosts);
    }
    let sectors = desc.distinct_sectors();
    info!(sectors = sectors.len(), hosts = hosts.len(), "checking sector availability");

    let client = SectorClient::new(config);
    let jobs = {
        let sectors = &sectors;
        hosts.into_iter().flat_map(move |h| sectors.iter().map(move |r| (h, *r)))
    };
    let mut held: HashMap<Hash256, Vec<HostKey>> = HashMap::new();
    // Hosts that denied our contract; their queued checks are skipped and
    // the contracts are dropped once the pool drains.
    let stale: Arc<Mutex<HashSet<HostKey>>> = Arc::default();
    fan_out(
        jobs,
        config.workers,
        &CancellationToken::new(),
        |(host, root)| {
            let renter = renter.clone();
            let client = client.clone();
            let stale = stale.clone();
            async move {
                let skip = stale.lock().unwrap_or_else(PoisonError::into_inner).contains(&host);
                if skip || renter.host_contract(&host).is_err() {
                    return (host, root, None);
                }
                let res = client.check(renter.as_ref(), &host, &root).await;
                (host, root, Some(res))
            }
        },
        |(host, root, res)| {
            match res {
                Some(Ok(true)) => held.entry(root).or_default().push(host),
                Some(Ok(false)) | Some(Err(SectorError::NotFound)) | None => {}
                Some(Err(SectorError::ContractMissing)) => {
                    stale.lock().unwrap_or_else(PoisonError::into_inner).insert(host);
                }
                Some(Err(SectorError::Transport(msg))) => {
                    warn!(%host, %root, error = %msg, "sector check failed")
                }
            }
            ControlFlow::Continue(())
        },
    )
    .await;
    let stale: Vec<HostKey> = stale.lock().unwrap_or_else(PoisonError::into_inner).drain().collect();
    for host in stale {
        prune_contract(renter.clone(), host).await;
    }

    for hosts in held.values_mut() {
        hosts.sort();
    }
    let chunks: Vec<ChunkHealth> = desc
        .chunks
        .iter()
        .map(|chunk| {
            let pieces: Vec<Vec<PieceHealth>> = chunk
                .pieces
                .iter()
                .map(|refs| {
                    refs.iter()
                        .map(|r| PieceHealth {
                            merkle_root: r.merkle_root,
                            hosts: held.get(&r.merkle_root).cloned().unwrap_or_default(),
                        })
                        .collect()
                })
                .collect();
            let available = pieces.iter().filter(|p| p.iter().any(|h| !h.hosts.is_empty())).count();
            ChunkHealth {
                min_pieces: desc.data_pieces,
                available_pieces: available as u32,
                pieces,
            }
        })
        .collect();
    let recoverable = chunks.iter().all(|c| c.available_pieces >= c.min_pieces);
    for (i, c) in chunks.iter().enumerate() {
        debug!(chunk = i, available = c.available_pieces, min = c.min_pieces, "chunk health");
    }
    info!(recoverable, chunks = chunks.len(), "health check finished");
    Ok(FileHealth { checked_utc: chrono::Utc::now().to_rfc3339(), chunks, recoverable })
}
