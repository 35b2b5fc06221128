//! Hosts backed by a local directory tree.
//!
//! `<root>/<host key hex>/<sector root hex>` holds one sector each. This lets
//! an operator recover from sector dumps copied off hosts, and gives tests a
//! network that fails in realistic ways: a missing file is the host's
//! "sector not found" answer and a `NO_CONTRACT` marker file makes the host
//! deny every read with "no record of that contract".
use crate::merkle;
use crate::renter::{ContractMeta, ContractStore, NoContract, Renter};
use crate::rhp::{Currency, HostSettings, ReadSection, Session, SessionError};
use crate::types::{Hash256, HostKey};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const NO_CONTRACT_MARKER: &str = "NO_CONTRACT";

pub struct LocalHosts {
    root: PathBuf,
    store: ContractStore,
}

impl LocalHosts {
    /// Serve hosts from `root`. An empty store is seeded with a non-expiring
    /// contract for every host directory found.
    pub fn open(root: &Path, store: ContractStore) -> Result<Self> {
        if store.is_empty() {
            let found = scan_hosts(root)?;
            info!(hosts = found.len(), dir = %root.display(), "seeding contracts from host directories");
            store.extend(found.into_iter().map(|host| ContractMeta {
                id: Hash256(*blake3::hash(host.as_bytes()).as_bytes()),
                host_key: host,
                expiration_height: u64::MAX,
            }))?;
        }
        Ok(Self { root: root.to_path_buf(), store })
    }

    pub fn store(&self) -> &ContractStore {
        &self.store
    }

    fn host_dir(&self, host: &HostKey) -> PathBuf {
        self.root.join(host.hex())
    }
}

fn scan_hosts(root: &Path) -> Result<Vec<HostKey>> {
    let mut hosts = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("scan {}", root.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        match entry.file_name().to_str().map(str::parse::<HostKey>) {
            Some(Ok(host)) => hosts.push(host),
            _ => debug!(path = %entry.path().display(), "skipping non-host directory"),
        }
    }
    Ok(hosts)
}

/// Store `sector` for `host` under `root`, returning its merkle root.
pub fn write_sector(root: &Path, host: &HostKey, sector: &[u8]) -> Result<Hash256> {
    let dir = root.join(host.hex());
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let sector_root = merkle::sector_root(sector);
    let path = dir.join(sector_root.to_string());
    fs::write(&path, sector).with_context(|| format!("write {}", path.display()))?;
    Ok(sector_root)
}

/// Make `host` deny all reads as if it had lost our contract.
pub fn mark_no_contract(root: &Path, host: &HostKey) -> Result<()> {
    let dir = root.join(host.hex());
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    fs::write(dir.join(NO_CONTRACT_MARKER), b"")?;
    Ok(())
}

struct LocalSession {
    dir: PathBuf,
}

#[async_trait]
impl Session for LocalSession {
    async fn settings(&mut self) -> Result<HostSettings, SessionError> {
        Ok(HostSettings::default())
    }

    async fn read(
        &mut self,
        sections: &[ReadSection],
        _cost: Currency,
    ) -> Result<Bytes, SessionError> {
        if tokio::fs::try_exists(self.dir.join(NO_CONTRACT_MARKER)).await.unwrap_or(false) {
            return Err(SessionError::Rpc("no record of that contract".into()));
        }
        let mut out = Vec::new();
        for section in sections {
            let path = self.dir.join(section.merkle_root.to_string());
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(SessionError::Rpc("could not find the desired sector".into()))
                }
                Err(e) => {
                    return Err(SessionError::Transport(format!("read {}: {e}", path.display())))
                }
            };
            let start = (section.offset as usize).min(data.len());
            let end = (start + section.length as usize).min(data.len());
            out.extend_from_slice(&data[start..end]);
        }
        Ok(Bytes::from(out))
    }
}

#[async_trait]
impl Renter for LocalHosts {
    fn hosts(&self) -> Vec<HostKey> {
        self.store.hosts()
    }

    fn host_contract(&self, host: &HostKey) -> Result<ContractMeta, NoContract> {
        self.store.get(host).ok_or(NoContract(*host))
    }

    async fn new_session(&self, host: &HostKey) -> Result<Box<dyn Session>, SessionError> {
        if self.store.get(host).is_none() {
            return Err(SessionError::Transport(NoContract(*host).to_string()));
        }
        let dir = self.host_dir(host);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(SessionError::Transport(format!("host {host} is unreachable")));
        }
        Ok(Box::new(LocalSession { dir }))
    }

    fn remove_host_contract(&self, host: &HostKey) -> Result<()> {
        self.store.remove(host).map(|_| ())
    }
}
