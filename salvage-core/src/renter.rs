//! Host relationships: the collaborator surface the recovery engine talks to,
//! and the on-disk contract store backing it.
use crate::rhp::{Session, SessionError};
use crate::types::{Hash256, HostKey};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CONTRACTS_FILE: &str = "contracts.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContractMeta {
    pub id: Hash256,
    pub host_key: HostKey,
    pub expiration_height: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no contract with host {0}")]
pub struct NoContract(pub HostKey);

/// What the recovery engine needs from whoever manages host contracts.
#[async_trait]
pub trait Renter: Send + Sync {
    /// Hosts we currently hold a contract with.
    fn hosts(&self) -> Vec<HostKey>;

    fn host_contract(&self, host: &HostKey) -> Result<ContractMeta, NoContract>;

    /// Open a session with `host` using its contract.
    async fn new_session(&self, host: &HostKey) -> Result<Box<dyn Session>, SessionError>;

    /// Forget the contract with `host`; it is not offered again.
    fn remove_host_contract(&self, host: &HostKey) -> Result<()>;
}

/// Drop the contract with a host that no longer knows it. Stores persist the
/// removal with blocking file I/O, so it runs on the blocking pool. Returns
/// whether a contract was held.
pub async fn prune_contract(renter: Arc<dyn Renter>, host: HostKey) -> bool {
    if renter.host_contract(&host).is_err() {
        return false;
    }
    warn!(%host, "host has no record of our contract, removing it");
    match tokio::task::spawn_blocking(move || renter.remove_host_contract(&host)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%host, error = %e, "failed to remove host contract"),
        Err(e) => warn!(%host, error = %e, "contract removal task failed"),
    }
    true
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ContractsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renter_key: Option<String>,
    #[serde(default)]
    contracts: Vec<ContractMeta>,
}

struct State {
    renter_key: Option<String>,
    contracts: BTreeMap<HostKey, ContractMeta>,
}

/// `contracts.json` in a data directory. Every mutation is written through.
pub struct ContractStore {
    path: PathBuf,
    height: u64,
    state: Mutex<State>,
}

impl ContractStore {
    /// Load the store in `dir`, dropping contracts that expire at or before
    /// `height`. A missing file is an empty store.
    pub fn open(dir: &Path, height: u64) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(CONTRACTS_FILE);
        let file: ContractsFile = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ContractsFile::default(),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let total = file.contracts.len();
        let contracts: BTreeMap<HostKey, ContractMeta> = file
            .contracts
            .into_iter()
            .filter(|c| c.expiration_height > height)
            .map(|c| (c.host_key, c))
            .collect();
        let store = Self {
            path,
            height,
            state: Mutex::new(State { renter_key: file.renter_key, contracts }),
        };
        let kept = store.len();
        if kept < total {
            info!(expired = total - kept, kept, height, "pruned expired contracts");
            store.save(&store.lock())?;
        }
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.lock().contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All contracts, ordered by host key.
    pub fn contracts(&self) -> Vec<ContractMeta> {
        self.lock().contracts.values().cloned().collect()
    }

    pub fn hosts(&self) -> Vec<HostKey> {
        self.lock().contracts.keys().copied().collect()
    }

    pub fn get(&self, host: &HostKey) -> Option<ContractMeta> {
        self.lock().contracts.get(host).cloned()
    }

    pub fn insert(&self, contract: ContractMeta) -> Result<()> {
        let mut state = self.lock();
        state.contracts.insert(contract.host_key, contract);
        self.save(&state)
    }

    /// Insert many contracts with a single write.
    pub fn extend(&self, contracts: impl IntoIterator<Item = ContractMeta>) -> Result<()> {
        let mut state = self.lock();
        for c in contracts {
            state.contracts.insert(c.host_key, c);
        }
        self.save(&state)
    }

    /// Remove the contract with `host`; returns whether one existed.
    pub fn remove(&self, host: &HostKey) -> Result<bool> {
        let mut state = self.lock();
        if state.contracts.remove(host).is_none() {
            return Ok(false);
        }
        self.save(&state)?;
        debug!(%host, "removed contract");
        Ok(true)
    }

    // Written to a sibling temp file under an advisory lock, then renamed.
    fn save(&self, state: &State) -> Result<()> {
        let file = ContractsFile {
            renter_key: state.renter_key.clone(),
            contracts: state.contracts.values().cloned().collect(),
        };
        let body = serde_json::to_vec_pretty(&file).context("serialize contracts")?;
        let lock_path = self.path.with_extension("json.lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("open {}", lock_path.display()))?;
        FileExt::lock_exclusive(&lock).with_context(|| format!("lock {}", lock_path.display()))?;
        let tmp = self.path.with_extension("json.tmp");
        let written = (|| -> Result<()> {
            let mut f = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
            f.write_all(&body)?;
            f.sync_all()?;
            fs::rename(&tmp, &self.path)
                .with_context(|| format!("rename {} into place", tmp.display()))?;
            Ok(())
        })();
        FileExt::unlock(&lock).ok();
        written
    }
}
