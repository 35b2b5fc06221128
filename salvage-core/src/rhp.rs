//! Sector reads over a host session.
//!
//! A [`Session`] is an authenticated, contract-backed connection to one host.
//! The transport and its wire encoding live behind the trait; this module owns
//! the exchange (settings, priced read, verification) and turns whatever the
//! host or transport reports into a [`SectorError`] kind.
use crate::config::RecoveryConfig;
use crate::error::SectorError;
use crate::merkle;
use crate::renter::Renter;
use crate::types::{Hash256, HostKey};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Amounts in the host's smallest currency unit.
pub type Currency = u128;

/// Host-advertised prices relevant to reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostSettings {
    pub base_rpc_price: Currency,
    pub sector_access_price: Currency,
    pub download_bandwidth_price: Currency,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadSection {
    pub merkle_root: Hash256,
    pub offset: u32,
    pub length: u32,
}

/// Price the host will charge for reading `sections`.
pub fn read_cost(settings: &HostSettings, sections: &[ReadSection]) -> Currency {
    let bytes: Currency = sections.iter().map(|s| s.length as Currency).sum();
    settings
        .base_rpc_price
        .saturating_add(settings.sector_access_price.saturating_mul(sections.len() as Currency))
        .saturating_add(settings.download_bandwidth_price.saturating_mul(bytes))
}

/// Failure surfaced by a session implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The host answered with an RPC error; the message is the host's text.
    #[error("host error: {0}")]
    Rpc(String),
    /// Connection-level failure.
    #[error("{0}")]
    Transport(String),
}

const MSG_SECTOR_MISSING: &str = "could not find the desired sector";
const MSG_CONTRACT_MISSING: &str = "no record of that contract";

/// Map a session failure to the kind callers act on. Host messages are only
/// inspected here.
pub fn classify(err: SessionError) -> SectorError {
    match err {
        SessionError::Rpc(msg) if msg.contains(MSG_SECTOR_MISSING) => SectorError::NotFound,
        SessionError::Rpc(msg) if msg.contains(MSG_CONTRACT_MISSING) => SectorError::ContractMissing,
        SessionError::Rpc(msg) => SectorError::Transport(format!("host error: {msg}")),
        SessionError::Transport(msg) => SectorError::Transport(msg),
    }
}

#[async_trait]
pub trait Session: Send {
    async fn settings(&mut self) -> Result<HostSettings, SessionError>;

    /// Read the requested sections, paying at most `cost`.
    async fn read(&mut self, sections: &[ReadSection], cost: Currency)
        -> Result<Bytes, SessionError>;
}

async fn step<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, SectorError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(classify),
        Err(_) => Err(SectorError::Transport(format!("{what} timed out after {limit:?}"))),
    }
}

/// Fetches whole sectors from single hosts.
#[derive(Clone, Debug)]
pub struct SectorClient {
    sector_size: usize,
    dial_timeout: Duration,
    settings_timeout: Duration,
    read_timeout: Duration,
    check_timeout: Duration,
}

impl SectorClient {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            sector_size: config.sector_size,
            dial_timeout: config.dial_timeout,
            settings_timeout: config.settings_timeout,
            read_timeout: config.read_timeout,
            check_timeout: config.check_timeout,
        }
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    // Settings, priced read and length check; the caller verifies the root.
    async fn fetch(&self, session: &mut dyn Session, root: &Hash256) -> Result<Bytes, SectorError> {
        let settings = step(self.settings_timeout, "settings", session.settings()).await?;
        let sections =
            [ReadSection { merkle_root: *root, offset: 0, length: self.sector_size as u32 }];
        let cost = read_cost(&settings, &sections);
        let data = step(self.read_timeout, "read", session.read(&sections, cost)).await?;
        if data.len() != self.sector_size {
            return Err(SectorError::Transport(format!(
                "unexpected sector size {} (want {})",
                data.len(),
                self.sector_size
            )));
        }
        Ok(data)
    }

    /// Read one full sector and verify it against `root`. A payload with the
    /// wrong merkle root is a transport error.
    pub async fn read_sector(
        &self,
        session: &mut dyn Session,
        root: &Hash256,
    ) -> Result<Bytes, SectorError> {
        let data = self.fetch(session, root).await?;
        let got = merkle::sector_root(&data);
        if got != *root {
            return Err(SectorError::Transport(format!("sector {root} has merkle root {got}")));
        }
        Ok(data)
    }

    async fn open(&self, renter: &dyn Renter, host: &HostKey) -> Result<Box<dyn Session>, SectorError> {
        step(self.dial_timeout, "dial", renter.new_session(host)).await
    }

    /// Dial `host` and download `root` from it.
    pub async fn download(
        &self,
        renter: &dyn Renter,
        host: &HostKey,
        root: &Hash256,
    ) -> Result<Bytes, SectorError> {
        let mut session = self.open(renter, host).await?;
        self.read_sector(session.as_mut(), root).await
    }

    /// Whether `host` currently serves `root`. A missing sector or a payload
    /// with the wrong root is `false`; other failures are errors.
    pub async fn check(
        &self,
        renter: &dyn Renter,
        host: &HostKey,
        root: &Hash256,
    ) -> Result<bool, SectorError> {
        let probe = async {
            let mut session = self.open(renter, host).await?;
            match self.fetch(session.as_mut(), root).await {
                Ok(data) => Ok(merkle::sector_root(&data) == *root),
                Err(SectorError::NotFound) => Ok(false),
                Err(e) => Err(e),
            }
        };
        match tokio::time::timeout(self.check_timeout, probe).await {
            Ok(res) => res,
            Err(_) => Err(SectorError::Transport(format!(
                "check timed out after {:?}",
                self.check_timeout
            ))),
        }
    }
}
