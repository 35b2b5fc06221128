use crate::types::SECTOR_SIZE;
use std::time::Duration;

/// Knobs for a recovery or health-check run.
#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    /// Width of the worker pool used to race a sector across hosts.
    pub workers: usize,
    /// Expected length of every sector payload.
    pub sector_size: usize,
    pub dial_timeout: Duration,
    pub settings_timeout: Duration,
    pub read_timeout: Duration,
    /// Upper bound on a whole presence check with one host.
    pub check_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            workers: 100,
            sector_size: SECTOR_SIZE,
            dial_timeout: Duration::from_secs(60),
            settings_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(120),
            check_timeout: Duration::from_secs(60),
        }
    }
}
