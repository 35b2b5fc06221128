pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod health;
pub mod local;
pub mod merkle;
pub mod metafile;
mod pool;
pub mod progress;
pub mod recovery;
pub mod renter;
pub mod rhp;
pub mod rs_codec;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod topology;
pub mod types;

pub use error::{RecoveryError, Result};
pub use recovery::{Recoverer, RecoveryReport};
pub use topology::Descriptor;
