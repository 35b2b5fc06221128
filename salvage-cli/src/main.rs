use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use salvage_core::config::RecoveryConfig;
use salvage_core::health;
use salvage_core::local::LocalHosts;
use salvage_core::metafile;
use salvage_core::progress::Progress;
use salvage_core::recovery::{missing_contracts, Recoverer};
use salvage_core::renter::ContractStore;
use salvage_core::topology::Descriptor;
use salvage_core::types::SECTOR_SIZE;

#[derive(Parser)]
#[command(name = "salvage", version, about = "Recover erasure-coded files straight from storage hosts")]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct HostArgs {
    /// Host sector dumps: <host key hex>/<sector root hex>
    #[arg(long, env = "SALVAGE_HOSTS_DIR")]
    hosts_dir: PathBuf,
    /// Where contracts.json and reports live
    #[arg(long, env = "SALVAGE_DATA_DIR", default_value = ".salvage")]
    data_dir: PathBuf,
    /// Current chain height; contracts expiring at or before it are dropped
    #[arg(long, env = "SALVAGE_HEIGHT", default_value_t = 0)]
    height: u64,
    #[arg(long, env = "SALVAGE_WORKERS", default_value_t = 100)]
    workers: usize,
    #[arg(long, default_value_t = SECTOR_SIZE)]
    sector_size: usize,
    #[arg(long, env = "SALVAGE_DIAL_TIMEOUT", default_value_t = 60)]
    dial_timeout_secs: u64,
    #[arg(long, env = "SALVAGE_SETTINGS_TIMEOUT", default_value_t = 60)]
    settings_timeout_secs: u64,
    #[arg(long, env = "SALVAGE_READ_TIMEOUT", default_value_t = 120)]
    read_timeout_secs: u64,
    #[arg(long, env = "SALVAGE_CHECK_TIMEOUT", default_value_t = 60)]
    check_timeout_secs: u64,
}

impl HostArgs {
    fn config(&self) -> RecoveryConfig {
        RecoveryConfig {
            workers: self.workers.max(1),
            sector_size: self.sector_size,
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            settings_timeout: Duration::from_secs(self.settings_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            check_timeout: Duration::from_secs(self.check_timeout_secs),
        }
    }

    fn open(&self) -> Result<Arc<LocalHosts>> {
        let store = ContractStore::open(&self.data_dir, self.height)?;
        Ok(Arc::new(LocalHosts::open(&self.hosts_dir, store)?))
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Decode a descriptor into topology JSON
    Extract {
        descriptor: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Recover a file from its descriptor (or topology JSON)
    Recover {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        hosts: HostArgs,
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// Report which hosts still hold each sector
    Check {
        descriptor: PathBuf,
        #[command(flatten)]
        hosts: HostArgs,
        /// Report path (default: <data-dir>/<name>.health.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored contracts
    Contracts {
        #[arg(long, env = "SALVAGE_DATA_DIR", default_value = ".salvage")]
        data_dir: PathBuf,
        #[arg(long, env = "SALVAGE_HEIGHT", default_value_t = 0)]
        height: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose { 0 => "info", 1 => "debug", _ => "trace" };
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.cmd {
        Cmd::Extract { descriptor, output } => extract(&descriptor, output.as_deref())?,
        Cmd::Recover { input, output, hosts, progress } => recover(&input, &output, &hosts, progress).await?,
        Cmd::Check { descriptor, hosts, output } => check(&descriptor, &hosts, output).await?,
        Cmd::Contracts { data_dir, height } => contracts(&data_dir, height)?,
    }
    Ok(())
}

/// Topology JSON is tried first; anything else is read as an on-disk descriptor.
fn load_descriptor(path: &Path) -> Result<Descriptor> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&f) }.with_context(|| format!("map {}", path.display()))?;
    match Descriptor::from_json(&mmap) {
        Ok(desc) => Ok(desc),
        Err(json_err) => metafile::decode(&mmap)
            .with_context(|| format!("not topology JSON ({json_err}) nor a descriptor"))
            .with_context(|| format!("decode {}", path.display())),
    }
}

fn extract(descriptor: &Path, output: Option<&Path>) -> Result<()> {
    let desc = load_descriptor(descriptor)?;
    let json = desc.to_json_pretty()?;
    match output {
        Some(p) => {
            fs::write(p, json.as_bytes()).with_context(|| format!("write {}", p.display()))?;
            eprintln!("Wrote topology for {} chunks to {}", desc.chunks.len(), p.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn part_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}

async fn recover(input: &Path, output: &Path, hosts: &HostArgs, progress: bool) -> Result<()> {
    let desc = load_descriptor(input)?;
    let renter = hosts.open()?;
    let missing = missing_contracts(renter.as_ref(), &desc);
    if !missing.is_empty() {
        warn!(hosts = missing.len(), "descriptor names hosts we hold no contract with");
    }

    let part = part_path(output);
    let file = File::create(&part).with_context(|| format!("create {}", part.display()))?;
    let mut out = HashingWriter { inner: BufWriter::new(file), hasher: blake3::Hasher::new() };
    let recoverer = Recoverer::new(renter, hosts.config()).with_progress(Progress::new(progress));
    let report = match recoverer.recover(&desc, &mut out).await {
        Ok(r) => r,
        Err(e) => {
            drop(out);
            let _ = fs::remove_file(&part);
            return Err(e).context("recovery failed");
        }
    };
    let digest = out.hasher.finalize();
    out.inner.into_inner().context("flush output")?.sync_all()?;
    fs::rename(&part, output).with_context(|| format!("rename into {}", output.display()))?;
    info!(
        fetches = report.network_fetches,
        cache_hits = report.cache_hits,
        races = report.races,
        hosts_pruned = report.hosts_pruned,
        "recovery finished"
    );
    println!("Recovered {} bytes to {}", report.bytes_written, output.display());
    println!("blake3 {}", digest.to_hex());
    Ok(())
}

async fn check(descriptor: &Path, hosts: &HostArgs, output: Option<PathBuf>) -> Result<()> {
    let desc = load_descriptor(descriptor)?;
    let renter = hosts.open()?;
    let report = health::check(renter, &desc, &hosts.config()).await?;
    let out = output.unwrap_or_else(|| {
        let stem = descriptor.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        hosts.data_dir.join(format!("{stem}.health.json"))
    });
    if let Some(parent) = out.parent() { fs::create_dir_all(parent).ok(); }
    fs::write(&out, serde_json::to_vec_pretty(&report)?).with_context(|| format!("write {}", out.display()))?;
    for (i, c) in report.chunks.iter().enumerate() {
        println!("Chunk {}: {}/{} pieces available", i + 1, c.available_pieces, c.min_pieces);
    }
    if report.recoverable { println!("File is recoverable"); } else { println!("File is not recoverable"); }
    eprintln!("Report written to {}", out.display());
    Ok(())
}

fn contracts(data_dir: &Path, height: u64) -> Result<()> {
    let store = ContractStore::open(data_dir, height)?;
    for c in store.contracts() {
        println!("{} {} expires {}", c.host_key, c.id, c.expiration_height);
    }
    println!("{} contracts", store.len());
    Ok(())
}
