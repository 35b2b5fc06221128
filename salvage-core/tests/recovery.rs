use rand::{rngs::StdRng, seq::SliceRandom, RngCore, SeedableRng};
use salvage_core::config::RecoveryConfig;
use salvage_core::crypto::CipherKind;
use salvage_core::error::{CipherError, RecoveryError};
use salvage_core::progress::Progress;
use salvage_core::recovery::missing_contracts;
use salvage_core::renter::Renter;
use salvage_core::rs_codec::ErasureKind;
use salvage_core::test_utils::{build_fixture, host_key, Fixture, FixtureSpec, HostBehavior, MockRenter};
use salvage_core::{Recoverer, RecoveryReport, Result};
use std::sync::Arc;

const SECTOR: usize = 4096;

fn config() -> RecoveryConfig {
    RecoveryConfig { sector_size: SECTOR, workers: 8, ..RecoveryConfig::default() }
}

fn random_bytes(seed: u64, n: usize) -> Vec<u8> {
    let mut v = vec![0u8; n];
    StdRng::seed_from_u64(seed).fill_bytes(&mut v);
    v
}

fn spec(data_pieces: u32, parity_pieces: u32, hosts: usize) -> FixtureSpec {
    FixtureSpec { data_pieces, parity_pieces, hosts, ..FixtureSpec::default() }
}

async fn run(renter: &Arc<MockRenter>, fixture: &Fixture) -> (Result<RecoveryReport>, Vec<u8>) {
    let recoverer = Recoverer::new(renter.clone(), config());
    let mut out = Vec::new();
    let res = recoverer.recover(&fixture.descriptor, &mut out).await;
    (res, out)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn any_ten_of_thirty_hosts_recover_the_file() {
    let data = random_bytes(1, 2 * 10 * SECTOR + 1234);
    let fixture = build_fixture(&data, &spec(10, 20, 30)).unwrap();
    assert_eq!(fixture.descriptor.chunks.len(), 3);

    let mut rng = StdRng::seed_from_u64(2024);
    for trial in 0..5 {
        let renter = Arc::new(MockRenter::with_fixture(&fixture));
        let mut hosts = fixture.hosts.clone();
        hosts.shuffle(&mut rng);
        for host in &hosts[10..] {
            renter.set_behavior(*host, HostBehavior::NotFound);
        }
        let (res, out) = run(&renter, &fixture).await;
        let report = res.unwrap();
        assert_eq!(blake3::hash(&out), blake3::hash(&data), "trial {trial}");
        assert_eq!(report.bytes_written, data.len() as u64);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.races, 0);
    }
}

#[tokio::test]
async fn fast_path_stops_at_data_pieces() {
    let data = random_bytes(2, 4 * SECTOR);
    let fixture = build_fixture(&data, &spec(4, 8, 12)).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));

    let (res, out) = run(&renter, &fixture).await;
    let report = res.unwrap();
    assert_eq!(out, data);
    assert_eq!(report.network_fetches, 4);
    assert_eq!(report.races, 0);
    assert_eq!(renter.total_reads(), 4);
    assert_eq!(renter.sessions(), 4);
}

#[tokio::test]
async fn shared_sectors_are_fetched_once() {
    let half = random_bytes(3, 2 * SECTOR);
    let data = [half.clone(), half].concat();
    let spec = FixtureSpec { cipher: CipherKind::Plaintext, ..spec(2, 1, 3) };
    let fixture = build_fixture(&data, &spec).unwrap();
    assert_eq!(fixture.placement(0, 0).root, fixture.placement(1, 0).root);

    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let (res, out) = run(&renter, &fixture).await;
    let report = res.unwrap();
    assert_eq!(out, data);
    assert_eq!(report.network_fetches, 2);
    assert_eq!(report.cache_hits, 2);
    assert_eq!(renter.total_reads(), 2);
}

#[tokio::test]
async fn cached_sector_needs_one_network_call() {
    let fixture = build_fixture(&random_bytes(4, 5000), &FixtureSpec::default()).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let recoverer = Recoverer::new(renter.clone(), config());
    let p = fixture.placement(0, 1);

    let first = recoverer.fetch_sector(&p.host, &p.root).await.unwrap();
    let second = recoverer.fetch_sector(&p.host, &p.root).await.unwrap();
    assert_eq!(first, p.sector);
    assert_eq!(first, second);
    assert_eq!(renter.total_reads(), 1);
    assert_eq!(recoverer.cache().len(), 1);
}

#[tokio::test]
async fn contract_missing_host_is_pruned_and_never_retried() {
    let data = random_bytes(5, 3 * 2 * SECTOR);
    let fixture = build_fixture(&data, &spec(2, 2, 4)).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let gone = fixture.hosts[0];
    renter.set_behavior(gone, HostBehavior::ContractMissing);

    let (res, out) = run(&renter, &fixture).await;
    let report = res.unwrap();
    assert_eq!(out, data);
    assert_eq!(renter.removed(), vec![gone]);
    assert_eq!(renter.reads(&gone), 1);
    assert_eq!(report.hosts_pruned, 1);
    assert!(!renter.hosts().contains(&gone));
}

#[tokio::test]
async fn contract_removal_runs_off_the_runtime_thread() {
    let data = random_bytes(5, 2 * SECTOR);
    let fixture = build_fixture(&data, &spec(2, 2, 4)).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    renter.set_behavior(fixture.hosts[1], HostBehavior::ContractMissing);

    let (res, out) = run(&renter, &fixture).await;
    res.unwrap();
    assert_eq!(out, data);
    let threads = renter.removal_threads();
    assert_eq!(threads.len(), 1);
    assert_ne!(threads[0], std::thread::current().id());
}

#[tokio::test]
async fn slow_path_finds_sectors_on_other_hosts() {
    let data = random_bytes(6, 2 * SECTOR - 10);
    let fixture = build_fixture(&data, &spec(2, 1, 3)).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    renter.set_behavior(fixture.hosts[0], HostBehavior::Offline);
    renter.set_behavior(fixture.hosts[1], HostBehavior::NotFound);
    let moved = fixture.placement(0, 0);
    let spare = host_key(10);
    renter.add_host(spare);
    renter.put_sector(spare, moved.root, moved.sector.clone());

    let (res, out) = run(&renter, &fixture).await;
    let report = res.unwrap();
    assert_eq!(out, data);
    assert_eq!(report.races, 1);
    assert_eq!(renter.reads(&spare), 1);
}

#[tokio::test]
async fn corrupt_copies_are_never_trusted() {
    let data = random_bytes(7, 2 * SECTOR);
    let fixture = build_fixture(&data, &spec(2, 2, 4)).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    renter.set_behavior(fixture.hosts[0], HostBehavior::Corrupt);

    let recoverer = Recoverer::new(renter.clone(), config());
    let mut out = Vec::new();
    recoverer.recover(&fixture.descriptor, &mut out).await.unwrap();
    assert_eq!(out, data);
    assert!(!recoverer.cache().contains(&fixture.placement(0, 0).root));
    assert_eq!(renter.reads(&fixture.hosts[0]), 1);
}

#[tokio::test]
async fn sub_piece_files_recover_through_parity() {
    let data = random_bytes(8, 3 * SECTOR + 777);
    let spec = FixtureSpec { kind: ErasureKind::ReedSolomonSubPiece, ..spec(3, 2, 5) };
    let fixture = build_fixture(&data, &spec).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    renter.set_behavior(fixture.hosts[0], HostBehavior::NotFound);
    renter.set_behavior(fixture.hosts[2], HostBehavior::Offline);

    let (res, out) = run(&renter, &fixture).await;
    res.unwrap();
    assert_eq!(out, data);
}

#[tokio::test]
async fn unrecoverable_chunk_stops_after_the_last_good_chunk() {
    let data = random_bytes(9, 2 * 2 * SECTOR);
    let fixture = build_fixture(&data, &spec(2, 1, 6)).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    renter.set_behavior(fixture.hosts[4], HostBehavior::NotFound);
    renter.set_behavior(fixture.hosts[5], HostBehavior::NotFound);

    let (res, out) = run(&renter, &fixture).await;
    assert!(matches!(
        res,
        Err(RecoveryError::Unrecoverable { chunk: 1, recovered: 1, required: 2 })
    ));
    assert_eq!(out, data[..2 * SECTOR]);
}

#[tokio::test]
async fn empty_file_writes_nothing() {
    let fixture = build_fixture(&[], &FixtureSpec::default()).unwrap();
    assert_eq!(fixture.descriptor.chunks.len(), 1);
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let (res, out) = run(&renter, &fixture).await;
    assert_eq!(res.unwrap().bytes_written, 0);
    assert!(out.is_empty());
}

#[tokio::test]
async fn no_hosts_is_an_error() {
    let fixture = build_fixture(&[1u8; 100], &FixtureSpec::default()).unwrap();
    let renter = Arc::new(MockRenter::new());
    let (res, out) = run(&renter, &fixture).await;
    assert!(matches!(res, Err(RecoveryError::NoHosts)));
    assert!(out.is_empty());
}

#[tokio::test]
async fn unsupported_cipher_is_reported() {
    let mut fixture = build_fixture(&[1u8; 100], &FixtureSpec::default()).unwrap();
    fixture.descriptor.master_key_type = "threefish".into();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let (res, _) = run(&renter, &fixture).await;
    assert!(matches!(
        res,
        Err(RecoveryError::Cipher(CipherError::UnsupportedCipher(name))) if name == "threefish"
    ));
    assert_eq!(renter.total_reads(), 0);
}

#[tokio::test]
async fn hosts_without_contracts_are_listed_and_skipped() {
    let data = random_bytes(10, 2 * SECTOR);
    let fixture = build_fixture(&data, &spec(2, 2, 4)).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    renter.drop_contract(&fixture.hosts[1]);
    assert_eq!(missing_contracts(renter.as_ref(), &fixture.descriptor), vec![fixture.hosts[1]]);

    let (res, out) = run(&renter, &fixture).await;
    res.unwrap();
    assert_eq!(out, data);
    assert_eq!(renter.reads(&fixture.hosts[1]), 0);
}

#[tokio::test]
async fn progress_counts_chunks_sectors_and_bytes() {
    let data = random_bytes(11, 2 * 2 * SECTOR + 5);
    let fixture = build_fixture(&data, &FixtureSpec::default()).unwrap();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let progress = Progress::new(true);
    let recoverer = Recoverer::new(renter.clone(), config()).with_progress(progress.clone());

    let mut out = Vec::new();
    let report = recoverer.recover(&fixture.descriptor, &mut out).await.unwrap();
    assert_eq!(progress.chunks_done(), 3);
    assert_eq!(progress.bytes(), data.len() as u64);
    assert_eq!(progress.sectors(), report.network_fetches);
}
