use salvage_core::config::RecoveryConfig;
use salvage_core::health;
use salvage_core::test_utils::{build_fixture, FixtureSpec, HostBehavior, MockRenter};
use std::sync::Arc;

fn config(workers: usize) -> RecoveryConfig {
    RecoveryConfig { sector_size: 4096, workers, ..RecoveryConfig::default() }
}

fn two_chunk_fixture() -> salvage_core::test_utils::Fixture {
    let data: Vec<u8> = (0..2 * 2 * 4096).map(|i| (i * 7 % 256) as u8).collect();
    build_fixture(&data, &FixtureSpec::default()).unwrap()
}

#[tokio::test]
async fn healthy_file_is_recoverable() {
    let fixture = two_chunk_fixture();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let report = health::check(renter, &fixture.descriptor, &config(8)).await.unwrap();

    assert!(report.recoverable);
    assert_eq!(report.chunks.len(), 2);
    for chunk in &report.chunks {
        assert_eq!((chunk.min_pieces, chunk.available_pieces), (2, 3));
    }
    let p = fixture.placement(1, 2);
    assert_eq!(report.chunks[1].pieces[2][0].merkle_root, p.root);
    assert_eq!(report.chunks[1].pieces[2][0].hosts, vec![p.host]);
    assert!(chrono::DateTime::parse_from_rfc3339(&report.checked_utc).is_ok());
}

#[tokio::test]
async fn lost_hosts_make_file_unrecoverable() {
    let fixture = two_chunk_fixture();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    renter.set_behavior(fixture.hosts[1], HostBehavior::NotFound);
    renter.set_behavior(fixture.hosts[2], HostBehavior::Offline);

    let report = health::check(renter, &fixture.descriptor, &config(8)).await.unwrap();
    assert!(!report.recoverable);
    assert!(report.chunks.iter().all(|c| c.available_pieces == 1));
}

#[tokio::test]
async fn copies_on_unclaimed_hosts_are_reported() {
    let fixture = two_chunk_fixture();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let p = fixture.placement(0, 0);
    renter.put_sector(fixture.hosts[1], p.root, p.sector.clone());

    let report = health::check(renter, &fixture.descriptor, &config(8)).await.unwrap();
    let mut expected = vec![fixture.hosts[0], fixture.hosts[1]];
    expected.sort();
    assert_eq!(report.chunks[0].pieces[0][0].hosts, expected);
}

#[tokio::test]
async fn contract_missing_host_is_pruned_during_check() {
    let fixture = two_chunk_fixture();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let gone = fixture.hosts[0];
    renter.set_behavior(gone, HostBehavior::ContractMissing);

    let report = health::check(renter.clone(), &fixture.descriptor, &config(1)).await.unwrap();
    assert_eq!(renter.removed(), vec![gone]);
    assert_eq!(renter.reads(&gone), 1);
    assert!(report.recoverable);
    assert!(report.chunks[0].pieces[0][0].hosts.is_empty());
}

#[tokio::test]
async fn pruning_during_check_does_not_block_the_runtime() {
    let fixture = two_chunk_fixture();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    renter.set_behavior(fixture.hosts[0], HostBehavior::ContractMissing);
    renter.set_behavior(fixture.hosts[1], HostBehavior::ContractMissing);

    health::check(renter.clone(), &fixture.descriptor, &config(4)).await.unwrap();
    let mut removed = renter.removed();
    removed.sort();
    let mut expected = vec![fixture.hosts[0], fixture.hosts[1]];
    expected.sort();
    assert_eq!(removed, expected);
    let runtime = std::thread::current().id();
    assert!(renter.removal_threads().iter().all(|t| *t != runtime));
}

#[tokio::test]
async fn report_uses_camel_case_fields() {
    let fixture = two_chunk_fixture();
    let renter = Arc::new(MockRenter::with_fixture(&fixture));
    let report = health::check(renter, &fixture.descriptor, &config(4)).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert!(json["checkedUtc"].is_string());
    assert_eq!(json["recoverable"], true);
    assert_eq!(json["chunks"][0]["availablePieces"], 3);
    assert_eq!(json["chunks"][0]["minPieces"], 2);
    assert!(json["chunks"][0]["pieces"][0][0]["merkleRoot"].is_string());
}

#[tokio::test]
async fn no_hosts_is_an_error() {
    let fixture = two_chunk_fixture();
    let res = health::check(Arc::new(MockRenter::new()), &fixture.descriptor, &config(4)).await;
    assert!(matches!(res, Err(salvage_core::RecoveryError::NoHosts)));
}
