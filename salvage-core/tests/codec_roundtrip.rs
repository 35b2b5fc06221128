use rand::{rngs::StdRng, seq::SliceRandom, Rng, RngCore, SeedableRng};
use salvage_core::error::ErasureError;
use salvage_core::rs_codec::{ErasureCoder, ErasureKind, SUB_PIECE_SEGMENT};

const KINDS: [ErasureKind; 2] = [ErasureKind::ReedSolomon, ErasureKind::ReedSolomonSubPiece];

fn random_bytes(rng: &mut StdRng, n: usize) -> Vec<u8> {
    let mut v = vec![0u8; n];
    rng.fill_bytes(&mut v);
    v
}

fn keep_only(pieces: &[Vec<u8>], keep: &[usize]) -> Vec<Option<Vec<u8>>> {
    (0..pieces.len()).map(|i| keep.contains(&i).then(|| pieces[i].clone())).collect()
}

fn recover(coder: &ErasureCoder, slots: &mut [Option<Vec<u8>>], n: usize) -> Result<Vec<u8>, ErasureError> {
    let mut out = Vec::new();
    coder.recover(slots, n, &mut out)?;
    Ok(out)
}

#[test]
fn any_data_pieces_subset_recovers_the_chunk() {
    let mut rng = StdRng::seed_from_u64(7);
    let (k, m, piece) = (4, 6, 1024);
    for kind in KINDS {
        let coder = ErasureCoder::new(kind, k, m).unwrap();
        for trial in 0..20 {
            let n = rng.gen_range(1..=k * piece);
            let data = random_bytes(&mut rng, n);
            let pieces = coder.encode(&data, piece).unwrap();
            assert_eq!(pieces.len(), k + m);
            assert!(pieces.iter().all(|p| p.len() == piece));

            let mut order: Vec<usize> = (0..k + m).collect();
            order.shuffle(&mut rng);
            let keep = &order[..k];
            let mut slots = keep_only(&pieces, keep);
            let out = recover(&coder, &mut slots, n).unwrap();
            assert_eq!(out, data, "{kind:?} trial {trial} kept {keep:?}");
        }
    }
}

#[test]
fn parity_alone_recovers_the_chunk() {
    let mut rng = StdRng::seed_from_u64(8);
    for kind in KINDS {
        let coder = ErasureCoder::new(kind, 3, 5).unwrap();
        let data = random_bytes(&mut rng, 3 * 512);
        let pieces = coder.encode(&data, 512).unwrap();
        let mut slots = keep_only(&pieces, &[3, 4, 6]);
        assert_eq!(recover(&coder, &mut slots, data.len()).unwrap(), data, "{kind:?}");
    }
}

#[test]
fn systematic_pieces_are_the_data() {
    let mut rng = StdRng::seed_from_u64(9);
    let coder = ErasureCoder::new(ErasureKind::ReedSolomon, 2, 2).unwrap();
    let data = random_bytes(&mut rng, 2 * 256);
    let pieces = coder.encode(&data, 256).unwrap();
    assert_eq!(pieces[0], data[..256]);
    assert_eq!(pieces[1], data[256..]);

    let sub = ErasureCoder::new(ErasureKind::ReedSolomonSubPiece, 2, 2).unwrap();
    let pieces = sub.encode(&data, 256).unwrap();
    assert_eq!(pieces[0][..SUB_PIECE_SEGMENT], data[..SUB_PIECE_SEGMENT]);
    assert_eq!(pieces[1][..SUB_PIECE_SEGMENT], data[SUB_PIECE_SEGMENT..2 * SUB_PIECE_SEGMENT]);
    assert_eq!(pieces[0][SUB_PIECE_SEGMENT..2 * SUB_PIECE_SEGMENT], data[128..192]);
}

#[test]
fn output_is_truncated_to_requested_length() {
    let mut rng = StdRng::seed_from_u64(10);
    for kind in KINDS {
        let coder = ErasureCoder::new(kind, 2, 1).unwrap();
        let data = random_bytes(&mut rng, 2 * 128);
        let pieces = coder.encode(&data, 128).unwrap();
        for n in [0, 1, 63, 65, 200, 256] {
            let mut slots = keep_only(&pieces, &[1, 2]);
            assert_eq!(recover(&coder, &mut slots, n).unwrap(), data[..n], "{kind:?} n={n}");
        }
    }
}

#[test]
fn no_parity_is_a_plain_split() {
    let mut rng = StdRng::seed_from_u64(12);
    for kind in KINDS {
        let coder = ErasureCoder::new(kind, 3, 0).unwrap();
        let data = random_bytes(&mut rng, 3 * 64 - 5);
        let pieces = coder.encode(&data, 64).unwrap();
        assert_eq!(pieces.len(), 3);
        let mut slots = keep_only(&pieces, &[0, 1, 2]);
        assert_eq!(recover(&coder, &mut slots, data.len()).unwrap(), data);
    }
}

#[test]
fn too_few_pieces_is_rejected() {
    let coder = ErasureCoder::new(ErasureKind::ReedSolomon, 4, 2).unwrap();
    let pieces = coder.encode(&[1u8; 100], 64).unwrap();
    let mut slots = keep_only(&pieces, &[0, 4, 5]);
    assert!(matches!(
        recover(&coder, &mut slots, 100),
        Err(ErasureError::TooFewPieces { have: 3, need: 4 })
    ));
}

#[test]
fn mismatched_pieces_are_rejected() {
    let coder = ErasureCoder::new(ErasureKind::ReedSolomon, 2, 1).unwrap();
    let pieces = coder.encode(&[5u8; 128], 64).unwrap();

    let mut slots = keep_only(&pieces, &[0, 1, 2]);
    if let Some(p) = slots[1].as_mut() {
        p.truncate(32);
    }
    assert!(matches!(recover(&coder, &mut slots, 128), Err(ErasureError::InconsistentPieceLength)));

    let mut short = keep_only(&pieces, &[0, 1]);
    assert!(matches!(
        recover(&coder, &mut short, 129),
        Err(ErasureError::OutputTooLarge { requested: 129, available: 128 })
    ));

    let mut wrong = vec![Some(vec![0u8; 64]); 2];
    assert!(matches!(
        recover(&coder, &mut wrong, 10),
        Err(ErasureError::WrongPieceCount { expected: 3, got: 2 })
    ));
}

#[test]
fn sub_piece_code_needs_whole_segments() {
    let coder = ErasureCoder::new(ErasureKind::ReedSolomonSubPiece, 2, 1).unwrap();
    assert!(matches!(
        coder.encode(&[0u8; 10], 100),
        Err(ErasureError::MisalignedPieceLength { len: 100, segment: 64 })
    ));
    let mut slots = vec![Some(vec![0u8; 100]), Some(vec![0u8; 100]), None];
    assert!(matches!(
        recover(&coder, &mut slots, 10),
        Err(ErasureError::MisalignedPieceLength { .. })
    ));
}

#[test]
fn unknown_tags_and_bad_parameters_are_rejected() {
    assert!(matches!(ErasureKind::from_tag(3), Err(ErasureError::UnsupportedType(3))));
    assert_eq!(ErasureKind::from_tag(2).unwrap(), ErasureKind::ReedSolomonSubPiece);
    assert!(matches!(
        ErasureCoder::new(ErasureKind::ReedSolomon, 0, 3),
        Err(ErasureError::InvalidParameters { data: 0, parity: 3 })
    ));
    assert!(ErasureCoder::new(ErasureKind::ReedSolomon, 200, 100).is_err());
    let coder = ErasureCoder::from_tag(1, 10, 20).unwrap();
    assert_eq!((coder.min_pieces(), coder.num_pieces()), (10, 30));
}
