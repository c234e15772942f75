//! Shard codec and reassembly engine working together, no network.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use shardcast_core::fec::{encode, flatten};
use shardcast_core::reassembly::{Partials, ReassemblyError};
use shardcast_core::wire::ShardHeader;

use crate::payload;

fn reassemble(shards: &[Vec<u8>]) -> Result<Partials, ReassemblyError> {
    let mut partials = Partials::new(&shards[0])?;
    for shard in &shards[1..] {
        partials.add_shard(shard)?;
    }
    Ok(partials)
}

#[test]
fn two_segment_message_in_reverse_order() {
    let buf = payload(20_000, 1);
    let segments = encode(&buf, 50).unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].len(), 24);
    assert_eq!(segments[1].len(), 6);

    let mut shards = flatten(segments);
    shards.reverse();
    let partials = reassemble(&shards).unwrap();
    assert!(partials.has_all_data_shards());
    assert_eq!(partials.ratio(), 1.0);
    assert_eq!(partials.decode().unwrap(), buf);
}

#[test]
fn every_parity_shard_lost() {
    let buf = payload(20_000, 2);
    let data_only: Vec<Vec<u8>> = encode(&buf, 50)
        .unwrap()
        .into_iter()
        .flat_map(|segment| {
            let (header, _) = ShardHeader::parse(&segment[0]).unwrap();
            let data = header.required_data_shards();
            segment.into_iter().take(data)
        })
        .collect();
    assert_eq!(data_only.len(), 20);

    let partials = reassemble(&data_only).unwrap();
    assert_eq!(partials.ratio(), 0.0);
    assert_eq!(partials.decode().unwrap(), buf);
}

#[test]
fn random_loss_within_parity_budget() {
    let mut rng = StdRng::seed_from_u64(3);
    for round in 0..20 {
        let buf = payload(50_000, round);
        let segments = encode(&buf, 100).unwrap();
        let mut kept = Vec::new();
        for mut segment in segments {
            let (header, _) = ShardHeader::parse(&segment[0]).unwrap();
            let parity = header.parity_shards();
            segment.shuffle(&mut rng);
            // Lose exactly as many shards as the segment has parity.
            kept.extend(segment.into_iter().skip(parity));
        }
        kept.shuffle(&mut rng);
        let partials = reassemble(&kept).unwrap();
        assert!(partials.has_minimum());
        assert_eq!(partials.decode().unwrap(), buf, "round {round}");
    }
}

#[test]
fn shards_of_another_message_are_refused() {
    let a = flatten(encode(&payload(20_000, 4), 50).unwrap());
    let b = flatten(encode(&payload(20_001, 5), 50).unwrap());
    let mut partials = Partials::new(&a[0]).unwrap();
    assert!(matches!(
        partials.add_shard(&b[1]),
        Err(ReassemblyError::LengthMismatch { expected: 20_000, found: 20_001 })
    ));
    assert_eq!(partials.received_shards(), 1);
}

#[test]
fn three_of_six_shards_is_a_quarter_short() {
    // 4000 bytes at 50%: 4 data + 2 parity.
    let shards = flatten(encode(&payload(4000, 6), 50).unwrap());
    let partials = reassemble(&shards[..3]).unwrap();
    assert_eq!(partials.ratio(), -0.25);
    match partials.decode() {
        Err(ReassemblyError::InsufficientShards { deficit }) => assert_eq!(deficit, 0.25),
        other => panic!("expected InsufficientShards, got {other:?}"),
    }
}
