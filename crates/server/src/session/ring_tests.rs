// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::transport::ws_msg::ServerMessage;

fn record(seq: u64) -> EventRecord {
    EventRecord {
        seq,
        event: ServerMessage::TurnStart { session_id: "s1".to_owned() },
        timestamp: 1_700_000_000_000 + seq,
    }
}

#[test]
fn push_and_replay() {
    let mut ring = EventRing::new(8);
    for seq in 1..=5 {
        ring.push(record(seq)).unwrap();
    }

    assert_eq!(ring.current_seq(), 5);
    assert_eq!(ring.oldest_seq(), Some(1));

    let tail: Vec<u64> = ring.since(3).iter().map(|r| r.seq).collect();
    assert_eq!(tail, vec![4, 5]);
    assert!(ring.since(5).is_empty());
}

#[test]
fn push_rejects_non_monotonic_seq() {
    let mut ring = EventRing::new(8);
    ring.push(record(1)).unwrap();
    ring.push(record(2)).unwrap();

    let err = ring.push(record(2)).unwrap_err();
    assert_eq!(err, SeqRegression { attempted: 2, current: 2 });
    assert!(ring.push(record(1)).is_err());

    // Ring state unchanged by the rejected pushes.
    assert_eq!(ring.current_seq(), 2);
    assert_eq!(ring.len(), 2);
}

#[test]
fn eviction_is_fifo() {
    let mut ring = EventRing::new(3);
    for seq in 1..=5 {
        ring.push(record(seq)).unwrap();
    }

    assert_eq!(ring.len(), 3);
    assert_eq!(ring.oldest_seq(), Some(3));
    assert_eq!(ring.current_seq(), 5);

    let all: Vec<u64> = ring.since(0).iter().map(|r| r.seq).collect();
    assert_eq!(all, vec![3, 4, 5]);
}

#[test]
fn can_serve_boundaries() {
    let mut ring = EventRing::new(3);
    for seq in 1..=5 {
        ring.push(record(seq)).unwrap();
    }
    // oldest = 3: a client at seq 2 gets 3,4,5 with no gap.
    assert!(ring.can_serve(2));
    assert!(ring.can_serve(4));
    assert!(ring.can_serve(5));
    // A client at seq 1 is missing seq 2 — resync required.
    assert!(!ring.can_serve(1));
    assert!(!ring.can_serve(0));
}

#[test]
fn empty_ring_serves_only_current_clients() {
    let ring = EventRing::new(4);
    assert!(ring.can_serve(0));
    assert!(ring.is_empty());
    assert_eq!(ring.oldest_seq(), None);
    assert!(ring.since(0).is_empty());
}

#[test]
fn seqs_survive_eviction_without_reuse() {
    let mut ring = EventRing::new(2);
    for seq in 1..=10 {
        ring.push(record(seq)).unwrap();
    }
    assert_eq!(ring.current_seq(), 10);
    // Even after heavy eviction, an old seq can never be pushed again.
    assert!(ring.push(record(7)).is_err());
    assert!(ring.push(record(11)).is_ok());
}
