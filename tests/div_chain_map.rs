// DivChainMap end-to-end suite.
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Round-trip: insert/search/remove/delete agree on values and counts.
// - Key uniqueness: re-inserting a key updates in place, len is stable.
// - Load-factor bound: the slot count is a schedule prime admitting the
//   element count, growing only when the integer bound is exceeded.
// - Address stability: element slices keep their addresses across growth.
use chain_hashmap::{DivChainMap, LoadBound, MapPolicy};

// Test: one thousand squares under alpha = 1 (bound 1/2^0).
// Assumes: the schedule starts at 1543, the smallest prime >= 1000.
// Verifies: all values retrievable, len == 1000, no growth happened.
#[test]
fn thousand_squares_stay_within_first_prime() {
    let mut map = DivChainMap::new(4, 8, 0, LoadBound::new(1, 0));
    for i in 0u32..1000 {
        let square = u64::from(i) * u64::from(i);
        map.insert(&i.to_le_bytes(), &square.to_le_bytes());
    }
    assert_eq!(map.len(), 1000);
    assert_eq!(map.slot_count(), 1543);
    let elt = map.search(&500u32.to_le_bytes()).expect("present");
    assert_eq!(u64::from_le_bytes(elt.try_into().unwrap()), 250_000);
    for i in 0u32..1000 {
        let elt = map.search(&i.to_le_bytes()).expect("present");
        assert_eq!(
            u64::from_le_bytes(elt.try_into().unwrap()),
            u64::from(i) * u64::from(i)
        );
    }
}

// Test: repeated insertion under one key.
// Assumes: insert on a live key updates the element in place.
// Verifies: the last write wins and len stays 1 throughout.
#[test]
fn repeated_key_keeps_len_one_and_last_value() {
    let mut map = DivChainMap::new(4, 8, 0, LoadBound::new(1, 0));
    let key = 0xdead_beefu32.to_le_bytes();
    for (i, v) in [10u64, 20, 30].into_iter().enumerate() {
        map.insert(&key, &v.to_le_bytes());
        assert_eq!(map.len(), 1, "after write {}", i);
    }
    let elt = map.search(&key).expect("present");
    assert_eq!(u64::from_le_bytes(elt.try_into().unwrap()), 30);
}

// Test: large keys under a caller-supplied reduction.
// Assumes: the policy reduction fully replaces the default fold.
// Verifies: 10k 64-byte keys whose last 8 bytes carry the identity are
// all retrievable despite the reduction's heavy collisions.
#[test]
fn large_keys_with_custom_reduction() {
    struct ByteSum;
    impl MapPolicy for ByteSum {
        fn reduce_key(&self, key: &[u8]) -> usize {
            key.iter().fold(0usize, |acc, &b| acc.wrapping_add(b as usize))
        }
    }

    let mut map = DivChainMap::with_policy(64, 8, 0, LoadBound::new(1, 0), ByteSum);
    let mut key = [0u8; 64];
    for i in 0u64..10_000 {
        key[56..].copy_from_slice(&i.to_le_bytes());
        map.insert(&key, &i.to_le_bytes());
    }
    assert_eq!(map.len(), 10_000);
    assert!(map.slot_count() >= 10_000, "growth kept the bound");
    for i in 0u64..10_000 {
        key[56..].copy_from_slice(&i.to_le_bytes());
        let elt = map.search(&key).expect("present");
        assert_eq!(u64::from_le_bytes(elt.try_into().unwrap()), i);
    }
}

// Test: corner parameters across key sizes 2^0..2^8.
// Assumes: alpha = 1/1024 admits one element at 1543 slots, so a single
// live key never grows the table.
// Verifies: count stays at the first prime; delete empties the map and
// searches miss afterwards.
#[test]
fn single_key_corner_across_key_sizes() {
    for key_pow in 0..=8u32 {
        let key_size = 1usize << key_pow;
        let mut map = DivChainMap::new(key_size, 8, 0, LoadBound::new(1, 10));
        let key = vec![0xa5u8; key_size];
        for v in 0u64..100 {
            map.insert(&key, &v.to_le_bytes());
        }
        assert_eq!(map.len(), 1, "key_size {}", key_size);
        assert_eq!(map.slot_count(), 1543, "key_size {}", key_size);
        let elt = map.search(&key).expect("present");
        assert_eq!(u64::from_le_bytes(elt.try_into().unwrap()), 99);

        assert!(map.delete(&key));
        assert_eq!(map.len(), 0);
        assert!(map.search(&key).is_none());
    }
}

// Test: remove round-trip.
// Assumes: remove moves the element out verbatim without teardown.
// Verifies: out == last inserted value, search misses afterwards.
#[test]
fn remove_roundtrip() {
    let mut map = DivChainMap::new(8, 8, 0, LoadBound::new(1, 0));
    map.insert(&1u64.to_le_bytes(), &11u64.to_le_bytes());
    let mut out = [0u8; 8];
    assert!(map.remove(&1u64.to_le_bytes(), &mut out));
    assert_eq!(u64::from_le_bytes(out), 11);
    assert!(map.search(&1u64.to_le_bytes()).is_none());
    assert_eq!(map.len(), 0);
}

// Test: growth preserves contents and addresses.
// Assumes: growth splices existing nodes instead of reallocating.
// Verifies: every pre-growth element keeps its value and its address
// after the slot count advances through several primes.
#[test]
fn growth_preserves_contents_and_addresses() {
    let mut map = DivChainMap::new(8, 8, 0, LoadBound::new(1, 0));
    let mut addrs = Vec::new();
    for i in 0u64..1000 {
        map.insert(&i.to_le_bytes(), &(i ^ 0xff).to_le_bytes());
    }
    for i in 0u64..1000 {
        addrs.push(map.search(&i.to_le_bytes()).unwrap().as_ptr());
    }
    let before = map.slot_count();
    for i in 1000u64..10_000 {
        map.insert(&i.to_le_bytes(), &(i ^ 0xff).to_le_bytes());
    }
    assert!(map.slot_count() > before, "growth must have happened");
    assert!(map.len() <= map.max_len_bound());
    for (i, &addr) in addrs.iter().enumerate() {
        let elt = map.search(&(i as u64).to_le_bytes()).expect("survives growth");
        assert_eq!(u64::from_le_bytes(elt.try_into().unwrap()), (i as u64) ^ 0xff);
        assert_eq!(elt.as_ptr(), addr, "key {} moved", i);
    }
}
