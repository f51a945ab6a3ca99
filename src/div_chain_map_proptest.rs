#![cfg(test)]

// Property tests for DivChainMap kept inside the crate so they can pair
// custom policies with the table without feature gates.

use crate::bound::LoadBound;
use crate::div_chain_map::DivChainMap;
use crate::policy::MapPolicy;
use proptest::prelude::*;
use std::collections::HashMap;

const KEY_SIZE: usize = 4;
const ELT_SIZE: usize = 8;

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// keys, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, u64),
    Remove(usize),
    Delete(usize),
    Search(usize),
    Mutate(usize, u64),
}

fn arb_scenario() -> impl Strategy<Value = (Vec<[u8; KEY_SIZE]>, Vec<OpI>)> {
    proptest::collection::vec(any::<[u8; KEY_SIZE]>(), 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            (idx.clone(), any::<u64>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            idx.clone().prop_map(OpI::Remove),
            idx.clone().prop_map(OpI::Delete),
            idx.clone().prop_map(OpI::Search),
            (idx.clone(), any::<u64>()).prop_map(|(i, v)| OpI::Mutate(i, v)),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

fn run_state_machine<P: MapPolicy>(
    mut sut: DivChainMap<P>,
    pool: &[[u8; KEY_SIZE]],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<[u8; KEY_SIZE], u64> = HashMap::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                sut.insert(&pool[i], &v.to_le_bytes());
                model.insert(pool[i], v);
            }
            OpI::Remove(i) => {
                let mut out = [0u8; ELT_SIZE];
                let removed = sut.remove(&pool[i], &mut out);
                match model.remove(&pool[i]) {
                    Some(v) => {
                        prop_assert!(removed, "present in model but not removed");
                        prop_assert_eq!(u64::from_le_bytes(out), v);
                    }
                    None => {
                        prop_assert!(!removed, "absent in model but removed");
                        prop_assert_eq!(out, [0u8; ELT_SIZE], "absent remove must not write");
                    }
                }
            }
            OpI::Delete(i) => {
                let deleted = sut.delete(&pool[i]);
                prop_assert_eq!(deleted, model.remove(&pool[i]).is_some());
            }
            OpI::Search(i) => {
                let got = sut.search(&pool[i]).map(|e| u64::from_le_bytes(e.try_into().unwrap()));
                prop_assert_eq!(got, model.get(&pool[i]).copied());
            }
            OpI::Mutate(i, v) => {
                let hit = sut.search_mut(&pool[i]);
                match model.get_mut(&pool[i]) {
                    Some(mv) => {
                        hit.expect("live in model").copy_from_slice(&v.to_le_bytes());
                        *mv = v;
                    }
                    None => prop_assert!(hit.is_none()),
                }
            }
        }

        // Post-conditions after each op: size parity and full search parity
        // over the key pool (duplicates in the pool are harmless).
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        for key in pool {
            let got = sut.search(key).map(|e| u64::from_le_bytes(e.try_into().unwrap()));
            prop_assert_eq!(got, model.get(key).copied());
        }
    }
    Ok(())
}

// Property: state-machine equivalence against std::collections::HashMap,
// with a load bound low enough that growth happens mid-sequence.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut = DivChainMap::new(KEY_SIZE, ELT_SIZE, 0, LoadBound::new(1, 6));
        run_state_machine(sut, &pool, ops)?;
    }
}

// Collision variant: a constant reduction forces every key into one slot,
// stressing chain search, in-chain updates and removal stitching.
#[derive(Clone, Copy, Debug, Default)]
struct OneSlotPolicy;

impl MapPolicy for OneSlotPolicy {
    fn reduce_key(&self, _key: &[u8]) -> usize {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut = DivChainMap::with_policy(KEY_SIZE, ELT_SIZE, 0, LoadBound::new(1, 0), OneSlotPolicy);
        run_state_machine(sut, &pool, ops)?;
    }
}
