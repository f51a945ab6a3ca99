//! DivChainMap: a byte-keyed chaining hash map sized by the prime schedule.
//!
//! Keys and elements are fixed-size byte blocks copied into address-stable
//! chain nodes. Slots are indexed by `reduce_key(key) % count` where
//! `count` walks the prime schedule; when an insert pushes the element
//! count past the integer load-factor bound, the table grows by splicing
//! the existing nodes into a fresh slot array. Because growth never
//! reallocates a node, byte slices handed out by [`search`] stay valid
//! across growth until their key is removed or the map is dropped.
//!
//! [`search`]: DivChainMap::search

use core::mem;
use core::ptr::NonNull;

use crate::bound::LoadBound;
use crate::chain::{Chain, ChainHead, ChainNode};
use crate::policy::{BytesPolicy, MapPolicy};
use crate::primes::PrimeSchedule;

pub struct DivChainMap<P: MapPolicy = BytesPolicy> {
    chain: Chain,
    schedule: PrimeSchedule,
    count: usize,
    num_elts: usize,
    max_num_elts: usize,
    bound: LoadBound,
    slots: Box<[ChainHead]>,
    policy: P,
}

// SAFETY: the map owns every node reachable from its slots; nodes are
// reached through no other path. `&self` methods only read.
unsafe impl<P: MapPolicy + Send> Send for DivChainMap<P> {}
unsafe impl<P: MapPolicy + Sync> Sync for DivChainMap<P> {}

impl DivChainMap<BytesPolicy> {
    /// A map for `key_size`-byte keys and `elt_size`-byte elements under
    /// the default byte policy. The slot count starts at the first
    /// schedule prime whose load bound admits `min_num` elements (or the
    /// last representable prime if none does).
    pub fn new(key_size: usize, elt_size: usize, min_num: usize, bound: LoadBound) -> Self {
        DivChainMap::with_policy(key_size, elt_size, min_num, bound, BytesPolicy)
    }
}

impl<P: MapPolicy> DivChainMap<P> {
    pub fn with_policy(
        key_size: usize,
        elt_size: usize,
        min_num: usize,
        bound: LoadBound,
        policy: P,
    ) -> Self {
        assert!(key_size > 0, "key size must be positive");
        assert!(elt_size > 0, "element size must be positive");
        let mut schedule = PrimeSchedule::first();
        let mut count = schedule.build();
        let mut max_num_elts = bound.max_elts(count);
        while min_num > max_num_elts && schedule.advance() {
            count = schedule.build();
            max_num_elts = bound.max_elts(count);
        }
        DivChainMap {
            chain: Chain::new(key_size, elt_size),
            schedule,
            count,
            num_elts: 0,
            max_num_elts,
            bound,
            slots: empty_slots(count),
            policy,
        }
    }

    /// Aligns the element area of every node created from now on. Must be
    /// called before the first insert.
    pub fn align_elt(&mut self, alignment: usize) {
        assert_eq!(self.num_elts, 0, "element alignment must be set before any insert");
        // SAFETY: no node exists yet, so no block of the previous layout
        // can outlive the change.
        unsafe { self.chain.align_elt(alignment) };
    }

    pub fn len(&self) -> usize {
        self.num_elts
    }

    pub fn is_empty(&self) -> bool {
        self.num_elts == 0
    }

    /// Current number of slots; a schedule prime.
    pub fn slot_count(&self) -> usize {
        self.count
    }

    /// Elements admitted before the next insert attempts a grow. Saturated
    /// at `usize::MAX` once the schedule is exhausted on this host.
    pub fn max_len_bound(&self) -> usize {
        self.max_num_elts
    }

    pub fn key_size(&self) -> usize {
        self.chain.key_size()
    }

    pub fn elt_size(&self) -> usize {
        self.chain.elt_size()
    }

    /// Maps the key, then updates the element in place if the key is live
    /// (tearing the old element down first) or chains a new node. A
    /// non-update insert that exceeds the load bound grows the table
    /// unless the schedule is exhausted.
    pub fn insert(&mut self, key: &[u8], elt: &[u8]) {
        assert_eq!(key.len(), self.chain.key_size(), "key length must equal key_size");
        assert_eq!(elt.len(), self.chain.elt_size(), "element length must equal elt_size");
        let ix = self.slot_ix(key);
        // SAFETY: slot heads are populated by this chain only.
        let found = unsafe {
            self.chain
                .search_key_with(&self.slots[ix], key, |a, b| self.policy.eq_key(a, b))
        };
        match found {
            Some(node) => unsafe {
                self.policy.drop_elt(self.chain.elt_slice_mut(node));
                self.chain.elt_slice_mut(node).copy_from_slice(elt);
            },
            None => {
                unsafe { self.chain.prepend_new(&mut self.slots[ix], key, elt) };
                self.num_elts += 1;
                if self.num_elts > self.max_num_elts && !self.schedule.is_exhausted() {
                    self.grow();
                }
            }
        }
    }

    /// Borrowed view of the element stored under `key`. The slice stays
    /// valid across later growth; removing the key or dropping the map
    /// requires `&mut self` and thus ends the borrow first.
    pub fn search(&self, key: &[u8]) -> Option<&[u8]> {
        let node = self.find_node(key)?;
        // SAFETY: the node is live and cannot be deleted while `&self` is
        // borrowed.
        Some(unsafe { self.chain.elt_slice(node) })
    }

    /// Mutable view of the element stored under `key`.
    pub fn search_mut(&mut self, key: &[u8]) -> Option<&mut [u8]> {
        let node = self.find_node(key)?;
        // SAFETY: exclusive access through `&mut self`.
        Some(unsafe { self.chain.elt_slice_mut(node) })
    }

    /// Moves the element stored under `key` into `elt_out` and frees the
    /// node without element teardown (the caller now owns whatever the
    /// element bytes refer to). Leaves `elt_out` untouched and returns
    /// `false` when the key is absent.
    pub fn remove(&mut self, key: &[u8], elt_out: &mut [u8]) -> bool {
        assert_eq!(
            elt_out.len(),
            self.chain.elt_size(),
            "output length must equal elt_size"
        );
        let ix = self.slot_ix(key);
        let Some(node) = self.find_node(key) else {
            return false;
        };
        // SAFETY: `node` was just found in the ring behind `slots[ix]`.
        unsafe {
            elt_out.copy_from_slice(self.chain.elt_slice(node));
            self.chain.delete(&mut self.slots[ix], node, None);
        }
        self.num_elts -= 1;
        true
    }

    /// Tears the element under `key` down via the policy and frees the
    /// node. Returns `false` when the key is absent.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let ix = self.slot_ix(key);
        let Some(node) = self.find_node(key) else {
            return false;
        };
        // SAFETY: `node` was just found in the ring behind `slots[ix]`.
        unsafe {
            self.chain.delete(
                &mut self.slots[ix],
                node,
                Some(&mut |e: &mut [u8]| self.policy.drop_elt(e)),
            );
        }
        self.num_elts -= 1;
        true
    }

    fn slot_ix(&self, key: &[u8]) -> usize {
        self.policy.reduce_key(key) % self.count
    }

    fn find_node(&self, key: &[u8]) -> Option<NonNull<ChainNode>> {
        let ix = self.slot_ix(key);
        // SAFETY: slot heads are populated by this chain only.
        unsafe {
            self.chain
                .search_key_with(&self.slots[ix], key, |a, b| self.policy.eq_key(a, b))
        }
    }

    /// Advances the schedule until the load bound readmits `num_elts` or
    /// the schedule is exhausted, then splices every node into a fresh
    /// slot array under the new count. Nodes are never reallocated. When
    /// exhaustion hits mid-way the load factor stays above the bound and
    /// the table keeps operating with whatever count was reached.
    fn grow(&mut self) {
        let prev_count = self.count;
        while self.num_elts > self.max_num_elts && self.advance_count() {}
        if self.count == prev_count {
            return;
        }
        let old = mem::replace(&mut self.slots, empty_slots(self.count));
        for mut head in Vec::from(old) {
            while let Some(node) = head.node() {
                // SAFETY: `node` is live in the ring behind `head`; it is
                // detached before being spliced into its new slot.
                unsafe {
                    self.chain.remove(&mut head, node);
                    let ix = self.policy.reduce_key(self.chain.key_slice(node)) % self.count;
                    self.chain.prepend(&mut self.slots[ix], node);
                }
            }
        }
    }

    fn advance_count(&mut self) -> bool {
        if !self.schedule.advance() {
            return false;
        }
        self.count = self.schedule.build();
        self.max_num_elts = self.bound.max_elts(self.count);
        true
    }
}

impl<P: MapPolicy> Drop for DivChainMap<P> {
    fn drop(&mut self) {
        for head in self.slots.iter_mut() {
            // SAFETY: each head owns its ring; teardown runs once per node.
            unsafe {
                self.chain
                    .free(head, Some(&mut |e: &mut [u8]| self.policy.drop_elt(e)));
            }
        }
    }
}

fn empty_slots(count: usize) -> Box<[ChainHead]> {
    (0..count).map(|_| ChainHead::new()).collect()
}
