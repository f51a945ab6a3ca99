//! StripedChainMap: the concurrent division/chaining map with batched
//! insertion and online growth.
//!
//! The data model is the single-threaded table's, shared behind two lock
//! classes with a fixed order:
//!
//!   - the **rehash lock**, a reader/writer lock: every table-structure-
//!     stable operation (batched insert, search, remove, delete) holds it
//!     in reader mode, a grow holds it in writer mode;
//!   - the **slot-group locks**, `num_locks` cache-padded reader/writer
//!     locks striping the slot array by `slot_ix % num_locks`, held only
//!     around one chain manipulation (shared for lookups, exclusive for
//!     writes).
//!
//! The rehash lock is always acquired before a slot-group lock, at most
//! one slot-group lock is held at a time, and none is held while waiting
//! for the writer upgrade, so the order admits no cycle.
//!
//! A batched insert is the unit of publication: its net element-count
//! change is published under the grow-control mutex once the whole batch
//! is in place, so `len` reaches its post-batch value only when every
//! writer of the batch window has completed. The publisher that pushes the
//! count past the load bound wins the writer role: it raises the pending
//! flag (quiescing threads that have not yet entered), releases its read
//! lock, waits out the remaining readers via the writer upgrade, grows
//! with exclusive access, and signals the condition. Readers therefore
//! never observe a half-rehashed slot array.

use core::cell::UnsafeCell;
use core::mem;
use core::ops::Deref;
use core::slice;

use crossbeam_utils::CachePadded;
use std::sync::{Condvar, Mutex, RwLock, RwLockReadGuard};

use crate::bound::LoadBound;
use crate::chain::{Chain, ChainHead};
use crate::policy::{BytesPolicy, MapPolicy};
use crate::primes::PrimeSchedule;

/// One slot head; touched only under its slot-group lock, or exclusively
/// during a grow or teardown.
struct Slot(UnsafeCell<ChainHead>);

/// Slot array and growth state; structurally mutated only in rehash-writer
/// mode.
struct Core<P> {
    chain: Chain,
    schedule: PrimeSchedule,
    count: usize,
    max_num_elts: usize,
    bound: LoadBound,
    slots: Box<[Slot]>,
    policy: P,
}

/// Element count and the pending-rehash flag, published together.
struct GrowCtl {
    num_elts: usize,
    rehash_pending: bool,
}

pub struct StripedChainMap<P: MapPolicy = BytesPolicy> {
    core: UnsafeCell<Core<P>>,
    /// Rehash lock: readers insert/search/remove, the writer grows.
    gate: RwLock<()>,
    groups: Box<[CachePadded<RwLock<()>>]>,
    ctl: Mutex<GrowCtl>,
    quiesced: Condvar,
}

// SAFETY: the map owns every node reachable from its slots. The slot
// array, count and schedule are only mutated in rehash-writer mode; chain
// heads only under their slot-group lock; `num_elts` only under the
// grow-control mutex. Every access path below follows that discipline.
unsafe impl<P: MapPolicy + Send> Send for StripedChainMap<P> {}
unsafe impl<P: MapPolicy + Sync> Sync for StripedChainMap<P> {}

/// Borrowed view of one element, holding the rehash lock and the slot-group
/// lock in shared mode. Writers to this slot group block while it is held,
/// so drop it promptly.
pub struct EltRef<'a> {
    elt: *const u8,
    len: usize,
    _group: RwLockReadGuard<'a, ()>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl Deref for EltRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the node stays live while the guards pin its slot group:
        // deletes need the group lock in exclusive mode, grows need the
        // rehash lock in writer mode, and growth would not move the bytes
        // anyway.
        unsafe { slice::from_raw_parts(self.elt, self.len) }
    }
}

impl StripedChainMap<BytesPolicy> {
    /// A concurrent map for `key_size`-byte keys and `elt_size`-byte
    /// elements under the default byte policy, with `2^log_num_locks`
    /// slot-group locks.
    pub fn new(
        key_size: usize,
        elt_size: usize,
        min_num: usize,
        bound: LoadBound,
        log_num_locks: u32,
    ) -> Self {
        StripedChainMap::with_policy(key_size, elt_size, min_num, bound, log_num_locks, BytesPolicy)
    }
}

impl<P: MapPolicy> StripedChainMap<P> {
    pub fn with_policy(
        key_size: usize,
        elt_size: usize,
        min_num: usize,
        bound: LoadBound,
        log_num_locks: u32,
        policy: P,
    ) -> Self {
        assert!(key_size > 0, "key size must be positive");
        assert!(elt_size > 0, "element size must be positive");
        assert!(
            log_num_locks < usize::BITS,
            "lock count must be representable"
        );
        let mut schedule = PrimeSchedule::first();
        let mut count = schedule.build();
        let mut max_num_elts = bound.max_elts(count);
        while min_num > max_num_elts && schedule.advance() {
            count = schedule.build();
            max_num_elts = bound.max_elts(count);
        }
        let num_locks = 1usize << log_num_locks;
        StripedChainMap {
            core: UnsafeCell::new(Core {
                chain: Chain::new(key_size, elt_size),
                schedule,
                count,
                max_num_elts,
                bound,
                slots: empty_slots(count),
                policy,
            }),
            gate: RwLock::new(()),
            groups: (0..num_locks).map(|_| CachePadded::new(RwLock::new(()))).collect(),
            ctl: Mutex::new(GrowCtl {
                num_elts: 0,
                rehash_pending: false,
            }),
            quiesced: Condvar::new(),
        }
    }

    /// Aligns the element area of every node created from now on. Must be
    /// called before the first insert; exclusive access makes it safe to
    /// call without the lock protocol.
    pub fn align_elt(&mut self, alignment: usize) {
        let num_elts = self.ctl.get_mut().unwrap().num_elts;
        assert_eq!(num_elts, 0, "element alignment must be set before any insert");
        // SAFETY: no node exists yet.
        unsafe { self.core.get_mut().chain.align_elt(alignment) };
    }

    /// Elements visible to `search`; a batch's net change appears at once.
    pub fn len(&self) -> usize {
        self.ctl.lock().unwrap().num_elts
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current number of slots; a schedule prime.
    pub fn slot_count(&self) -> usize {
        let _gate = self.read_gate();
        // SAFETY: stable while the rehash lock is held in reader mode.
        unsafe { (*self.core.get()).count }
    }

    /// Elements admitted before a batch triggers a grow. Saturated at
    /// `usize::MAX` once the schedule is exhausted on this host.
    pub fn max_len_bound(&self) -> usize {
        let _gate = self.read_gate();
        // SAFETY: stable while the rehash lock is held in reader mode.
        unsafe { (*self.core.get()).max_num_elts }
    }

    pub fn num_locks(&self) -> usize {
        self.groups.len()
    }

    pub fn key_size(&self) -> usize {
        // SAFETY: the chain layout is immutable after construction.
        unsafe { (*self.core.get()).chain.key_size() }
    }

    pub fn elt_size(&self) -> usize {
        // SAFETY: as for `key_size`.
        unsafe { (*self.core.get()).chain.elt_size() }
    }

    /// Inserts one pair; a batch of one.
    pub fn insert(&self, key: &[u8], elt: &[u8]) {
        self.insert_batch(key, elt)
    }

    /// Inserts a contiguous run of `keys.len() / key_size` pairs in input
    /// order; the last write of a repeated key within the run wins. After
    /// the call returns, every pair of the run is visible to searches from
    /// any thread.
    pub fn insert_batch(&self, keys: &[u8], elts: &[u8]) {
        let gate = self.read_gate();
        // SAFETY: slot array, count and schedule are stable while the
        // rehash lock is held in reader mode; heads are only touched under
        // their slot-group lock below.
        let core = unsafe { &*self.core.get() };
        let key_size = core.chain.key_size();
        let elt_size = core.chain.elt_size();
        assert_eq!(keys.len() % key_size, 0, "keys must be whole key blocks");
        assert_eq!(elts.len() % elt_size, 0, "elements must be whole element blocks");
        assert_eq!(
            keys.len() / key_size,
            elts.len() / elt_size,
            "keys and elements must pair up"
        );

        let mut added = 0usize;
        for (key, elt) in keys.chunks_exact(key_size).zip(elts.chunks_exact(elt_size)) {
            let ix = core.slot_ix(key);
            let _group = self.groups[ix % self.groups.len()].write().unwrap();
            // SAFETY: this head is touched only under its group lock.
            let head = unsafe { &mut *core.slots[ix].0.get() };
            let found = unsafe {
                core.chain
                    .search_key_with(head, key, |a, b| core.policy.eq_key(a, b))
            };
            match found {
                Some(node) => unsafe {
                    core.policy.drop_elt(core.chain.elt_slice_mut(node));
                    core.chain.elt_slice_mut(node).copy_from_slice(elt);
                },
                None => {
                    unsafe { core.chain.prepend_new(head, key, elt) };
                    added += 1;
                }
            }
        }

        // Publish the net change; the publisher that crosses the bound
        // wins the rehash writer role.
        let wins = {
            let mut ctl = self.ctl.lock().unwrap();
            ctl.num_elts += added;
            if ctl.num_elts > core.max_num_elts
                && !core.schedule.is_exhausted()
                && !ctl.rehash_pending
            {
                ctl.rehash_pending = true;
                true
            } else {
                false
            }
        };
        drop(gate);
        if wins {
            self.grow();
        }
    }

    /// Guarded view of the element stored under `key`; `None` when absent.
    pub fn search(&self, key: &[u8]) -> Option<EltRef<'_>> {
        let gate = self.read_gate();
        // SAFETY: as in `insert_batch`.
        let core = unsafe { &*self.core.get() };
        let ix = core.slot_ix(key);
        let group = self.groups[ix % self.groups.len()].read().unwrap();
        // SAFETY: shared view under the group lock; writers are excluded.
        let head = unsafe { &*core.slots[ix].0.get() };
        let node = unsafe {
            core.chain
                .search_key_with(head, key, |a, b| core.policy.eq_key(a, b))
        }?;
        Some(EltRef {
            // SAFETY: `node` is live; the guards below keep it so.
            elt: unsafe { core.chain.elt_slice(node) }.as_ptr(),
            len: core.chain.elt_size(),
            _group: group,
            _gate: gate,
        })
    }

    /// Moves the element stored under `key` into `elt_out` and frees the
    /// node without element teardown. Leaves `elt_out` untouched and
    /// returns `false` when the key is absent.
    pub fn remove(&self, key: &[u8], elt_out: &mut [u8]) -> bool {
        let _gate = self.read_gate();
        // SAFETY: as in `insert_batch`.
        let core = unsafe { &*self.core.get() };
        assert_eq!(
            elt_out.len(),
            core.chain.elt_size(),
            "output length must equal elt_size"
        );
        let ix = core.slot_ix(key);
        let removed = {
            let _group = self.groups[ix % self.groups.len()].write().unwrap();
            // SAFETY: exclusive head access under the group lock.
            let head = unsafe { &mut *core.slots[ix].0.get() };
            let found = unsafe {
                core.chain
                    .search_key_with(head, key, |a, b| core.policy.eq_key(a, b))
            };
            match found {
                Some(node) => unsafe {
                    elt_out.copy_from_slice(core.chain.elt_slice(node));
                    core.chain.delete(head, node, None);
                    true
                },
                None => false,
            }
        };
        if removed {
            self.ctl.lock().unwrap().num_elts -= 1;
        }
        removed
    }

    /// Tears the element under `key` down via the policy and frees the
    /// node. Returns `false` when the key is absent.
    pub fn delete(&self, key: &[u8]) -> bool {
        let _gate = self.read_gate();
        // SAFETY: as in `insert_batch`.
        let core = unsafe { &*self.core.get() };
        let ix = core.slot_ix(key);
        let removed = {
            let _group = self.groups[ix % self.groups.len()].write().unwrap();
            // SAFETY: exclusive head access under the group lock.
            let head = unsafe { &mut *core.slots[ix].0.get() };
            let found = unsafe {
                core.chain
                    .search_key_with(head, key, |a, b| core.policy.eq_key(a, b))
            };
            match found {
                Some(node) => unsafe {
                    core.chain
                        .delete(head, node, Some(&mut |e: &mut [u8]| core.policy.drop_elt(e)));
                    true
                },
                None => false,
            }
        };
        if removed {
            self.ctl.lock().unwrap().num_elts -= 1;
        }
        removed
    }

    /// Waits out a pending rehash, then takes the rehash lock in reader
    /// mode. Never holds the grow-control mutex while acquiring the lock.
    fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        let mut ctl = self.ctl.lock().unwrap();
        while ctl.rehash_pending {
            ctl = self.quiesced.wait(ctl).unwrap();
        }
        drop(ctl);
        self.gate.read().unwrap()
    }

    /// Writer role: upgrade to exclusive access, grow against the count
    /// published so far, then lower the flag and wake the quiesced.
    fn grow(&self) {
        {
            let _writer = self.gate.write().unwrap();
            let num_elts = self.ctl.lock().unwrap().num_elts;
            // SAFETY: the rehash write lock excludes every reader and
            // writer; this thread has exclusive access to the core.
            let core = unsafe { &mut *self.core.get() };
            core.grow(num_elts);
        }
        let mut ctl = self.ctl.lock().unwrap();
        ctl.rehash_pending = false;
        drop(ctl);
        self.quiesced.notify_all();
    }
}

impl<P: MapPolicy> Core<P> {
    fn slot_ix(&self, key: &[u8]) -> usize {
        self.policy.reduce_key(key) % self.count
    }

    /// The single-threaded grow under exclusive access: advance the
    /// schedule until the bound readmits `num_elts` or exhaustion, then
    /// splice every node into a fresh slot array. Nodes never move.
    fn grow(&mut self, num_elts: usize) {
        let prev_count = self.count;
        while num_elts > self.max_num_elts && self.advance_count() {}
        if self.count == prev_count {
            return;
        }
        let old = mem::replace(&mut self.slots, empty_slots(self.count));
        for slot in Vec::from(old) {
            let mut head = slot.0.into_inner();
            while let Some(node) = head.node() {
                // SAFETY: `node` is live in the ring behind `head`; it is
                // detached before being spliced into its new slot.
                unsafe {
                    self.chain.remove(&mut head, node);
                    let ix = self.policy.reduce_key(self.chain.key_slice(node)) % self.count;
                    self.chain.prepend(&mut *self.slots[ix].0.get(), node);
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

impl<P: MapPolicy> Drop for StripedChainMap<P> {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        for slot in core.slots.iter_mut() {
            let head = slot.0.get_mut();
            // SAFETY: exclusive access; teardown runs once per node.
            unsafe {
                core.chain
                    .free(head, Some(&mut |e: &mut [u8]| core.policy.drop_elt(e)));
            }
        }
    }
}

fn empty_slots(count: usize) -> Box<[Slot]> {
    (0..count).map(|_| Slot(UnsafeCell::new(ChainHead::new()))).collect()
}
