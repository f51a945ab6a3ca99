//! Chain: a circular doubly linked ring of nodes with a movable head cursor.
//!
//! A [`Chain`] is a layout descriptor shared by every ring of one table: it
//! records the key size, the element size and the element alignment, and it
//! performs all node allocation and splicing. The rings themselves are
//! addressed through [`ChainHead`] cursors. An empty head means no ring;
//! a non-empty head points at some node of the ring, and every node of the
//! ring is an equivalent head candidate, so the head doubles as a
//! positional cursor for prepend/append.
//!
//! Each node is one contiguous heap block: the two links, then exactly
//! `key_size` key bytes, then the element area of exactly `elt_size` bytes
//! at the configured alignment. A node keeps its address from the moment it
//! is created until it is removed or the ring is freed; hash tables store
//! node pointers as their index values and rely on this.
//!
//! # Safety
//!
//! The ring operations are `unsafe fn`s with one shared contract: a head
//! must only ever be paired with the `Chain` that populated it, and the
//! nodes reachable from it must be live (not yet deleted or freed). Node
//! arguments must belong to the ring behind the given head. [`ChainHead`]
//! is deliberately neither `Clone` nor `Copy`, so aliased cursors cannot
//! arise in safe code; the contract is then upheld by construction when
//! each head is owned by exactly one table slot.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::slice;
use std::alloc::{alloc, dealloc, handle_alloc_error};

/// Link header of a node; key and element bytes follow in the same block.
#[repr(C)]
pub struct ChainNode {
    prev: NonNull<ChainNode>,
    next: NonNull<ChainNode>,
}

/// Cursor to one ring: empty, or any node of the ring.
pub struct ChainHead(Option<NonNull<ChainNode>>);

impl ChainHead {
    pub fn new() -> ChainHead {
        ChainHead(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// The node the cursor currently rests on, if any.
    pub fn node(&self) -> Option<NonNull<ChainNode>> {
        self.0
    }
}

impl Default for ChainHead {
    fn default() -> ChainHead {
        ChainHead::new()
    }
}

/// Node layout descriptor and allocator for the rings of one table.
#[derive(Clone, Copy, Debug)]
pub struct Chain {
    key_size: usize,
    elt_size: usize,
    elt_align: usize,
    block: Layout,
    key_offset: usize,
    elt_offset: usize,
}

impl Chain {
    /// A descriptor for nodes with `key_size` key bytes and `elt_size`
    /// element bytes at alignment 1.
    pub fn new(key_size: usize, elt_size: usize) -> Chain {
        Chain::with_align(key_size, elt_size, 1)
    }

    pub fn with_align(key_size: usize, elt_size: usize, elt_align: usize) -> Chain {
        let (block, key_offset, elt_offset) = node_layout(key_size, elt_size, elt_align);
        Chain {
            key_size,
            elt_size,
            elt_align,
            block,
            key_offset,
            elt_offset,
        }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn elt_size(&self) -> usize {
        self.elt_size
    }

    pub fn elt_align(&self) -> usize {
        self.elt_align
    }

    /// Re-aligns the element area of subsequently created nodes.
    ///
    /// # Safety
    ///
    /// No node created with the previous layout may still be live: the
    /// block layout changes and a later deallocation would not match.
    pub unsafe fn align_elt(&mut self, alignment: usize) {
        let (block, key_offset, elt_offset) = node_layout(self.key_size, self.elt_size, alignment);
        self.elt_align = alignment;
        self.block = block;
        self.key_offset = key_offset;
        self.elt_offset = elt_offset;
    }

    /// Creates a node holding copies of `key` and `elt` and splices it in
    /// immediately before the current head; the new node becomes the head.
    /// An empty head yields a singleton ring.
    ///
    /// # Safety
    ///
    /// See the module contract: `head` must be paired with this chain.
    pub unsafe fn prepend_new(
        &self,
        head: &mut ChainHead,
        key: &[u8],
        elt: &[u8],
    ) -> NonNull<ChainNode> {
        assert_eq!(key.len(), self.key_size, "key length must equal key_size");
        assert_eq!(elt.len(), self.elt_size, "element length must equal elt_size");
        let node = self.alloc_node(key, elt);
        self.link_before_head(head, node);
        head.0 = Some(node);
        node
    }

    /// As [`prepend_new`](Chain::prepend_new), but the head stays on its
    /// current node; the new node becomes the head's predecessor (the "end"
    /// of the ring as seen from the head).
    ///
    /// # Safety
    ///
    /// See the module contract.
    pub unsafe fn append_new(
        &self,
        head: &mut ChainHead,
        key: &[u8],
        elt: &[u8],
    ) -> NonNull<ChainNode> {
        let node = self.prepend_new(head, key, elt);
        head.0 = Some((*node.as_ptr()).next);
        node
    }

    /// Splices an existing node in before the head and makes it the head.
    ///
    /// # Safety
    ///
    /// `node` must have been created by a chain with this layout and must
    /// not currently be linked into any ring; its links are overwritten.
    pub unsafe fn prepend(&self, head: &mut ChainHead, node: NonNull<ChainNode>) {
        self.link_before_head(head, node);
        head.0 = Some(node);
    }

    /// Splices an existing node in as the head's predecessor.
    ///
    /// # Safety
    ///
    /// As for [`prepend`](Chain::prepend).
    pub unsafe fn append(&self, head: &mut ChainHead, node: NonNull<ChainNode>) {
        self.prepend(head, node);
        head.0 = Some((*node.as_ptr()).next);
    }

    /// Clockwise from the head, the first node whose key bytes equal `key`.
    ///
    /// # Safety
    ///
    /// See the module contract.
    pub unsafe fn search_key(&self, head: &ChainHead, key: &[u8]) -> Option<NonNull<ChainNode>> {
        self.search_key_with(head, key, |a, b| a == b)
    }

    /// Clockwise key search under a caller-supplied equality.
    ///
    /// # Safety
    ///
    /// See the module contract.
    pub unsafe fn search_key_with<F>(
        &self,
        head: &ChainHead,
        key: &[u8],
        eq: F,
    ) -> Option<NonNull<ChainNode>>
    where
        F: Fn(&[u8], &[u8]) -> bool,
    {
        let first = head.0?;
        let mut node = first;
        loop {
            if eq(self.key_slice(node), key) {
                return Some(node);
            }
            node = (*node.as_ptr()).next;
            if node == first {
                return None;
            }
        }
    }

    /// Clockwise from the head, the first node whose element area satisfies
    /// the caller predicate against `elt`.
    ///
    /// # Safety
    ///
    /// See the module contract.
    pub unsafe fn search_elt_with<F>(
        &self,
        head: &ChainHead,
        elt: &[u8],
        eq: F,
    ) -> Option<NonNull<ChainNode>>
    where
        F: Fn(&[u8], &[u8]) -> bool,
    {
        let first = head.0?;
        let mut node = first;
        loop {
            if eq(self.elt_slice(node), elt) {
                return Some(node);
            }
            node = (*node.as_ptr()).next;
            if node == first {
                return None;
            }
        }
    }

    /// Detaches `node` from the ring without deallocating it. If the head
    /// rested on `node` it advances to the next node, or empties if `node`
    /// was the singleton. A no-op on an empty head.
    ///
    /// # Safety
    ///
    /// `node` must belong to the ring behind `head`.
    pub unsafe fn remove(&self, head: &mut ChainHead, node: NonNull<ChainNode>) {
        let Some(h) = head.0 else { return };
        let prev = (*node.as_ptr()).prev;
        let next = (*node.as_ptr()).next;
        if prev == node && next == node {
            head.0 = None;
            return;
        }
        (*next.as_ptr()).prev = prev;
        (*prev.as_ptr()).next = next;
        if h == node {
            head.0 = Some(next);
        }
    }

    /// Removes `node`, runs `free_elt` over its element area if supplied,
    /// and deallocates the block. A no-op on an empty head.
    ///
    /// # Safety
    ///
    /// `node` must belong to the ring behind `head`; it is unusable after
    /// the call.
    pub unsafe fn delete(
        &self,
        head: &mut ChainHead,
        node: NonNull<ChainNode>,
        mut free_elt: Option<&mut dyn FnMut(&mut [u8])>,
    ) {
        if head.is_empty() {
            return;
        }
        self.remove(head, node);
        if let Some(f) = free_elt.as_mut() {
            f(self.elt_slice_mut(node));
        }
        self.dealloc_node(node);
    }

    /// Releases every node of the ring in one pass, running `free_elt` over
    /// each element area if supplied, and empties the head.
    ///
    /// # Safety
    ///
    /// See the module contract; all nodes of the ring are unusable after
    /// the call.
    pub unsafe fn free(&self, head: &mut ChainHead, mut free_elt: Option<&mut dyn FnMut(&mut [u8])>) {
        let Some(first) = head.0 else { return };
        let mut node = first;
        loop {
            let next = (*node.as_ptr()).next;
            if let Some(f) = free_elt.as_mut() {
                f(self.elt_slice_mut(node));
            }
            self.dealloc_node(node);
            node = next;
            if node == first {
                break;
            }
        }
        head.0 = None;
    }

    /// Number of nodes in the ring.
    ///
    /// # Safety
    ///
    /// See the module contract.
    pub unsafe fn len(&self, head: &ChainHead) -> usize {
        let Some(first) = head.0 else { return 0 };
        let mut n = 1;
        let mut node = (*first.as_ptr()).next;
        while node != first {
            n += 1;
            node = (*node.as_ptr()).next;
        }
        n
    }

    /// # Safety
    ///
    /// `node` must be a live node of this chain's layout.
    pub unsafe fn next(&self, node: NonNull<ChainNode>) -> NonNull<ChainNode> {
        (*node.as_ptr()).next
    }

    /// # Safety
    ///
    /// `node` must be a live node of this chain's layout.
    pub unsafe fn prev(&self, node: NonNull<ChainNode>) -> NonNull<ChainNode> {
        (*node.as_ptr()).prev
    }

    /// The `key_size` key bytes of `node`.
    ///
    /// # Safety
    ///
    /// `node` must be a live node of this chain's layout, and must stay
    /// live for `'a`; the caller picks `'a` accordingly.
    pub unsafe fn key_slice<'a>(&self, node: NonNull<ChainNode>) -> &'a [u8] {
        slice::from_raw_parts(self.key_ptr(node), self.key_size)
    }

    /// The `elt_size` element bytes of `node`.
    ///
    /// # Safety
    ///
    /// As for [`key_slice`](Chain::key_slice).
    pub unsafe fn elt_slice<'a>(&self, node: NonNull<ChainNode>) -> &'a [u8] {
        slice::from_raw_parts(self.elt_ptr(node), self.elt_size)
    }

    /// Mutable view of the element bytes of `node`.
    ///
    /// # Safety
    ///
    /// As for [`key_slice`](Chain::key_slice); additionally no other
    /// reference to this element area may be live.
    pub unsafe fn elt_slice_mut<'a>(&self, node: NonNull<ChainNode>) -> &'a mut [u8] {
        slice::from_raw_parts_mut(self.elt_ptr(node), self.elt_size)
    }

    unsafe fn key_ptr(&self, node: NonNull<ChainNode>) -> *mut u8 {
        node.as_ptr().cast::<u8>().add(self.key_offset)
    }

    unsafe fn elt_ptr(&self, node: NonNull<ChainNode>) -> *mut u8 {
        node.as_ptr().cast::<u8>().add(self.elt_offset)
    }

    /// One block for links, key bytes and element bytes; links are set by
    /// the caller's splice.
    fn alloc_node(&self, key: &[u8], elt: &[u8]) -> NonNull<ChainNode> {
        // SAFETY: `block` has non-zero size (it contains the link header).
        unsafe {
            let raw = alloc(self.block);
            let node = match NonNull::new(raw.cast::<ChainNode>()) {
                Some(node) => node,
                None => handle_alloc_error(self.block),
            };
            core::ptr::copy_nonoverlapping(key.as_ptr(), raw.add(self.key_offset), self.key_size);
            core::ptr::copy_nonoverlapping(elt.as_ptr(), raw.add(self.elt_offset), self.elt_size);
            node
        }
    }

    unsafe fn dealloc_node(&self, node: NonNull<ChainNode>) {
        dealloc(node.as_ptr().cast::<u8>(), self.block);
    }

    /// Writes `node`'s links so it sits immediately before the current
    /// head (or forms a singleton); does not move the head.
    unsafe fn link_before_head(&self, head: &ChainHead, node: NonNull<ChainNode>) {
        let n = node.as_ptr();
        match head.0 {
            None => {
                (*n).prev = node;
                (*n).next = node;
            }
            Some(h) => {
                let tail = (*h.as_ptr()).prev;
                (*n).next = h;
                (*n).prev = tail;
                (*tail.as_ptr()).next = node;
                (*h.as_ptr()).prev = node;
            }
        }
    }
}

fn node_layout(key_size: usize, elt_size: usize, elt_align: usize) -> (Layout, usize, usize) {
    let elt =
        Layout::from_size_align(elt_size, elt_align).expect("element alignment must be a power of two");
    let key = Layout::array::<u8>(key_size).expect("key size must fit in a layout");
    let (with_key, key_offset) = Layout::new::<ChainNode>()
        .extend(key)
        .expect("node layout must fit in isize::MAX");
    let (block, elt_offset) = with_key.extend(elt).expect("node layout must fit in isize::MAX");
    (block, key_offset, elt_offset)
}
