// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A reference-counted pool of growable byte buffers.
//!
//! Every slot starts life with its atomic counter at 1. `RefBuffer::ref_slice`
//! bumps it and hands back a `RefSlice`; `RefSlice::slice` clones a sub-range
//! and bumps it again. Dropping either decrements it. A slot whose counter
//! reaches zero isn't freed — it's eligible for reuse, and `BufferPool::acquire`
//! reclaims it by scanning for a slot with enough capacity whose counter it
//! can CAS from 0 to 1. The underlying allocation is only actually freed when
//! the owning session's slab of slots is dropped.

use std::alloc::{self, Layout};
use std::borrow::{Borrow, BorrowMut};
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::ptr::{copy, copy_nonoverlapping, NonNull};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::sync::lock::Mutex;

/// A growable, contiguous byte buffer with separate read/write cursors.
///
/// Adapted from the single-session `Buffer` this crate started from:
/// same grow/compact/mark_read/mark_written contract, but now owned by a
/// pooled, refcounted `Slot` rather than a single `Session` for its whole
/// lifetime.
#[derive(Debug)]
struct RawBuffer {
    ptr: NonNull<u8>,
    cap: usize,
    read_offset: usize,
    write_offset: usize,
    desired_capacity: usize,
}

// SAFETY: `RawBuffer` owns its allocation outright and holds no
// thread-affine state; access is synchronized by the `Mutex` a `Slot`
// wraps it in.
unsafe impl Send for RawBuffer {}

impl RawBuffer {
    fn new(desired_capacity: usize) -> Self {
        let mut buf = RawBuffer {
            ptr: NonNull::dangling(),
            cap: 0,
            read_offset: 0,
            write_offset: 0,
            desired_capacity: desired_capacity.next_power_of_two().max(2),
        };
        buf.grow_to_capacity(buf.desired_capacity);
        buf
    }

    fn reserve(&mut self, capacity: usize) {
        self.grow_to_capacity(self.cap + capacity);
    }

    fn remaining(&self) -> usize {
        self.write_offset - self.read_offset
    }

    fn remaining_mut(&self) -> usize {
        self.cap - self.write_offset
    }

    fn read_ptr(&self) -> *mut u8 {
        // SAFETY: `read_offset <= write_offset <= cap`, maintained by
        // `mark_read`/`mark_written`/`compact`, so this stays within the
        // allocation.
        unsafe { self.ptr.as_ptr().add(self.read_offset) }
    }

    fn write_ptr(&self) -> *mut u8 {
        // SAFETY: see `read_ptr`.
        unsafe { self.ptr.as_ptr().add(self.write_offset) }
    }

    fn mark_read(&mut self, amount: usize) {
        self.read_offset = self.write_offset.min(self.read_offset + amount);
        self.compact();
    }

    fn mark_written(&mut self, amount: usize) {
        self.write_offset = self.cap.min(self.write_offset + amount);
    }

    fn grow_to_capacity(&mut self, capacity: usize) {
        assert!(capacity <= isize::MAX as usize);
        let new_cap = capacity.next_power_of_two().min(isize::MAX as usize);
        if new_cap <= self.cap {
            return;
        }

        let new_layout = Layout::array::<u8>(new_cap).unwrap();
        let new_ptr = if self.cap == 0 {
            // SAFETY: allocation failure is handled below; layout is non-zero-sized.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::array::<u8>(self.cap).unwrap();
            // SAFETY: `self.ptr` was allocated with `old_layout`.
            unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };

        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }

    /// Resets cursors to the front, reusing existing capacity across
    /// check-outs instead of reallocating.
    fn recycle(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;
    }

    fn compact(&mut self) {
        if self.remaining() == 0 {
            self.read_offset = 0;
            self.write_offset = 0;
            return;
        }

        if self.read_offset > self.desired_capacity {
            if self.remaining() < self.read_offset {
                // SAFETY: source and destination ranges don't overlap,
                // since the unread region is smaller than its offset.
                unsafe {
                    copy_nonoverlapping(self.read_ptr(), self.ptr.as_ptr(), self.remaining())
                }
            } else {
                // SAFETY: both ranges are within the allocation.
                unsafe { copy(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            }
            self.write_offset = self.remaining();
            self.read_offset = 0;
        }
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // SAFETY: `self.ptr`/`self.cap` describe exactly this buffer's
            // live allocation; `u8` needs no destructor.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

impl Borrow<[u8]> for RawBuffer {
    fn borrow(&self) -> &[u8] {
        // SAFETY: `[read_offset, write_offset)` is always initialized and
        // in-bounds; no mutable borrow can coexist with this one.
        unsafe { std::slice::from_raw_parts(self.read_ptr(), self.remaining()) }
    }
}

impl BorrowMut<[u8]> for RawBuffer {
    fn borrow_mut(&mut self) -> &mut [u8] {
        // SAFETY: `[write_offset, cap)` is spare capacity owned solely by
        // this buffer.
        unsafe { std::slice::from_raw_parts_mut(self.write_ptr(), self.remaining_mut()) }
    }
}

impl Deref for RawBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.borrow()
    }
}

impl DerefMut for RawBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.borrow_mut()
    }
}

impl Write for RawBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.remaining_mut() < buf.len() {
            self.reserve(buf.len());
        }
        self.deref_mut()[..buf.len()].copy_from_slice(buf);
        self.mark_written(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One pooled allocation. `counter` is the domain-level refcount described
/// at module level: it governs reuse eligibility, not the slot's memory
/// lifetime (that's handled by the `Arc` the pool and every handle share).
#[derive(Debug)]
struct Slot {
    counter: AtomicU32,
    capacity_hint: AtomicUsize,
    buffer: Mutex<RawBuffer>,
}

impl Slot {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Slot {
            counter: AtomicU32::new(1),
            capacity_hint: AtomicUsize::new(capacity),
            buffer: Mutex::new(RawBuffer::new(capacity)),
        })
    }
}

/// A pool of recyclable buffer slots, owned by a `Session` for the
/// lifetime of its connection. Slots are only ever freed when the pool
/// itself is dropped.
#[derive(Debug)]
pub struct BufferPool {
    slots: Mutex<Vec<Arc<Slot>>>,
}

impl BufferPool {
    /// Creates an empty pool.
    pub fn new() -> Arc<Self> {
        Arc::new(BufferPool {
            slots: Mutex::new(Vec::new()),
        })
    }

    /// Acquires a buffer with at least `min_capacity` bytes of capacity.
    ///
    /// Scans existing slots for one whose capacity hint is large enough
    /// and whose counter CASes from 0 (idle) to 1 (claimed); falls back
    /// to allocating a fresh slot and adding it to the pool.
    pub fn acquire(self: &Arc<Self>, min_capacity: usize) -> RefBuffer {
        let snapshot: Vec<Arc<Slot>> = self.slots.lock().clone();
        for slot in &snapshot {
            if slot.capacity_hint.load(Ordering::Relaxed) < min_capacity {
                continue;
            }
            if slot
                .counter
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let mut buf = slot.buffer.lock();
                buf.recycle();
                if buf.remaining_mut() < min_capacity {
                    buf.reserve(min_capacity - buf.remaining_mut());
                    slot.capacity_hint.store(buf.cap, Ordering::Relaxed);
                }
                drop(buf);
                return RefBuffer { slot: slot.clone() };
            }
        }

        let slot = Slot::new(min_capacity);
        self.slots.lock().push(slot.clone());
        RefBuffer { slot }
    }
}

/// The single owning handle produced by [`BufferPool::acquire`]. Not
/// cloneable — further references to its bytes are taken via
/// [`ref_slice`](Self::ref_slice), which bumps the slot's refcount and
/// returns a [`RefSlice`].
#[derive(Debug)]
pub struct RefBuffer {
    slot: Arc<Slot>,
}

impl RefBuffer {
    /// Bytes currently available to read.
    pub fn len(&self) -> usize {
        self.slot.buffer.lock().remaining()
    }

    /// Whether there is nothing left to read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spare writable capacity.
    pub fn remaining_mut(&self) -> usize {
        self.slot.buffer.lock().remaining_mut()
    }

    /// Ensures at least `capacity` additional bytes of write capacity.
    pub fn reserve(&self, capacity: usize) {
        let mut buf = self.slot.buffer.lock();
        buf.reserve(capacity);
        self.slot.capacity_hint.store(buf.cap, Ordering::Relaxed);
    }

    /// Copies `data` into the buffer's write cursor, growing if needed.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut buf = self.slot.buffer.lock();
        let n = buf.write(data).expect("Vec-backed write cannot fail");
        self.slot.capacity_hint.store(buf.cap, Ordering::Relaxed);
        n
    }

    /// Marks `amount` bytes consumed from the front of the readable
    /// region.
    pub fn mark_read(&self, amount: usize) {
        self.slot.buffer.lock().mark_read(amount);
    }

    /// Marks `amount` bytes written at the write cursor (after filling
    /// them in directly via [`with_write_slice`](Self::with_write_slice)).
    pub fn mark_written(&self, amount: usize) {
        self.slot.buffer.lock().mark_written(amount);
    }

    /// Runs `f` with the readable region borrowed out.
    pub fn with_read_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.slot.buffer.lock().borrow())
    }

    /// Runs `f` with the spare write region borrowed out mutably, for
    /// filling directly (e.g. a `recv` completion) instead of copying
    /// through [`write`](Self::write).
    pub fn with_write_slice<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(self.slot.buffer.lock().borrow_mut())
    }

    /// A raw pointer to the spare write region, for handing to a
    /// [`CompletionRing::recv`](crate::ring::CompletionRing::recv) call.
    ///
    /// The caller must not let the buffer grow (via [`write`](Self::write)
    /// or [`reserve`](Self::reserve)) while the matching recv is in
    /// flight — growth may reallocate and invalidate this pointer. The
    /// session/stream model only ever has one read outstanding per
    /// session at a time, which is what keeps this sound in practice.
    pub fn spare_capacity_ptr(&self) -> *mut [u8] {
        let mut buf = self.slot.buffer.lock();
        buf.borrow_mut() as *mut [u8]
    }

    /// Takes a [`RefSlice`] over `[start, start + len)` of the currently
    /// readable region, bumping this buffer's refcount so the bytes stay
    /// reserved until every outstanding slice is dropped.
    pub fn ref_slice(&self, start: usize, len: usize) -> RefSlice {
        assert!(start + len <= self.len(), "RefSlice out of bounds");
        self.slot.counter.fetch_add(1, Ordering::AcqRel);
        RefSlice {
            slot: self.slot.clone(),
            start,
            len,
        }
    }
}

impl Drop for RefBuffer {
    fn drop(&mut self) {
        self.slot.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A view over a byte range of a buffer slot, bumping its refcount for
/// as long as the slice is alive. Cheap to clone (via
/// [`slice`](Self::slice)) without copying the underlying bytes.
#[derive(Debug)]
pub struct RefSlice {
    slot: Arc<Slot>,
    start: usize,
    len: usize,
}

impl RefSlice {
    /// Number of bytes this slice covers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether this slice covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clones a sub-range `[a, b)` of this slice, bumping the slot's
    /// refcount again.
    pub fn slice(&self, a: usize, b: usize) -> RefSlice {
        assert!(a <= b && self.start + b <= self.start + self.len);
        self.slot.counter.fetch_add(1, Ordering::AcqRel);
        RefSlice {
            slot: self.slot.clone(),
            start: self.start + a,
            len: b - a,
        }
    }

    /// Runs `f` with the slice's bytes borrowed out of the underlying
    /// buffer.
    pub fn with_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let buf = self.slot.buffer.lock();
        let full: &[u8] = buf.borrow();
        f(&full[self.start..self.start + self.len])
    }

    /// Copies this slice's bytes into a freshly allocated `Vec`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_slice(|s| s.to_vec())
    }
}

impl Clone for RefSlice {
    fn clone(&self) -> Self {
        self.slot.counter.fetch_add(1, Ordering::AcqRel);
        RefSlice {
            slot: self.slot.clone(),
            start: self.start,
            len: self.len,
        }
    }
}

impl Drop for RefSlice {
    fn drop(&mut self) {
        self.slot.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn acquire_then_drop_makes_slot_reusable() {
        let pool = BufferPool::new();
        let buf = pool.acquire(64);
        buf.write(b"hello");
        assert_eq!(5, buf.len());
        drop(buf);

        let buf2 = pool.acquire(64);
        assert_eq!(0, buf2.len());
        assert!(buf2.remaining_mut() >= 64);
        assert_eq!(1, pool.slots.lock().len());
    }

    #[test]
    fn two_live_acquires_use_two_slots() {
        let pool = BufferPool::new();
        let buf1 = pool.acquire(64);
        let buf2 = pool.acquire(64);
        assert_eq!(2, pool.slots.lock().len());
        drop(buf1);
        drop(buf2);
    }

    #[test]
    fn write_then_read_round_trips() {
        let pool = BufferPool::new();
        let buf = pool.acquire(64);
        buf.write(b"hello world");
        buf.with_read_slice(|s| assert_eq!(b"hello world" as &[u8], s));
        buf.mark_read(6);
        buf.with_read_slice(|s| assert_eq!(b"world" as &[u8], s));
    }

    #[test]
    fn ref_slice_keeps_slot_pinned_until_dropped() {
        let pool = BufferPool::new();
        let buf = pool.acquire(64);
        buf.write(b"hello world");
        let slice = buf.ref_slice(0, 5);
        drop(buf);

        // The slot's refcount is still > 0 because `slice` holds a
        // reference, so a fresh acquire must not reuse it.
        let buf2 = pool.acquire(64);
        assert_eq!(2, pool.slots.lock().len());

        assert_eq!(b"hello".to_vec(), slice.to_vec());
        drop(slice);
        drop(buf2);
    }

    #[test]
    fn ref_slice_slice_bumps_refcount_independently() {
        let pool = BufferPool::new();
        let buf = pool.acquire(64);
        buf.write(b"hello world");
        let whole = buf.ref_slice(0, 11);
        let sub = whole.slice(0, 5);
        assert_eq!(b"hello".to_vec(), sub.to_vec());
        drop(whole);
        assert_eq!(b"hello".to_vec(), sub.to_vec());
    }

    #[test]
    fn grows_past_initial_desired_capacity() {
        let pool = BufferPool::new();
        let buf = pool.acquire(4);
        let data = vec![1u8; 1000];
        buf.write(&data);
        assert_eq!(1000, buf.len());
    }
}
