//! Triple buffering for single-producer/single-consumer frame handoff
//!
//! Three slots rotate between the roles front (consumer-visible), back
//! (producer-writable) and spare (in transit). The producer publishes by
//! swapping back with spare; the consumer picks up the newest frame by
//! swapping front with spare. Front and back are never the same slot, so the
//! capture thread can run at sensor rate while the render thread refreshes at
//! display rate without either waiting on the other's memory.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Slot bookkeeping shared by both buffer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slots {
    front: usize,
    back: usize,
    spare: usize,
    update_front: bool,
}

impl Slots {
    fn new() -> Self {
        Self {
            front: 0,
            back: 1,
            spare: 2,
            update_front: false,
        }
    }

    /// back <-> spare, mark the front as stale. Returns the new back slot.
    fn rotate_back(&mut self) -> usize {
        std::mem::swap(&mut self.back, &mut self.spare);
        self.update_front = true;
        self.back
    }

    /// front <-> spare if a newer frame is pending. Returns the front slot.
    fn rotate_front(&mut self) -> usize {
        if self.update_front {
            std::mem::swap(&mut self.front, &mut self.spare);
            self.update_front = false;
        }
        self.front
    }
}

/// Non-locking triple buffer, for contexts where exclusion between producer
/// and consumer is guaranteed externally (e.g. both roles behind one lock).
#[derive(Debug)]
pub struct TripleBuffer<T> {
    buffers: [T; 3],
    slots: Slots,
}

impl<T> TripleBuffer<T> {
    /// Takes ownership of the three buffer instances. `buffers[0]` starts as
    /// the front, `buffers[1]` as the back and `buffers[2]` as the spare.
    pub fn new(buffers: [T; 3]) -> Self {
        Self {
            buffers,
            slots: Slots::new(),
        }
    }

    /// Current front buffer. Valid until the next `swap_front_buffer`.
    pub fn front_buffer(&self) -> &T {
        &self.buffers[self.slots.front]
    }

    /// Current back buffer. Valid until the next `swap_back_buffer`.
    pub fn back_buffer(&mut self) -> &mut T {
        &mut self.buffers[self.slots.back]
    }

    /// Producer finished writing: publish the back buffer and get the next
    /// (empty) one.
    pub fn swap_back_buffer(&mut self) -> &mut T {
        let back = self.slots.rotate_back();
        &mut self.buffers[back]
    }

    /// Consumer wants the latest frame. Without a newer frame the unchanged
    /// front buffer is returned again.
    pub fn swap_front_buffer(&mut self) -> &T {
        let front = self.slots.rotate_front();
        &self.buffers[front]
    }

    pub fn has_pending_frame(&self) -> bool {
        self.slots.update_front
    }

    /// Slot indices as (front, back, spare).
    pub fn slots(&self) -> (usize, usize, usize) {
        (self.slots.front, self.slots.back, self.slots.spare)
    }
}

/// Thread-safe triple buffer for a producer and a consumer on independent
/// schedules (capture thread vs render thread).
///
/// Slot rotation happens under a single mutex. Each buffer sits behind its own
/// mutex which is never contended, because no slot is held by both roles at
/// once. The guard returned by any accessor must be dropped before the same
/// role calls its next swap.
pub struct SharedTripleBuffer<T> {
    buffers: [Mutex<T>; 3],
    slots: Mutex<Slots>,
}

impl<T> SharedTripleBuffer<T> {
    pub fn new(buffers: [T; 3]) -> Self {
        let [a, b, c] = buffers;
        Self {
            buffers: [Mutex::new(a), Mutex::new(b), Mutex::new(c)],
            slots: Mutex::new(Slots::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn buffer(&self, slot: usize) -> MutexGuard<'_, T> {
        self.buffers[slot]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn front_buffer(&self) -> MutexGuard<'_, T> {
        let front = self.slots().front;
        self.buffer(front)
    }

    pub fn back_buffer(&self) -> MutexGuard<'_, T> {
        let back = self.slots().back;
        self.buffer(back)
    }

    pub fn swap_back_buffer(&self) -> MutexGuard<'_, T> {
        let back = self.slots().rotate_back();
        self.buffer(back)
    }

    pub fn swap_front_buffer(&self) -> MutexGuard<'_, T> {
        let front = self.slots().rotate_front();
        self.buffer(front)
    }

    pub fn has_pending_frame(&self) -> bool {
        self.slots().update_front
    }

    /// Slot indices as (front, back, spare), read atomically.
    pub fn slot_indices(&self) -> (usize, usize, usize) {
        let slots = self.slots();
        (slots.front, slots.back, slots.spare)
    }
}
