//! Bounded FIFO between the acceptor and the workers.
//!
//! Two semaphores carry the blocking: `free` starts at the capacity and is
//! taken by the producer before it writes a slot, `occupied` starts at zero
//! and is taken by a consumer before it reads one. The mutex only protects
//! the ring indices.

use crate::{error::QueueClosed, semaphore::Semaphore};
use std::{
    fmt,
    mem,
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard, PoisonError},
};

struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    len: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            len: 0,
            closed: false,
        }
    }

    fn push(&mut self, item: T) -> Result<(), T> {
        if self.closed {
            return Err(item);
        }
        debug_assert!(self.slots[self.tail].is_none());
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.slots.len();
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        let item = self.slots[self.head].take()?;
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        Some(item)
    }

    fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }
}

pub struct WorkQueue<T> {
    ring: Mutex<Ring<T>>,
    free: Semaphore,
    occupied: Semaphore,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            ring: Mutex::new(Ring::new(capacity)),
            free: Semaphore::new(capacity),
            occupied: Semaphore::new(0),
            capacity,
        }
    }

    fn ring(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for a free slot and claims it without filling it yet.
    ///
    /// This is where the producer is held back while all slots are taken.
    /// Dropping the reservation unused hands the slot back.
    pub fn reserve(&self) -> Result<Reservation<'_, T>, QueueClosed<()>> {
        if self.free.acquire() {
            Ok(Reservation { queue: self })
        } else {
            Err(QueueClosed(()))
        }
    }

    /// Blocks until a slot is free, then appends `item` at the tail.
    pub fn enqueue(&self, item: T) -> Result<(), QueueClosed<T>> {
        match self.reserve() {
            Ok(reservation) => reservation.enqueue(item),
            Err(_) => Err(QueueClosed(item)),
        }
    }

    /// Blocks until an item is queued and removes it from the head. Returns
    /// `None` once the queue is closed.
    pub fn dequeue(&self) -> Option<T> {
        if !self.occupied.acquire() {
            return None;
        }
        let item = self.ring().pop();
        if item.is_some() {
            self.free.release();
        }
        item
    }

    /// Rejects all further traffic, wakes every blocked producer and consumer
    /// and hands back whatever was still queued.
    pub fn close(&self) -> Vec<T> {
        let abandoned = {
            let mut ring = self.ring();
            ring.closed = true;
            ring.drain()
        };
        self.free.close();
        self.occupied.close();
        abandoned
    }

    pub fn is_closed(&self) -> bool {
        self.ring().closed
    }

    pub fn len(&self) -> usize {
        self.ring().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring();
        f.debug_struct("WorkQueue")
            .field("capacity", &self.capacity)
            .field("len", &ring.len)
            .field("head", &ring.head)
            .field("tail", &ring.tail)
            .field("closed", &ring.closed)
            .finish()
    }
}

/// A claimed but still empty slot of a [`WorkQueue`].
#[must_use = "dropping a reservation releases the slot"]
pub struct Reservation<'a, T> {
    queue: &'a WorkQueue<T>,
}

impl<T> Reservation<'_, T> {
    pub fn enqueue(self, item: T) -> Result<(), QueueClosed<T>> {
        let queue = self.queue;
        mem::forget(self);
        let pushed = queue.ring().push(item);
        match pushed {
            Ok(()) => {
                queue.occupied.release();
                Ok(())
            }
            Err(item) => Err(QueueClosed(item)),
        }
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        self.queue.free.release();
    }
}

impl<T> fmt::Debug for Reservation<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation").finish_non_exhaustive()
    }
}
