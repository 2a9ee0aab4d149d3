//! Bounded single-producer/single-consumer byte ring with blocking
//! put/get (§4.J).
//!
//! Grounded on `examples/original_source/S14/device/io_queue.c`: a fixed
//! circular buffer with one producer slot and one consumer slot, each
//! holding at most one waiting task. `putchar`, when full, blocks on the
//! producer slot and is woken by the next `getchar`; `getchar`, when empty,
//! blocks on the consumer slot and is woken by the next `putchar`. The
//! source's producer path actually waits on `&ioq->consumer` (reusing the
//! consumer slot) -- the corrected pairing is taken here instead (§9 item 6).

use crate::sched::task::TaskPtr;

/// Capacity is `SIZE - 1` usable slots: the donor's `next_pos(head) == tail`
/// full test needs one slot kept empty to disambiguate full from empty.
pub struct IoQueue<const SIZE: usize> {
    buf: [u8; SIZE],
    head: usize,
    tail: usize,
    producer: Option<TaskPtr>,
    consumer: Option<TaskPtr>,
}

impl<const SIZE: usize> IoQueue<SIZE> {
    pub const fn new() -> Self {
        Self {
            buf: [0; SIZE],
            head: 0,
            tail: 0,
            producer: None,
            consumer: None,
        }
    }

    fn next_pos(pos: usize) -> usize {
        (pos + 1) % SIZE
    }

    pub fn is_full(&self) -> bool {
        Self::next_pos(self.head) == self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Push a byte, blocking the caller while the queue is full.
    ///
    /// # Safety
    /// Must be called from thread context with interrupts enabled at entry;
    /// the wait loop disables them only around the queue edit itself.
    pub unsafe fn putchar(&mut self, ch: u8) {
        crate::arch::x86_64::without_interrupts(|| {
            while self.is_full() {
                self.producer = Some(crate::sched::current_task_ptr());
                crate::sched::block_current(crate::sched::task::TaskState::Blocked);
            }
            self.buf[self.head] = ch;
            self.head = Self::next_pos(self.head);
            if let Some(waiter) = self.consumer.take() {
                crate::sched::unblock(waiter);
            }
        });
    }

    /// Push a byte from interrupt context (the keyboard ISR, the sole
    /// producer). Silently drops the byte if the queue is full rather than
    /// blocking, since an ISR cannot block.
    pub fn putchar_from_irq(&mut self, ch: u8) {
        if self.is_full() {
            return;
        }
        self.buf[self.head] = ch;
        self.head = Self::next_pos(self.head);
        if let Some(waiter) = self.consumer.take() {
            crate::sched::unblock(waiter);
        }
    }

    /// Pop a byte, blocking the caller while the queue is empty.
    ///
    /// # Safety
    /// Must be called from thread context (not from an interrupt handler).
    pub unsafe fn getchar(&mut self) -> u8 {
        crate::arch::x86_64::without_interrupts(|| {
            while self.is_empty() {
                self.consumer = Some(crate::sched::current_task_ptr());
                crate::sched::block_current(crate::sched::task::TaskState::Blocked);
            }
            let ch = self.buf[self.tail];
            self.tail = Self::next_pos(self.tail);
            if let Some(waiter) = self.producer.take() {
                crate::sched::unblock(waiter);
            }
            ch
        })
    }

    /// Non-blocking pop, for callers that must not suspend (e.g. polling
    /// loops before the scheduler is fully up). Returns `None` if empty.
    pub fn try_getchar(&mut self) -> Option<u8> {
        crate::arch::x86_64::without_interrupts(|| {
            if self.is_empty() {
                return None;
            }
            let ch = self.buf[self.tail];
            self.tail = Self::next_pos(self.tail);
            if let Some(waiter) = self.producer.take() {
                crate::sched::unblock(waiter);
            }
            Some(ch)
        })
    }
}

impl<const SIZE: usize> Default for IoQueue<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: all access goes through `without_interrupts`, matching the
// donor's own "disable interrupts around the queue edit" discipline on
// this uniprocessor kernel.
unsafe impl<const SIZE: usize> Send for IoQueue<SIZE> {}
unsafe impl<const SIZE: usize> Sync for IoQueue<SIZE> {}
