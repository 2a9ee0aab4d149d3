//! Counting semaphore with FIFO waiters, and a reentrant mutex built on a
//! binary semaphore.
//!
//! Grounded on `examples/original_source/S14/thread/sync.{c,h}`: `value` plus
//! a FIFO `waiters` list, `sema_down`/`sema_up` disabling interrupts around
//! the list edit, and a mutex as `{ holder, holder_repeat_nr, sema }`. Ported
//! per §4.E / §9's concurrency-primitives design note: "port semaphores and
//! mutexes as-is... the semantics (FIFO wakeup, reentrant mutex) are what
//! must be preserved," with "disable interrupts" implemented literally via
//! the donor's `arch::x86_64::{enable_interrupts, disable_interrupts}` RAII
//! guard (this is still a uniprocessor kernel).

use core::ptr::NonNull;

use crate::sched::task::TaskPtr;
use crate::sync::list::{IntrusiveList, ListLink};

/// A counting semaphore with FIFO-ordered blocked waiters.
///
/// Invariant (§3): while `value == 0`, any new acquirer appends itself to
/// `waiters` and blocks; `up` pops the head of `waiters`, unblocks it, and
/// increments `value` only if there was no waiter to hand the unit to
/// directly.
pub struct Semaphore {
    value: u8,
    waiters: IntrusiveList,
}

impl Semaphore {
    pub const fn new(initial: u8) -> Self {
        Self {
            value: initial,
            waiters: IntrusiveList::new(),
        }
    }

    pub const fn binary(initial_is_up: bool) -> Self {
        Self::new(initial_is_up as u8)
    }
}

/// Blocks the caller until a unit is available, then consumes it.
///
/// Must be called from a context where blocking is legal (not from an
/// interrupt handler).
///
/// # Safety
/// `sem` must be a semaphore reachable only from code that respects the
/// "interrupts disabled during list edits" discipline (true of every call
/// site in this kernel: all are behind `arch::without_interrupts`).
pub unsafe fn down(sem: &mut Semaphore) {
    crate::arch::x86_64::without_interrupts(|| {
        while sem.value == 0 {
            let current = crate::sched::current_task_ptr();
            let link: NonNull<ListLink> = current.queue_link();
            sem.waiters.push_back(link);
            crate::sched::block_current(crate::sched::task::TaskState::Blocked);
            // on resumption we are unblocked by `up`; re-check the loop
            // condition in case of spurious wakeup (none occur here, but
            // the loop form matches the source's `while` rather than `if`).
        }
        sem.value -= 1;
    });
}

/// Releases one unit, waking the longest-waiting blocked task if any.
///
/// # Safety
/// Same contract as [`down`].
pub unsafe fn up(sem: &mut Semaphore) {
    crate::arch::x86_64::without_interrupts(|| {
        if let Some(link) = sem.waiters.pop_front() {
            let task = TaskPtr::from_queue_link(link);
            crate::sched::unblock(task);
        } else {
            sem.value += 1;
        }
    });
}

/// A reentrant mutex: a binary semaphore plus a holder and a reentry count.
///
/// Invariant (§3/§8): `holder.is_some() <=> sem.value == 0`;
/// `holder_reentry >= 1` whenever held.
pub struct Mutex {
    sem: Semaphore,
    holder: Option<TaskPtr>,
    holder_reentry: u32,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::binary(true),
            holder: None,
            holder_reentry: 0,
        }
    }

    /// Acquires the mutex, blocking if held by another task. Reentrant:
    /// if the current task already holds it, only bumps the counter.
    ///
    /// # Safety
    /// Must be called from thread (non-interrupt) context.
    pub unsafe fn acquire(&mut self) {
        let current = crate::sched::current_task_ptr();
        if self.holder == Some(current) {
            self.holder_reentry += 1;
            return;
        }
        down(&mut self.sem);
        self.holder = Some(current);
        self.holder_reentry = 1;
    }

    /// Releases one level of acquisition. Only actually unlocks the
    /// underlying semaphore when the reentry count returns to zero.
    ///
    /// # Safety
    /// The caller must currently hold the mutex.
    pub unsafe fn release(&mut self) {
        let current = crate::sched::current_task_ptr();
        debug_assert_eq!(self.holder, Some(current), "release by non-holder");
        if self.holder_reentry > 1 {
            self.holder_reentry -= 1;
            return;
        }
        self.holder = None;
        self.holder_reentry = 0;
        up(&mut self.sem);
    }

    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
