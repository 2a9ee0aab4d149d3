//! Round-robin scheduler: component F.
//!
//! Grounded on the reference kernel's `thread/thread.c` `schedule()`:
//! a single ready list plus an all-tasks list, both intrusive
//! (`sync::list`); the running task is dequeued when it blocks or when its
//! `ticks` budget (`DEFAULT_TICKS`) is exhausted at a timer tick, and the
//! next ready task (or the idle task, if the ready list is empty) is
//! dispatched via `context_switch`. No priority levels beyond round-robin
//! ordering — the donor's CFS/SMP/affinity machinery (`sched/scheduler.rs`)
//! is replaced outright per the REDESIGN FLAGS note: this is a uniprocessor
//! teaching scheduler, not a general-purpose one.

pub mod task;

use core::ptr::NonNull;

use spin::Mutex;

use crate::sync::list::IntrusiveList;
use task::{Task, TaskPtr, TaskState};

struct SchedulerState {
    ready: IntrusiveList,
    all_tasks: IntrusiveList,
    current: Option<TaskPtr>,
    idle: Option<TaskPtr>,
}

impl SchedulerState {
    const fn new() -> Self {
        Self {
            ready: IntrusiveList::new(),
            all_tasks: IntrusiveList::new(),
            current: None,
            idle: None,
        }
    }
}

static STATE: Mutex<SchedulerState> = Mutex::new(SchedulerState::new());

/// Initialize the scheduler: clears the ready/all-tasks lists. The idle
/// task and the first real task are registered by `spawn`/`spawn_idle`
/// once memory management has handed out their PCB pages.
pub fn init() {
    println!("[SCHED] Initializing scheduler...");
    let mut state = STATE.lock();
    *state = SchedulerState::new();
    println!("[SCHED] Scheduler initialized");
}

/// Register a newly created task as ready to run.
pub fn spawn(task: TaskPtr) {
    unsafe {
        let t = task.as_mut();
        t.state = TaskState::Ready;
    }
    crate::arch::x86_64::without_interrupts(|| {
        let mut state = STATE.lock();
        unsafe {
            state.all_tasks.push_back(task.all_list_link());
            state.ready.push_back(task.queue_link());
        }
    });
}

/// Register the idle task. Never placed on the ready list: it is returned
/// by `pick_next` only when the ready list is empty.
pub fn spawn_idle(task: TaskPtr) {
    crate::arch::x86_64::without_interrupts(|| {
        let mut state = STATE.lock();
        unsafe {
            state.all_tasks.push_back(task.all_list_link());
        }
        state.idle = Some(task);
        if state.current.is_none() {
            state.current = Some(task);
        }
    });
}

/// Returns the task currently assigned as "running" by the scheduler's own
/// bookkeeping (distinct from [`task::current_task_ptr`], which recovers
/// it from `rsp` and is what sync primitives should call).
pub fn current_task_ptr() -> TaskPtr {
    task::current_task_ptr()
}

fn pick_next(state: &mut SchedulerState) -> TaskPtr {
    match state.ready.pop_front() {
        Some(link) => unsafe { TaskPtr::from_queue_link(link) },
        None => state
            .idle
            .expect("idle task must be registered before scheduling"),
    }
}

/// Voluntarily give up the remainder of the current time slice.
pub fn yield_now() {
    crate::arch::x86_64::without_interrupts(|| {
        let mut state = STATE.lock();
        if let Some(current) = state.current {
            if Some(current) != state.idle {
                unsafe { state.ready.push_back(current.queue_link()) };
            }
        }
        switch(&mut state);
    });
}

/// Block the current task with the given state (Blocked/Waiting/Hanging)
/// and dispatch the next ready task. Called by [`crate::sync::semaphore`]
/// while interrupts are already disabled.
pub fn block_current(reason: TaskState) {
    let mut state = STATE.lock();
    if let Some(current) = state.current {
        unsafe { current.as_mut() }.state = reason;
    }
    switch(&mut state);
}

/// Move a blocked task back onto the ready list.
pub fn unblock(task: TaskPtr) {
    unsafe {
        task.as_mut().state = TaskState::Ready;
    }
    crate::arch::x86_64::without_interrupts(|| {
        let mut state = STATE.lock();
        unsafe { state.ready.push_back(task.queue_link()) };
    });
}

/// Timer-tick hook (§4.I): decrements the running task's tick budget and
/// forces a reschedule once it hits zero.
pub fn timer_tick() {
    let mut state = STATE.lock();
    if let Some(current) = state.current {
        if Some(current) == state.idle {
            return;
        }
        let t: &mut Task = unsafe { current.as_mut() };
        if !t.is_valid() {
            panic!("task {} magic corrupted on timer tick", t.pid);
        }
        if t.ticks_elapsed > 0 {
            t.ticks_elapsed -= 1;
        }
        if t.ticks_elapsed == 0 {
            t.ticks_elapsed = t.ticks;
            unsafe { state.ready.push_back(current.queue_link()) };
            switch(&mut state);
        }
    }
}

/// Perform the actual dispatch: pick the next task, update states, and
/// context-switch into it. Must be called with `STATE` held and
/// interrupts disabled.
fn switch(state: &mut SchedulerState) {
    let next = pick_next(state);
    let prev = state.current;
    if prev == Some(next) {
        return;
    }
    unsafe {
        next.as_mut().state = TaskState::Running;
    }
    state.current = Some(next);

    // process_activate: rsp0 must point at the incoming task's own kernel
    // stack so a ring 3 -> ring 0 transition lands on the right PCB page.
    // Page-table base switching, if any, is handled inside context_switch
    // itself (it compares and loads cr3 from the target context).
    crate::arch::x86_64::gdt::set_kernel_stack(unsafe { next.as_ref() }.kernel_stack_top as u64);

    let next_ctx: *const crate::arch::x86_64::context::X86_64Context =
        unsafe { &next.as_ref().context as *const _ };

    match prev {
        Some(p) => {
            let prev_ctx: *mut crate::arch::x86_64::context::X86_64Context =
                unsafe { &mut p.as_mut().context as *mut _ };
            unsafe {
                crate::arch::x86_64::context::context_switch(prev_ctx, next_ctx);
            }
        }
        None => unsafe {
            crate::arch::x86_64::context::load_context(next_ctx);
        },
    }
}

/// Enter the scheduler loop: dispatches into whatever task `spawn_idle`/
/// `spawn` left as `current` and never returns. The caller must have
/// registered the idle task (`spawn_idle`) before calling this, or there
/// is nothing for `current` to hold.
pub fn run() -> ! {
    println!("[SCHED] Entering scheduler main loop");
    let next_ctx: *const crate::arch::x86_64::context::X86_64Context = {
        let state = STATE.lock();
        let current = state
            .current
            .expect("idle task must be registered before sched::run");
        crate::arch::x86_64::gdt::set_kernel_stack(unsafe { current.as_ref() }.kernel_stack_top as u64);
        unsafe { &current.as_ref().context as *const _ }
    };
    unsafe {
        crate::arch::x86_64::context::load_context(next_ctx);
    }
    unreachable!("load_context never returns")
}

/// Iterate live PCBs for diagnostics (`ps`, §4.O).
pub fn for_each_task(mut f: impl FnMut(&Task)) {
    crate::arch::x86_64::without_interrupts(|| {
        let state = STATE.lock();
        for link in state.all_tasks.iter() {
            let task = unsafe { task_from_all_list_link(link) };
            f(unsafe { task.as_ref() });
        }
    });
}

unsafe fn task_from_all_list_link(link: NonNull<crate::sync::list::ListLink>) -> TaskPtr {
    let offset = core::mem::offset_of!(Task, all_list_link);
    let task_ptr = (link.as_ptr() as usize - offset) as *mut Task;
    TaskPtr::new(unsafe { NonNull::new_unchecked(task_ptr) })
}
