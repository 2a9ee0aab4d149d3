//! Process control block (PCB): component F.
//!
//! Grounded on the reference kernel's `struct task_struct`
//! (`thread/thread.h`): the PCB lives at the base of the task's own kernel
//! stack page, so the currently running task is recovered by masking the
//! stack pointer down to the page boundary (`running_thread()` there,
//! [`current_task_ptr`] here) rather than through a separate "current task"
//! register. `status`, `priority`, the per-task fd table, `ready_link` /
//! `all_list_link`, and the page-table root pointer are carried over
//! one-for-one; the CFS/NUMA-oriented fields of the donor's `Task`
//! (`sched/task.rs`: `vruntime`, `cpu_affinity`, `TaskStats`) are dropped —
//! this scheduler is round-robin, not CFS (§4.F, REDESIGN FLAGS).

use core::ptr::NonNull;

use crate::mm::pool::PAGE_SIZE;
use crate::sync::list::ListLink;

/// PCB + kernel stack occupy exactly one page, matching the donor's layout
/// assumption that `rsp & !(PAGE_SIZE - 1)` always lands on the page's PCB
/// header.
pub const TASK_STRUCT_PAGE_SIZE: usize = PAGE_SIZE;

/// Canary written at PCB creation and checked on every scheduling decision;
/// a mismatch means kernel-stack overflow smashed the PCB header.
pub const TASK_MAGIC: u32 = 0x5441_534B; // "TASK"

pub const MAX_OPEN_FILES: usize = 8;
pub const MAX_PRIORITY: u8 = 31;
pub const DEFAULT_PRIORITY: u8 = 16;
pub const DEFAULT_TICKS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ready,
    Blocked,
    Waiting,
    Hanging,
    Died,
}

pub type Pid = u32;

/// A file-descriptor table slot: an index into the global open-file table,
/// or empty.
pub type FdSlot = Option<u32>;

#[repr(C)]
pub struct Task {
    pub magic: u32,
    pub pid: Pid,
    pub parent_pid: Option<Pid>,
    pub name: [u8; 16],
    pub state: TaskState,
    pub priority: u8,
    pub ticks: u32,
    pub ticks_elapsed: u32,
    pub fd_table: [FdSlot; MAX_OPEN_FILES],
    pub page_table_root: Option<u64>,
    pub user_vaddr_pool: Option<crate::mm::pool::Pool<'static>>,
    pub cwd_inode: Option<u32>,
    pub exit_code: Option<i32>,
    /// Membership in the scheduler's ready list, or a semaphore's waiter
    /// list. A task is on at most one of these at a time.
    pub queue_link: ListLink,
    /// Membership in the scheduler's all-tasks list; linked for the whole
    /// lifetime of the task.
    pub all_list_link: ListLink,
    pub context: crate::arch::x86_64::context::X86_64Context,
    pub kernel_stack_top: usize,
}

impl Task {
    pub fn is_valid(&self) -> bool {
        self.magic == TASK_MAGIC
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(16);
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    /// The trap frame built at the top of this task's PCB page: the
    /// location both [`Task::create_user`]'s first dispatch and every
    /// later syscall/interrupt return converge on (§4.F, §4.G, §4.N).
    pub fn trap_frame_ptr(&self) -> *mut crate::arch::x86_64::usermode::TrapFrame {
        (self.kernel_stack_top - core::mem::size_of::<crate::arch::x86_64::usermode::TrapFrame>())
            as *mut crate::arch::x86_64::usermode::TrapFrame
    }
}

/// A non-owning handle to a [`Task`] allocated as a PCB page. Equality is
/// by identity (pointer value), matching the donor's `TaskPtr`.
#[derive(Clone, Copy)]
pub struct TaskPtr(NonNull<Task>);

impl PartialEq for TaskPtr {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for TaskPtr {}

impl TaskPtr {
    pub fn new(ptr: NonNull<Task>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(&self) -> *mut Task {
        self.0.as_ptr()
    }

    /// # Safety
    /// The handle must outlive this borrow and no other mutable alias may
    /// exist concurrently (enforced by disabling interrupts around
    /// scheduler/sync critical sections).
    pub unsafe fn as_ref<'a>(&self) -> &'a Task {
        unsafe { self.0.as_ref() }
    }

    /// # Safety
    /// Same contract as [`as_ref`](Self::as_ref).
    pub unsafe fn as_mut<'a>(&self) -> &'a mut Task {
        unsafe { &mut *self.0.as_ptr() }
    }

    /// Pointer to this task's `queue_link`, for insertion into the ready
    /// list or a semaphore's waiter list.
    pub fn queue_link(&self) -> NonNull<ListLink> {
        unsafe { NonNull::new_unchecked(&mut (*self.0.as_ptr()).queue_link as *mut ListLink) }
    }

    pub fn all_list_link(&self) -> NonNull<ListLink> {
        unsafe { NonNull::new_unchecked(&mut (*self.0.as_ptr()).all_list_link as *mut ListLink) }
    }

    /// Recover the owning `TaskPtr` from a `queue_link` pointer obtained
    /// from an [`crate::sync::list::IntrusiveList`] (offset-of arithmetic,
    /// since `queue_link` is the list's only payload-bearing field this
    /// kernel threads into a list).
    ///
    /// # Safety
    /// `link` must be the `queue_link` field of a live `Task`.
    pub unsafe fn from_queue_link(link: NonNull<ListLink>) -> Self {
        let offset = core::mem::offset_of!(Task, queue_link);
        let task_ptr = (link.as_ptr() as usize - offset) as *mut Task;
        Self(unsafe { NonNull::new_unchecked(task_ptr) })
    }
}

/// Recover the PCB of the currently executing task by masking `rsp` down
/// to its containing page. Valid only because every kernel stack is
/// exactly one page and the PCB lives at its base (§3).
pub fn current_task_ptr() -> TaskPtr {
    let rsp: u64;
    unsafe {
        core::arch::asm!("mov {}, rsp", out(reg) rsp);
    }
    let page_base = rsp & !((PAGE_SIZE as u64) - 1);
    let ptr = page_base as *mut Task;
    TaskPtr::new(unsafe { NonNull::new_unchecked(ptr) })
}

static NEXT_PID: spin::Mutex<Pid> = spin::Mutex::new(1);

/// Allocate a fresh PID from the monotonic counter (§4.F, "PID from a
/// monotonic counter under `pid_lock`").
pub fn next_pid() -> Pid {
    let mut guard = NEXT_PID.lock();
    let pid = *guard;
    *guard += 1;
    pid
}

/// Entry point every new kernel task's saved context returns into
/// (§4.F: "a context frame whose return address is a kernel trampoline
/// that enables interrupts and then calls `body(arg)`"). `body` and `arg`
/// arrive in `rdi`/`rsi` because both [`crate::arch::x86_64::context::context_switch`]
/// and [`crate::arch::x86_64::context::load_context`] restore those two
/// registers last, matching the System V calling convention's first two
/// integer argument registers.
extern "C" fn kernel_task_trampoline(body: extern "C" fn(usize) -> !, arg: usize) -> ! {
    unsafe {
        core::arch::asm!("sti");
    }
    body(arg)
}

/// Allocate and zero the backing storage for a fresh, empty user
/// vaddr bitmap covering [`crate::mm::USER_VADDR_START`]..
/// [`crate::mm::USER_VADDR_END`] (§4.G "User vaddr bitmap"). The backing
/// bytes are drawn from the kernel pool and live as long as the kernel
/// itself, so treating them as `'static` here is sound.
pub fn alloc_user_vaddr_bitmap() -> crate::error::KernelResult<crate::mm::pool::Pool<'static>> {
    use crate::mm::{USER_VADDR_END, USER_VADDR_START};

    let page_count = ((USER_VADDR_END - USER_VADDR_START) / PAGE_SIZE as u64) as usize;
    let bytes = page_count.div_ceil(8);
    let backing_pages = bytes.div_ceil(PAGE_SIZE);
    let backing_addr = crate::mm::alloc_kernel_pages(backing_pages)?;
    let backing: &'static mut [u8] =
        unsafe { core::slice::from_raw_parts_mut(backing_addr as *mut u8, backing_pages * PAGE_SIZE) };
    backing.fill(0);
    Ok(crate::mm::pool::Pool::new(
        USER_VADDR_START as usize,
        page_count,
        backing,
    ))
}

impl Task {
    /// Build a PCB for a new kernel task (§4.F "Thread creation"): a fresh
    /// PCB page, zeroed, with `state=Ready`, the default priority/ticks,
    /// the standard fd table `{0,1,2,-1,...}`, no parent, and a context
    /// that will dispatch into `kernel_task_trampoline(body, arg)` on
    /// first switch.
    pub fn create_kernel(
        name: &str,
        body: extern "C" fn(usize) -> !,
        arg: usize,
    ) -> crate::error::KernelResult<TaskPtr> {
        let page = crate::mm::alloc_kernel_pages(1)?;
        let kernel_stack_top = page + PAGE_SIZE;

        let mut name_buf = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        let mut context = crate::arch::x86_64::context::X86_64Context::new(
            kernel_task_trampoline as usize,
            kernel_stack_top,
        );
        context.rdi = body as usize as u64;
        context.rsi = arg as u64;
        context.rflags = 0x002;

        let task = Task {
            magic: TASK_MAGIC,
            pid: next_pid(),
            parent_pid: None,
            name: name_buf,
            state: TaskState::Ready,
            priority: DEFAULT_PRIORITY,
            ticks: DEFAULT_TICKS,
            ticks_elapsed: DEFAULT_TICKS,
            fd_table: [Some(0), Some(1), Some(2), None, None, None, None, None],
            page_table_root: None,
            user_vaddr_pool: None,
            cwd_inode: Some(0),
            exit_code: None,
            queue_link: ListLink::new(),
            all_list_link: ListLink::new(),
            context,
            kernel_stack_top,
        };

        let ptr = page as *mut Task;
        unsafe {
            core::ptr::write(ptr, task);
        }
        Ok(TaskPtr::new(unsafe { NonNull::new_unchecked(ptr) }))
    }

    /// Build a PCB for a user process (§4.G "User entry"): same PCB page
    /// layout as [`Task::create_kernel`], but the context is pointed at
    /// [`crate::arch::x86_64::usermode::user_entry_trampoline`] with `rsp`
    /// set to a [`crate::arch::x86_64::usermode::UserTrapFrame`] built at
    /// the top of the page, so the first dispatch `iretq`s straight into
    /// ring 3 at `entry` with `USER_STACK_TOP` as the user `rsp`.
    pub fn create_user(
        name: &str,
        parent_pid: Pid,
        page_table_root: u64,
        entry: u64,
    ) -> crate::error::KernelResult<TaskPtr> {
        use crate::arch::x86_64::usermode::{interrupt_exit_trampoline, TrapFrame, USER_STACK_TOP};

        let page = crate::mm::alloc_kernel_pages(1)?;
        let kernel_stack_top = page + PAGE_SIZE;

        let mut name_buf = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        let trap_frame_addr = kernel_stack_top - core::mem::size_of::<TrapFrame>();
        let trap_frame = trap_frame_addr as *mut TrapFrame;
        unsafe {
            core::ptr::write(trap_frame, TrapFrame::new_entry(entry, USER_STACK_TOP as u64));
        }

        let mut context = crate::arch::x86_64::context::X86_64Context::default();
        context.rip = interrupt_exit_trampoline as usize as u64;
        context.rsp = trap_frame_addr as u64;
        context.rflags = 0x002;
        context.cr3 = page_table_root;

        let vaddr_pool = alloc_user_vaddr_bitmap()?;

        let task = Task {
            magic: TASK_MAGIC,
            pid: next_pid(),
            parent_pid: Some(parent_pid),
            name: name_buf,
            state: TaskState::Ready,
            priority: DEFAULT_PRIORITY,
            ticks: DEFAULT_TICKS,
            ticks_elapsed: DEFAULT_TICKS,
            fd_table: [Some(0), Some(1), Some(2), None, None, None, None, None],
            page_table_root: Some(page_table_root),
            user_vaddr_pool: Some(vaddr_pool),
            cwd_inode: Some(0),
            exit_code: None,
            queue_link: ListLink::new(),
            all_list_link: ListLink::new(),
            context,
            kernel_stack_top,
        };

        let ptr = page as *mut Task;
        unsafe {
            core::ptr::write(ptr, task);
        }
        Ok(TaskPtr::new(unsafe { NonNull::new_unchecked(ptr) }))
    }

    /// Build the idle PCB (§4.F "idle task"): an ordinary kernel task whose
    /// body never returns and never blocks, so [`crate::sched::pick_next`]
    /// always has somewhere to go when the ready list is empty.
    pub fn create_idle() -> crate::error::KernelResult<TaskPtr> {
        Self::create_kernel("idle", idle_task_body, 0)
    }
}

/// Idle task body: halt until the next interrupt, forever. Runs with
/// interrupts enabled (restored by [`kernel_task_trampoline`]), so a timer
/// tick or device IRQ always wakes it back up to let `pick_next` run.
extern "C" fn idle_task_body(_arg: usize) -> ! {
    loop {
        crate::arch::idle();
    }
}
