//! # Task Model
//!
//! Task control blocks, the static TCB pool, task creation and the
//! state-transition helpers that every scheduler and synchronization
//! primitive goes through.
//!
//! ## State machine
//!
//! ```text
//!          ┌────────────────────────────┐
//!          ▼                            │
//!   Ready ── chosen ──► Running ── yield/preempted
//!     ▲                   │
//!     │                   ├─ block (no delay)  ─► Blocked (wait list only)
//!     │                   └─ block (delay = T) ─► Blocked (wait list + delayed)
//!     │                                             │
//!     ├── delay expires / peer wakes ───────────────┘
//!     │
//!     └── resume ◄── Suspended ◄── suspend ── {Ready, Blocked}
//! ```
//!
//! `Deleted` is terminal and currently unreachable: task destruction is
//! unsupported because stacks come from a monotonic arena.
//!
//! ## Memory layout
//!
//! The port's context-switch trap loads and stores the saved stack pointer
//! through a raw TCB pointer, so `stack_pointer` must be the first field;
//! a compile-time assertion pins it at offset 0.

use core::mem::offset_of;

use crate::arch;
use crate::config::{
    self, DEFAULT_STACK_SIZE, ENABLE_STACK_OVERFLOW_CHECK, IDLE_TASK_PRIORITY, MAX_PRIORITIES,
    MAX_TASKS, MIN_STACK_SIZE, STACK_ALIGNMENT, STACK_CANARY, STACK_FILL, TIME_SLICE_TICKS,
};
use crate::error::KernelError;
use crate::kernel::{self, Kernel, KernelState};
use crate::kernel_assert;
use crate::sched::SchedulingPolicy;
use crate::time::Tick;

/// Index of a task in the static TCB pool.
pub(crate) type TaskId = u8;

/// Task priority. Higher values run first; 0 belongs to the idle task.
pub type Priority = u8;

/// Task entry point. The parameter is the opaque pointer captured at
/// creation, handed to the task in its argument-0 register slot.
pub type TaskEntry = extern "C" fn(parameter: *mut ());

/// Opaque task reference returned by [`create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(pub(crate) TaskId);

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in a ready list for the CPU.
    Ready,
    /// Currently executing. Exactly one task is Running at any instant.
    Running,
    /// Waiting on a delay or a synchronization object.
    Blocked,
    /// Removed from scheduling until resumed.
    Suspended,
    /// Terminal state reserved for a future delete operation.
    Deleted,
}

/// Kind of synchronization object a blocked task is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncKind {
    None,
    Mutex,
    Semaphore,
    Queue,
}

// ---------------------------------------------------------------------------
// Task control block
// ---------------------------------------------------------------------------

/// Per-task record. One per pool slot; a slot is live once `entry` is set.
///
/// Scheduler list membership uses the pool-index links `next`/`prev` (a
/// task is in at most one of the ready or delayed lists at a time);
/// `next_waiting` chains the task into at most one synchronization
/// object's wait list. `blocked_on` names that object so a resumed task
/// can tell a timeout (still enqueued) from a peer wake (pointer cleared).
#[repr(C)]
pub(crate) struct Tcb {
    /// Saved process stack pointer. MUST stay at offset 0: the context
    /// switch trap dereferences the TCB pointer directly.
    pub(crate) stack_pointer: *mut u32,
    pub(crate) stack_base: *mut u32,
    pub(crate) stack_top: *mut u32,
    pub(crate) stack_size: usize,

    pub(crate) task_id: TaskId,
    pub(crate) name: &'static str,

    pub(crate) entry: Option<TaskEntry>,
    pub(crate) parameter: *mut (),

    pub(crate) state: TaskState,
    /// Effective priority; may exceed `base_priority` under inheritance.
    pub(crate) priority: Priority,
    pub(crate) base_priority: Priority,

    /// Absolute wake-up instant; valid only while in the delayed list.
    pub(crate) delay_until: Tick,
    pub(crate) time_slice_remaining: Tick,

    pub(crate) next: Option<TaskId>,
    pub(crate) prev: Option<TaskId>,

    pub(crate) next_waiting: Option<TaskId>,
    pub(crate) blocked_on: *const (),
    pub(crate) blocked_on_kind: SyncKind,
}

const _: () = assert!(offset_of!(Tcb, stack_pointer) == 0);

impl Tcb {
    pub(crate) const fn empty() -> Self {
        Self {
            stack_pointer: core::ptr::null_mut(),
            stack_base: core::ptr::null_mut(),
            stack_top: core::ptr::null_mut(),
            stack_size: 0,
            task_id: 0,
            name: "",
            entry: None,
            parameter: core::ptr::null_mut(),
            state: TaskState::Suspended,
            priority: 0,
            base_priority: 0,
            delay_until: 0,
            time_slice_remaining: 0,
            next: None,
            prev: None,
            next_waiting: None,
            blocked_on: core::ptr::null(),
            blocked_on_kind: SyncKind::None,
        }
    }

    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.entry.is_some()
    }
}

// ---------------------------------------------------------------------------
// TCB pool
// ---------------------------------------------------------------------------

pub(crate) struct TaskTable {
    tcbs: [Tcb; MAX_TASKS],
    count: u8,
}

impl TaskTable {
    pub(crate) const fn new() -> Self {
        const EMPTY: Tcb = Tcb::empty();
        Self {
            tcbs: [EMPTY; MAX_TASKS],
            count: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        for tcb in &mut self.tcbs {
            *tcb = Tcb::empty();
        }
        self.count = 0;
    }

    #[inline]
    pub(crate) fn tcb(&self, id: TaskId) -> &Tcb {
        &self.tcbs[id as usize]
    }

    #[inline]
    pub(crate) fn tcb_mut(&mut self, id: TaskId) -> &mut Tcb {
        &mut self.tcbs[id as usize]
    }

    pub(crate) fn tcb_ptr(&mut self, id: TaskId) -> *mut Tcb {
        &mut self.tcbs[id as usize] as *mut Tcb
    }

    pub(crate) fn count(&self) -> u8 {
        self.count
    }

    /// Find a free slot without claiming it; the slot becomes live when
    /// the caller stores the entry point.
    fn free_slot(&self) -> Option<TaskId> {
        self.tcbs
            .iter()
            .position(|t| !t.is_live())
            .map(|i| i as TaskId)
    }

    /// Iterate the ids of all live tasks.
    pub(crate) fn live_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tcbs
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_live())
            .map(|(i, _)| i as TaskId)
    }
}

// ---------------------------------------------------------------------------
// Creation and lifecycle (kernel-side)
// ---------------------------------------------------------------------------

impl Kernel {
    /// Allocate a TCB slot and a stack, build the initial frame, and make
    /// the task ready. `idle` relaxes the priority floor for the idle
    /// task the kernel creates during init.
    pub(crate) fn create_task(
        &mut self,
        entry: TaskEntry,
        name: &'static str,
        stack_size: usize,
        parameter: *mut (),
        priority: Priority,
        idle: bool,
    ) -> Result<TaskId, KernelError> {
        if priority >= MAX_PRIORITIES {
            return Err(KernelError::InvalidParam);
        }
        if !idle && priority == IDLE_TASK_PRIORITY {
            return Err(KernelError::InvalidParam);
        }

        let mut stack_size = if stack_size == 0 {
            DEFAULT_STACK_SIZE
        } else {
            stack_size.max(MIN_STACK_SIZE)
        };
        stack_size = (stack_size + STACK_ALIGNMENT - 1) & !(STACK_ALIGNMENT - 1);

        let id = self.tasks.free_slot().ok_or(KernelError::NoMemory)?;
        let stack = self
            .arena
            .alloc_aligned(stack_size)
            .ok_or(KernelError::NoMemory)?;

        let stack_base = stack.as_ptr() as *mut u32;
        let stack_top = unsafe { stack.as_ptr().add(stack_size) } as *mut u32;

        unsafe {
            core::ptr::write_bytes(stack.as_ptr(), STACK_FILL, stack_size);
            if ENABLE_STACK_OVERFLOW_CHECK {
                stack_base.write(STACK_CANARY);
            }
        }

        let tcb = self.tasks.tcb_mut(id);
        tcb.stack_base = stack_base;
        tcb.stack_top = stack_top;
        tcb.stack_size = stack_size;
        tcb.task_id = id;
        tcb.name = name;
        tcb.entry = Some(entry);
        tcb.parameter = parameter;
        tcb.state = TaskState::Suspended;
        tcb.priority = priority;
        tcb.base_priority = priority;
        tcb.delay_until = 0;
        tcb.time_slice_remaining = TIME_SLICE_TICKS;
        tcb.next = None;
        tcb.prev = None;
        tcb.next_waiting = None;
        tcb.blocked_on = core::ptr::null();
        tcb.blocked_on_kind = SyncKind::None;

        // Build the initial frame from what the TCB captured.
        let (frame_entry, frame_parameter) = (entry, tcb.parameter);
        tcb.stack_pointer = arch::imp::init_task_stack(stack_top, frame_entry, frame_parameter);

        self.tasks.count += 1;
        self.task_make_ready(id);

        let tcb = self.tasks.tcb(id);
        log::debug!(
            "task '{}' created: id={}, prio={}, stack={}B",
            tcb.name,
            tcb.task_id,
            tcb.priority,
            tcb.stack_size
        );
        Ok(id)
    }

    /// Transition a task to Ready and hand it to the scheduler. If the
    /// kernel is running and the scheduler wants the newcomer on the CPU,
    /// a context switch is pended.
    pub(crate) fn task_make_ready(&mut self, id: TaskId) {
        let tcb = self.tasks.tcb_mut(id);
        kernel_assert!(!matches!(tcb.state, TaskState::Running | TaskState::Deleted));

        tcb.state = TaskState::Ready;
        self.scheduler.ready_insert(&mut self.tasks, id);

        if self.state == KernelState::Running
            && self
                .scheduler
                .should_preempt(&mut self.tasks, self.current, Some(id))
        {
            arch::imp::request_context_switch();
        }
    }

    /// Block a task, optionally parking it in the delayed list.
    ///
    /// `timeout` of [`config::WAIT_FOREVER`] blocks with no wake-up
    /// deadline; any other nonzero value schedules one. Blocking the
    /// running task pends the context switch that will evict it.
    pub(crate) fn task_block(&mut self, id: TaskId, timeout: Tick) {
        let state = self.tasks.tcb(id).state;
        kernel_assert!(matches!(state, TaskState::Running | TaskState::Ready));

        if state == TaskState::Ready {
            self.scheduler.ready_remove(&mut self.tasks, id);
        }
        self.tasks.tcb_mut(id).state = TaskState::Blocked;

        if timeout != config::WAIT_FOREVER && timeout > 0 {
            let wake_at = self.now().wrapping_add(timeout);
            self.scheduler.delayed_insert(&mut self.tasks, id, wake_at);
        }

        if self.current == Some(id) {
            arch::imp::request_context_switch();
        }
    }

    /// Wake a blocked task: drop any delayed-list entry, then make it
    /// ready (which runs the preemption check).
    pub(crate) fn task_unblock(&mut self, id: TaskId) {
        if self.scheduler.delayed_contains(&self.tasks, id) {
            self.scheduler.delayed_remove(&mut self.tasks, id);
        }
        self.task_make_ready(id);
    }

    pub(crate) fn task_suspend(&mut self, id: TaskId) -> Result<(), KernelError> {
        match self.tasks.tcb(id).state {
            TaskState::Ready => {
                self.scheduler.ready_remove(&mut self.tasks, id);
            }
            TaskState::Blocked => {
                if self.scheduler.delayed_contains(&self.tasks, id) {
                    self.scheduler.delayed_remove(&mut self.tasks, id);
                }
                if !self.tasks.tcb(id).blocked_on.is_null() {
                    crate::sync::detach_from_wait_list(self, id);
                }
            }
            _ => return Err(KernelError::InvalidState),
        }
        self.tasks.tcb_mut(id).state = TaskState::Suspended;
        Ok(())
    }

    pub(crate) fn task_resume(&mut self, id: TaskId) -> Result<(), KernelError> {
        if self.tasks.tcb(id).state != TaskState::Suspended {
            return Err(KernelError::InvalidState);
        }
        self.task_make_ready(id);
        Ok(())
    }

    /// Sweep every live task's stack canary. Returns the first task whose
    /// canary no longer matches, or `None` when all stacks are intact (or
    /// checking is compiled out).
    pub(crate) fn first_overflowed_stack(&self) -> Option<TaskId> {
        if !ENABLE_STACK_OVERFLOW_CHECK {
            return None;
        }
        self.tasks.live_ids().find(|&id| {
            let tcb = self.tasks.tcb(id);
            !tcb.stack_base.is_null() && unsafe { tcb.stack_base.read() } != STACK_CANARY
        })
    }

    /// High-water measurement: bytes at the bottom of the task's stack
    /// still carrying the creation-time fill pattern (the canary word
    /// excluded). A small number means the task has come close to
    /// overflowing.
    pub(crate) fn stack_headroom(&self, id: TaskId) -> usize {
        let tcb = self.tasks.tcb(id);
        let mut untouched = 0;
        // Skip the canary word at the very bottom.
        for offset in 4..tcb.stack_size {
            let byte = unsafe { (tcb.stack_base as *const u8).add(offset).read() };
            if byte != STACK_FILL {
                break;
            }
            untouched += 1;
        }
        untouched
    }
}

// ---------------------------------------------------------------------------
// Built-in task bodies
// ---------------------------------------------------------------------------

/// Idle task body: absorb otherwise-unclaimed cycles in the lowest-power
/// state available. Under the cooperative discipline it must also yield
/// explicitly, since nothing else will ever take the CPU from it.
pub(crate) extern "C" fn idle_task_entry(_parameter: *mut ()) {
    loop {
        arch::imp::wait_for_interrupt();
        if matches!(
            config::SCHEDULER_TYPE,
            crate::sched::SchedulerKind::Cooperative
        ) {
            kernel::yield_now();
        }
    }
}

/// Landing pad for a task entry function that returns. Task entries are
/// expected to loop forever; this parks the CPU instead of letting
/// execution fall off the initial frame.
pub(crate) extern "C" fn task_exit_trap() -> ! {
    log::error!("task entry function returned");
    loop {
        arch::imp::wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Create a task and insert it into the ready list.
///
/// `stack_size` of zero selects [`config::DEFAULT_STACK_SIZE`]; smaller
/// requests are raised to [`config::MIN_STACK_SIZE`] and rounded up to the
/// stack alignment. `priority` must lie in `1..config::MAX_PRIORITIES` —
/// priority 0 belongs to the idle task.
pub fn create(
    entry: TaskEntry,
    name: &'static str,
    stack_size: usize,
    parameter: *mut (),
    priority: Priority,
) -> Result<TaskHandle, KernelError> {
    kernel::with_kernel(|k| {
        if k.state == KernelState::Inactive {
            return Err(KernelError::InvalidState);
        }
        k.create_task(entry, name, stack_size, parameter, priority, false)
            .map(TaskHandle)
    })
}

/// Handle of the task currently holding the CPU.
pub fn current() -> Option<TaskHandle> {
    kernel::with_kernel(|k| k.current.map(TaskHandle))
}

/// Current state of a task.
pub fn state(handle: TaskHandle) -> Result<TaskState, KernelError> {
    kernel::with_kernel(|k| {
        let tcb = validate(k, handle)?;
        Ok(tcb.state)
    })
}

/// Current (possibly inherited) priority of a task.
pub fn priority(handle: TaskHandle) -> Result<Priority, KernelError> {
    kernel::with_kernel(|k| {
        let tcb = validate(k, handle)?;
        Ok(tcb.priority)
    })
}

/// Look a task up by its diagnostic name.
pub fn find_by_name(name: &str) -> Option<TaskHandle> {
    kernel::with_kernel(|k| {
        k.tasks
            .live_ids()
            .find(|&id| k.tasks.tcb(id).name == name)
            .map(TaskHandle)
    })
}

/// Number of live tasks, the idle task included.
pub fn count() -> usize {
    kernel::with_kernel(|k| k.tasks.count() as usize)
}

/// Bytes of a task's stack never touched since creation — a high-water
/// diagnostic. Small values mean the task runs close to overflow.
pub fn stack_headroom(handle: TaskHandle) -> Result<usize, KernelError> {
    kernel::with_kernel(|k| {
        validate(k, handle)?;
        Ok(k.stack_headroom(handle.0))
    })
}

/// Remove a Ready or Blocked task from scheduling until [`resume`].
pub fn suspend(handle: TaskHandle) -> Result<(), KernelError> {
    kernel::with_kernel(|k| {
        validate(k, handle)?;
        k.task_suspend(handle.0)
    })
}

/// Return a Suspended task to the ready list.
pub fn resume(handle: TaskHandle) -> Result<(), KernelError> {
    kernel::with_kernel(|k| {
        validate(k, handle)?;
        k.task_resume(handle.0)
    })
}

fn validate(k: &Kernel, handle: TaskHandle) -> Result<&Tcb, KernelError> {
    if (handle.0 as usize) < MAX_TASKS && k.tasks.tcb(handle.0).is_live() {
        Ok(k.tasks.tcb(handle.0))
    } else {
        Err(KernelError::InvalidParam)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
