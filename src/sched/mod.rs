//! # Scheduler
//!
//! Three scheduling disciplines behind one interface. The kernel core
//! never touches a ready or delayed list directly — it goes through the
//! [`SchedulingPolicy`] operations, so each discipline is free to pick the
//! list layout that makes its decisions O(1):
//!
//! | Discipline | Ready structure | Preemption rule |
//! |------------|-----------------|-----------------|
//! | [`PreemptiveSp`] | per-priority FIFOs + occupancy bitmask | newcomer priority above the running task |
//! | [`Cooperative`] | single FIFO | never |
//! | [`RoundRobin`] | single FIFO with tail pointer | time slice exhausted |
//!
//! The delayed list — tasks sleeping until an absolute tick — has the same
//! shape under every discipline and lives here as [`DelayedQueue`].
//!
//! All lists are intrusive over the TCB pool: links are pool indices, so
//! insert and remove are pointer-free O(1) given the node, and ordered
//! insertion walks a list that is bounded by `MAX_TASKS`.

mod cooperative;
mod preemptive_sp;
mod round_robin;

pub(crate) use cooperative::Cooperative;
pub(crate) use preemptive_sp::PreemptiveSp;
pub(crate) use round_robin::RoundRobin;

use crate::task::{TaskId, TaskTable};
use crate::time::{tick_before, tick_reached, Tick};

/// Scheduling discipline selector, fixed at build time through
/// [`crate::config::SCHEDULER_TYPE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    /// Preemptive static priority (the default): highest ready priority
    /// runs, equal priorities run FIFO.
    PreemptiveStaticPriority,
    /// Run-to-yield FIFO; the kernel never preempts.
    Cooperative,
    /// Equal shares: FIFO rotation driven by a per-task time slice.
    RoundRobin,
}

/// The capability set every discipline implements.
///
/// Contract notes:
/// - The Running task is in no ready list. `on_task_yielded` re-queues a
///   still-ready outgoing task according to the discipline (tail of its
///   priority FIFO, or plain tail rotation).
/// - `pick_next` selects without removing; the kernel removes the chosen
///   task via `ready_remove` when it actually takes the CPU.
/// - `should_preempt` is called from the tick handler (with `candidate` =
///   the current best ready task) and from `make_ready` (with the newly
///   readied task); for round-robin it also owns the slice decrement.
pub(crate) trait SchedulingPolicy {
    fn reset(&mut self);

    fn pick_next(&mut self, tasks: &mut TaskTable) -> Option<TaskId>;
    fn peek_next(&self, tasks: &TaskTable) -> Option<TaskId>;
    fn should_preempt(
        &mut self,
        tasks: &mut TaskTable,
        current: Option<TaskId>,
        candidate: Option<TaskId>,
    ) -> bool;
    fn on_task_yielded(&mut self, tasks: &mut TaskTable, id: TaskId);

    fn ready_insert(&mut self, tasks: &mut TaskTable, id: TaskId);
    fn ready_remove(&mut self, tasks: &mut TaskTable, id: TaskId);
    fn ready_count(&self, tasks: &TaskTable) -> usize;

    fn delayed_insert(&mut self, tasks: &mut TaskTable, id: TaskId, wake_at: Tick);
    fn delayed_remove(&mut self, tasks: &mut TaskTable, id: TaskId);
    fn delayed_contains(&self, tasks: &TaskTable, id: TaskId) -> bool;
    fn delayed_count(&self, tasks: &TaskTable) -> usize;
    /// Move every delayed task whose deadline has been reached into the
    /// ready list. Called once per tick.
    fn delayed_tick(&mut self, tasks: &mut TaskTable, now: Tick);
}

// ---------------------------------------------------------------------------
// Discipline dispatch
// ---------------------------------------------------------------------------

/// The configured discipline. A plain enum rather than a trait object:
/// the kernel is `no_std`, the set of disciplines is closed, and dispatch
/// stays a jump table the optimizer can see through.
pub(crate) enum Scheduler {
    PreemptiveSp(PreemptiveSp),
    Cooperative(Cooperative),
    RoundRobin(RoundRobin),
}

impl Scheduler {
    pub(crate) const fn new(kind: SchedulerKind) -> Self {
        match kind {
            SchedulerKind::PreemptiveStaticPriority => Self::PreemptiveSp(PreemptiveSp::new()),
            SchedulerKind::Cooperative => Self::Cooperative(Cooperative::new()),
            SchedulerKind::RoundRobin => Self::RoundRobin(RoundRobin::new()),
        }
    }

    pub(crate) fn kind(&self) -> SchedulerKind {
        match self {
            Self::PreemptiveSp(_) => SchedulerKind::PreemptiveStaticPriority,
            Self::Cooperative(_) => SchedulerKind::Cooperative,
            Self::RoundRobin(_) => SchedulerKind::RoundRobin,
        }
    }

    fn policy(&self) -> &dyn SchedulingPolicy {
        match self {
            Self::PreemptiveSp(p) => p,
            Self::Cooperative(p) => p,
            Self::RoundRobin(p) => p,
        }
    }

    fn policy_mut(&mut self) -> &mut dyn SchedulingPolicy {
        match self {
            Self::PreemptiveSp(p) => p,
            Self::Cooperative(p) => p,
            Self::RoundRobin(p) => p,
        }
    }
}

impl SchedulingPolicy for Scheduler {
    fn reset(&mut self) {
        self.policy_mut().reset()
    }
    fn pick_next(&mut self, tasks: &mut TaskTable) -> Option<TaskId> {
        self.policy_mut().pick_next(tasks)
    }
    fn peek_next(&self, tasks: &TaskTable) -> Option<TaskId> {
        self.policy().peek_next(tasks)
    }
    fn should_preempt(
        &mut self,
        tasks: &mut TaskTable,
        current: Option<TaskId>,
        candidate: Option<TaskId>,
    ) -> bool {
        self.policy_mut().should_preempt(tasks, current, candidate)
    }
    fn on_task_yielded(&mut self, tasks: &mut TaskTable, id: TaskId) {
        self.policy_mut().on_task_yielded(tasks, id)
    }
    fn ready_insert(&mut self, tasks: &mut TaskTable, id: TaskId) {
        self.policy_mut().ready_insert(tasks, id)
    }
    fn ready_remove(&mut self, tasks: &mut TaskTable, id: TaskId) {
        self.policy_mut().ready_remove(tasks, id)
    }
    fn ready_count(&self, tasks: &TaskTable) -> usize {
        self.policy().ready_count(tasks)
    }
    fn delayed_insert(&mut self, tasks: &mut TaskTable, id: TaskId, wake_at: Tick) {
        self.policy_mut().delayed_insert(tasks, id, wake_at)
    }
    fn delayed_remove(&mut self, tasks: &mut TaskTable, id: TaskId) {
        self.policy_mut().delayed_remove(tasks, id)
    }
    fn delayed_contains(&self, tasks: &TaskTable, id: TaskId) -> bool {
        self.policy().delayed_contains(tasks, id)
    }
    fn delayed_count(&self, tasks: &TaskTable) -> usize {
        self.policy().delayed_count(tasks)
    }
    fn delayed_tick(&mut self, tasks: &mut TaskTable, now: Tick) {
        self.policy_mut().delayed_tick(tasks, now)
    }
}

// ---------------------------------------------------------------------------
// Shared list machinery
// ---------------------------------------------------------------------------

/// Doubly-linked FIFO over the TCB pool's `next`/`prev` links, with a
/// tail pointer for O(1) append. Used directly by the cooperative and
/// round-robin ready lists.
pub(crate) struct Fifo {
    head: Option<TaskId>,
    tail: Option<TaskId>,
}

impl Fifo {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.head = None;
        self.tail = None;
    }

    pub(crate) fn front(&self) -> Option<TaskId> {
        self.head
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_back(&mut self, tasks: &mut TaskTable, id: TaskId) {
        let tcb = tasks.tcb_mut(id);
        tcb.next = None;
        tcb.prev = self.tail;

        match self.tail {
            Some(tail) => tasks.tcb_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    pub(crate) fn remove(&mut self, tasks: &mut TaskTable, id: TaskId) {
        let (prev, next) = {
            let tcb = tasks.tcb(id);
            (tcb.prev, tcb.next)
        };

        match prev {
            Some(p) => tasks.tcb_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => tasks.tcb_mut(n).prev = prev,
            None => self.tail = prev,
        }

        let tcb = tasks.tcb_mut(id);
        tcb.next = None;
        tcb.prev = None;
    }

    pub(crate) fn len(&self, tasks: &TaskTable) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            count += 1;
            cursor = tasks.tcb(id).next;
        }
        count
    }
}

/// Delayed list: tasks parked until an absolute tick, sorted ascending by
/// `delay_until` (signed-difference order, so sorting stays correct
/// across the tick wrap). Identical under every discipline.
pub(crate) struct DelayedQueue {
    head: Option<TaskId>,
}

impl DelayedQueue {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn clear(&mut self) {
        self.head = None;
    }

    /// Sorted insert; equal deadlines keep FIFO order.
    pub(crate) fn insert(&mut self, tasks: &mut TaskTable, id: TaskId, wake_at: Tick) {
        tasks.tcb_mut(id).delay_until = wake_at;

        let mut prev: Option<TaskId> = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if tick_before(wake_at, tasks.tcb(c).delay_until) {
                break;
            }
            prev = Some(c);
            cursor = tasks.tcb(c).next;
        }

        let tcb = tasks.tcb_mut(id);
        tcb.next = cursor;
        tcb.prev = prev;

        match prev {
            Some(p) => tasks.tcb_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        if let Some(c) = cursor {
            tasks.tcb_mut(c).prev = Some(id);
        }
    }

    pub(crate) fn remove(&mut self, tasks: &mut TaskTable, id: TaskId) {
        let (prev, next) = {
            let tcb = tasks.tcb(id);
            (tcb.prev, tcb.next)
        };

        match prev {
            Some(p) => tasks.tcb_mut(p).next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            tasks.tcb_mut(n).prev = prev;
        }

        let tcb = tasks.tcb_mut(id);
        tcb.next = None;
        tcb.prev = None;
    }

    /// Membership probe. Only meaningful for Blocked tasks — Ready tasks
    /// use the same links for their ready list.
    pub(crate) fn contains(&self, tasks: &TaskTable, id: TaskId) -> bool {
        self.head == Some(id) || tasks.tcb(id).prev.is_some()
    }

    /// Head of the list if its deadline has been reached.
    pub(crate) fn pop_expired(&mut self, tasks: &mut TaskTable, now: Tick) -> Option<TaskId> {
        let head = self.head?;
        if !tick_reached(now, tasks.tcb(head).delay_until) {
            return None;
        }
        self.remove(tasks, head);
        Some(head)
    }

    pub(crate) fn len(&self, tasks: &TaskTable) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            count += 1;
            cursor = tasks.tcb(id).next;
        }
        count
    }
}
