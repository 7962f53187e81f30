//! # Round-Robin Scheduler
//!
//! Equal CPU shares through time slicing: the ready list is a single FIFO
//! with a tail pointer for O(1) rotation, and every task carries a slice
//! budget in its TCB. The tick handler's `should_preempt` call decrements
//! the running task's budget; when it hits zero with another task ready,
//! the runner is rotated to the tail and the next head takes over with a
//! fresh slice.

use crate::config::TIME_SLICE_TICKS;
use crate::sched::{DelayedQueue, Fifo, SchedulingPolicy};
use crate::task::{TaskId, TaskState, TaskTable};
use crate::time::Tick;

pub(crate) struct RoundRobin {
    ready: Fifo,
    delayed: DelayedQueue,
}

impl RoundRobin {
    pub(crate) const fn new() -> Self {
        Self {
            ready: Fifo::new(),
            delayed: DelayedQueue::new(),
        }
    }
}

impl SchedulingPolicy for RoundRobin {
    fn reset(&mut self) {
        self.ready.clear();
        self.delayed.clear();
    }

    fn pick_next(&mut self, _tasks: &mut TaskTable) -> Option<TaskId> {
        self.ready.front()
    }

    fn peek_next(&self, _tasks: &TaskTable) -> Option<TaskId> {
        self.ready.front()
    }

    /// Slice accounting lives here, driven by the once-per-tick call from
    /// the tick handler. Preemption is due only when the running task's
    /// slice is spent and somebody else is waiting.
    fn should_preempt(
        &mut self,
        tasks: &mut TaskTable,
        current: Option<TaskId>,
        candidate: Option<TaskId>,
    ) -> bool {
        let Some(current) = current else {
            return candidate.is_some();
        };

        let tcb = tasks.tcb_mut(current);
        if tcb.time_slice_remaining > 0 {
            tcb.time_slice_remaining -= 1;
        }

        tcb.time_slice_remaining == 0 && !self.ready.is_empty()
    }

    fn on_task_yielded(&mut self, tasks: &mut TaskTable, id: TaskId) {
        // Tail rotation; the slice refills when the task is picked again.
        tasks.tcb_mut(id).time_slice_remaining = TIME_SLICE_TICKS;
        self.ready.push_back(tasks, id);
    }

    fn ready_insert(&mut self, tasks: &mut TaskTable, id: TaskId) {
        self.ready.push_back(tasks, id);
    }

    fn ready_remove(&mut self, tasks: &mut TaskTable, id: TaskId) {
        self.ready.remove(tasks, id);
    }

    fn ready_count(&self, tasks: &TaskTable) -> usize {
        self.ready.len(tasks)
    }

    fn delayed_insert(&mut self, tasks: &mut TaskTable, id: TaskId, wake_at: Tick) {
        self.delayed.insert(tasks, id, wake_at);
    }

    fn delayed_remove(&mut self, tasks: &mut TaskTable, id: TaskId) {
        self.delayed.remove(tasks, id);
    }

    fn delayed_contains(&self, tasks: &TaskTable, id: TaskId) -> bool {
        self.delayed.contains(tasks, id)
    }

    fn delayed_count(&self, tasks: &TaskTable) -> usize {
        self.delayed.len(tasks)
    }

    fn delayed_tick(&mut self, tasks: &mut TaskTable, now: Tick) {
        while let Some(id) = self.delayed.pop_expired(tasks, now) {
            tasks.tcb_mut(id).state = TaskState::Ready;
            self.ready.push_back(tasks, id);
        }
    }
}
