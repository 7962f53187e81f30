//! # Cooperative Scheduler
//!
//! Run-to-yield FIFO. The kernel never takes the CPU away: `should_preempt`
//! is constantly false, and the tick interrupt only drives time. Fairness
//! between voluntary yields comes from rotating the yielding task to the
//! tail of the single ready FIFO.

use crate::sched::{DelayedQueue, Fifo, SchedulingPolicy};
use crate::task::{TaskId, TaskState, TaskTable};
use crate::time::Tick;

pub(crate) struct Cooperative {
    ready: Fifo,
    delayed: DelayedQueue,
}

impl Cooperative {
    pub(crate) const fn new() -> Self {
        Self {
            ready: Fifo::new(),
            delayed: DelayedQueue::new(),
        }
    }
}

impl SchedulingPolicy for Cooperative {
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

    fn should_preempt(
        &mut self,
        _tasks: &mut TaskTable,
        _current: Option<TaskId>,
        _candidate: Option<TaskId>,
    ) -> bool {
        false
    }

    fn on_task_yielded(&mut self, tasks: &mut TaskTable, id: TaskId) {
        // Rotation to the tail is what makes cooperative scheduling
        // round-robin between voluntary yields.
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

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop(_: *mut ()) {}

    fn table_with(n: usize) -> TaskTable {
        let mut tasks = TaskTable::new();
        for i in 0..n {
            let tcb = tasks.tcb_mut(i as TaskId);
            tcb.task_id = i as TaskId;
            tcb.entry = Some(noop);
            tcb.state = TaskState::Ready;
        }
        tasks
    }

    #[test]
    fn never_preempts() {
        let mut tasks = table_with(2);
        let mut sched = Cooperative::new();
        sched.ready_insert(&mut tasks, 0);
        sched.ready_insert(&mut tasks, 1);

        assert!(!sched.should_preempt(&mut tasks, Some(0), Some(1)));
        assert!(!sched.should_preempt(&mut tasks, None, Some(1)));
    }

    #[test]
    fn yield_rotates_to_tail() {
        let mut tasks = table_with(3);
        let mut sched = Cooperative::new();
        for id in 0..3 {
            sched.ready_insert(&mut tasks, id);
        }

        // Simulate three voluntary yields: each front task rotates out.
        for expected in [0, 1, 2, 0, 1] {
            let picked = sched.pick_next(&mut tasks).unwrap();
            assert_eq!(picked, expected);
            sched.ready_remove(&mut tasks, picked);
            sched.on_task_yielded(&mut tasks, picked);
        }
    }
}
