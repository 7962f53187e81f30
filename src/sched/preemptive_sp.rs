//! # Preemptive Static-Priority Scheduler
//!
//! The default discipline. One FIFO per priority level plus a bitmask of
//! occupied levels: picking the next task is find-highest-set-bit then
//! read a list head, O(1) for the small bounded priority range. Tasks of
//! equal priority run FIFO — a newly ready peer waits until the running
//! one yields or blocks. A newcomer whose priority exceeds the running
//! task's triggers immediate preemption.

use crate::config::MAX_PRIORITIES;
use crate::kernel_assert;
use crate::sched::{DelayedQueue, SchedulingPolicy};
use crate::task::{TaskId, TaskState, TaskTable};
use crate::time::Tick;

pub(crate) struct PreemptiveSp {
    /// Head of the ready FIFO per priority level.
    ready_heads: [Option<TaskId>; MAX_PRIORITIES as usize],
    /// Bit `p` set iff priority level `p` has a ready task.
    ready_mask: u32,
    delayed: DelayedQueue,
}

impl PreemptiveSp {
    pub(crate) const fn new() -> Self {
        Self {
            ready_heads: [None; MAX_PRIORITIES as usize],
            ready_mask: 0,
            delayed: DelayedQueue::new(),
        }
    }

    fn highest_ready(&self) -> Option<TaskId> {
        if self.ready_mask == 0 {
            return None;
        }
        let top = 31 - self.ready_mask.leading_zeros();
        self.ready_heads[top as usize]
    }
}

impl SchedulingPolicy for PreemptiveSp {
    fn reset(&mut self) {
        self.ready_heads = [None; MAX_PRIORITIES as usize];
        self.ready_mask = 0;
        self.delayed.clear();
    }

    fn pick_next(&mut self, _tasks: &mut TaskTable) -> Option<TaskId> {
        self.highest_ready()
    }

    fn peek_next(&self, _tasks: &TaskTable) -> Option<TaskId> {
        self.highest_ready()
    }

    fn should_preempt(
        &mut self,
        tasks: &mut TaskTable,
        current: Option<TaskId>,
        candidate: Option<TaskId>,
    ) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        let Some(current) = current else {
            return true;
        };
        candidate != current && tasks.tcb(candidate).priority > tasks.tcb(current).priority
    }

    fn on_task_yielded(&mut self, tasks: &mut TaskTable, id: TaskId) {
        // Back to the tail of its level: equal priorities share FIFO.
        self.ready_insert(tasks, id);
    }

    fn ready_insert(&mut self, tasks: &mut TaskTable, id: TaskId) {
        let priority = tasks.tcb(id).priority;
        kernel_assert!(priority < MAX_PRIORITIES);
        let level = priority as usize;

        {
            let tcb = tasks.tcb_mut(id);
            tcb.next = None;
            tcb.prev = None;
        }

        match self.ready_heads[level] {
            None => {
                self.ready_heads[level] = Some(id);
                self.ready_mask |= 1 << level;
            }
            Some(head) => {
                // Append at the tail for FIFO order within the level.
                let mut tail = head;
                while let Some(next) = tasks.tcb(tail).next {
                    tail = next;
                }
                tasks.tcb_mut(tail).next = Some(id);
                tasks.tcb_mut(id).prev = Some(tail);
            }
        }
    }

    fn ready_remove(&mut self, tasks: &mut TaskTable, id: TaskId) {
        let level = tasks.tcb(id).priority as usize;
        let (prev, next) = {
            let tcb = tasks.tcb(id);
            (tcb.prev, tcb.next)
        };

        match prev {
            Some(p) => tasks.tcb_mut(p).next = next,
            None => self.ready_heads[level] = next,
        }
        if let Some(n) = next {
            tasks.tcb_mut(n).prev = prev;
        }
        if self.ready_heads[level].is_none() {
            self.ready_mask &= !(1 << level);
        }

        let tcb = tasks.tcb_mut(id);
        tcb.next = None;
        tcb.prev = None;
    }

    fn ready_count(&self, tasks: &TaskTable) -> usize {
        let mut count = 0;
        for head in self.ready_heads.iter() {
            let mut cursor = *head;
            while let Some(id) = cursor {
                count += 1;
                cursor = tasks.tcb(id).next;
            }
        }
        count
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
            self.ready_insert(tasks, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::vec::Vec;

    extern "C" fn noop(_: *mut ()) {}

    fn table_with_priorities(priorities: &[u8]) -> TaskTable {
        let mut tasks = TaskTable::new();
        for (i, &priority) in priorities.iter().enumerate() {
            let tcb = tasks.tcb_mut(i as TaskId);
            tcb.task_id = i as TaskId;
            tcb.entry = Some(noop);
            tcb.state = TaskState::Ready;
            tcb.priority = priority;
            tcb.base_priority = priority;
        }
        tasks
    }

    #[test]
    fn picks_highest_priority() {
        let mut tasks = table_with_priorities(&[1, 5, 3]);
        let mut sched = PreemptiveSp::new();

        for id in 0..3 {
            sched.ready_insert(&mut tasks, id);
        }
        assert_eq!(sched.peek_next(&tasks), Some(1));

        sched.ready_remove(&mut tasks, 1);
        assert_eq!(sched.peek_next(&tasks), Some(2));

        sched.ready_remove(&mut tasks, 2);
        assert_eq!(sched.peek_next(&tasks), Some(0));

        sched.ready_remove(&mut tasks, 0);
        assert_eq!(sched.peek_next(&tasks), None);
        assert_eq!(sched.ready_mask, 0);
    }

    #[test]
    fn equal_priorities_run_fifo() {
        let mut tasks = table_with_priorities(&[2, 2, 2]);
        let mut sched = PreemptiveSp::new();

        for id in 0..3 {
            sched.ready_insert(&mut tasks, id);
        }
        assert_eq!(sched.peek_next(&tasks), Some(0));

        // Rotating the head to the tail exposes the next in line.
        sched.ready_remove(&mut tasks, 0);
        sched.on_task_yielded(&mut tasks, 0);
        assert_eq!(sched.peek_next(&tasks), Some(1));
    }

    #[test]
    fn preempts_only_for_strictly_higher_priority() {
        let mut tasks = table_with_priorities(&[2, 2, 5]);
        let mut sched = PreemptiveSp::new();

        assert!(!sched.should_preempt(&mut tasks, Some(0), Some(1)));
        assert!(sched.should_preempt(&mut tasks, Some(0), Some(2)));
        assert!(!sched.should_preempt(&mut tasks, Some(2), Some(0)));
        assert!(!sched.should_preempt(&mut tasks, Some(0), Some(0)));
        assert!(!sched.should_preempt(&mut tasks, Some(0), None));
        assert!(sched.should_preempt(&mut tasks, None, Some(0)));
    }

    #[test]
    fn delayed_tick_moves_expired_tasks_to_ready() {
        let mut tasks = table_with_priorities(&[1, 4]);
        let mut sched = PreemptiveSp::new();

        tasks.tcb_mut(0).state = TaskState::Blocked;
        tasks.tcb_mut(1).state = TaskState::Blocked;
        sched.delayed_insert(&mut tasks, 0, 10);
        sched.delayed_insert(&mut tasks, 1, 20);

        sched.delayed_tick(&mut tasks, 10);
        assert_eq!(tasks.tcb(0).state, TaskState::Ready);
        assert_eq!(tasks.tcb(1).state, TaskState::Blocked);
        assert_eq!(sched.peek_next(&tasks), Some(0));

        sched.delayed_tick(&mut tasks, 25);
        assert_eq!(tasks.tcb(1).state, TaskState::Ready);
        assert_eq!(sched.peek_next(&tasks), Some(1));
    }

    /// Whatever the insertion order, the scheduler always surfaces a task
    /// of the maximum ready priority.
    #[quickcheck]
    fn always_picks_a_maximum_priority_task(priorities: Vec<u8>) -> bool {
        let priorities: Vec<u8> = priorities
            .into_iter()
            .take(crate::config::MAX_TASKS)
            .map(|p| p % MAX_PRIORITIES)
            .collect();
        if priorities.is_empty() {
            return true;
        }

        let mut tasks = table_with_priorities(&priorities);
        let mut sched = PreemptiveSp::new();
        for id in 0..priorities.len() {
            sched.ready_insert(&mut tasks, id as TaskId);
        }

        let max = *priorities.iter().max().unwrap();
        match sched.peek_next(&tasks) {
            Some(id) => tasks.tcb(id).priority == max,
            None => false,
        }
    }
}
