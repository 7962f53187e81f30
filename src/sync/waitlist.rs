//! # Sync-Object Wait List
//!
//! Every blocking primitive parks its waiters in one of these: a singly
//! linked list over the TCB `next_waiting` links, ordered by descending
//! task priority with FIFO tie-breaking, so the head is always the next
//! task to wake. Enqueuing also stamps the TCB's `blocked_on` pointer and
//! kind — that stamp is what a resumed task inspects to tell a timeout
//! (still enqueued here) from a peer wake (popped, stamp cleared).

use crate::task::{SyncKind, TaskId, TaskTable};

pub(crate) struct WaitList {
    head: Option<TaskId>,
}

impl WaitList {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[cfg(test)]
    pub(crate) fn peek(&self) -> Option<TaskId> {
        self.head
    }

    /// Priority-ordered insert, highest first; equal priorities keep
    /// arrival order.
    pub(crate) fn insert(
        &mut self,
        tasks: &mut TaskTable,
        id: TaskId,
        object: *const (),
        kind: SyncKind,
    ) {
        {
            let tcb = tasks.tcb_mut(id);
            tcb.next_waiting = None;
            tcb.blocked_on = object;
            tcb.blocked_on_kind = kind;
        }
        let priority = tasks.tcb(id).priority;

        let mut prev: Option<TaskId> = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if tasks.tcb(c).priority < priority {
                break;
            }
            prev = Some(c);
            cursor = tasks.tcb(c).next_waiting;
        }

        tasks.tcb_mut(id).next_waiting = cursor;
        match prev {
            Some(p) => tasks.tcb_mut(p).next_waiting = Some(id),
            None => self.head = Some(id),
        }
    }

    /// Unlink `id` if present, clearing its blocked-on stamp. Returns
    /// whether the task was found.
    pub(crate) fn remove(&mut self, tasks: &mut TaskTable, id: TaskId) -> bool {
        let mut prev: Option<TaskId> = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if c == id {
                let next = tasks.tcb(c).next_waiting;
                match prev {
                    Some(p) => tasks.tcb_mut(p).next_waiting = next,
                    None => self.head = next,
                }
                let tcb = tasks.tcb_mut(id);
                tcb.next_waiting = None;
                tcb.blocked_on = core::ptr::null();
                tcb.blocked_on_kind = SyncKind::None;
                return true;
            }
            prev = Some(c);
            cursor = tasks.tcb(c).next_waiting;
        }
        false
    }

    /// Detach the highest-priority waiter. The head is it, by the insert
    /// ordering.
    pub(crate) fn pop_highest(&mut self, tasks: &mut TaskTable) -> Option<TaskId> {
        let head = self.head?;
        self.head = tasks.tcb(head).next_waiting;

        let tcb = tasks.tcb_mut(head);
        tcb.next_waiting = None;
        tcb.blocked_on = core::ptr::null();
        tcb.blocked_on_kind = SyncKind::None;
        Some(head)
    }

    pub(crate) fn contains(&self, tasks: &TaskTable, id: TaskId) -> bool {
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if c == id {
                return true;
            }
            cursor = tasks.tcb(c).next_waiting;
        }
        false
    }

    /// Re-sort `id` after a priority change (inheritance boost), keeping
    /// its blocked-on stamp intact.
    pub(crate) fn reposition(&mut self, tasks: &mut TaskTable, id: TaskId) {
        let (object, kind) = {
            let tcb = tasks.tcb(id);
            (tcb.blocked_on, tcb.blocked_on_kind)
        };
        if self.remove(tasks, id) {
            self.insert(tasks, id, object, kind);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self, tasks: &TaskTable) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            count += 1;
            cursor = tasks.tcb(c).next_waiting;
        }
        count
    }
}
