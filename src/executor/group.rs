//! Task groups: shared cancellation and join scopes.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct GroupInner {
    /// Tasks created against this group and not yet finished or discarded.
    active: AtomicUsize,
    cancelled: AtomicBool,
    parent: Option<TaskGroup>,
}

/// A shared cancellation and join scope for a set of tasks.
///
/// Cloning yields another handle to the same scope. Groups form a tree
/// through parent links; a task observing cancellation walks its ancestor
/// chain, so cancelling a parent silences every descendant. Cancellation is
/// cooperative: it is sampled at task entry, and a task already running is
/// never interrupted.
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

impl TaskGroup {
    /// Creates a root group.
    pub fn new() -> Self {
        Self::make(None)
    }

    /// Creates a group whose cancellation follows `parent` as well.
    pub fn with_parent(parent: TaskGroup) -> Self {
        Self::make(Some(parent))
    }

    fn make(parent: Option<TaskGroup>) -> Self {
        TaskGroup {
            inner: Arc::new(GroupInner {
                active: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                parent,
            }),
        }
    }

    /// Flags the group as cancelled. Idempotent; pending tasks skip their
    /// bodies, running tasks finish normally.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Whether this group or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        let mut group = self;
        loop {
            if group.inner.cancelled.load(Ordering::Acquire) {
                return true;
            }
            match &group.inner.parent {
                Some(parent) => group = parent,
                None => return false,
            }
        }
    }

    /// Number of tasks created against this group that have not yet
    /// finished.
    pub fn active_tasks(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether any of the group's tasks are still in flight.
    pub fn is_active(&self) -> bool {
        self.active_tasks() > 0
    }

    /// The group of the task currently executing on this thread, if any.
    pub fn current() -> Option<TaskGroup> {
        CURRENT.with(|stack| stack.borrow().last().cloned().flatten())
    }

    pub(crate) fn task_created(&self) {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn task_finished(&self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("active", &self.active_tasks())
            .field("cancelled", &self.inner.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

// Per-thread stack of executing task groups. Pushed on task entry, popped
// on exit; `None` entries keep groupless tasks from inheriting an outer
// task's group.
thread_local! {
    static CURRENT: RefCell<Vec<Option<TaskGroup>>> = RefCell::new(Vec::new());
}

/// Marks `group` as the current task group until the guard drops.
pub(crate) fn enter(group: Option<TaskGroup>) -> EnterGuard {
    CURRENT.with(|stack| stack.borrow_mut().push(group));
    EnterGuard { _priv: () }
}

pub(crate) struct EnterGuard {
    _priv: (),
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let group = TaskGroup::new();
        assert!(!group.is_cancelled());
        group.cancel();
        group.cancel();
        assert!(group.is_cancelled());
    }

    #[test]
    fn test_cancel_propagates_to_descendants() {
        let root = TaskGroup::new();
        let child = TaskGroup::with_parent(root.clone());
        let grandchild = TaskGroup::with_parent(child.clone());

        root.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_cancel_leaves_parent() {
        let root = TaskGroup::new();
        let child = TaskGroup::with_parent(root.clone());

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_current_follows_enter_stack() {
        assert!(TaskGroup::current().is_none());

        let outer = TaskGroup::new();
        let _outer_guard = enter(Some(outer.clone()));
        assert!(TaskGroup::current().is_some());

        {
            // A groupless task hides the outer group.
            let _inner_guard = enter(None);
            assert!(TaskGroup::current().is_none());
        }

        assert!(TaskGroup::current().is_some());
    }
}
