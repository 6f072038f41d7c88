//! FIFO of pending split tasks between worker threads and the coordinator.

use std::collections::VecDeque;

use parking_lot::Mutex;

use metafs_types::{ShardId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSplitTask {
    pub origin_worker: WorkerId,
    pub new_shard_id: ShardId,
}

/// Mutex-guarded FIFO. The coordinator busy-polls `pop`, so there is no
/// condition variable here.
#[derive(Default)]
pub struct SplitTaskQueue {
    tasks: Mutex<VecDeque<PendingSplitTask>>,
}

impl SplitTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: PendingSplitTask) {
        self.tasks.lock().push_back(task);
    }

    pub fn pop(&self) -> Option<PendingSplitTask> {
        self.tasks.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
