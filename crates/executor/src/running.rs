use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 进程内正在执行的任务ID集合
///
/// 与数据库中的RUNNING状态相互独立，二者的偏差由卡住任务回收器修复。
#[derive(Debug, Clone, Default)]
pub struct RunningTasks {
    inner: Arc<Mutex<HashSet<i64>>>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 尝试占用任务，任务已在集合中时返回 `None`
    pub fn try_acquire(&self, task_id: i64) -> Option<RunningGuard> {
        if self.lock().insert(task_id) {
            Some(RunningGuard {
                tasks: self.clone(),
                task_id,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, task_id: i64) -> bool {
        self.lock().contains(&task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 按ID升序的快照
    pub fn snapshot(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.lock().iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// 释放时把任务移出运行集合
#[derive(Debug)]
pub struct RunningGuard {
    tasks: RunningTasks,
    task_id: i64,
}

impl RunningGuard {
    pub fn task_id(&self) -> i64 {
        self.task_id
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.tasks.lock().remove(&self.task_id);
    }
}
