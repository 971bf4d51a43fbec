use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<u64, AbortHandle>,
    closed: bool,
}

/// 定时任务管理器
///
/// 所有任务都登记在表中，[`Scheduler::shutdown`] 会统一中止。
/// 关闭之后提交的任务直接被拒绝。
pub struct Scheduler {
    table: Arc<Mutex<TaskTable>>,
    next_id: AtomicU64,
}

fn lock(table: &Mutex<TaskTable>) -> MutexGuard<'_, TaskTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(TaskTable::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// 登记一个后台任务，任务结束后自动从表中移除
    pub fn spawn<Fut>(&self, fut: Fut) -> Option<u64>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let table = self.table.clone();

        // 持锁期间完成 spawn 与登记，任务结束时的移除一定发生在登记之后
        let mut guard = lock(&self.table);
        if guard.closed {
            return None;
        }
        let handle = tokio::spawn(async move {
            fut.await;
            lock(&table).tasks.remove(&id);
        });
        guard.tasks.insert(id, handle.abort_handle());
        Some(id)
    }

    /// 固定间隔执行，首次执行在一个周期之后
    pub fn add_interval<F, Fut>(&self, period: Duration, mut task_gen: F) -> Option<u64>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task_gen().await;
            }
        })
    }

    /// 延迟执行一次
    pub fn add_delay<F, Fut>(&self, delay: Duration, task: F) -> Option<u64>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        })
    }

    /// 当前登记中的任务数
    pub fn pending(&self) -> usize {
        lock(&self.table).tasks.len()
    }

    pub fn shutdown(&self) {
        let mut guard = lock(&self.table);
        guard.closed = true;
        for (_, handle) in guard.tasks.drain() {
            handle.abort();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
