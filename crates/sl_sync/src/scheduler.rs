//! 周期任务调度
//!
//! 看门狗轮询与自动保存定时器都以具名周期任务运行。任务可以暂停、恢复、取消；
//! 暂停期间跳过所有到期的周期，恢复后从完整的一个周期重新开始计时。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Running,
    Paused,
    /// 已结束 (被取消或任务自身退出)
    Finished,
}

struct TaskSlot {
    handle: JoinHandle<()>,
    paused: watch::Sender<bool>,
}

/// 周期任务调度器
#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<&'static str, TaskSlot>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, TaskSlot>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 启动具名周期任务；同名任务会先被取消。第一次执行在一个完整周期之后。
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (paused_tx, mut paused_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let paused = *paused_rx.borrow();
                if paused {
                    let resumed = paused_rx.wait_for(|p| !*p).await.is_ok();
                    if !resumed {
                        break;
                    }
                    ticker.reset();
                    continue;
                }
                tick().await;
            }
        });

        let previous = self.tasks().insert(name, TaskSlot { handle, paused: paused_tx });
        if let Some(previous) = previous {
            previous.handle.abort();
            tracing::debug!(task = name, "replaced periodic task");
        }
        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
    }

    fn set_paused(&self, name: &str, paused: bool) -> bool {
        match self.tasks().get(name) {
            Some(slot) if !slot.handle.is_finished() => {
                slot.paused.send_replace(paused);
                tracing::debug!(task = name, paused, "periodic task toggled");
                true
            }
            _ => false,
        }
    }

    /// 暂停任务；任务不存在或已结束时返回 false
    pub fn pause(&self, name: &str) -> bool {
        self.set_paused(name, true)
    }

    pub fn resume(&self, name: &str) -> bool {
        self.set_paused(name, false)
    }

    /// 取消并移除任务
    pub fn cancel(&self, name: &str) -> bool {
        match self.tasks().remove(name) {
            Some(slot) => {
                slot.handle.abort();
                tracing::debug!(task = name, "periodic task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn pause_all(&self) {
        for slot in self.tasks().values() {
            slot.paused.send_replace(true);
        }
    }

    pub fn resume_all(&self) {
        for slot in self.tasks().values() {
            slot.paused.send_replace(false);
        }
    }

    pub fn state(&self, name: &str) -> TaskState {
        match self.tasks().get(name) {
            Some(slot) if slot.handle.is_finished() => TaskState::Finished,
            Some(slot) if *slot.paused.borrow() => TaskState::Paused,
            Some(_) => TaskState::Running,
            None => TaskState::Finished,
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state(name) == TaskState::Running
    }

    pub fn is_paused(&self, name: &str) -> bool {
        self.state(name) == TaskState::Paused
    }

    /// 当前登记的任务名
    pub fn task_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tasks().keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// 取消全部任务
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.tasks().drain().collect();
        for (name, slot) in drained {
            slot.handle.abort();
            tracing::debug!(task = name, "periodic task stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
