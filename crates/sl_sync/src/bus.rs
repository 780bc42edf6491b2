//! 事件总线
//!
//! 状态仓库与同步组件向总线发布事件；渲染层订阅总线，与同步引擎完全解耦。
//! 链接状态另外通过 watch 通道提供 "最新值" 语义。

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use sl_core::{Event, EventKind, LinkStatus, Notice};

const DEFAULT_CAPACITY: usize = 256;

/// 事件总线
#[derive(Debug, Clone)]
pub struct EventBus {
    events: broadcast::Sender<Event>,
    status: Arc<watch::Sender<LinkStatus>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (status, _) = watch::channel(LinkStatus::Disconnected);
        Self { events, status: Arc::new(status) }
    }

    /// 发布事件；没有订阅者时静默丢弃
    pub fn publish(&self, kind: EventKind, revision: u64) {
        tracing::trace!(kind = kind.as_str(), revision, "event published");
        let _ = self.events.send(Event::new(kind, revision));
    }

    /// 发布需要用户处理的提示
    pub fn notify(&self, notice: Notice, revision: u64) {
        tracing::warn!(?notice, "user notice raised");
        self.publish(EventKind::Notice(notice), revision);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// 更新链接状态，状态真正变化时才发布事件
    pub fn set_status(&self, next: LinkStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!(status = next.as_str(), "link status changed");
            self.publish(EventKind::LinkStatusChanged(next), 0);
        }
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }
}
