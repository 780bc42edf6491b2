//! 同步状态
//!
//! 看门狗与写入管线之间唯一的协调点。宿主不提供更底层的锁原语，所有互斥都靠这里的标志自觉遵守。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::host::FileStamp;

#[derive(Debug, Default)]
struct Marks {
    last_known_stamp: Option<FileStamp>,
    last_self_write: Option<Instant>,
    last_written_fingerprint: Option<String>,
}

/// 同步状态
#[derive(Debug)]
pub struct SyncState {
    write_in_progress: AtomicBool,
    marks: Mutex<Marks>,
    suppress_window: Duration,
}

impl SyncState {
    pub fn new(suppress_window: Duration) -> Self {
        Self {
            write_in_progress: AtomicBool::new(false),
            marks: Mutex::new(Marks::default()),
            suppress_window,
        }
    }

    fn marks(&self) -> std::sync::MutexGuard<'_, Marks> {
        self.marks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 尝试占用写入标志；已有写入在进行时返回 `false`
    pub fn try_begin_write(&self) -> bool {
        self.write_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_write(&self) {
        self.write_in_progress.store(false, Ordering::Release);
    }

    pub fn is_write_in_progress(&self) -> bool {
        self.write_in_progress.load(Ordering::Acquire)
    }

    pub fn suppress_window(&self) -> Duration {
        self.suppress_window
    }

    /// 记录一次成功的自写
    pub fn mark_self_write(&self, at: Instant, fingerprint: String) {
        let mut marks = self.marks();
        marks.last_self_write = Some(at);
        marks.last_written_fingerprint = Some(fingerprint);
    }

    /// `now` 是否落在最近一次自写的抑制窗口内
    pub fn within_suppress_window(&self, now: Instant) -> bool {
        self.marks()
            .last_self_write
            .map(|at| now.saturating_duration_since(at) < self.suppress_window)
            .unwrap_or(false)
    }

    pub fn last_self_write(&self) -> Option<Instant> {
        self.marks().last_self_write
    }

    /// 内容是否与最近一次自写的字节相同
    pub fn matches_last_write(&self, fingerprint: &str) -> bool {
        self.marks().last_written_fingerprint.as_deref() == Some(fingerprint)
    }

    pub fn last_known_stamp(&self) -> Option<FileStamp> {
        self.marks().last_known_stamp
    }

    pub fn set_last_known_stamp(&self, stamp: FileStamp) {
        self.marks().last_known_stamp = Some(stamp);
    }

    /// 把修改戳退回 `previous`，前提是期间没有别人改过它。用于让下一次轮询重新处理同一变化。
    pub fn restore_last_known_stamp(&self, expected: FileStamp, previous: Option<FileStamp>) -> bool {
        let mut marks = self.marks();
        if marks.last_known_stamp != Some(expected) {
            return false;
        }
        marks.last_known_stamp = previous;
        true
    }

    /// 建立新链接时清空所有标记
    pub fn reset(&self) {
        *self.marks() = Marks::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_flag_is_exclusive() {
        let state = SyncState::new(Duration::from_secs(3));
        assert!(state.try_begin_write());
        assert!(!state.try_begin_write());
        state.end_write();
        assert!(state.try_begin_write());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppress_window_edges() {
        let state = SyncState::new(Duration::from_millis(3_000));
        assert!(!state.within_suppress_window(Instant::now()));

        let at = Instant::now();
        state.mark_self_write(at, "abc".to_string());
        assert!(state.within_suppress_window(at + Duration::from_millis(2_999)));
        assert!(!state.within_suppress_window(at + Duration::from_millis(3_000)));
        assert!(state.matches_last_write("abc"));
        assert!(!state.matches_last_write("abd"));
    }

    #[test]
    fn test_stamp_restore_only_when_unchanged() {
        let state = SyncState::new(Duration::from_secs(3));
        let first = FileStamp { modified_ms: 1, len: 10 };
        let second = FileStamp { modified_ms: 2, len: 12 };
        let third = FileStamp { modified_ms: 3, len: 14 };

        state.set_last_known_stamp(first);
        state.set_last_known_stamp(second);
        assert!(state.restore_last_known_stamp(second, Some(first)));
        assert_eq!(state.last_known_stamp(), Some(first));

        state.set_last_known_stamp(third);
        assert!(!state.restore_last_known_stamp(second, Some(first)));
        assert_eq!(state.last_known_stamp(), Some(third));
    }
}
