//! 进度与日志上报
//!
//! 传输引擎通过 [`Reporter`] 上报进度和日志，控制器负责把这些事件按产生
//! 顺序交给调用方（CLI、GUI 等）。

use crate::event::{EventSink, JobEvent};
use std::sync::Arc;

/// 单调不减的百分比进度
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    percent: u8,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// 尝试推进到 `percent`，超过 100 的值会被截断
    ///
    /// 只有进度真正增加时返回 `true`。
    pub fn advance(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.percent {
            self.percent = percent;
            true
        } else {
            false
        }
    }

    /// `done` / `total` 向下取整的百分比，`total` 为 0 时视为完成
    pub fn ratio(done: usize, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        let percent = (done as u128).saturating_mul(100) / total as u128;
        percent.min(100) as u8
    }
}

/// 事件上报助手
pub struct Reporter {
    sink: Arc<dyn EventSink>,
    progress: ProgressState,
}

impl Reporter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            progress: ProgressState::new(),
        }
    }

    /// 上报进度，回退或重复的值不会产生事件
    pub fn progress(&mut self, percent: u8) {
        if self.progress.advance(percent) {
            self.sink.emit(JobEvent::Progress(self.progress.percent()));
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.sink.emit(JobEvent::Log(message));
    }

    pub fn emit(&self, event: JobEvent) {
        self.sink.emit(event);
    }

    pub fn state(&self) -> ProgressState {
        self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn progress_never_goes_backwards() {
        let mut state = ProgressState::new();
        assert!(state.advance(40));
        assert!(!state.advance(30));
        assert!(!state.advance(40));
        assert!(state.advance(250));
        assert_eq!(state.percent(), 100);
    }

    #[test]
    fn ratio_floors() {
        assert_eq!(ProgressState::ratio(4, 10), 40);
        assert_eq!(ProgressState::ratio(1, 3), 33);
        assert_eq!(ProgressState::ratio(0, 0), 100);
    }

    #[test]
    fn reporter_only_emits_increases() {
        let (tx, rx) = unbounded();
        let mut reporter = Reporter::new(Arc::new(tx));
        reporter.progress(10);
        reporter.progress(5);
        reporter.log("hello");
        reporter.progress(10);
        reporter.progress(100);
        drop(reporter);
        let events: Vec<_> = rx.iter().collect();
        assert_eq!(
            events,
            vec![
                JobEvent::Progress(10),
                JobEvent::Log("hello".into()),
                JobEvent::Progress(100),
            ]
        );
    }
}
