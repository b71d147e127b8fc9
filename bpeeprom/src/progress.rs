//! CLI 进度显示实现
//!
//! 这个模块把作业事件渲染到终端：交互式终端使用 indicatif 进度条，
//! 其他情况按行输出百分比。

use bpeeprom_lib::{JobEvent, JobKind};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, Write};

/// 作业事件的展示端
pub trait EventView {
    fn on_event(&mut self, event: &JobEvent);
}

/// 基于标准输出的百分比显示
pub struct PercentView {
    last_percent: Option<u8>,
}

impl PercentView {
    pub fn new() -> Self {
        Self { last_percent: None }
    }

    fn print_line(&self, line: &str) {
        let mut stdout = io::stdout();
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }
}

impl EventView for PercentView {
    fn on_event(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Progress(p) => {
                if self.last_percent != Some(*p) {
                    self.last_percent = Some(*p);
                    self.print_line(&format!("{}%", p));
                }
            }
            JobEvent::Log(message) => self.print_line(message),
            JobEvent::DataReady(_) | JobEvent::Complete(_) => {}
        }
    }
}

/// 基于 indicatif 的进度条显示
pub struct IndicatifView {
    bar: ProgressBar,
}

impl IndicatifView {
    pub fn new(kind: JobKind) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("[{prefix}] {msg} {wide_bar} {pos}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_prefix(kind.to_string());
        Self { bar }
    }
}

impl EventView for IndicatifView {
    fn on_event(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Progress(p) => self.bar.set_position(u64::from(*p)),
            // 日志行打印在进度条上方
            JobEvent::Log(message) => self.bar.println(message),
            JobEvent::DataReady(data) => self.bar.set_message(format!("{} bytes", data.len())),
            JobEvent::Complete(outcome) => {
                if outcome.success() {
                    self.bar.finish_with_message("Done");
                } else {
                    self.bar.abandon_with_message(outcome.status.to_string());
                }
            }
        }
    }
}

/// 静默模式：不输出任何进度
pub struct QuietView;

impl EventView for QuietView {
    fn on_event(&mut self, _event: &JobEvent) {}
}

/// 根据终端类型和静默选项选择展示端
pub fn create_event_view(kind: JobKind, quiet: bool) -> Box<dyn EventView> {
    if quiet {
        Box::new(QuietView)
    } else if io::stdout().is_terminal() {
        Box::new(IndicatifView::new(kind))
    } else {
        Box::new(PercentView::new())
    }
}
