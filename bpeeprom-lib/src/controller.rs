//! 作业控制器
//!
//! 控制器在后台线程上执行读 / 写 / 擦除作业，通过 crossbeam 通道按顺序
//! 发出进度、日志和终止事件，同一时间只允许一个作业运行。
//!
//! 无论作业成功、失败、取消还是引擎内部 panic，只要端口已经打开，
//! 适配器都会在终止事件发出之前被复位恰好一次。

use crate::adapter::AdapterFactory;
use crate::engine::{CancelToken, TransferEngine};
use crate::event::{EventSink, JobEvent, JobOutcome, JobStatus};
use crate::progress::Reporter;
use crate::session::Session;
use crate::{Error, JobKind, Result, SessionConfig, TransferJob};
use crossbeam_channel::{Receiver, unbounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running(JobKind),
}

#[derive(Debug)]
struct Shared {
    state: ControllerState,
    cancel: Option<CancelToken>,
    last_status: Option<JobStatus>,
}

pub struct OperationController {
    factory: Arc<dyn AdapterFactory>,
    shared: Arc<Mutex<Shared>>,
    settle_time: Duration,
}

impl OperationController {
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            factory,
            shared: Arc::new(Mutex::new(Shared {
                state: ControllerState::Idle,
                cancel: None,
                last_status: None,
            })),
            settle_time: TransferEngine::DEFAULT_SETTLE_TIME,
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn state(&self) -> ControllerState {
        lock(&self.shared).state
    }

    pub fn last_status(&self) -> Option<JobStatus> {
        lock(&self.shared).last_status
    }

    /// 请求取消当前作业，没有作业运行时返回 `false`
    pub fn cancel(&self) -> bool {
        match &lock(&self.shared).cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 在后台线程启动作业
    ///
    /// 已有作业运行时直接拒绝（[`Error::Busy`]），不会排队。
    pub fn start(&self, job: TransferJob, config: SessionConfig) -> Result<JobHandle> {
        if !config.has_valid_port() {
            return Err(Error::InvalidPort);
        }
        if job.kind == JobKind::Write && job.payload.as_ref().is_none_or(|p| p.is_empty()) {
            return Err(Error::invalid_input("No data to write"));
        }

        let cancel = CancelToken::new();
        {
            let mut shared = lock(&self.shared);
            if let ControllerState::Running(kind) = shared.state {
                return Err(Error::Busy(kind));
            }
            shared.state = ControllerState::Running(job.kind);
            shared.cancel = Some(cancel.clone());
        }

        let (tx, rx) = unbounded();
        let worker = Worker {
            factory: Arc::clone(&self.factory),
            shared: Arc::clone(&self.shared),
            settle_time: self.settle_time,
            cancel: cancel.clone(),
        };
        let kind = job.kind;
        let spawned = std::thread::Builder::new()
            .name(format!("bpeeprom-{}", kind))
            .spawn(move || worker.run(job, config, Arc::new(tx)));

        match spawned {
            Ok(thread) => Ok(JobHandle {
                kind,
                events: rx,
                cancel,
                thread: Some(thread),
            }),
            Err(e) => {
                let mut shared = lock(&self.shared);
                shared.state = ControllerState::Idle;
                shared.cancel = None;
                Err(e.into())
            }
        }
    }
}

/// Final result collected by [`JobHandle::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub outcome: JobOutcome,
    pub data: Option<Vec<u8>>,
}

pub struct JobHandle {
    kind: JobKind,
    events: Receiver<JobEvent>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn events(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drains events until the terminal one, handing each to `on_event`.
    pub fn wait_with(mut self, mut on_event: impl FnMut(&JobEvent)) -> JobResult {
        let mut data = None;
        let mut outcome = None;
        for event in self.events.iter() {
            on_event(&event);
            match event {
                JobEvent::DataReady(bytes) => data = Some(bytes),
                JobEvent::Complete(done) => {
                    outcome = Some(done);
                    break;
                }
                _ => {}
            }
        }
        self.join();
        JobResult {
            outcome: outcome
                .unwrap_or_else(|| JobOutcome::failed("worker exited without a result")),
            data,
        }
    }

    pub fn wait(self) -> JobResult {
        self.wait_with(|_| {})
    }

    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("{} worker panicked", self.kind);
            }
        }
    }
}

struct Worker {
    factory: Arc<dyn AdapterFactory>,
    shared: Arc<Mutex<Shared>>,
    settle_time: Duration,
    cancel: CancelToken,
}

impl Worker {
    fn run(self, job: TransferJob, config: SessionConfig, sink: Arc<dyn EventSink>) {
        let _idle = IdleGuard(Arc::clone(&self.shared));
        let mut reporter = Reporter::new(Arc::clone(&sink));
        let kind = job.kind;

        // 打开、传输和复位中的 panic 都在这里收敛为失败结果
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(&job, &config, &mut reporter)
        }))
        .unwrap_or_else(|payload| Err(unexpected_fault(payload.as_ref())));

        let outcome = match result {
            Ok(data) => {
                if let Some(bytes) = data {
                    reporter.emit(JobEvent::DataReady(bytes));
                }
                JobOutcome::completed(format!("{} completed successfully!", title(kind)))
            }
            Err(e) if e.is_cancelled() => {
                reporter.log(format!("{} {}", title(kind), e));
                JobOutcome::cancelled(format!("{} {}", title(kind), e))
            }
            Err(e) => {
                reporter.log(format!("Error: {}", e));
                JobOutcome::failed(format!("Error: {}", e))
            }
        };

        {
            let mut shared = lock(&self.shared);
            shared.state = ControllerState::Idle;
            shared.cancel = None;
            shared.last_status = Some(outcome.status);
        }
        sink.emit(JobEvent::Complete(outcome));
    }

    /// 打开会话、运行引擎并复位适配器
    ///
    /// 会话在返回或展开之前总会被复位一次。
    fn execute(
        &self,
        job: &TransferJob,
        config: &SessionConfig,
        reporter: &mut Reporter,
    ) -> Result<Option<Vec<u8>>> {
        reporter.log(format!("Connecting to Bus Pirate on {}...", config.port_name));
        let mut session = Session::open(self.factory.as_ref(), config)?;
        reporter.log(format!("Connected at {} mode", config.speed));

        let engine = TransferEngine::new(self.cancel.clone()).with_settle_time(self.settle_time);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.run(&mut session, job, &mut *reporter)
        }))
        .unwrap_or_else(|payload| Err(unexpected_fault(payload.as_ref())));

        reporter.log("Resetting Bus Pirate to normal mode...");
        match session.reset_to_normal() {
            Ok(()) => reporter.log("Bus Pirate reset to normal mode"),
            Err(e) => reporter.log(format!("Reset error: {}", e)),
        }
        result
    }
}

/// Returns the controller to idle if the worker unwinds past `run`.
struct IdleGuard(Arc<Mutex<Shared>>);

impl Drop for IdleGuard {
    fn drop(&mut self) {
        let mut shared = lock(&self.0);
        if shared.state != ControllerState::Idle {
            shared.state = ControllerState::Idle;
            shared.cancel = None;
            shared.last_status = Some(JobStatus::Failed);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

fn title(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Read => "Read",
        JobKind::Write => "Write",
        JobKind::Erase => "Erase",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

fn unexpected_fault(payload: &(dyn Any + Send)) -> Error {
    Error::protocol(format!("unexpected fault: {}", panic_message(payload)))
}
