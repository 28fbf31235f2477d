use super::controls::Gate;
use crate::domain::errors::ExtractError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How the gated work is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Work is called repeatedly on the caller's task
    Inline,
    /// Work is started once on its own task and supervised by polling
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    WaitingForStart,
    Running,
    Stopped,
}

impl GateState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => GateState::Idle,
            1 => GateState::WaitingForStart,
            2 => GateState::Running,
            _ => GateState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            GateState::Idle => 0,
            GateState::WaitingForStart => 1,
            GateState::Running => 2,
            GateState::Stopped => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub status: RunStatus,
    pub iterations: u64,
    pub jobs_done: u64,
}

/// One unit of inline work. Returns the number of jobs it completed.
#[async_trait]
pub trait InlineWork: Send {
    async fn run_once(&mut self) -> Result<u64, ExtractError>;
}

/// Handle given to detached work: cancellation signal plus job reporting.
#[derive(Clone)]
pub struct WorkerContext {
    cancel: CancellationToken,
    gate: Arc<dyn Gate>,
    jobs_done: Arc<AtomicU64>,
}

impl WorkerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn report_jobs(&self, count: u64) {
        if count > 0 {
            self.gate.on_job_finished(count);
            self.jobs_done.fetch_add(count, Ordering::SeqCst);
        }
    }
}

/// Runs work under a [`Gate`], either inline or on a supervised worker task.
///
/// Lifecycle is `Idle -> WaitingForStart -> Running -> Stopped`; a stopped gate never runs again.
pub struct ExecutionGate {
    name: String,
    gate: Arc<dyn Gate>,
    mode: RunMode,
    join_timeout: Duration,
    stop: CancellationToken,
    state: AtomicU8,
    jobs_done: Arc<AtomicU64>,
}

impl ExecutionGate {
    pub fn new(name: impl Into<String>, gate: Arc<dyn Gate>, mode: RunMode) -> Self {
        Self {
            name: name.into(),
            gate,
            mode,
            join_timeout: Duration::from_secs(10),
            stop: CancellationToken::new(),
            state: AtomicU8::new(GateState::Idle.as_u8()),
            jobs_done: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    /// Ties the gate to an external stop signal (e.g. the orchestrator's shutdown token)
    pub fn with_stop_token(mut self, parent: &CancellationToken) -> Self {
        self.stop = parent.child_token();
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn jobs_done(&self) -> u64 {
        self.jobs_done.load(Ordering::SeqCst)
    }

    pub fn should_continue(&self) -> bool {
        !self.stop.is_cancelled() && self.gate.should_continue()
    }

    /// Requests a cooperative stop of a running or waiting gate
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    fn set_state(&self, state: GateState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn outcome(&self, status: RunStatus, iterations: u64) -> GateOutcome {
        GateOutcome {
            status,
            iterations,
            jobs_done: self.jobs_done(),
        }
    }

    fn record_jobs(&self, count: u64) {
        if count > 0 {
            self.gate.on_job_finished(count);
            self.jobs_done.fetch_add(count, Ordering::SeqCst);
        }
    }

    /// Checks the skip conditions and waits for the window to open.
    /// Returns `false` when the work must not be invoked.
    async fn enter(&self) -> bool {
        if self.state() != GateState::Idle {
            warn!("ExecutionGate[{}]: Already used (state {:?}), skipping", self.name, self.state());
            return false;
        }
        if !self.should_continue() {
            warn!("ExecutionGate[{}]: Skipped, gate closed at invocation", self.name);
            self.set_state(GateState::Stopped);
            return false;
        }

        self.set_state(GateState::WaitingForStart);
        tokio::select! {
            _ = self.gate.wait_until_start() => {}
            _ = self.stop.cancelled() => {
                info!("ExecutionGate[{}]: Stop requested before start", self.name);
                self.set_state(GateState::Stopped);
                return false;
            }
        }

        self.set_state(GateState::Running);
        info!("ExecutionGate[{}]: Running ({:?})", self.name, self.mode);
        true
    }

    /// Sleeps one tick, waking early on a stop request
    async fn tick(&self) {
        tokio::select! {
            _ = self.gate.sleep_tick() => {}
            _ = self.stop.cancelled() => {}
        }
    }

    /// Repeatedly invokes `work` while the gate allows it.
    ///
    /// An error from `work` ends the run and is returned to the caller.
    pub async fn run_inline<W: InlineWork + ?Sized>(
        &self,
        work: &mut W,
    ) -> Result<GateOutcome, ExtractError> {
        if !self.enter().await {
            return Ok(self.outcome(RunStatus::Skipped, 0));
        }

        let mut iterations = 0;
        let result = loop {
            if !self.should_continue() {
                break Ok(());
            }
            match work.run_once().await {
                Ok(count) => {
                    iterations += 1;
                    self.record_jobs(count);
                }
                Err(e) => break Err(e),
            }
            if !self.should_continue() {
                break Ok(());
            }
            self.tick().await;
        };

        self.set_state(GateState::Stopped);
        match result {
            Ok(()) => {
                info!(
                    "ExecutionGate[{}]: Stopped after {} iterations, {} jobs done",
                    self.name,
                    iterations,
                    self.jobs_done()
                );
                Ok(self.outcome(RunStatus::Completed, iterations))
            }
            Err(e) => {
                error!("ExecutionGate[{}]: Work failed: {}", self.name, e);
                Err(e)
            }
        }
    }

    /// Starts `work` once on its own task and supervises it until the gate closes.
    ///
    /// On close the worker's token is cancelled and the worker is joined with the join timeout.
    /// A worker that ignores cancellation is reported as a hung shutdown and left to finish.
    pub async fn run_detached<F, Fut>(&self, work: F) -> Result<GateOutcome, ExtractError>
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = Result<(), ExtractError>> + Send + 'static,
    {
        if !self.enter().await {
            return Ok(self.outcome(RunStatus::Skipped, 0));
        }

        let ctx = WorkerContext {
            cancel: self.stop.child_token(),
            gate: self.gate.clone(),
            jobs_done: self.jobs_done.clone(),
        };
        let cancel = ctx.cancel.clone();
        let mut handle = tokio::spawn(work(ctx));

        let mut iterations = 0;
        while self.should_continue() && !handle.is_finished() {
            self.tick().await;
            iterations += 1;
        }

        cancel.cancel();
        match tokio::time::timeout(self.join_timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => {
                info!("ExecutionGate[{}]: Worker finished", self.name);
            }
            Ok(Ok(Err(e))) => {
                error!("ExecutionGate[{}]: Worker ended with error: {}", self.name, e);
            }
            Ok(Err(join_err)) => {
                error!("ExecutionGate[{}]: Worker task failed: {}", self.name, join_err);
            }
            Err(_) => {
                warn!(
                    "ExecutionGate[{}]: Hung shutdown, worker did not stop within {:?}",
                    self.name, self.join_timeout
                );
            }
        }

        self.set_state(GateState::Stopped);
        Ok(self.outcome(RunStatus::Completed, iterations))
    }
}
