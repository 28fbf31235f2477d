use super::window::GateWindow;
use crate::domain::errors::ConfigurationError;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{join_all, select_all};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Longest single sleep while waiting for a window to open
const MAX_START_WAIT_STEP: Duration = Duration::from_secs(30);

/// Stop/continue policy consulted by an [`super::ExecutionGate`].
#[async_trait]
pub trait Gate: Send + Sync {
    /// Called once before the first unit of work
    async fn wait_until_start(&self) {}

    fn should_continue(&self) -> bool;

    /// Pause between iterations
    async fn sleep_tick(&self);

    fn on_job_finished(&self, _count: u64) {}
}

/// `0` means "no quota"
fn quota_from(value: Option<u64>) -> u64 {
    value.unwrap_or(0)
}

/// Time-window gate with an optional job quota.
///
/// Continues while `now < end` and, if a quota is set, while `done < quota`.
pub struct TimeWindowGate {
    window: GateWindow,
    poll_interval: Duration,
    quota: AtomicU64,
    done: AtomicU64,
}

impl TimeWindowGate {
    pub fn new(window: GateWindow, poll_interval: Duration) -> Self {
        Self {
            window,
            poll_interval,
            quota: AtomicU64::new(0),
            done: AtomicU64::new(0),
        }
    }

    pub fn with_quota(self, quota: Option<u64>) -> Self {
        self.quota.store(quota_from(quota), Ordering::SeqCst);
        self
    }

    pub fn window(&self) -> &GateWindow {
        &self.window
    }

    pub fn set_quota(&self, quota: Option<u64>) {
        self.quota.store(quota_from(quota), Ordering::SeqCst);
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::SeqCst)
    }

    /// Time left until the window closes, zero once it has
    pub fn remaining(&self) -> Duration {
        self.window.until_end(Utc::now())
    }
}

#[async_trait]
impl Gate for TimeWindowGate {
    async fn wait_until_start(&self) {
        let mut logged = false;
        loop {
            let now = Utc::now();
            if self.window.has_started(now) {
                return;
            }
            let wait = self.window.until_start(now);
            if !logged {
                info!(
                    "TimeWindowGate: Waiting to start at {} ({:.1}s from now)",
                    self.window.start(),
                    wait.as_secs_f64()
                );
                logged = true;
            }
            tokio::time::sleep(wait.min(MAX_START_WAIT_STEP)).await;
        }
    }

    fn should_continue(&self) -> bool {
        if self.window.has_ended(Utc::now()) {
            return false;
        }
        let quota = self.quota.load(Ordering::SeqCst);
        quota == 0 || self.done.load(Ordering::SeqCst) < quota
    }

    async fn sleep_tick(&self) {
        if !self.should_continue() {
            return;
        }
        tokio::time::sleep(self.poll_interval.min(self.remaining())).await;
    }

    fn on_job_finished(&self, count: u64) {
        self.done.fetch_add(count, Ordering::SeqCst);
    }
}

/// Stops once `quota` jobs have been reported. No quota (or zero) never stops on count.
pub struct JobQuotaGate {
    quota: AtomicU64,
    done: AtomicU64,
    poll_interval: Duration,
}

impl JobQuotaGate {
    pub fn new(quota: Option<u64>, poll_interval: Duration) -> Self {
        Self {
            quota: AtomicU64::new(quota_from(quota)),
            done: AtomicU64::new(0),
            poll_interval,
        }
    }

    pub fn set_quota(&self, quota: Option<u64>) {
        self.quota.store(quota_from(quota), Ordering::SeqCst);
    }

    pub fn quota(&self) -> Option<u64> {
        match self.quota.load(Ordering::SeqCst) {
            0 => None,
            q => Some(q),
        }
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gate for JobQuotaGate {
    fn should_continue(&self) -> bool {
        match self.quota() {
            None => true,
            Some(quota) => self.done() < quota,
        }
    }

    async fn sleep_tick(&self) {
        if self.should_continue() {
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn on_job_finished(&self, count: u64) {
        if self.quota().is_some() {
            self.done.fetch_add(count, Ordering::SeqCst);
        }
    }
}

fn require_children(
    kind: &str,
    gates: Vec<Arc<dyn Gate>>,
) -> Result<Vec<Arc<dyn Gate>>, ConfigurationError> {
    if gates.is_empty() {
        return Err(ConfigurationError::InvalidValue {
            field: kind.to_string(),
            reason: "requires at least one gate".to_string(),
        });
    }
    Ok(gates)
}

/// Continues only while every child continues.
pub struct AllGate {
    gates: Vec<Arc<dyn Gate>>,
}

impl AllGate {
    pub fn new(gates: Vec<Arc<dyn Gate>>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            gates: require_children("AllGate", gates)?,
        })
    }
}

#[async_trait]
impl Gate for AllGate {
    async fn wait_until_start(&self) {
        for gate in &self.gates {
            gate.wait_until_start().await;
        }
    }

    fn should_continue(&self) -> bool {
        self.gates.iter().all(|g| g.should_continue())
    }

    // Any child stopping stops the composite, so the shortest child tick bounds the pause
    async fn sleep_tick(&self) {
        select_all(self.gates.iter().map(|g| g.sleep_tick())).await;
    }

    fn on_job_finished(&self, count: u64) {
        for gate in &self.gates {
            gate.on_job_finished(count);
        }
    }
}

/// Continues while any child continues.
pub struct AnyGate {
    gates: Vec<Arc<dyn Gate>>,
}

impl AnyGate {
    pub fn new(gates: Vec<Arc<dyn Gate>>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            gates: require_children("AnyGate", gates)?,
        })
    }
}

#[async_trait]
impl Gate for AnyGate {
    async fn wait_until_start(&self) {
        for gate in &self.gates {
            gate.wait_until_start().await;
        }
    }

    fn should_continue(&self) -> bool {
        self.gates.iter().any(|g| g.should_continue())
    }

    async fn sleep_tick(&self) {
        join_all(
            self.gates
                .iter()
                .filter(|g| g.should_continue())
                .map(|g| g.sleep_tick()),
        )
        .await;
    }

    fn on_job_finished(&self, count: u64) {
        for gate in &self.gates {
            gate.on_job_finished(count);
        }
    }
}

/// Time window plus job budget: stops at `end` or once the quota is consumed.
pub struct TimeAndJobGate {
    pub time: Arc<TimeWindowGate>,
    pub jobs: Arc<JobQuotaGate>,
    pub gate: Arc<AllGate>,
}

pub fn make_time_and_job_gate(
    window: GateWindow,
    quota: Option<u64>,
    poll_interval: Duration,
) -> TimeAndJobGate {
    let time = Arc::new(TimeWindowGate::new(window, poll_interval));
    let jobs = Arc::new(JobQuotaGate::new(quota, poll_interval));
    let gate = Arc::new(AllGate {
        gates: vec![time.clone() as Arc<dyn Gate>, jobs.clone() as Arc<dyn Gate>],
    });
    TimeAndJobGate { time, jobs, gate }
}
