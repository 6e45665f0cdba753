//! Queue observability
//!
//! [`QueueMonitor`] attaches to an engine as its observer, keeps rolling
//! request metrics and raises threshold alerts. Reports and queue analyses
//! are plain serde values so they can be logged or written out as JSON.

pub mod stress;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{Error, Result, MAX_QUEUE_SIZE};
use crate::engine::{EngineHandle, EngineObserver};
use crate::protocol::{RequestId, RequestInfo};
use crate::util::duration_to_millis;

/// Alert limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Queue length above which the queue counts as nearly full
    pub queue_near_full: usize,
    /// Rolling average latency above which responses count as slow
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub max_avg_latency: Duration,
    /// Retransmissions per request above which the link counts as lossy
    pub max_timeout_rate: f64,
    /// Queue length at which requests are assumed not to be released
    pub leak_threshold: usize,
    /// Number of latencies kept for the rolling average
    pub response_window: usize,
}

impl Thresholds {
    /// Production limits for a queue of `max_queue_size`
    pub fn normal(max_queue_size: usize) -> Self {
        Thresholds {
            queue_near_full: max_queue_size * 8 / 10,
            max_avg_latency: Duration::from_millis(2000),
            max_timeout_rate: 0.1,
            leak_threshold: max_queue_size.max(1),
            response_window: 100,
        }
    }

    /// Low limits that trip easily, for exercising the alert path
    pub fn testing() -> Self {
        Thresholds {
            queue_near_full: 1,
            max_avg_latency: Duration::from_millis(100),
            max_timeout_rate: 0.01,
            leak_threshold: 5,
            response_window: 100,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds::normal(MAX_QUEUE_SIZE)
    }
}

/// Alert conditions currently in force
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertFlags {
    pub queue_near_full: bool,
    pub high_timeout_rate: bool,
    pub slow_responses: bool,
    pub suspected_leak: bool,
}

impl AlertFlags {
    pub fn active(&self) -> usize {
        [
            self.queue_near_full,
            self.high_timeout_rate,
            self.slow_responses,
            self.suspected_leak,
        ]
        .iter()
        .filter(|&&flag| flag)
        .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    Warning,
    Critical,
}

impl Health {
    fn from_alerts(active: usize) -> Self {
        match active {
            0 => Health::Healthy,
            1..=2 => Health::Warning,
            _ => Health::Critical,
        }
    }
}

#[derive(Debug, Default)]
struct Metrics {
    total_requests: u64,
    completed: u64,
    failed: u64,
    /// Retransmissions after a response timeout
    timeouts: u64,
    duplicates: u64,
    queue_full: u64,
    unmatched_frames: u64,
    peak_queue_len: usize,
    queue_len: usize,
    max_latency: Duration,
    latencies: VecDeque<Duration>,
    requests_by_code: BTreeMap<u16, u64>,
    errors_by_kind: BTreeMap<String, u64>,
}

impl Metrics {
    fn avg_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        self.latencies.iter().sum::<Duration>() / self.latencies.len() as u32
    }

    fn rate(&self, count: u64) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            count as f64 / self.total_requests as f64
        }
    }
}

/// Snapshot published to subscribers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub monitoring: bool,
    pub queue_len: usize,
    pub max_queue_size: usize,
    pub peak_queue_len: usize,
    pub total_requests: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub duplicates: u64,
    pub queue_full_rejections: u64,
    pub unmatched_frames: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub success_rate: f64,
    pub timeout_rate: f64,
    pub alerts: AlertFlags,
    pub requests_by_code: BTreeMap<u16, u64>,
    pub errors_by_kind: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgeBuckets {
    /// Under 1 s
    pub fresh: usize,
    /// 1 s to 5 s
    pub recent: usize,
    /// 5 s to 10 s
    pub stale: usize,
    pub ancient: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryBuckets {
    pub first_attempt: usize,
    pub retrying: usize,
    pub multiple_retries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueAnalysis {
    pub total: usize,
    pub by_code: BTreeMap<u16, usize>,
    pub ages: AgeBuckets,
    pub retries: RetryBuckets,
    pub potential_issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub generated_at: DateTime<Utc>,
    pub health: Health,
    pub grade: char,
    pub recommendations: Vec<String>,
    pub status: MonitorStatus,
    pub analysis: QueueAnalysis,
}

struct Inner {
    thresholds: Thresholds,
    max_queue_size: usize,
    metrics: Metrics,
    alerts: AlertFlags,
    monitoring: bool,
}

impl Inner {
    fn status(&self) -> MonitorStatus {
        let m = &self.metrics;
        MonitorStatus {
            monitoring: self.monitoring,
            queue_len: m.queue_len,
            max_queue_size: self.max_queue_size,
            peak_queue_len: m.peak_queue_len,
            total_requests: m.total_requests,
            completed: m.completed,
            failed: m.failed,
            timeouts: m.timeouts,
            duplicates: m.duplicates,
            queue_full_rejections: m.queue_full,
            unmatched_frames: m.unmatched_frames,
            avg_latency_ms: duration_to_millis(m.avg_latency()),
            max_latency_ms: duration_to_millis(m.max_latency),
            success_rate: m.rate(m.completed),
            timeout_rate: m.rate(m.timeouts),
            alerts: self.alerts,
            requests_by_code: m.requests_by_code.clone(),
            errors_by_kind: m.errors_by_kind.clone(),
        }
    }

    /// Re-evaluates every alert, logging the ones that just became active
    fn check_alerts(&mut self) {
        let m = &self.metrics;
        let t = &self.thresholds;
        let next = AlertFlags {
            queue_near_full: m.queue_len > t.queue_near_full,
            high_timeout_rate: m.rate(m.timeouts) > t.max_timeout_rate,
            slow_responses: m.avg_latency() > t.max_avg_latency,
            suspected_leak: m.queue_len > 0 && m.queue_len >= t.leak_threshold,
        };
        let previous = self.alerts;

        if next.queue_near_full && !previous.queue_near_full {
            warn!(queue_len = m.queue_len, limit = t.queue_near_full, "Queue nearly full");
        }
        if next.high_timeout_rate && !previous.high_timeout_rate {
            warn!(rate = m.rate(m.timeouts), "High timeout rate");
        }
        if next.slow_responses && !previous.slow_responses {
            warn!(avg_ms = duration_to_millis(m.avg_latency()), "Slow responses");
        }
        if next.suspected_leak && !previous.suspected_leak {
            warn!(queue_len = m.queue_len, "Requests are not being released");
        }
        self.alerts = next;
    }

    fn grade(&self) -> char {
        let m = &self.metrics;
        let mut score = 100i32;

        let timeout_rate = m.rate(m.timeouts);
        if timeout_rate > 0.1 {
            score -= 30;
        } else if timeout_rate > 0.05 {
            score -= 15;
        }

        let avg = m.avg_latency();
        if avg > Duration::from_millis(2000) {
            score -= 25;
        } else if avg > Duration::from_millis(1000) {
            score -= 10;
        }

        let fill = m.queue_len as f64 / self.max_queue_size.max(1) as f64;
        if fill > 0.8 {
            score -= 20;
        } else if fill > 0.6 {
            score -= 10;
        }

        if m.rate(m.failed) > 0.05 {
            score -= 15;
        }

        match score {
            90..=i32::MAX => 'A',
            80..=89 => 'B',
            70..=79 => 'C',
            60..=69 => 'D',
            _ => 'F',
        }
    }

    fn recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.alerts.queue_near_full {
            out.push("Queue is near capacity; spread requests out or raise max_queue_size".to_string());
        }
        if self.alerts.high_timeout_rate {
            out.push("High timeout rate; check the serial link or raise request_timeout".to_string());
        }
        if self.alerts.slow_responses {
            out.push("Slow responses; poll less often or check controller load".to_string());
        }
        if self.alerts.suspected_leak {
            out.push("Requests are accumulating; check that every submission is answered".to_string());
        }
        if self.metrics.max_latency > Duration::from_secs(5) {
            out.push("Some requests took over 5 s to complete".to_string());
        }
        out
    }
}

/// Rolling metrics and alerts for one engine
pub struct QueueMonitor {
    inner: Mutex<Inner>,
    status_tx: watch::Sender<MonitorStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl QueueMonitor {
    pub fn new(thresholds: Thresholds, max_queue_size: usize) -> Arc<Self> {
        let inner = Inner {
            thresholds,
            max_queue_size,
            metrics: Metrics::default(),
            alerts: AlertFlags::default(),
            monitoring: false,
        };
        let (status_tx, _) = watch::channel(inner.status());
        Arc::new(QueueMonitor {
            inner: Mutex::new(inner),
            status_tx,
            task: Mutex::new(None),
        })
    }

    /// Monitor sized for the engine behind `handle`
    pub fn for_engine(handle: &EngineHandle) -> Arc<Self> {
        let size = handle.config().max_queue_size;
        QueueMonitor::new(Thresholds::normal(size), size)
    }

    /// Attaches to the engine. Attaching twice is a no-op.
    pub async fn instrument(self: &Arc<Self>, handle: &EngineHandle) -> Result<()> {
        let observer: Arc<dyn EngineObserver> = self.clone();
        handle.attach_observer(observer).await
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // metrics stay usable after a panicking observer call
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `update`, re-checks alerts and publishes the new status
    fn record(&self, update: impl FnOnce(&mut Metrics)) {
        let status = {
            let mut inner = self.lock();
            update(&mut inner.metrics);
            inner.check_alerts();
            inner.status()
        };
        self.status_tx.send_replace(status);
    }

    fn publish(&self) {
        let status = self.lock().status();
        self.status_tx.send_replace(status);
    }

    pub fn status(&self) -> MonitorStatus {
        self.lock().status()
    }

    pub fn alerts(&self) -> AlertFlags {
        self.lock().alerts
    }

    pub fn thresholds(&self) -> Thresholds {
        self.lock().thresholds.clone()
    }

    pub fn set_thresholds(&self, thresholds: Thresholds) {
        {
            let mut inner = self.lock();
            inner.thresholds = thresholds;
            inner.check_alerts();
        }
        self.publish();
    }

    /// Status updates, one per recorded event
    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status_tx.subscribe()
    }

    /// Groups outstanding requests by age, retries and code
    pub fn analyze_queue(&self, requests: &[RequestInfo]) -> QueueAnalysis {
        let mut analysis = QueueAnalysis {
            total: requests.len(),
            ..QueueAnalysis::default()
        };
        for request in requests {
            *analysis.by_code.entry(request.code).or_default() += 1;

            match request.age {
                age if age < Duration::from_secs(1) => analysis.ages.fresh += 1,
                age if age < Duration::from_secs(5) => analysis.ages.recent += 1,
                age if age < Duration::from_secs(10) => analysis.ages.stale += 1,
                _ => analysis.ages.ancient += 1,
            }

            match request.attempts {
                0 | 1 => analysis.retries.first_attempt += 1,
                2 => analysis.retries.retrying += 1,
                _ => analysis.retries.multiple_retries += 1,
            }

            if request.age >= Duration::from_secs(10) {
                analysis.potential_issues.push(format!(
                    "Ancient request: code {}, age {}s",
                    request.code,
                    request.age.as_secs()
                ));
            }
            if request.attempts > 5 {
                analysis.potential_issues.push(format!(
                    "High retry count: code {}, attempts {}",
                    request.code, request.attempts
                ));
            }
            if request.state == "pending" {
                analysis
                    .potential_issues
                    .push(format!("No timer armed: code {}", request.code));
            }
        }
        analysis
    }

    pub fn report(&self, requests: &[RequestInfo]) -> MonitorReport {
        let analysis = self.analyze_queue(requests);
        let inner = self.lock();
        MonitorReport {
            generated_at: Utc::now(),
            health: Health::from_alerts(inner.alerts.active()),
            grade: inner.grade(),
            recommendations: inner.recommendations(),
            status: inner.status(),
            analysis,
        }
    }

    /// Clears metrics; alerts stay until their condition is re-checked
    pub fn reset_metrics(&self) {
        self.lock().metrics = Metrics::default();
        self.publish();
    }

    pub fn clear_alerts(&self) {
        debug!("Clearing monitor alerts");
        self.lock().alerts = AlertFlags::default();
        self.publish();
    }

    pub fn reset_all(&self) {
        {
            let mut inner = self.lock();
            inner.metrics = Metrics::default();
            inner.alerts = AlertFlags::default();
        }
        self.publish();
    }

    /// Polls the engine queue every `interval` and re-checks alerts.
    /// Returns false when monitoring was already running.
    pub fn start_monitoring(self: &Arc<Self>, handle: EngineHandle, interval: Duration) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return false;
        }
        self.lock().monitoring = true;
        info!(interval_ms = interval.as_millis() as u64, "Queue monitoring started");

        let monitor = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match handle.pending().await {
                    Ok(requests) => monitor.record(|m| m.queue_len = requests.len()),
                    Err(Error::EngineStopped) => {
                        debug!("Engine stopped, ending queue monitoring");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Queue poll failed"),
                }
            }
            monitor.lock().monitoring = false;
            monitor.publish();
        }));
        true
    }

    /// Returns true when a monitoring task was stopped
    pub fn stop_monitoring(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.lock().monitoring = false;
        self.publish();
        match task {
            Some(task) => {
                task.abort();
                info!("Queue monitoring stopped");
                true
            }
            None => false,
        }
    }
}

impl EngineObserver for QueueMonitor {
    fn on_submit(&self, _id: RequestId, code: u16, queue_len: usize) {
        self.record(|m| {
            m.total_requests += 1;
            *m.requests_by_code.entry(code).or_default() += 1;
            m.queue_len = queue_len;
            m.peak_queue_len = m.peak_queue_len.max(queue_len);
        });
    }

    fn on_rejected(&self, code: u16, error: &Error) {
        self.record(|m| {
            m.total_requests += 1;
            *m.requests_by_code.entry(code).or_default() += 1;
            match error {
                Error::DuplicateRequest { .. } => m.duplicates += 1,
                Error::QueueFull { .. } => m.queue_full += 1,
                _ => {}
            }
            m.failed += 1;
            *m.errors_by_kind.entry(error.kind().to_string()).or_default() += 1;
        });
    }

    fn on_transmit(&self, _id: RequestId, _code: u16, attempt: u32) {
        if attempt > 1 {
            self.record(|m| m.timeouts += 1);
        }
    }

    fn on_complete(&self, _id: RequestId, _code: u16, latency: Duration, _attempts: u32) {
        let window = self.lock().thresholds.response_window.max(1);
        self.record(|m| {
            m.completed += 1;
            m.latencies.push_back(latency);
            while m.latencies.len() > window {
                m.latencies.pop_front();
            }
            m.max_latency = m.max_latency.max(latency);
        });
    }

    fn on_failure(&self, _id: RequestId, _code: u16, error: &Error) {
        self.record(|m| {
            m.failed += 1;
            *m.errors_by_kind.entry(error.kind().to_string()).or_default() += 1;
        });
    }

    fn on_unmatched(&self, _code: u16) {
        self.record(|m| m.unmatched_frames += 1);
    }

    fn on_queue_len(&self, queue_len: usize) {
        self.record(|m| {
            m.queue_len = queue_len;
            m.peak_queue_len = m.peak_queue_len.max(queue_len);
        });
    }
}
