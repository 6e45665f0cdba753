//! Load scenarios for a live engine
//!
//! Each scenario drives the engine through its public handle, tallies how
//! every submission ended and checks that the queue drains afterwards.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::core::{Error, Result};
use crate::engine::EngineHandle;
use crate::protocol::message as codes;
use crate::protocol::Frame;
use super::{MonitorReport, QueueMonitor};

/// Scenario sizes and pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// Read codes the load is spread over
    pub codes: Vec<u16>,
    /// Code the controller is expected to leave unanswered
    pub silent_code: u16,
    pub rapid_fire_count: usize,
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub rapid_fire_interval: Duration,
    pub duplicate_count: usize,
    pub mixed_count: usize,
    /// Submissions past queue capacity in the flooding scenarios
    pub overflow_margin: usize,
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub load_duration: Duration,
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub load_interval: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        StressConfig {
            codes: vec![
                codes::STATUS,
                codes::ATTITUDE,
                codes::ANALOG,
                codes::RC,
                codes::MOTOR,
                codes::RAW_IMU,
                codes::ALTITUDE,
            ],
            silent_code: 0x3FFF,
            rapid_fire_count: 20,
            rapid_fire_interval: Duration::from_millis(10),
            duplicate_count: 5,
            mixed_count: 15,
            overflow_margin: 10,
            load_duration: Duration::from_secs(5),
            load_interval: Duration::from_millis(50),
        }
    }
}

/// How the submissions of one scenario ended
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub succeeded: usize,
    pub duplicates: usize,
    pub queue_full: usize,
    pub timeouts: usize,
    pub resets: usize,
    pub other: usize,
}

impl Tally {
    fn from_results<'a>(results: impl IntoIterator<Item = &'a Result<Frame>>) -> Self {
        let mut tally = Tally::default();
        for result in results {
            match result {
                Ok(_) => tally.succeeded += 1,
                Err(Error::DuplicateRequest { .. }) => tally.duplicates += 1,
                Err(Error::QueueFull { .. }) => tally.queue_full += 1,
                Err(Error::Timeout { .. }) => tally.timeouts += 1,
                Err(Error::ConnectionReset) => tally.resets += 1,
                Err(_) => tally.other += 1,
            }
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.duplicates + self.queue_full + self.timeouts + self.resets + self.other
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: &'static str,
    pub passed: bool,
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    pub duration: Duration,
    pub tally: Tally,
    /// Requests still queued when the scenario ended
    pub leftover: usize,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub generated_at: DateTime<Utc>,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub grade: char,
    pub scenarios: Vec<ScenarioResult>,
    pub monitor: MonitorReport,
}

fn grade(pass_rate: f64) -> char {
    match pass_rate {
        r if r >= 1.0 => 'A',
        r if r >= 0.9 => 'B',
        r if r >= 0.75 => 'C',
        r if r >= 0.6 => 'D',
        _ => 'F',
    }
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

pub struct StressTest {
    handle: EngineHandle,
    monitor: Arc<QueueMonitor>,
    config: StressConfig,
}

impl StressTest {
    pub fn new(handle: EngineHandle, config: StressConfig) -> Self {
        let monitor = QueueMonitor::for_engine(&handle);
        StressTest::with_monitor(handle, monitor, config)
    }

    pub fn with_monitor(handle: EngineHandle, monitor: Arc<QueueMonitor>, config: StressConfig) -> Self {
        StressTest { handle, monitor, config }
    }

    pub fn monitor(&self) -> &Arc<QueueMonitor> {
        &self.monitor
    }

    fn code(&self, i: usize) -> u16 {
        match self.config.codes.len() {
            0 => codes::STATUS,
            n => self.config.codes[i % n],
        }
    }

    fn capacity(&self) -> usize {
        self.handle.config().max_queue_size
    }

    /// Runs every scenario in turn, resetting monitor metrics in between
    pub async fn run_all(&self) -> Result<StressReport> {
        self.monitor.instrument(&self.handle).await?;
        info!("Starting stress suite");

        let mut scenarios = Vec::new();
        self.monitor.reset_all();
        scenarios.push(self.queue_flooding().await?);
        self.monitor.reset_all();
        scenarios.push(self.rapid_fire().await?);
        self.monitor.reset_all();
        scenarios.push(self.duplicate_handling().await?);
        self.monitor.reset_all();
        scenarios.push(self.timeout_recovery().await?);
        self.monitor.reset_all();
        scenarios.push(self.concurrent_mixed().await?);
        self.monitor.reset_all();
        scenarios.push(self.queue_overflow().await?);
        self.monitor.reset_all();
        scenarios.push(self.connection_disruption().await?);
        self.monitor.reset_all();
        scenarios.push(self.leak_check().await?);
        self.monitor.reset_all();
        scenarios.push(self.performance_under_load().await?);

        let passed = scenarios.iter().filter(|s| s.passed).count();
        let pass_rate = passed as f64 / scenarios.len() as f64;
        let report = StressReport {
            generated_at: Utc::now(),
            passed,
            failed: scenarios.len() - passed,
            pass_rate,
            grade: grade(pass_rate),
            scenarios,
            monitor: self.monitor.report(&self.handle.pending().await?),
        };
        info!(passed = report.passed, failed = report.failed, grade = %report.grade, "Stress suite finished");
        Ok(report)
    }

    async fn finish(
        &self,
        name: &'static str,
        started: Instant,
        results: &[Result<Frame>],
        passed: impl FnOnce(&Tally) -> bool,
        notes: Vec<String>,
    ) -> Result<ScenarioResult> {
        let tally = Tally::from_results(results);
        let leftover = self.handle.pending().await?.len();
        let passed = leftover == 0 && passed(&tally);
        if !passed {
            warn!(scenario = name, ?tally, leftover, "Scenario failed");
        }
        Ok(ScenarioResult {
            name,
            passed,
            duration: started.elapsed(),
            tally,
            leftover,
            notes,
        })
    }

    /// Submits more distinct requests at once than the queue holds
    pub async fn queue_flooding(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let count = self.capacity() + self.config.overflow_margin;
        let results = join_all((0..count).map(|i| {
            self.handle
                .submit(self.code(i), (i as u16).to_le_bytes().to_vec())
        }))
        .await;
        self.finish("queue_flooding", started, &results, |t| t.other == 0, Vec::new())
            .await
    }

    /// Staggered submissions `rapid_fire_interval` apart
    pub async fn rapid_fire(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let interval = self.config.rapid_fire_interval;
        let results = join_all((0..self.config.rapid_fire_count).map(|i| {
            let handle = self.handle.clone();
            let code = self.code(i);
            async move {
                sleep(interval * i as u32).await;
                handle.submit(code, Vec::new()).await
            }
        }))
        .await;
        self.finish(
            "rapid_fire",
            started,
            &results,
            |t| t.succeeded > 0 && t.other == 0,
            Vec::new(),
        )
        .await
    }

    /// The same request several times at once; only one may be queued
    pub async fn duplicate_handling(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let code = self.code(0);
        let count = self.config.duplicate_count;
        let results = join_all((0..count).map(|_| self.handle.submit(code, vec![1u8, 2, 3]))).await;
        self.finish(
            "duplicate_handling",
            started,
            &results,
            |t| t.succeeded >= 1 && t.succeeded + t.duplicates == count,
            Vec::new(),
        )
        .await
    }

    /// A request that is never answered must time out without blocking later ones
    pub async fn timeout_recovery(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let silent = self.handle.submit(self.config.silent_code, Vec::new()).await;
        let mut notes = Vec::new();
        let silent_ok = match &silent {
            Err(Error::Timeout { attempts, .. }) => {
                notes.push(format!("silent request gave up after {} attempts", attempts));
                true
            }
            Err(Error::UnsupportedMessage { .. }) => {
                notes.push("controller rejected the silent code".to_string());
                true
            }
            other => {
                notes.push(format!("silent request ended unexpectedly: {:?}", other.as_ref().map(|f| f.code)));
                false
            }
        };
        let recovery = self.handle.submit(self.code(0), Vec::new()).await;
        let recovered = recovery.is_ok();
        self.finish(
            "timeout_recovery",
            started,
            &[recovery],
            |_| silent_ok && recovered,
            notes,
        )
        .await
    }

    /// Mixed codes with random payloads, all in flight together
    pub async fn concurrent_mixed(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let requests: Vec<(u16, Vec<u8>)> = (0..self.config.mixed_count)
            .map(|i| {
                let payload = if i % 3 == 0 { random_payload(4) } else { Vec::new() };
                (self.code(i), payload)
            })
            .collect();
        let results = join_all(
            requests
                .into_iter()
                .map(|(code, payload)| self.handle.submit(code, payload)),
        )
        .await;
        self.finish("concurrent_mixed", started, &results, |t| t.other == 0, Vec::new())
            .await
    }

    /// One code with distinct payloads past capacity; the excess must be refused, not lost
    pub async fn queue_overflow(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let count = self.capacity() + self.config.overflow_margin;
        let code = self.code(0);
        let results = join_all((0..count).map(|i| {
            self.handle
                .submit(code, (i as u16).to_le_bytes().to_vec())
        }))
        .await;
        let tally = Tally::from_results(&results);
        let notes = vec![format!("{} of {} refused as queue full", tally.queue_full, count)];
        self.finish(
            "queue_overflow",
            started,
            &results,
            |t| t.total() == count && t.duplicates == 0 && t.other == 0,
            notes,
        )
        .await
    }

    /// Resets the link with requests outstanding, then checks it still works
    pub async fn connection_disruption(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let pending: Vec<_> = (0..5)
            .map(|i| {
                let handle = self.handle.clone();
                let code = self.code(i);
                tokio::spawn(async move { handle.submit(code, vec![0xD1, i as u8]).await })
            })
            .collect();
        tokio::task::yield_now().await;
        let dropped = self.handle.reset().await?;

        let mut results = Vec::with_capacity(pending.len() + 1);
        for task in pending {
            results.push(task.await.unwrap_or(Err(Error::EngineStopped)));
        }
        let recovery = self.handle.submit(self.code(0), Vec::new()).await;
        let recovered = recovery.is_ok();
        results.push(recovery);

        self.finish(
            "connection_disruption",
            started,
            &results,
            |t| recovered && t.other == 0,
            vec![format!("reset dropped {} requests", dropped)],
        )
        .await
    }

    /// Sequential traffic must leave nothing behind
    pub async fn leak_check(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let mut results = Vec::new();
        for i in 0..10 {
            results.push(self.handle.submit(self.code(i), Vec::new()).await);
        }
        self.finish("leak_check", started, &results, |t| t.other == 0, Vec::new())
            .await
    }

    /// Steady polling for `load_duration`
    pub async fn performance_under_load(&self) -> Result<ScenarioResult> {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.config.load_interval);
        let mut tasks = Vec::new();
        let mut i = 0;
        while started.elapsed() < self.config.load_duration {
            ticker.tick().await;
            let handle = self.handle.clone();
            let code = self.code(i);
            tasks.push(tokio::spawn(async move { handle.submit(code, Vec::new()).await }));
            i += 1;
        }
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(task.await.unwrap_or(Err(Error::EngineStopped)));
        }
        let status = self.monitor.status();
        let notes = vec![format!(
            "{} requests, avg latency {:.1} ms",
            results.len(),
            status.avg_latency_ms
        )];
        self.finish(
            "performance_under_load",
            started,
            &results,
            |t| t.total() > 0 && t.succeeded as f64 / t.total() as f64 >= 0.9,
            notes,
        )
        .await
    }
}
