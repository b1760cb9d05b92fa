// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Polling for long-running middleware jobs.
//!
//! Job-returning methods answer with an integer job id right away; the
//! outcome is read back through `core.get_jobs` until the job reaches a
//! terminal state or the attempt budget runs out.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::TrueNasClient;
use crate::error::Result;

const GET_JOBS: &str = "core.get_jobs";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_ATTEMPTS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Waiting,
    Running,
    Success,
    Failed,
    Aborted,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobProgress {
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One entry of a `core.get_jobs` answer. Unlisted fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Job {
    pub id: u64,
    #[serde(default)]
    pub method: String,
    pub state: JobState,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Option<JobProgress>,
}

impl Job {
    /// The final outcome, or `None` while the job is still going.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.state {
            JobState::Success => Some(JobOutcome::Success(self.result.clone().unwrap_or(Value::Null))),
            JobState::Failed => Some(JobOutcome::Failed(
                self.error.clone().unwrap_or_else(|| "job failed".to_owned()),
            )),
            JobState::Aborted => Some(JobOutcome::Aborted),
            JobState::Waiting | JobState::Running | JobState::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(Value),
    Failed(String),
    Aborted,
    /// The attempt budget ran out before the job finished.
    TimedOut,
}

pub struct JobPoller {
    client: TrueNasClient,
    interval: Duration,
    max_attempts: u32,
}

impl JobPoller {
    pub fn new(client: TrueNasClient) -> Self {
        Self { client, interval: DEFAULT_INTERVAL, max_attempts: DEFAULT_MAX_ATTEMPTS }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Poll `job_id` until it finishes. Call errors end the wait immediately.
    pub async fn wait(&self, job_id: u64) -> Result<JobOutcome> {
        let debug = self.client.config().enable_debug_logging;
        for attempt in 1..=self.max_attempts {
            let jobs: Vec<Job> =
                self.client.call(GET_JOBS, vec![json!([["id", "=", job_id]])]).await?;
            match jobs.iter().find(|job| job.id == job_id) {
                Some(job) => {
                    if let Some(outcome) = job.outcome() {
                        info!(job_id, state = ?job.state, "job finished");
                        return Ok(outcome);
                    }
                    let percent = job.progress.as_ref().and_then(|p| p.percent);
                    diag!(debug, job_id, attempt, state = ?job.state, ?percent, "job pending");
                }
                None => diag!(debug, job_id, attempt, "job not listed yet"),
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        warn!(job_id, attempts = self.max_attempts, "job wait timed out");
        Ok(JobOutcome::TimedOut)
    }

    /// Start a job-returning method and wait for its outcome.
    pub async fn call_job(&self, method: &str, params: Vec<Value>) -> Result<JobOutcome> {
        let job_id: u64 = self.client.call(method, params).await?;
        info!(job_id, method, "job started");
        self.wait(job_id).await
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
