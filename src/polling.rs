use crate::api::Api;
use crate::codec;
use crate::errors::*;
use crate::model::{IssuesResult, MonitorResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Ok,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobToken(pub String);

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Server supplied pacing for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingTask {
    #[serde(deserialize_with = "millis")]
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

/// The fields of a job response that decide its state.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub token: Option<String>,
    pub status: Option<String>,
    pub polling_task: Option<PollingTask>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub meta: Option<Value>,
    pub ok: Option<bool>,
    pub is_monitored: Option<bool>,
    pub code: Option<u16>,
    pub error: Option<Value>,
    pub message: Option<String>,
}

impl JobEnvelope {
    fn parse(body: &Value) -> Result<Self, PollError> {
        if !body.is_object() {
            return Err(PollError::Malformed(format!(
                "expected a json object, got {}",
                body
            )));
        }
        JobEnvelope::deserialize(body).map_err(|err| PollError::Malformed(err.to_string()))
    }

    fn job_status(&self) -> Result<Option<JobStatus>, PollError> {
        self.status
            .as_deref()
            .map(|status| {
                JobStatus::from_str(status)
                    .map_err(|_| PollError::Malformed(format!("unknown job status {:?}", status)))
            })
            .transpose()
    }

    fn error_text(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.error {
            Some(Value::String(error)) => error.clone(),
            Some(error) => error.to_string(),
            None => "no details given".to_string(),
        }
    }

    /// An error code inside an otherwise successful response.
    fn embedded_error(&self) -> Option<ApiError> {
        let code = self.code.filter(|code| *code >= 400)?;
        let status = StatusCode::from_u16(code).ok()?;
        Some(ApiError::from_status(status, self.error_text()))
    }
}

/// A poll response, decoded once.
#[derive(Debug)]
pub enum JobUpdate<T> {
    Pending(Option<JobStatus>),
    Failed { status: JobStatus, message: String },
    Done(T),
}

/// What a submission produced.
#[derive(Debug)]
pub enum SubmitOutcome<T> {
    Immediate(T),
    Async {
        token: JobToken,
        polling_task: PollingTask,
    },
}

/// The parts of the job protocol that differ between the test and monitor
/// endpoints: where to poll and what a finished job looks like.
#[async_trait]
pub trait JobFlow: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    async fn query(&self, api: &dyn Api, token: &JobToken) -> Result<Value, ApiError>;

    fn is_done(&self, envelope: &JobEnvelope) -> bool;

    fn decode(&self, body: Value) -> Result<Self::Output, PollError>;
}

/// Jobs of the test endpoint finish with `result` and `meta`.
pub struct TestFlow;

#[async_trait]
impl JobFlow for TestFlow {
    type Output = IssuesResult;

    fn name(&self) -> &'static str {
        "test"
    }

    async fn query(&self, api: &dyn Api, token: &JobToken) -> Result<Value, ApiError> {
        api.poll_test(&token.0).await
    }

    fn is_done(&self, envelope: &JobEnvelope) -> bool {
        envelope.result.is_some() && envelope.meta.is_some()
    }

    fn decode(&self, mut body: Value) -> Result<IssuesResult, PollError> {
        let result = body
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| PollError::Malformed("missing result".to_string()))?;
        codec::decode_issues_result(result)
            .map_err(|err| PollError::Malformed(format!("invalid test result: {}", err)))
    }
}

/// Jobs of the monitor endpoint finish with `ok` and `isMonitored`.
pub struct MonitorFlow;

#[async_trait]
impl JobFlow for MonitorFlow {
    type Output = MonitorResult;

    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn query(&self, api: &dyn Api, token: &JobToken) -> Result<Value, ApiError> {
        api.poll_monitor(&token.0).await
    }

    fn is_done(&self, envelope: &JobEnvelope) -> bool {
        envelope.ok == Some(true) && envelope.is_monitored == Some(true)
    }

    fn decode(&self, body: Value) -> Result<MonitorResult, PollError> {
        serde_json::from_value(codec::decode(body))
            .map_err(|err| PollError::Malformed(format!("invalid monitor result: {}", err)))
    }
}

pub fn classify_update<F: JobFlow + ?Sized>(
    flow: &F,
    body: Value,
) -> Result<JobUpdate<F::Output>, PollError> {
    let envelope = JobEnvelope::parse(&body)?;
    if flow.is_done(&envelope) {
        return flow.decode(body).map(JobUpdate::Done);
    }
    if let Some(err) = envelope.embedded_error() {
        return Err(err.into());
    }

    let status = envelope.job_status()?;
    if let Some(status) = status.filter(|status| status.is_failure()) {
        return Ok(JobUpdate::Failed {
            status,
            message: envelope.error_text(),
        });
    }

    if envelope.token.is_none() && status.is_none() && envelope.result.is_none() {
        return Err(PollError::Malformed(
            "response carries neither token, status nor result".to_string(),
        ));
    }

    Ok(JobUpdate::Pending(status))
}

pub fn classify_submission<F: JobFlow + ?Sized>(
    flow: &F,
    body: Value,
) -> Result<SubmitOutcome<F::Output>, PollError> {
    let envelope = JobEnvelope::parse(&body)?;
    if flow.is_done(&envelope) {
        return flow.decode(body).map(SubmitOutcome::Immediate);
    }
    if let Some(err) = envelope.embedded_error() {
        return Err(err.into());
    }

    match (envelope.token, envelope.polling_task) {
        (Some(token), Some(polling_task)) => Ok(SubmitOutcome::Async {
            token: JobToken(token),
            polling_task,
        }),
        (Some(_), None) => Err(PollError::Malformed(
            "job token without polling task".to_string(),
        )),
        (None, _) => Err(PollError::Malformed(
            "submission answered with neither a result nor a job token".to_string(),
        )),
    }
}

/// Poll `token` until the job finishes, fails, or `task.max_attempts` queries
/// went by without an answer. Queries are strictly sequential with
/// `task.poll_interval` between them.
pub async fn poll_until_done<F: JobFlow + ?Sized>(
    api: &dyn Api,
    flow: &F,
    token: &JobToken,
    task: &PollingTask,
) -> Result<F::Output, PollError> {
    let mut attempts = 0;
    while attempts < task.max_attempts {
        attempts += 1;
        let body = flow.query(api, token).await?;
        match classify_update(flow, body)? {
            JobUpdate::Done(output) => {
                debug!(
                    "Job {} ({}) finished after {} attempt(s)",
                    token,
                    flow.name(),
                    attempts
                );
                return Ok(output);
            }
            JobUpdate::Failed { status, message } => {
                return Err(PollError::Failed { status, message });
            }
            JobUpdate::Pending(status) => {
                debug!(
                    "Job {} ({}) not done yet (status={:?}, attempt {}/{})",
                    token,
                    flow.name(),
                    status,
                    attempts,
                    task.max_attempts
                );
                if attempts < task.max_attempts {
                    tokio::time::sleep(task.poll_interval).await;
                }
            }
        }
    }
    Err(PollError::Exhausted { attempts })
}

/// Capped linear backoff: the n-th wait is `min(min_interval * n, max_interval)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl LinearBackoff {
    pub fn interval(&self, attempt: u32) -> Duration {
        self.min_interval
            .saturating_mul(attempt)
            .min(self.max_interval)
    }
}
