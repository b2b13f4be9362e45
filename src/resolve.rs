use crate::api::Api;
use crate::assemble;
use crate::errors::*;
use crate::facts::Target;
use crate::filter;
use crate::model::{IssuesResult, MonitorRequest, MonitorResult, ScanResult, Tag, TestResult};
use crate::policy::{self, Policy};
use crate::polling::{self, LinearBackoff, MonitorFlow, SubmitOutcome, TestFlow};
use crate::unmanaged;
use chrono::Utc;
use serde::Serialize;
use std::mem;
use std::path::PathBuf;

/// How scan facts are turned into issues.
#[derive(Debug, Clone, PartialEq)]
pub enum TestStrategy {
    /// Submit to the test endpoint and poll the job if it answers with a token.
    Jobs,
    /// Resolve file signatures through the depgraph endpoints.
    Unmanaged(LinearBackoff),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorOptions {
    pub project_name: Option<String>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a run over several targets. Failures of single targets are
/// collected, results of the others are still reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Report<T> {
    pub results: Vec<T>,
    pub failures: Vec<TargetFailure>,
}

impl<T> Default for Report<T> {
    fn default() -> Self {
        Report {
            results: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> Report<T> {
    /// Add failures raised outside of the run, keeping all failures in the
    /// order their paths appear in `order`.
    pub fn merge_failures(&mut self, failures: Vec<TargetFailure>, order: &[PathBuf]) {
        self.failures.extend(failures);
        self.failures.sort_by_key(|failure| {
            order
                .iter()
                .position(|path| *path == failure.path)
                .unwrap_or(order.len())
        });
    }

    fn record(&mut self, path: &std::path::Path, err: Error) -> Result<()> {
        if is_run_fatal(&err) {
            return Err(err);
        }
        error!("{:#}", err);
        self.failures.push(TargetFailure {
            path: path.to_path_buf(),
            error: format!("{:#}", err),
        });
        Ok(())
    }
}

async fn fetch_issues(
    api: &dyn Api,
    scan_result: &ScanResult,
    strategy: &TestStrategy,
) -> Result<IssuesResult> {
    if scan_result.is_empty() {
        bail!("No dependency facts to submit");
    }

    match strategy {
        TestStrategy::Jobs => {
            let body = api.submit_test(scan_result).await?;
            match polling::classify_submission(&TestFlow, body)? {
                SubmitOutcome::Immediate(result) => Ok(result),
                SubmitOutcome::Async {
                    token,
                    polling_task,
                } => {
                    debug!(
                        "Received job token {} (poll every {:?}, at most {} times)",
                        token, polling_task.poll_interval, polling_task.max_attempts
                    );
                    let result =
                        polling::poll_until_done(api, &TestFlow, &token, &polling_task).await?;
                    Ok(result)
                }
            }
        }
        TestStrategy::Unmanaged(backoff) => unmanaged::resolve_issues(api, scan_result, backoff).await,
    }
}

/// Submit one scan result, wait for its issues and apply the policy.
pub async fn test_scan_result(
    api: &dyn Api,
    path: &str,
    scan_result: &ScanResult,
    policy: Option<&Policy>,
    strategy: &TestStrategy,
) -> Result<TestResult> {
    let mut fetched = fetch_issues(api, scan_result, strategy).await?;
    let issues = mem::take(&mut fetched.issues);
    let issues_data = mem::take(&mut fetched.issues_data);
    let filtered = filter::filter_ignored_issues(issues, issues_data, policy, Utc::now());
    Ok(assemble::assemble_test_result(
        path,
        fetched,
        filtered,
        policy.is_some(),
    ))
}

/// Test every target in order. Authentication failures abort the run, any
/// other failure is recorded against its target.
pub async fn resolve_and_test_facts(
    api: &dyn Api,
    targets: &[Target],
    strategy: &TestStrategy,
) -> Result<Report<TestResult>> {
    let mut report = Report::default();
    for target in targets {
        info!("Testing dependencies in {:?}", target.path);
        let policy = match policy::load(&target.policy_dir).await {
            Ok(policy) => policy,
            Err(err) => {
                report.record(&target.path, err)?;
                continue;
            }
        };

        let path = target.path.display().to_string();
        for scan_result in &target.scan_results {
            match test_scan_result(api, &path, scan_result, policy.as_ref(), strategy).await {
                Ok(result) => report.results.push(result),
                Err(err) => report.record(
                    &target.path,
                    err.context(format!("Could not test dependencies in {}", path)),
                )?,
            }
        }
    }
    Ok(report)
}

pub fn monitor_request(
    scan_result: &ScanResult,
    policy: Option<&Policy>,
    options: &MonitorOptions,
) -> MonitorRequest {
    let mut scan_result = scan_result.clone();
    if let Some(name) = &options.project_name {
        scan_result.name = Some(name.clone());
    }
    if let Some(policy) = policy {
        scan_result.policy = Some(policy.raw.clone());
    }
    MonitorRequest {
        scan_result,
        method: "cli",
        project_name: options.project_name.clone(),
        tags: options.tags.clone(),
    }
}

pub async fn monitor_scan_result(
    api: &dyn Api,
    path: &str,
    scan_result: &ScanResult,
    policy: Option<&Policy>,
    options: &MonitorOptions,
) -> Result<MonitorResult> {
    if scan_result.is_empty() {
        bail!("No dependency facts to submit");
    }

    let request = monitor_request(scan_result, policy, options);
    let body = api.submit_monitor(&request).await?;
    let mut result = match polling::classify_submission(&MonitorFlow, body)? {
        SubmitOutcome::Immediate(result) => result,
        SubmitOutcome::Async {
            token,
            polling_task,
        } => {
            debug!("Received monitor job token {}", token);
            polling::poll_until_done(api, &MonitorFlow, &token, &polling_task).await?
        }
    };
    result.path = path.to_string();
    Ok(result)
}

/// Snapshot every target in order, with the same failure handling as
/// [`resolve_and_test_facts`].
pub async fn resolve_and_monitor_facts(
    api: &dyn Api,
    targets: &[Target],
    options: &MonitorOptions,
) -> Result<Report<MonitorResult>> {
    let mut report = Report::default();
    for target in targets {
        info!("Monitoring dependencies in {:?}", target.path);
        let policy = match policy::load(&target.policy_dir).await {
            Ok(policy) => policy,
            Err(err) => {
                report.record(&target.path, err)?;
                continue;
            }
        };

        let path = target.path.display().to_string();
        for scan_result in &target.scan_results {
            match monitor_scan_result(api, &path, scan_result, policy.as_ref(), options).await {
                Ok(result) => report.results.push(result),
                Err(err) => report.record(
                    &target.path,
                    err.context(format!("Could not monitor dependencies in {}", path)),
                )?,
            }
        }
    }
    Ok(report)
}
