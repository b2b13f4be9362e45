use crate::errors::*;
use crate::model::{MonitorResult, Severity, TestResult, Vulnerability};
use crate::resolve::{Report, TargetFailure};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::Write;

pub const EXIT_OK: i32 = 0;
pub const EXIT_VULNS_FOUND: i32 = 1;
pub const EXIT_FAILURE: i32 = 2;

const SEPARATOR: &str = "\n-------------------------------------------------------\n";

fn over_threshold(vuln: &Vulnerability, threshold: Option<Severity>) -> bool {
    threshold.map_or(true, |threshold| vuln.data.severity >= threshold)
}

/// Failures dominate, then any reported vulnerability.
pub fn test_exit_code(report: &Report<TestResult>, threshold: Option<Severity>) -> i32 {
    if !report.failures.is_empty() {
        EXIT_FAILURE
    } else if report
        .results
        .iter()
        .flat_map(|result| &result.vulnerabilities)
        .any(|vuln| over_threshold(vuln, threshold))
    {
        EXIT_VULNS_FOUND
    } else {
        EXIT_OK
    }
}

pub fn monitor_exit_code(report: &Report<MonitorResult>) -> i32 {
    if report.failures.is_empty() {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

fn format_vulnerability(out: &mut String, vuln: &Vulnerability) -> Result<()> {
    writeln!(
        out,
        "\u{2717} {} severity vulnerability found in {}",
        capitalize(&vuln.data.severity.to_string()),
        vuln.pkg_name
    )?;
    writeln!(out, "  Description: {}", vuln.data.title)?;
    writeln!(out, "  Info: {}", vuln.data.id)?;
    writeln!(out, "  Introduced through: {}", vuln.from.join(" > "))?;
    if let Some(fixed_in) = vuln.data.extra.get("fixedIn").and_then(Value::as_array) {
        let versions = fixed_in
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>();
        if !versions.is_empty() {
            writeln!(out, "  Fixed in: {}", versions.join(", "))?;
        }
    }
    writeln!(out)?;
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn format_test_result(result: &TestResult, threshold: Option<Severity>) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "\nTesting {}...\n", result.path)?;

    let mut shown = result
        .vulnerabilities
        .iter()
        .filter(|vuln| over_threshold(vuln, threshold))
        .collect::<Vec<_>>();
    shown.sort_by(|a, b| {
        a.data
            .severity
            .cmp(&b.data.severity)
            .then_with(|| a.data.id.cmp(&b.data.id))
    });
    for vuln in &shown {
        format_vulnerability(&mut out, vuln)?;
    }

    writeln!(out, "Package manager:   {}", result.package_manager)?;
    writeln!(out, "Project path:      {}", result.path)?;
    if result.filesystem_policy {
        writeln!(out, "Local policy:      yes")?;
    }
    writeln!(out)?;

    let ignored = result.filtered.issues.len();
    if shown.is_empty() {
        write!(
            out,
            "Tested {} dependencies for known issues, no vulnerable paths found.",
            result.dependency_count
        )?;
    } else {
        write!(
            out,
            "Tested {} dependencies for known issues, found {} issue(s), {} vulnerable path(s).",
            result.dependency_count,
            shown
                .iter()
                .map(|vuln| vuln.data.id.as_str())
                .collect::<BTreeSet<_>>()
                .len(),
            shown.len()
        )?;
    }
    if ignored > 0 {
        write!(out, " {} issue(s) ignored by policy.", ignored)?;
    }
    writeln!(out)?;
    Ok(out)
}

pub fn format_monitor_result(result: &MonitorResult) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "\nMonitoring {}...\n", result.path)?;
    if let Some(uri) = &result.uri {
        writeln!(out, "Explore this snapshot at {}", uri)?;
    }
    if let Some(name) = &result.project_name {
        writeln!(out, "Project name: {}", name)?;
    }
    writeln!(
        out,
        "\nNotifications about newly disclosed issues related to these dependencies will be emailed to you."
    )?;
    Ok(out)
}

fn format_failures(out: &mut String, failures: &[TargetFailure]) -> Result<()> {
    for failure in failures {
        write!(out, "{}", SEPARATOR)?;
        writeln!(out, "\n{}:\n\n{}", failure.path.display(), failure.error)?;
    }
    Ok(())
}

pub fn format_test_report(report: &Report<TestResult>, threshold: Option<Severity>) -> Result<String> {
    let mut sections = Vec::new();
    for result in &report.results {
        sections.push(format_test_result(result, threshold)?);
    }
    let mut out = sections.join(SEPARATOR);
    format_failures(&mut out, &report.failures)?;
    Ok(out)
}

pub fn format_monitor_report(report: &Report<MonitorResult>) -> Result<String> {
    let mut sections = Vec::new();
    for result in &report.results {
        sections.push(format_monitor_result(result)?);
    }
    let mut out = sections.join(SEPARATOR);
    format_failures(&mut out, &report.failures)?;
    Ok(out)
}

#[derive(Serialize)]
struct JsonReport<'a, T> {
    results: &'a [T],
    errors: &'a [TargetFailure],
}

pub fn format_json<T: Serialize>(report: &Report<T>) -> Result<String> {
    let json = serde_json::to_string_pretty(&JsonReport {
        results: &report.results,
        errors: &report.failures,
    })?;
    Ok(json)
}
