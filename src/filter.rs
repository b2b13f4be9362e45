use crate::errors::*;
use crate::model::{Issue, IssuesData, Vulnerability};
use crate::policy::Policy;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Partition of one issue set by an ignore policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterResult {
    pub active: Vec<Issue>,
    pub suppressed: Vec<Issue>,
    /// Metadata of every issue id that still has an active occurrence, plus
    /// ids no issue refers to.
    pub active_data: IssuesData,
    /// Metadata of ids whose every occurrence got suppressed.
    pub suppressed_data: IssuesData,
    /// Suppressed issues in the shape of a vulnerability record.
    pub ignored: Vec<Vulnerability>,
}

/// Split `issues` into active and suppressed ones. An issue is suppressed by
/// the first rule for its id whose path is `*` or equals the issue's
/// dependency path and that has not expired at `now`.
pub fn filter_ignored_issues(
    issues: Vec<Issue>,
    issues_data: IssuesData,
    policy: Option<&Policy>,
    now: DateTime<Utc>,
) -> FilterResult {
    let policy = match policy {
        Some(policy) if !policy.is_empty() => policy,
        _ => {
            return FilterResult {
                active: issues,
                active_data: issues_data,
                ..Default::default()
            }
        }
    };

    let mut result = FilterResult::default();
    for issue in issues {
        let path = issue.dependency_path();
        if let Some(rule) = policy.matching_rule(&issue.issue_id, &path, now) {
            info!(
                "Ignoring {} in {} ({}: {})",
                issue.issue_id,
                path,
                rule.path.as_str(),
                rule.details.reason.as_deref().unwrap_or("no reason given")
            );
            match issues_data.get(&issue.issue_id) {
                Some(data) => result.ignored.push(Vulnerability::new(&issue, data)),
                None => warn!("No issue data for ignored issue {}", issue.issue_id),
            }
            result.suppressed.push(issue);
        } else {
            result.active.push(issue);
        }
    }

    let still_active = result
        .active
        .iter()
        .map(|issue| issue.issue_id.as_str())
        .collect::<BTreeSet<_>>();
    let suppressed_ids = result
        .suppressed
        .iter()
        .map(|issue| issue.issue_id.clone())
        .filter(|id| !still_active.contains(id.as_str()))
        .collect::<BTreeSet<_>>();

    for (id, data) in issues_data {
        if suppressed_ids.contains(&id) {
            result.suppressed_data.insert(id, data);
        } else {
            result.active_data.insert(id, data);
        }
    }

    result
}
