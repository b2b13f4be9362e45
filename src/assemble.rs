use crate::filter::FilterResult;
use crate::model::{DepGraphData, Filtered, IssuesResult, TestResult, Vulnerability};

pub fn package_manager_label(dep_graph: &DepGraphData) -> String {
    match dep_graph.pkg_manager.name.as_str() {
        "cpp" => "Unmanaged (C/C++)".to_string(),
        name => name.to_string(),
    }
}

/// Combine the fetched job result with its policy partition into the result
/// reported for `path`.
pub fn assemble_test_result(
    path: &str,
    fetched: IssuesResult,
    filtered: FilterResult,
    filesystem_policy: bool,
) -> TestResult {
    let vulnerabilities = filtered
        .active
        .iter()
        .filter_map(|issue| {
            filtered
                .active_data
                .get(&issue.issue_id)
                .map(|data| Vulnerability::new(issue, data))
        })
        .collect();

    TestResult {
        path: path.to_string(),
        package_manager: package_manager_label(&fetched.dep_graph_data),
        dependency_count: fetched.dep_graph_data.dependency_count(),
        dep_graph_data: fetched.dep_graph_data,
        issues: filtered.active,
        issues_data: filtered.active_data,
        vulnerabilities,
        filtered: Filtered {
            ignore: filtered.ignored,
            issues: filtered.suppressed,
        },
        filesystem_policy,
        deps_file_paths: fetched.deps_file_paths,
        file_signatures_details: fetched.file_signatures_details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::filter::filter_ignored_issues;
    use crate::policy::Policy;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn fetched() -> IssuesResult {
        codec::decode_issues_result(json!({
            "issues": [
                {
                    "pkg_name": "https://ftp.gnu.org|cpio",
                    "pkg_version": "2.12",
                    "issue_id": "SNYK-UNMANAGED-CPIO-2319543",
                    "fix_info": { "upgrade_paths": [], "is_patchable": false, "nearest_fixed_in_version": "" }
                },
                {
                    "pkg_name": "https://thekelleys.org.uk|dnsmasq",
                    "pkg_version": "2.80",
                    "issue_id": "SNYK-UNMANAGED-DNSMASQ-1",
                    "fix_info": { "upgrade_paths": [], "is_patchable": false }
                }
            ],
            "issues_data": {
                "SNYK-UNMANAGED-CPIO-2319543": {
                    "id": "SNYK-UNMANAGED-CPIO-2319543",
                    "title": "Symlink Attack",
                    "severity": "medium",
                    "package_name": "cpio",
                    "fixed_in": []
                },
                "SNYK-UNMANAGED-DNSMASQ-1": {
                    "id": "SNYK-UNMANAGED-DNSMASQ-1",
                    "title": "Heap Overflow",
                    "severity": "high"
                }
            },
            "dep_graph": {
                "schema_version": "1.2.0",
                "pkg_manager": { "name": "cpp" },
                "pkgs": [
                    { "id": "root-node@0.0.0", "info": { "name": "root-node", "version": "0.0.0" } },
                    { "id": "https://ftp.gnu.org|cpio@2.12", "info": { "name": "https://ftp.gnu.org|cpio", "version": "2.12" } },
                    { "id": "https://thekelleys.org.uk|dnsmasq@2.80", "info": { "name": "https://thekelleys.org.uk|dnsmasq", "version": "2.80" } }
                ],
                "graph": {
                    "root_node_id": "root-node@0.0.0",
                    "nodes": [
                        { "node_id": "root-node", "pkg_id": "root-node@0.0.0", "deps": [
                            { "node_id": "https://ftp.gnu.org|cpio@2.12" },
                            { "node_id": "https://thekelleys.org.uk|dnsmasq@2.80" }
                        ] },
                        { "node_id": "https://ftp.gnu.org|cpio@2.12", "pkg_id": "https://ftp.gnu.org|cpio@2.12", "deps": [] },
                        { "node_id": "https://thekelleys.org.uk|dnsmasq@2.80", "pkg_id": "https://thekelleys.org.uk|dnsmasq@2.80", "deps": [] }
                    ]
                }
            },
            "deps_file_paths": {
                "https://thekelleys.org.uk|dnsmasq@2.80": ["deps/dnsmasq-2.80/Makefile"]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_assemble_with_ignored_issue() {
        let now = Utc::now();
        let fetched = fetched();
        let policy = Policy::parse(&format!(
            "ignore:\n  SNYK-UNMANAGED-DNSMASQ-1:\n    - '*':\n        reason: not built\n        expires: {}\n",
            (now + Duration::days(1)).to_rfc3339()
        ))
        .unwrap();
        let filtered = filter_ignored_issues(
            fetched.issues.clone(),
            fetched.issues_data.clone(),
            Some(&policy),
            now,
        );

        let result = assemble_test_result("path", fetched, filtered, true);
        assert_eq!(result.path, "path");
        assert_eq!(result.package_manager, "Unmanaged (C/C++)");
        assert_eq!(result.dependency_count, 2);
        assert!(result.filesystem_policy);

        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].issue_id, "SNYK-UNMANAGED-CPIO-2319543");
        assert_eq!(result.issues_data.len(), 1);
        assert_eq!(result.vulnerabilities.len(), 1);
        assert_eq!(
            result.vulnerabilities[0].from,
            vec!["https://ftp.gnu.org|cpio@2.12".to_string()]
        );
        assert_eq!(result.filtered.ignore.len(), 1);
        assert_eq!(result.filtered.ignore[0].data.id, "SNYK-UNMANAGED-DNSMASQ-1");
        assert_eq!(result.filtered.issues.len(), 1);
        assert_eq!(result.filtered.issues[0].issue_id, "SNYK-UNMANAGED-DNSMASQ-1");
        assert_eq!(
            result.deps_file_paths.as_ref().map(|paths| paths.len()),
            Some(1)
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["packageManager"], "Unmanaged (C/C++)");
        assert_eq!(value["dependencyCount"], 2);
        assert_eq!(value["vulnerabilities"][0]["packageName"], "cpio");
        assert_eq!(value["filtered"]["ignore"][0]["title"], "Heap Overflow");
        assert_eq!(value["issues"][0]["fixInfo"]["nearestFixedInVersion"], "");
    }

    #[test]
    fn test_suppressed_issue_without_metadata_is_kept() {
        let now = Utc::now();
        let mut fetched = fetched();
        fetched.issues_data.remove("SNYK-UNMANAGED-DNSMASQ-1");
        let policy = Policy::parse("ignore:\n  SNYK-UNMANAGED-DNSMASQ-1:\n    - '*':\n        reason: not built\n").unwrap();
        let filtered = filter_ignored_issues(
            fetched.issues.clone(),
            fetched.issues_data.clone(),
            Some(&policy),
            now,
        );

        let result = assemble_test_result("path", fetched, filtered, true);
        assert_eq!(result.issues.len(), 1);
        assert!(result.filtered.ignore.is_empty());
        assert_eq!(result.filtered.issues.len(), 1);
        assert_eq!(
            result.filtered.issues[0].dependency_path(),
            "https://thekelleys.org.uk|dnsmasq@2.80"
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value["filtered"]["issues"][0]["issueId"],
            "SNYK-UNMANAGED-DNSMASQ-1"
        );
    }
}
