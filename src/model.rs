use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use strum::{Display, EnumString, EnumVariantNames};

/// Locally gathered dependency evidence for one project, as produced by an
/// ecosystem plugin. Opaque to this crate apart from the identity and the
/// file signature fact used by the unmanaged flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub identity: Identity,
    pub facts: Vec<Fact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub r#type: String,
    pub data: Value,
}

pub const FILE_SIGNATURES_FACT: &str = "fileSignatures";

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn fact(&self, kind: &str) -> Option<&Fact> {
        self.facts.iter().find(|fact| fact.r#type == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashFormat {
    pub format: u32,
    pub data: String,
}

/// File signature as sent on the wire, keys stay snake_case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHash {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub hashes_ffm: Vec<HashFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHashes {
    pub hashes: Vec<FileHash>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumVariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePath {
    #[serde(default)]
    pub path: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixInfo {
    #[serde(default)]
    pub upgrade_paths: Vec<UpgradePath>,
    #[serde(default)]
    pub is_patchable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_fixed_in_version: Option<String>,
}

/// One vulnerability on one package coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub issue_id: String,
    pub pkg_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg_version: Option<String>,
    pub fix_info: FixInfo,
}

impl Issue {
    /// The dependency path this issue is reported against, `name@version`.
    pub fn dependency_path(&self) -> String {
        match &self.pkg_version {
            Some(version) => format!("{}@{}", self.pkg_name, version),
            None => self.pkg_name.clone(),
        }
    }
}

/// Metadata shared by all issues with the same id. Fields beyond the ones the
/// client looks at are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueData {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type IssuesData = BTreeMap<String, IssueData>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkgManager {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkgInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pkg {
    pub id: String,
    pub info: PkgInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dep {
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: String,
    pub pkg_id: String,
    #[serde(default)]
    pub deps: Vec<Dep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    pub root_node_id: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepGraphData {
    pub schema_version: String,
    pub pkg_manager: PkgManager,
    pub pkgs: Vec<Pkg>,
    pub graph: Graph,
}

impl DepGraphData {
    /// Every package except the root.
    pub fn dependency_count(&self) -> usize {
        let root_pkg = self
            .graph
            .nodes
            .iter()
            .find(|node| node.node_id == self.graph.root_node_id)
            .map(|node| node.pkg_id.as_str())
            .unwrap_or(self.graph.root_node_id.as_str());
        self.pkgs.iter().filter(|pkg| pkg.id != root_pkg).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSignaturesDetail {
    pub confidence: f64,
    pub file_paths: Vec<String>,
}

pub type DepsFilePaths = BTreeMap<String, Vec<String>>;

/// Issue set of one finished job, after wire decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuesResult {
    pub issues: Vec<Issue>,
    pub issues_data: IssuesData,
    #[serde(alias = "depGraph")]
    pub dep_graph_data: DepGraphData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps_file_paths: Option<DepsFilePaths>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_signatures_details: Option<BTreeMap<String, FileSignaturesDetail>>,
}

/// An issue joined with its metadata, the shape shown to users both for
/// active and for ignored findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    #[serde(flatten)]
    pub data: IssueData,
    pub from: Vec<String>,
    pub name: String,
    pub pkg_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg_version: Option<String>,
}

impl Vulnerability {
    pub fn new(issue: &Issue, data: &IssueData) -> Self {
        let mut data = data.clone();
        for key in ["from", "name", "pkgName", "pkgVersion"] {
            data.extra.remove(key);
        }
        let name = issue.dependency_path();
        Vulnerability {
            data,
            from: vec![name.clone()],
            name,
            pkg_name: issue.pkg_name.clone(),
            pkg_version: issue.pkg_version.clone(),
        }
    }
}

/// What the policy took out of a result. `issues` holds every suppressed
/// occurrence, `ignore` those that could be joined with their metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filtered {
    pub ignore: Vec<Vulnerability>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// Final per-target result of the test flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub path: String,
    pub package_manager: String,
    pub dependency_count: usize,
    pub dep_graph_data: DepGraphData,
    pub issues: Vec<Issue>,
    pub issues_data: IssuesData,
    pub vulnerabilities: Vec<Vulnerability>,
    pub filtered: Filtered,
    pub filesystem_policy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps_file_paths: Option<DepsFilePaths>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_signatures_details: Option<BTreeMap<String, FileSignaturesDetail>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRequest {
    pub scan_result: ScanResult,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

/// Snapshot confirmation returned by the monitor flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResult {
    pub ok: bool,
    #[serde(default)]
    pub is_monitored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> DepGraphData {
        serde_json::from_value(json!({
            "schemaVersion": "1.2.0",
            "pkgManager": { "name": "cpp" },
            "pkgs": [
                { "id": "root-node@0.0.0", "info": { "name": "root-node", "version": "0.0.0" } },
                { "id": "https://github.com|nih-at/libzip@1.8.0", "info": { "name": "https://github.com|nih-at/libzip", "version": "1.8.0" } }
            ],
            "graph": {
                "rootNodeId": "root-node",
                "nodes": [
                    { "nodeId": "root-node", "pkgId": "root-node@0.0.0", "deps": [ { "nodeId": "https://github.com|nih-at/libzip@1.8.0" } ] },
                    { "nodeId": "https://github.com|nih-at/libzip@1.8.0", "pkgId": "https://github.com|nih-at/libzip@1.8.0", "deps": [] }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_dependency_count_excludes_root() {
        assert_eq!(graph().dependency_count(), 1);
    }

    #[test]
    fn test_vulnerability_from_issue() {
        let issue = Issue {
            issue_id: "SNYK-UNMANAGED-CPIO-2319543".into(),
            pkg_name: "https://ftp.gnu.org|cpio".into(),
            pkg_version: Some("2.12".into()),
            fix_info: FixInfo {
                upgrade_paths: vec![],
                is_patchable: false,
                nearest_fixed_in_version: None,
            },
        };
        let data: IssueData = serde_json::from_value(json!({
            "id": "SNYK-UNMANAGED-CPIO-2319543",
            "title": "Symlink Attack",
            "severity": "medium",
            "packageName": "cpio",
            "from": ["stale"],
        }))
        .unwrap();

        let vuln = Vulnerability::new(&issue, &data);
        assert_eq!(vuln.name, "https://ftp.gnu.org|cpio@2.12");
        assert_eq!(vuln.from, vec!["https://ftp.gnu.org|cpio@2.12".to_string()]);

        let value = serde_json::to_value(&vuln).unwrap();
        assert_eq!(value["packageName"], "cpio");
        assert_eq!(value["severity"], "medium");
        assert_eq!(value["from"], json!(["https://ftp.gnu.org|cpio@2.12"]));
    }
}
