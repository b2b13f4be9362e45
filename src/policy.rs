use crate::errors::*;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const POLICY_FILENAME: &str = ".vulnfacts-policy";
pub const ANY_PATH: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Any,
    Literal(String),
}

impl PathPattern {
    pub fn parse(s: &str) -> Self {
        if s == ANY_PATH {
            PathPattern::Any
        } else {
            PathPattern::Literal(s.to_string())
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Any => true,
            PathPattern::Literal(literal) => literal == path,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PathPattern::Any => ANY_PATH,
            PathPattern::Literal(literal) => literal,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl RuleDetails {
    /// Details of a rule created at `now`, lapsing after `days` if given.
    pub fn expiring_in(reason: Option<String>, days: Option<u32>, now: DateTime<Utc>) -> Result<Self> {
        let expires = match days {
            Some(days) => Some(
                now.checked_add_signed(Duration::days(i64::from(days)))
                    .ok_or_else(|| anyhow!("Expiry of {} days is out of range", days))?,
            ),
            None => None,
        };
        Ok(RuleDetails {
            reason,
            created: Some(now),
            expires,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IgnoreRule {
    pub path: PathPattern,
    pub details: RuleDetails,
}

impl IgnoreRule {
    /// Rules without an expiry never lapse.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.details.expires {
            Some(expires) => now < expires,
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    ignore: Option<BTreeMap<String, Vec<BTreeMap<String, RuleDetails>>>>,
}

/// Ignore rules of one project, keyed by issue id. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    pub version: Option<String>,
    pub ignore: BTreeMap<String, Vec<IgnoreRule>>,
    /// The document as it was read, attached to monitor snapshots.
    pub raw: String,
}

impl Policy {
    pub fn parse(raw: &str) -> Result<Self> {
        let file: Option<PolicyFile> = if raw.trim().is_empty() {
            None
        } else {
            serde_yaml::from_str(raw).context("Failed to parse policy document")?
        };
        let file = file.unwrap_or(PolicyFile {
            version: None,
            ignore: None,
        });

        let ignore = file
            .ignore
            .unwrap_or_default()
            .into_iter()
            .map(|(issue_id, entries)| {
                let rules = entries
                    .into_iter()
                    .flat_map(|entry| entry.into_iter())
                    .map(|(path, details)| IgnoreRule {
                        path: PathPattern::parse(&path),
                        details,
                    })
                    .collect();
                (issue_id, rules)
            })
            .collect();

        Ok(Policy {
            version: file.version,
            ignore,
            raw: raw.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ignore.values().all(Vec::is_empty)
    }

    pub fn rules(&self, issue_id: &str) -> &[IgnoreRule] {
        self.ignore
            .get(issue_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The first rule that currently suppresses `issue_id` on `path`.
    pub fn matching_rule(&self, issue_id: &str, path: &str, now: DateTime<Utc>) -> Option<&IgnoreRule> {
        self.rules(issue_id)
            .iter()
            .find(|rule| rule.path.matches(path) && rule.is_active(now))
    }
}

pub fn policy_path(dir: &Path) -> PathBuf {
    dir.join(POLICY_FILENAME)
}

/// Load the policy stored in `dir`. No file means no policy.
pub async fn load(dir: &Path) -> Result<Option<Policy>> {
    let path = policy_path(dir);
    let raw = match fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("No policy found at {:?}", path);
            return Ok(None);
        }
        Err(err) => return Err(err).with_context(|| anyhow!("Failed to read policy {:?}", path)),
    };

    let policy = Policy::parse(&raw).with_context(|| anyhow!("Invalid policy file {:?}", path))?;
    debug!(
        "Loaded policy from {:?} with rules for {} issue(s)",
        path,
        policy.ignore.len()
    );
    Ok(Some(policy))
}

/// Append an ignore rule to the policy stored in `dir`, creating the file if
/// needed. Unrelated content of an existing file is kept.
pub async fn add_ignore(
    dir: &Path,
    issue_id: &str,
    path: &PathPattern,
    details: RuleDetails,
) -> Result<PathBuf> {
    let file = policy_path(dir);
    let mut doc = match fs::read_to_string(&file).await {
        Ok(raw) => serde_yaml::from_str::<Value>(&raw)
            .with_context(|| anyhow!("Invalid policy file {:?}", file))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Value::Null,
        Err(err) => return Err(err).with_context(|| anyhow!("Failed to read policy {:?}", file)),
    };
    if doc.is_null() {
        doc = Value::Mapping(Mapping::new());
    }

    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| anyhow!("Policy file {:?} is not a mapping", file))?;
    let ignore = root
        .entry(Value::from("ignore"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if ignore.is_null() {
        *ignore = Value::Mapping(Mapping::new());
    }
    let ignore = ignore
        .as_mapping_mut()
        .ok_or_else(|| anyhow!("The ignore section of {:?} is not a mapping", file))?;
    let rules = ignore
        .entry(Value::from(issue_id))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    let rules = rules
        .as_sequence_mut()
        .ok_or_else(|| anyhow!("Rules for {:?} in {:?} are not a list", issue_id, file))?;

    let mut entry = Mapping::new();
    entry.insert(Value::from(path.as_str()), serde_yaml::to_value(&details)?);
    rules.push(Value::Mapping(entry));

    let buf = serde_yaml::to_string(&doc)?;
    fs::write(&file, buf)
        .await
        .with_context(|| anyhow!("Failed to write policy {:?}", file))?;
    info!("Added ignore rule for {} ({}) to {:?}", issue_id, path.as_str(), file);
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const POLICY: &str = r#"
version: v1.25.0
ignore:
  SNYK-JS-LODASH-1:
    - '*':
        reason: false positive
        created: 2024-01-01T00:00:00Z
        expires: 2024-06-01T00:00:00Z
  SNYK-UNMANAGED-CPIO-2319543:
    - 'https://ftp.gnu.org|cpio@2.12':
        reason: not reachable
    - '*':
        reason: other
        expires: 2024-03-01T00:00:00Z
"#;

    #[test]
    fn test_parse_policy() -> Result<()> {
        let policy = Policy::parse(POLICY)?;
        assert_eq!(policy.version.as_deref(), Some("v1.25.0"));

        let rules = policy.rules("SNYK-JS-LODASH-1");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].path, PathPattern::Any);
        assert_eq!(rules[0].details.reason.as_deref(), Some("false positive"));
        assert_eq!(
            rules[0].details.expires,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
        );

        let rules = policy.rules("SNYK-UNMANAGED-CPIO-2319543");
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[0].path,
            PathPattern::Literal("https://ftp.gnu.org|cpio@2.12".to_string())
        );
        assert_eq!(rules[0].details.expires, None);

        assert!(policy.rules("SNYK-OTHER").is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_empty_documents() -> Result<()> {
        assert!(Policy::parse("")?.is_empty());
        assert!(Policy::parse("ignore: {}\n")?.is_empty());
        assert!(Policy::parse("version: v1\nignore:\n")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_malformed() {
        assert!(Policy::parse("ignore: [1, 2").is_err());
        assert!(Policy::parse("ignore:\n  V1: not-a-list\n").is_err());
        assert!(Policy::parse("ignore:\n  V1:\n    - '*':\n        expires: yesterday\n").is_err());
    }

    #[test]
    fn test_matching_rule() -> Result<()> {
        let policy = Policy::parse(POLICY)?;
        let before = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let between = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();

        assert!(policy
            .matching_rule("SNYK-JS-LODASH-1", "lodash@4.17.20", before)
            .is_some());
        assert!(policy
            .matching_rule("SNYK-JS-LODASH-1", "lodash@4.17.20", after)
            .is_none());

        // the literal rule never expires, the wildcard one lapsed
        let rule = policy
            .matching_rule("SNYK-UNMANAGED-CPIO-2319543", "https://ftp.gnu.org|cpio@2.12", after)
            .unwrap();
        assert_eq!(rule.details.reason.as_deref(), Some("not reachable"));
        assert!(policy
            .matching_rule("SNYK-UNMANAGED-CPIO-2319543", "https://ftp.gnu.org|cpio@2.13", between)
            .is_none());
        assert!(policy
            .matching_rule("SNYK-UNMANAGED-CPIO-2319543", "https://ftp.gnu.org|cpio@2.13", before)
            .is_some());
        Ok(())
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let rule = IgnoreRule {
            path: PathPattern::Any,
            details: RuleDetails {
                expires: Some(now),
                ..Default::default()
            },
        };
        assert!(!rule.is_active(now));
        assert!(rule.is_active(now - Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_load_missing_and_malformed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(load(dir.path()).await?, None);

        std::fs::write(policy_path(dir.path()), "ignore: [")?;
        assert!(load(dir.path()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_add_ignore_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(policy_path(dir.path()), "version: v1.25.0\n")?;

        let expires = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        add_ignore(
            dir.path(),
            "V1",
            &PathPattern::Any,
            RuleDetails {
                reason: Some("false positive".into()),
                created: None,
                expires: Some(expires),
            },
        )
        .await?;
        add_ignore(
            dir.path(),
            "V1",
            &PathPattern::parse("foo@1.0.0"),
            RuleDetails::default(),
        )
        .await?;

        let policy = load(dir.path()).await?.unwrap();
        assert_eq!(policy.version.as_deref(), Some("v1.25.0"));
        let rules = policy.rules("V1");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].path, PathPattern::Any);
        assert_eq!(rules[0].details.expires, Some(expires));
        assert_eq!(rules[1].path, PathPattern::Literal("foo@1.0.0".into()));
        Ok(())
    }

    #[test]
    fn test_rule_details_expiry() -> Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let details = RuleDetails::expiring_in(Some("later".into()), Some(30), now)?;
        assert_eq!(details.created, Some(now));
        assert_eq!(details.expires, Some(now + Duration::days(30)));

        let details = RuleDetails::expiring_in(None, None, now)?;
        assert_eq!(details.expires, None);
        Ok(())
    }

    #[test]
    fn test_rule_details_expiry_out_of_range() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(RuleDetails::expiring_in(None, Some(100_000_000), now).is_err());
        assert!(RuleDetails::expiring_in(None, Some(u32::MAX), now).is_err());
    }
}
