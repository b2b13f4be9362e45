use crate::errors::*;
use crate::model::{FileHash, FileHashes, ScanResult, FILE_SIGNATURES_FACT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const FACTS_FILENAME: &str = "vulnfacts-scan.json";

/// A scan target: where the facts came from and what they are.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub path: PathBuf,
    pub scan_results: Vec<ScanResult>,
    pub policy_dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FactsFile {
    Many(Vec<ScanResult>),
    One(Box<ScanResult>),
}

/// Read the plugin output for `path`, either the file itself or the facts
/// file inside a project directory.
pub async fn load_target(path: &Path, policy_dir: Option<&Path>) -> Result<Target> {
    let metadata = fs::metadata(path)
        .await
        .with_context(|| anyhow!("Failed to access scan target {:?}", path))?;
    let (file, project_dir) = if metadata.is_dir() {
        (path.join(FACTS_FILENAME), path.to_path_buf())
    } else {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (path.to_path_buf(), parent)
    };

    let buf = fs::read(&file)
        .await
        .with_context(|| anyhow!("Failed to read scan facts {:?}", file))?;
    let scan_results = match serde_json::from_slice::<FactsFile>(&buf)
        .with_context(|| anyhow!("Failed to parse scan facts {:?}", file))?
    {
        FactsFile::Many(scan_results) => scan_results,
        FactsFile::One(scan_result) => vec![*scan_result],
    };
    debug!("Loaded {} scan result(s) from {:?}", scan_results.len(), file);

    Ok(Target {
        path: path.to_path_buf(),
        scan_results,
        policy_dir: policy_dir.map(Path::to_path_buf).unwrap_or(project_dir),
    })
}

/// The file signatures of a scan result, as submitted by the unmanaged flow.
pub fn file_hashes(scan_result: &ScanResult) -> Result<FileHashes> {
    let fact = scan_result
        .fact(FILE_SIGNATURES_FACT)
        .ok_or_else(|| anyhow!("Scan result has no {} fact", FILE_SIGNATURES_FACT))?;
    let hashes: Vec<FileHash> = serde_json::from_value(fact.data.clone())
        .context("Invalid file signatures fact")?;
    if hashes.is_empty() {
        bail!("No file signatures to resolve");
    }
    Ok(FileHashes { hashes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan_result() -> serde_json::Value {
        json!({
            "identity": { "type": "cpp" },
            "name": "my-unmanaged-c-project",
            "facts": [{
                "type": "fileSignatures",
                "data": [{
                    "path": "fastlz_example/fastlz.h",
                    "hashes_ffm": [
                        { "format": 1, "data": "ucMc383nMM/wkFRM4iOo5Q" },
                        { "format": 1, "data": "k+DxEmslFQWuJsZFXvSoYw" }
                    ]
                }]
            }],
            "target": { "branch": "master", "remoteUrl": "https://github.com/some-org/some-unmanaged-project.git" },
            "analytics": [{ "name": "fileSignaturesAnalyticsContext", "data": { "totalFileSignatures": 3 } }]
        })
    }

    #[tokio::test]
    async fn test_load_directory_target() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join(FACTS_FILENAME),
            serde_json::to_vec(&scan_result())?,
        )?;

        let target = load_target(dir.path(), None).await?;
        assert_eq!(target.scan_results.len(), 1);
        assert_eq!(target.policy_dir, dir.path());
        let scan = &target.scan_results[0];
        assert_eq!(scan.identity.r#type, "cpp");
        assert!(scan.extra.contains_key("analytics"));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_file_target_with_many_results() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("facts.json");
        std::fs::write(
            &file,
            serde_json::to_vec(&json!([scan_result(), scan_result()]))?,
        )?;
        let policy_dir = tempfile::tempdir()?;

        let target = load_target(&file, Some(policy_dir.path())).await?;
        assert_eq!(target.path, file);
        assert_eq!(target.scan_results.len(), 2);
        assert_eq!(target.policy_dir, policy_dir.path());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_target() {
        assert!(load_target(Path::new("/this/does/not/exist"), None)
            .await
            .is_err());
    }

    #[test]
    fn test_file_hashes() -> Result<()> {
        let scan: ScanResult = serde_json::from_value(scan_result())?;
        let hashes = file_hashes(&scan)?;
        assert_eq!(hashes.hashes.len(), 1);
        assert_eq!(hashes.hashes[0].path, "fastlz_example/fastlz.h");
        assert_eq!(hashes.hashes[0].hashes_ffm.len(), 2);

        let mut scan = scan;
        scan.facts.clear();
        assert!(file_hashes(&scan).is_err());
        Ok(())
    }
}
