use crate::errors::*;
use crate::model::{Severity, Tag};
use clap::{builder::PossibleValuesParser, ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use strum::VariantNames;

#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Turn debugging information on
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    /// Less verbose output
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub quiet: u8,
    /// Path to the config file (default: <config dir>/vulnfacts/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Base url of the analysis service
    #[arg(long, global = true, env = "VULNFACTS_API", value_name = "URL")]
    pub api: Option<String>,
    /// Api token used to authenticate
    #[arg(long, global = true, env = "VULNFACTS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Organization to run the scan for
    #[arg(long, global = true, env = "VULNFACTS_ORG")]
    pub org: Option<String>,
    #[command(subcommand)]
    pub subcommand: SubCommand,
}

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    /// Test scan facts for known vulnerabilities
    Test(Test),
    /// Record a snapshot of the dependencies for continuous monitoring
    Monitor(Monitor),
    /// Add an ignore rule to the policy of a project
    Ignore(Ignore),
}

#[derive(Debug, Parser)]
pub struct Test {
    /// Scan facts files, or project directories containing vulnfacts-scan.json
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Resolve file signatures through the depgraph endpoints
    #[arg(long)]
    pub unmanaged: bool,
    /// Directory to load the policy from instead of the project directory
    #[arg(long, value_name = "DIR")]
    pub policy_path: Option<PathBuf>,
    /// Only report vulnerabilities of this severity or higher
    #[arg(long, value_parser(PossibleValuesParser::new(Severity::VARIANTS)))]
    pub severity_threshold: Option<String>,
    /// Print results as json
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct Monitor {
    /// Scan facts files, or project directories containing vulnfacts-scan.json
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Name of the project snapshot
    #[arg(long)]
    pub project_name: Option<String>,
    /// Tag the snapshot, can be used multiple times
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    pub tags: Vec<Tag>,
    /// Directory to load the policy from instead of the project directory
    #[arg(long, value_name = "DIR")]
    pub policy_path: Option<PathBuf>,
    /// Print results as json
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct Ignore {
    /// Project directory that holds the policy
    #[arg(default_value = ".")]
    pub dir: PathBuf,
    /// Issue to ignore
    #[arg(long)]
    pub id: String,
    /// Dependency path to ignore the issue on, `*` for any
    #[arg(long, default_value = "*")]
    pub path: String,
    /// Why the issue is ignored
    #[arg(long)]
    pub reason: Option<String>,
    /// Let the rule lapse after this many days
    #[arg(long)]
    pub days: Option<u32>,
}

pub fn parse_tag(s: &str) -> Result<Tag> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("Tag must be in the format KEY=VALUE"))?;
    if key.is_empty() {
        bail!("Tag key must not be empty");
    }
    Ok(Tag {
        key: key.to_string(),
        value: value.to_string(),
    })
}
