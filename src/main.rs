use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use std::process;
use vulnfacts::api::HttpApi;
use vulnfacts::args::{Args, Ignore, Monitor, SubCommand, Test};
use vulnfacts::config::Config;
use vulnfacts::display;
use vulnfacts::errors::*;
use vulnfacts::facts::{self, Target};
use vulnfacts::model::Severity;
use vulnfacts::policy::{self, PathPattern, RuleDetails};
use vulnfacts::resolve::{self, MonitorOptions, TargetFailure, TestStrategy};

async fn load_targets(
    paths: &[PathBuf],
    policy_dir: Option<&PathBuf>,
) -> (Vec<Target>, Vec<TargetFailure>) {
    let mut targets = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        match facts::load_target(path, policy_dir.map(PathBuf::as_path)).await {
            Ok(target) => targets.push(target),
            Err(err) => {
                error!("Failed to load scan target: {:?} => {:#}", path, err);
                failures.push(TargetFailure {
                    path: path.clone(),
                    error: format!("{:#}", err),
                });
            }
        }
    }
    (targets, failures)
}

async fn run_test(config: &Config, test: Test) -> Result<i32> {
    let api = HttpApi::new(config)?;
    let threshold = test
        .severity_threshold
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()?;
    let strategy = if test.unmanaged {
        TestStrategy::Unmanaged(config.unmanaged.backoff())
    } else {
        TestStrategy::Jobs
    };

    let (targets, failures) = load_targets(&test.paths, test.policy_path.as_ref()).await;
    let mut report = resolve::resolve_and_test_facts(&api, &targets, &strategy).await?;
    report.merge_failures(failures, &test.paths);

    if test.json {
        println!("{}", display::format_json(&report)?);
    } else {
        println!("{}", display::format_test_report(&report, threshold)?);
    }
    Ok(display::test_exit_code(&report, threshold))
}

async fn run_monitor(config: &Config, monitor: Monitor) -> Result<i32> {
    let api = HttpApi::new(config)?;
    let options = MonitorOptions {
        project_name: monitor.project_name,
        tags: monitor.tags,
    };

    let (targets, failures) = load_targets(&monitor.paths, monitor.policy_path.as_ref()).await;
    let mut report = resolve::resolve_and_monitor_facts(&api, &targets, &options).await?;
    report.merge_failures(failures, &monitor.paths);

    if monitor.json {
        println!("{}", display::format_json(&report)?);
    } else {
        println!("{}", display::format_monitor_report(&report)?);
    }
    Ok(display::monitor_exit_code(&report))
}

async fn run_ignore(ignore: Ignore) -> Result<i32> {
    let details = RuleDetails::expiring_in(ignore.reason, ignore.days, Utc::now())?;
    let file = policy::add_ignore(
        &ignore.dir,
        &ignore.id,
        &PathPattern::parse(&ignore.path),
        details,
    )
    .await?;
    info!("Added ignore rule for {:?} to {:?}", ignore.id, file);
    Ok(display::EXIT_OK)
}

async fn run(args: Args) -> Result<i32> {
    let config = Config::load(args.config.as_deref())?.with_overrides(args.api, args.token, args.org);
    debug!("Using api at {:?}", config.api);

    match args.subcommand {
        SubCommand::Test(test) => run_test(&config, test).await,
        SubCommand::Monitor(monitor) => run_monitor(&config, monitor).await,
        SubCommand::Ignore(ignore) => run_ignore(ignore).await,
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level = match (args.quiet, args.verbose) {
        (0, 0) => "info",
        (0, _) => "debug",
        (1, _) => "warn",
        _ => "error",
    };
    env_logger::init_from_env(Env::default().default_filter_or(log_level));

    let code = match run(args).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            display::EXIT_FAILURE
        }
    };
    process::exit(code);
}
