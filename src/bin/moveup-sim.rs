use std::path::{Path, PathBuf};
use std::sync::Arc;

use moveup_sim::config::{self, Command, FormatArg, RunArgs};
use moveup_sim::engine::StopCondition;
use moveup_sim::error::Result;
use moveup_sim::metrics::RunSummary;
use moveup_sim::models::StrategyConfig;
use moveup_sim::moveup::build_strategy;
use moveup_sim::output::{
    describe_config, Formatter, HumanFormatter, JsonFormatter, Report, SummaryFormatter,
};
use moveup_sim::replication::{run_replications, StrategyShare};
use moveup_sim::scenario::{build_infrastructure, build_state_on, validate_config};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = config::parse_args()?;
    match cli.command {
        Command::Run(args) => run_scenario(args),
        Command::ListStrategies => {
            for kind in StrategyConfig::KINDS {
                println!("{}", kind);
            }
            Ok(())
        }
        Command::ShowConfig(args) => {
            let config = config::build_config(&args)?;
            validate_config(&config)?;
            print!("{}", describe_config(&config));
            Ok(())
        }
    }
}

fn run_scenario(args: RunArgs) -> Result<()> {
    let config = config::build_config(&args.scenario)?;
    let stop = StopCondition::from_options(config.until, config.duration, config.max_events)?;
    validate_config(&config)?;
    let infra = build_infrastructure(&config)?;
    let share = match build_strategy(&config.strategy)? {
        Some(strategy) => StrategyShare::Shared(Arc::from(strategy)),
        None => StrategyShare::None,
    };
    info!(
        strategy = share.name(),
        replications = config.replications,
        "running scenario"
    );

    let outcomes = run_replications(
        config.replications,
        &share,
        stop,
        args.decision_log.is_some(),
        |index| build_state_on(Arc::clone(&infra), &config, index as u64),
    )?;

    let mut runs = Vec::with_capacity(outcomes.len());
    for outcome in &outcomes {
        runs.push(RunSummary::from_state(
            &outcome.state,
            share.name(),
            outcome.index,
        )?);
        if let (Some(path), Some(log)) = (&args.decision_log, &outcome.log) {
            let target = log_path(path, outcome.index, outcomes.len());
            let written = log.save_to_csv(&target)?;
            info!(path = %written.display(), entries = log.len(), "decision log written");
        }
    }

    let report = Report {
        strategy: share.name().to_string(),
        runs,
    };
    let formatter = formatter_for(&args.format);
    let output = formatter.write(&report)?;
    print!("{}", output);

    Ok(())
}

/// One CSV per replication; a single replication writes to `path` itself.
fn log_path(path: &Path, index: usize, count: usize) -> PathBuf {
    if count <= 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("decisions");
    path.with_file_name(format!("{}-{}.csv", stem, index))
}

fn formatter_for(format: &FormatArg) -> Box<dyn Formatter> {
    match format {
        FormatArg::Human => Box::new(HumanFormatter),
        FormatArg::Summary => Box::new(SummaryFormatter),
        FormatArg::Json => Box::new(JsonFormatter),
    }
}
