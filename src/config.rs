use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{SimConfig, StrategyConfig};
use crate::moveup::DdsmParams;

#[derive(Parser, Debug)]
#[command(name = "moveup-sim", about = "Ambulance move-up simulator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scenario and print its metrics.
    Run(RunArgs),
    /// Print the supported move-up strategies.
    ListStrategies,
    /// Print the scenario after applying overrides, without running it.
    ShowConfig(ScenarioArgs),
}

#[derive(Args, Debug)]
pub struct ScenarioArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,
    /// Model file for the learned strategy.
    #[arg(long)]
    pub model: Option<PathBuf>,
    #[arg(long)]
    pub until: Option<f64>,
    #[arg(long)]
    pub duration: Option<f64>,
    #[arg(long)]
    pub max_events: Option<u64>,
    #[arg(long)]
    pub replications: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub scenario: ScenarioArgs,
    #[arg(long, value_enum, default_value = "human")]
    pub format: FormatArg,
    /// Write every move-up decision to this CSV file.
    #[arg(long)]
    pub decision_log: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    None,
    Null,
    Learned,
    Ddsm,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Human,
    Summary,
    Json,
}

pub fn parse_args() -> Result<Cli> {
    Cli::try_parse().map_err(|e| Error::Cli(e.to_string()))
}

pub fn load_config(path: &Path) -> Result<SimConfig> {
    let contents = fs::read_to_string(path).map_err(|err| {
        Error::ConfigIo(format!(
            "failed to read config '{}': {}",
            path.display(),
            err
        ))
    })?;
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("");

    match ext {
        "toml" => toml::from_str(&contents)
            .map_err(|err| Error::ConfigParse(format!("failed to parse TOML: {}", err))),
        "json" => serde_json::from_str(&contents)
            .map_err(|err| Error::ConfigParse(format!("failed to parse JSON: {}", err))),
        "" => Err(Error::UnsupportedConfigFormat("unknown".to_string())),
        _ => Err(Error::UnsupportedConfigFormat(ext.to_string())),
    }
}

/// Loads the scenario file and layers the command-line overrides on top.
/// A stop condition given on the command line replaces the file's.
pub fn build_config(args: &ScenarioArgs) -> Result<SimConfig> {
    let mut config = load_config(&args.config)?;

    if let Some(strategy) = args.strategy {
        config.strategy = strategy_override(strategy, args.model.as_ref(), &config.strategy)?;
    } else if let Some(model) = &args.model {
        match &mut config.strategy {
            StrategyConfig::Learned { model: current, .. } => *current = model.clone(),
            _ => {
                return Err(Error::Cli(
                    "--model only applies to the learned strategy".to_string(),
                ))
            }
        }
    }

    if args.until.is_some() || args.duration.is_some() || args.max_events.is_some() {
        config.until = args.until;
        config.duration = args.duration;
        config.max_events = args.max_events;
    }
    if let Some(replications) = args.replications {
        config.replications = replications;
    }
    Ok(config)
}

fn strategy_override(
    strategy: StrategyArg,
    model: Option<&PathBuf>,
    current: &StrategyConfig,
) -> Result<StrategyConfig> {
    if model.is_some() && strategy != StrategyArg::Learned {
        return Err(Error::Cli(
            "--model only applies to the learned strategy".to_string(),
        ));
    }
    let config = match strategy {
        StrategyArg::None => StrategyConfig::None,
        StrategyArg::Null => StrategyConfig::Null {
            trigger_on_dispatch: false,
            trigger_on_free: true,
        },
        StrategyArg::Learned => {
            let model = match (model, current) {
                (Some(model), _) => model.clone(),
                (None, StrategyConfig::Learned { model, .. }) => model.clone(),
                (None, _) => {
                    return Err(Error::Cli(
                        "the learned strategy requires --model".to_string(),
                    ))
                }
            };
            StrategyConfig::Learned {
                model,
                trigger_on_dispatch: false,
                trigger_on_free: true,
            }
        }
        StrategyArg::Ddsm => match current {
            StrategyConfig::Ddsm(params) => StrategyConfig::Ddsm(params.clone()),
            _ => StrategyConfig::Ddsm(DdsmParams::default()),
        },
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCENARIO: &str = r#"
until = 500.0

[[stations]]
name = "north"
x = 0.0
y = 10.0

[[ambulances]]
station = "north"

[calls]
rate = 0.1
duration = 100.0
seed = 3
transport_probability = 0.0

[calls.bounds]
min_x = 0.0
min_y = 0.0
max_x = 10.0
max_y = 10.0

[strategy]
kind = "null"
"#;

    fn scenario_file(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write scenario");
        file
    }

    fn args(path: &Path) -> ScenarioArgs {
        ScenarioArgs {
            config: path.to_path_buf(),
            strategy: None,
            model: None,
            until: None,
            duration: None,
            max_events: None,
            replications: None,
        }
    }

    #[test]
    fn loads_toml_scenario() {
        let file = scenario_file(SCENARIO, ".toml");
        let config = build_config(&args(file.path())).expect("config loads");
        assert_eq!(config.until, Some(500.0));
        assert_eq!(config.strategy.kind(), "null");
        assert_eq!(config.replications, 1);
    }

    #[test]
    fn command_line_stop_replaces_file_stop() {
        let file = scenario_file(SCENARIO, ".toml");
        let mut overrides = args(file.path());
        overrides.max_events = Some(50);
        overrides.replications = Some(4);
        let config = build_config(&overrides).expect("config loads");
        assert_eq!(config.until, None);
        assert_eq!(config.max_events, Some(50));
        assert_eq!(config.replications, 4);
    }

    #[test]
    fn strategy_override_keeps_ddsm_defaults() {
        let file = scenario_file(SCENARIO, ".toml");
        let mut overrides = args(file.path());
        overrides.strategy = Some(StrategyArg::Ddsm);
        let config = build_config(&overrides).expect("config loads");
        assert_eq!(config.strategy.kind(), "ddsm");
    }

    #[test]
    fn learned_override_needs_a_model() {
        let file = scenario_file(SCENARIO, ".toml");
        let mut overrides = args(file.path());
        overrides.strategy = Some(StrategyArg::Learned);
        let result = build_config(&overrides);
        assert!(matches!(result, Err(Error::Cli(message)) if message.contains("--model")));

        overrides.model = Some(PathBuf::from("policy.json"));
        let config = build_config(&overrides).expect("config loads");
        assert!(matches!(
            config.strategy,
            StrategyConfig::Learned { ref model, .. } if model == Path::new("policy.json")
        ));
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = scenario_file(SCENARIO, ".yaml");
        let result = load_config(file.path());
        assert!(matches!(result, Err(Error::UnsupportedConfigFormat(ext)) if ext == "yaml"));
    }

    #[test]
    fn reports_parse_errors() {
        let file = scenario_file("stations = 3", ".toml");
        let result = load_config(file.path());
        assert!(matches!(
            result,
            Err(Error::ConfigParse(message)) if message.starts_with("failed to parse TOML")
        ));
    }
}
