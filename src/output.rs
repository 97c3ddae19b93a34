use serde::Serialize;
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::metrics::RunSummary;
use crate::models::{CallProfile, SimConfig};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub strategy: String,
    pub runs: Vec<RunSummary>,
}

pub trait Formatter {
    fn write(&self, report: &Report) -> Result<String>;
}

pub struct HumanFormatter;

pub struct SummaryFormatter;

pub struct JsonFormatter;

impl Formatter for HumanFormatter {
    fn write(&self, report: &Report) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "Strategy: {}", report.strategy);
        let _ = writeln!(out, "Replications: {}", report.runs.len());
        for run in &report.runs {
            let _ = writeln!(out, "Run {}:", run.replication);
            let _ = writeln!(out, "  completed: {}", run.completed);
            let _ = writeln!(out, "  end_time: {:.2}", run.end_time);
            let _ = writeln!(out, "  events: {}", run.events);
            let _ = writeln!(
                out,
                "  calls: {} (processed: {})",
                run.calls, run.calls_processed
            );
            let _ = writeln!(
                out,
                "  response: avg {:.2}, p95 {:.2}, max {:.2}",
                run.average_response, run.p95_response, run.max_response
            );
            let _ = writeln!(out, "  survival_rate: {}", survival_label(run.survival_rate));
            let _ = writeln!(out, "  utilization: {:.4}", run.utilization);
            let _ = writeln!(
                out,
                "  move-ups: {} considered, {} relocations",
                run.moveups_considered, run.relocations
            );
            let _ = writeln!(out, "  distance: {:.2}", run.total_distance);
        }
        Ok(out)
    }
}

impl Formatter for SummaryFormatter {
    fn write(&self, report: &Report) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "Strategy: {}", report.strategy);
        for run in &report.runs {
            let _ = writeln!(
                out,
                "run {}: processed {}/{} (avg response: {:.2}, survival: {}, relocations: {})",
                run.replication,
                run.calls_processed,
                run.calls,
                run.average_response,
                survival_label(run.survival_rate),
                run.relocations
            );
        }
        Ok(out)
    }
}

impl Formatter for JsonFormatter {
    fn write(&self, report: &Report) -> Result<String> {
        let mut out = serde_json::to_string_pretty(report)
            .map_err(|err| Error::invalid("output", err.to_string()))?;
        out.push('\n');
        Ok(out)
    }
}

fn survival_label(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{:.4}", rate),
        None => "n/a".to_string(),
    }
}

/// Human-readable description of a parsed scenario, for `show-config`.
pub fn describe_config(config: &SimConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Strategy: {}", config.strategy);
    let calls = match &config.calls {
        CallProfile::Listed(calls) => format!("{} listed", calls.len()),
        CallProfile::Poisson(profile) => format!(
            "poisson (rate: {}, duration: {}, seed: {})",
            profile.rate, profile.duration, profile.seed
        ),
    };
    let _ = writeln!(out, "Calls: {}", calls);
    let _ = writeln!(out, "Replications: {}", config.replications);
    let stop = match (config.until, config.duration, config.max_events) {
        (Some(until), _, _) => format!("until {}", until),
        (_, Some(duration), _) => format!("duration {}", duration),
        (_, _, Some(events)) => format!("{} events", events),
        _ => "exhaust".to_string(),
    };
    let _ = writeln!(out, "Stop: {}", stop);
    let _ = writeln!(out, "Stations:");
    for station in &config.stations {
        let _ = writeln!(
            out,
            "- {} at ({}, {}) (capacity: {})",
            station.name, station.x, station.y, station.capacity
        );
    }
    let _ = writeln!(out, "Hospitals:");
    for hospital in &config.hospitals {
        let _ = writeln!(out, "- {} at ({}, {})", hospital.name, hospital.x, hospital.y);
    }
    let _ = writeln!(out, "Ambulances:");
    for (index, amb) in config.ambulances.iter().enumerate() {
        let shift = match amb.sleep {
            Some(sleep) => format!("{}-{}", amb.wake, sleep),
            None => format!("from {}", amb.wake),
        };
        let _ = writeln!(
            out,
            "- {} at {} ({:?}, shift {})",
            index, amb.station, amb.class, shift
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Report {
        Report {
            strategy: "null".to_string(),
            runs: vec![RunSummary {
                replication: 0,
                strategy: "null".to_string(),
                completed: true,
                end_time: 120.5,
                events: 42,
                calls: 4,
                calls_processed: 4,
                average_response: 6.67,
                p95_response: 10.0,
                max_response: 10.0,
                survival_rate: None,
                utilization: 0.25,
                moveups_considered: 4,
                relocations: 0,
                total_distance: 88.0,
            }],
        }
    }

    #[test]
    fn summary_prints_one_line_per_run() {
        let out = SummaryFormatter.write(&report()).expect("formats");
        assert_eq!(
            out,
            concat!(
                "Strategy: null\n",
                "run 0: processed 4/4 (avg response: 6.67, survival: n/a, relocations: 0)\n",
            )
        );
    }

    #[test]
    fn human_output_lists_every_metric() {
        let out = HumanFormatter.write(&report()).expect("formats");
        assert!(out.starts_with("Strategy: null\nReplications: 1\nRun 0:\n"));
        assert!(out.contains("  response: avg 6.67, p95 10.00, max 10.00\n"));
        assert!(out.contains("  move-ups: 4 considered, 0 relocations\n"));
    }

    #[test]
    fn json_output_parses_back() {
        let out = JsonFormatter.write(&report()).expect("formats");
        let value: serde_json::Value = serde_json::from_str(&out).expect("valid json");
        assert_eq!(value["strategy"], "null");
        assert_eq!(value["runs"][0]["calls_processed"], 4);
        assert!(value["runs"][0]["survival_rate"].is_null());
    }
}
