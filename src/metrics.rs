use serde::Serialize;

use crate::error::{Error, Result};
use crate::state::{Ambulance, AmbulanceStatus, Call, CallStatus, Priority, SimState};

pub const METRIC_NAMES: [&str; 8] = [
    "average_response_duration",
    "max_response_duration",
    "response_duration_percentile",
    "survival_rate",
    "ambulance_utilization",
    "relocation_count",
    "total_distance",
    "calls_processed",
];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetricOptions {
    /// Percentile in (0, 100] for `response_duration_percentile`.
    pub percentile: Option<f64>,
    /// Response-time bound for `survival_rate`; defaults to each call's
    /// priority cover time.
    pub threshold: Option<f64>,
    /// Restricts call metrics to one priority.
    pub priority: Option<Priority>,
}

/// Named read-only fold over the calls and ambulances of a state.
pub fn get_metric(state: &SimState, name: &str, options: &MetricOptions) -> Result<f64> {
    match name {
        "average_response_duration" => {
            let responses = response_durations(state, options.priority);
            if responses.is_empty() {
                return Ok(0.0);
            }
            Ok(responses.iter().sum::<f64>() / responses.len() as f64)
        }
        "max_response_duration" => Ok(response_durations(state, options.priority)
            .into_iter()
            .fold(0.0, f64::max)),
        "response_duration_percentile" => {
            let percentile = options.percentile.ok_or(Error::MissingMetricOption {
                metric: "response_duration_percentile",
                option: "percentile",
            })?;
            if !(percentile > 0.0 && percentile <= 100.0) {
                return Err(Error::invalid(
                    "metrics",
                    format!("percentile {} is outside (0, 100]", percentile),
                ));
            }
            let mut responses = response_durations(state, options.priority);
            responses.sort_unstable_by(f64::total_cmp);
            Ok(nearest_rank_percentile(&responses, percentile).unwrap_or(0.0))
        }
        "survival_rate" => survival_rate(state, options),
        "ambulance_utilization" => Ok(utilization(state)),
        "relocation_count" => Ok(state
            .ambulances
            .iter()
            .map(|amb| f64::from(amb.relocation_count))
            .sum()),
        "total_distance" => Ok(state
            .ambulances
            .iter()
            .map(|amb| distance_travelled(amb, state.time))
            .sum()),
        "calls_processed" => Ok(state
            .calls
            .iter()
            .filter(|call| call.status == CallStatus::Processed)
            .count() as f64),
        _ => Err(Error::UnknownMetric(name.to_string())),
    }
}

fn selected_calls(state: &SimState, priority: Option<Priority>) -> impl Iterator<Item = &Call> {
    state
        .calls
        .iter()
        .filter(move |call| priority.map_or(true, |wanted| call.priority == wanted))
}

fn response_durations(state: &SimState, priority: Option<Priority>) -> Vec<f64> {
    selected_calls(state, priority)
        .filter_map(Call::response_duration)
        .collect()
}

/// Share of calls reached within their bound. Calls never reached count as
/// failures; calls whose priority has no cover time are skipped unless an
/// explicit threshold is given.
fn survival_rate(state: &SimState, options: &MetricOptions) -> Result<f64> {
    let mut judged = 0usize;
    let mut survived = 0usize;
    for call in selected_calls(state, options.priority) {
        if call.arrival_time > state.time {
            continue;
        }
        let Some(bound) = options
            .threshold
            .or_else(|| state.infra.cover_time(call.priority))
        else {
            continue;
        };
        judged += 1;
        if call.response_duration().is_some_and(|response| response <= bound) {
            survived += 1;
        }
    }
    if judged == 0 && options.threshold.is_none() {
        let any_cover_time = Priority::ALL
            .iter()
            .any(|priority| state.infra.cover_time(*priority).is_some());
        if !any_cover_time {
            return Err(Error::MissingMetricOption {
                metric: "survival_rate",
                option: "threshold",
            });
        }
    }
    if judged == 0 {
        return Ok(0.0);
    }
    Ok(survived as f64 / judged as f64)
}

/// Mean share of on-shift time each ambulance spent away from an idle
/// station.
fn utilization(state: &SimState) -> f64 {
    let shares: Vec<f64> = state
        .ambulances
        .iter()
        .filter_map(|amb| {
            let durations = durations_until(amb, state.time);
            let on_shift: f64 = durations.iter().sum::<f64>()
                - durations[AmbulanceStatus::Sleeping.index()];
            let idle = durations[AmbulanceStatus::IdleAtStation.index()];
            (on_shift > 0.0).then(|| (on_shift - idle) / on_shift)
        })
        .collect();
    if shares.is_empty() {
        return 0.0;
    }
    shares.iter().sum::<f64>() / shares.len() as f64
}

/// Per-status durations with the open interval closed at `time`.
fn durations_until(amb: &Ambulance, time: f64) -> [f64; AmbulanceStatus::COUNT] {
    let mut durations = amb.status_durations;
    if time > amb.status_since {
        durations[amb.status.index()] += time - amb.status_since;
    }
    durations
}

fn distance_travelled(amb: &Ambulance, time: f64) -> f64 {
    amb.distance_travelled + amb.route.distance_at(time)
}

fn nearest_rank_percentile(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[idx])
}

pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    if decimals == 0 {
        return value.round();
    }
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// The standard metric set of one run, as the formatters print it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub replication: usize,
    pub strategy: String,
    pub completed: bool,
    pub end_time: f64,
    pub events: u64,
    pub calls: usize,
    pub calls_processed: usize,
    pub average_response: f64,
    pub p95_response: f64,
    pub max_response: f64,
    pub survival_rate: Option<f64>,
    pub utilization: f64,
    pub moveups_considered: u64,
    pub relocations: u64,
    pub total_distance: f64,
}

impl RunSummary {
    pub fn from_state(state: &SimState, strategy: &str, replication: usize) -> Result<Self> {
        let metric = |name: &str, options: MetricOptions| get_metric(state, name, &options);
        let p95 = MetricOptions {
            percentile: Some(95.0),
            ..MetricOptions::default()
        };
        let survival = match metric("survival_rate", MetricOptions::default()) {
            Ok(rate) => Some(round_to(rate, 4)),
            Err(Error::MissingMetricOption { .. }) => None,
            Err(err) => return Err(err),
        };

        Ok(Self {
            replication,
            strategy: strategy.to_string(),
            completed: state.complete,
            end_time: round_to(state.end_time.unwrap_or(state.time), 2),
            events: state.events_processed,
            calls: state.calls.len(),
            calls_processed: metric("calls_processed", MetricOptions::default())? as usize,
            average_response: round_to(
                metric("average_response_duration", MetricOptions::default())?,
                2,
            ),
            p95_response: round_to(metric("response_duration_percentile", p95)?, 2),
            max_response: round_to(
                metric("max_response_duration", MetricOptions::default())?,
                2,
            ),
            survival_rate: survival,
            utilization: round_to(metric("ambulance_utilization", MetricOptions::default())?, 4),
            moveups_considered: state.moveups_considered,
            relocations: metric("relocation_count", MetricOptions::default())? as u64,
            total_distance: round_to(metric("total_distance", MetricOptions::default())?, 2),
        })
    }
}
