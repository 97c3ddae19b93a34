use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::moveup::DdsmParams;
use crate::state::{AmbulanceClass, Priority};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SimConfig {
    pub stations: Vec<StationConfig>,
    #[serde(default)]
    pub hospitals: Vec<HospitalConfig>,
    pub ambulances: Vec<AmbulanceConfig>,
    pub calls: CallProfile,
    #[serde(default)]
    pub demand: Vec<DemandPointConfig>,
    #[serde(default)]
    pub cover_times: CoverTimes,
    #[serde(default)]
    pub travel: TravelConfig,
    #[serde(default = "default_mobilisation_delay")]
    pub mobilisation_delay: f64,
    #[serde(default)]
    pub stats_period: Option<f64>,
    #[serde(default)]
    pub until: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub max_events: Option<u64>,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default = "default_replications")]
    pub replications: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StationConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HospitalConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AmbulanceConfig {
    pub station: String,
    #[serde(default)]
    pub class: AmbulanceClass,
    /// Start of the shift.
    #[serde(default)]
    pub wake: f64,
    /// End of the shift; an ambulance on a job finishes it first.
    #[serde(default)]
    pub sleep: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CallConfig {
    pub arrival: f64,
    pub priority: Priority,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_dispatch_delay")]
    pub dispatch_delay: f64,
    #[serde(default = "default_on_scene")]
    pub on_scene_duration: f64,
    #[serde(default = "default_true")]
    pub transport: bool,
    #[serde(default = "default_handover")]
    pub handover_duration: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CallProfile {
    Listed(Vec<CallConfig>),
    Poisson(PoissonCalls),
}

/// Seeded call generator: exponential inter-arrival times, uniform
/// locations inside `bounds`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PoissonCalls {
    /// Calls per unit time.
    pub rate: f64,
    pub duration: f64,
    #[serde(default)]
    pub seed: u64,
    pub bounds: Bounds,
    #[serde(default)]
    pub priority_mix: PriorityMix,
    #[serde(default = "default_dispatch_delay")]
    pub dispatch_delay: f64,
    #[serde(default = "default_on_scene")]
    pub on_scene_duration: f64,
    #[serde(default = "default_transport_probability")]
    pub transport_probability: f64,
    #[serde(default = "default_handover")]
    pub handover_duration: f64,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct PriorityMix {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for PriorityMix {
    fn default() -> Self {
        Self {
            high: 0.4,
            medium: 0.3,
            low: 0.3,
        }
    }
}

impl PriorityMix {
    pub fn weights(&self) -> [f64; 3] {
        [self.high, self.medium, self.low]
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DemandPointConfig {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

/// Response-time targets per call priority. A priority without a target
/// cannot define a coverage threshold.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct CoverTimes {
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub medium: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
}

impl CoverTimes {
    pub fn by_priority(&self) -> [Option<f64>; 3] {
        [self.high, self.medium, self.low]
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct TravelConfig {
    #[serde(default = "default_urgent_speed")]
    pub urgent_speed: f64,
    #[serde(default = "default_normal_speed")]
    pub normal_speed: f64,
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self {
            urgent_speed: default_urgent_speed(),
            normal_speed: default_normal_speed(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StrategyConfig {
    #[default]
    None,
    Null {
        #[serde(default)]
        trigger_on_dispatch: bool,
        #[serde(default = "default_true")]
        trigger_on_free: bool,
    },
    Learned {
        model: PathBuf,
        #[serde(default)]
        trigger_on_dispatch: bool,
        #[serde(default = "default_true")]
        trigger_on_free: bool,
    },
    Ddsm(DdsmParams),
}

impl StrategyConfig {
    pub const KINDS: [&'static str; 4] = ["none", "null", "learned", "ddsm"];

    pub fn kind(&self) -> &'static str {
        match self {
            StrategyConfig::None => "none",
            StrategyConfig::Null { .. } => "null",
            StrategyConfig::Learned { .. } => "learned",
            StrategyConfig::Ddsm(_) => "ddsm",
        }
    }
}

impl fmt::Display for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

fn default_capacity() -> u32 {
    1
}

fn default_mobilisation_delay() -> f64 {
    1.0
}

fn default_dispatch_delay() -> f64 {
    1.0
}

fn default_on_scene() -> f64 {
    12.0
}

fn default_handover() -> f64 {
    10.0
}

fn default_transport_probability() -> f64 {
    0.7
}

fn default_urgent_speed() -> f64 {
    1.0
}

fn default_normal_speed() -> f64 {
    0.75
}

fn default_replications() -> usize {
    1
}

fn default_true() -> bool {
    true
}
