mod approximator;
mod ddsm;
mod encoder;
mod learned;
mod null;

use std::collections::HashSet;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::models::StrategyConfig;
use crate::state::{AmbulanceStatus, SimState};

pub use approximator::{
    load_approximator, DenseLayer, FunctionApproximator, LinearApproximator, MlpApproximator,
};
pub use ddsm::{DdsmParams, DdsmStrategy, SolverKind};
pub use encoder::{StateEncoder, StationOccupancyEncoder};
pub use learned::LearnedPolicyStrategy;
pub use null::NullStrategy;

/// Relocation policy consulted by the event loop after dispatches and after
/// ambulances become free.
///
/// Strategies only return decisions; the loop validates them and performs
/// every state change itself.
pub trait MoveUpStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Called once before a run starts.
    fn initialize(&self, _state: &SimState) -> Result<()> {
        Ok(())
    }

    fn should_trigger_on_dispatch(&self, state: &SimState) -> bool;

    fn should_trigger_on_free(&self, state: &SimState) -> bool;

    fn decide(&self, state: &SimState, ambulance: usize) -> Result<MoveUpDecision>;

    /// Independent copy for replications that evolve strategy state
    /// separately. Strategies that can only be shared keep the default.
    fn clone_box(&self) -> Result<Box<dyn MoveUpStrategy>> {
        Err(Error::NotImplemented(format!(
            "{}::clone_box",
            std::any::type_name::<Self>()
        )))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawOutput {
    Vector(Vec<f64>),
    Scalar(f64),
}

impl RawOutput {
    pub fn len(&self) -> usize {
        match self {
            RawOutput::Vector(values) => values.len(),
            RawOutput::Scalar(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parallel lists of ambulances and the stations they should move to.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveUpDecision {
    pub ambulances: Vec<usize>,
    pub stations: Vec<usize>,
    pub features: Vec<f64>,
    pub raw_output: RawOutput,
}

impl MoveUpDecision {
    pub fn new(ambulances: Vec<usize>, stations: Vec<usize>, raw_output: RawOutput) -> Self {
        Self {
            ambulances,
            stations,
            features: Vec::new(),
            raw_output,
        }
    }

    pub fn with_features(mut self, features: Vec<f64>) -> Self {
        self.features = features;
        self
    }

    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.ambulances
            .iter()
            .copied()
            .zip(self.stations.iter().copied())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    #[error("decision lists differ in length ({ambulances} ambulances, {stations} stations)")]
    LengthMismatch { ambulances: usize, stations: usize },
    #[error("unknown ambulance {0}")]
    UnknownAmbulance(usize),
    #[error("unknown station {0}")]
    UnknownStation(usize),
    #[error("ambulance {0} appears more than once")]
    DuplicateAmbulance(usize),
    #[error("ambulance {ambulance} is already assigned to station {station}")]
    RedundantMove { ambulance: usize, station: usize },
    #[error("ambulance {ambulance} cannot move while {status:?}")]
    Ineligible {
        ambulance: usize,
        status: AmbulanceStatus,
    },
}

/// Checks every pair of a decision, including that no ambulance is sent to
/// the station it already belongs to.
pub fn validate_decision(
    state: &SimState,
    decision: &MoveUpDecision,
) -> std::result::Result<(), DecisionError> {
    check_lengths(decision)?;
    let mut seen = HashSet::new();
    for (ambulance, station) in decision.pairs() {
        check_pair(state, ambulance, station, &mut seen)?;
    }
    Ok(())
}

/// The relocations the loop should actually schedule. Pairs that confirm an
/// ambulance's current station are dropped before validation, so a
/// status-quo decision yields no moves rather than an error.
pub fn actionable_moves(
    state: &SimState,
    decision: &MoveUpDecision,
) -> std::result::Result<Vec<(usize, usize)>, DecisionError> {
    check_lengths(decision)?;
    let mut seen = HashSet::new();
    let mut moves = Vec::new();
    for (ambulance, station) in decision.pairs() {
        let status_quo = state
            .ambulances
            .get(ambulance)
            .is_some_and(|amb| amb.station == station);
        if status_quo {
            continue;
        }
        check_pair(state, ambulance, station, &mut seen)?;
        moves.push((ambulance, station));
    }
    Ok(moves)
}

fn check_lengths(decision: &MoveUpDecision) -> std::result::Result<(), DecisionError> {
    if decision.ambulances.len() != decision.stations.len() {
        return Err(DecisionError::LengthMismatch {
            ambulances: decision.ambulances.len(),
            stations: decision.stations.len(),
        });
    }
    Ok(())
}

fn check_pair(
    state: &SimState,
    ambulance: usize,
    station: usize,
    seen: &mut HashSet<usize>,
) -> std::result::Result<(), DecisionError> {
    let amb = state
        .ambulances
        .get(ambulance)
        .ok_or(DecisionError::UnknownAmbulance(ambulance))?;
    if station >= state.stations().len() {
        return Err(DecisionError::UnknownStation(station));
    }
    if !seen.insert(ambulance) {
        return Err(DecisionError::DuplicateAmbulance(ambulance));
    }
    if amb.station == station {
        return Err(DecisionError::RedundantMove { ambulance, station });
    }
    if !amb.is_relocatable() {
        return Err(DecisionError::Ineligible {
            ambulance,
            status: amb.status,
        });
    }
    Ok(())
}

/// Ambulances a strategy may relocate right now, in index order.
pub fn relocatable_ambulances(state: &SimState) -> Vec<usize> {
    state
        .ambulances
        .iter()
        .filter(|amb| amb.is_relocatable())
        .map(|amb| amb.index)
        .collect()
}

pub fn build_strategy(config: &StrategyConfig) -> Result<Option<Box<dyn MoveUpStrategy>>> {
    let strategy: Box<dyn MoveUpStrategy> = match config {
        StrategyConfig::None => return Ok(None),
        StrategyConfig::Null {
            trigger_on_dispatch,
            trigger_on_free,
        } => Box::new(NullStrategy::new(*trigger_on_dispatch, *trigger_on_free)),
        StrategyConfig::Learned {
            model,
            trigger_on_dispatch,
            trigger_on_free,
        } => {
            let approximator = load_approximator(model)?;
            Box::new(
                LearnedPolicyStrategy::new(
                    Box::new(StationOccupancyEncoder),
                    approximator,
                )
                .with_triggers(*trigger_on_dispatch, *trigger_on_free),
            )
        }
        StrategyConfig::Ddsm(params) => Box::new(DdsmStrategy::new(params.clone())?),
    };
    Ok(Some(strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::idle_state;

    fn decision(ambulances: Vec<usize>, stations: Vec<usize>) -> MoveUpDecision {
        MoveUpDecision::new(ambulances, stations, RawOutput::Scalar(0.0))
    }

    #[test]
    fn validation_rejects_length_mismatch() {
        let state = idle_state(&[0, 1]);
        for (ambulances, stations) in [
            (vec![0], vec![]),
            (vec![], vec![2]),
            (vec![0, 1], vec![2]),
            (vec![0], vec![1, 2]),
        ] {
            let result = validate_decision(&state, &decision(ambulances, stations));
            assert!(matches!(result, Err(DecisionError::LengthMismatch { .. })));
        }
    }

    #[test]
    fn validation_rejects_every_redundant_move() {
        let state = idle_state(&[0, 1, 2, 1]);
        for (index, amb) in state.ambulances.iter().enumerate() {
            let result = validate_decision(&state, &decision(vec![index], vec![amb.station]));
            assert_eq!(
                result,
                Err(DecisionError::RedundantMove {
                    ambulance: index,
                    station: amb.station,
                })
            );
        }
    }

    #[test]
    fn validation_rejects_busy_ambulance() {
        let mut state = idle_state(&[0, 1]);
        state.set_status(1, AmbulanceStatus::AtCall);
        let result = validate_decision(&state, &decision(vec![1], vec![2]));
        assert!(matches!(result, Err(DecisionError::Ineligible { .. })));
    }

    #[test]
    fn validation_rejects_out_of_range_and_duplicates() {
        let state = idle_state(&[0, 1]);
        assert_eq!(
            validate_decision(&state, &decision(vec![5], vec![1])),
            Err(DecisionError::UnknownAmbulance(5))
        );
        assert_eq!(
            validate_decision(&state, &decision(vec![0], vec![9])),
            Err(DecisionError::UnknownStation(9))
        );
        assert_eq!(
            validate_decision(&state, &decision(vec![0, 0], vec![1, 2])),
            Err(DecisionError::DuplicateAmbulance(0))
        );
    }

    #[test]
    fn validation_accepts_real_moves() {
        let state = idle_state(&[0, 1]);
        assert!(validate_decision(&state, &decision(vec![0, 1], vec![2, 0])).is_ok());
    }

    #[test]
    fn actionable_moves_drop_status_quo_pairs() {
        let state = idle_state(&[0, 1]);
        let moves = actionable_moves(&state, &decision(vec![0, 1], vec![0, 2]))
            .expect("decision should be valid");
        assert_eq!(moves, vec![(1, 2)]);

        let moves = actionable_moves(&state, &decision(vec![0], vec![0]))
            .expect("status quo is not an error");
        assert!(moves.is_empty());
    }

    #[test]
    fn relocatable_ambulances_skip_busy_and_sleeping() {
        let mut state = idle_state(&[0, 1, 2]);
        state.set_status(0, AmbulanceStatus::GoingToCall);
        state.set_status(2, AmbulanceStatus::Sleeping);
        assert_eq!(relocatable_ambulances(&state), vec![1]);
    }

    #[test]
    fn no_strategy_config_builds_nothing() {
        let built = build_strategy(&StrategyConfig::None).expect("none is valid");
        assert!(built.is_none());
    }
}
