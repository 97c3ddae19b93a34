use crate::error::{Error, Result};
use crate::moveup::{FunctionApproximator, MoveUpDecision, MoveUpStrategy, RawOutput, StateEncoder};
use crate::state::SimState;

/// Scores every station with a trained approximator and sends the
/// triggering ambulance to the best one.
pub struct LearnedPolicyStrategy {
    encoder: Box<dyn StateEncoder>,
    approximator: Box<dyn FunctionApproximator>,
    trigger_on_dispatch: bool,
    trigger_on_free: bool,
}

impl LearnedPolicyStrategy {
    pub fn new(
        encoder: Box<dyn StateEncoder>,
        approximator: Box<dyn FunctionApproximator>,
    ) -> Self {
        Self {
            encoder,
            approximator,
            trigger_on_dispatch: false,
            trigger_on_free: true,
        }
    }

    pub fn with_triggers(mut self, on_dispatch: bool, on_free: bool) -> Self {
        self.trigger_on_dispatch = on_dispatch;
        self.trigger_on_free = on_free;
        self
    }
}

impl MoveUpStrategy for LearnedPolicyStrategy {
    fn name(&self) -> &str {
        "learned"
    }

    fn initialize(&self, state: &SimState) -> Result<()> {
        let features = self.encoder.dimension(state);
        if features != self.approximator.input_len() {
            return Err(Error::DimensionMismatch {
                component: "learned policy features",
                expected: self.approximator.input_len(),
                actual: features,
            });
        }
        let stations = state.stations().len();
        if stations != self.approximator.output_len() {
            return Err(Error::DimensionMismatch {
                component: "learned policy scores",
                expected: stations,
                actual: self.approximator.output_len(),
            });
        }
        Ok(())
    }

    fn should_trigger_on_dispatch(&self, _state: &SimState) -> bool {
        self.trigger_on_dispatch
    }

    fn should_trigger_on_free(&self, _state: &SimState) -> bool {
        self.trigger_on_free
    }

    fn decide(&self, state: &SimState, ambulance: usize) -> Result<MoveUpDecision> {
        let features = self.encoder.encode(state, ambulance)?;
        let scores = self.approximator.evaluate(&features)?;
        if scores.len() != state.stations().len() {
            return Err(Error::DimensionMismatch {
                component: "learned policy scores",
                expected: state.stations().len(),
                actual: scores.len(),
            });
        }
        let best = best_station(&scores).ok_or_else(|| {
            Error::invalid("learned policy", "approximator produced no finite score")
        })?;

        Ok(
            MoveUpDecision::new(vec![ambulance], vec![best], RawOutput::Vector(scores))
                .with_features(features),
        )
    }

    fn clone_box(&self) -> Result<Box<dyn MoveUpStrategy>> {
        Ok(Box::new(Self {
            encoder: self.encoder.clone_box(),
            approximator: self.approximator.clone_box(),
            trigger_on_dispatch: self.trigger_on_dispatch,
            trigger_on_free: self.trigger_on_free,
        }))
    }
}

/// Arg-max over the scores; the lowest index wins ties and NaN never wins.
pub(crate) fn best_station(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, score) in scores.iter().copied().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moveup::{LinearApproximator, StationOccupancyEncoder};
    use crate::state::testing::idle_state;

    /// Ignores the features and returns fixed per-station scores.
    fn constant_policy(scores: Vec<f64>, inputs: usize) -> LearnedPolicyStrategy {
        let weights = vec![vec![0.0; inputs]; scores.len()];
        let approximator = LinearApproximator::new(weights, scores).expect("valid model");
        LearnedPolicyStrategy::new(Box::new(StationOccupancyEncoder), Box::new(approximator))
    }

    #[test]
    fn ties_pick_lowest_index() {
        assert_eq!(best_station(&[1.0, 3.0, 3.0]), Some(1));
        assert_eq!(best_station(&[2.0, 2.0]), Some(0));
        assert_eq!(best_station(&[f64::NAN, -1.0]), Some(1));
        assert_eq!(best_station(&[f64::NAN]), None);
        assert_eq!(best_station(&[]), None);
    }

    #[test]
    fn decision_sends_triggering_ambulance_to_best_station() {
        let state = idle_state(&[0, 1]);
        let strategy = constant_policy(vec![0.1, 0.2, 0.9], 8);
        strategy.initialize(&state).expect("dimensions agree");

        let decision = strategy.decide(&state, 0).expect("decision succeeds");
        assert_eq!(decision.ambulances, vec![0]);
        assert_eq!(decision.stations, vec![2]);
        assert_eq!(decision.raw_output, RawOutput::Vector(vec![0.1, 0.2, 0.9]));
        assert_eq!(decision.features.len(), 8);
    }

    #[test]
    fn equal_top_scores_choose_first_station() {
        let state = idle_state(&[2]);
        let strategy = constant_policy(vec![0.5, 0.7, 0.7], 8);
        for _ in 0..5 {
            let decision = strategy.decide(&state, 0).expect("decision succeeds");
            assert_eq!(decision.stations, vec![1]);
        }
    }

    #[test]
    fn initialize_rejects_wrong_model_shape() {
        let state = idle_state(&[0]);
        let too_few_outputs = constant_policy(vec![0.0, 0.0], 8);
        assert!(matches!(
            too_few_outputs.initialize(&state),
            Err(Error::DimensionMismatch { .. })
        ));
        let wrong_inputs = constant_policy(vec![0.0, 0.0, 0.0], 3);
        assert!(wrong_inputs.initialize(&state).is_err());
    }
}
