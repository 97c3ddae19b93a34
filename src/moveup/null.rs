use crate::error::Result;
use crate::moveup::{MoveUpDecision, MoveUpStrategy, RawOutput, StateEncoder};
use crate::state::SimState;

/// Baseline that never relocates: every decision confirms the triggering
/// ambulance's current station. With an encoder attached it doubles as a
/// logging-only probe of the states the loop sees.
pub struct NullStrategy {
    trigger_on_dispatch: bool,
    trigger_on_free: bool,
    encoder: Option<Box<dyn StateEncoder>>,
}

impl Default for NullStrategy {
    fn default() -> Self {
        Self::new(false, true)
    }
}

impl NullStrategy {
    pub fn new(trigger_on_dispatch: bool, trigger_on_free: bool) -> Self {
        Self {
            trigger_on_dispatch,
            trigger_on_free,
            encoder: None,
        }
    }

    pub fn with_encoder(mut self, encoder: Box<dyn StateEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }
}

impl MoveUpStrategy for NullStrategy {
    fn name(&self) -> &str {
        "null"
    }

    fn should_trigger_on_dispatch(&self, _state: &SimState) -> bool {
        self.trigger_on_dispatch
    }

    fn should_trigger_on_free(&self, _state: &SimState) -> bool {
        self.trigger_on_free
    }

    fn decide(&self, state: &SimState, ambulance: usize) -> Result<MoveUpDecision> {
        let features = match &self.encoder {
            Some(encoder) => encoder.encode(state, ambulance)?,
            None => Vec::new(),
        };
        let station = state.ambulances[ambulance].station;
        Ok(
            MoveUpDecision::new(vec![ambulance], vec![station], RawOutput::Scalar(0.0))
                .with_features(features),
        )
    }

    fn clone_box(&self) -> Result<Box<dyn MoveUpStrategy>> {
        Ok(Box::new(Self {
            trigger_on_dispatch: self.trigger_on_dispatch,
            trigger_on_free: self.trigger_on_free,
            encoder: self.encoder.as_ref().map(|encoder| encoder.clone_box()),
        }))
    }
}
