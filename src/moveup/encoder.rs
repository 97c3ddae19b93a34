use crate::error::Result;
use crate::state::SimState;

/// Turns the simulation state, seen from one ambulance, into a fixed-size
/// feature vector.
pub trait StateEncoder: Send + Sync {
    fn dimension(&self, state: &SimState) -> usize;

    fn encode(&self, state: &SimState, ambulance: usize) -> Result<Vec<f64>>;

    fn clone_box(&self) -> Box<dyn StateEncoder>;
}

/// Per-station idle share, the triggering ambulance's station one-hot, the
/// share of ambulances out working, and the number of queued calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct StationOccupancyEncoder;

impl StateEncoder for StationOccupancyEncoder {
    fn dimension(&self, state: &SimState) -> usize {
        2 * state.stations().len() + 2
    }

    fn encode(&self, state: &SimState, ambulance: usize) -> Result<Vec<f64>> {
        let stations = state.stations().len();
        let fleet = state.ambulances.len().max(1) as f64;
        let mut features = Vec::with_capacity(self.dimension(state));

        features.extend(
            state
                .station_idle
                .iter()
                .map(|count| f64::from(*count) / fleet),
        );

        let home = state.ambulances[ambulance].station;
        features.extend((0..stations).map(|station| if station == home { 1.0 } else { 0.0 }));

        let working = state
            .ambulances
            .iter()
            .filter(|amb| amb.status.is_working())
            .count();
        features.push(working as f64 / fleet);
        features.push(state.queued_calls.len() as f64);

        Ok(features)
    }

    fn clone_box(&self) -> Box<dyn StateEncoder> {
        Box::new(*self)
    }
}
