use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::state::{Location, Priority, Station};
use crate::travel::TravelTimes;

/// Relative tolerance allowed between demand totals of two thresholds.
pub const DEMAND_TOLERANCE: f64 = 0.01;

/// Demand points for one coverage threshold, each with the stations that
/// can reach it in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoverageData {
    pub threshold: f64,
    pub weights: Vec<f64>,
    pub covering_stations: Vec<Vec<usize>>,
}

impl CoverageData {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total_demand(&self) -> f64 {
        self.weights.iter().sum()
    }
}

pub trait DemandModel: Send + Sync {
    fn coverage(
        &self,
        stations: &[Station],
        travel: &dyn TravelTimes,
        priority: Priority,
        threshold: f64,
    ) -> CoverageData;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DemandPoint {
    pub location: Location,
    pub weight: f64,
}

/// Static weighted demand points. Points reached by the same set of
/// stations are merged, which keeps the total demand unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointDemand {
    points: Vec<DemandPoint>,
}

impl PointDemand {
    pub fn new(points: Vec<DemandPoint>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[DemandPoint] {
        &self.points
    }
}

impl DemandModel for PointDemand {
    fn coverage(
        &self,
        stations: &[Station],
        travel: &dyn TravelTimes,
        priority: Priority,
        threshold: f64,
    ) -> CoverageData {
        let mut merged: BTreeMap<Vec<usize>, f64> = BTreeMap::new();
        for point in &self.points {
            let covering = stations
                .iter()
                .filter(|station| {
                    travel.travel_time(station.location, point.location, priority) <= threshold
                })
                .map(|station| station.index)
                .collect::<Vec<_>>();
            *merged.entry(covering).or_insert(0.0) += point.weight;
        }

        let (covering_stations, weights) = merged.into_iter().unzip();
        CoverageData {
            threshold,
            weights,
            covering_stations,
        }
    }
}

pub fn check_demand_consistency(first: &CoverageData, second: &CoverageData) -> Result<()> {
    let a = first.total_demand();
    let b = second.total_demand();
    let scale = a.abs().max(b.abs());
    if scale > 0.0 && (a - b).abs() > DEMAND_TOLERANCE * scale {
        return Err(Error::DemandMismatch {
            first: a,
            second: b,
        });
    }
    Ok(())
}
