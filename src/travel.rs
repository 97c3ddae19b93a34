use crate::state::{Location, Priority};

/// Travel-time service the simulator consults for every route it plans.
///
/// Implementations must be pure: the same query always gives the same
/// answer, since replications share one instance.
pub trait TravelTimes: Send + Sync {
    fn travel_time(&self, from: Location, to: Location, priority: Priority) -> f64;

    fn distance(&self, from: Location, to: Location) -> f64;
}

/// Euclidean distance at a constant speed. High-priority travel uses the
/// lights-and-sirens speed.
#[derive(Clone, Debug, PartialEq)]
pub struct StraightLineTravel {
    pub urgent_speed: f64,
    pub normal_speed: f64,
}

impl StraightLineTravel {
    pub fn new(urgent_speed: f64, normal_speed: f64) -> Self {
        Self {
            urgent_speed,
            normal_speed,
        }
    }

    fn speed(&self, priority: Priority) -> f64 {
        match priority {
            Priority::High => self.urgent_speed,
            Priority::Medium | Priority::Low => self.normal_speed,
        }
    }
}

impl TravelTimes for StraightLineTravel {
    fn travel_time(&self, from: Location, to: Location, priority: Priority) -> f64 {
        self.distance(from, to) / self.speed(priority)
    }

    fn distance(&self, from: Location, to: Location) -> f64 {
        (to.x - from.x).hypot(to.y - from.y)
    }
}
