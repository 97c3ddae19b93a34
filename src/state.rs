use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::demand::DemandModel;
use crate::error::{Error, Result};
use crate::events::{Event, EventId, EventKind, EventQueue};
use crate::travel::TravelTimes;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn lerp(self, to: Location, fraction: f64) -> Location {
        Location {
            x: self.x + (to.x - self.x) * fraction,
            y: self.y + (to.y - self.y) * fraction,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{}", label)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbulanceClass {
    #[default]
    Als,
    Bls,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbulanceStatus {
    Sleeping,
    IdleAtStation,
    Mobilising,
    GoingToCall,
    AtCall,
    GoingToHospital,
    AtHospital,
    FreeAfterCall,
    ReturningToStation,
    MovingUpToStation,
}

impl AmbulanceStatus {
    pub const COUNT: usize = 10;

    pub fn index(self) -> usize {
        match self {
            AmbulanceStatus::Sleeping => 0,
            AmbulanceStatus::IdleAtStation => 1,
            AmbulanceStatus::Mobilising => 2,
            AmbulanceStatus::GoingToCall => 3,
            AmbulanceStatus::AtCall => 4,
            AmbulanceStatus::GoingToHospital => 5,
            AmbulanceStatus::AtHospital => 6,
            AmbulanceStatus::FreeAfterCall => 7,
            AmbulanceStatus::ReturningToStation => 8,
            AmbulanceStatus::MovingUpToStation => 9,
        }
    }

    /// Statuses from which a move-up may send the ambulance elsewhere.
    pub fn is_relocatable(self) -> bool {
        matches!(
            self,
            AmbulanceStatus::IdleAtStation
                | AmbulanceStatus::FreeAfterCall
                | AmbulanceStatus::ReturningToStation
                | AmbulanceStatus::MovingUpToStation
        )
    }

    pub fn is_working(self) -> bool {
        !matches!(
            self,
            AmbulanceStatus::Sleeping | AmbulanceStatus::IdleAtStation
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Screening,
    Queued,
    WaitingForAmbulance,
    OnScene,
    GoingToHospital,
    AtHospital,
    Processed,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Route {
    pub start: Location,
    pub end: Location,
    pub start_time: f64,
    pub end_time: f64,
    pub distance: f64,
}

impl Route {
    pub fn stationary(at: Location, time: f64) -> Self {
        Self {
            start: at,
            end: at,
            start_time: time,
            end_time: time,
            distance: 0.0,
        }
    }

    pub fn fraction_at(&self, time: f64) -> f64 {
        if self.end_time <= self.start_time || time >= self.end_time {
            return 1.0;
        }
        if time <= self.start_time {
            return 0.0;
        }
        (time - self.start_time) / (self.end_time - self.start_time)
    }

    pub fn location_at(&self, time: f64) -> Location {
        self.start.lerp(self.end, self.fraction_at(time))
    }

    pub fn distance_at(&self, time: f64) -> f64 {
        self.distance * self.fraction_at(time)
    }
}

#[derive(Clone, Debug)]
pub struct Ambulance {
    pub index: usize,
    pub class: AmbulanceClass,
    pub status: AmbulanceStatus,
    pub station: usize,
    pub call: Option<usize>,
    pub route: Route,
    pub pending_event: Option<EventId>,
    pub dispatch_count: u32,
    pub relocation_count: u32,
    pub distance_travelled: f64,
    pub status_durations: [f64; AmbulanceStatus::COUNT],
    pub status_since: f64,
    pub wake_time: f64,
    pub sleep_time: Option<f64>,
    pub sleep_pending: bool,
}

impl Ambulance {
    pub fn new(index: usize, class: AmbulanceClass, station: usize, at: Location) -> Self {
        Self {
            index,
            class,
            status: AmbulanceStatus::Sleeping,
            station,
            call: None,
            route: Route::stationary(at, 0.0),
            pending_event: None,
            dispatch_count: 0,
            relocation_count: 0,
            distance_travelled: 0.0,
            status_durations: [0.0; AmbulanceStatus::COUNT],
            status_since: 0.0,
            wake_time: 0.0,
            sleep_time: None,
            sleep_pending: false,
        }
    }

    pub fn is_relocatable(&self) -> bool {
        self.call.is_none() && self.status.is_relocatable()
    }

    pub fn is_dispatchable(&self) -> bool {
        self.is_relocatable()
    }

    pub fn duration_in(&self, status: AmbulanceStatus) -> f64 {
        self.status_durations[status.index()]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Station {
    pub index: usize,
    pub name: String,
    pub location: Location,
    pub capacity: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hospital {
    pub index: usize,
    pub name: String,
    pub location: Location,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub index: usize,
    pub priority: Priority,
    pub location: Location,
    pub arrival_time: f64,
    pub dispatch_delay: f64,
    pub on_scene_duration: f64,
    pub transport: bool,
    pub handover_duration: f64,
    pub status: CallStatus,
    pub ambulance: Option<usize>,
    pub hospital: Option<usize>,
    pub dispatch_time: Option<f64>,
    pub on_scene_time: Option<f64>,
    pub hospital_arrival_time: Option<f64>,
    pub departure_time: Option<f64>,
}

impl Call {
    pub fn new(index: usize, priority: Priority, location: Location, arrival_time: f64) -> Self {
        Self {
            index,
            priority,
            location,
            arrival_time,
            dispatch_delay: 0.0,
            on_scene_duration: 0.0,
            transport: false,
            handover_duration: 0.0,
            status: CallStatus::Screening,
            ambulance: None,
            hospital: None,
            dispatch_time: None,
            on_scene_time: None,
            hospital_arrival_time: None,
            departure_time: None,
        }
    }

    pub fn response_duration(&self) -> Option<f64> {
        self.on_scene_time.map(|time| time - self.arrival_time)
    }
}

/// Read-only data shared by every replication of a scenario.
pub struct Infrastructure {
    pub stations: Vec<Station>,
    pub hospitals: Vec<Hospital>,
    pub cover_times: [Option<f64>; 3],
    pub mobilisation_delay: f64,
    pub travel: Box<dyn TravelTimes>,
    pub demand: Box<dyn DemandModel>,
}

impl Infrastructure {
    pub fn cover_time(&self, priority: Priority) -> Option<f64> {
        self.cover_times[priority.index()]
    }
}

impl fmt::Debug for Infrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Infrastructure")
            .field("stations", &self.stations.len())
            .field("hospitals", &self.hospitals.len())
            .field("cover_times", &self.cover_times)
            .field("mobilisation_delay", &self.mobilisation_delay)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatsSnapshot {
    pub time: f64,
    pub station_idle: Vec<u32>,
    pub ambulances: Vec<(AmbulanceStatus, usize)>,
    pub queued_calls: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceEntry {
    pub time: f64,
    pub kind: EventKind,
    pub ambulance: Option<usize>,
}

/// Mutable state owned by a single replication. Cloning shares the
/// infrastructure and copies everything else.
#[derive(Clone, Debug)]
pub struct SimState {
    pub infra: Arc<Infrastructure>,
    pub ambulances: Vec<Ambulance>,
    pub calls: Vec<Call>,
    pub station_idle: Vec<u32>,
    pub queue: EventQueue,
    pub time: f64,
    pub start_time: f64,
    pub queued_calls: Vec<usize>,
    pub next_call: usize,
    pub events_processed: u64,
    pub moveups_considered: u64,
    pub stats_period: Option<f64>,
    pub next_stats_time: f64,
    pub stats: Vec<StatsSnapshot>,
    pub trace: Option<Vec<TraceEntry>>,
    pub complete: bool,
    pub end_time: Option<f64>,
}

impl SimState {
    pub fn new(infra: Arc<Infrastructure>, ambulances: Vec<Ambulance>, calls: Vec<Call>) -> Self {
        let station_idle = vec![0; infra.stations.len()];
        Self {
            infra,
            ambulances,
            calls,
            station_idle,
            queue: EventQueue::new(),
            time: 0.0,
            start_time: 0.0,
            queued_calls: Vec::new(),
            next_call: 0,
            events_processed: 0,
            moveups_considered: 0,
            stats_period: None,
            next_stats_time: 0.0,
            stats: Vec::new(),
            trace: None,
            complete: false,
            end_time: None,
        }
    }

    pub fn with_stats_period(mut self, period: Option<f64>) -> Self {
        self.stats_period = period.filter(|value| *value > 0.0);
        self.next_stats_time = self.time;
        self
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled.then(Vec::new);
        self
    }

    pub fn stations(&self) -> &[Station] {
        &self.infra.stations
    }

    pub fn idle_count(&self, station: usize) -> u32 {
        self.station_idle[station]
    }

    pub fn schedule(&mut self, event: Event) -> Result<EventId> {
        if event.time < self.time {
            return Err(Error::EventInPast {
                time: event.time,
                now: self.time,
            });
        }
        Ok(self.queue.push(event))
    }

    /// Schedules the next lifecycle event of an ambulance, replacing any
    /// pending one.
    pub fn schedule_for_ambulance(&mut self, ambulance: usize, event: Event) -> Result<EventId> {
        self.cancel_pending(ambulance);
        let id = self.schedule(event)?;
        self.ambulances[ambulance].pending_event = Some(id);
        Ok(id)
    }

    pub fn cancel_pending(&mut self, ambulance: usize) -> Option<EventId> {
        let pending = self.ambulances[ambulance].pending_event.take()?;
        self.queue.cancel(pending);
        Some(pending)
    }

    /// The only place an ambulance changes status; keeps the station idle
    /// counters and per-status durations in step.
    pub fn set_status(&mut self, ambulance: usize, status: AmbulanceStatus) {
        let now = self.time;
        let amb = &mut self.ambulances[ambulance];
        if amb.status == status {
            return;
        }
        amb.status_durations[amb.status.index()] += now - amb.status_since;
        amb.status_since = now;
        let previous = amb.status;
        amb.status = status;
        let station = amb.station;

        if previous == AmbulanceStatus::IdleAtStation {
            debug_assert!(self.station_idle[station] > 0, "idle count underflow");
            self.station_idle[station] = self.station_idle[station].saturating_sub(1);
        }
        if status == AmbulanceStatus::IdleAtStation {
            self.station_idle[station] += 1;
        }
    }

    /// Reassigns an ambulance to another station, moving its idle slot with it.
    pub fn set_station(&mut self, ambulance: usize, station: usize) {
        let amb = &mut self.ambulances[ambulance];
        let previous = amb.station;
        amb.station = station;
        if amb.status == AmbulanceStatus::IdleAtStation && previous != station {
            self.station_idle[previous] = self.station_idle[previous].saturating_sub(1);
            self.station_idle[station] += 1;
        }
    }

    pub fn ambulance_location(&self, ambulance: usize) -> Location {
        self.ambulances[ambulance].route.location_at(self.time)
    }

    /// Starts a new route for the ambulance from wherever it is now and
    /// returns the arrival time.
    pub fn start_route(&mut self, ambulance: usize, to: Location, priority: Priority) -> f64 {
        let now = self.time;
        let from = self.ambulance_location(ambulance);
        let duration = self.infra.travel.travel_time(from, to, priority);
        let distance = self.infra.travel.distance(from, to);
        let amb = &mut self.ambulances[ambulance];
        amb.distance_travelled += amb.route.distance_at(now);
        amb.route = Route {
            start: from,
            end: to,
            start_time: now,
            end_time: now + duration,
            distance,
        };
        now + duration
    }

    pub fn travel_time_to(&self, ambulance: usize, to: Location, priority: Priority) -> f64 {
        let from = self.ambulance_location(ambulance);
        self.infra.travel.travel_time(from, to, priority)
    }

    pub fn snapshot(&self, time: f64) -> StatsSnapshot {
        StatsSnapshot {
            time,
            station_idle: self.station_idle.clone(),
            ambulances: self
                .ambulances
                .iter()
                .map(|amb| (amb.status, amb.station))
                .collect(),
            queued_calls: self.queued_calls.len(),
        }
    }

    /// Idle counts recomputed from ambulance statuses, for invariant checks.
    pub fn recount_idle(&self) -> Vec<u32> {
        let mut counts = vec![0; self.station_idle.len()];
        for amb in &self.ambulances {
            if amb.status == AmbulanceStatus::IdleAtStation {
                counts[amb.station] += 1;
            }
        }
        counts
    }

    pub fn finish(&mut self) {
        let end = self.time;
        for amb in &mut self.ambulances {
            amb.status_durations[amb.status.index()] += end - amb.status_since;
            amb.status_since = end;
        }
        self.complete = true;
        self.end_time = Some(end);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::demand::{DemandPoint, PointDemand};
    use crate::travel::StraightLineTravel;

    /// Three stations on a line 10 units apart, one hospital in the middle.
    pub fn line_infrastructure() -> Infrastructure {
        let stations = (0..3)
            .map(|index| Station {
                index,
                name: format!("s{}", index + 1),
                location: Location::new(index as f64 * 10.0, 0.0),
                capacity: 2,
            })
            .collect();
        Infrastructure {
            stations,
            hospitals: vec![Hospital {
                index: 0,
                name: "h1".to_string(),
                location: Location::new(10.0, 5.0),
            }],
            cover_times: [Some(8.0), None, Some(15.0)],
            mobilisation_delay: 1.0,
            travel: Box::new(StraightLineTravel::new(1.0, 1.0)),
            demand: Box::new(PointDemand::new(vec![
                DemandPoint {
                    location: Location::new(0.0, 2.0),
                    weight: 2.0,
                },
                DemandPoint {
                    location: Location::new(12.0, 0.0),
                    weight: 1.0,
                },
                DemandPoint {
                    location: Location::new(24.0, 0.0),
                    weight: 3.0,
                },
            ])),
        }
    }

    pub fn state_with(ambulance_stations: &[usize], calls: Vec<Call>) -> SimState {
        let infra = Arc::new(line_infrastructure());
        let ambulances = ambulance_stations
            .iter()
            .enumerate()
            .map(|(index, station)| {
                Ambulance::new(
                    index,
                    AmbulanceClass::Als,
                    *station,
                    infra.stations[*station].location,
                )
            })
            .collect();
        SimState::new(infra, ambulances, calls)
    }

    /// Puts every ambulance idle at its station at time zero.
    pub fn idle_state(ambulance_stations: &[usize]) -> SimState {
        let mut state = state_with(ambulance_stations, Vec::new());
        for index in 0..state.ambulances.len() {
            state.set_status(index, AmbulanceStatus::IdleAtStation);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn idle_counter_follows_status_changes() {
        let mut state = idle_state(&[0, 0, 2]);
        assert_eq!(state.station_idle, vec![2, 0, 1]);

        state.set_status(1, AmbulanceStatus::GoingToCall);
        assert_eq!(state.station_idle, vec![1, 0, 1]);
        assert_eq!(state.station_idle, state.recount_idle());

        state.set_station(0, 1);
        assert_eq!(state.station_idle, vec![0, 1, 1]);
        assert_eq!(state.station_idle, state.recount_idle());
    }

    #[test]
    fn status_durations_accumulate_until_finish() {
        let mut state = idle_state(&[0]);
        state.time = 4.0;
        state.set_status(0, AmbulanceStatus::GoingToCall);
        state.time = 10.0;
        state.finish();

        let amb = &state.ambulances[0];
        assert_eq!(amb.duration_in(AmbulanceStatus::IdleAtStation), 4.0);
        assert_eq!(amb.duration_in(AmbulanceStatus::GoingToCall), 6.0);
        assert!(state.complete);
        assert_eq!(state.end_time, Some(10.0));
    }

    #[test]
    fn route_interpolates_location_and_distance() {
        let route = Route {
            start: Location::new(0.0, 0.0),
            end: Location::new(10.0, 0.0),
            start_time: 0.0,
            end_time: 10.0,
            distance: 10.0,
        };
        assert_eq!(route.location_at(2.5), Location::new(2.5, 0.0));
        assert_eq!(route.distance_at(5.0), 5.0);
        assert_eq!(route.location_at(20.0), Location::new(10.0, 0.0));
    }

    #[test]
    fn redirected_route_counts_partial_distance() {
        let mut state = idle_state(&[0]);
        let arrival = state.start_route(0, Location::new(10.0, 0.0), Priority::Low);
        assert_eq!(arrival, 10.0);
        state.time = 4.0;
        state.start_route(0, Location::new(0.0, 0.0), Priority::Low);
        assert_eq!(state.ambulances[0].distance_travelled, 4.0);
        assert_eq!(state.ambulances[0].route.start, Location::new(4.0, 0.0));
    }

    #[test]
    fn scheduling_in_the_past_is_rejected() {
        let mut state = idle_state(&[0]);
        state.time = 5.0;
        let result = state.schedule(Event::new(EventKind::CallArrives, 4.0));
        assert!(matches!(result, Err(Error::EventInPast { .. })));
    }
}
