use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

use crate::demand::{DemandPoint, PointDemand};
use crate::error::{Error, Result};
use crate::events::{Event, EventKind};
use crate::models::{CallConfig, CallProfile, PoissonCalls, SimConfig};
use crate::state::{
    Ambulance, Call, Hospital, Infrastructure, Location, Priority, SimState, Station,
};
use crate::travel::StraightLineTravel;

/// Builds a ready-to-run state: infrastructure attached, ambulances asleep
/// until their shift wakes them, and the first call arrival enqueued.
pub fn build_state(config: &SimConfig) -> Result<SimState> {
    validate_config(config)?;
    let infra = build_infrastructure(config)?;
    build_state_on(infra, config, 0)
}

/// Builds a state on already-built infrastructure. Generated call streams
/// are drawn with the configured seed plus `seed_offset`, so replications can
/// share the infrastructure and still see different calls.
pub fn build_state_on(
    infra: Arc<Infrastructure>,
    config: &SimConfig,
    seed_offset: u64,
) -> Result<SimState> {
    let stations = station_indices(config)?;
    let mut ambulances = Vec::with_capacity(config.ambulances.len());
    for (index, entry) in config.ambulances.iter().enumerate() {
        let station = *stations
            .get(entry.station.as_str())
            .ok_or_else(|| Error::UnknownStation {
                ambulance: index,
                station: entry.station.clone(),
            })?;
        let mut amb = Ambulance::new(index, entry.class, station, infra.stations[station].location);
        amb.wake_time = entry.wake;
        amb.sleep_time = entry.sleep;
        ambulances.push(amb);
    }

    let calls = build_calls(&config.calls, seed_offset)?;
    let shifts: Vec<(usize, f64, Option<f64>)> = ambulances
        .iter()
        .map(|amb| (amb.index, amb.wake_time, amb.sleep_time))
        .collect();
    let mut state = SimState::new(infra, ambulances, calls).with_stats_period(config.stats_period);

    for (amb, wake, sleep) in shifts {
        state.schedule(Event::new(EventKind::AmbulanceWakes, wake).ambulance(amb))?;
        if let Some(sleep) = sleep {
            state.schedule(Event::new(EventKind::AmbulanceSleeps, sleep).ambulance(amb))?;
        }
    }
    if let Some(first) = state.calls.first() {
        let arrival = first.arrival_time;
        state.schedule(Event::new(EventKind::CallArrives, arrival).call(0))?;
    }
    Ok(state)
}

pub fn validate_config(config: &SimConfig) -> Result<()> {
    if config.stations.is_empty() {
        return Err(Error::EmptyStations);
    }
    if config.ambulances.is_empty() {
        return Err(Error::EmptyAmbulances);
    }
    station_indices(config)?;

    for (index, entry) in config.ambulances.iter().enumerate() {
        if entry.wake < 0.0 {
            return Err(Error::invalid(
                "ambulance",
                format!("ambulance {} wakes before time zero", index),
            ));
        }
        if entry.sleep.is_some_and(|sleep| sleep <= entry.wake) {
            return Err(Error::invalid(
                "ambulance",
                format!("ambulance {} sleeps before it wakes", index),
            ));
        }
    }

    if config.travel.urgent_speed <= 0.0 || config.travel.normal_speed <= 0.0 {
        return Err(Error::invalid("travel", "speeds must be positive"));
    }
    if config.mobilisation_delay < 0.0 {
        return Err(Error::invalid(
            "scenario",
            "mobilisation delay must not be negative",
        ));
    }
    if config.stats_period.is_some_and(|period| period <= 0.0) {
        return Err(Error::invalid("scenario", "stats period must be positive"));
    }
    if config.replications == 0 {
        return Err(Error::invalid(
            "scenario",
            "replications must be at least 1",
        ));
    }
    if config.cover_times.by_priority().iter().flatten().any(|time| *time <= 0.0) {
        return Err(Error::invalid("scenario", "cover times must be positive"));
    }
    if config.demand.iter().any(|point| point.weight < 0.0) {
        return Err(Error::invalid(
            "demand",
            "demand weights must not be negative",
        ));
    }

    let needs_hospital = match &config.calls {
        CallProfile::Listed(calls) => {
            validate_listed(calls)?;
            calls.iter().any(|call| call.transport)
        }
        CallProfile::Poisson(profile) => {
            validate_poisson(profile)?;
            profile.transport_probability > 0.0
        }
    };
    if needs_hospital && config.hospitals.is_empty() {
        return Err(Error::EmptyHospitals);
    }
    Ok(())
}

fn station_indices(config: &SimConfig) -> Result<HashMap<&str, usize>> {
    let mut indices = HashMap::new();
    for (index, station) in config.stations.iter().enumerate() {
        if indices.insert(station.name.as_str(), index).is_some() {
            return Err(Error::DuplicateStationName(station.name.clone()));
        }
    }
    Ok(indices)
}

fn validate_listed(calls: &[CallConfig]) -> Result<()> {
    for (index, call) in calls.iter().enumerate() {
        if index > 0 && call.arrival < calls[index - 1].arrival {
            return Err(Error::UnorderedCalls(index));
        }
        if call.arrival < 0.0
            || call.dispatch_delay < 0.0
            || call.on_scene_duration < 0.0
            || call.handover_duration < 0.0
        {
            return Err(Error::invalid(
                "call",
                format!("call {} has a negative time", index),
            ));
        }
    }
    Ok(())
}

fn validate_poisson(profile: &PoissonCalls) -> Result<()> {
    if profile.rate <= 0.0 {
        return Err(Error::invalid("calls", "rate must be positive"));
    }
    if profile.duration <= 0.0 {
        return Err(Error::invalid("calls", "duration must be positive"));
    }
    let bounds = profile.bounds;
    if bounds.max_x < bounds.min_x || bounds.max_y < bounds.min_y {
        return Err(Error::invalid("calls", "bounds are inverted"));
    }
    if !(0.0..=1.0).contains(&profile.transport_probability) {
        return Err(Error::invalid(
            "calls",
            "transport probability must be within [0, 1]",
        ));
    }
    let weights = profile.priority_mix.weights();
    if weights.iter().any(|weight| *weight < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
        return Err(Error::invalid(
            "calls",
            "priority mix needs a positive total weight",
        ));
    }
    Ok(())
}

pub fn build_infrastructure(config: &SimConfig) -> Result<Arc<Infrastructure>> {
    let stations = config
        .stations
        .iter()
        .enumerate()
        .map(|(index, station)| Station {
            index,
            name: station.name.clone(),
            location: Location::new(station.x, station.y),
            capacity: station.capacity,
        })
        .collect();
    let hospitals = config
        .hospitals
        .iter()
        .enumerate()
        .map(|(index, hospital)| Hospital {
            index,
            name: hospital.name.clone(),
            location: Location::new(hospital.x, hospital.y),
        })
        .collect();

    Ok(Arc::new(Infrastructure {
        stations,
        hospitals,
        cover_times: config.cover_times.by_priority(),
        mobilisation_delay: config.mobilisation_delay,
        travel: Box::new(StraightLineTravel::new(
            config.travel.urgent_speed,
            config.travel.normal_speed,
        )),
        demand: Box::new(PointDemand::new(demand_points(config)?)),
    }))
}

/// Configured demand points, or one unit of demand per call location when
/// none are given.
fn demand_points(config: &SimConfig) -> Result<Vec<DemandPoint>> {
    if !config.demand.is_empty() {
        return Ok(config
            .demand
            .iter()
            .map(|point| DemandPoint {
                location: Location::new(point.x, point.y),
                weight: point.weight,
            })
            .collect());
    }
    Ok(build_calls(&config.calls, 0)?
        .into_iter()
        .map(|call| DemandPoint {
            location: call.location,
            weight: 1.0,
        })
        .collect())
}

pub fn build_calls(profile: &CallProfile, seed_offset: u64) -> Result<Vec<Call>> {
    match profile {
        CallProfile::Listed(calls) => Ok(calls
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let mut call = Call::new(
                    index,
                    entry.priority,
                    Location::new(entry.x, entry.y),
                    entry.arrival,
                );
                call.dispatch_delay = entry.dispatch_delay;
                call.on_scene_duration = entry.on_scene_duration;
                call.transport = entry.transport;
                call.handover_duration = entry.handover_duration;
                call
            })
            .collect()),
        CallProfile::Poisson(profile) => generate_calls(profile, seed_offset),
    }
}

fn generate_calls(profile: &PoissonCalls, seed_offset: u64) -> Result<Vec<Call>> {
    validate_poisson(profile)?;
    let mut rng = StdRng::seed_from_u64(profile.seed.wrapping_add(seed_offset));
    let priorities = WeightedIndex::new(profile.priority_mix.weights())
        .map_err(|err| Error::invalid("calls", format!("bad priority mix: {}", err)))?;
    let bounds = profile.bounds;

    let mut calls = Vec::new();
    let mut time = 0.0;
    loop {
        let mut u = rng.gen::<f64>();
        if u <= f64::MIN_POSITIVE {
            u = f64::MIN_POSITIVE;
        }
        time += -u.ln() / profile.rate;
        if time >= profile.duration {
            break;
        }

        let x = uniform(&mut rng, bounds.min_x, bounds.max_x);
        let y = uniform(&mut rng, bounds.min_y, bounds.max_y);
        let priority = Priority::ALL[priorities.sample(&mut rng)];
        let mut call = Call::new(calls.len(), priority, Location::new(x, y), time);
        call.dispatch_delay = profile.dispatch_delay;
        call.on_scene_duration = profile.on_scene_duration;
        call.transport = rng.gen_bool(profile.transport_probability);
        call.handover_duration = profile.handover_duration;
        calls.push(call);
    }
    Ok(calls)
}

fn uniform(rng: &mut StdRng, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}
