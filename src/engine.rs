use tracing::{debug, info, trace, warn};

use crate::decision_log::DecisionLogger;
use crate::error::{Error, Result};
use crate::events::{Event, EventId, EventKind};
use crate::models::SimConfig;
use crate::moveup::{actionable_moves, build_strategy, MoveUpStrategy};
use crate::scenario::build_state;
use crate::state::{AmbulanceStatus, CallStatus, Priority, SimState, TraceEntry};

/// When a call to [`run`] should hand control back. Bounds are checked
/// between events, never inside a handler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StopCondition {
    Exhaust,
    /// Process events up to and including this absolute time.
    Until(f64),
    /// Process events up to this long after the clock at the start of the call.
    Duration(f64),
    EventCount(u64),
}

impl StopCondition {
    pub fn from_options(
        until: Option<f64>,
        duration: Option<f64>,
        events: Option<u64>,
    ) -> Result<Self> {
        for (name, value) in [("until", until), ("duration", duration)] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::invalid(
                        "stop condition",
                        format!("{} must be finite and non-negative, got {}", name, value),
                    ));
                }
            }
        }
        match (until, duration, events) {
            (None, None, None) => Ok(StopCondition::Exhaust),
            (Some(time), None, None) => Ok(StopCondition::Until(time)),
            (None, Some(length), None) => Ok(StopCondition::Duration(length)),
            (None, None, Some(count)) => Ok(StopCondition::EventCount(count)),
            _ => Err(Error::MultipleStopConditions),
        }
    }

    fn time_bound(self, now: f64) -> Option<f64> {
        match self {
            StopCondition::Until(time) => Some(time),
            StopCondition::Duration(length) => Some(now + length),
            StopCondition::Exhaust | StopCondition::EventCount(_) => None,
        }
    }

    fn event_budget(self) -> Option<u64> {
        match self {
            StopCondition::EventCount(count) => Some(count),
            _ => None,
        }
    }
}

/// Runs the event loop on `state` until the queue empties or `stop` is hit.
/// Returns whether the simulation completed.
pub fn run(
    state: &mut SimState,
    strategy: Option<&dyn MoveUpStrategy>,
    mut logger: Option<&mut DecisionLogger>,
    stop: StopCondition,
) -> Result<bool> {
    if state.complete {
        return Ok(true);
    }
    if let Some(strategy) = strategy {
        if state.events_processed == 0 {
            strategy.initialize(state)?;
        }
    }

    let bound = stop.time_bound(state.time);
    let budget = stop.event_budget();
    let mut handled = 0u64;
    info!(
        strategy = strategy.map_or("none", |s| s.name()),
        start = state.time,
        "running simulation"
    );

    loop {
        let Some(next_time) = state.queue.peek_time() else {
            state.finish();
            break;
        };
        if budget.is_some_and(|limit| handled >= limit) {
            break;
        }
        if bound.is_some_and(|limit| next_time > limit) {
            break;
        }
        let Some(scheduled) = state.queue.pop() else {
            state.finish();
            break;
        };

        let event = scheduled.event;
        debug_assert!(event.time >= state.time, "event queue went back in time");
        capture_due_stats(state, event.time);
        state.time = event.time;
        release_pending(state, scheduled.id, &event);
        if let Some(entries) = state.trace.as_mut() {
            entries.push(TraceEntry {
                time: event.time,
                kind: event.kind,
                ambulance: event.ambulance,
            });
        }
        trace!(time = event.time, kind = %event.kind, "handling event");

        handle(state, strategy, logger.as_deref_mut(), &event, scheduled.id)?;
        state.events_processed += 1;
        handled += 1;
    }

    if state.complete {
        info!(
            end = state.time,
            events = state.events_processed,
            "simulation complete"
        );
    }
    Ok(state.complete)
}

/// Builds the scenario, runs it to the configured stop and returns the final
/// state.
pub fn run_simulation(
    config: &SimConfig,
    logger: Option<&mut DecisionLogger>,
) -> Result<SimState> {
    let stop = StopCondition::from_options(config.until, config.duration, config.max_events)?;
    let strategy = build_strategy(&config.strategy)?;
    let mut state = build_state(config)?;
    run(&mut state, strategy.as_deref(), logger, stop)?;
    Ok(state)
}

fn capture_due_stats(state: &mut SimState, time: f64) {
    let Some(period) = state.stats_period else {
        return;
    };
    while state.next_stats_time <= time {
        let snapshot = state.snapshot(state.next_stats_time);
        state.stats.push(snapshot);
        state.next_stats_time += period;
    }
}

/// A lifecycle event that fires is no longer pending for its ambulance.
fn release_pending(state: &mut SimState, id: EventId, event: &Event) {
    if !event.kind.is_ambulance_lifecycle() {
        return;
    }
    if let Some(amb) = event.ambulance {
        if state.ambulances[amb].pending_event == Some(id) {
            state.ambulances[amb].pending_event = None;
        }
    }
}

fn handle(
    state: &mut SimState,
    strategy: Option<&dyn MoveUpStrategy>,
    logger: Option<&mut DecisionLogger>,
    event: &Event,
    id: EventId,
) -> Result<()> {
    match event.kind {
        EventKind::AmbulanceWakes => ambulance_wakes(state, ambulance_of(event)?),
        EventKind::AmbulanceSleeps => {
            ambulance_sleeps(state, ambulance_of(event)?);
            Ok(())
        }
        EventKind::CallArrives => call_arrives(state, call_of(event)?),
        EventKind::ConsiderDispatch => consider_dispatch(state, call_of(event)?),
        EventKind::AmbulanceDispatched => {
            let amb = ambulance_of(event)?;
            ambulance_dispatched(state, amb, call_of(event)?)?;
            if let Some(strategy) = strategy {
                if strategy.should_trigger_on_dispatch(state) {
                    consider_move_up_now(state, amb, id)?;
                }
            }
            Ok(())
        }
        EventKind::AmbulanceMobilised => ambulance_mobilised(state, ambulance_of(event)?),
        EventKind::AmbulanceReachesCall => ambulance_reaches_call(state, ambulance_of(event)?),
        EventKind::AmbulanceGoesToHospital => {
            ambulance_goes_to_hospital(state, ambulance_of(event)?)
        }
        EventKind::AmbulanceReachesHospital => {
            ambulance_reaches_hospital(state, ambulance_of(event)?)
        }
        EventKind::AmbulanceBecomesFree => {
            let amb = ambulance_of(event)?;
            ambulance_becomes_free(state, amb)?;
            if let Some(strategy) = strategy {
                if strategy.should_trigger_on_free(state) {
                    consider_move_up_now(state, amb, id)?;
                }
            }
            Ok(())
        }
        EventKind::AmbulanceReturnsToStation => {
            ambulance_returns_to_station(state, ambulance_of(event)?)
        }
        EventKind::AmbulanceReachesStation => {
            ambulance_reaches_station(state, ambulance_of(event)?);
            Ok(())
        }
        EventKind::ConsiderMoveUp => match strategy {
            Some(strategy) => consider_move_up(state, strategy, logger, ambulance_of(event)?, id),
            None => Ok(()),
        },
        EventKind::AmbulanceMovesUpToStation => {
            let station = event.station.ok_or_else(|| missing(event.kind, "station"))?;
            ambulance_moves_up(state, ambulance_of(event)?, station)
        }
    }
}

fn ambulance_of(event: &Event) -> Result<usize> {
    event.ambulance.ok_or_else(|| missing(event.kind, "ambulance"))
}

fn call_of(event: &Event) -> Result<usize> {
    event.call.ok_or_else(|| missing(event.kind, "call"))
}

fn missing(kind: EventKind, field: &str) -> Error {
    Error::invalid("event loop", format!("{} event has no {}", kind, field))
}

fn ambulance_wakes(state: &mut SimState, amb: usize) -> Result<()> {
    state.ambulances[amb].sleep_pending = false;
    if state.ambulances[amb].status != AmbulanceStatus::Sleeping {
        return Ok(());
    }
    state.set_status(amb, AmbulanceStatus::IdleAtStation);
    if let Some(call) = take_queued_call(state) {
        assign(state, amb, call)?;
    }
    Ok(())
}

fn ambulance_sleeps(state: &mut SimState, amb: usize) {
    match state.ambulances[amb].status {
        AmbulanceStatus::Sleeping => {}
        AmbulanceStatus::IdleAtStation => state.set_status(amb, AmbulanceStatus::Sleeping),
        _ => state.ambulances[amb].sleep_pending = true,
    }
}

fn call_arrives(state: &mut SimState, call: usize) -> Result<()> {
    let now = state.time;
    state.calls[call].status = CallStatus::Screening;
    let delay = state.calls[call].dispatch_delay;
    state.schedule(Event::new(EventKind::ConsiderDispatch, now + delay).call(call))?;

    state.next_call = call + 1;
    if let Some(next) = state.calls.get(call + 1) {
        let arrival = next.arrival_time.max(now);
        state.schedule(Event::new(EventKind::CallArrives, arrival).call(call + 1))?;
    }
    Ok(())
}

fn consider_dispatch(state: &mut SimState, call: usize) -> Result<()> {
    match nearest_available(state, call) {
        Some(amb) => assign(state, amb, call),
        None => {
            debug!(call, "no ambulance available; queueing call");
            state.calls[call].status = CallStatus::Queued;
            state.queued_calls.push(call);
            Ok(())
        }
    }
}

/// The free ambulance that would reach the call first. Ambulances idle at a
/// station pay the mobilisation delay; ties go to the lowest index.
fn nearest_available(state: &SimState, call: usize) -> Option<usize> {
    let target = state.calls[call].location;
    let priority = state.calls[call].priority;
    let mut best: Option<(usize, f64)> = None;
    for amb in state.ambulances.iter().filter(|amb| amb.is_dispatchable()) {
        let mut arrival = state.travel_time_to(amb.index, target, priority);
        if amb.status == AmbulanceStatus::IdleAtStation {
            arrival += state.infra.mobilisation_delay;
        }
        match best {
            Some((_, fastest)) if arrival >= fastest => {}
            _ => best = Some((amb.index, arrival)),
        }
    }
    best.map(|(index, _)| index)
}

fn assign(state: &mut SimState, amb: usize, call: usize) -> Result<()> {
    state.ambulances[amb].call = Some(call);
    state.calls[call].ambulance = Some(amb);
    let event = Event::new(EventKind::AmbulanceDispatched, state.time)
        .ambulance(amb)
        .call(call);
    state.schedule_for_ambulance(amb, event)?;
    Ok(())
}

/// Highest priority first, then earliest arrival.
fn take_queued_call(state: &mut SimState) -> Option<usize> {
    let position = state
        .queued_calls
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let (a, b) = (&state.calls[**a], &state.calls[**b]);
            a.priority
                .cmp(&b.priority)
                .then(a.arrival_time.total_cmp(&b.arrival_time))
                .then(a.index.cmp(&b.index))
        })
        .map(|(position, _)| position)?;
    Some(state.queued_calls.remove(position))
}

fn ambulance_dispatched(state: &mut SimState, amb: usize, call: usize) -> Result<()> {
    let now = state.time;
    state.ambulances[amb].dispatch_count += 1;
    state.calls[call].status = CallStatus::WaitingForAmbulance;
    state.calls[call].dispatch_time = Some(now);

    if state.ambulances[amb].status == AmbulanceStatus::IdleAtStation {
        state.set_status(amb, AmbulanceStatus::Mobilising);
        let ready = now + state.infra.mobilisation_delay;
        let event = Event::new(EventKind::AmbulanceMobilised, ready)
            .ambulance(amb)
            .call(call);
        state.schedule_for_ambulance(amb, event)?;
        return Ok(());
    }
    drive_to_call(state, amb, call)
}

fn ambulance_mobilised(state: &mut SimState, amb: usize) -> Result<()> {
    let call = assigned_call(state, amb)?;
    drive_to_call(state, amb, call)
}

fn drive_to_call(state: &mut SimState, amb: usize, call: usize) -> Result<()> {
    state.set_status(amb, AmbulanceStatus::GoingToCall);
    let (location, priority) = (state.calls[call].location, state.calls[call].priority);
    let arrival = state.start_route(amb, location, priority);
    let event = Event::new(EventKind::AmbulanceReachesCall, arrival)
        .ambulance(amb)
        .call(call);
    state.schedule_for_ambulance(amb, event)?;
    Ok(())
}

fn assigned_call(state: &SimState, amb: usize) -> Result<usize> {
    state.ambulances[amb].call.ok_or_else(|| {
        Error::invalid(
            "event loop",
            format!("ambulance {} has no assigned call", amb),
        )
    })
}

fn ambulance_reaches_call(state: &mut SimState, amb: usize) -> Result<()> {
    let now = state.time;
    let call = assigned_call(state, amb)?;
    state.set_status(amb, AmbulanceStatus::AtCall);
    let record = &mut state.calls[call];
    record.status = CallStatus::OnScene;
    record.on_scene_time = Some(now);

    let next = if record.transport {
        EventKind::AmbulanceGoesToHospital
    } else {
        EventKind::AmbulanceBecomesFree
    };
    let leaves = now + record.on_scene_duration;
    state.schedule_for_ambulance(amb, Event::new(next, leaves).ambulance(amb).call(call))?;
    Ok(())
}

fn ambulance_goes_to_hospital(state: &mut SimState, amb: usize) -> Result<()> {
    let call = assigned_call(state, amb)?;
    let from = state.calls[call].location;
    let priority = state.calls[call].priority;
    let hospital = state
        .infra
        .hospitals
        .iter()
        .map(|hospital| {
            let time = state.infra.travel.travel_time(from, hospital.location, priority);
            (hospital.index, time)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(index, _)| index)
        .ok_or(Error::EmptyHospitals)?;

    state.set_status(amb, AmbulanceStatus::GoingToHospital);
    state.calls[call].status = CallStatus::GoingToHospital;
    state.calls[call].hospital = Some(hospital);
    let location = state.infra.hospitals[hospital].location;
    let arrival = state.start_route(amb, location, priority);
    let event = Event::new(EventKind::AmbulanceReachesHospital, arrival)
        .ambulance(amb)
        .call(call);
    state.schedule_for_ambulance(amb, event)?;
    Ok(())
}

fn ambulance_reaches_hospital(state: &mut SimState, amb: usize) -> Result<()> {
    let now = state.time;
    let call = assigned_call(state, amb)?;
    state.set_status(amb, AmbulanceStatus::AtHospital);
    state.calls[call].status = CallStatus::AtHospital;
    state.calls[call].hospital_arrival_time = Some(now);
    let free_at = now + state.calls[call].handover_duration;
    let event = Event::new(EventKind::AmbulanceBecomesFree, free_at)
        .ambulance(amb)
        .call(call);
    state.schedule_for_ambulance(amb, event)?;
    Ok(())
}

fn ambulance_becomes_free(state: &mut SimState, amb: usize) -> Result<()> {
    let now = state.time;
    let call = assigned_call(state, amb)?;
    state.set_status(amb, AmbulanceStatus::FreeAfterCall);
    state.calls[call].status = CallStatus::Processed;
    state.calls[call].departure_time = Some(now);
    state.ambulances[amb].call = None;

    if let Some(queued) = take_queued_call(state) {
        return assign(state, amb, queued);
    }
    let event = Event::new(EventKind::AmbulanceReturnsToStation, now).ambulance(amb);
    state.schedule_for_ambulance(amb, event)?;
    Ok(())
}

fn ambulance_returns_to_station(state: &mut SimState, amb: usize) -> Result<()> {
    state.set_status(amb, AmbulanceStatus::ReturningToStation);
    head_to_station(state, amb)
}

fn head_to_station(state: &mut SimState, amb: usize) -> Result<()> {
    let station = state.ambulances[amb].station;
    let location = state.stations()[station].location;
    let arrival = state.start_route(amb, location, Priority::Low);
    let event = Event::new(EventKind::AmbulanceReachesStation, arrival)
        .ambulance(amb)
        .station(station);
    state.schedule_for_ambulance(amb, event)?;
    Ok(())
}

fn ambulance_reaches_station(state: &mut SimState, amb: usize) {
    if state.ambulances[amb].sleep_pending {
        state.ambulances[amb].sleep_pending = false;
        state.set_status(amb, AmbulanceStatus::Sleeping);
    } else {
        state.set_status(amb, AmbulanceStatus::IdleAtStation);
    }
}

fn ambulance_moves_up(state: &mut SimState, amb: usize, station: usize) -> Result<()> {
    state.set_status(amb, AmbulanceStatus::MovingUpToStation);
    state.set_station(amb, station);
    state.ambulances[amb].relocation_count += 1;
    head_to_station(state, amb)
}

fn consider_move_up_now(state: &mut SimState, amb: usize, parent: EventId) -> Result<()> {
    let event = Event::new(EventKind::ConsiderMoveUp, state.time)
        .ambulance(amb)
        .parent(Some(parent));
    state.schedule(event)?;
    Ok(())
}

fn consider_move_up(
    state: &mut SimState,
    strategy: &dyn MoveUpStrategy,
    logger: Option<&mut DecisionLogger>,
    amb: usize,
    id: EventId,
) -> Result<()> {
    state.moveups_considered += 1;
    let decision = strategy.decide(state, amb)?;

    if let Some(logger) = logger {
        let entry = DecisionLogger::create_entry(
            strategy,
            state,
            amb,
            decision.features.clone(),
            decision.raw_output.clone(),
            decision.ambulances.clone(),
            decision.stations.clone(),
        );
        logger.add_entry(entry);
    }

    let moves = match actionable_moves(state, &decision) {
        Ok(moves) => moves,
        Err(err) => {
            warn!(
                strategy = strategy.name(),
                ambulance = amb,
                time = state.time,
                %err,
                "rejected move-up decision"
            );
            return Ok(());
        }
    };

    for (ambulance, station) in moves {
        debug!(ambulance, station, time = state.time, "scheduling move-up");
        let event = Event::new(EventKind::AmbulanceMovesUpToStation, state.time)
            .ambulance(ambulance)
            .station(station)
            .parent(Some(id));
        state.schedule_for_ambulance(ambulance, event)?;
    }
    Ok(())
}
