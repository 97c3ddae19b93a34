use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

pub type EventId = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    AmbulanceWakes,
    AmbulanceSleeps,
    CallArrives,
    ConsiderDispatch,
    AmbulanceDispatched,
    AmbulanceMobilised,
    AmbulanceReachesCall,
    AmbulanceGoesToHospital,
    AmbulanceReachesHospital,
    AmbulanceBecomesFree,
    AmbulanceReturnsToStation,
    AmbulanceReachesStation,
    ConsiderMoveUp,
    AmbulanceMovesUpToStation,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::AmbulanceWakes,
        EventKind::AmbulanceSleeps,
        EventKind::CallArrives,
        EventKind::ConsiderDispatch,
        EventKind::AmbulanceDispatched,
        EventKind::AmbulanceMobilised,
        EventKind::AmbulanceReachesCall,
        EventKind::AmbulanceGoesToHospital,
        EventKind::AmbulanceReachesHospital,
        EventKind::AmbulanceBecomesFree,
        EventKind::AmbulanceReturnsToStation,
        EventKind::AmbulanceReachesStation,
        EventKind::ConsiderMoveUp,
        EventKind::AmbulanceMovesUpToStation,
    ];

    /// Kinds that make up an ambulance's own lifecycle. At most one of these
    /// is pending per ambulance, and it is the one a dispatch or move-up
    /// cancels.
    pub fn is_ambulance_lifecycle(self) -> bool {
        matches!(
            self,
            EventKind::AmbulanceDispatched
                | EventKind::AmbulanceMobilised
                | EventKind::AmbulanceReachesCall
                | EventKind::AmbulanceGoesToHospital
                | EventKind::AmbulanceReachesHospital
                | EventKind::AmbulanceBecomesFree
                | EventKind::AmbulanceReturnsToStation
                | EventKind::AmbulanceReachesStation
                | EventKind::AmbulanceMovesUpToStation
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub time: f64,
    pub ambulance: Option<usize>,
    pub call: Option<usize>,
    pub station: Option<usize>,
    pub parent: Option<EventId>,
}

impl Event {
    pub fn new(kind: EventKind, time: f64) -> Self {
        Self {
            kind,
            time,
            ambulance: None,
            call: None,
            station: None,
            parent: None,
        }
    }

    pub fn ambulance(mut self, ambulance: usize) -> Self {
        self.ambulance = Some(ambulance);
        self
    }

    pub fn call(mut self, call: usize) -> Self {
        self.call = Some(call);
        self
    }

    pub fn station(mut self, station: usize) -> Self {
        self.station = Some(station);
        self
    }

    pub fn parent(mut self, parent: Option<EventId>) -> Self {
        self.parent = parent;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ScheduledEvent {
    pub id: EventId,
    pub event: Event,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEvent {}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.event
            .time
            .total_cmp(&other.event.time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending events ordered by time, first-enqueued first among equal times.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
    cancelled: HashSet<EventId>,
    next_id: EventId,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(ScheduledEvent { id, event }));
        id
    }

    /// Marks a pending event so that it is dropped instead of popped.
    /// Returns false if the id was already cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.cancelled.insert(id)
    }

    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        while let Some(Reverse(scheduled)) = self.heap.pop() {
            if self.cancelled.remove(&scheduled.id) {
                continue;
            }
            return Some(scheduled);
        }
        None
    }

    pub fn peek_time(&mut self) -> Option<f64> {
        self.discard_cancelled_head();
        self.heap.peek().map(|Reverse(scheduled)| scheduled.event.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len().saturating_sub(self.cancelled.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.heap
            .iter()
            .map(|Reverse(scheduled)| scheduled)
            .filter(|scheduled| !self.cancelled.contains(&scheduled.id))
    }

    fn discard_cancelled_head(&mut self) {
        while let Some(Reverse(head)) = self.heap.peek() {
            if !self.cancelled.contains(&head.id) {
                break;
            }
            let id = head.id;
            self.heap.pop();
            self.cancelled.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_events_in_time_order() {
        let mut queue = EventQueue::new();
        queue.push(Event::new(EventKind::CallArrives, 10.0));
        queue.push(Event::new(EventKind::CallArrives, 5.0));
        queue.push(Event::new(EventKind::CallArrives, 20.0));

        let times: Vec<f64> = std::iter::from_fn(|| queue.pop())
            .map(|scheduled| scheduled.event.time)
            .collect();
        assert_eq!(times, vec![5.0, 10.0, 20.0]);
    }

    #[test]
    fn equal_times_pop_in_insertion_order() {
        let mut queue = EventQueue::new();
        queue.push(Event::new(EventKind::AmbulanceBecomesFree, 3.0).ambulance(0));
        queue.push(Event::new(EventKind::AmbulanceReturnsToStation, 3.0).ambulance(0));
        queue.push(Event::new(EventKind::ConsiderMoveUp, 3.0).ambulance(0));

        let kinds: Vec<EventKind> = std::iter::from_fn(|| queue.pop())
            .map(|scheduled| scheduled.event.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::AmbulanceBecomesFree,
                EventKind::AmbulanceReturnsToStation,
                EventKind::ConsiderMoveUp,
            ]
        );
    }

    #[test]
    fn cancelled_events_are_skipped() {
        let mut queue = EventQueue::new();
        let first = queue.push(Event::new(EventKind::AmbulanceReachesStation, 1.0));
        queue.push(Event::new(EventKind::CallArrives, 2.0));
        assert!(queue.cancel(first));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_time(), Some(2.0));
        let popped = queue.pop().expect("one event left");
        assert_eq!(popped.event.kind, EventKind::CallArrives);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn lifecycle_kinds_exclude_schedule_and_decision_events() {
        assert!(!EventKind::AmbulanceWakes.is_ambulance_lifecycle());
        assert!(!EventKind::ConsiderMoveUp.is_ambulance_lifecycle());
        assert!(EventKind::AmbulanceReachesStation.is_ambulance_lifecycle());
    }
}
