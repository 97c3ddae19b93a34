//! Dynamic double-standard model (DDSM) relocation.
//!
//! Every invocation solves a binary program over the ambulances that may
//! move: maximise demand covered twice within the short threshold, minus the
//! travel cost of the chosen moves, minus a heavy penalty on the slack that
//! lets the coverage floors be missed. The solve runs inline, so its cost is
//! paid on every triggered decision.

use good_lp::{
    constraint, variable, Constraint, Expression, ProblemVariables, Solution, Solver,
    SolverModel, Variable,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::demand::{check_demand_consistency, CoverageData};
use crate::error::{Error, Result};
use crate::moveup::{
    relocatable_ambulances, MoveUpDecision, MoveUpStrategy, RawOutput,
};
use crate::state::{Priority, SimState};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    #[default]
    Microlp,
    Cbc,
    Glpk,
    Gurobi,
}

impl SolverKind {
    pub fn is_available(self) -> bool {
        match self {
            SolverKind::Microlp => true,
            SolverKind::Cbc => cfg!(feature = "cbc"),
            SolverKind::Glpk | SolverKind::Gurobi => cfg!(feature = "lp-solvers"),
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SolverKind::Microlp => "microlp",
            SolverKind::Cbc => "cbc",
            SolverKind::Glpk => "glpk",
            SolverKind::Gurobi => "gurobi",
        };
        write!(f, "{}", label)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DdsmParams {
    /// Share of demand that must be covered within the short threshold.
    #[serde(default = "default_coverage_target")]
    pub coverage_target: f64,
    /// Cost per unit of relocation travel time.
    #[serde(default = "default_travel_cost")]
    pub travel_cost: f64,
    #[serde(default = "default_slack_weight")]
    pub slack_weight: f64,
    /// Priorities whose coverage times give the short and long thresholds,
    /// higher priority first.
    #[serde(default = "default_priorities")]
    pub priorities: Vec<Priority>,
    #[serde(default)]
    pub solver: SolverKind,
    #[serde(default = "default_bin_tolerance")]
    pub bin_tolerance: f64,
    #[serde(default = "default_true")]
    pub trigger_on_dispatch: bool,
    #[serde(default = "default_true")]
    pub trigger_on_free: bool,
}

impl Default for DdsmParams {
    fn default() -> Self {
        Self {
            coverage_target: default_coverage_target(),
            travel_cost: default_travel_cost(),
            slack_weight: default_slack_weight(),
            priorities: default_priorities(),
            solver: SolverKind::default(),
            bin_tolerance: default_bin_tolerance(),
            trigger_on_dispatch: true,
            trigger_on_free: true,
        }
    }
}

fn default_coverage_target() -> f64 {
    0.98
}

fn default_travel_cost() -> f64 {
    0.01
}

fn default_slack_weight() -> f64 {
    1e9
}

fn default_priorities() -> Vec<Priority> {
    vec![Priority::High, Priority::Low]
}

fn default_bin_tolerance() -> f64 {
    1e-5
}

fn default_true() -> bool {
    true
}

impl DdsmParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.coverage_target) {
            return Err(Error::invalid(
                "ddsm",
                format!("coverage_target must be in [0, 1] (got {})", self.coverage_target),
            ));
        }
        if !(self.travel_cost > 0.0 && self.travel_cost.is_finite()) {
            return Err(Error::invalid(
                "ddsm",
                format!("travel_cost must be > 0 (got {})", self.travel_cost),
            ));
        }
        if !(self.slack_weight > 0.0 && self.slack_weight.is_finite()) {
            return Err(Error::invalid(
                "ddsm",
                format!("slack_weight must be > 0 (got {})", self.slack_weight),
            ));
        }
        if self.priorities.len() != 2 {
            return Err(Error::invalid(
                "ddsm",
                format!("exactly two priorities required (got {})", self.priorities.len()),
            ));
        }
        if self.priorities[0] >= self.priorities[1] {
            return Err(Error::invalid(
                "ddsm",
                "priorities must be distinct and listed highest first",
            ));
        }
        if !(self.bin_tolerance > 0.0 && self.bin_tolerance < 0.1) {
            return Err(Error::invalid(
                "ddsm",
                format!("bin_tolerance must be in (0, 0.1) (got {})", self.bin_tolerance),
            ));
        }
        if !self.solver.is_available() {
            return Err(Error::SolverUnavailable(self.solver.to_string()));
        }
        Ok(())
    }
}

pub struct DdsmStrategy {
    params: DdsmParams,
    thresholds: OnceLock<(f64, f64)>,
}

impl DdsmStrategy {
    pub fn new(params: DdsmParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            thresholds: OnceLock::new(),
        })
    }

    pub fn params(&self) -> &DdsmParams {
        &self.params
    }

    /// Coverage thresholds from the configured priorities, computed on first
    /// use and then shared by every caller.
    pub fn thresholds(&self, state: &SimState) -> Result<(f64, f64)> {
        if let Some(thresholds) = self.thresholds.get() {
            return Ok(*thresholds);
        }
        let mut times = Vec::with_capacity(2);
        for priority in &self.params.priorities {
            let time = state.infra.cover_time(*priority).ok_or_else(|| {
                Error::invalid("ddsm", format!("no coverage time for priority {}", priority))
            })?;
            times.push(time);
        }
        if times[0] >= times[1] {
            return Err(Error::invalid(
                "ddsm",
                format!(
                    "coverage time for {} ({}) must be below that for {} ({})",
                    self.params.priorities[0], times[0], self.params.priorities[1], times[1]
                ),
            ));
        }
        let thresholds = (times[0], times[1]);
        let _ = self.thresholds.set(thresholds);
        Ok(thresholds)
    }

    fn coverage(&self, state: &SimState, priority: Priority, threshold: f64) -> CoverageData {
        let infra = &state.infra;
        infra
            .demand
            .coverage(&infra.stations, infra.travel.as_ref(), priority, threshold)
    }

    fn solve(&self, problem: Formulation) -> Result<Option<Vec<Vec<f64>>>> {
        let outcome = match self.params.solver {
            SolverKind::Microlp => problem.solve_with(good_lp::microlp),
            #[cfg(feature = "cbc")]
            SolverKind::Cbc => problem.solve_with(good_lp::coin_cbc),
            #[cfg(feature = "lp-solvers")]
            SolverKind::Glpk => problem.solve_with(good_lp::solvers::lp_solvers::LpSolver(
                good_lp::solvers::lp_solvers::GlpkSolver::new(),
            )),
            #[cfg(feature = "lp-solvers")]
            SolverKind::Gurobi => problem.solve_with(good_lp::solvers::lp_solvers::LpSolver(
                good_lp::solvers::lp_solvers::GurobiSolver::new(),
            )),
            #[allow(unreachable_patterns)]
            other => return Err(Error::SolverUnavailable(other.to_string())),
        };
        match outcome {
            Ok(assignment) => Ok(Some(assignment)),
            Err(reason) => {
                warn!(
                    solver = %self.params.solver,
                    %reason,
                    "ddsm solve did not reach an optimal solution"
                );
                Ok(None)
            }
        }
    }
}

impl MoveUpStrategy for DdsmStrategy {
    fn name(&self) -> &str {
        "ddsm"
    }

    fn initialize(&self, state: &SimState) -> Result<()> {
        self.thresholds(state).map(|_| ())
    }

    fn should_trigger_on_dispatch(&self, _state: &SimState) -> bool {
        self.params.trigger_on_dispatch
    }

    fn should_trigger_on_free(&self, _state: &SimState) -> bool {
        self.params.trigger_on_free
    }

    fn decide(&self, state: &SimState, _ambulance: usize) -> Result<MoveUpDecision> {
        self.decide_with(state, |problem| self.solve(problem))
    }

    fn clone_box(&self) -> Result<Box<dyn MoveUpStrategy>> {
        Ok(Box::new(Self {
            params: self.params.clone(),
            thresholds: self.thresholds.clone(),
        }))
    }
}

impl DdsmStrategy {
    /// Builds the formulation for the current state and turns whatever
    /// `solve` returns into a decision. `None` keeps every movable ambulance
    /// where it is.
    fn decide_with<F>(&self, state: &SimState, solve: F) -> Result<MoveUpDecision>
    where
        F: FnOnce(Formulation) -> Result<Option<Vec<Vec<f64>>>>,
    {
        let (short, long) = self.thresholds(state)?;
        let stations = state.stations().len();
        let movable = relocatable_ambulances(state);
        if movable.is_empty() {
            return Ok(MoveUpDecision::new(
                Vec::new(),
                Vec::new(),
                RawOutput::Vector(vec![0.0; stations]),
            ));
        }

        let costs = movable
            .iter()
            .map(|amb| {
                state
                    .stations()
                    .iter()
                    .map(|station| {
                        self.params.travel_cost
                            * state.travel_time_to(*amb, station.location, Priority::Low)
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let short_cover = self.coverage(state, self.params.priorities[0], short);
        let long_cover = self.coverage(state, self.params.priorities[1], long);
        check_demand_consistency(&short_cover, &long_cover)?;

        let problem = Formulation::build(&self.params, &costs, stations, &short_cover, &long_cover);
        let Some(assignment) = solve(problem)? else {
            warn!(
                ambulances = movable.len(),
                "ddsm keeping the current assignment"
            );
            return Ok(status_quo(state, &movable));
        };

        let tolerance = self.params.bin_tolerance;
        let off_binary = assignment
            .iter()
            .flatten()
            .filter(|value| (*value - value.round()).abs() > tolerance)
            .count();
        if off_binary > 0 {
            warn!(
                off_binary,
                tolerance, "ddsm assignment values outside binary tolerance"
            );
        }

        let targets = assignment
            .iter()
            .map(|row| argmax(row))
            .collect::<Vec<_>>();
        debug!(?movable, ?targets, "ddsm assignment");

        let output = averaged_one_hot(&targets, stations);
        Ok(MoveUpDecision::new(movable, targets, RawOutput::Vector(output)))
    }
}

/// Keeps every movable ambulance where it is.
fn status_quo(state: &SimState, movable: &[usize]) -> MoveUpDecision {
    let stations = movable
        .iter()
        .map(|amb| state.ambulances[*amb].station)
        .collect::<Vec<_>>();
    let output = averaged_one_hot(&stations, state.stations().len());
    MoveUpDecision::new(movable.to_vec(), stations, RawOutput::Vector(output))
}

fn averaged_one_hot(targets: &[usize], stations: usize) -> Vec<f64> {
    let mut output = vec![0.0; stations];
    if targets.is_empty() {
        return output;
    }
    let share = 1.0 / targets.len() as f64;
    for target in targets {
        output[*target] += share;
    }
    output
}

fn argmax(row: &[f64]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, top), (idx, value)| {
            if *value > top {
                (idx, *value)
            } else {
                (best, top)
            }
        })
        .0
}

struct Formulation {
    vars: ProblemVariables,
    objective: Expression,
    constraints: Vec<Constraint>,
    assignment: Vec<Vec<Variable>>,
}

impl Formulation {
    fn build(
        params: &DdsmParams,
        costs: &[Vec<f64>],
        stations: usize,
        short: &CoverageData,
        long: &CoverageData,
    ) -> Self {
        let mut vars = ProblemVariables::new();
        let mut constraints = Vec::new();

        let assignment = costs
            .iter()
            .map(|_| {
                (0..stations)
                    .map(|_| vars.add(variable().binary()))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let covered_once = vars.add_vector(variable().binary(), short.len());
        let covered_twice = vars.add_vector(variable().binary(), short.len());
        let covered_long = vars.add_vector(variable().binary(), long.len());
        let short_slack = vars.add(variable().min(0.0));
        let long_slack = vars.add(variable().min(0.0));

        for row in &assignment {
            let placed: Expression = row.iter().copied().sum();
            constraints.push(constraint!(placed == 1.0));
        }

        let at_station = |station: usize| -> Expression {
            assignment.iter().map(|row| row[station]).sum()
        };

        for (point, covering) in short.covering_stations.iter().enumerate() {
            let available: Expression = covering.iter().map(|s| at_station(*s)).sum();
            let once = covered_once[point];
            let twice = covered_twice[point];
            constraints.push(constraint!(twice <= once));
            constraints.push(constraint!(once + twice <= available));
        }
        for (point, covering) in long.covering_stations.iter().enumerate() {
            let available: Expression = covering.iter().map(|s| at_station(*s)).sum();
            let covered = covered_long[point];
            constraints.push(constraint!(covered <= available));
        }

        let short_covered: Expression = short
            .weights
            .iter()
            .zip(&covered_once)
            .map(|(weight, var)| *weight * *var)
            .sum();
        let short_floor = params.coverage_target * short.total_demand();
        constraints.push(constraint!(short_covered + short_slack >= short_floor));

        let long_covered: Expression = long
            .weights
            .iter()
            .zip(&covered_long)
            .map(|(weight, var)| *weight * *var)
            .sum();
        let long_floor = long.total_demand();
        constraints.push(constraint!(long_covered + long_slack >= long_floor));

        let double_coverage: Expression = short
            .weights
            .iter()
            .zip(&covered_twice)
            .map(|(weight, var)| *weight * *var)
            .sum();
        let travel: Expression = assignment
            .iter()
            .zip(costs)
            .flat_map(|(row, cost_row)| {
                row.iter()
                    .zip(cost_row)
                    .map(|(var, cost)| *cost * *var)
            })
            .sum();
        let slack: Expression = params.slack_weight * (short_slack + long_slack);
        let objective = double_coverage - travel - slack;

        Self {
            vars,
            objective,
            constraints,
            assignment,
        }
    }

    fn solve_with<S>(self, solver: S) -> std::result::Result<Vec<Vec<f64>>, String>
    where
        S: Solver,
        <S::Model as SolverModel>::Error: fmt::Display,
    {
        let Formulation {
            vars,
            objective,
            constraints,
            assignment,
        } = self;
        let mut model = vars.maximise(objective).using(solver);
        for constraint in constraints {
            model = model.with(constraint);
        }
        let solution = model.solve().map_err(|err| err.to_string())?;
        Ok(assignment
            .iter()
            .map(|row| row.iter().map(|var| solution.value(*var)).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moveup::actionable_moves;
    use crate::state::testing::idle_state;
    use crate::state::AmbulanceStatus;

    fn params() -> DdsmParams {
        DdsmParams {
            coverage_target: 0.0,
            travel_cost: 0.001,
            ..DdsmParams::default()
        }
    }

    #[test]
    fn construction_rejects_bad_parameters() {
        let cases = [
            DdsmParams {
                coverage_target: 1.5,
                ..params()
            },
            DdsmParams {
                travel_cost: 0.0,
                ..params()
            },
            DdsmParams {
                slack_weight: -1.0,
                ..params()
            },
            DdsmParams {
                priorities: vec![Priority::High],
                ..params()
            },
            DdsmParams {
                priorities: vec![Priority::Low, Priority::High],
                ..params()
            },
            DdsmParams {
                bin_tolerance: 0.1,
                ..params()
            },
        ];
        for case in cases {
            assert!(matches!(
                DdsmStrategy::new(case),
                Err(Error::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn thresholds_come_from_priority_cover_times() {
        let state = idle_state(&[0]);
        let strategy = DdsmStrategy::new(params()).expect("valid params");
        assert_eq!(strategy.thresholds(&state).expect("cover times set"), (8.0, 15.0));
        strategy.initialize(&state).expect("already initialised");
    }

    #[test]
    fn missing_cover_time_fails_initialisation() {
        let state = idle_state(&[0]);
        let strategy = DdsmStrategy::new(DdsmParams {
            priorities: vec![Priority::High, Priority::Medium],
            ..params()
        })
        .expect("valid params");
        assert!(strategy.initialize(&state).is_err());
    }

    #[test]
    fn no_movable_ambulances_gives_empty_decision() {
        let mut state = idle_state(&[0]);
        state.set_status(0, AmbulanceStatus::AtCall);
        let strategy = DdsmStrategy::new(params()).expect("valid params");
        let decision = strategy.decide(&state, 0).expect("decision succeeds");
        assert!(decision.ambulances.is_empty());
        assert_eq!(decision.raw_output, RawOutput::Vector(vec![0.0, 0.0, 0.0]));
    }

    #[test]
    fn solver_places_ambulances_for_double_coverage() {
        // Both ambulances start at the first station. Full long-threshold
        // coverage needs the middle station; doubling up there also covers
        // the (12, 0) point twice at the short threshold for the least travel.
        let state = idle_state(&[0, 0]);
        let strategy = DdsmStrategy::new(params()).expect("valid params");
        let decision = strategy.decide(&state, 0).expect("decision succeeds");

        assert_eq!(decision.ambulances, vec![0, 1]);
        assert_eq!(decision.stations, vec![1, 1]);
        assert_eq!(decision.raw_output, RawOutput::Vector(vec![0.0, 1.0, 0.0]));
        let moves = actionable_moves(&state, &decision).expect("valid decision");
        assert_eq!(moves, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn status_quo_keeps_current_stations() {
        let state = idle_state(&[2, 0]);
        let decision = status_quo(&state, &[0, 1]);
        assert_eq!(decision.stations, vec![2, 0]);
        assert_eq!(decision.raw_output, RawOutput::Vector(vec![0.5, 0.0, 0.5]));
        assert!(actionable_moves(&state, &decision)
            .expect("status quo is valid")
            .is_empty());
    }

    #[test]
    fn failed_solve_keeps_the_current_assignment() {
        let state = idle_state(&[2, 0]);
        let strategy = DdsmStrategy::new(params()).expect("valid params");
        let decision = strategy
            .decide_with(&state, |problem| {
                assert_eq!(problem.assignment.len(), 2);
                assert!(problem.assignment.iter().all(|row| row.len() == 3));
                Ok(None)
            })
            .expect("fallback decision");

        assert_eq!(decision.ambulances, vec![0, 1]);
        assert_eq!(decision.stations, vec![2, 0]);
        assert_eq!(decision.raw_output, RawOutput::Vector(vec![0.5, 0.0, 0.5]));
        assert!(actionable_moves(&state, &decision)
            .expect("status quo is valid")
            .is_empty());
    }

    #[test]
    fn fractional_assignment_rounds_to_largest_entry() {
        let state = idle_state(&[0, 0]);
        let strategy = DdsmStrategy::new(params()).expect("valid params");
        let decision = strategy
            .decide_with(&state, |_| {
                Ok(Some(vec![vec![0.3, 0.7, 0.0], vec![0.0, 0.45, 0.55]]))
            })
            .expect("decision succeeds");

        assert_eq!(decision.stations, vec![1, 2]);
        assert_eq!(decision.raw_output, RawOutput::Vector(vec![0.0, 0.5, 0.5]));
        let moves = actionable_moves(&state, &decision).expect("valid decision");
        assert_eq!(moves, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn solver_errors_propagate_from_decide() {
        let state = idle_state(&[0]);
        let strategy = DdsmStrategy::new(params()).expect("valid params");
        let result = strategy.decide_with(&state, |_| {
            Err(Error::SolverUnavailable("cbc".to_string()))
        });
        assert!(matches!(result, Err(Error::SolverUnavailable(name)) if name == "cbc"));
    }

    #[test]
    fn one_hot_output_averages_over_ambulances() {
        assert_eq!(averaged_one_hot(&[0, 0, 2, 1], 3), vec![0.5, 0.25, 0.25]);
        assert_eq!(averaged_one_hot(&[], 2), vec![0.0, 0.0]);
    }

    #[test]
    fn cloned_strategy_keeps_parameters() {
        let strategy = DdsmStrategy::new(params()).expect("valid params");
        let copy = strategy.clone_box().expect("ddsm is clonable");
        assert_eq!(copy.name(), "ddsm");
    }
}
