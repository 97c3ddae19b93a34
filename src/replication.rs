use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::decision_log::DecisionLogger;
use crate::engine::{run, StopCondition};
use crate::error::Result;
use crate::moveup::MoveUpStrategy;
use crate::state::SimState;

/// How replications get their strategy. `Shared` hands every replication
/// the same read-only instance; `Cloned` gives each one its own copy through
/// [`MoveUpStrategy::clone_box`].
pub enum StrategyShare {
    None,
    Shared(Arc<dyn MoveUpStrategy>),
    Cloned(Box<dyn MoveUpStrategy>),
}

impl StrategyShare {
    pub fn name(&self) -> &str {
        match self {
            StrategyShare::None => "none",
            StrategyShare::Shared(strategy) => strategy.name(),
            StrategyShare::Cloned(strategy) => strategy.name(),
        }
    }
}

pub struct ReplicationOutcome {
    pub index: usize,
    pub state: SimState,
    pub completed: bool,
    pub log: Option<DecisionLogger>,
}

/// Runs `count` independent replications, in parallel when there is more
/// than one. `make_state` builds the private state of each replication;
/// outcomes come back in replication order.
pub fn run_replications<F>(
    count: usize,
    share: &StrategyShare,
    stop: StopCondition,
    log_decisions: bool,
    make_state: F,
) -> Result<Vec<ReplicationOutcome>>
where
    F: Fn(usize) -> Result<SimState> + Sync,
{
    let single = |index: usize| run_one(index, share, stop, log_decisions, &make_state);
    if count <= 1 {
        return (0..count).map(single).collect();
    }
    (0..count).into_par_iter().map(single).collect()
}

/// Replications that all start from clones of `base`.
pub fn replicate(
    base: &SimState,
    count: usize,
    share: &StrategyShare,
    stop: StopCondition,
    log_decisions: bool,
) -> Result<Vec<ReplicationOutcome>> {
    run_replications(count, share, stop, log_decisions, |_| Ok(base.clone()))
}

fn run_one<F>(
    index: usize,
    share: &StrategyShare,
    stop: StopCondition,
    log_decisions: bool,
    make_state: &F,
) -> Result<ReplicationOutcome>
where
    F: Fn(usize) -> Result<SimState>,
{
    let mut state = make_state(index)?;
    let mut log = log_decisions.then(DecisionLogger::new);
    let owned;
    let strategy: Option<&dyn MoveUpStrategy> = match share {
        StrategyShare::None => None,
        StrategyShare::Shared(strategy) => Some(strategy.as_ref()),
        StrategyShare::Cloned(prototype) => {
            owned = prototype.clone_box()?;
            Some(owned.as_ref())
        }
    };
    debug!(replication = index, strategy = share.name(), "starting replication");
    let completed = run(&mut state, strategy, log.as_mut(), stop)?;
    Ok(ReplicationOutcome {
        index,
        state,
        completed,
        log,
    })
}
