use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use moveup_sim::engine::{run, StopCondition};
use moveup_sim::models::SimConfig;
use moveup_sim::moveup::{
    DdsmParams, DdsmStrategy, LearnedPolicyStrategy, LinearApproximator, MoveUpStrategy,
    NullStrategy, StationOccupancyEncoder,
};
use moveup_sim::scenario::build_state;
use moveup_sim::state::SimState;

const STATIONS: usize = 8;
const AMBULANCES: usize = 6;

fn build_config() -> SimConfig {
    let mut scenario = String::new();
    for idx in 0..STATIONS {
        scenario.push_str(&format!(
            "[[stations]]\nname = \"st-{}\"\nx = {}.0\ny = {}.0\n\n",
            idx,
            (idx % 4) * 8,
            (idx / 4) * 8
        ));
    }
    for idx in 0..AMBULANCES {
        scenario.push_str(&format!("[[ambulances]]\nstation = \"st-{}\"\n\n", idx));
    }
    scenario.push_str(
        r#"
[[hospitals]]
name = "central"
x = 12.0
y = 4.0

[cover_times]
high = 6.0
low = 16.0

[calls]
rate = 0.3
duration = 200.0
seed = 11

[calls.bounds]
min_x = 0.0
min_y = 0.0
max_x = 24.0
max_y = 8.0
"#,
    );
    toml::from_str(&scenario).expect("bench scenario should parse")
}

/// State partway through a busy period, so some ambulances are out.
fn busy_state() -> SimState {
    let config = build_config();
    let mut state = build_state(&config).expect("state should build");
    run(&mut state, None, None, StopCondition::Until(100.0)).expect("warm-up should succeed");
    state
}

fn learned_strategy() -> LearnedPolicyStrategy {
    let inputs = 2 * STATIONS + 2;
    let weights = (0..STATIONS)
        .map(|row| {
            (0..inputs)
                .map(|col| ((row * inputs + col) % 7) as f64 / 7.0 - 0.5)
                .collect()
        })
        .collect();
    let approximator = LinearApproximator::new(weights, vec![0.0; STATIONS])
        .expect("approximator shape should be valid");
    LearnedPolicyStrategy::new(Box::new(StationOccupancyEncoder), Box::new(approximator))
}

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide");
    let state = busy_state();
    let ambulance = 0;
    let size_label = format!("{}x{}", STATIONS, AMBULANCES);
    let strategies: Vec<Box<dyn MoveUpStrategy>> = vec![
        Box::new(NullStrategy::default()),
        Box::new(learned_strategy()),
        Box::new(DdsmStrategy::new(DdsmParams::default()).expect("ddsm params should be valid")),
    ];

    for strategy in &strategies {
        strategy
            .initialize(&state)
            .expect("strategy should accept the scenario");
        group.bench_with_input(
            BenchmarkId::new(strategy.name(), &size_label),
            &state,
            |b, state: &SimState| {
                b.iter(|| {
                    let decision = strategy
                        .decide(state, ambulance)
                        .expect("decision should succeed");
                    black_box(decision);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_decide);
criterion_main!(benches);
