mod common;

use predicates::str::diff;

#[test]
fn list_strategies_prints_supported_values() {
    let expected = concat!("none\n", "null\n", "learned\n", "ddsm\n");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("moveup-sim");
    cmd.arg("list-strategies");
    cmd.assert().success().stdout(diff(expected));
}

#[test]
fn show_config_prints_parsed_scenario() {
    let file = common::scenario_file(common::SCENARIO, ".toml");
    let expected = concat!(
        "Strategy: null\n",
        "Calls: 2 listed\n",
        "Replications: 1\n",
        "Stop: until 50\n",
        "Stations:\n",
        "- base at (0, 0) (capacity: 1)\n",
        "- east at (10, 0) (capacity: 1)\n",
        "Hospitals:\n",
        "Ambulances:\n",
        "- 0 at base (Als, shift from 0)\n",
        "- 1 at east (Als, shift from 0)\n",
    );

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("moveup-sim");
    cmd.args(["show-config", "--config"])
        .arg(file.path())
        .args(["--until", "50"]);
    cmd.assert().success().stdout(diff(expected));
}

#[test]
fn show_config_applies_strategy_override() {
    let file = common::scenario_file(common::SCENARIO, ".toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("moveup-sim");
    cmd.args(["show-config", "--config"])
        .arg(file.path())
        .args(["--strategy", "ddsm", "--replications", "3"]);
    cmd.assert()
        .success()
        .stdout(predicates::str::starts_with(
            "Strategy: ddsm\nCalls: 2 listed\nReplications: 3\nStop: exhaust\n",
        ));
}
