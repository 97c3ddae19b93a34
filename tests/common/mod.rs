use std::io::Write;

pub const SCENARIO: &str = r#"
[[stations]]
name = "base"
x = 0.0
y = 0.0

[[stations]]
name = "east"
x = 10.0
y = 0.0

[[ambulances]]
station = "base"

[[ambulances]]
station = "east"

[[calls]]
arrival = 0.0
priority = "high"
x = 5.0
y = 0.0
on_scene_duration = 4.0
transport = false

[[calls]]
arrival = 20.0
priority = "low"
x = 8.0
y = 0.0
on_scene_duration = 4.0
transport = false

[cover_times]
high = 10.0
low = 30.0

[strategy]
kind = "null"
"#;

pub fn scenario_file(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("moveup-scenario-")
        .suffix(suffix)
        .tempfile()
        .expect("temp file should be created");
    file.write_all(contents.as_bytes())
        .expect("scenario write should succeed");
    file
}
