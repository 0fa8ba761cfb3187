// Remote stats parsing tests

use fleetdeck::probe::{map_container_states, parse_remote_stats};

const SAMPLE: &str = "4\n---\n0.52 0.40 0.35 1/200 12345\n---\n\
MemTotal:        8000000 kB\nMemFree:         2000000 kB\nMemAvailable:    5000000 kB\n\
Buffers:          100000 kB\nCached:          1000000 kB\n---\n45000\n---\n360000.12 710000.50\n";

#[test]
fn parses_combined_proc_output() {
    let metrics = parse_remote_stats(SAMPLE).expect("parse");
    assert!((metrics.cpu_percent - 13.0).abs() < 1e-9); // 0.52 load / 4 cores
    assert_eq!(metrics.ram_total, 8000000 * 1024);
    assert_eq!(metrics.ram_used, (8000000 - 5000000) * 1024);
    assert_eq!(metrics.temp_celsius, Some(45.0));
    assert_eq!(metrics.uptime_secs, 360000);
}

#[test]
fn falls_back_to_free_buffers_cached_without_memavailable() {
    let sample = SAMPLE.replace("MemAvailable:    5000000 kB\n", "");
    let metrics = parse_remote_stats(&sample).expect("parse");
    let free = (2000000 + 100000 + 1000000) * 1024;
    assert_eq!(metrics.ram_used, 8000000 * 1024 - free);
}

#[test]
fn missing_thermal_zone_yields_no_temperature() {
    let sample = SAMPLE.replace("45000", "");
    let metrics = parse_remote_stats(&sample).expect("parse");
    assert_eq!(metrics.temp_celsius, None);
}

#[test]
fn cpu_is_capped_at_one_hundred_percent() {
    let sample = SAMPLE.replace("0.52 0.40 0.35", "99.0 50.0 20.0");
    let metrics = parse_remote_stats(&sample).expect("parse");
    assert_eq!(metrics.cpu_percent, 100.0);
}

#[test]
fn truncated_output_is_rejected() {
    assert!(parse_remote_stats("4\n---\n0.5").is_none());
    assert!(parse_remote_stats("").is_none());
}

#[test]
fn container_states_map_to_configured_names() {
    let stdout = "web:Running\ndb:Exited\nstray:Running\n";
    let configured = vec!["web".to_string(), "db".to_string(), "gone".to_string()];
    let states = map_container_states(stdout, &configured);

    assert_eq!(states.len(), 3);
    assert_eq!(states[0].name, "web");
    assert_eq!(states[0].state, "running");
    assert!(states[0].is_running());
    assert_eq!(states[1].state, "exited");
    assert_eq!(states[2].state, "unknown", "configured but unreported");
    assert!(!states.iter().any(|c| c.name == "stray"));
}
