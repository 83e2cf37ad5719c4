//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use producer_sweep::broker::{LoopbackBroker, LoopbackOptions};
use producer_sweep::executor::RunSettings;
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const TURBINE_TYPES: [&str; 3] = ["kaplan", "francis", "pelton"];
const STATUSES: [&str; 3] = ["generating", "standby", "maintenance"];

/// One hydro-plant telemetry record, deterministic in `i`
pub fn hydro_record(i: usize) -> serde_json::Value {
    let device = i % 15 + 1;
    let power = 50.0 + (device % 15) as f64 * 10.0 + (i % 7) as f64 * 0.3;
    json!({
        "device_id": format!("HYDRO_DN_{:03}", device),
        "timestamp": format!("2024-06-01T12:{:02}:{:02}Z", (i / 60) % 60, i % 60),
        "power_output": power,
        "efficiency": 85.0 + (i % 10) as f64,
        "temperature": 14.5 + (i % 4) as f64 * 0.5,
        "voltage": 15000.0 + (i % 100) as f64 * 10.0,
        "status": STATUSES[if i % 20 == 0 { 2 } else if i % 10 == 0 { 1 } else { 0 }],
        "location": { "lat": 48.1234, "lon": 35.0421 },
        "maintenance_hours": 500 + (i * 37) % 5500,
        "water_flow": 1000.0 + (device % 5) as f64 * 400.0,
        "water_level": 15.0 + (device % 10) as f64,
        "turbine_type": TURBINE_TYPES[device % 3],
        "reserved": format!("padding{}", "x".repeat(30)),
    })
}

/// Write `count` records as newline-delimited JSON
pub fn write_workload(count: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create workload file");
    for i in 0..count {
        writeln!(file, "{}", hydro_record(i)).expect("write workload record");
    }
    file.flush().expect("flush workload file");
    file
}

/// Loopback broker that acknowledges without sleeping
pub fn fast_broker() -> LoopbackBroker {
    LoopbackBroker::new(LoopbackOptions {
        ack_latency: Duration::ZERO,
        ..Default::default()
    })
}

/// Short timeouts and no settling pause
pub fn fast_settings() -> RunSettings {
    RunSettings {
        ack_timeout: Duration::from_millis(500),
        drain_timeout: Duration::from_millis(100),
        settle_delay: Duration::ZERO,
    }
}
