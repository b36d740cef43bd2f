//! End-to-end sequencing tests against an ArduPilot SITL instance.
//!
//! Start SITL (e.g. `sim_vehicle.py -v ArduCopter --out udp:127.0.0.1:14550`)
//! and run with `cargo test -- --ignored`. The bind address can be overridden
//! with `MAVSEQ_SITL_UDP_BIND`.

use mavseq::{GeoPoint, GotoOutcome, Mission, Vehicle, WaypointCommand};
use std::time::Duration;

const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(30);

fn sitl_bind_addr() -> String {
    std::env::var("MAVSEQ_SITL_UDP_BIND").unwrap_or_else(|_| String::from("0.0.0.0:14550"))
}

fn square_mission(center_lat: f64, center_lon: f64, alt_m: f64) -> Mission {
    let offset = 0.0005;
    let corners = [
        (center_lat - offset, center_lon - offset),
        (center_lat - offset, center_lon + offset),
        (center_lat + offset, center_lon + offset),
        (center_lat + offset, center_lon - offset),
    ];
    let items = corners
        .iter()
        .enumerate()
        .map(|(i, &(lat, lon))| WaypointCommand {
            seq: (i + 1) as u16,
            current: i == 0,
            frame: 3,
            command: 16,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: lat,
            y: lon,
            z: alt_m,
            autocontinue: true,
        })
        .collect();
    Mission::new(items)
}

async fn connect_and_wait_for_fix() -> Vehicle {
    let vehicle = Vehicle::connect_udp(&sitl_bind_addr())
        .await
        .expect("SITL connection");

    let mut telemetry_rx = vehicle.telemetry();
    tokio::time::timeout(
        TELEMETRY_TIMEOUT,
        telemetry_rx.wait_for(|t| t.latitude_deg.is_some()),
    )
    .await
    .expect("timed out waiting for a position fix")
    .expect("telemetry channel closed");

    vehicle
}

fn items_match(expected: &WaypointCommand, got: &WaypointCommand) -> bool {
    expected.seq == got.seq
        && expected.frame == got.frame
        && expected.command == got.command
        && expected.autocontinue == got.autocontinue
        && (expected.x - got.x).abs() < 1e-6
        && (expected.y - got.y).abs() < 1e-6
        && (expected.z - got.z).abs() < 1e-2
}

#[tokio::test]
#[ignore = "requires a running SITL instance"]
async fn mission_roundtrip_over_sitl() {
    let vehicle = connect_and_wait_for_fix().await;

    let telemetry = vehicle.telemetry().borrow().clone();
    let mission = square_mission(
        telemetry.latitude_deg.unwrap(),
        telemetry.longitude_deg.unwrap(),
        25.0,
    );

    vehicle
        .mission()
        .upload(mission.clone())
        .await
        .expect("mission upload");
    let downloaded = vehicle.mission().download().await.expect("mission download");

    assert!(
        downloaded.home.is_some(),
        "wire seq 0 should come back as the home slot"
    );
    assert_eq!(downloaded.items.len(), mission.items.len());
    for (expected, got) in mission.items.iter().zip(&downloaded.items) {
        assert!(
            items_match(expected, got),
            "readback mismatch: expected {expected:?}, got {got:?}"
        );
    }
}

#[tokio::test]
#[ignore = "requires a running SITL instance"]
async fn save_mission_writes_wpl_file() {
    let vehicle = connect_and_wait_for_fix().await;

    let telemetry = vehicle.telemetry().borrow().clone();
    let mission = square_mission(
        telemetry.latitude_deg.unwrap(),
        telemetry.longitude_deg.unwrap(),
        25.0,
    );
    vehicle
        .mission()
        .upload(mission.clone())
        .await
        .expect("mission upload");

    let path = std::env::temp_dir().join("mavseq_sitl_mission.waypoints");
    vehicle
        .mission()
        .save_to_file(&path)
        .await
        .expect("mission save");

    let contents = tokio::fs::read_to_string(&path).await.expect("read back");
    let reread = mavseq::parse_wpl(&contents).expect("saved file parses");
    assert!(reread.home.is_some(), "saved file starts with the home row");
    assert_eq!(reread.items.len(), mission.items.len());
    for (expected, got) in mission.items.iter().zip(&reread.items) {
        assert!(
            items_match(expected, got),
            "file mismatch: expected {expected:?}, got {got:?}"
        );
    }
}

#[tokio::test]
#[ignore = "requires a running SITL instance"]
async fn arm_takeoff_and_goto() {
    let vehicle = connect_and_wait_for_fix().await;

    vehicle.arm_and_takeoff(15.0).await.expect("arm and takeoff");

    let telemetry = vehicle.telemetry().borrow().clone();
    let target = GeoPoint::new(
        telemetry.latitude_deg.unwrap() + 0.0003,
        telemetry.longitude_deg.unwrap(),
        15.0,
    );

    let outcome = vehicle.goto(target, 3.0).await.expect("goto");
    assert_eq!(outcome, GotoOutcome::Reached);

    // A short velocity burst keeps the setpoint stream above 10 Hz while it
    // lasts; it must return cleanly.
    vehicle
        .set_velocity(1.0, 0.0, 0.0, 20)
        .await
        .expect("velocity burst");

    vehicle.set_mode_and_wait("RTL").await.expect("RTL");
}
