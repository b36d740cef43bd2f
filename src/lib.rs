//! Async MAVLink mission sequencer.
//!
//! Connects to a flight controller, arms and commands takeoff, switches
//! flight modes, streams velocity/position setpoints and reads/writes
//! QGC WPL 110 waypoint mission files. The wire protocol, state estimation
//! and flight control all live in the autopilot and the `mavlink` crate;
//! this crate sequences commands and waits on the polled state they change.

pub mod command;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod geo;
pub mod mission;
pub mod modes;
pub mod sequence;
pub mod state;
pub mod vehicle;

pub use config::{RetryPolicy, VehicleConfig};
pub use error::{MissionFileError, VehicleError};
pub use geo::{planar_distance_m, GeoPoint};
pub use sequence::GotoOutcome;
pub use vehicle::Vehicle;

pub use state::{
    AutopilotType, GpsFixType, LinkState, MissionState, SystemStatus, Telemetry, VehicleState,
    VehicleType,
};

pub use mission::{
    format_wpl, items_for_wire_upload, mission_from_wire_download, parse_wpl, HomePosition,
    Mission, MissionHandle, WaypointCommand, WPL_HEADER,
};
