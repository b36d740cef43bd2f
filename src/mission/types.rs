use crate::geo::GeoPoint;
use serde::{Deserialize, Serialize};

/// MAV_CMD_NAV_WAYPOINT, the command used for the synthesized home row.
pub const NAV_WAYPOINT_CMD: u16 = 16;

/// One row of a waypoint mission, as stored in a QGC WPL 110 file: raw
/// MAV_FRAME / MAV_CMD codes and the seven numeric parameters, of which
/// param5..param7 are kept as x/y/z (latitude/longitude/altitude for global
/// frames). Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointCommand {
    pub seq: u16,
    pub current: bool,
    pub frame: u8,
    pub command: u16,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub autocontinue: bool,
}

impl WaypointCommand {
    /// Target position of a navigation command.
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomePosition {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f32,
}

/// An ordered waypoint mission. `items` are the flight items in flight
/// order; the home slot (wire seq 0) is carried separately so that file and
/// wire representations can both synthesize it first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub home: Option<HomePosition>,
    pub items: Vec<WaypointCommand>,
}

impl Mission {
    pub fn new(items: Vec<WaypointCommand>) -> Self {
        Self { home: None, items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
