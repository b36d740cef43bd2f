use super::types::{HomePosition, Mission, WaypointCommand, NAV_WAYPOINT_CMD};

/// MAV_FRAME codes whose x/y carry latitude/longitude degrees.
pub(crate) fn is_global_frame(frame: u8) -> bool {
    // GLOBAL, GLOBAL_RELATIVE_ALT, GLOBAL_INT, GLOBAL_RELATIVE_ALT_INT,
    // GLOBAL_TERRAIN_ALT, GLOBAL_TERRAIN_ALT_INT
    matches!(frame, 0 | 3 | 5 | 6 | 10 | 11)
}

/// Expand a mission into the wire sequence for a MAVLink upload: the home
/// slot (or a zero placeholder) at seq 0, flight items resequenced from 1.
pub fn items_for_wire_upload(mission: &Mission) -> Vec<WaypointCommand> {
    let home_item = WaypointCommand {
        seq: 0,
        current: false,
        frame: 0,
        command: NAV_WAYPOINT_CMD,
        param1: 0.0,
        param2: 0.0,
        param3: 0.0,
        param4: 0.0,
        x: mission.home.map_or(0.0, |h| h.latitude_deg),
        y: mission.home.map_or(0.0, |h| h.longitude_deg),
        z: mission.home.map_or(0.0, |h| h.altitude_m as f64),
        autocontinue: true,
    };

    let mut wire = Vec::with_capacity(mission.items.len() + 1);
    wire.push(home_item);
    for (i, item) in mission.items.iter().enumerate() {
        wire.push(WaypointCommand {
            seq: (i + 1) as u16,
            ..item.clone()
        });
    }
    wire
}

/// Collapse a downloaded wire sequence back into a mission: wire seq 0 is
/// the home slot; the remaining items keep device order and their wire
/// sequence numbers.
pub fn mission_from_wire_download(wire_items: Vec<WaypointCommand>) -> Mission {
    let mut wire_items = wire_items;
    if wire_items.is_empty() {
        return Mission {
            home: None,
            items: wire_items,
        };
    }

    let first = wire_items.remove(0);
    let home = Some(HomePosition {
        latitude_deg: first.x,
        longitude_deg: first.y,
        altitude_m: first.z as f32,
    });

    Mission {
        home,
        items: wire_items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item(seq: u16) -> WaypointCommand {
        WaypointCommand {
            seq,
            current: seq == 1,
            frame: 3,
            command: 16,
            param1: 0.0,
            param2: 1.0,
            param3: 0.0,
            param4: 0.0,
            x: 47.397742,
            y: 8.545597,
            z: 42.5,
            autocontinue: true,
        }
    }

    #[test]
    fn upload_prepends_home_and_resequences() {
        let mission = Mission {
            home: Some(HomePosition {
                latitude_deg: 47.397742,
                longitude_deg: 8.545594,
                altitude_m: 488.0,
            }),
            items: vec![sample_item(5), sample_item(9)],
        };

        let wire = items_for_wire_upload(&mission);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0].seq, 0);
        assert_eq!(wire[0].command, 16);
        assert_eq!(wire[0].frame, 0);
        assert_eq!(wire[1].seq, 1);
        assert_eq!(wire[2].seq, 2);
        assert_eq!(wire[1].x, 47.397742);
    }

    #[test]
    fn upload_uses_placeholder_when_no_home() {
        let mission = Mission::new(vec![sample_item(1)]);
        let wire = items_for_wire_upload(&mission);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].x, 0.0);
        assert_eq!(wire[0].y, 0.0);
    }

    #[test]
    fn download_strips_home_slot() {
        let wire = vec![
            WaypointCommand {
                seq: 0,
                frame: 0,
                ..sample_item(0)
            },
            sample_item(1),
            sample_item(2),
        ];

        let mission = mission_from_wire_download(wire);
        let home = mission.home.expect("wire seq 0 becomes home");
        assert!((home.latitude_deg - 47.397742).abs() < 1e-9);
        assert_eq!(mission.items.len(), 2);
        assert_eq!(mission.items[0].seq, 1);
        assert_eq!(mission.items[1].seq, 2);
    }

    #[test]
    fn download_of_empty_store() {
        let mission = mission_from_wire_download(Vec::new());
        assert!(mission.home.is_none());
        assert!(mission.is_empty());
    }

    #[test]
    fn upload_then_download_is_lossless() {
        let mission = Mission {
            home: Some(HomePosition {
                latitude_deg: 47.0,
                longitude_deg: 8.0,
                altitude_m: 10.0,
            }),
            items: vec![sample_item(1), sample_item(2)],
        };
        let roundtripped = mission_from_wire_download(items_for_wire_upload(&mission));
        assert_eq!(roundtripped.items, mission.items);
        assert_eq!(roundtripped.home, mission.home);
    }

    #[test]
    fn global_frames() {
        assert!(is_global_frame(0));
        assert!(is_global_frame(3));
        assert!(is_global_frame(6));
        assert!(!is_global_frame(1));
        assert!(!is_global_frame(2));
    }
}
