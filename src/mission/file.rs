use super::types::{HomePosition, Mission, WaypointCommand, NAV_WAYPOINT_CMD};
use crate::error::MissionFileError;

/// Version header of the plaintext waypoint file format.
pub const WPL_HEADER: &str = "QGC WPL 110";

const FIELDS_PER_LINE: usize = 12;

/// Parse a QGC WPL 110 waypoint file.
///
/// Line 1 must carry the version header; every following line is one
/// tab-separated `index current frame command p1..p7 autocontinue` row. A
/// leading seq-0 row is the home slot and is split off into `Mission::home`.
pub fn parse_wpl(contents: &str) -> Result<Mission, MissionFileError> {
    let mut lines = contents.lines();

    let header = lines.next().unwrap_or_default();
    if !header.starts_with(WPL_HEADER) {
        return Err(MissionFileError::UnsupportedVersion(header.to_string()));
    }

    let mut rows = Vec::new();
    for (index, line) in lines.enumerate() {
        // 1-based, counting the header line
        rows.push(parse_row(line, index + 2)?);
    }

    let home = if rows.first().is_some_and(|row| row.seq == 0) {
        let first = rows.remove(0);
        Some(HomePosition {
            latitude_deg: first.x,
            longitude_deg: first.y,
            altitude_m: first.z as f32,
        })
    } else {
        None
    };

    Ok(Mission { home, items: rows })
}

fn parse_row(line: &str, line_no: usize) -> Result<WaypointCommand, MissionFileError> {
    // Only the first 12 columns are meaningful; extra trailing columns are
    // tolerated, as in other readers of this format.
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() < FIELDS_PER_LINE {
        return Err(MissionFileError::FieldCount {
            line: line_no,
            expected: FIELDS_PER_LINE,
            found: fields.len(),
        });
    }

    Ok(WaypointCommand {
        seq: parse_field(fields[0], "index", line_no)?,
        current: parse_field::<u8>(fields[1], "current", line_no)? != 0,
        frame: parse_field(fields[2], "frame", line_no)?,
        command: parse_field(fields[3], "command", line_no)?,
        param1: parse_field(fields[4], "param1", line_no)?,
        param2: parse_field(fields[5], "param2", line_no)?,
        param3: parse_field(fields[6], "param3", line_no)?,
        param4: parse_field(fields[7], "param4", line_no)?,
        x: parse_field(fields[8], "param5/x", line_no)?,
        y: parse_field(fields[9], "param6/y", line_no)?,
        z: parse_field(fields[10], "param7/z", line_no)?,
        autocontinue: parse_field::<u8>(fields[11], "autocontinue", line_no)? != 0,
    })
}

fn parse_field<T: std::str::FromStr>(
    value: &str,
    field: &'static str,
    line: usize,
) -> Result<T, MissionFileError> {
    value.parse().map_err(|_| MissionFileError::InvalidField {
        line,
        field,
        value: value.to_string(),
    })
}

/// Serialize a mission as a QGC WPL 110 file, synthesizing the home row
/// (command 16, frame 0, current flag 1) first.
pub fn format_wpl(mission: &Mission, home: &HomePosition) -> String {
    let mut output = String::new();
    output.push_str(WPL_HEADER);
    output.push('\n');
    output.push_str(&format!(
        "0\t1\t0\t{}\t0\t0\t0\t0\t{}\t{}\t{}\t1\n",
        NAV_WAYPOINT_CMD, home.latitude_deg, home.longitude_deg, home.altitude_m
    ));
    for item in &mission.items {
        output.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            item.seq,
            u8::from(item.current),
            item.frame,
            item.command,
            item.param1,
            item.param2,
            item.param3,
            item.param4,
            item.x,
            item.y,
            item.z,
            u8::from(item.autocontinue),
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MissionFileError;

    const SAMPLE: &str = "QGC WPL 110\n\
        0\t1\t0\t16\t0\t0\t0\t0\t47.397742\t8.545594\t488.0\t1\n\
        1\t0\t3\t16\t0\t0\t0\t0\t47.398\t8.546\t20.0\t1\n\
        2\t0\t3\t16\t0\t0\t0\t0\t47.399\t8.547\t20.0\t1\n";

    #[test]
    fn parses_home_and_items() {
        let mission = parse_wpl(SAMPLE).unwrap();
        let home = mission.home.expect("seq-0 row becomes home");
        assert!((home.latitude_deg - 47.397742).abs() < 1e-9);
        assert_eq!(mission.items.len(), 2);
        assert_eq!(mission.items[0].seq, 1);
        assert_eq!(mission.items[1].seq, 2);
    }

    #[test]
    fn single_line_example() {
        let contents = "QGC WPL 110\n1\t1\t3\t16\t0\t0\t0\t0\t47.0\t8.0\t10.0\t1\n";
        let mission = parse_wpl(contents).unwrap();
        assert!(mission.home.is_none());
        assert_eq!(mission.items.len(), 1);
        let wp = &mission.items[0];
        assert_eq!(wp.frame, 3);
        assert_eq!(wp.command, 16);
        assert!(wp.current);
        assert!(wp.autocontinue);
        assert_eq!(wp.x, 47.0);
        assert_eq!(wp.y, 8.0);
        assert_eq!(wp.z, 10.0);
    }

    #[test]
    fn rejects_wrong_header() {
        let err = parse_wpl("QGC WPL 120\n").unwrap_err();
        assert!(matches!(err, MissionFileError::UnsupportedVersion(_)));
    }

    #[test]
    fn rejects_missing_header() {
        let err = parse_wpl("").unwrap_err();
        assert!(matches!(err, MissionFileError::UnsupportedVersion(_)));
    }

    #[test]
    fn rejects_malformed_numeric_field() {
        let contents = "QGC WPL 110\n1\t0\t3\t16\t0\t0\t0\t0\tnotanumber\t8.0\t10.0\t1\n";
        let err = parse_wpl(contents).unwrap_err();
        match err {
            MissionFileError::InvalidField { line, field, value } => {
                assert_eq!(line, 2);
                assert_eq!(field, "param5/x");
                assert_eq!(value, "notanumber");
            }
            other => panic!("expected InvalidField, got {other:?}"),
        }
    }

    #[test]
    fn ignores_trailing_extra_columns() {
        let contents = "QGC WPL 110\n1\t0\t3\t16\t0\t0\t0\t0\t47.0\t8.0\t10.0\t1\tnote\n";
        let mission = parse_wpl(contents).unwrap();
        assert_eq!(mission.items.len(), 1);
        assert_eq!(mission.items[0].x, 47.0);
        assert!(mission.items[0].autocontinue);
    }

    #[test]
    fn rejects_short_line() {
        let contents = "QGC WPL 110\n1\t0\t3\t16\n";
        let err = parse_wpl(contents).unwrap_err();
        assert!(matches!(
            err,
            MissionFileError::FieldCount {
                line: 2,
                expected: 12,
                found: 4
            }
        ));
    }

    #[test]
    fn roundtrip_preserves_command_fields() {
        let mission = parse_wpl(SAMPLE).unwrap();
        let home = mission.home.unwrap();
        let rewritten = format_wpl(&mission, &home);
        let reparsed = parse_wpl(&rewritten).unwrap();
        assert_eq!(reparsed.items, mission.items);
        let reparsed_home = reparsed.home.unwrap();
        assert!((reparsed_home.latitude_deg - home.latitude_deg).abs() < 1e-9);
        assert!((reparsed_home.longitude_deg - home.longitude_deg).abs() < 1e-9);
        assert!((reparsed_home.altitude_m - home.altitude_m).abs() < 1e-3);
    }

    #[test]
    fn format_synthesizes_home_row_first() {
        let mission = Mission::new(vec![]);
        let home = HomePosition {
            latitude_deg: 47.5,
            longitude_deg: 8.5,
            altitude_m: 10.0,
        };
        let output = format_wpl(&mission, &home);
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("QGC WPL 110"));
        let home_row = lines.next().unwrap();
        let fields: Vec<&str> = home_row.split('\t').collect();
        assert_eq!(fields[0], "0");
        assert_eq!(fields[1], "1");
        assert_eq!(fields[2], "0");
        assert_eq!(fields[3], "16");
        assert_eq!(fields[11], "1");
    }

    #[test]
    fn accepts_header_with_trailing_content() {
        // The original parser only checks the line prefix.
        let contents = "QGC WPL 110 extra\n";
        let mission = parse_wpl(contents).unwrap();
        assert!(mission.items.is_empty());
    }
}
